//! Filter group persistence.

use crate::database::Database;
use crate::error::{IntegrityViolation, StoreError};
use rusqlite::{Connection, OptionalExtension, Row, params};
use strainer_core::{FilterGroup, FilterGroupId, TypeDescription};

const COLUMNS: &str =
    "filter_group_id, symbolic, display_name, description, input_type, output_type";

/// Reads and writes [`FilterGroup`] rows.
pub struct FilterGroupDao<'a> {
    db: &'a Database,
}

impl<'a> FilterGroupDao<'a> {
    pub(crate) fn new(db: &'a Database) -> Self {
        Self { db }
    }

    /// Insert a new group and record its id on `group`.
    pub fn insert_object(&self, group: &mut FilterGroup) -> Result<FilterGroupId, StoreError> {
        let tx = self.db.connection().unchecked_transaction()?;

        if exists(&tx, &group.symbolic)? {
            return Err(StoreError::DuplicateFilterGroupSymbolic(group.symbolic.clone()));
        }

        tx.execute(
            "INSERT INTO filter_groups (symbolic, display_name, description, input_type, output_type)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                group.symbolic,
                group.display_name_key,
                group.description_key,
                group.input_type.to_string(),
                group.output_type.to_string(),
            ],
        )?;
        let id = FilterGroupId(tx.last_insert_rowid());
        tx.commit()?;

        tracing::info!(group = %group.symbolic, %id, "inserted filter group");
        group.id = Some(id);
        Ok(id)
    }

    /// Update a group's display metadata.
    ///
    /// The symbolic name and the types are fixed at creation; changing them
    /// is rejected.
    pub fn update_object(&self, group: &FilterGroup) -> Result<(), StoreError> {
        let id = group
            .id
            .ok_or_else(|| StoreError::GroupNotPersisted(group.symbolic.clone()))?;

        let tx = self.db.connection().unchecked_transaction()?;
        let stored = load_by_id(&tx, id)?.ok_or_else(|| StoreError::GroupNotFound(id.to_string()))?;

        if stored.symbolic != group.symbolic || !stored.same_contract(group) {
            return Err(StoreError::GroupContractChanged(stored.symbolic));
        }

        tx.execute(
            "UPDATE filter_groups SET display_name = ?1, description = ?2 WHERE filter_group_id = ?3",
            params![group.display_name_key, group.description_key, id.0],
        )?;
        tx.commit()?;

        tracing::debug!(group = %group.symbolic, "updated filter group");
        Ok(())
    }

    pub fn delete_object(&self, group: &FilterGroup) -> Result<bool, StoreError> {
        self.delete_object_by_symbolic(&group.symbolic)
    }

    /// Delete a group that no filter references.
    pub fn delete_object_by_symbolic(&self, symbolic: &str) -> Result<bool, StoreError> {
        let tx = self.db.connection().unchecked_transaction()?;

        let count: i64 = tx.query_row(
            "SELECT COUNT(*) FROM filters f
             JOIN filter_groups g ON g.filter_group_id = f.filter_group_id
             WHERE g.symbolic = ?1",
            params![symbolic],
            |row| row.get(0),
        )?;
        if count > 0 {
            return Err(StoreError::GroupInUse {
                symbolic: symbolic.to_string(),
                count,
            });
        }

        let deleted = tx.execute(
            "DELETE FROM filter_groups WHERE symbolic = ?1",
            params![symbolic],
        )?;
        tx.commit()?;

        if deleted > 0 {
            tracing::info!(group = %symbolic, "deleted filter group");
        }
        Ok(deleted > 0)
    }

    pub fn get_object_by_id(&self, id: FilterGroupId) -> Result<Option<FilterGroup>, StoreError> {
        load_by_id(self.db.connection(), id)
    }

    pub fn get_object_by_symbolic(&self, symbolic: &str) -> Result<Option<FilterGroup>, StoreError> {
        let sql = format!("SELECT {COLUMNS} FROM filter_groups WHERE symbolic = ?1");
        let row = self
            .db
            .connection()
            .query_row(&sql, params![symbolic], read_row)
            .optional()?;
        row.map(GroupRow::into_group).transpose()
    }

    /// All groups, ordered by symbolic name.
    pub fn get_objects(&self) -> Result<Vec<FilterGroup>, StoreError> {
        let sql = format!("SELECT {COLUMNS} FROM filter_groups ORDER BY symbolic");
        let mut stmt = self.db.connection().prepare(&sql)?;
        let rows = stmt.query_map([], read_row)?;

        let mut groups = Vec::new();
        for row in rows {
            groups.push(row?.into_group()?);
        }
        Ok(groups)
    }
}

pub(crate) fn load_by_id(
    conn: &Connection,
    id: FilterGroupId,
) -> Result<Option<FilterGroup>, StoreError> {
    let sql = format!("SELECT {COLUMNS} FROM filter_groups WHERE filter_group_id = ?1");
    let row = conn.query_row(&sql, params![id.0], read_row).optional()?;
    row.map(GroupRow::into_group).transpose()
}

fn exists(conn: &Connection, symbolic: &str) -> rusqlite::Result<bool> {
    conn.query_row(
        "SELECT 1 FROM filter_groups WHERE symbolic = ?1",
        params![symbolic],
        |_| Ok(()),
    )
    .optional()
    .map(|found| found.is_some())
}

/// A group row before its type descriptors are parsed.
struct GroupRow {
    id: i64,
    symbolic: String,
    display_name: String,
    description: String,
    input_type: String,
    output_type: String,
}

fn read_row(row: &Row<'_>) -> rusqlite::Result<GroupRow> {
    Ok(GroupRow {
        id: row.get(0)?,
        symbolic: row.get(1)?,
        display_name: row.get(2)?,
        description: row.get(3)?,
        input_type: row.get(4)?,
        output_type: row.get(5)?,
    })
}

impl GroupRow {
    fn into_group(self) -> Result<FilterGroup, StoreError> {
        let parse = |descriptor: &str| {
            descriptor.parse::<TypeDescription>().map_err(|_| {
                IntegrityViolation::CorruptTypeDescriptor {
                    group: self.symbolic.clone(),
                    descriptor: descriptor.to_string(),
                }
            })
        };
        let input_type = parse(&self.input_type)?;
        let output_type = parse(&self.output_type)?;

        let mut group = FilterGroup::new(self.symbolic.clone(), input_type, output_type)
            .display_name(self.display_name)
            .description(self.description);
        group.id = Some(FilterGroupId(self.id));
        Ok(group)
    }
}
