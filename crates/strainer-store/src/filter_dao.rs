//! Filter tree persistence.
//!
//! Every write covers a whole tree and runs in one transaction. Ids are
//! copied onto the in-memory filters only after the transaction commits,
//! so a failed write leaves the caller's tree exactly as it was.

use crate::database::Database;
use crate::error::{IntegrityViolation, StoreError};
use crate::group_dao;
use crate::tree::FilterTree;
use rusqlite::{Connection, OptionalExtension, params};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use strainer_core::{
    ContextId, FilterDecl, FilterGroup, FilterGroupId, FilterId, PersistableFilter, RegistryError,
    SettingValue, Settings, TypeDescription, Value,
};

/// Options for the root filter queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Lookup {
    /// Include filters flagged as templates.
    pub templates: bool,
    /// Skip filters (or descendants) whose runtime requirements the
    /// database's host does not meet.
    pub check_runtime: bool,
}

impl Default for Lookup {
    fn default() -> Self {
        Self {
            templates: false,
            check_runtime: true,
        }
    }
}

impl Lookup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn templates(mut self, include: bool) -> Self {
        self.templates = include;
        self
    }

    pub fn check_runtime(mut self, check: bool) -> Self {
        self.check_runtime = check;
        self
    }

    /// Every stored filter, regardless of flags and host.
    pub fn all() -> Self {
        Self {
            templates: true,
            check_runtime: false,
        }
    }
}

/// Ids written for one node and its children, in child order.
struct Assigned {
    id: FilterId,
    children: Vec<Assigned>,
}

type GroupCache = HashMap<FilterGroupId, Arc<FilterGroup>>;

/// Reads and writes [`PersistableFilter`] trees.
pub struct FilterDao<'a> {
    db: &'a Database,
}

impl<'a> FilterDao<'a> {
    pub(crate) fn new(db: &'a Database) -> Self {
        Self { db }
    }

    // ------------------------------------------------------------------
    // Writes
    // ------------------------------------------------------------------

    /// Insert a new filter tree into `context_id`, returning the root id.
    ///
    /// A root with a parent id is attached under that stored filter, which
    /// must exist and be a composite.
    pub fn insert_object(
        &self,
        filter: &mut PersistableFilter,
        context_id: ContextId,
    ) -> Result<FilterId, StoreError> {
        let mut persisted = None;
        filter.walk(&mut |node| {
            if persisted.is_none() {
                persisted = node.id();
            }
        });
        if let Some(id) = persisted {
            return Err(StoreError::AlreadyPersisted(id));
        }
        filter.validate()?;

        let parent = filter.parent_id();
        let tx = self.db.connection().unchecked_transaction()?;
        if let Some(p) = parent {
            self.check_parent(&tx, p, None)?;
        }
        let assigned = write_node(&tx, filter, parent, context_id)?;
        tx.commit()?;

        apply_ids(filter, &assigned, parent, context_id);
        tracing::info!(filter = %assigned.id, class = filter.class(), "inserted filter");
        Ok(assigned.id)
    }

    /// Write a stored tree back, reconciling its children.
    ///
    /// Stored children missing from `filter` are deleted with their
    /// descendants; children with ids are updated in place, possibly under
    /// a new parent within the same tree; children without ids are inserted.
    pub fn update_object(&self, filter: &mut PersistableFilter) -> Result<(), StoreError> {
        let root = filter
            .id()
            .ok_or_else(|| StoreError::NotPersisted(filter.display_name.clone()))?;
        filter.validate()?;

        let tx = self.db.connection().unchecked_transaction()?;
        let old = FilterTree::load(&tx, root)?.ok_or(StoreError::FilterNotFound(root))?;

        let parent = filter.parent_id();
        let lineage = match parent {
            Some(p) => {
                if p == root || old.contains(p) {
                    return Err(IntegrityViolation::Cycle { filter: root }.into());
                }
                self.check_parent(&tx, p, Some(root))?;
                let mut lineage = vec![p];
                lineage.extend(ancestors(&tx, p)?);
                if lineage.contains(&root) {
                    return Err(IntegrityViolation::Cycle { filter: root }.into());
                }
                lineage
            }
            None => Vec::new(),
        };

        let mut seen = HashSet::new();
        let mut violation = None;
        filter.walk(&mut |node| {
            if let Some(id) = node.id()
                && violation.is_none()
            {
                if !seen.insert(id) {
                    violation = Some(IntegrityViolation::DuplicateNode { filter: id });
                } else if lineage.contains(&id) {
                    violation = Some(IntegrityViolation::Cycle { filter: id });
                } else if !old.contains(id) {
                    violation = Some(IntegrityViolation::ForeignNode { filter: id });
                }
            }
        });
        if let Some(violation) = violation {
            return Err(violation.into());
        }

        let context_id = filter.context_id();
        let assigned = write_node(&tx, filter, parent, context_id)?;

        let mut removed = 0;
        for i in old.post_order() {
            let id = old.node(i).id;
            if !seen.contains(&id) {
                delete_row(&tx, id)?;
                removed += 1;
            }
        }
        tx.commit()?;

        apply_ids(filter, &assigned, parent, context_id);
        tracing::info!(filter = %root, removed, "updated filter");
        Ok(())
    }

    /// Delete a stored tree and forget its ids.
    pub fn delete_object(&self, filter: &mut PersistableFilter) -> Result<bool, StoreError> {
        let id = filter
            .id()
            .ok_or_else(|| StoreError::NotPersisted(filter.display_name.clone()))?;
        let deleted = self.delete_object_by_id(id)?;
        forget_ids(filter);
        filter.meta_mut().parent_id = None;
        Ok(deleted)
    }

    /// Delete a filter and all of its descendants.
    pub fn delete_object_by_id(&self, id: FilterId) -> Result<bool, StoreError> {
        let tx = self.db.connection().unchecked_transaction()?;
        let Some(tree) = FilterTree::load(&tx, id)? else {
            return Ok(false);
        };

        for i in tree.post_order() {
            delete_row(&tx, tree.node(i).id)?;
        }
        tx.commit()?;

        tracing::info!(filter = %id, count = tree.len(), "deleted filter");
        Ok(true)
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    /// Load a filter with its full subtree.
    pub fn get_object_by_id(&self, id: FilterId) -> Result<Option<PersistableFilter>, StoreError> {
        self.load(id)
    }

    /// Reload a stored filter.
    pub fn get_object(
        &self,
        filter: &PersistableFilter,
    ) -> Result<Option<PersistableFilter>, StoreError> {
        let id = filter
            .id()
            .ok_or_else(|| StoreError::NotPersisted(filter.display_name.clone()))?;
        self.load(id)
    }

    /// Top-level filters in a group.
    pub fn get_objects_by_group(
        &self,
        symbolic: &str,
        context_id: ContextId,
    ) -> Result<Vec<PersistableFilter>, StoreError> {
        self.get_objects_by_group_with(symbolic, context_id, Lookup::default())
    }

    pub fn get_objects_by_group_with(
        &self,
        symbolic: &str,
        context_id: ContextId,
        lookup: Lookup,
    ) -> Result<Vec<PersistableFilter>, StoreError> {
        self.find_roots(Some(symbolic), None, context_id, lookup)
    }

    /// Top-level filters of a class.
    pub fn get_objects_by_class(
        &self,
        class: &str,
        context_id: ContextId,
    ) -> Result<Vec<PersistableFilter>, StoreError> {
        self.get_objects_by_class_with(class, context_id, Lookup::default())
    }

    pub fn get_objects_by_class_with(
        &self,
        class: &str,
        context_id: ContextId,
        lookup: Lookup,
    ) -> Result<Vec<PersistableFilter>, StoreError> {
        self.find_roots(None, Some(class), context_id, lookup)
    }

    /// Top-level filters of a class within a group.
    pub fn get_objects_by_group_and_class(
        &self,
        symbolic: &str,
        class: &str,
        context_id: ContextId,
    ) -> Result<Vec<PersistableFilter>, StoreError> {
        self.get_objects_by_group_and_class_with(symbolic, class, context_id, Lookup::default())
    }

    pub fn get_objects_by_group_and_class_with(
        &self,
        symbolic: &str,
        class: &str,
        context_id: ContextId,
        lookup: Lookup,
    ) -> Result<Vec<PersistableFilter>, StoreError> {
        self.find_roots(Some(symbolic), Some(class), context_id, lookup)
    }

    /// All top-level filters in a context.
    pub fn get_objects(
        &self,
        context_id: ContextId,
        lookup: Lookup,
    ) -> Result<Vec<PersistableFilter>, StoreError> {
        self.find_roots(None, None, context_id, lookup)
    }

    /// Top-level filters whose group declares exactly these types.
    pub fn get_objects_by_type_description(
        &self,
        input_type: &TypeDescription,
        output_type: &TypeDescription,
        context_id: ContextId,
    ) -> Result<Vec<PersistableFilter>, StoreError> {
        let symbolics = {
            let mut stmt = self.db.connection().prepare_cached(
                "SELECT symbolic FROM filter_groups
                 WHERE input_type = ?1 AND output_type = ?2
                 ORDER BY symbolic",
            )?;
            stmt.query_map(
                params![input_type.to_string(), output_type.to_string()],
                |row| row.get::<_, String>(0),
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?
        };

        let mut filters = Vec::new();
        for symbolic in symbolics {
            filters.extend(self.get_objects_by_group(&symbolic, context_id)?);
        }
        Ok(filters)
    }

    /// Top-level, non-template filters that accept `sample_in`, can produce
    /// something shaped like `sample_out`, and can run on this host.
    pub fn get_compatible_objects(
        &self,
        sample_in: &Value,
        sample_out: &Value,
        context_id: ContextId,
    ) -> Result<Vec<PersistableFilter>, StoreError> {
        let groups = self.db.filter_groups().get_objects()?;

        let mut filters = Vec::new();
        for group in groups.iter().filter(|g| {
            g.input_type.is_compatible(sample_in) && g.output_type.is_compatible(sample_out)
        }) {
            filters.extend(self.get_objects_by_group(&group.symbolic, context_id)?);
        }
        Ok(filters)
    }

    /// Scan the whole table for rows that break the tree invariants.
    pub fn check_integrity(&self) -> Result<Vec<IntegrityViolation>, StoreError> {
        let conn = self.db.connection();
        let mut violations = Vec::new();

        let mut stmt = conn.prepare(
            "SELECT f.filter_id, f.parent_filter_id FROM filters f
             LEFT JOIN filters p ON p.filter_id = f.parent_filter_id
             WHERE f.parent_filter_id IS NOT NULL AND p.filter_id IS NULL
             ORDER BY f.filter_id",
        )?;
        let orphans = stmt.query_map([], |row| {
            Ok(IntegrityViolation::OrphanedChild {
                filter: FilterId(row.get(0)?),
                parent: FilterId(row.get(1)?),
            })
        })?;
        for orphan in orphans {
            violations.push(orphan?);
        }

        // Rows unreachable from any root or orphan can only sit on a cycle.
        let mut stmt = conn.prepare(
            "WITH RECURSIVE reach(filter_id) AS (
                 SELECT f.filter_id FROM filters f
                 LEFT JOIN filters p ON p.filter_id = f.parent_filter_id
                 WHERE p.filter_id IS NULL
                 UNION
                 SELECT f.filter_id FROM filters f
                 JOIN reach r ON f.parent_filter_id = r.filter_id
             )
             SELECT filter_id FROM filters
             WHERE filter_id NOT IN (SELECT filter_id FROM reach)
             ORDER BY filter_id",
        )?;
        let cycles = stmt.query_map([], |row| {
            Ok(IntegrityViolation::Cycle {
                filter: FilterId(row.get(0)?),
            })
        })?;
        for cycle in cycles {
            violations.push(cycle?);
        }

        Ok(violations)
    }

    /// Check that `parent` is stored and of a composite class.
    fn check_parent(
        &self,
        conn: &Connection,
        parent: FilterId,
        child: Option<FilterId>,
    ) -> Result<(), StoreError> {
        let class = conn
            .query_row(
                "SELECT class_name FROM filters WHERE filter_id = ?1",
                params![parent.0],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        let Some(class) = class else {
            let violation = match child {
                Some(filter) => IntegrityViolation::OrphanedChild { filter, parent },
                None => IntegrityViolation::MissingParent { parent },
            };
            return Err(violation.into());
        };

        let composite = self
            .db
            .registry()
            .get_decl(&class)
            .is_some_and(|decl| decl.composite_mode().is_some());
        if !composite {
            return Err(IntegrityViolation::ChildOfLeaf {
                filter: parent,
                class,
            }
            .into());
        }
        Ok(())
    }

    fn find_roots(
        &self,
        group: Option<&str>,
        class: Option<&str>,
        context_id: ContextId,
        lookup: Lookup,
    ) -> Result<Vec<PersistableFilter>, StoreError> {
        let ids = {
            let mut stmt = self.db.connection().prepare_cached(
                "SELECT f.filter_id FROM filters f
                 JOIN filter_groups g ON g.filter_group_id = f.filter_group_id
                 WHERE f.parent_filter_id IS NULL
                   AND f.context_id = ?1
                   AND (?2 IS NULL OR g.symbolic = ?2)
                   AND (?3 IS NULL OR f.class_name = ?3)
                   AND (?4 OR f.is_template = 0)
                 ORDER BY f.filter_id",
            )?;
            stmt.query_map(
                params![context_id.0, group, class, lookup.templates],
                |row| row.get::<_, i64>(0),
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?
        };

        let mut filters = Vec::with_capacity(ids.len());
        for id in ids.into_iter().map(FilterId) {
            let filter = match self.load(id) {
                Ok(Some(filter)) => filter,
                Ok(None) => continue,
                Err(StoreError::Registry(RegistryError::UnknownClass(class))) => {
                    tracing::warn!(filter = %id, %class, "skipping filter of unregistered class");
                    continue;
                }
                Err(err) => return Err(err),
            };

            if lookup.check_runtime && !filter.is_runtime_supported(self.db.host()) {
                tracing::debug!(filter = %id, "skipping filter unsupported on this host");
                continue;
            }
            filters.push(filter);
        }
        Ok(filters)
    }

    fn load(&self, id: FilterId) -> Result<Option<PersistableFilter>, StoreError> {
        let conn = self.db.connection();
        let Some(tree) = FilterTree::load(conn, id)? else {
            return Ok(None);
        };

        if let Some(parent) = tree.root().parent_id
            && parent_of(conn, parent)?.is_none()
        {
            return Err(IntegrityViolation::OrphanedChild { filter: id, parent }.into());
        }

        let mut groups = GroupCache::new();
        self.hydrate(conn, &tree, 0, &mut groups).map(Some)
    }

    fn hydrate(
        &self,
        conn: &Connection,
        tree: &FilterTree,
        i: usize,
        groups: &mut GroupCache,
    ) -> Result<PersistableFilter, StoreError> {
        let row = tree.node(i);
        let group = cached_group(conn, groups, row.group_id)?;

        let mut filter = self
            .db
            .registry()
            .create_in_group(&row.class_name, group, row.context_id)?;
        filter.display_name = row.display_name.clone();
        filter.sequence = row.seq;
        {
            let meta = filter.meta_mut();
            meta.id = Some(row.id);
            meta.parent_id = row.parent_id;
            meta.is_template = row.is_template;
        }

        let settings = load_settings(conn, row.id, filter.decl())?;
        filter.set_settings(settings)?;

        let children = tree.children(i);
        if !children.is_empty() && !filter.is_composite() {
            return Err(IntegrityViolation::ChildOfLeaf {
                filter: row.id,
                class: row.class_name.clone(),
            }
            .into());
        }
        for &child in children {
            let child = self.hydrate(conn, tree, child, groups)?;
            filter.add_filter(child)?;
        }

        Ok(filter)
    }
}

// ============================================================================
// Row helpers
// ============================================================================

/// Insert or update one node and its subtree.
fn write_node(
    conn: &Connection,
    node: &PersistableFilter,
    parent: Option<FilterId>,
    context_id: ContextId,
) -> Result<Assigned, StoreError> {
    let group_id = node
        .group()
        .id
        .ok_or_else(|| StoreError::GroupNotPersisted(node.group().symbolic.clone()))?;

    let id = match node.id() {
        Some(id) => {
            conn.execute(
                "UPDATE filters SET filter_group_id = ?1, context_id = ?2, display_name = ?3,
                     class_name = ?4, is_template = ?5, parent_filter_id = ?6, seq = ?7
                 WHERE filter_id = ?8",
                params![
                    group_id.0,
                    context_id.0,
                    node.display_name,
                    node.class(),
                    node.is_template(),
                    parent.map(|p| p.0),
                    node.sequence,
                    id.0,
                ],
            )?;
            conn.execute(
                "DELETE FROM filter_settings WHERE filter_id = ?1",
                params![id.0],
            )?;
            tracing::debug!(filter = %id, "updated filter row");
            id
        }
        None => {
            conn.execute(
                "INSERT INTO filters (filter_group_id, context_id, display_name, class_name,
                     is_template, parent_filter_id, seq)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    group_id.0,
                    context_id.0,
                    node.display_name,
                    node.class(),
                    node.is_template(),
                    parent.map(|p| p.0),
                    node.sequence,
                ],
            )?;
            let id = FilterId(conn.last_insert_rowid());
            tracing::debug!(filter = %id, class = node.class(), "inserted filter row");
            id
        }
    };

    write_settings(conn, id, node.settings())?;

    let children = node
        .filters()
        .iter()
        .map(|child| write_node(conn, child, Some(id), context_id))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Assigned { id, children })
}

fn write_settings(conn: &Connection, id: FilterId, settings: &Settings) -> Result<(), StoreError> {
    let mut stmt = conn.prepare_cached(
        "INSERT INTO filter_settings (filter_id, setting_name, locale, setting_value)
         VALUES (?1, ?2, ?3, ?4)",
    )?;

    for (name, value) in settings.iter() {
        match value {
            SettingValue::Scalar(value) => {
                let json = serde_json::to_string(value)?;
                stmt.execute(params![id.0, name, Option::<&str>::None, json])?;
            }
            SettingValue::Localized(texts) => {
                for (locale, text) in texts {
                    stmt.execute(params![id.0, name, locale, text])?;
                }
            }
        }
    }
    Ok(())
}

/// Read a filter's settings, keeping only what `decl` declares.
fn load_settings(
    conn: &Connection,
    id: FilterId,
    decl: &FilterDecl,
) -> Result<Settings, StoreError> {
    let mut stmt = conn.prepare_cached(
        "SELECT setting_name, locale, setting_value FROM filter_settings
         WHERE filter_id = ?1 ORDER BY rowid",
    )?;
    let rows = stmt.query_map(params![id.0], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, Option<String>>(1)?,
            row.get::<_, String>(2)?,
        ))
    })?;

    let corrupt = |setting: &str, reason: String| IntegrityViolation::CorruptSetting {
        filter: id,
        setting: setting.to_string(),
        reason,
    };

    let mut values: Vec<(String, SettingValue)> = Vec::new();
    for row in rows {
        let (name, locale, text) = row?;
        if decl.setting_decl(&name).is_none() {
            tracing::debug!(filter = %id, setting = %name, "ignoring undeclared setting");
            continue;
        }

        let pos = values.iter().position(|(n, _)| *n == name);
        match (locale, pos) {
            (Some(locale), Some(pos)) => match &mut values[pos].1 {
                SettingValue::Localized(texts) => {
                    texts.insert(locale, text);
                }
                SettingValue::Scalar(_) => {
                    return Err(corrupt(&name, "mixes scalar and localized rows".into()).into());
                }
            },
            (Some(locale), None) => {
                let texts = [(locale, text)].into_iter().collect();
                values.push((name, SettingValue::Localized(texts)));
            }
            (None, None) => {
                let value: Value =
                    serde_json::from_str(&text).map_err(|e| corrupt(&name, e.to_string()))?;
                values.push((name, SettingValue::Scalar(value)));
            }
            (None, Some(_)) => {
                return Err(corrupt(&name, "mixes scalar and localized rows".into()).into());
            }
        }
    }

    let settings = values
        .into_iter()
        .filter_map(|(name, value)| {
            let declared = decl.setting_decl(&name)?;
            match value.conform(declared) {
                Ok(value) => Some((name, value)),
                Err(err) => {
                    tracing::warn!(filter = %id, setting = %name, %err, "ignoring mis-shaped setting");
                    None
                }
            }
        })
        .collect();
    Ok(settings)
}

fn delete_row(conn: &Connection, id: FilterId) -> Result<(), StoreError> {
    conn.execute(
        "DELETE FROM filter_settings WHERE filter_id = ?1",
        params![id.0],
    )?;
    conn.execute("DELETE FROM filters WHERE filter_id = ?1", params![id.0])?;
    tracing::debug!(filter = %id, "deleted filter row");
    Ok(())
}

/// The stored parent of `id`: `None` if the row is missing.
fn parent_of(conn: &Connection, id: FilterId) -> Result<Option<Option<FilterId>>, StoreError> {
    let parent = conn
        .query_row(
            "SELECT parent_filter_id FROM filters WHERE filter_id = ?1",
            params![id.0],
            |row| row.get::<_, Option<i64>>(0),
        )
        .optional()?;
    Ok(parent.map(|p| p.map(FilterId)))
}

/// Stored ancestors of `id`, nearest first.
fn ancestors(conn: &Connection, id: FilterId) -> Result<Vec<FilterId>, StoreError> {
    let mut lineage = Vec::new();
    let mut current = id;
    loop {
        let parent = match parent_of(conn, current)? {
            None if current == id => return Err(StoreError::FilterNotFound(id)),
            None => {
                let child = lineage.len().checked_sub(2).map_or(id, |i| lineage[i]);
                return Err(IntegrityViolation::OrphanedChild {
                    filter: child,
                    parent: current,
                }
                .into());
            }
            Some(None) => return Ok(lineage),
            Some(Some(parent)) => parent,
        };
        if parent == id || lineage.contains(&parent) {
            return Err(IntegrityViolation::Cycle { filter: parent }.into());
        }
        lineage.push(parent);
        current = parent;
    }
}

fn cached_group(
    conn: &Connection,
    cache: &mut GroupCache,
    id: FilterGroupId,
) -> Result<Arc<FilterGroup>, StoreError> {
    if let Some(group) = cache.get(&id) {
        return Ok(group.clone());
    }
    let group = group_dao::load_by_id(conn, id)?
        .map(Arc::new)
        .ok_or_else(|| StoreError::GroupNotFound(id.to_string()))?;
    cache.insert(id, group.clone());
    Ok(group)
}

fn apply_ids(
    filter: &mut PersistableFilter,
    assigned: &Assigned,
    parent: Option<FilterId>,
    context_id: ContextId,
) {
    {
        let meta = filter.meta_mut();
        meta.id = Some(assigned.id);
        meta.parent_id = parent;
        meta.context_id = context_id;
    }
    for (child, ids) in filter.filters_mut().iter_mut().zip(&assigned.children) {
        apply_ids(child, ids, Some(assigned.id), context_id);
    }
}

fn forget_ids(filter: &mut PersistableFilter) {
    filter.meta_mut().id = None;
    for child in filter.filters_mut() {
        forget_ids(child);
        child.meta_mut().parent_id = None;
    }
}
