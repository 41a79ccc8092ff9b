//! Arena of stored filter rows forming one subtree.

use crate::error::IntegrityViolation;
use rusqlite::{Connection, Row, params};
use std::collections::HashMap;
use strainer_core::{ContextId, FilterGroupId, FilterId};

/// One row of the `filters` table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct FilterRow {
    pub id: FilterId,
    pub group_id: FilterGroupId,
    pub context_id: ContextId,
    pub display_name: String,
    pub class_name: String,
    pub is_template: bool,
    pub parent_id: Option<FilterId>,
    pub seq: u32,
}

const FILTER_COLUMNS: &str = "f.filter_id, f.filter_group_id, f.context_id, \
     f.display_name, f.class_name, f.is_template, f.parent_filter_id, f.seq";

fn read_row(row: &Row<'_>) -> rusqlite::Result<FilterRow> {
    Ok(FilterRow {
        id: FilterId(row.get(0)?),
        group_id: FilterGroupId(row.get(1)?),
        context_id: ContextId(row.get(2)?),
        display_name: row.get(3)?,
        class_name: row.get(4)?,
        is_template: row.get(5)?,
        parent_id: row.get::<_, Option<i64>>(6)?.map(FilterId),
        seq: row.get(7)?,
    })
}

/// Rows of a subtree, indexed by position, with ordered child lists.
///
/// Index 0 is always the root. Children are ordered by sequence, then id.
#[derive(Debug)]
pub(crate) struct FilterTree {
    nodes: Vec<FilterRow>,
    children: Vec<Vec<usize>>,
}

impl FilterTree {
    /// Load the subtree rooted at `root`, or `None` if no such filter.
    pub fn load(conn: &Connection, root: FilterId) -> Result<Option<Self>, crate::StoreError> {
        let sql = format!(
            "WITH RECURSIVE subtree(filter_id) AS (
                 SELECT filter_id FROM filters WHERE filter_id = ?1
                 UNION
                 SELECT f.filter_id FROM filters f
                 JOIN subtree s ON f.parent_filter_id = s.filter_id
             )
             SELECT {FILTER_COLUMNS} FROM filters f
             JOIN subtree s ON s.filter_id = f.filter_id"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params![root.0], read_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        if rows.is_empty() {
            return Ok(None);
        }
        Ok(Some(Self::build(root, rows)?))
    }

    /// Arrange rows into a tree, rejecting anything that is not one.
    pub fn build(root: FilterId, rows: Vec<FilterRow>) -> Result<Self, IntegrityViolation> {
        let mut nodes = Vec::with_capacity(rows.len());
        let mut rest = Vec::with_capacity(rows.len());
        for row in rows {
            if row.id == root && nodes.is_empty() {
                nodes.push(row);
            } else {
                rest.push(row);
            }
        }
        nodes.extend(rest);

        if nodes.first().map(|row| row.id) != Some(root) {
            return Err(IntegrityViolation::ForeignNode { filter: root });
        }

        let mut index = HashMap::with_capacity(nodes.len());
        for (i, row) in nodes.iter().enumerate() {
            if index.insert(row.id, i).is_some() {
                return Err(IntegrityViolation::DuplicateNode { filter: row.id });
            }
        }

        if let Some(parent) = nodes.first().and_then(|r| r.parent_id)
            && index.contains_key(&parent)
        {
            return Err(IntegrityViolation::Cycle { filter: root });
        }

        let mut children = vec![Vec::new(); nodes.len()];
        for (i, row) in nodes.iter().enumerate().skip(1) {
            let parent = row.parent_id.and_then(|p| index.get(&p).copied());
            match parent {
                Some(p) => children[p].push(i),
                None => {
                    return Err(IntegrityViolation::OrphanedChild {
                        filter: row.id,
                        parent: row.parent_id.unwrap_or(root),
                    });
                }
            }
        }
        for list in &mut children {
            list.sort_by_key(|&i| (nodes[i].seq, nodes[i].id));
        }

        let tree = Self { nodes, children };
        let order = tree.post_order();
        if order.len() != tree.nodes.len() {
            let mut reached = vec![false; tree.nodes.len()];
            for i in order {
                reached[i] = true;
            }
            let filter = tree
                .nodes
                .iter()
                .zip(&reached)
                .find(|(_, reached)| !**reached)
                .map_or(root, |(row, _)| row.id);
            return Err(IntegrityViolation::Cycle { filter });
        }
        Ok(tree)
    }

    pub fn root(&self) -> &FilterRow {
        &self.nodes[0]
    }

    pub fn node(&self, i: usize) -> &FilterRow {
        &self.nodes[i]
    }

    pub fn children(&self, i: usize) -> &[usize] {
        &self.children[i]
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn contains(&self, id: FilterId) -> bool {
        self.nodes.iter().any(|row| row.id == id)
    }

    /// Node indices, children before their parents.
    pub fn post_order(&self) -> Vec<usize> {
        let mut order = Vec::with_capacity(self.nodes.len());
        let mut stack = vec![(0usize, false)];
        while let Some((i, expanded)) = stack.pop() {
            if expanded {
                order.push(i);
                continue;
            }
            stack.push((i, true));
            for &child in self.children[i].iter().rev() {
                stack.push((child, false));
            }
        }
        order
    }
}
