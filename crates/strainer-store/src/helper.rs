//! Installing groups and filters from documents.

use crate::database::Database;
use crate::error::StoreError;
use crate::filter_dao::Lookup;
use std::collections::HashMap;
use std::sync::Arc;
use strainer_core::{
    ContextId, DocumentError, Filter, FilterDecl, FilterDocument, FilterGroup, FilterId, FilterSpec,
    GroupSpec, Settings,
};

/// What [`FilterHelper::install_document`] did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstallReport {
    /// Groups inserted by this install.
    pub groups_created: Vec<String>,
    /// Groups that already existed with the same types.
    pub groups_kept: Vec<String>,
    /// Root ids of newly inserted filters.
    pub filters_created: Vec<FilterId>,
    /// Filters skipped because an equivalent one was already stored.
    pub filters_skipped: usize,
}

/// Higher-level operations over both DAOs.
pub struct FilterHelper<'a> {
    db: &'a Database,
}

impl<'a> FilterHelper<'a> {
    pub(crate) fn new(db: &'a Database) -> Self {
        Self { db }
    }

    /// True if `live` has these settings and, recursively, children of the
    /// same classes with the same settings in the same order.
    ///
    /// Candidate settings are read through the live filter's declarations,
    /// so document-shaped values compare equal to stored ones.
    pub fn compare_filters<M>(live: &Filter<M>, settings: &Settings, children: &[FilterSpec]) -> bool {
        let live_children = live.filters();

        settings_match(live.decl(), live.settings(), settings)
            && live_children.len() == children.len()
            && live_children.iter().zip(children).all(|(live, candidate)| {
                live.class() == candidate.class
                    && Self::compare_filters(live, &candidate.settings, &candidate.children)
            })
    }

    /// Insert the groups that do not exist yet, returning them.
    ///
    /// An existing group with the same symbolic name is kept if its types
    /// match, and is an error otherwise.
    pub fn install_filter_groups(&self, groups: &[GroupSpec]) -> Result<Vec<FilterGroup>, StoreError> {
        let dao = self.db.filter_groups();
        let mut created = Vec::new();

        for spec in groups {
            let mut wanted = spec.to_group();
            match dao.get_object_by_symbolic(&spec.symbolic)? {
                Some(existing) if existing.same_contract(&wanted) => {
                    tracing::debug!(group = %spec.symbolic, "filter group already installed");
                }
                Some(_) => return Err(StoreError::GroupContractChanged(spec.symbolic.clone())),
                None => {
                    dao.insert_object(&mut wanted)?;
                    created.push(wanted);
                }
            }
        }

        Ok(created)
    }

    /// Build and insert a filter tree unless an equivalent one exists.
    ///
    /// Equivalent means same group and class in the same context, and
    /// [`FilterHelper::compare_filters`] holds. Returns the new root id.
    pub fn configure_filter(
        &self,
        spec: &FilterSpec,
        context_id: ContextId,
    ) -> Result<Option<FilterId>, StoreError> {
        let symbolic = spec
            .group
            .as_deref()
            .ok_or_else(|| DocumentError::MissingGroup(spec.class.clone()))?;

        let groups = self.resolve_groups(spec)?;
        let mut filter = spec.instantiate(self.db.registry(), context_id, &|s: &str| {
            groups.get(s).cloned()
        })?;

        let filters = self.db.filters();
        let existing = filters.get_objects_by_group_and_class_with(
            symbolic,
            &spec.class,
            context_id,
            Lookup::all(),
        )?;
        if let Some(found) = existing
            .iter()
            .find(|live| Self::compare_filters(*live, filter.settings(), &spec.children))
        {
            tracing::info!(
                group = %symbolic,
                class = %spec.class,
                existing = ?found.id(),
                "equivalent filter already configured"
            );
            return Ok(None);
        }

        let id = filters.insert_object(&mut filter, context_id)?;
        Ok(Some(id))
    }

    /// Install a document's groups, then its filters.
    pub fn install_document(
        &self,
        document: &FilterDocument,
        context_id: ContextId,
    ) -> Result<InstallReport, StoreError> {
        let mut report = InstallReport::default();

        let created = self.install_filter_groups(&document.groups)?;
        for spec in &document.groups {
            if created.iter().any(|g| g.symbolic == spec.symbolic) {
                report.groups_created.push(spec.symbolic.clone());
            } else {
                report.groups_kept.push(spec.symbolic.clone());
            }
        }

        for spec in &document.filters {
            match self.configure_filter(spec, context_id)? {
                Some(id) => report.filters_created.push(id),
                None => report.filters_skipped += 1,
            }
        }

        tracing::info!(
            groups = report.groups_created.len(),
            filters = report.filters_created.len(),
            skipped = report.filters_skipped,
            "installed filter document"
        );
        Ok(report)
    }

    /// Load every group a spec tree names.
    fn resolve_groups(
        &self,
        spec: &FilterSpec,
    ) -> Result<HashMap<String, Arc<FilterGroup>>, StoreError> {
        let dao = self.db.filter_groups();
        let mut groups = HashMap::new();
        let mut pending = vec![spec];

        while let Some(spec) = pending.pop() {
            if let Some(symbolic) = &spec.group
                && !groups.contains_key(symbolic)
                && let Some(group) = dao.get_object_by_symbolic(symbolic)?
            {
                groups.insert(symbolic.clone(), Arc::new(group));
            }
            pending.extend(&spec.children);
        }

        Ok(groups)
    }
}

/// Empty localized candidates count as absent, matching how they are stored.
fn settings_match(decl: &FilterDecl, live: &Settings, candidate: &Settings) -> bool {
    let mut matched = 0;
    for (name, value) in candidate.iter() {
        let Some(setting) = decl.setting_decl(name) else {
            return false;
        };
        let Ok(value) = value.clone().conform(setting) else {
            return false;
        };
        if value.is_empty() {
            continue;
        }
        if live.get(name) != Some(&value) {
            return false;
        }
        matched += 1;
    }
    matched == live.len()
}
