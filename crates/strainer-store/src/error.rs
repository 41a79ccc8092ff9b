//! Store errors.

use strainer_core::{DocumentError, FilterError, FilterId, RegistryError};

/// A stored tree that breaks the filter tree invariants, or an update that
/// would.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IntegrityViolation {
    #[error("filter {filter} points at missing parent {parent}")]
    OrphanedChild { filter: FilterId, parent: FilterId },

    #[error("parent filter {parent} does not exist")]
    MissingParent { parent: FilterId },

    #[error("filter {filter} is its own ancestor")]
    Cycle { filter: FilterId },

    #[error("filter {filter} appears more than once in the tree")]
    DuplicateNode { filter: FilterId },

    #[error("filter {filter} belongs to a different tree")]
    ForeignNode { filter: FilterId },

    #[error("filter {filter} of leaf class '{class}' has children")]
    ChildOfLeaf { filter: FilterId, class: String },

    #[error("setting '{setting}' of filter {filter} is unreadable: {reason}")]
    CorruptSetting {
        filter: FilterId,
        setting: String,
        reason: String,
    },

    #[error("filter group '{group}' has an invalid type descriptor '{descriptor}'")]
    CorruptTypeDescriptor { group: String, descriptor: String },
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),

    #[error("failed to encode setting: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Filter(#[from] FilterError),

    #[error(transparent)]
    Document(#[from] DocumentError),

    #[error("filter group '{0}' already exists")]
    DuplicateFilterGroupSymbolic(String),

    #[error("filter group '{0}' not found")]
    GroupNotFound(String),

    #[error("filter group '{symbolic}' is still used by {count} filter(s)")]
    GroupInUse { symbolic: String, count: i64 },

    #[error("filter group '{0}' may only change its display metadata")]
    GroupContractChanged(String),

    #[error("filter group '{0}' has not been inserted")]
    GroupNotPersisted(String),

    #[error("filter {0} not found")]
    FilterNotFound(FilterId),

    #[error("filter {0} is already persisted")]
    AlreadyPersisted(FilterId),

    #[error("filter '{0}' has not been inserted")]
    NotPersisted(String),

    #[error("persistence integrity error: {0}")]
    Integrity(#[from] IntegrityViolation),
}
