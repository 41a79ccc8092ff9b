//! Filter groups: named transformation contracts.

use crate::types::TypeDescription;
use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! id_type {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<i64> for $name {
            fn from(id: i64) -> Self {
                Self(id)
            }
        }
    };
}

id_type!(
    /// Identity of a persisted filter.
    FilterId
);
id_type!(
    /// Identity of a persisted filter group.
    FilterGroupId
);
id_type!(
    /// The tenant (journal, press, site) a filter is configured for.
    ContextId
);

impl ContextId {
    /// The site-wide context.
    pub const SITE: ContextId = ContextId(0);
}

impl Default for ContextId {
    fn default() -> Self {
        ContextId::SITE
    }
}

/// A named (input, output) contract shared by every filter created in it.
///
/// Groups exist independently of any filter. Their types never change
/// after creation; only the display keys may be edited.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterGroup {
    pub id: Option<FilterGroupId>,
    pub symbolic: String,
    pub display_name_key: String,
    pub description_key: String,
    pub input_type: TypeDescription,
    pub output_type: TypeDescription,
}

impl FilterGroup {
    pub fn new(
        symbolic: impl Into<String>,
        input_type: TypeDescription,
        output_type: TypeDescription,
    ) -> Self {
        Self {
            id: None,
            symbolic: symbolic.into(),
            display_name_key: String::new(),
            description_key: String::new(),
            input_type,
            output_type,
        }
    }

    pub fn display_name(mut self, key: impl Into<String>) -> Self {
        self.display_name_key = key.into();
        self
    }

    pub fn description(mut self, key: impl Into<String>) -> Self {
        self.description_key = key.into();
        self
    }

    /// True if both groups declare the same input and output types.
    pub fn same_contract(&self, other: &FilterGroup) -> bool {
        self.input_type == other.input_type && self.output_type == other.output_type
    }
}
