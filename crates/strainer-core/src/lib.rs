//! Strainer: typed, composable, persistable data filters
//!
//! A filter is a transformation with declared input and output types and
//! optional host requirements. Filters compose into sequences and
//! multiplexers, belong to named groups, and are instantiated from
//! registered classes so they can be stored and reloaded.

mod composite;
mod context;
mod document;
mod environment;
mod filter;
mod group;
mod process;
mod registry;
mod settings;
mod types;
mod value;

pub use composite::{CompositeMode, MULTIPLEX_CLASS, SEQUENCE_CLASS};
pub use context::ExecutionContext;
pub use document::{DocumentError, FilterDocument, FilterSpec, GroupSpec};
pub use environment::{
    EnvironmentMismatch, HostEnvironment, RuntimeEnvironment, UnsupportedRuntimeEnvironment,
    Version, VersionError,
};
pub use filter::{Binding, Body, Filter, FilterError, PersistableFilter};
pub use group::{ContextId, FilterGroup, FilterGroupId, FilterId};
pub use process::{FilterDecl, Process};
pub use registry::{FilterRegistry, RegistryError};
pub use settings::{SettingDecl, SettingError, SettingValue, Settings};
pub use types::{Cardinality, PrimitiveKind, TypeDescription, TypeDescriptionError};
pub use value::{Class, Instance, Value};
