//! SQLite persistence for Strainer filters.
//!
//! Stores filter groups and filter trees, hydrates them back through a
//! [`strainer_core::FilterRegistry`], and answers the lookup queries
//! (by group, class, type description, or sample data compatibility).

mod database;
mod error;
mod filter_dao;
mod group_dao;
mod helper;
mod schema;
mod tree;

pub use database::Database;
pub use error::{IntegrityViolation, StoreError};
pub use filter_dao::{FilterDao, Lookup};
pub use group_dao::FilterGroupDao;
pub use helper::{FilterHelper, InstallReport};
pub use schema::{SCHEMA_VERSION, migrate};
