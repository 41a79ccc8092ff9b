//! Database handle shared by the DAOs.

use crate::error::StoreError;
use crate::filter_dao::FilterDao;
use crate::group_dao::FilterGroupDao;
use crate::helper::FilterHelper;
use crate::schema;
use rusqlite::Connection;
use std::path::Path;
use std::sync::Arc;
use strainer_core::{FilterRegistry, HostEnvironment};

/// An open filter database.
///
/// Holds the connection, the registry used to hydrate stored filters, and
/// the host that runtime requirements are checked against.
pub struct Database {
    conn: Connection,
    registry: Arc<FilterRegistry>,
    host: HostEnvironment,
}

impl Database {
    /// Open (or create) a database file and bring its schema up to date.
    pub fn open(path: impl AsRef<Path>, registry: Arc<FilterRegistry>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        tracing::debug!(path = %path.display(), "opening filter database");
        Self::from_connection(Connection::open(path)?, registry)
    }

    pub fn open_in_memory(registry: Arc<FilterRegistry>) -> Result<Self, StoreError> {
        Self::from_connection(Connection::open_in_memory()?, registry)
    }

    fn from_connection(conn: Connection, registry: Arc<FilterRegistry>) -> Result<Self, StoreError> {
        schema::migrate(&conn)?;
        Ok(Self {
            conn,
            registry,
            host: HostEnvironment::current(),
        })
    }

    /// Check runtime requirements against a different host.
    pub fn with_host(mut self, host: HostEnvironment) -> Self {
        self.host = host;
        self
    }

    pub fn host(&self) -> &HostEnvironment {
        &self.host
    }

    pub fn registry(&self) -> &FilterRegistry {
        &self.registry
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn filter_groups(&self) -> FilterGroupDao<'_> {
        FilterGroupDao::new(self)
    }

    pub fn filters(&self) -> FilterDao<'_> {
        FilterDao::new(self)
    }

    pub fn helper(&self) -> FilterHelper<'_> {
        FilterHelper::new(self)
    }
}
