//! Database schema.

use rusqlite::Connection;

/// Bumped whenever the statements below change.
pub const SCHEMA_VERSION: i64 = 1;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS filter_groups (
    filter_group_id INTEGER PRIMARY KEY AUTOINCREMENT,
    symbolic TEXT NOT NULL UNIQUE,
    display_name TEXT NOT NULL DEFAULT '',
    description TEXT NOT NULL DEFAULT '',
    input_type TEXT NOT NULL,
    output_type TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS filters (
    filter_id INTEGER PRIMARY KEY AUTOINCREMENT,
    filter_group_id INTEGER NOT NULL REFERENCES filter_groups(filter_group_id),
    context_id INTEGER NOT NULL DEFAULT 0,
    display_name TEXT NOT NULL DEFAULT '',
    class_name TEXT NOT NULL,
    is_template INTEGER NOT NULL DEFAULT 0,
    parent_filter_id INTEGER REFERENCES filters(filter_id),
    seq INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS filters_group_context ON filters(filter_group_id, context_id);
CREATE INDEX IF NOT EXISTS filters_parent ON filters(parent_filter_id);

CREATE TABLE IF NOT EXISTS filter_settings (
    filter_id INTEGER NOT NULL REFERENCES filters(filter_id),
    setting_name TEXT NOT NULL,
    locale TEXT,
    setting_value TEXT NOT NULL
);

CREATE UNIQUE INDEX IF NOT EXISTS filter_settings_pkey
    ON filter_settings(filter_id, setting_name, IFNULL(locale, ''));
"#;

/// Create missing tables and enable foreign key enforcement.
pub fn migrate(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    conn.execute_batch(SCHEMA)?;

    let version: i64 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
    if version < SCHEMA_VERSION {
        tracing::info!(from = version, to = SCHEMA_VERSION, "migrated filter schema");
        conn.execute_batch(&format!("PRAGMA user_version = {SCHEMA_VERSION};"))?;
    }
    Ok(())
}
