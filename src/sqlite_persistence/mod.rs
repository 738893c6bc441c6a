//! Shared SQLite schema plumbing.
//!
//! Database files carry their schema version in `PRAGMA user_version`,
//! offset by a base marker so an unrelated SQLite file is rejected instead
//! of being migrated.

use anyhow::{Context, Result};
use rusqlite::Connection;
use tracing::info;

/// Base offset for `PRAGMA user_version` so we can tell our databases apart
/// from arbitrary SQLite files (which report 0).
pub const BASE_DB_VERSION: usize = 7000;

/// One schema step expressed as raw SQL.
pub struct VersionedSchema {
    pub version: usize,
    pub up: &'static str,
}

/// Create or migrate a database to the latest of `schemas`.
///
/// A fresh database (user_version 0) gets every step applied in order. An
/// existing database replays only the steps above its recorded version.
pub fn apply_schemas(conn: &Connection, schemas: &[VersionedSchema], label: &str) -> Result<()> {
    let raw_version: i64 = conn.query_row("PRAGMA user_version;", [], |row| row.get(0))?;

    let last_version = schemas
        .last()
        .with_context(|| format!("No schemas defined for {}", label))?
        .version;

    if raw_version == 0 {
        info!("Creating new {} database schema", label);
        for schema in schemas {
            conn.execute_batch(schema.up)
                .with_context(|| format!("Failed to run {} schema version {}", label, schema.version))?;
        }
        conn.execute(
            &format!("PRAGMA user_version = {}", BASE_DB_VERSION + last_version),
            [],
        )?;
        return Ok(());
    }

    let db_version = raw_version - BASE_DB_VERSION as i64;
    if db_version < 1 {
        anyhow::bail!(
            "{} database version {} is invalid (expected >= 1)",
            label,
            db_version
        );
    }
    if db_version > last_version as i64 {
        anyhow::bail!(
            "{} database version {} is too new (max supported: {})",
            label,
            db_version,
            last_version
        );
    }

    for schema in schemas {
        if schema.version as i64 > db_version {
            info!("Migrating {} database to version {}", label, schema.version);
            conn.execute_batch(schema.up)
                .with_context(|| format!("Failed to migrate {} to version {}", label, schema.version))?;
            conn.execute(
                &format!("PRAGMA user_version = {}", BASE_DB_VERSION + schema.version),
                [],
            )?;
        }
    }

    Ok(())
}
