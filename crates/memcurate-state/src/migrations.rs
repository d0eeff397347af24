//! SurrealDB schema migrations and initialization
//!
//! Sets up the three memcurate tables with their uniqueness constraints and
//! lookup indexes. Safe to call on every connection.

use crate::error::StateError;
use crate::Result;
use surrealdb::engine::any::Any;
use surrealdb::Surreal;
use tracing::{debug, info};

/// Initialize all memcurate tables in SurrealDB
pub async fn init_schema(db: &Surreal<Any>) -> Result<()> {
    info!("Initializing memcurate SurrealDB schema");

    init_memories_table(db).await?;
    init_audit_entries_table(db).await?;
    init_owner_settings_table(db).await?;

    info!("memcurate schema initialization complete");
    Ok(())
}

async fn run_definitions(db: &Surreal<Any>, sql: &str) -> Result<()> {
    db.query(sql)
        .await?
        .check()
        .map_err(|e| StateError::SchemaSetup(e.to_string()))?;
    Ok(())
}

/// Initialize `memories` table
///
/// Schema:
/// ```text
/// TABLE memories {
///   memory_id:      STRING (unique)
///   owner_id:       STRING (indexed)
///   content:        STRING
///   kind:           STRING (enum: core | journal)
///   constitutional: BOOL
///   tombstoned:     BOOL
///   tombstoned_at:  DATETIME?
///   created_at:     DATETIME
/// }
/// ```
///
/// Rows are never deleted; tombstoning is a flag flip.
async fn init_memories_table(db: &Surreal<Any>) -> Result<()> {
    debug!("Initializing memories table");

    let sql = r#"
        DEFINE TABLE IF NOT EXISTS memories
            SCHEMALESS
            PERMISSIONS
                FOR create FULL
                FOR select FULL
                FOR update FULL
                FOR delete NONE;

        DEFINE INDEX IF NOT EXISTS idx_memory_id ON TABLE memories COLUMNS memory_id UNIQUE;
        DEFINE INDEX IF NOT EXISTS idx_memory_owner ON TABLE memories COLUMNS owner_id;
        DEFINE INDEX IF NOT EXISTS idx_memory_owner_kind ON TABLE memories COLUMNS owner_id, kind, tombstoned;
    "#;

    run_definitions(db, sql).await?;
    info!("✓ memories table initialized");
    Ok(())
}

/// Initialize `audit_entries` table
///
/// Schema:
/// ```text
/// TABLE audit_entries {
///   entry_id:       STRING (unique)
///   session_id:     STRING (indexed)
///   owner_id:       STRING (indexed)
///   seq:            INT (monotonic within session)
///   action:         STRING
///   subject_ref:    ARRAY<STRING>
///   payload:        OBJECT
///   payload_digest: STRING
///   created_at:     DATETIME
/// }
/// ```
///
/// Append-only: update and delete are denied at the table level.
async fn init_audit_entries_table(db: &Surreal<Any>) -> Result<()> {
    debug!("Initializing audit_entries table");

    let sql = r#"
        DEFINE TABLE IF NOT EXISTS audit_entries
            SCHEMALESS
            PERMISSIONS
                FOR create FULL
                FOR select FULL
                FOR update NONE
                FOR delete NONE;

        DEFINE INDEX IF NOT EXISTS idx_entry_id ON TABLE audit_entries COLUMNS entry_id UNIQUE;
        DEFINE INDEX IF NOT EXISTS idx_audit_session_seq ON TABLE audit_entries COLUMNS session_id, seq UNIQUE;
        DEFINE INDEX IF NOT EXISTS idx_audit_owner ON TABLE audit_entries COLUMNS owner_id;
    "#;

    run_definitions(db, sql).await?;
    info!("✓ audit_entries table initialized");
    Ok(())
}

/// Initialize `owner_settings` table, one row per owner
async fn init_owner_settings_table(db: &Surreal<Any>) -> Result<()> {
    debug!("Initializing owner_settings table");

    let sql = r#"
        DEFINE TABLE IF NOT EXISTS owner_settings
            SCHEMALESS
            PERMISSIONS
                FOR create FULL
                FOR select FULL
                FOR update FULL
                FOR delete NONE;

        DEFINE INDEX IF NOT EXISTS idx_owner_settings_owner ON TABLE owner_settings COLUMNS owner_id UNIQUE;
    "#;

    run_definitions(db, sql).await?;
    info!("✓ owner_settings table initialized");
    Ok(())
}
