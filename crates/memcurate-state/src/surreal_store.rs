//! SurrealDB-backed CurationStore implementation
//!
//! Uses `schema::{MemoryRow, AuditRow, OwnerRow}` for persistence, converting
//! to/from `storage_traits` types at the boundary. Every `WriteBatch` runs as
//! one SurrealQL transaction.

use std::fmt::Write as _;

use async_trait::async_trait;
use serde::Serialize;
use surrealdb::engine::any::Any;
use surrealdb::sql::Datetime as SurrealDatetime;
use surrealdb::Surreal;
use tracing::{debug, info, instrument};

use crate::error::StorageError;
use crate::handle::ConnectionConfig;
use crate::schema::{AuditRow, MemoryRow, OwnerRow};
use crate::storage_traits::{
    AuditEntry, AuditTrail, CurationStore, Memory, MemoryFilter, MemoryId, MemoryStore, OwnerId,
    OwnerSettings, OwnerSettingsStore, SessionId, StorageResult, Threshold, WriteBatch, WriteOp,
};

/// SurrealDB-backed implementation of [`CurationStore`].
pub struct SurrealCurationStore {
    db: Surreal<Any>,
}

impl SurrealCurationStore {
    /// Create an in-memory instance for testing.
    ///
    /// Connects to `mem://`, selects `memcurate/main`, and runs `init_schema`.
    pub async fn in_memory() -> crate::Result<Self> {
        let db = ConnectionConfig::in_memory().connect().await?;
        info!("SurrealCurationStore connected (in-memory)");
        Ok(Self { db })
    }

    pub async fn connect(config: &ConnectionConfig) -> crate::Result<Self> {
        let db = config.connect().await?;
        Ok(Self { db })
    }

    /// Create from `MEMCURATE_DB_*` environment variables.
    pub async fn from_env() -> crate::Result<Self> {
        let config = ConnectionConfig::from_env().map_err(crate::StateError::Connection)?;
        Self::connect(&config).await
    }

    /// Wrap an already connected and initialized database.
    pub fn from_db(db: Surreal<Any>) -> Self {
        Self { db }
    }

    // -- private helpers -----------------------------------------------------

    async fn fetch_memory_row(&self, memory_id: &MemoryId) -> StorageResult<Option<MemoryRow>> {
        let mut res = self
            .db
            .query("SELECT * FROM memories WHERE memory_id = $mid")
            .bind(("mid", memory_id.0.clone()))
            .await
            .map_err(backend)?;

        let rows: Vec<MemoryRow> = res.take(0).map_err(backend)?;
        Ok(rows.into_iter().next())
    }

    async fn fetch_audit(&self, sql: &'static str, key: &str) -> StorageResult<Vec<AuditEntry>> {
        let mut res = self
            .db
            .query(sql)
            .bind(("key", key.to_string()))
            .await
            .map_err(backend)?;

        let rows: Vec<AuditRow> = res.take(0).map_err(backend)?;
        rows.into_iter().map(AuditEntry::try_from).collect()
    }
}

fn backend(e: surrealdb::Error) -> StorageError {
    StorageError::Backend(e.to_string())
}

// ---------------------------------------------------------------------------
// Batch rendering
// ---------------------------------------------------------------------------

/// Heterogeneous bound parameter for a rendered batch.
#[derive(Debug, Serialize)]
#[serde(untagged)]
enum BatchParam {
    Text(String),
    Flag(bool),
    Time(SurrealDatetime),
    Memory(MemoryRow),
    Audit(AuditRow),
}

/// A batch rendered to one transactional SurrealQL script plus its bindings.
#[derive(Debug)]
struct RenderedBatch {
    sql: String,
    params: Vec<(String, BatchParam)>,
}

/// Keep only characters that are safe inside a SurrealQL string literal.
fn literal_safe(id: &str) -> String {
    id.chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | ':'))
        .collect()
}

fn render_batch(batch: WriteBatch) -> RenderedBatch {
    let mut sql = String::from("BEGIN TRANSACTION;\n");
    let mut params = Vec::new();

    for (i, op) in batch.into_ops().into_iter().enumerate() {
        let p = format!("p{i}");
        let v = format!("v{i}");
        match op {
            WriteOp::InsertMemory(memory) => {
                let _ = writeln!(sql, "CREATE memories CONTENT ${p};");
                params.push((p, BatchParam::Memory(MemoryRow::from(memory))));
            }
            WriteOp::SetTombstone {
                memory_id,
                tombstoned,
            } => {
                push_existence_guard(&mut sql, i, &p, &memory_id);
                if tombstoned {
                    let _ = writeln!(
                        sql,
                        "UPDATE memories SET tombstoned = true, tombstoned_at = time::now() \
                         WHERE memory_id = ${p} AND tombstoned = false;"
                    );
                } else {
                    let _ = writeln!(
                        sql,
                        "UPDATE memories SET tombstoned = false, tombstoned_at = NONE \
                         WHERE memory_id = ${p};"
                    );
                }
                params.push((p, BatchParam::Text(memory_id.0)));
            }
            WriteOp::SetContent { memory_id, content } => {
                push_existence_guard(&mut sql, i, &p, &memory_id);
                let _ = writeln!(sql, "UPDATE memories SET content = ${v} WHERE memory_id = ${p};");
                params.push((p, BatchParam::Text(memory_id.0)));
                params.push((v, BatchParam::Text(content)));
            }
            WriteOp::SetConstitutional {
                memory_id,
                constitutional,
            } => {
                push_existence_guard(&mut sql, i, &p, &memory_id);
                let _ = writeln!(
                    sql,
                    "UPDATE memories SET constitutional = ${v} WHERE memory_id = ${p};"
                );
                params.push((p, BatchParam::Text(memory_id.0)));
                params.push((v, BatchParam::Flag(constitutional)));
            }
            WriteOp::AppendAudit(entry) => {
                let _ = writeln!(sql, "CREATE audit_entries CONTENT ${p};");
                params.push((p, BatchParam::Audit(AuditRow::from(entry))));
            }
            WriteOp::StampRefined { owner_id, at } => {
                let _ = writeln!(
                    sql,
                    "UPSERT type::thing('owner_settings', ${p}) \
                     SET owner_id = ${p}, last_refined_at = ${v};"
                );
                params.push((p, BatchParam::Text(owner_id.0)));
                params.push((v, BatchParam::Time(SurrealDatetime::from(at))));
            }
        }
    }

    sql.push_str("COMMIT TRANSACTION;\n");
    RenderedBatch { sql, params }
}

fn push_existence_guard(sql: &mut String, i: usize, p: &str, memory_id: &MemoryId) {
    let _ = writeln!(
        sql,
        "LET $hit{i} = (SELECT memory_id FROM memories WHERE memory_id = ${p});\n\
         IF array::len($hit{i}) = 0 {{ THROW \"memory not found: {}\"; }};",
        literal_safe(memory_id.as_str())
    );
}

// ---------------------------------------------------------------------------
// Trait implementations
// ---------------------------------------------------------------------------

#[async_trait]
impl MemoryStore for SurrealCurationStore {
    #[instrument(skip(self, memory), fields(memory_id = %memory.memory_id))]
    async fn insert_memory(&self, memory: Memory) -> StorageResult<Memory> {
        if self.fetch_memory_row(&memory.memory_id).await?.is_some() {
            return Err(StorageError::DuplicateMemory {
                memory_id: memory.memory_id.to_string(),
            });
        }

        self.db
            .query("CREATE memories CONTENT $row")
            .bind(("row", MemoryRow::from(memory.clone())))
            .await
            .map_err(backend)?
            .check()
            .map_err(backend)?;

        debug!("memory inserted");
        Ok(memory)
    }

    async fn get_memory(&self, memory_id: &MemoryId) -> StorageResult<Memory> {
        self.fetch_memory_row(memory_id)
            .await?
            .map(Memory::from)
            .ok_or_else(|| StorageError::MemoryNotFound {
                memory_id: memory_id.to_string(),
            })
    }

    async fn list_memories(
        &self,
        owner_id: &OwnerId,
        filter: MemoryFilter,
    ) -> StorageResult<Vec<Memory>> {
        let mut res = self
            .db
            .query("SELECT * FROM memories WHERE owner_id = $owner ORDER BY created_at ASC")
            .bind(("owner", owner_id.0.clone()))
            .await
            .map_err(backend)?;

        let rows: Vec<MemoryRow> = res.take(0).map_err(backend)?;
        Ok(rows
            .into_iter()
            .map(Memory::from)
            .filter(|m| filter.matches(m))
            .collect())
    }
}

#[async_trait]
impl AuditTrail for SurrealCurationStore {
    #[instrument(skip(self, entry), fields(session_id = %entry.session_id, action = %entry.action))]
    async fn append(&self, entry: AuditEntry) -> StorageResult<()> {
        self.db
            .query("CREATE audit_entries CONTENT $row")
            .bind(("row", AuditRow::from(entry)))
            .await
            .map_err(backend)?
            .check()
            .map_err(backend)?;
        Ok(())
    }

    async fn for_session(&self, session_id: &SessionId) -> StorageResult<Vec<AuditEntry>> {
        self.fetch_audit(
            "SELECT * FROM audit_entries WHERE session_id = $key ORDER BY seq DESC",
            session_id.as_str(),
        )
        .await
    }

    async fn for_owner(&self, owner_id: &OwnerId) -> StorageResult<Vec<AuditEntry>> {
        self.fetch_audit(
            "SELECT * FROM audit_entries WHERE owner_id = $key ORDER BY created_at ASC, seq ASC",
            owner_id.as_str(),
        )
        .await
    }
}

#[async_trait]
impl OwnerSettingsStore for SurrealCurationStore {
    async fn owner_settings(&self, owner_id: &OwnerId) -> StorageResult<OwnerSettings> {
        let mut res = self
            .db
            .query("SELECT * FROM owner_settings WHERE owner_id = $owner")
            .bind(("owner", owner_id.0.clone()))
            .await
            .map_err(backend)?;

        let rows: Vec<OwnerRow> = res.take(0).map_err(backend)?;
        match rows.into_iter().next() {
            Some(row) => OwnerSettings::try_from(row),
            None => Ok(OwnerSettings::unset(owner_id.clone())),
        }
    }

    #[instrument(skip(self), fields(owner_id = %owner_id, threshold = %threshold))]
    async fn set_threshold(
        &self,
        owner_id: &OwnerId,
        threshold: Threshold,
    ) -> StorageResult<OwnerSettings> {
        let mut res = self
            .db
            .query(
                "UPSERT type::thing('owner_settings', $owner) \
                 SET owner_id = $owner, threshold = $threshold RETURN AFTER",
            )
            .bind(("owner", owner_id.0.clone()))
            .bind(("threshold", threshold.value()))
            .await
            .map_err(backend)?;

        let rows: Vec<OwnerRow> = res.take(0).map_err(backend)?;
        let row = rows
            .into_iter()
            .next()
            .ok_or_else(|| StorageError::Backend("threshold upsert returned no row".into()))?;
        OwnerSettings::try_from(row)
    }
}

#[async_trait]
impl CurationStore for SurrealCurationStore {
    #[instrument(skip(self, batch), fields(ops = batch.len()))]
    async fn apply_batch(&self, batch: WriteBatch) -> StorageResult<()> {
        if batch.is_empty() {
            return Ok(());
        }

        let RenderedBatch { sql, params } = render_batch(batch);
        let mut query = self.db.query(sql);
        for binding in params {
            query = query.bind(binding);
        }

        query
            .await
            .map_err(|e| StorageError::BatchAborted {
                reason: e.to_string(),
            })?
            .check()
            .map_err(|e| StorageError::BatchAborted {
                reason: e.to_string(),
            })?;

        debug!("write batch committed");
        Ok(())
    }
}
