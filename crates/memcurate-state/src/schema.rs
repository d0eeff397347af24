//! SurrealDB row types
//!
//! Rows mirror the `storage_traits` records but store datetimes as native
//! SurrealDB datetimes and carry the database record id.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StorageError;
use crate::storage_traits::{
    AuditAction, AuditEntry, AuditEntryId, ContentDigest, Memory, MemoryId, MemoryKind, OwnerId,
    OwnerSettings, SessionId, StorageResult, Threshold,
};

/// Module for serializing chrono DateTime to SurrealDB datetime format
pub(crate) mod surreal_datetime {
    use chrono::{DateTime, Utc};
    use serde::{self, Deserialize, Deserializer, Serializer};
    use surrealdb::sql::Datetime as SurrealDatetime;

    pub fn serialize<S>(date: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let sd = SurrealDatetime::from(*date);
        serde::Serialize::serialize(&sd, serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let sd = SurrealDatetime::deserialize(deserializer)?;
        Ok(DateTime::from(sd))
    }
}

/// Module for serializing optional chrono DateTime to SurrealDB datetime format
pub(crate) mod surreal_datetime_opt {
    use chrono::{DateTime, Utc};
    use serde::{self, Deserialize, Deserializer, Serializer};
    use surrealdb::sql::Datetime as SurrealDatetime;

    pub fn serialize<S>(date: &Option<DateTime<Utc>>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serde::Serialize::serialize(&date.map(SurrealDatetime::from), serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let sd = Option::<SurrealDatetime>::deserialize(deserializer)?;
        Ok(sd.map(DateTime::from))
    }
}

/// Row in the `memories` table
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryRow {
    /// SurrealDB record ID
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<surrealdb::sql::Thing>,
    pub memory_id: String,
    pub owner_id: String,
    pub content: String,
    pub kind: MemoryKind,
    pub constitutional: bool,
    pub tombstoned: bool,
    #[serde(default, with = "surreal_datetime_opt")]
    pub tombstoned_at: Option<DateTime<Utc>>,
    #[serde(with = "surreal_datetime")]
    pub created_at: DateTime<Utc>,
}

impl From<Memory> for MemoryRow {
    fn from(m: Memory) -> Self {
        MemoryRow {
            id: None,
            memory_id: m.memory_id.0,
            owner_id: m.owner_id.0,
            content: m.content,
            kind: m.kind,
            constitutional: m.constitutional,
            tombstoned: m.tombstoned,
            tombstoned_at: m.tombstoned_at,
            created_at: m.created_at,
        }
    }
}

impl From<MemoryRow> for Memory {
    fn from(row: MemoryRow) -> Self {
        Memory {
            memory_id: MemoryId(row.memory_id),
            owner_id: OwnerId(row.owner_id),
            content: row.content,
            kind: row.kind,
            constitutional: row.constitutional,
            tombstoned: row.tombstoned,
            tombstoned_at: row.tombstoned_at,
            created_at: row.created_at,
        }
    }
}

/// Row in the append-only `audit_entries` table
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRow {
    /// SurrealDB record ID
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<surrealdb::sql::Thing>,
    pub entry_id: String,
    pub session_id: String,
    pub owner_id: String,
    pub seq: u64,
    pub action: AuditAction,
    pub subject_ref: Vec<String>,
    pub payload: serde_json::Value,
    pub payload_digest: String,
    #[serde(with = "surreal_datetime")]
    pub created_at: DateTime<Utc>,
}

impl From<AuditEntry> for AuditRow {
    fn from(e: AuditEntry) -> Self {
        AuditRow {
            id: None,
            entry_id: e.entry_id.0,
            session_id: e.session_id.0,
            owner_id: e.owner_id.0,
            seq: e.seq,
            action: e.action,
            subject_ref: e.subject_ref.into_iter().map(|m| m.0).collect(),
            payload: e.payload,
            payload_digest: e.payload_digest.into(),
            created_at: e.created_at,
        }
    }
}

impl TryFrom<AuditRow> for AuditEntry {
    type Error = StorageError;

    fn try_from(row: AuditRow) -> StorageResult<Self> {
        Ok(AuditEntry {
            entry_id: AuditEntryId(row.entry_id),
            session_id: SessionId(row.session_id),
            owner_id: OwnerId(row.owner_id),
            seq: row.seq,
            action: row.action,
            subject_ref: row.subject_ref.into_iter().map(MemoryId).collect(),
            payload: row.payload,
            payload_digest: ContentDigest::try_from(row.payload_digest)?,
            created_at: row.created_at,
        })
    }
}

/// Row in the `owner_settings` table, keyed by owner id
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OwnerRow {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<surrealdb::sql::Thing>,
    pub owner_id: String,
    #[serde(default)]
    pub threshold: Option<f64>,
    #[serde(default, with = "surreal_datetime_opt")]
    pub last_refined_at: Option<DateTime<Utc>>,
}

impl TryFrom<OwnerRow> for OwnerSettings {
    type Error = StorageError;

    fn try_from(row: OwnerRow) -> StorageResult<Self> {
        Ok(OwnerSettings {
            owner_id: OwnerId(row.owner_id),
            threshold: row.threshold.map(Threshold::new).transpose()?,
            last_refined_at: row.last_refined_at,
        })
    }
}
