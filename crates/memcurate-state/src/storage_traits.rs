//! Storage trait definitions for memcurate
//!
//! These traits define the storage abstractions a curation session needs:
//! - `MemoryStore`: memory records (insert, lookup, per-owner listing)
//! - `AuditTrail`: append-only mutation log, read back per session or owner
//! - `OwnerSettingsStore`: per-owner breaker threshold and refinement stamp
//! - `CurationStore`: all of the above plus atomic `WriteBatch` application
//!
//! All traits are async and backend-agnostic. An in-memory fake is provided
//! for testing via the `fakes` module.

use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::error::StorageError;

/// Result type for storage operations
pub type StorageResult<T> = std::result::Result<T, StorageError>;

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(pub String);

        impl $name {
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                $name(s.to_string())
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                $name(s)
            }
        }
    };
}

string_id!(
    /// Unique identifier for a memory record
    MemoryId
);
string_id!(
    /// Identifier of the agent or user that owns a memory collection
    OwnerId
);
string_id!(
    /// Opaque token scoping the audit entries of one refinement session
    SessionId
);
string_id!(AuditEntryId);

impl MemoryId {
    /// Generate a new random MemoryId
    pub fn new() -> Self {
        MemoryId(uuid::Uuid::new_v4().to_string())
    }
}

impl Default for MemoryId {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionId {
    /// Generate a new random SessionId
    pub fn new() -> Self {
        SessionId(uuid::Uuid::new_v4().to_string())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl AuditEntryId {
    pub fn new() -> Self {
        AuditEntryId(uuid::Uuid::new_v4().to_string())
    }
}

impl Default for AuditEntryId {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// ContentDigest
// ---------------------------------------------------------------------------

/// Content digest (SHA-256 hex string).
///
/// The inner field is private to guarantee the string is always valid
/// lowercase hex produced by `from_bytes` or validated via `TryFrom<String>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ContentDigest(String);

impl ContentDigest {
    /// Compute the SHA-256 digest of the given bytes.
    pub fn from_bytes(data: &[u8]) -> Self {
        use sha2::Digest;
        let mut hasher = Sha256::new();
        hasher.update(data);
        ContentDigest(hex::encode(hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short form (first 12 hex chars).
    pub fn short(&self) -> &str {
        &self.0[..12.min(self.0.len())]
    }
}

impl TryFrom<String> for ContentDigest {
    type Error = StorageError;

    fn try_from(s: String) -> std::result::Result<Self, Self::Error> {
        if s.len() != 64 || !s.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(StorageError::Backend(format!("invalid digest: {s}")));
        }
        Ok(ContentDigest(s.to_ascii_lowercase()))
    }
}

impl From<ContentDigest> for String {
    fn from(d: ContentDigest) -> Self {
        d.0
    }
}

impl fmt::Display for ContentDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// MemoryStore: memory records
// ---------------------------------------------------------------------------

/// Memory kind. Only `Core` memories count toward the breaker's mass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryKind {
    Core,
    Journal,
}

impl fmt::Display for MemoryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MemoryKind::Core => write!(f, "core"),
            MemoryKind::Journal => write!(f, "journal"),
        }
    }
}

impl std::str::FromStr for MemoryKind {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "core" => Ok(MemoryKind::Core),
            "journal" => Ok(MemoryKind::Journal),
            other => Err(StorageError::InvalidSetting(format!(
                "unknown memory kind: {other}"
            ))),
        }
    }
}

/// A single memory record.
///
/// Memories are never physically erased; `tombstoned` is a reversible flag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Memory {
    pub memory_id: MemoryId,
    pub owner_id: OwnerId,
    pub content: String,
    pub kind: MemoryKind,
    /// Protects the memory from deletion and content mutation while set.
    pub constitutional: bool,
    pub tombstoned: bool,
    pub tombstoned_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Memory {
    /// Build a fresh, live, unprotected memory with a new id.
    pub fn new(owner_id: OwnerId, content: impl Into<String>, kind: MemoryKind) -> Self {
        Memory {
            memory_id: MemoryId::new(),
            owner_id,
            content: content.into(),
            kind,
            constitutional: false,
            tombstoned: false,
            tombstoned_at: None,
            created_at: Utc::now(),
        }
    }

    pub fn is_live(&self) -> bool {
        !self.tombstoned
    }
}

/// Listing filter for [`MemoryStore::list_memories`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoryFilter {
    /// Restrict to one kind; `None` returns every kind.
    pub kind: Option<MemoryKind>,
    pub include_tombstoned: bool,
}

impl MemoryFilter {
    /// Live memories of one kind.
    pub fn live(kind: MemoryKind) -> Self {
        MemoryFilter {
            kind: Some(kind),
            include_tombstoned: false,
        }
    }

    pub fn matches(&self, memory: &Memory) -> bool {
        if !self.include_tombstoned && memory.tombstoned {
            return false;
        }
        self.kind.map_or(true, |k| k == memory.kind)
    }
}

/// Memory record persistence.
#[async_trait]
pub trait MemoryStore: Send + Sync {
    /// Insert a new memory. Fails with `DuplicateMemory` if the id exists.
    async fn insert_memory(&self, memory: Memory) -> StorageResult<Memory>;

    /// Fetch a memory by id, tombstoned or not.
    async fn get_memory(&self, memory_id: &MemoryId) -> StorageResult<Memory>;

    /// List an owner's memories in creation order.
    async fn list_memories(
        &self,
        owner_id: &OwnerId,
        filter: MemoryFilter,
    ) -> StorageResult<Vec<Memory>>;
}

// ---------------------------------------------------------------------------
// AuditTrail: append-only mutation log
// ---------------------------------------------------------------------------

/// Audited action kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    Delete,
    Update,
    Consolidate,
    Protect,
    Unprotect,
    SessionComplete,
    SessionRollback,
}

impl AuditAction {
    /// Terminal entries close a session; no forward entry may follow them.
    pub fn is_terminal(&self) -> bool {
        matches!(self, AuditAction::SessionComplete | AuditAction::SessionRollback)
    }

    /// Forward mutations that carry enough payload to be inverted.
    pub fn is_compensable(&self) -> bool {
        !self.is_terminal()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::Delete => "delete",
            AuditAction::Update => "update",
            AuditAction::Consolidate => "consolidate",
            AuditAction::Protect => "protect",
            AuditAction::Unprotect => "unprotect",
            AuditAction::SessionComplete => "session_complete",
            AuditAction::SessionRollback => "session_rollback",
        }
    }
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One append-only audit record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub entry_id: AuditEntryId,
    pub session_id: SessionId,
    pub owner_id: OwnerId,
    /// Monotonic sequence number within the session
    pub seq: u64,
    pub action: AuditAction,
    /// Memory id(s) the entry is about; empty for session-level entries.
    pub subject_ref: Vec<MemoryId>,
    pub payload: serde_json::Value,
    pub payload_digest: ContentDigest,
    pub created_at: DateTime<Utc>,
}

impl AuditEntry {
    /// Build an entry with a fresh id, the current time and its digest.
    pub fn new(
        session_id: SessionId,
        owner_id: OwnerId,
        seq: u64,
        action: AuditAction,
        subject_ref: Vec<MemoryId>,
        payload: serde_json::Value,
    ) -> Self {
        let payload_digest = Self::compute_digest(&session_id, action, &subject_ref, &payload);
        AuditEntry {
            entry_id: AuditEntryId::new(),
            session_id,
            owner_id,
            seq,
            action,
            subject_ref,
            payload,
            payload_digest,
            created_at: Utc::now(),
        }
    }

    /// SHA-256 over the canonical JSON of the entry's meaningful fields.
    ///
    /// Object keys are sorted and `null` members dropped, so a backend that
    /// reorders keys or elides nulls still verifies.
    pub fn compute_digest(
        session_id: &SessionId,
        action: AuditAction,
        subject_ref: &[MemoryId],
        payload: &serde_json::Value,
    ) -> ContentDigest {
        let envelope = serde_json::json!({
            "session_id": session_id.as_str(),
            "action": action.as_str(),
            "subject_ref": subject_ref.iter().map(MemoryId::as_str).collect::<Vec<_>>(),
            "payload": payload,
        });
        let mut canonical = String::new();
        write_canonical(&envelope, &mut canonical);
        ContentDigest::from_bytes(canonical.as_bytes())
    }

    /// Whether the stored digest still matches the entry's contents.
    pub fn verify(&self) -> bool {
        Self::compute_digest(
            &self.session_id,
            self.action,
            &self.subject_ref,
            &self.payload,
        ) == self.payload_digest
    }
}

fn write_canonical(value: &serde_json::Value, out: &mut String) {
    use serde_json::Value;
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map
                .iter()
                .filter(|(_, v)| !v.is_null())
                .map(|(k, _)| k)
                .collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(&map[key], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

/// Append-only audit log.
///
/// Guarantees:
/// - Entries are never mutated or deleted once appended.
/// - `for_session` returns entries most-recent-first (descending `seq`).
#[async_trait]
pub trait AuditTrail: Send + Sync {
    async fn append(&self, entry: AuditEntry) -> StorageResult<()>;

    async fn for_session(&self, session_id: &SessionId) -> StorageResult<Vec<AuditEntry>>;

    /// All entries for an owner, oldest first.
    async fn for_owner(&self, owner_id: &OwnerId) -> StorageResult<Vec<AuditEntry>>;
}

// ---------------------------------------------------------------------------
// OwnerSettingsStore: per-owner scalars
// ---------------------------------------------------------------------------

/// Circuit-breaker ratio in `(0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(try_from = "f64", into = "f64")]
pub struct Threshold(f64);

impl Threshold {
    pub const DEFAULT: Threshold = Threshold(0.75);

    pub fn new(value: f64) -> StorageResult<Self> {
        if value.is_nan() || value <= 0.0 || value > 1.0 {
            return Err(StorageError::InvalidSetting(format!(
                "threshold must be in (0, 1], got {value}"
            )));
        }
        Ok(Threshold(value))
    }

    pub fn value(&self) -> f64 {
        self.0
    }
}

impl Default for Threshold {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl TryFrom<f64> for Threshold {
    type Error = StorageError;

    fn try_from(value: f64) -> Result<Self, Self::Error> {
        Threshold::new(value)
    }
}

impl From<Threshold> for f64 {
    fn from(t: Threshold) -> Self {
        t.0
    }
}

impl fmt::Display for Threshold {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Per-owner settings row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OwnerSettings {
    pub owner_id: OwnerId,
    /// Explicit owner threshold; callers fall back to their default when unset.
    pub threshold: Option<Threshold>,
    pub last_refined_at: Option<DateTime<Utc>>,
}

impl OwnerSettings {
    pub fn unset(owner_id: OwnerId) -> Self {
        OwnerSettings {
            owner_id,
            threshold: None,
            last_refined_at: None,
        }
    }
}

#[async_trait]
pub trait OwnerSettingsStore: Send + Sync {
    /// Settings for an owner. Owners never configured get `OwnerSettings::unset`.
    async fn owner_settings(&self, owner_id: &OwnerId) -> StorageResult<OwnerSettings>;

    async fn set_threshold(
        &self,
        owner_id: &OwnerId,
        threshold: Threshold,
    ) -> StorageResult<OwnerSettings>;
}

// ---------------------------------------------------------------------------
// CurationStore: atomic write batches
// ---------------------------------------------------------------------------

/// A single mutation inside a [`WriteBatch`].
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOp {
    InsertMemory(Memory),
    SetTombstone {
        memory_id: MemoryId,
        tombstoned: bool,
    },
    SetContent {
        memory_id: MemoryId,
        content: String,
    },
    SetConstitutional {
        memory_id: MemoryId,
        constitutional: bool,
    },
    AppendAudit(AuditEntry),
    StampRefined {
        owner_id: OwnerId,
        at: DateTime<Utc>,
    },
}

impl WriteOp {
    /// Short name used in logs and abort reasons.
    pub fn label(&self) -> &'static str {
        match self {
            WriteOp::InsertMemory(_) => "insert_memory",
            WriteOp::SetTombstone { .. } => "set_tombstone",
            WriteOp::SetContent { .. } => "set_content",
            WriteOp::SetConstitutional { .. } => "set_constitutional",
            WriteOp::AppendAudit(_) => "append_audit",
            WriteOp::StampRefined { .. } => "stamp_refined",
        }
    }
}

/// Ordered list of ops applied all-or-nothing.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteBatch {
    ops: Vec<WriteOp>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, op: WriteOp) -> &mut Self {
        self.ops.push(op);
        self
    }

    pub fn with(mut self, op: WriteOp) -> Self {
        self.ops.push(op);
        self
    }

    pub fn extend(&mut self, ops: impl IntoIterator<Item = WriteOp>) -> &mut Self {
        self.ops.extend(ops);
        self
    }

    pub fn ops(&self) -> &[WriteOp] {
        &self.ops
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn into_ops(self) -> Vec<WriteOp> {
        self.ops
    }
}

impl From<Vec<WriteOp>> for WriteBatch {
    fn from(ops: Vec<WriteOp>) -> Self {
        WriteBatch { ops }
    }
}

/// Full backend required by a refinement session.
///
/// Guarantees:
/// - `apply_batch` applies every op in order or none of them.
/// - An op targeting an unknown memory aborts the batch with `MemoryNotFound`.
#[async_trait]
pub trait CurationStore: MemoryStore + AuditTrail + OwnerSettingsStore {
    async fn apply_batch(&self, batch: WriteBatch) -> StorageResult<()>;
}
