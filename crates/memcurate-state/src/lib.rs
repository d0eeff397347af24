//! memcurate-state: persistence layer for memcurate
//!
//! Defines the records and async storage traits a refinement session works
//! against, plus two backends: an in-memory fake for tests and SurrealDB.
//!
//! ## Key Components
//!
//! - `CurationStore`: memories, audit trail and owner settings behind one
//!   trait, with all-or-nothing `WriteBatch` application
//! - `SurrealCurationStore`: one SurrealQL transaction per batch
//! - `fakes::MemoryCurationStore`: staged-copy batches with fault injection

mod error;
pub mod fakes;
mod handle;
pub mod migrations;
mod schema;
pub mod storage_traits;
pub mod surreal_store;

pub use error::{StateError, StorageError};
pub use handle::{ConnectionConfig, Credentials, DEFAULT_LOCAL_PATH};
pub use schema::{AuditRow, MemoryRow, OwnerRow};
pub use storage_traits::{
    AuditAction, AuditEntry, AuditEntryId, AuditTrail, ContentDigest, CurationStore, Memory,
    MemoryFilter, MemoryId, MemoryKind, MemoryStore, OwnerId, OwnerSettings, OwnerSettingsStore,
    SessionId, StorageResult, Threshold, WriteBatch, WriteOp,
};
pub use surreal_store::SurrealCurationStore;

/// Result type for memcurate-state connection and schema operations
pub type Result<T> = std::result::Result<T, StateError>;
