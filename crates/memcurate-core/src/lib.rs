//! memcurate core library
//!
//! Refinement sessions over an agent's long-term memory: guarded mutations,
//! an append-only audit trail, a token-mass circuit breaker and rollback
//! driven entirely by the trail.

pub mod audit;
pub mod config;
pub mod driver;
pub mod error;
pub mod extraction;
pub mod memory_store;
pub mod metrics;
pub mod obs;
pub mod scheduler;
pub mod session;
pub mod telemetry;
pub mod token;

pub use audit::{
    AuditTrailApi, CompletePayload, ConsolidatePayload, DeletePayload, MemorySnapshot,
    RollbackPayload, UpdatePayload,
};
pub use config::{CurationConfig, ExtractionConfig, SessionConfig, StorageConfig, TokenConfig};
pub use driver::{invoke, invoke_named};
pub use error::{CurationError, Result};
pub use extraction::{
    CandidateMemory, ExtractionPipeline, ExtractionReport, MemoryExtractor, TranscriptChunk,
    TranscriptTurn,
};
pub use memory_store::MemoryStoreApi;
pub use metrics::{MetricsSnapshot, METRICS};
pub use scheduler::{ReconcileOutcome, RefinementScheduler};
pub use session::{
    Action, ActionOutcome, BreakerVerdict, RefinementSession, SearchHit, SessionLimits,
    SessionOutcome, SessionParams, SessionStats, SessionStatus,
};
pub use telemetry::init_tracing;
pub use token::TokenAccountant;

pub use memcurate_state::{
    AuditAction, AuditEntry, CurationStore, Memory, MemoryId, MemoryKind, OwnerId, OwnerSettings,
    SessionId, SurrealCurationStore, Threshold,
};
