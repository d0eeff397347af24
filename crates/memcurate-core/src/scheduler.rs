//! Session creation and recovery.
//!
//! The scheduler snapshots the owner's live core mass before any action runs,
//! resolves the owner's breaker threshold and hands both to a new session.
//! It also finds sessions that never reached a terminal entry and unwinds
//! them from the audit trail.

use std::sync::Arc;

use chrono::Utc;
use memcurate_state::{
    AuditAction, CurationStore, MemoryKind, OwnerId, OwnerSettings, SessionId, Threshold,
};
use serde::Serialize;
use tracing::{info, instrument, warn};

use crate::audit::{AuditTrailApi, RollbackPayload};
use crate::config::CurationConfig;
use crate::error::{CurationError, Result};
use crate::memory_store::MemoryStoreApi;
use crate::metrics::METRICS;
use crate::obs;
use crate::session::compensation::{self, RollbackRecord};
use crate::session::{
    journal_memory, RefinementSession, SessionLimits, SessionOutcome, SessionParams, SessionStats,
};

/// Result of [`RefinementScheduler::reconcile`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ReconcileOutcome {
    /// The session already ended with this terminal entry; nothing was written.
    AlreadyClosed { action: AuditAction },
    RolledBack {
        reverted_entries: usize,
        stats: SessionStats,
    },
}

pub struct RefinementScheduler {
    store: Arc<dyn CurationStore>,
    config: CurationConfig,
}

impl RefinementScheduler {
    pub fn new(store: Arc<dyn CurationStore>, config: CurationConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> &CurationConfig {
        &self.config
    }

    pub fn memories(&self) -> MemoryStoreApi {
        MemoryStoreApi::from_config(Arc::clone(&self.store), &self.config)
    }

    pub fn audit(&self) -> AuditTrailApi {
        AuditTrailApi::new(Arc::clone(&self.store))
    }

    /// Start a session under a fresh UUID session id.
    pub async fn begin(&self, owner_id: &OwnerId) -> Result<RefinementSession> {
        self.begin_with_id(owner_id, SessionId::new()).await
    }

    /// Start a session under a caller-supplied id that has never been used.
    #[instrument(skip(self), fields(owner_id = %owner_id, session_id = %session_id))]
    pub async fn begin_with_id(
        &self,
        owner_id: &OwnerId,
        session_id: SessionId,
    ) -> Result<RefinementSession> {
        if session_id.as_str().trim().is_empty() {
            return Err(CurationError::validation("session id must not be empty"));
        }
        if !self.store.for_session(&session_id).await?.is_empty() {
            return Err(CurationError::Validation(format!(
                "session id {session_id} already has audit entries"
            )));
        }

        let memories = self.memories();
        let pre_session_mass = memories.usage(owner_id, MemoryKind::Core).await?;
        let threshold = self.threshold(owner_id).await?;
        let deadline = self
            .config
            .session_ceiling()
            .and_then(|d| chrono::Duration::from_std(d).ok())
            .map(|d| Utc::now() + d);

        obs::emit_session_started(
            session_id.as_str(),
            owner_id.as_str(),
            pre_session_mass,
            threshold.value(),
        );

        let params = SessionParams {
            session_id,
            owner_id: owner_id.clone(),
            pre_session_mass,
            threshold,
            deadline,
        };
        Ok(RefinementSession::new(
            memories,
            params,
            SessionLimits::from(&self.config.session),
        ))
    }

    /// Owner threshold, or the configured default when the owner has none.
    pub async fn threshold(&self, owner_id: &OwnerId) -> Result<Threshold> {
        let settings = self.store.owner_settings(owner_id).await?;
        Ok(settings
            .threshold
            .unwrap_or_else(|| self.config.default_threshold()))
    }

    pub async fn set_threshold(&self, owner_id: &OwnerId, value: f64) -> Result<OwnerSettings> {
        let threshold =
            Threshold::new(value).map_err(|e| CurationError::Validation(e.to_string()))?;
        Ok(self.store.set_threshold(owner_id, threshold).await?)
    }

    pub async fn owner_settings(&self, owner_id: &OwnerId) -> Result<OwnerSettings> {
        Ok(self.store.owner_settings(owner_id).await?)
    }

    /// Complete a session whose deadline passed. `None` if it is not expired.
    pub async fn finish_expired(
        &self,
        session: &mut RefinementSession,
    ) -> Result<Option<SessionOutcome>> {
        if !session.is_expired() || session.status().is_terminal() {
            return Ok(None);
        }
        warn!(session_id = %session.session_id(), "session deadline reached; completing");
        session
            .complete("session deadline reached before the driver completed")
            .await
            .map(Some)
    }

    pub async fn open_sessions(&self, owner_id: &OwnerId) -> Result<Vec<SessionId>> {
        self.audit().open_sessions(owner_id).await
    }

    /// Unwind a session that never reached `session_complete` or `session_rollback`.
    ///
    /// The rollback is one transaction, so a failed attempt leaves nothing
    /// behind and this can be re-run.
    #[instrument(skip(self), fields(owner_id = %owner_id, session_id = %session_id))]
    pub async fn reconcile(
        &self,
        owner_id: &OwnerId,
        session_id: &SessionId,
    ) -> Result<ReconcileOutcome> {
        let entries = self.store.for_session(session_id).await?;
        if entries.is_empty() || entries.iter().any(|e| &e.owner_id != owner_id) {
            return Err(CurationError::Validation(format!(
                "no audit trail for session {session_id} and owner {owner_id}"
            )));
        }
        if let Some(terminal) = entries.iter().find(|e| e.action.is_terminal()) {
            info!(action = %terminal.action, "session already closed");
            return Ok(ReconcileOutcome::AlreadyClosed {
                action: terminal.action,
            });
        }

        let memories = self.memories();
        let post = memories.usage(owner_id, MemoryKind::Core).await?;
        let threshold = self.threshold(owner_id).await?;
        let stats = SessionStats::from_entries(&entries);
        let reason = "session never completed; reverted from its audit trail".to_string();
        let next_seq = entries.first().map_or(1, |e| e.seq + 1);

        let record = RollbackRecord {
            session_id: session_id.clone(),
            owner_id: owner_id.clone(),
            seq: next_seq,
            payload: RollbackPayload {
                pre_session_mass: None,
                post_session_mass: post,
                threshold: threshold.value(),
                stats,
                reason: reason.clone(),
            },
            journal: journal_memory(
                owner_id,
                &format!("Memory refinement session {session_id} was recovered and rolled back: {reason} ({stats})"),
                SessionLimits::from(&self.config.session).journal_max_chars,
            ),
        };

        let applied = match compensation::rollback_batch(&entries, record) {
            Ok(batch) => self.store.apply_batch(batch).await.map_err(CurationError::from),
            Err(e) => Err(e),
        };
        if let Err(e) = applied {
            METRICS.inc_rollback_failures();
            obs::emit_rollback_failed(session_id.as_str(), &e);
            return Err(CurationError::RollbackFailed {
                session_id: session_id.to_string(),
                reason: e.to_string(),
            });
        }

        METRICS.inc_sessions_rolled_back();
        obs::emit_session_rolled_back(session_id.as_str(), entries.len(), &reason);
        Ok(ReconcileOutcome::RolledBack {
            reverted_entries: entries.len(),
            stats,
        })
    }
}
