//! Refinement session state machine.
//!
//! A session moves `active -> completing -> committed | rolled_back`. Forward
//! actions each commit their mutation and exactly one audit entry in a single
//! batch. `complete` evaluates the breaker and either commits or unwinds the
//! session from its own audit trail in one transaction.

pub mod action;
pub mod breaker;
pub mod compensation;

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use memcurate_state::{
    AuditAction, AuditEntry, Memory, MemoryId, MemoryKind, OwnerId, SessionId, Threshold,
    WriteBatch, WriteOp,
};
use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::audit::{
    build_entry, CompletePayload, ConsolidatePayload, DeletePayload, FlagPayload, MemorySnapshot,
    RollbackPayload, UpdatePayload,
};
use crate::config::SessionConfig;
use crate::error::{CurationError, Result};
use crate::memory_store::MemoryStoreApi;
use crate::metrics::METRICS;
use crate::obs;

pub use action::{Action, ActionOutcome, SearchHit};
pub use breaker::BreakerVerdict;
use compensation::RollbackRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Active,
    Completing,
    Committed,
    RolledBack,
    /// The rollback transaction failed and nothing from it was applied.
    RollbackFailed,
}

impl SessionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionStatus::Committed | SessionStatus::RolledBack | SessionStatus::RollbackFailed
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Active => "active",
            SessionStatus::Completing => "completing",
            SessionStatus::Committed => "committed",
            SessionStatus::RolledBack => "rolled_back",
            SessionStatus::RollbackFailed => "rollback_failed",
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Counts of successful mutating actions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionStats {
    pub consolidated: u32,
    pub updated: u32,
    pub deleted: u32,
    pub protected: u32,
    pub unprotected: u32,
}

impl SessionStats {
    /// Rebuild counts from a session's forward audit entries.
    pub fn from_entries(entries: &[AuditEntry]) -> Self {
        let mut stats = SessionStats::default();
        for entry in entries {
            stats.record(entry.action);
        }
        stats
    }

    fn record(&mut self, action: AuditAction) {
        match action {
            AuditAction::Consolidate => self.consolidated += 1,
            AuditAction::Update => self.updated += 1,
            AuditAction::Delete => self.deleted += 1,
            AuditAction::Protect => self.protected += 1,
            AuditAction::Unprotect => self.unprotected += 1,
            AuditAction::SessionComplete | AuditAction::SessionRollback => {}
        }
    }

    pub fn total(&self) -> u32 {
        self.consolidated + self.updated + self.deleted + self.protected + self.unprotected
    }
}

impl fmt::Display for SessionStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "consolidated {}, updated {}, deleted {}, protected {}, unprotected {}",
            self.consolidated, self.updated, self.deleted, self.protected, self.unprotected
        )
    }
}

/// What `complete` reports back to the driver.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionOutcome {
    pub session_id: SessionId,
    pub status: SessionStatus,
    pub stats: SessionStats,
    pub pre_session_mass: u64,
    pub post_session_mass: u64,
    /// `None` when the breaker was skipped
    pub ratio: Option<f64>,
    pub threshold: f64,
    /// Driver summary on commit, rollback reason otherwise
    pub message: String,
    pub reverted_entries: usize,
}

/// Values fixed by the scheduler before the first action.
#[derive(Debug, Clone)]
pub struct SessionParams {
    pub session_id: SessionId,
    pub owner_id: OwnerId,
    pub pre_session_mass: u64,
    pub threshold: Threshold,
    /// After this instant only `complete` is accepted.
    pub deadline: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy)]
pub struct SessionLimits {
    pub search_limit: usize,
    pub journal_max_chars: usize,
}

impl Default for SessionLimits {
    fn default() -> Self {
        Self::from(&SessionConfig::default())
    }
}

impl From<&SessionConfig> for SessionLimits {
    fn from(config: &SessionConfig) -> Self {
        Self {
            search_limit: config.search_limit,
            journal_max_chars: config.journal_max_chars.min(config.max_content_chars),
        }
    }
}

/// Build a journal memory, truncating on a char boundary.
pub(crate) fn journal_memory(owner_id: &OwnerId, text: &str, max_chars: usize) -> Memory {
    let content: String = if text.chars().count() > max_chars {
        let mut cut: String = text.chars().take(max_chars.saturating_sub(1)).collect();
        cut.push('…');
        cut
    } else {
        text.to_string()
    };
    Memory::new(owner_id.clone(), content, MemoryKind::Journal)
}

pub struct RefinementSession {
    memories: MemoryStoreApi,
    params: SessionParams,
    limits: SessionLimits,
    stats: SessionStats,
    status: SessionStatus,
    next_seq: u64,
}

impl RefinementSession {
    pub fn new(memories: MemoryStoreApi, params: SessionParams, limits: SessionLimits) -> Self {
        Self {
            memories,
            params,
            limits,
            stats: SessionStats::default(),
            status: SessionStatus::Active,
            next_seq: 1,
        }
    }

    pub fn session_id(&self) -> &SessionId {
        &self.params.session_id
    }

    pub fn owner_id(&self) -> &OwnerId {
        &self.params.owner_id
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn stats(&self) -> SessionStats {
        self.stats
    }

    pub fn pre_session_mass(&self) -> u64 {
        self.params.pre_session_mass
    }

    pub fn threshold(&self) -> Threshold {
        self.params.threshold
    }

    pub fn deadline(&self) -> Option<DateTime<Utc>> {
        self.params.deadline
    }

    /// Whether the deadline has passed.
    pub fn is_expired(&self) -> bool {
        self.params.deadline.map_or(false, |d| Utc::now() >= d)
    }

    /// Run one action and record the outcome in metrics and logs.
    pub async fn dispatch(&mut self, action: Action) -> Result<ActionOutcome> {
        let name = action.name();
        let mutating = action.is_mutating();
        let result = match action {
            Action::Search { query } => self.search(&query).await,
            Action::Update { id, content } => self.update(&id, &content).await,
            Action::Delete { id } => self.delete(&id).await,
            Action::Consolidate { ids, content } => self.consolidate(&ids, &content).await,
            Action::Protect { id } => self.protect(&id).await,
            Action::Unprotect { id } => self.unprotect(&id).await,
            Action::Complete { summary } => self.complete(&summary).await.map(ActionOutcome::Completed),
        };

        match &result {
            Ok(_) => {
                if mutating {
                    METRICS.inc_actions_applied();
                }
                obs::emit_action_applied(
                    self.params.session_id.as_str(),
                    name,
                    mutating.then(|| self.next_seq - 1),
                );
            }
            Err(e) if !e.is_fatal() => {
                METRICS.inc_actions_rejected();
                obs::emit_action_rejected(self.params.session_id.as_str(), name, e.kind(), e);
            }
            Err(_) => {}
        }
        result
    }

    // -- forward actions -----------------------------------------------------

    pub async fn search(&mut self, query: &str) -> Result<ActionOutcome> {
        self.ensure_accepting()?;
        let hits = self
            .memories
            .search(&self.params.owner_id, query, self.limits.search_limit)
            .await?;
        Ok(ActionOutcome::Found {
            hits: hits.into_iter().map(SearchHit::from).collect(),
        })
    }

    #[instrument(skip(self, content), fields(session_id = %self.params.session_id))]
    pub async fn update(&mut self, id: &MemoryId, content: &str) -> Result<ActionOutcome> {
        self.ensure_accepting()?;
        let memory = self.owned_live(id).await?;
        let op = self.memories.update_content(&memory, content)?;
        let payload = UpdatePayload {
            before: memory.content,
            after: content.to_string(),
        };
        self.commit_forward(AuditAction::Update, vec![id.clone()], &payload, vec![op])
            .await?;
        Ok(ActionOutcome::Updated { id: id.clone() })
    }

    #[instrument(skip(self), fields(session_id = %self.params.session_id))]
    pub async fn delete(&mut self, id: &MemoryId) -> Result<ActionOutcome> {
        self.ensure_accepting()?;
        let memory = self.owned_live(id).await?;
        let op = self.memories.tombstone(&memory)?;
        let payload = DeletePayload {
            before: memory.content,
            after: None,
        };
        self.commit_forward(AuditAction::Delete, vec![id.clone()], &payload, vec![op])
            .await?;
        Ok(ActionOutcome::Deleted { id: id.clone() })
    }

    #[instrument(skip(self, content), fields(session_id = %self.params.session_id, sources = ids.len()))]
    pub async fn consolidate(&mut self, ids: &[MemoryId], content: &str) -> Result<ActionOutcome> {
        self.ensure_accepting()?;
        if ids.len() < 2 {
            return Err(CurationError::validation(
                "consolidate needs at least two memory ids",
            ));
        }
        let distinct: BTreeSet<&MemoryId> = ids.iter().collect();
        if distinct.len() != ids.len() {
            return Err(CurationError::validation(
                "consolidate ids must be distinct",
            ));
        }
        self.memories.validate_content(content)?;

        let mut ops = Vec::with_capacity(ids.len() + 1);
        let mut merged = Vec::with_capacity(ids.len());
        for id in ids {
            let source = self.owned_live(id).await?;
            ops.push(self.memories.tombstone(&source)?);
            merged.push(MemorySnapshot {
                id: source.memory_id,
                content: source.content,
            });
        }

        let result = Memory::new(self.params.owner_id.clone(), content, MemoryKind::Core);
        let result_id = result.memory_id.clone();
        ops.insert(0, WriteOp::InsertMemory(result));

        let payload = ConsolidatePayload {
            merged,
            result: MemorySnapshot {
                id: result_id.clone(),
                content: content.to_string(),
            },
        };
        let mut subject = ids.to_vec();
        subject.push(result_id.clone());
        self.commit_forward(AuditAction::Consolidate, subject, &payload, ops)
            .await?;

        Ok(ActionOutcome::Consolidated {
            id: result_id,
            merged: ids.to_vec(),
        })
    }

    #[instrument(skip(self), fields(session_id = %self.params.session_id))]
    pub async fn protect(&mut self, id: &MemoryId) -> Result<ActionOutcome> {
        self.ensure_accepting()?;
        let memory = self.owned_live(id).await?;
        if memory.constitutional {
            return Err(CurationError::Validation(format!(
                "memory {id} is already protected"
            )));
        }
        let op = self.memories.protect(&memory);
        self.commit_forward(AuditAction::Protect, vec![id.clone()], &FlagPayload {}, vec![op])
            .await?;
        Ok(ActionOutcome::Protected { id: id.clone() })
    }

    #[instrument(skip(self), fields(session_id = %self.params.session_id))]
    pub async fn unprotect(&mut self, id: &MemoryId) -> Result<ActionOutcome> {
        self.ensure_accepting()?;
        let memory = self.owned_live(id).await?;
        if !memory.constitutional {
            return Err(CurationError::Validation(format!(
                "memory {id} is not protected"
            )));
        }
        let op = self.memories.unprotect(&memory);
        self.commit_forward(AuditAction::Unprotect, vec![id.clone()], &FlagPayload {}, vec![op])
            .await?;
        Ok(ActionOutcome::Unprotected { id: id.clone() })
    }

    // -- completion ----------------------------------------------------------

    /// Evaluate the breaker, then commit or roll back.
    ///
    /// Accepted after the deadline. A rollback failure is returned as
    /// `RollbackFailed` and leaves the session closed.
    #[instrument(skip(self, summary), fields(session_id = %self.params.session_id))]
    pub async fn complete(&mut self, summary: &str) -> Result<SessionOutcome> {
        self.ensure_open()?;
        let summary = summary.trim();
        if summary.is_empty() {
            return Err(CurationError::validation("complete requires a summary"));
        }

        self.status = SessionStatus::Completing;
        let post = match self
            .memories
            .usage(&self.params.owner_id, MemoryKind::Core)
            .await
        {
            Ok(post) => post,
            Err(e) => {
                self.status = SessionStatus::Active;
                return Err(e);
            }
        };

        let verdict = breaker::evaluate(self.params.pre_session_mass, post, self.params.threshold);
        obs::emit_breaker_evaluated(
            self.params.session_id.as_str(),
            self.params.pre_session_mass,
            post,
            verdict.ratio(),
            verdict.is_tripped(),
        );

        if verdict.is_tripped() {
            METRICS.inc_breaker_trips();
            self.rollback(summary, post, verdict.ratio()).await
        } else {
            self.commit(summary, post, verdict.ratio()).await
        }
    }

    async fn commit(&mut self, summary: &str, post: u64, ratio: Option<f64>) -> Result<SessionOutcome> {
        let sid = self.params.session_id.clone();
        let payload = CompletePayload {
            session_id: sid.clone(),
            summary: summary.to_string(),
            stats: self.stats,
        };
        let entry = build_entry(
            &sid,
            &self.params.owner_id,
            self.next_seq,
            AuditAction::SessionComplete,
            Vec::new(),
            &payload,
        )?;
        let journal = journal_memory(
            &self.params.owner_id,
            &format!("Memory refinement session {sid} committed: {summary} ({})", self.stats),
            self.limits.journal_max_chars,
        );
        let batch = WriteBatch::new()
            .with(WriteOp::AppendAudit(entry))
            .with(WriteOp::InsertMemory(journal))
            .with(WriteOp::StampRefined {
                owner_id: self.params.owner_id.clone(),
                at: Utc::now(),
            });

        if let Err(e) = self.memories.store().apply_batch(batch).await {
            self.status = SessionStatus::Active;
            return Err(e.into());
        }

        self.next_seq += 1;
        self.status = SessionStatus::Committed;
        METRICS.inc_sessions_committed();
        obs::emit_session_committed(sid.as_str(), &self.stats);

        Ok(self.outcome(post, ratio, summary.to_string(), 0))
    }

    async fn rollback(&mut self, summary: &str, post: u64, ratio: Option<f64>) -> Result<SessionOutcome> {
        let sid = self.params.session_id.clone();
        let pre = self.params.pre_session_mass;
        let threshold = self.params.threshold.value();
        let reason = format!(
            "net core memory fell to {:.0}% of its pre-session size ({post} of {pre} tokens), \
             below the {:.0}% threshold; all session changes were reverted",
            ratio.unwrap_or(0.0) * 100.0,
            threshold * 100.0,
        );

        match self.try_rollback(summary, post, &reason).await {
            Ok(reverted) => {
                self.status = SessionStatus::RolledBack;
                METRICS.inc_sessions_rolled_back();
                obs::emit_session_rolled_back(sid.as_str(), reverted, &reason);
                Ok(self.outcome(post, ratio, reason, reverted))
            }
            Err(e) => {
                self.status = SessionStatus::RollbackFailed;
                METRICS.inc_rollback_failures();
                obs::emit_rollback_failed(sid.as_str(), &e);
                Err(CurationError::RollbackFailed {
                    session_id: sid.to_string(),
                    reason: e.to_string(),
                })
            }
        }
    }

    async fn try_rollback(&mut self, summary: &str, post: u64, reason: &str) -> Result<usize> {
        let sid = &self.params.session_id;
        let entries: Vec<AuditEntry> = self
            .memories
            .store()
            .for_session(sid)
            .await?
            .into_iter()
            .filter(|e| e.owner_id == self.params.owner_id)
            .collect();

        let payload = RollbackPayload {
            pre_session_mass: Some(self.params.pre_session_mass),
            post_session_mass: post,
            threshold: self.params.threshold.value(),
            stats: self.stats,
            reason: reason.to_string(),
        };
        let journal = journal_memory(
            &self.params.owner_id,
            &format!(
                "Memory refinement session {sid} was rolled back: {reason}. Driver summary: {summary}"
            ),
            self.limits.journal_max_chars,
        );
        let record = RollbackRecord {
            session_id: sid.clone(),
            owner_id: self.params.owner_id.clone(),
            seq: self.next_seq,
            payload,
            journal,
        };

        let batch = compensation::rollback_batch(&entries, record)?;
        self.memories.store().apply_batch(batch).await?;
        self.next_seq += 1;
        Ok(entries.len())
    }

    // -- helpers -------------------------------------------------------------

    fn outcome(&self, post: u64, ratio: Option<f64>, message: String, reverted: usize) -> SessionOutcome {
        SessionOutcome {
            session_id: self.params.session_id.clone(),
            status: self.status,
            stats: self.stats,
            pre_session_mass: self.params.pre_session_mass,
            post_session_mass: post,
            ratio,
            threshold: self.params.threshold.value(),
            message,
            reverted_entries: reverted,
        }
    }

    fn ensure_open(&self) -> Result<()> {
        if self.status != SessionStatus::Active {
            return Err(CurationError::SessionClosed {
                session_id: self.params.session_id.to_string(),
                status: self.status.to_string(),
            });
        }
        Ok(())
    }

    fn ensure_accepting(&self) -> Result<()> {
        self.ensure_open()?;
        if self.is_expired() {
            return Err(CurationError::DeadlineExceeded {
                session_id: self.params.session_id.to_string(),
            });
        }
        Ok(())
    }

    /// Owned, non-tombstoned memory or `NotFound`.
    async fn owned_live(&self, id: &MemoryId) -> Result<Memory> {
        let memory = self.memories.get_owned(&self.params.owner_id, id).await?;
        if memory.tombstoned {
            return Err(CurationError::NotFound {
                memory_id: id.to_string(),
            });
        }
        Ok(memory)
    }

    /// Commit forward ops together with their single audit entry.
    async fn commit_forward<P: Serialize>(
        &mut self,
        action: AuditAction,
        subject_ref: Vec<MemoryId>,
        payload: &P,
        ops: Vec<WriteOp>,
    ) -> Result<()> {
        let entry = build_entry(
            &self.params.session_id,
            &self.params.owner_id,
            self.next_seq,
            action,
            subject_ref,
            payload,
        )?;
        let mut batch = WriteBatch::from(ops);
        batch.push(WriteOp::AppendAudit(entry));
        self.memories.store().apply_batch(batch).await?;

        self.next_seq += 1;
        self.stats.record(action);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn journal_is_truncated_on_char_boundary() {
        let owner = OwnerId::from("o");
        let m = journal_memory(&owner, &"ö".repeat(50), 10);
        assert_eq!(m.content.chars().count(), 10);
        assert!(m.content.ends_with('…'));
        assert_eq!(m.kind, MemoryKind::Journal);

        let short = journal_memory(&owner, "fine", 10);
        assert_eq!(short.content, "fine");
    }

    #[test]
    fn stats_rebuild_from_entries() {
        let owner = OwnerId::from("o");
        let sid = SessionId::from("s");
        let mk = |seq, action| {
            AuditEntry::new(sid.clone(), owner.clone(), seq, action, vec![], serde_json::json!({}))
        };
        let stats = SessionStats::from_entries(&[
            mk(3, AuditAction::Delete),
            mk(2, AuditAction::Delete),
            mk(1, AuditAction::Consolidate),
        ]);
        assert_eq!(stats.deleted, 2);
        assert_eq!(stats.consolidated, 1);
        assert_eq!(stats.total(), 3);
    }

    #[test]
    fn status_terminality() {
        assert!(!SessionStatus::Active.is_terminal());
        assert!(!SessionStatus::Completing.is_terminal());
        assert!(SessionStatus::RolledBack.is_terminal());
        assert!(SessionStatus::RollbackFailed.is_terminal());
        assert_eq!(
            serde_json::to_value(SessionStatus::RolledBack).unwrap(),
            serde_json::json!("rolled_back")
        );
    }
}
