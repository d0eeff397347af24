//! Typed audit payloads and the audit trail API.
//!
//! Each forward payload carries exactly the state its inverse needs, so a
//! rollback never has to look outside the entry.

use std::collections::BTreeSet;
use std::sync::Arc;

use memcurate_state::{
    AuditAction, AuditEntry, CurationStore, MemoryId, OwnerId, SessionId,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{CurationError, Result};
use crate::session::SessionStats;

/// `update`: `{before, after}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdatePayload {
    pub before: String,
    pub after: String,
}

/// `delete`: `{before: content, after: null}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeletePayload {
    pub before: String,
    #[serde(default)]
    pub after: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemorySnapshot {
    pub id: MemoryId,
    pub content: String,
}

/// `consolidate`: `{merged: [{id, content}, ...], result: {id, content}}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsolidatePayload {
    pub merged: Vec<MemorySnapshot>,
    pub result: MemorySnapshot,
}

/// `protect` / `unprotect`: `{}`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FlagPayload {}

/// `session_complete`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletePayload {
    pub session_id: SessionId,
    pub summary: String,
    pub stats: SessionStats,
}

/// `session_rollback`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RollbackPayload {
    /// `None` when a recovered session lost its snapshot.
    pub pre_session_mass: Option<u64>,
    pub post_session_mass: u64,
    pub threshold: f64,
    pub stats: SessionStats,
    pub reason: String,
}

/// Build an entry with its digest from a typed payload.
pub fn build_entry<P: Serialize>(
    session_id: &SessionId,
    owner_id: &OwnerId,
    seq: u64,
    action: AuditAction,
    subject_ref: Vec<MemoryId>,
    payload: &P,
) -> Result<AuditEntry> {
    Ok(AuditEntry::new(
        session_id.clone(),
        owner_id.clone(),
        seq,
        action,
        subject_ref,
        serde_json::to_value(payload)?,
    ))
}

/// Decode an entry's payload, failing as a corrupt trail on shape mismatch.
pub fn decode_payload<P: DeserializeOwned>(entry: &AuditEntry) -> Result<P> {
    serde_json::from_value(entry.payload.clone()).map_err(|e| CurationError::CorruptAuditTrail {
        entry_id: entry.entry_id.to_string(),
        reason: format!("{} payload: {e}", entry.action),
    })
}

pub struct AuditTrailApi {
    store: Arc<dyn CurationStore>,
}

impl AuditTrailApi {
    pub fn new(store: Arc<dyn CurationStore>) -> Self {
        Self { store }
    }

    /// Sequence number the next entry of `session_id` should use.
    pub async fn next_seq(&self, session_id: &SessionId) -> Result<u64> {
        let entries = self.store.for_session(session_id).await?;
        Ok(entries.first().map_or(1, |e| e.seq + 1))
    }

    /// Append one entry at the end of the session's trail.
    pub async fn record(
        &self,
        session_id: &SessionId,
        owner_id: &OwnerId,
        action: AuditAction,
        subject_ref: Vec<MemoryId>,
        payload: serde_json::Value,
    ) -> Result<AuditEntry> {
        let seq = self.next_seq(session_id).await?;
        let entry = AuditEntry::new(
            session_id.clone(),
            owner_id.clone(),
            seq,
            action,
            subject_ref,
            payload,
        );
        self.store.append(entry.clone()).await?;
        Ok(entry)
    }

    /// Most recent first.
    pub async fn for_session(&self, session_id: &SessionId) -> Result<Vec<AuditEntry>> {
        Ok(self.store.for_session(session_id).await?)
    }

    pub async fn for_owner(&self, owner_id: &OwnerId) -> Result<Vec<AuditEntry>> {
        Ok(self.store.for_owner(owner_id).await?)
    }

    /// Sessions of `owner_id` with forward entries but no terminal entry.
    pub async fn open_sessions(&self, owner_id: &OwnerId) -> Result<Vec<SessionId>> {
        let entries = self.store.for_owner(owner_id).await?;
        let closed: BTreeSet<&SessionId> = entries
            .iter()
            .filter(|e| e.action.is_terminal())
            .map(|e| &e.session_id)
            .collect();

        let mut open = Vec::new();
        for entry in &entries {
            if !closed.contains(&entry.session_id) && !open.contains(&entry.session_id) {
                open.push(entry.session_id.clone());
            }
        }
        Ok(open)
    }
}
