//! Structured observability hooks for refinement session lifecycle events.
//!
//! This module provides:
//! - Session-scoped tracing spans via the `SessionSpan` RAII guard
//! - Emission functions for session start, applied and rejected actions,
//!   breaker evaluation, commit, rollback and rollback failure
//!
//! Events are emitted at `info!` level except rejections (`warn!`) and
//! rollback failures (`error!`).

use tracing::{error, info, warn};

/// RAII guard that enters a session-scoped tracing span.
///
/// # Example
///
/// ```ignore
/// let _span = SessionSpan::enter("3f1c...", "alice");
/// // tracing calls now carry session_id and owner_id
/// ```
pub struct SessionSpan {
    _span: tracing::span::EnteredSpan,
}

impl SessionSpan {
    pub fn enter(session_id: &str, owner_id: &str) -> Self {
        let span = tracing::info_span!("memcurate.session", session_id = %session_id, owner_id = %owner_id);
        Self {
            _span: span.entered(),
        }
    }
}

pub fn emit_session_started(session_id: &str, owner_id: &str, pre_session_mass: u64, threshold: f64) {
    info!(
        event = "session.started",
        session_id = %session_id,
        owner_id = %owner_id,
        pre_session_mass = pre_session_mass,
        threshold = threshold,
    );
}

pub fn emit_action_applied(session_id: &str, action: &str, seq: Option<u64>) {
    info!(event = "session.action_applied", session_id = %session_id, action = %action, seq = ?seq);
}

pub fn emit_action_rejected(session_id: &str, action: &str, kind: &str, error: &dyn std::fmt::Display) {
    warn!(
        event = "session.action_rejected",
        session_id = %session_id,
        action = %action,
        kind = %kind,
        error = %error,
    );
}

/// `ratio` is `None` when the breaker was skipped (empty pre-session mass).
pub fn emit_breaker_evaluated(
    session_id: &str,
    pre_session_mass: u64,
    post_session_mass: u64,
    ratio: Option<f64>,
    tripped: bool,
) {
    info!(
        event = "breaker.evaluated",
        session_id = %session_id,
        pre_session_mass = pre_session_mass,
        post_session_mass = post_session_mass,
        ratio = ?ratio,
        tripped = tripped,
    );
}

pub fn emit_session_committed(session_id: &str, stats: &dyn std::fmt::Display) {
    info!(event = "session.committed", session_id = %session_id, stats = %stats);
}

pub fn emit_session_rolled_back(session_id: &str, reverted_entries: usize, reason: &str) {
    info!(
        event = "session.rolled_back",
        session_id = %session_id,
        reverted_entries = reverted_entries,
        reason = %reason,
    );
}

/// Rollback transaction failed; needs operator attention.
pub fn emit_rollback_failed(session_id: &str, error: &dyn std::fmt::Display) {
    error!(event = "session.rollback_failed", session_id = %session_id, error = %error);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emitters_do_not_panic_without_subscriber() {
        let _span = SessionSpan::enter("s-1", "alice");
        emit_session_started("s-1", "alice", 100, 0.75);
        emit_action_applied("s-1", "delete", Some(1));
        emit_action_rejected("s-1", "consolidate", "validation", &"needs two ids");
        emit_breaker_evaluated("s-1", 100, 10, Some(0.1), true);
        emit_session_rolled_back("s-1", 1, "below threshold");
        emit_rollback_failed("s-1", &"backend down");
    }
}
