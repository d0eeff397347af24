//! Compensating writes derived from a session's audit trail.
//!
//! Inverses are computed from entry payloads only. The whole unwind plus the
//! rollback's own audit entry, journal memory and refinement stamp goes into
//! one [`WriteBatch`].

use chrono::Utc;
use memcurate_state::{
    AuditAction, AuditEntry, Memory, MemoryId, OwnerId, SessionId, WriteBatch, WriteOp,
};

use crate::audit::{build_entry, decode_payload, ConsolidatePayload, DeletePayload, RollbackPayload, UpdatePayload};
use crate::error::{CurationError, Result};

/// Inverse ops for one forward entry.
pub fn inverse_ops(entry: &AuditEntry) -> Result<Vec<WriteOp>> {
    if !entry.verify() {
        return Err(corrupt(entry, "payload digest mismatch"));
    }

    let ops = match entry.action {
        AuditAction::Delete => {
            // Content was never altered; validating the payload shape is enough.
            let _: DeletePayload = decode_payload(entry)?;
            vec![WriteOp::SetTombstone {
                memory_id: single_subject(entry)?,
                tombstoned: false,
            }]
        }
        AuditAction::Update => {
            let payload: UpdatePayload = decode_payload(entry)?;
            vec![WriteOp::SetContent {
                memory_id: single_subject(entry)?,
                content: payload.before,
            }]
        }
        AuditAction::Consolidate => {
            let payload: ConsolidatePayload = decode_payload(entry)?;
            let mut ops = Vec::with_capacity(payload.merged.len() + 1);
            ops.push(WriteOp::SetTombstone {
                memory_id: payload.result.id,
                tombstoned: true,
            });
            ops.extend(payload.merged.into_iter().map(|source| WriteOp::SetTombstone {
                memory_id: source.id,
                tombstoned: false,
            }));
            ops
        }
        AuditAction::Protect => vec![WriteOp::SetConstitutional {
            memory_id: single_subject(entry)?,
            constitutional: false,
        }],
        AuditAction::Unprotect => vec![WriteOp::SetConstitutional {
            memory_id: single_subject(entry)?,
            constitutional: true,
        }],
        AuditAction::SessionComplete | AuditAction::SessionRollback => {
            return Err(corrupt(entry, "session is already closed"));
        }
    };
    Ok(ops)
}

/// Inverse ops for a whole trail given most-recent-first.
pub fn plan_unwind(entries: &[AuditEntry]) -> Result<Vec<WriteOp>> {
    let mut ops = Vec::new();
    let mut last_seq = None;
    for entry in entries {
        if let Some(prev) = last_seq {
            if entry.seq >= prev {
                return Err(corrupt(entry, "trail is not in most-recent-first order"));
            }
        }
        last_seq = Some(entry.seq);
        ops.extend(inverse_ops(entry)?);
    }
    Ok(ops)
}

/// Everything a rollback writes besides the unwind itself.
pub struct RollbackRecord {
    pub session_id: SessionId,
    pub owner_id: OwnerId,
    /// Sequence number for the `session_rollback` entry
    pub seq: u64,
    pub payload: RollbackPayload,
    pub journal: Memory,
}

/// Unwind plus `session_rollback` entry, journal memory and stamp, in that order.
pub fn rollback_batch(entries: &[AuditEntry], record: RollbackRecord) -> Result<WriteBatch> {
    let mut batch = WriteBatch::new();
    batch.extend(plan_unwind(entries)?);

    let subject: Vec<MemoryId> = Vec::new();
    let entry = build_entry(
        &record.session_id,
        &record.owner_id,
        record.seq,
        AuditAction::SessionRollback,
        subject,
        &record.payload,
    )?;
    batch
        .push(WriteOp::AppendAudit(entry))
        .push(WriteOp::InsertMemory(record.journal))
        .push(WriteOp::StampRefined {
            owner_id: record.owner_id,
            at: Utc::now(),
        });
    Ok(batch)
}

fn single_subject(entry: &AuditEntry) -> Result<MemoryId> {
    match entry.subject_ref.as_slice() {
        [id] => Ok(id.clone()),
        other => Err(corrupt(
            entry,
            &format!("expected one subject, found {}", other.len()),
        )),
    }
}

fn corrupt(entry: &AuditEntry, reason: &str) -> CurationError {
    CurationError::CorruptAuditTrail {
        entry_id: entry.entry_id.to_string(),
        reason: reason.to_string(),
    }
}
