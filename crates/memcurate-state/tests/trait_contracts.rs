//! Trait contract tests for MemoryStore, AuditTrail, OwnerSettingsStore and
//! CurationStore.
//!
//! Every contract runs against the in-memory fake and against SurrealDB in
//! `mem://` mode. Any conforming implementation must pass these.

use chrono::Utc;
use memcurate_state::fakes::MemoryCurationStore;
use memcurate_state::storage_traits::*;
use memcurate_state::{StorageError, SurrealCurationStore};
use serde_json::json;

fn owner(name: &str) -> OwnerId {
    OwnerId::from(name)
}

async fn seed(store: &dyn CurationStore, owner_id: &OwnerId, content: &str) -> Memory {
    store
        .insert_memory(Memory::new(owner_id.clone(), content, MemoryKind::Core))
        .await
        .expect("insert_memory")
}

fn entry(session: &SessionId, owner_id: &OwnerId, seq: u64, action: AuditAction) -> AuditEntry {
    AuditEntry::new(
        session.clone(),
        owner_id.clone(),
        seq,
        action,
        vec![MemoryId::from(format!("m{seq}"))],
        json!({ "before": format!("before-{seq}"), "after": null }),
    )
}

// ===========================================================================
// Contracts
// ===========================================================================

async fn insert_then_get_round_trips(store: &dyn CurationStore) {
    let o = owner("alice");
    let mut memory = Memory::new(o.clone(), "Prefers tea over coffee ☕ (naïve)", MemoryKind::Journal);
    memory.constitutional = true;
    store.insert_memory(memory.clone()).await.unwrap();

    let fetched = store.get_memory(&memory.memory_id).await.unwrap();
    assert_eq!(fetched.content, memory.content);
    assert_eq!(fetched.kind, MemoryKind::Journal);
    assert!(fetched.constitutional);
    assert!(!fetched.tombstoned);
    assert_eq!(fetched.owner_id, o);
}

async fn get_unknown_memory_is_not_found(store: &dyn CurationStore) {
    let err = store.get_memory(&MemoryId::from("nope")).await.unwrap_err();
    assert!(matches!(err, StorageError::MemoryNotFound { .. }));
}

async fn duplicate_insert_is_rejected(store: &dyn CurationStore) {
    let m = seed(store, &owner("alice"), "once").await;
    let err = store.insert_memory(m).await.unwrap_err();
    assert!(matches!(err, StorageError::DuplicateMemory { .. }));
}

async fn list_is_owner_scoped_and_filtered(store: &dyn CurationStore) {
    let a = owner("alice");
    let b = owner("bob");
    let a1 = seed(store, &a, "a1").await;
    seed(store, &a, "a2").await;
    seed(store, &b, "b1").await;
    store
        .insert_memory(Memory::new(a.clone(), "journal", MemoryKind::Journal))
        .await
        .unwrap();

    store
        .apply_batch(WriteBatch::new().with(WriteOp::SetTombstone {
            memory_id: a1.memory_id.clone(),
            tombstoned: true,
        }))
        .await
        .unwrap();

    let live_core = store
        .list_memories(&a, MemoryFilter::live(MemoryKind::Core))
        .await
        .unwrap();
    assert_eq!(live_core.len(), 1);
    assert_eq!(live_core[0].content, "a2");

    let everything = store
        .list_memories(
            &a,
            MemoryFilter {
                kind: None,
                include_tombstoned: true,
            },
        )
        .await
        .unwrap();
    assert_eq!(everything.len(), 3);
    assert!(everything.iter().all(|m| m.owner_id == a));
}

async fn batch_applies_every_op(store: &dyn CurationStore) {
    let o = owner("alice");
    let m = seed(store, &o, "original").await;
    let session = SessionId::new();
    let fresh = Memory::new(o.clone(), "merged", MemoryKind::Core);

    let batch = WriteBatch::new()
        .with(WriteOp::SetContent {
            memory_id: m.memory_id.clone(),
            content: "rewritten".into(),
        })
        .with(WriteOp::SetConstitutional {
            memory_id: m.memory_id.clone(),
            constitutional: true,
        })
        .with(WriteOp::InsertMemory(fresh.clone()))
        .with(WriteOp::AppendAudit(entry(&session, &o, 1, AuditAction::Update)))
        .with(WriteOp::StampRefined {
            owner_id: o.clone(),
            at: Utc::now(),
        });
    store.apply_batch(batch).await.unwrap();

    let updated = store.get_memory(&m.memory_id).await.unwrap();
    assert_eq!(updated.content, "rewritten");
    assert!(updated.constitutional);
    assert_eq!(store.get_memory(&fresh.memory_id).await.unwrap().content, "merged");
    assert_eq!(store.for_session(&session).await.unwrap().len(), 1);
    assert!(store.owner_settings(&o).await.unwrap().last_refined_at.is_some());
}

async fn batch_with_missing_memory_applies_nothing(store: &dyn CurationStore) {
    let o = owner("alice");
    let m = seed(store, &o, "untouched").await;
    let session = SessionId::new();

    let batch = WriteBatch::new()
        .with(WriteOp::SetContent {
            memory_id: m.memory_id.clone(),
            content: "changed".into(),
        })
        .with(WriteOp::AppendAudit(entry(&session, &o, 1, AuditAction::Update)))
        .with(WriteOp::SetTombstone {
            memory_id: MemoryId::from("ghost"),
            tombstoned: false,
        })
        .with(WriteOp::StampRefined {
            owner_id: o.clone(),
            at: Utc::now(),
        });

    let err = store.apply_batch(batch).await.unwrap_err();
    assert!(matches!(err, StorageError::BatchAborted { .. }));

    assert_eq!(store.get_memory(&m.memory_id).await.unwrap().content, "untouched");
    assert!(store.for_session(&session).await.unwrap().is_empty());
    assert!(store.owner_settings(&o).await.unwrap().last_refined_at.is_none());
}

async fn tombstone_round_trip(store: &dyn CurationStore) {
    let m = seed(store, &owner("alice"), "soft delete me").await;
    for flag in [true, true, false, false] {
        store
            .apply_batch(WriteBatch::new().with(WriteOp::SetTombstone {
                memory_id: m.memory_id.clone(),
                tombstoned: flag,
            }))
            .await
            .unwrap();
        let now = store.get_memory(&m.memory_id).await.unwrap();
        assert_eq!(now.tombstoned, flag);
        assert_eq!(now.tombstoned_at.is_some(), flag);
        assert_eq!(now.content, "soft delete me");
    }
}

async fn for_session_is_most_recent_first(store: &dyn CurationStore) {
    let o = owner("alice");
    let session = SessionId::new();
    let other = SessionId::new();
    for seq in 1..=3 {
        store
            .append(entry(&session, &o, seq, AuditAction::Delete))
            .await
            .unwrap();
    }
    store
        .append(entry(&other, &o, 1, AuditAction::Protect))
        .await
        .unwrap();

    let entries = store.for_session(&session).await.unwrap();
    let seqs: Vec<u64> = entries.iter().map(|e| e.seq).collect();
    assert_eq!(seqs, vec![3, 2, 1]);
    assert!(entries.iter().all(|e| e.verify()));

    assert_eq!(store.for_owner(&o).await.unwrap().len(), 4);
    assert!(store.for_owner(&owner("bob")).await.unwrap().is_empty());
}

async fn owner_settings_default_and_update(store: &dyn CurationStore) {
    let o = owner("carol");
    let unset = store.owner_settings(&o).await.unwrap();
    assert_eq!(unset.threshold, None);
    assert_eq!(unset.last_refined_at, None);

    let t = Threshold::new(0.9).unwrap();
    let saved = store.set_threshold(&o, t).await.unwrap();
    assert_eq!(saved.threshold, Some(t));

    store
        .apply_batch(WriteBatch::new().with(WriteOp::StampRefined {
            owner_id: o.clone(),
            at: Utc::now(),
        }))
        .await
        .unwrap();

    let after = store.owner_settings(&o).await.unwrap();
    assert_eq!(after.threshold, Some(t));
    assert!(after.last_refined_at.is_some());
}

// ===========================================================================
// Backends
// ===========================================================================

macro_rules! contract_suite {
    ($suite:ident, $make:expr) => {
        mod $suite {
            use super::*;

            #[tokio::test]
            async fn insert_then_get() {
                let store = $make;
                insert_then_get_round_trips(&store).await;
            }

            #[tokio::test]
            async fn get_unknown() {
                let store = $make;
                get_unknown_memory_is_not_found(&store).await;
            }

            #[tokio::test]
            async fn duplicate_insert() {
                let store = $make;
                duplicate_insert_is_rejected(&store).await;
            }

            #[tokio::test]
            async fn list_scoping() {
                let store = $make;
                list_is_owner_scoped_and_filtered(&store).await;
            }

            #[tokio::test]
            async fn batch_all() {
                let store = $make;
                batch_applies_every_op(&store).await;
            }

            #[tokio::test]
            async fn batch_none() {
                let store = $make;
                batch_with_missing_memory_applies_nothing(&store).await;
            }

            #[tokio::test]
            async fn tombstone_flips() {
                let store = $make;
                tombstone_round_trip(&store).await;
            }

            #[tokio::test]
            async fn audit_order() {
                let store = $make;
                for_session_is_most_recent_first(&store).await;
            }

            #[tokio::test]
            async fn owner_settings() {
                let store = $make;
                owner_settings_default_and_update(&store).await;
            }
        }
    };
}

contract_suite!(fake_store, MemoryCurationStore::new());
contract_suite!(
    surreal_store,
    SurrealCurationStore::in_memory()
        .await
        .expect("in_memory() failed")
);
