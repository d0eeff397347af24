//! Session creation, owner thresholds, deadlines and recovery of open sessions.

use std::sync::Arc;

use chrono::{Duration, Utc};
use memcurate_core::{
    CurationConfig, CurationError, ReconcileOutcome, RefinementScheduler, RefinementSession,
    SessionLimits, SessionParams, SessionStatus, Threshold,
};
use memcurate_state::fakes::MemoryCurationStore;
use memcurate_state::{
    AuditAction, AuditTrail, CurationStore, Memory, MemoryKind, MemoryStore, OwnerId, SessionId,
};

fn owner() -> OwnerId {
    OwnerId::from("owner-a")
}

fn scheduler_with(config: CurationConfig) -> (Arc<MemoryCurationStore>, RefinementScheduler) {
    let fake = Arc::new(MemoryCurationStore::new());
    let store: Arc<dyn CurationStore> = fake.clone();
    (fake, RefinementScheduler::new(store, config))
}

#[tokio::test]
async fn begin_snapshots_live_core_mass_only() {
    let (fake, scheduler) = scheduler_with(CurationConfig::default());
    fake.insert_memory(Memory::new(owner(), "c".repeat(40), MemoryKind::Core))
        .await
        .unwrap();
    fake.insert_memory(Memory::new(owner(), "j".repeat(400), MemoryKind::Journal))
        .await
        .unwrap();
    let mut gone = Memory::new(owner(), "t".repeat(400), MemoryKind::Core);
    gone.tombstoned = true;
    fake.insert_memory(gone).await.unwrap();
    fake.insert_memory(Memory::new(OwnerId::from("owner-b"), "o".repeat(400), MemoryKind::Core))
        .await
        .unwrap();

    let session = scheduler.begin(&owner()).await.unwrap();
    assert_eq!(session.pre_session_mass(), 10);
    assert_eq!(session.threshold(), Threshold::DEFAULT);
    assert_eq!(session.status(), SessionStatus::Active);
    assert!(session.deadline().is_some());
}

#[tokio::test]
async fn owner_threshold_overrides_config_default() {
    let mut config = CurationConfig::default();
    config.session.default_threshold = 0.5;
    let (_fake, scheduler) = scheduler_with(config);

    assert_eq!(scheduler.threshold(&owner()).await.unwrap().value(), 0.5);
    scheduler.set_threshold(&owner(), 0.9).await.unwrap();
    assert_eq!(scheduler.threshold(&owner()).await.unwrap().value(), 0.9);
    assert_eq!(
        scheduler
            .threshold(&OwnerId::from("owner-b"))
            .await
            .unwrap()
            .value(),
        0.5
    );

    let session = scheduler.begin(&owner()).await.unwrap();
    assert_eq!(session.threshold().value(), 0.9);
}

#[tokio::test]
async fn out_of_range_threshold_is_rejected() {
    let (_fake, scheduler) = scheduler_with(CurationConfig::default());
    for bad in [0.0, -0.1, 1.01, f64::NAN] {
        let err = scheduler.set_threshold(&owner(), bad).await.unwrap_err();
        assert_eq!(err.kind(), "validation", "threshold {bad} should be refused");
    }
    let settings = scheduler.owner_settings(&owner()).await.unwrap();
    assert!(settings.threshold.is_none());
}

#[tokio::test]
async fn caller_supplied_session_id_must_be_fresh() {
    let (fake, scheduler) = scheduler_with(CurationConfig::default());
    let id = fake
        .insert_memory(Memory::new(owner(), "a fact", MemoryKind::Core))
        .await
        .unwrap()
        .memory_id;

    let sid = SessionId::from("run-42");
    let mut session = scheduler.begin_with_id(&owner(), sid.clone()).await.unwrap();
    session.delete(&id).await.unwrap();

    let err = scheduler
        .begin_with_id(&owner(), sid)
        .await
        .err()
        .unwrap();
    assert_eq!(err.kind(), "validation");
    assert!(scheduler
        .begin_with_id(&owner(), SessionId::from(" "))
        .await
        .is_err());
}

#[tokio::test]
async fn zero_ceiling_disables_the_deadline() {
    let mut config = CurationConfig::default();
    config.session.max_session_secs = 0;
    let (_fake, scheduler) = scheduler_with(config);
    let session = scheduler.begin(&owner()).await.unwrap();
    assert!(session.deadline().is_none());
    assert!(!session.is_expired());
}

#[tokio::test]
async fn expired_session_only_accepts_complete() {
    let (fake, scheduler) = scheduler_with(CurationConfig::default());
    let id = fake
        .insert_memory(Memory::new(owner(), "a fact", MemoryKind::Core))
        .await
        .unwrap()
        .memory_id;

    let params = SessionParams {
        session_id: SessionId::new(),
        owner_id: owner(),
        pre_session_mass: 2,
        threshold: Threshold::DEFAULT,
        deadline: Some(Utc::now() - Duration::seconds(1)),
    };
    let mut session = RefinementSession::new(scheduler.memories(), params, SessionLimits::default());
    assert!(session.is_expired());

    assert!(matches!(
        session.delete(&id).await,
        Err(CurationError::DeadlineExceeded { .. })
    ));
    assert_eq!(fake.audit_len(), 0);

    let outcome = scheduler.finish_expired(&mut session).await.unwrap().unwrap();
    assert_eq!(outcome.status, SessionStatus::Committed);
    assert!(scheduler.finish_expired(&mut session).await.unwrap().is_none());
}

#[tokio::test]
async fn abandoned_session_is_found_and_reconciled() {
    let (fake, scheduler) = scheduler_with(CurationConfig::default());
    let a = fake
        .insert_memory(Memory::new(owner(), "a".repeat(400), MemoryKind::Core))
        .await
        .unwrap()
        .memory_id;
    let b = fake
        .insert_memory(Memory::new(owner(), "b".repeat(400), MemoryKind::Core))
        .await
        .unwrap()
        .memory_id;

    let sid = {
        let mut session = scheduler.begin(&owner()).await.unwrap();
        session.update(&a, "short").await.unwrap();
        session.protect(&b).await.unwrap();
        session.session_id().clone()
        // dropped without complete
    };

    let mut finished = scheduler.begin(&owner()).await.unwrap();
    finished.complete("nothing changed").await.unwrap();

    assert_eq!(scheduler.open_sessions(&owner()).await.unwrap(), vec![sid.clone()]);

    let outcome = scheduler.reconcile(&owner(), &sid).await.unwrap();
    assert!(matches!(outcome, ReconcileOutcome::RolledBack { reverted_entries: 2, .. }));
    assert_eq!(fake.get_memory(&a).await.unwrap().content, "a".repeat(400));
    assert!(!fake.get_memory(&b).await.unwrap().constitutional);

    let trail = fake.for_session(&sid).await.unwrap();
    assert_eq!(trail[0].action, AuditAction::SessionRollback);
    assert_eq!(trail[0].seq, 3);
    assert!(scheduler.open_sessions(&owner()).await.unwrap().is_empty());
}

#[tokio::test]
async fn reconcile_refuses_unknown_or_foreign_sessions() {
    let (fake, scheduler) = scheduler_with(CurationConfig::default());
    let id = fake
        .insert_memory(Memory::new(owner(), "a fact", MemoryKind::Core))
        .await
        .unwrap()
        .memory_id;
    let mut session = scheduler.begin(&owner()).await.unwrap();
    session.delete(&id).await.unwrap();

    let err = scheduler
        .reconcile(&OwnerId::from("owner-b"), session.session_id())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "validation");
    let err = scheduler
        .reconcile(&owner(), &SessionId::from("never-ran"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "validation");
    assert_eq!(fake.audit_len(), 1);
}

#[tokio::test]
async fn reconcile_leaves_committed_sessions_alone() {
    let (fake, scheduler) = scheduler_with(CurationConfig::default());
    let id = fake
        .insert_memory(Memory::new(owner(), "x".repeat(40), MemoryKind::Core))
        .await
        .unwrap()
        .memory_id;
    let big = Memory::new(owner(), "y".repeat(4000), MemoryKind::Core);
    fake.insert_memory(big).await.unwrap();

    let mut session = scheduler.begin(&owner()).await.unwrap();
    session.delete(&id).await.unwrap();
    session.complete("small cleanup").await.unwrap();

    let audit_before = fake.audit_len();
    assert_eq!(
        scheduler.reconcile(&owner(), session.session_id()).await.unwrap(),
        ReconcileOutcome::AlreadyClosed {
            action: AuditAction::SessionComplete
        }
    );
    assert_eq!(fake.audit_len(), audit_before);
    assert!(fake.get_memory(&id).await.unwrap().tombstoned);
}
