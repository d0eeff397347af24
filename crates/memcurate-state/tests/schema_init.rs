//! Integration tests for SurrealDB schema initialization
//!
//! Runs the migrations against `mem://` and checks the constraints the
//! curation engine depends on.

use memcurate_state::migrations::init_schema;
use memcurate_state::storage_traits::*;
use memcurate_state::{ConnectionConfig, StorageError, SurrealCurationStore};
use serde_json::json;
use surrealdb::engine::any::connect;

#[tokio::test]
async fn init_schema_is_idempotent() {
    let db = ConnectionConfig::in_memory()
        .connect()
        .await
        .expect("connect runs init_schema once");
    init_schema(&db).await.expect("second init_schema");
    init_schema(&db).await.expect("third init_schema");
}

#[tokio::test]
async fn schema_applies_to_a_bare_connection() {
    let db = connect("mem://").await.expect("open mem://");
    db.use_ns("memcurate").use_db("schema_test").await.unwrap();

    init_schema(&db).await.expect("first init_schema");
    init_schema(&db).await.expect("repeat init_schema");

    let mut response = db.query("INFO FOR DB").await.unwrap();
    let info: Option<serde_json::Value> = response.take(0).unwrap();
    let tables = info.expect("db info")["tables"].clone();
    for table in ["memories", "audit_entries", "owner_settings"] {
        assert!(tables.get(table).is_some(), "{table} not defined");
    }

    let store = SurrealCurationStore::from_db(db);
    let memory = Memory::new(OwnerId::from("alice"), "nul\0byte", MemoryKind::Core);
    store.insert_memory(memory.clone()).await.unwrap();
    assert_eq!(store.get_memory(&memory.memory_id).await.unwrap(), memory);

    let dup = store.insert_memory(memory.clone()).await.unwrap_err();
    assert!(matches!(dup, StorageError::DuplicateMemory { .. }));
}

#[tokio::test]
async fn audit_seq_is_unique_per_session() {
    let store = SurrealCurationStore::in_memory().await.unwrap();
    let session = SessionId::new();
    let owner = OwnerId::from("alice");

    let first = AuditEntry::new(
        session.clone(),
        owner.clone(),
        1,
        AuditAction::Protect,
        vec![MemoryId::from("m1")],
        json!({}),
    );
    store.append(first).await.unwrap();

    let clash = AuditEntry::new(
        session.clone(),
        owner.clone(),
        1,
        AuditAction::Unprotect,
        vec![MemoryId::from("m1")],
        json!({}),
    );
    let err = store.append(clash).await.unwrap_err();
    assert!(matches!(err, StorageError::Backend(_)));

    // Same seq in a different session is fine.
    let elsewhere = AuditEntry::new(
        SessionId::new(),
        owner,
        1,
        AuditAction::Protect,
        vec![MemoryId::from("m1")],
        json!({}),
    );
    store.append(elsewhere).await.unwrap();
    assert_eq!(store.for_session(&session).await.unwrap().len(), 1);
}

#[tokio::test]
async fn stored_payload_still_verifies() {
    let store = SurrealCurationStore::in_memory().await.unwrap();
    let session = SessionId::new();
    let entry = AuditEntry::new(
        session.clone(),
        OwnerId::from("alice"),
        1,
        AuditAction::Consolidate,
        vec![MemoryId::from("a"), MemoryId::from("b")],
        json!({
            "merged": [{"id": "a", "content": "α"}, {"id": "b", "content": "β"}],
            "result": {"id": "c", "content": "αβ"}
        }),
    );
    store.append(entry.clone()).await.unwrap();

    let stored = store.for_session(&session).await.unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].payload_digest, entry.payload_digest);
    assert!(stored[0].verify());
}
