//! In-memory fake for the storage traits (testing only)
//!
//! `MemoryCurationStore` satisfies the `CurationStore` contract without any
//! external dependencies. Batches are staged on a copy of the state and
//! swapped in only when every op succeeds.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;

use crate::error::StorageError;
use crate::storage_traits::*;

#[derive(Debug, Default, Clone)]
struct StoreState {
    memories: HashMap<MemoryId, Memory>,
    audit: Vec<AuditEntry>,
    owners: HashMap<OwnerId, OwnerSettings>,
}

impl StoreState {
    fn memory_mut(&mut self, memory_id: &MemoryId) -> StorageResult<&mut Memory> {
        self.memories
            .get_mut(memory_id)
            .ok_or_else(|| StorageError::MemoryNotFound {
                memory_id: memory_id.to_string(),
            })
    }

    fn apply(&mut self, op: WriteOp) -> StorageResult<()> {
        match op {
            WriteOp::InsertMemory(memory) => {
                if self.memories.contains_key(&memory.memory_id) {
                    return Err(StorageError::DuplicateMemory {
                        memory_id: memory.memory_id.to_string(),
                    });
                }
                self.memories.insert(memory.memory_id.clone(), memory);
            }
            WriteOp::SetTombstone {
                memory_id,
                tombstoned,
            } => {
                let memory = self.memory_mut(&memory_id)?;
                if memory.tombstoned != tombstoned {
                    memory.tombstoned = tombstoned;
                    memory.tombstoned_at = tombstoned.then(Utc::now);
                }
            }
            WriteOp::SetContent { memory_id, content } => {
                self.memory_mut(&memory_id)?.content = content;
            }
            WriteOp::SetConstitutional {
                memory_id,
                constitutional,
            } => {
                self.memory_mut(&memory_id)?.constitutional = constitutional;
            }
            WriteOp::AppendAudit(entry) => self.audit.push(entry),
            WriteOp::StampRefined { owner_id, at } => {
                self.owners
                    .entry(owner_id.clone())
                    .or_insert_with(|| OwnerSettings::unset(owner_id))
                    .last_refined_at = Some(at);
            }
        }
        Ok(())
    }
}

/// In-memory `CurationStore` backed by `HashMap`s behind one `Mutex`.
#[derive(Debug, Default)]
pub struct MemoryCurationStore {
    state: Mutex<StoreState>,
    fail_at: Mutex<Option<usize>>,
}

impl MemoryCurationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `apply_batch` abort when it reaches op `op_index`.
    ///
    /// The injected failure fires once; later batches apply normally.
    pub fn fail_batch_at(&self, op_index: usize) {
        if let Ok(mut fail_at) = self.fail_at.lock() {
            *fail_at = Some(op_index);
        }
    }

    /// Number of audit entries across all sessions.
    pub fn audit_len(&self) -> usize {
        self.state.lock().map(|s| s.audit.len()).unwrap_or_default()
    }

    fn lock(&self) -> StorageResult<MutexGuard<'_, StoreState>> {
        self.state
            .lock()
            .map_err(|_| StorageError::Backend("memory store lock poisoned".to_string()))
    }

    fn take_fault(&self) -> Option<usize> {
        self.fail_at.lock().ok().and_then(|mut f| f.take())
    }
}

#[async_trait]
impl MemoryStore for MemoryCurationStore {
    async fn insert_memory(&self, memory: Memory) -> StorageResult<Memory> {
        let mut state = self.lock()?;
        state.apply(WriteOp::InsertMemory(memory.clone()))?;
        Ok(memory)
    }

    async fn get_memory(&self, memory_id: &MemoryId) -> StorageResult<Memory> {
        let state = self.lock()?;
        state
            .memories
            .get(memory_id)
            .cloned()
            .ok_or_else(|| StorageError::MemoryNotFound {
                memory_id: memory_id.to_string(),
            })
    }

    async fn list_memories(
        &self,
        owner_id: &OwnerId,
        filter: MemoryFilter,
    ) -> StorageResult<Vec<Memory>> {
        let state = self.lock()?;
        let mut memories: Vec<Memory> = state
            .memories
            .values()
            .filter(|m| &m.owner_id == owner_id && filter.matches(m))
            .cloned()
            .collect();
        memories.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.memory_id.cmp(&b.memory_id))
        });
        Ok(memories)
    }
}

#[async_trait]
impl AuditTrail for MemoryCurationStore {
    async fn append(&self, entry: AuditEntry) -> StorageResult<()> {
        self.lock()?.audit.push(entry);
        Ok(())
    }

    async fn for_session(&self, session_id: &SessionId) -> StorageResult<Vec<AuditEntry>> {
        let state = self.lock()?;
        let mut entries: Vec<AuditEntry> = state
            .audit
            .iter()
            .filter(|e| &e.session_id == session_id)
            .cloned()
            .collect();
        entries.sort_by(|a, b| b.seq.cmp(&a.seq));
        Ok(entries)
    }

    async fn for_owner(&self, owner_id: &OwnerId) -> StorageResult<Vec<AuditEntry>> {
        let state = self.lock()?;
        Ok(state
            .audit
            .iter()
            .filter(|e| &e.owner_id == owner_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl OwnerSettingsStore for MemoryCurationStore {
    async fn owner_settings(&self, owner_id: &OwnerId) -> StorageResult<OwnerSettings> {
        let state = self.lock()?;
        Ok(state
            .owners
            .get(owner_id)
            .cloned()
            .unwrap_or_else(|| OwnerSettings::unset(owner_id.clone())))
    }

    async fn set_threshold(
        &self,
        owner_id: &OwnerId,
        threshold: Threshold,
    ) -> StorageResult<OwnerSettings> {
        let mut state = self.lock()?;
        let settings = state
            .owners
            .entry(owner_id.clone())
            .or_insert_with(|| OwnerSettings::unset(owner_id.clone()));
        settings.threshold = Some(threshold);
        Ok(settings.clone())
    }
}

#[async_trait]
impl CurationStore for MemoryCurationStore {
    async fn apply_batch(&self, batch: WriteBatch) -> StorageResult<()> {
        let fault = self.take_fault();
        let mut state = self.lock()?;
        let mut staged = state.clone();
        for (index, op) in batch.into_ops().into_iter().enumerate() {
            if fault == Some(index) {
                return Err(StorageError::BatchAborted {
                    reason: format!("injected failure at op {index} ({})", op.label()),
                });
            }
            staged.apply(op).map_err(|e| StorageError::BatchAborted {
                reason: format!("op {index}: {e}"),
            })?;
        }
        *state = staged;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn owner() -> OwnerId {
        OwnerId::from("owner-a")
    }

    #[tokio::test]
    async fn batch_with_unknown_memory_leaves_state_untouched() {
        let store = MemoryCurationStore::new();
        let m = store
            .insert_memory(Memory::new(owner(), "keep me", MemoryKind::Core))
            .await
            .unwrap();

        let batch = WriteBatch::new()
            .with(WriteOp::SetTombstone {
                memory_id: m.memory_id.clone(),
                tombstoned: true,
            })
            .with(WriteOp::SetContent {
                memory_id: MemoryId::from("missing"),
                content: "x".into(),
            });

        let err = store.apply_batch(batch).await.unwrap_err();
        assert!(matches!(err, StorageError::BatchAborted { .. }));
        assert!(!store.get_memory(&m.memory_id).await.unwrap().tombstoned);
    }

    #[tokio::test]
    async fn injected_fault_fires_once() {
        let store = MemoryCurationStore::new();
        let m = store
            .insert_memory(Memory::new(owner(), "a", MemoryKind::Core))
            .await
            .unwrap();
        store.fail_batch_at(0);

        let batch = WriteBatch::new().with(WriteOp::SetConstitutional {
            memory_id: m.memory_id.clone(),
            constitutional: true,
        });
        assert!(store.apply_batch(batch.clone()).await.is_err());
        store.apply_batch(batch).await.unwrap();
        assert!(store.get_memory(&m.memory_id).await.unwrap().constitutional);
    }

    #[tokio::test]
    async fn tombstone_flip_is_idempotent() {
        let store = MemoryCurationStore::new();
        let m = store
            .insert_memory(Memory::new(owner(), "a", MemoryKind::Core))
            .await
            .unwrap();
        for _ in 0..2 {
            store
                .apply_batch(WriteBatch::new().with(WriteOp::SetTombstone {
                    memory_id: m.memory_id.clone(),
                    tombstoned: true,
                }))
                .await
                .unwrap();
        }
        let stored = store.get_memory(&m.memory_id).await.unwrap();
        assert!(stored.tombstoned);
        assert!(stored.tombstoned_at.is_some());
    }
}
