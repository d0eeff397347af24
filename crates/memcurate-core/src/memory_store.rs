//! Memory entity API: validation, ownership checks and mutation guards.
//!
//! Mutations are not applied here. `tombstone`, `update_content` and friends
//! check their guard and hand back the [`WriteOp`] so the caller can commit it
//! in the same batch as its audit entry.

use std::sync::Arc;

use memcurate_state::{
    CurationStore, Memory, MemoryFilter, MemoryId, MemoryKind, OwnerId, StorageError, WriteOp,
};
use tracing::{debug, instrument};

use crate::config::CurationConfig;
use crate::error::{CurationError, Result};
use crate::token::TokenAccountant;

/// Default maximum memory length in characters.
pub const DEFAULT_MAX_CONTENT_CHARS: usize = 10_000;

pub struct MemoryStoreApi {
    store: Arc<dyn CurationStore>,
    accountant: TokenAccountant,
    max_content_chars: usize,
}

impl Clone for MemoryStoreApi {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            accountant: self.accountant,
            max_content_chars: self.max_content_chars,
        }
    }
}

impl MemoryStoreApi {
    pub fn new(
        store: Arc<dyn CurationStore>,
        accountant: TokenAccountant,
        max_content_chars: usize,
    ) -> Self {
        Self {
            store,
            accountant,
            max_content_chars,
        }
    }

    pub fn from_config(store: Arc<dyn CurationStore>, config: &CurationConfig) -> Self {
        Self::new(
            store,
            config.accountant(),
            config.session.max_content_chars,
        )
    }

    pub fn store(&self) -> &Arc<dyn CurationStore> {
        &self.store
    }

    pub fn accountant(&self) -> TokenAccountant {
        self.accountant
    }

    pub fn max_content_chars(&self) -> usize {
        self.max_content_chars
    }

    /// Content must be non-blank and at most `max_content_chars` characters.
    pub fn validate_content(&self, content: &str) -> Result<()> {
        if content.trim().is_empty() {
            return Err(CurationError::validation("memory content must not be empty"));
        }
        let chars = content.chars().count();
        if chars > self.max_content_chars {
            return Err(CurationError::Validation(format!(
                "memory content is {chars} characters; the limit is {}",
                self.max_content_chars
            )));
        }
        Ok(())
    }

    /// Create a live, unprotected memory.
    #[instrument(skip(self, content), fields(owner_id = %owner_id, kind = %kind))]
    pub async fn create(
        &self,
        owner_id: &OwnerId,
        content: impl Into<String>,
        kind: MemoryKind,
    ) -> Result<Memory> {
        let content = content.into();
        self.validate_content(&content)?;
        let memory = self
            .store
            .insert_memory(Memory::new(owner_id.clone(), content, kind))
            .await?;
        debug!(memory_id = %memory.memory_id, "memory created");
        Ok(memory)
    }

    /// Fetch a memory owned by `owner_id`.
    ///
    /// Unknown ids and ids belonging to another owner are both `NotFound`.
    pub async fn get_owned(&self, owner_id: &OwnerId, memory_id: &MemoryId) -> Result<Memory> {
        let not_found = || CurationError::NotFound {
            memory_id: memory_id.to_string(),
        };
        let memory = match self.store.get_memory(memory_id).await {
            Ok(memory) => memory,
            Err(StorageError::MemoryNotFound { .. }) => return Err(not_found()),
            Err(e) => return Err(e.into()),
        };
        if &memory.owner_id != owner_id {
            return Err(not_found());
        }
        Ok(memory)
    }

    pub async fn list(
        &self,
        owner_id: &OwnerId,
        kind: Option<MemoryKind>,
        include_tombstoned: bool,
    ) -> Result<Vec<Memory>> {
        let filter = MemoryFilter {
            kind,
            include_tombstoned,
        };
        Ok(self.store.list_memories(owner_id, filter).await?)
    }

    /// Token mass of the owner's live memories of `kind`.
    pub async fn usage(&self, owner_id: &OwnerId, kind: MemoryKind) -> Result<u64> {
        let live = self
            .store
            .list_memories(owner_id, MemoryFilter::live(kind))
            .await?;
        Ok(self.accountant.mass(&live))
    }

    /// Case-insensitive term match over live memories.
    ///
    /// Ranked by number of matched terms, then newest first.
    pub async fn search(&self, owner_id: &OwnerId, query: &str, limit: usize) -> Result<Vec<Memory>> {
        let mut terms: Vec<String> = query
            .split_whitespace()
            .map(str::to_lowercase)
            .collect();
        terms.sort();
        terms.dedup();
        if terms.is_empty() {
            return Err(CurationError::validation("search query must not be empty"));
        }

        let live = self
            .store
            .list_memories(
                owner_id,
                MemoryFilter {
                    kind: None,
                    include_tombstoned: false,
                },
            )
            .await?;

        let mut scored: Vec<(usize, Memory)> = live
            .into_iter()
            .filter_map(|m| {
                let haystack = m.content.to_lowercase();
                let score = terms.iter().filter(|t| haystack.contains(t.as_str())).count();
                (score > 0).then_some((score, m))
            })
            .collect();
        scored.sort_by(|(sa, a), (sb, b)| sb.cmp(sa).then_with(|| b.created_at.cmp(&a.created_at)));
        Ok(scored.into_iter().take(limit).map(|(_, m)| m).collect())
    }

    // -- guarded mutations ---------------------------------------------------

    /// Soft-delete. Idempotent; refused while the memory is constitutional.
    pub fn tombstone(&self, memory: &Memory) -> Result<WriteOp> {
        Self::ensure_unprotected(memory)?;
        Ok(WriteOp::SetTombstone {
            memory_id: memory.memory_id.clone(),
            tombstoned: true,
        })
    }

    /// Reverse a tombstone. Idempotent.
    pub fn undo_tombstone(&self, memory: &Memory) -> WriteOp {
        WriteOp::SetTombstone {
            memory_id: memory.memory_id.clone(),
            tombstoned: false,
        }
    }

    pub fn protect(&self, memory: &Memory) -> WriteOp {
        WriteOp::SetConstitutional {
            memory_id: memory.memory_id.clone(),
            constitutional: true,
        }
    }

    pub fn unprotect(&self, memory: &Memory) -> WriteOp {
        WriteOp::SetConstitutional {
            memory_id: memory.memory_id.clone(),
            constitutional: false,
        }
    }

    /// Replace content. Refused while the memory is constitutional.
    pub fn update_content(&self, memory: &Memory, new_content: &str) -> Result<WriteOp> {
        Self::ensure_unprotected(memory)?;
        self.validate_content(new_content)?;
        Ok(WriteOp::SetContent {
            memory_id: memory.memory_id.clone(),
            content: new_content.to_string(),
        })
    }

    fn ensure_unprotected(memory: &Memory) -> Result<()> {
        if memory.constitutional {
            return Err(CurationError::ProtectedMemory {
                memory_id: memory.memory_id.to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use memcurate_state::fakes::MemoryCurationStore;
    use memcurate_state::WriteBatch;

    fn api() -> MemoryStoreApi {
        MemoryStoreApi::new(
            Arc::new(MemoryCurationStore::new()),
            TokenAccountant::default(),
            DEFAULT_MAX_CONTENT_CHARS,
        )
    }

    fn alice() -> OwnerId {
        OwnerId::from("alice")
    }

    #[tokio::test]
    async fn create_rejects_empty_and_oversized_content() {
        let api = api();
        assert!(matches!(
            api.create(&alice(), "", MemoryKind::Core).await,
            Err(CurationError::Validation(_))
        ));
        assert!(matches!(
            api.create(&alice(), "   \n", MemoryKind::Core).await,
            Err(CurationError::Validation(_))
        ));
        let too_long = "x".repeat(DEFAULT_MAX_CONTENT_CHARS + 1);
        assert!(matches!(
            api.create(&alice(), too_long, MemoryKind::Core).await,
            Err(CurationError::Validation(_))
        ));
        let at_limit = "é".repeat(DEFAULT_MAX_CONTENT_CHARS);
        api.create(&alice(), at_limit, MemoryKind::Core).await.unwrap();
    }

    #[tokio::test]
    async fn foreign_owner_is_not_found() {
        let api = api();
        let m = api.create(&alice(), "secret", MemoryKind::Core).await.unwrap();
        let err = api
            .get_owned(&OwnerId::from("mallory"), &m.memory_id)
            .await
            .unwrap_err();
        assert!(matches!(err, CurationError::NotFound { .. }));
        assert!(api.get_owned(&alice(), &m.memory_id).await.is_ok());
    }

    #[tokio::test]
    async fn constitutional_memory_refuses_tombstone_and_update() {
        let api = api();
        let mut m = api.create(&alice(), "core value", MemoryKind::Core).await.unwrap();
        m.constitutional = true;
        assert!(matches!(
            api.tombstone(&m),
            Err(CurationError::ProtectedMemory { .. })
        ));
        assert!(matches!(
            api.update_content(&m, "new"),
            Err(CurationError::ProtectedMemory { .. })
        ));
    }

    #[tokio::test]
    async fn usage_counts_live_core_only() {
        let api = api();
        let keep = api.create(&alice(), "a".repeat(40), MemoryKind::Core).await.unwrap();
        let gone = api.create(&alice(), "b".repeat(40), MemoryKind::Core).await.unwrap();
        api.create(&alice(), "c".repeat(400), MemoryKind::Journal).await.unwrap();

        let op = api.tombstone(&gone).unwrap();
        api.store().apply_batch(WriteBatch::new().with(op)).await.unwrap();

        assert_eq!(api.usage(&alice(), MemoryKind::Core).await.unwrap(), 10);
        assert_eq!(api.usage(&alice(), MemoryKind::Journal).await.unwrap(), 100);
        assert!(api.get_owned(&alice(), &keep.memory_id).await.unwrap().is_live());
    }

    #[tokio::test]
    async fn search_ranks_by_matched_terms() {
        let api = api();
        api.create(&alice(), "Likes Rust", MemoryKind::Core).await.unwrap();
        api.create(&alice(), "Likes Rust and tokio", MemoryKind::Core).await.unwrap();
        api.create(&alice(), "Plays chess", MemoryKind::Core).await.unwrap();

        let hits = api.search(&alice(), "rust TOKIO", 10).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].content, "Likes Rust and tokio");

        let limited = api.search(&alice(), "likes", 1).await.unwrap();
        assert_eq!(limited.len(), 1);

        assert!(matches!(
            api.search(&alice(), "   ", 10).await,
            Err(CurationError::Validation(_))
        ));
    }
}
