//! Extraction pipeline boundary.
//!
//! Turns conversation transcripts into memories before any refinement
//! session runs. The extractor itself (usually a model call) lives behind
//! [`MemoryExtractor`]; this module only chunks, filters and creates.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use memcurate_state::{CurationStore, MemoryId, MemoryKind, OwnerId};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::CurationConfig;
use crate::error::Result;
use crate::memory_store::MemoryStoreApi;
use crate::metrics::METRICS;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptTurn {
    pub role: String,
    pub content: String,
}

impl TranscriptTurn {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
        }
    }
}

/// A run of turns that fits the extractor's token budget.
#[derive(Debug, Clone, PartialEq)]
pub struct TranscriptChunk {
    pub index: usize,
    pub turns: Vec<TranscriptTurn>,
    pub tokens: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateMemory {
    pub content: String,
    pub kind: MemoryKind,
}

#[async_trait]
pub trait MemoryExtractor: Send + Sync {
    async fn extract(&self, chunk: &TranscriptChunk) -> Result<Vec<CandidateMemory>>;
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ExtractionReport {
    pub chunks: usize,
    pub created: Vec<MemoryId>,
    /// Candidates dropped as invalid or duplicate
    pub skipped: usize,
}

pub struct ExtractionPipeline {
    extractor: Arc<dyn MemoryExtractor>,
    memories: MemoryStoreApi,
    chunk_tokens: u64,
}

impl ExtractionPipeline {
    pub fn new(extractor: Arc<dyn MemoryExtractor>, memories: MemoryStoreApi, chunk_tokens: u64) -> Self {
        Self {
            extractor,
            memories,
            chunk_tokens: chunk_tokens.max(1),
        }
    }

    pub fn from_config(
        extractor: Arc<dyn MemoryExtractor>,
        store: Arc<dyn CurationStore>,
        config: &CurationConfig,
    ) -> Self {
        Self::new(
            extractor,
            MemoryStoreApi::from_config(store, config),
            config.extraction.chunk_tokens,
        )
    }

    /// Greedily pack turns into chunks of at most `chunk_tokens`.
    ///
    /// A single turn over budget is split on char boundaries into its own chunks.
    pub fn chunk(&self, turns: &[TranscriptTurn]) -> Vec<TranscriptChunk> {
        let accountant = self.memories.accountant();
        let mut chunks: Vec<TranscriptChunk> = Vec::new();
        let mut current: Vec<TranscriptTurn> = Vec::new();
        let mut current_tokens = 0u64;

        for turn in turns {
            let tokens = accountant.count(&turn.content);
            if tokens == 0 {
                continue;
            }
            if tokens > self.chunk_tokens {
                push_chunk(&mut chunks, &mut current, &mut current_tokens);
                for piece in self.split_oversized(&turn.content) {
                    let mut piece_tokens = accountant.count(&piece);
                    let mut single = vec![TranscriptTurn::new(turn.role.clone(), piece)];
                    push_chunk(&mut chunks, &mut single, &mut piece_tokens);
                }
                continue;
            }
            if current_tokens + tokens > self.chunk_tokens {
                push_chunk(&mut chunks, &mut current, &mut current_tokens);
            }
            current_tokens += tokens;
            current.push(turn.clone());
        }
        push_chunk(&mut chunks, &mut current, &mut current_tokens);
        chunks
    }

    fn split_oversized(&self, text: &str) -> Vec<String> {
        let per_piece = ((self.chunk_tokens as f64) * self.memories.accountant().chars_per_token())
            .floor()
            .max(1.0) as usize;
        let chars: Vec<char> = text.chars().collect();
        chars.chunks(per_piece).map(|c| c.iter().collect()).collect()
    }

    /// Chunk, extract and create memories for `owner_id`.
    pub async fn ingest(&self, owner_id: &OwnerId, turns: &[TranscriptTurn]) -> Result<ExtractionReport> {
        let chunks = self.chunk(turns);
        let mut seen: HashSet<String> = self
            .memories
            .list(owner_id, None, false)
            .await?
            .into_iter()
            .map(|m| m.content)
            .collect();

        let mut report = ExtractionReport {
            chunks: chunks.len(),
            ..ExtractionReport::default()
        };

        for chunk in &chunks {
            let candidates = self.extractor.extract(chunk).await?;
            debug!(chunk = chunk.index, candidates = candidates.len(), "chunk extracted");
            for candidate in candidates {
                if seen.contains(&candidate.content) {
                    report.skipped += 1;
                    continue;
                }
                if let Err(e) = self.memories.validate_content(&candidate.content) {
                    warn!(chunk = chunk.index, error = %e, "dropping extracted candidate");
                    report.skipped += 1;
                    continue;
                }
                let memory = self
                    .memories
                    .create(owner_id, candidate.content.clone(), candidate.kind)
                    .await?;
                seen.insert(candidate.content);
                report.created.push(memory.memory_id);
            }
        }

        METRICS.add_memories_extracted(report.created.len() as u64);
        info!(
            owner_id = %owner_id,
            chunks = report.chunks,
            created = report.created.len(),
            skipped = report.skipped,
            "extraction finished"
        );
        Ok(report)
    }
}

fn push_chunk(out: &mut Vec<TranscriptChunk>, turns: &mut Vec<TranscriptTurn>, tokens: &mut u64) {
    if turns.is_empty() {
        return;
    }
    out.push(TranscriptChunk {
        index: out.len(),
        turns: std::mem::take(turns),
        tokens: *tokens,
    });
    *tokens = 0;
}
