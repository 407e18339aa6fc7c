//! Hybrid candidate retrieval
//!
//! Two channels over chunks, fused into one ranked list:
//! - Vector search (semantic similarity via embeddings)
//! - Keyword search (full-text match)

mod fusion;
mod hybrid;

pub use fusion::{FusionResult, ScoreFusion};
pub use hybrid::CandidateRetriever;

use kgforge_common::graph::{ChunkRecord, DocumentInfo};
use serde::{Deserialize, Serialize};

/// Fused candidate chunk
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredChunk {
    pub chunk: ChunkRecord,

    /// Owning document
    pub document: DocumentInfo,

    /// Fused score (0.0 - 1.0)
    pub score: f32,
}

/// Output of one retrieval pass
#[derive(Debug, Clone)]
pub struct Candidates {
    /// Embedding of the resolved query, reused for entity similarity
    pub query_embedding: Vec<f32>,

    /// Top-K chunks, best first
    pub chunks: Vec<ScoredChunk>,
}
