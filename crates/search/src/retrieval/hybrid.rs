//! Hybrid retrieval combining vector and keyword search
//!
//! The query is embedded once; both channels run in parallel and their
//! results are fused.

use super::{fusion::ScoreFusion, Candidates, ScoredChunk};
use kgforge_common::config::RetrievalConfig;
use kgforge_common::errors::{AppError, Result};
use kgforge_common::graph::{DocumentFilter, GraphStore};
use kgforge_common::Embedder;
use std::sync::Arc;
use tracing::{debug, instrument};

/// Top-K chunk retrieval over both search channels
pub struct CandidateRetriever {
    store: Arc<dyn GraphStore>,
    embedder: Arc<dyn Embedder>,
    fusion: ScoreFusion,
    config: Arc<RetrievalConfig>,
}

impl CandidateRetriever {
    pub fn new(
        store: Arc<dyn GraphStore>,
        embedder: Arc<dyn Embedder>,
        config: Arc<RetrievalConfig>,
    ) -> Self {
        let fusion = ScoreFusion::new(config.fusion, config.vector_weight, config.keyword_weight);
        Self {
            store,
            embedder,
            fusion,
            config,
        }
    }

    /// Fetch up to `top_k` fused chunks for `query`.
    ///
    /// An index missing on either channel fails the whole call; an empty
    /// result is not an error.
    #[instrument(skip(self, filter), fields(documents = filter.document_names.len()))]
    pub async fn retrieve(
        &self,
        query: &str,
        top_k: usize,
        filter: &DocumentFilter,
    ) -> Result<Candidates> {
        let query_embedding = self.embedder.embed(query).await?;
        if query_embedding.len() != self.embedder.dimension() {
            return Err(AppError::EmbeddingError {
                message: format!(
                    "model '{}' produced {} dimensions, expected {}",
                    self.embedder.model_name(),
                    query_embedding.len(),
                    self.embedder.dimension()
                ),
            });
        }

        // Fetch more results from each channel for better fusion
        let channel_limit = self.config.channel_limit(top_k);

        let (vector_results, keyword_results) = tokio::join!(
            self.store.vector_search(&query_embedding, channel_limit, filter),
            self.store.keyword_search(query, channel_limit, filter)
        );
        let vector_results = vector_results?;
        let keyword_results = keyword_results?;

        debug!(
            vector = vector_results.len(),
            keyword = keyword_results.len(),
            "Channel results"
        );

        let fused = self.fusion.fuse(vector_results, keyword_results, top_k);

        let min_score = self.config.min_chunk_score.unwrap_or(0.0);
        let chunks: Vec<ScoredChunk> = fused
            .into_iter()
            .filter(|r| r.chunk.score >= min_score)
            .map(|r| r.chunk)
            .collect();

        Ok(Candidates {
            query_embedding,
            chunks,
        })
    }
}
