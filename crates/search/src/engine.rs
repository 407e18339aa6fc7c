//! Retrieval engine
//!
//! One call runs the whole pipeline:
//! query resolution → candidate retrieval → grouping by document →
//! per-document expansion, dedup, formatting and metadata → ranking.

use crate::aggregate::{aggregate, DocumentGroup};
use crate::dedup::deduplicate;
use crate::expansion::{DocumentExpansion, EntityExpansionEngine};
use crate::format::format_document;
use crate::metadata::build_metadata;
use crate::orchestrator::QueryOrchestrator;
use crate::rank::{rank, DocumentBundle};
use crate::retrieval::CandidateRetriever;
use futures::{stream, StreamExt, TryStreamExt};
use kgforge_common::cache::{keys, Cache};
use kgforge_common::config::RetrievalConfig;
use kgforge_common::errors::{AppError, Result};
use kgforge_common::graph::{DocumentFilter, GraphStore};
use kgforge_common::llm::ChatTurn;
use kgforge_common::{metrics, Embedder};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, instrument, warn};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalRequest {
    /// Conversation so far; the last turn is the current utterance
    pub messages: Vec<ChatTurn>,

    /// Restrict retrieval to these documents; empty means all
    #[serde(default)]
    pub document_names: Vec<String>,

    /// Overrides the configured candidate count
    #[serde(default)]
    pub top_k: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalResponse {
    /// The search string actually used
    pub query: String,

    /// Best document first
    pub documents: Vec<DocumentBundle>,
}

pub struct RetrievalEngine {
    orchestrator: QueryOrchestrator,
    retriever: CandidateRetriever,
    expansion: EntityExpansionEngine,
    cache: Option<Arc<Cache>>,
    config: Arc<RetrievalConfig>,
    /// Embedding model identity; cached bundles depend on it
    embedder_tag: String,
}

impl RetrievalEngine {
    /// Build an engine; rejects an invalid retrieval configuration
    pub fn new(
        store: Arc<dyn GraphStore>,
        embedder: Arc<dyn Embedder>,
        orchestrator: QueryOrchestrator,
        config: Arc<RetrievalConfig>,
    ) -> Result<Self> {
        config.validate()?;
        let embedder_tag = format!("{}:{}", embedder.model_name(), embedder.dimension());

        Ok(Self {
            orchestrator,
            retriever: CandidateRetriever::new(store.clone(), embedder, config.clone()),
            expansion: EntityExpansionEngine::new(store, config.clone()),
            cache: None,
            config,
            embedder_tag,
        })
    }

    pub fn with_cache(mut self, cache: Arc<Cache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Resolve the conversation to a query, then retrieve
    pub async fn retrieve(&self, request: &RetrievalRequest) -> Result<RetrievalResponse> {
        let query = self.orchestrator.resolve(&request.messages).await?;
        let filter = DocumentFilter::new(request.document_names.clone());
        let documents = self.retrieve_query(&query, request.top_k, &filter).await?;

        Ok(RetrievalResponse { query, documents })
    }

    /// Run retrieval for an already-resolved query.
    ///
    /// Zero candidates is an empty list. A document whose expansion fails is
    /// still returned with its chunk text and empty graph sections, unless
    /// the failure is a configuration error or a store outage.
    #[instrument(skip(self, filter), fields(documents = filter.document_names.len()))]
    pub async fn retrieve_query(
        &self,
        query: &str,
        top_k: Option<usize>,
        filter: &DocumentFilter,
    ) -> Result<Vec<DocumentBundle>> {
        let top_k = top_k.unwrap_or(self.config.top_k);
        if top_k == 0 {
            return Err(AppError::Validation {
                message: "top_k must be at least 1".to_string(),
                field: Some("top_k".to_string()),
            });
        }

        let cache_key = keys::retrieval(
            query,
            &filter.document_names,
            &self.cache_fingerprint(top_k),
        );
        if let Some(cached) = self.cached(&cache_key).await {
            return Ok(cached);
        }

        let start = Instant::now();

        let candidates = self.retriever.retrieve(query, top_k, filter).await?;
        let candidate_count = candidates.chunks.len();

        if candidates.chunks.is_empty() {
            info!("No candidate chunks");
            metrics::record_retrieval(start.elapsed().as_secs_f64(), 0, 0);
            return Ok(Vec::new());
        }

        let groups = aggregate(candidates.chunks);
        let concurrency = groups.len().min(self.config.max_concurrency).max(1);
        let query_embedding = candidates.query_embedding.as_slice();

        let bundles: Vec<DocumentBundle> = stream::iter(groups)
            .map(|group| self.build_bundle(group, query_embedding))
            .buffered(concurrency)
            .try_collect()
            .await?;

        let documents = rank(bundles);

        metrics::record_retrieval(
            start.elapsed().as_secs_f64(),
            candidate_count,
            documents.len(),
        );
        info!(
            candidates = candidate_count,
            documents = documents.len(),
            latency_ms = start.elapsed().as_millis() as u64,
            "Retrieval completed"
        );

        self.store_cached(&cache_key, &documents).await;
        Ok(documents)
    }

    async fn build_bundle(
        &self,
        group: DocumentGroup,
        query_embedding: &[f32],
    ) -> Result<DocumentBundle> {
        let expansion = match self.expansion.expand(&group, query_embedding).await {
            Ok(expansion) => expansion,
            Err(e @ (AppError::Configuration { .. } | AppError::UpstreamUnavailable { .. })) => {
                return Err(e)
            }
            Err(e) => {
                warn!(
                    document = %group.document.name,
                    error = %e,
                    "Graph expansion failed, returning chunk text only"
                );
                metrics::record_expansion_failure();
                DocumentExpansion::default()
            }
        };

        let graph = deduplicate(expansion);
        let text = format_document(&group, &graph);
        let metadata = build_metadata(&group, &graph, &text);

        debug!(
            document = %group.document.name,
            entities = graph.unique_entities.len(),
            nodes = graph.unique_nodes.len(),
            relationships = graph.unique_relationships.len(),
            "Bundle built"
        );

        Ok(DocumentBundle {
            document_name: group.document.name.clone(),
            aggregate_score: group.aggregate_score,
            text,
            metadata,
        })
    }

    fn cache_fingerprint(&self, top_k: usize) -> String {
        format!("{}/{}/{}", self.config.fingerprint(), self.embedder_tag, top_k)
    }

    /// Cache failures are logged and treated as a miss
    async fn cached(&self, key: &str) -> Option<Vec<DocumentBundle>> {
        let cache = self.cache.as_ref()?;
        match cache.get::<Vec<DocumentBundle>>(key).await {
            Ok(hit) => {
                metrics::record_cache(hit.is_some(), "retrieval");
                hit
            }
            Err(e) => {
                warn!(error = %e, "Cache read failed");
                None
            }
        }
    }

    async fn store_cached(&self, key: &str, documents: &[DocumentBundle]) {
        let Some(cache) = self.cache.as_ref() else {
            return;
        };
        if let Err(e) = cache
            .put(key, &documents, self.config.cache_ttl_secs)
            .await
        {
            warn!(error = %e, "Cache write failed");
        }
    }
}
