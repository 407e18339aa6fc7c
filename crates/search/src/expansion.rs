//! Entity expansion per document
//!
//! Entities mentioned by a document's chunks are ranked by how many of
//! those chunks mention them; each retained entity is then expanded over
//! domain relationships with a hop budget chosen from its similarity to
//! the query.

use crate::aggregate::DocumentGroup;
use futures::{stream, FutureExt, StreamExt, TryStreamExt};
use kgforge_common::config::RetrievalConfig;
use kgforge_common::embeddings::cosine_similarity;
use kgforge_common::errors::{AppError, Result};
use kgforge_common::graph::{
    EntityOccurrence, ExpansionSpec, GraphNode, GraphStore, TraversalPath,
};
use kgforge_common::metrics;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tracing::{debug, instrument};

/// Hop budget for one entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpansionPolicy {
    /// Low similarity: the entity alone
    Skip,
    /// Mid band or no embedding
    Moderate,
    /// High similarity
    Deep,
}

impl ExpansionPolicy {
    /// Undefined similarity is always moderate, never skip or deep
    pub fn from_similarity(similarity: Option<f32>, config: &RetrievalConfig) -> Self {
        match similarity {
            Some(sim) if sim > config.sim_high => ExpansionPolicy::Deep,
            Some(sim) if sim < config.sim_low => ExpansionPolicy::Skip,
            _ => ExpansionPolicy::Moderate,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ExpansionPolicy::Skip => "skip",
            ExpansionPolicy::Moderate => "moderate",
            ExpansionPolicy::Deep => "deep",
        }
    }

    /// Traversal limits, or `None` when the entity is not expanded
    pub fn spec(&self, config: &RetrievalConfig) -> Option<ExpansionSpec> {
        let (max_depth, path_cap) = match self {
            ExpansionPolicy::Skip => return None,
            ExpansionPolicy::Moderate => (config.mid_band_depth, config.mid_band_path_cap),
            ExpansionPolicy::Deep => (config.high_band_depth, config.high_band_path_cap),
        };
        Some(ExpansionSpec {
            max_depth,
            path_cap,
            excluded_relationship_types: config.excluded_relationship_types.clone(),
            excluded_node_labels: config.excluded_node_labels.clone(),
        })
    }
}

/// Entity with the number of distinct chunks mentioning it
#[derive(Debug, Clone)]
pub struct RankedEntity {
    pub entity: GraphNode,
    pub chunk_count: usize,
}

/// Raw expansion output for one document, before deduplication
#[derive(Debug, Clone, Default)]
pub struct DocumentExpansion {
    /// Top entities, most mentioned first
    pub entities: Vec<RankedEntity>,

    /// Union of every retained entity's paths, capped per entity
    pub paths: Vec<TraversalPath>,
}

/// Rank by distinct-chunk count, descending; equal counts by element id
pub fn rank_entities(occurrences: Vec<EntityOccurrence>, limit: usize) -> Vec<RankedEntity> {
    let mut chunks_by_entity: HashMap<String, (GraphNode, BTreeSet<String>)> = HashMap::new();
    for occurrence in occurrences {
        chunks_by_entity
            .entry(occurrence.entity.element_id.clone())
            .or_insert_with(|| (occurrence.entity, BTreeSet::new()))
            .1
            .insert(occurrence.chunk_id);
    }

    let mut ranked: Vec<RankedEntity> = chunks_by_entity
        .into_values()
        .map(|(entity, chunks)| RankedEntity {
            entity,
            chunk_count: chunks.len(),
        })
        .collect();

    ranked.sort_by(|a, b| {
        b.chunk_count
            .cmp(&a.chunk_count)
            .then_with(|| a.entity.element_id.cmp(&b.entity.element_id))
    });
    ranked.truncate(limit);
    ranked
}

/// Runs entity ranking and banded traversal for document groups
pub struct EntityExpansionEngine {
    store: Arc<dyn GraphStore>,
    config: Arc<RetrievalConfig>,
}

impl EntityExpansionEngine {
    pub fn new(store: Arc<dyn GraphStore>, config: Arc<RetrievalConfig>) -> Self {
        Self { store, config }
    }

    /// Expand one document.
    ///
    /// Configuration errors and store outages that outlived their retries
    /// are returned as-is; any other failure becomes `AppError::Expansion`
    /// naming the document.
    #[instrument(skip_all, fields(document = %group.document.name))]
    pub async fn expand(
        &self,
        group: &DocumentGroup,
        query_embedding: &[f32],
    ) -> Result<DocumentExpansion> {
        self.expand_inner(group, query_embedding)
            .await
            .map_err(|e| match e {
                AppError::Configuration { .. } | AppError::UpstreamUnavailable { .. } => e,
                other => AppError::Expansion {
                    document: group.document.name.clone(),
                    message: other.to_string(),
                },
            })
    }

    async fn expand_inner(
        &self,
        group: &DocumentGroup,
        query_embedding: &[f32],
    ) -> Result<DocumentExpansion> {
        let occurrences = self.store.entities_for_chunks(&group.chunk_ids()).await?;
        let entities = rank_entities(occurrences, self.config.max_entities_per_document);

        if entities.is_empty() {
            return Ok(DocumentExpansion::default());
        }

        let concurrency = self.config.max_entity_concurrency.max(1);
        let pending: Vec<_> = entities
            .iter()
            .map(|ranked| self.expand_entity(&ranked.entity, query_embedding).boxed())
            .collect();
        let per_entity: Vec<Vec<TraversalPath>> = stream::iter(pending)
            .buffered(concurrency)
            .try_collect()
            .await?;

        let paths: Vec<TraversalPath> = per_entity.into_iter().flatten().collect();

        debug!(
            entities = entities.len(),
            paths = paths.len(),
            "Document expanded"
        );

        Ok(DocumentExpansion { entities, paths })
    }

    async fn expand_entity(
        &self,
        entity: &GraphNode,
        query_embedding: &[f32],
    ) -> Result<Vec<TraversalPath>> {
        let similarity = entity
            .embedding
            .as_deref()
            .and_then(|e| cosine_similarity(query_embedding, e));
        let policy = ExpansionPolicy::from_similarity(similarity, &self.config);
        metrics::record_expansion(policy.as_str());

        match policy.spec(&self.config) {
            None => Ok(vec![TraversalPath::single(entity.clone())]),
            Some(spec) => self.store.expand(entity, &spec).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::aggregate;
    use crate::retrieval::ScoredChunk;
    use kgforge_common::graph::{
        ChunkRecord, DocumentInfo, GraphRelationship, InMemoryGraphStore,
    };

    fn config() -> RetrievalConfig {
        RetrievalConfig::default()
    }

    fn occurrence(chunk: &str, entity: &str) -> EntityOccurrence {
        EntityOccurrence {
            chunk_id: chunk.to_string(),
            entity: GraphNode::new(entity, entity, &["Concept"]),
        }
    }

    #[test]
    fn test_policy_bands() {
        let cfg = config();
        assert_eq!(ExpansionPolicy::from_similarity(None, &cfg), ExpansionPolicy::Moderate);
        assert_eq!(ExpansionPolicy::from_similarity(Some(0.95), &cfg), ExpansionPolicy::Deep);
        assert_eq!(ExpansionPolicy::from_similarity(Some(0.9), &cfg), ExpansionPolicy::Moderate);
        assert_eq!(ExpansionPolicy::from_similarity(Some(0.3), &cfg), ExpansionPolicy::Moderate);
        assert_eq!(ExpansionPolicy::from_similarity(Some(0.29), &cfg), ExpansionPolicy::Skip);
        assert_eq!(ExpansionPolicy::from_similarity(Some(-1.0), &cfg), ExpansionPolicy::Skip);
    }

    #[test]
    fn test_policy_specs() {
        let cfg = config();
        assert!(ExpansionPolicy::Skip.spec(&cfg).is_none());

        let moderate = ExpansionPolicy::Moderate.spec(&cfg).unwrap();
        assert_eq!((moderate.max_depth, moderate.path_cap), (1, 20));

        let deep = ExpansionPolicy::Deep.spec(&cfg).unwrap();
        assert_eq!((deep.max_depth, deep.path_cap), (2, 40));
        assert!(deep.excluded_relationship_types.contains(&"HAS_ENTITY".to_string()));
    }

    #[test]
    fn test_rank_counts_distinct_chunks() {
        let ranked = rank_entities(
            vec![
                occurrence("c1", "e:b"),
                occurrence("c1", "e:b"),
                occurrence("c1", "e:a"),
                occurrence("c2", "e:a"),
                occurrence("c2", "e:c"),
            ],
            10,
        );

        let order: Vec<(&str, usize)> = ranked
            .iter()
            .map(|r| (r.entity.element_id.as_str(), r.chunk_count))
            .collect();
        assert_eq!(order, vec![("e:a", 2), ("e:b", 1), ("e:c", 1)]);
    }

    #[test]
    fn test_rank_truncates() {
        let occurrences = (0..50)
            .map(|i| occurrence("c1", &format!("e:{:02}", i)))
            .collect();
        let ranked = rank_entities(occurrences, 40);
        assert_eq!(ranked.len(), 40);
        assert_eq!(ranked[0].entity.element_id, "e:00");
    }

    /// Document with one chunk mentioning `e:start`, which sits on a chain
    /// start - n1 - n2 - n3
    fn chain_fixture(start: GraphNode) -> (InMemoryGraphStore, DocumentGroup) {
        let mut store = InMemoryGraphStore::new();
        store.add_document(DocumentInfo::named("doc.pdf"));
        let record = ChunkRecord {
            id: "c1".into(),
            text: "chain".into(),
            position: 0,
            length: 5,
            document: "doc.pdf".into(),
        };
        store.add_chunk(record.clone(), vec![1.0, 0.0]).unwrap();
        store.add_entity(start);
        for n in ["n1", "n2", "n3"] {
            store.add_entity(GraphNode::new(format!("e:{}", n), n, &["Concept"]));
        }
        store.link_entity("c1", "e:start").unwrap();
        for (rel, a, b) in [
            ("r:1", "e:start", "e:n1"),
            ("r:2", "e:n1", "e:n2"),
            ("r:3", "e:n2", "e:n3"),
        ] {
            store
                .add_relationship(GraphRelationship::new(rel, "LINKS", a, b))
                .unwrap();
        }

        let groups = aggregate(vec![ScoredChunk {
            chunk: record,
            document: DocumentInfo::named("doc.pdf"),
            score: 0.8,
        }]);
        (store, groups.into_iter().next().unwrap())
    }

    async fn max_depth(start: GraphNode, query: &[f32]) -> usize {
        let (store, group) = chain_fixture(start);
        let engine = EntityExpansionEngine::new(Arc::new(store), Arc::new(config()));
        let expansion = engine.expand(&group, query).await.unwrap();
        assert_eq!(expansion.entities.len(), 1);
        expansion.paths.iter().map(|p| p.depth()).max().unwrap_or(0)
    }

    #[tokio::test]
    async fn test_entity_without_embedding_expands_one_hop() {
        let start = GraphNode::new("e:start", "start", &["Concept"]);
        assert_eq!(max_depth(start, &[1.0, 0.0]).await, 1);
    }

    #[tokio::test]
    async fn test_high_similarity_expands_two_hops() {
        let start = GraphNode::new("e:start", "start", &["Concept"]).with_embedding(vec![1.0, 0.0]);
        assert_eq!(max_depth(start, &[1.0, 0.0]).await, 2);
    }

    #[tokio::test]
    async fn test_low_similarity_is_entity_alone() {
        let start = GraphNode::new("e:start", "start", &["Concept"]).with_embedding(vec![0.0, 1.0]);
        let (store, group) = chain_fixture(start);
        let engine = EntityExpansionEngine::new(Arc::new(store), Arc::new(config()));

        let expansion = engine.expand(&group, &[1.0, 0.0]).await.unwrap();
        assert_eq!(expansion.paths.len(), 1);
        assert_eq!(expansion.paths[0].depth(), 0);
    }

    #[tokio::test]
    async fn test_document_without_entities() {
        let (store, mut group) = chain_fixture(GraphNode::new("e:start", "start", &["Concept"]));
        group.chunks.clear();
        let engine = EntityExpansionEngine::new(Arc::new(store), Arc::new(config()));

        let expansion = engine.expand(&group, &[1.0, 0.0]).await.unwrap();
        assert!(expansion.entities.is_empty());
        assert!(expansion.paths.is_empty());
    }
}
