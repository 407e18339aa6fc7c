//! In-memory graph store
//!
//! Backs tests and local runs. Search semantics mirror the Postgres store:
//! cosine similarity rescaled to [0, 1] for the vector channel, share of
//! query terms present for the keyword channel.

use super::{
    keyword_terms, Adjacency, ChunkHit, ChunkRecord, DocumentFilter, DocumentInfo,
    EntityOccurrence, GraphNode, GraphRelationship, GraphStore,
};
use crate::embeddings::cosine_similarity;
use crate::errors::{AppError, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use tracing::info;

/// JSON export of a small graph, loaded by the binary's memory mode
#[derive(Debug, Default, Deserialize)]
pub struct GraphSnapshot {
    #[serde(default)]
    pub documents: Vec<DocumentInfo>,
    #[serde(default)]
    pub chunks: Vec<SnapshotChunk>,
    #[serde(default)]
    pub entities: Vec<SnapshotEntity>,
    /// `(chunk_id, entity_element_id)` pairs
    #[serde(default)]
    pub chunk_entities: Vec<(String, String)>,
    #[serde(default)]
    pub relationships: Vec<GraphRelationship>,
}

#[derive(Debug, Deserialize)]
pub struct SnapshotChunk {
    #[serde(flatten)]
    pub record: ChunkRecord,
    pub embedding: Vec<f32>,
}

#[derive(Debug, Deserialize)]
pub struct SnapshotEntity {
    pub element_id: String,
    pub id: String,
    pub labels: Vec<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub embedding: Option<Vec<f32>>,
}

struct StoredChunk {
    record: ChunkRecord,
    embedding: Vec<f32>,
    /// Lowercased words for keyword matching
    terms: HashSet<String>,
}

/// Knowledge graph held in memory
pub struct InMemoryGraphStore {
    documents: HashMap<String, DocumentInfo>,

    /// Chunk id -> chunk, ordered for deterministic scans
    chunks: BTreeMap<String, StoredChunk>,

    /// Entity element id -> node
    entities: HashMap<String, GraphNode>,

    /// Chunk id -> entity element ids (`HAS_ENTITY`)
    chunk_entities: HashMap<String, Vec<String>>,

    /// Relationship element id -> relationship
    relationships: BTreeMap<String, GraphRelationship>,

    /// Node element id -> ids of relationships touching it
    adjacency: HashMap<String, Vec<String>>,

    vector_index: bool,
    keyword_index: bool,
}

impl InMemoryGraphStore {
    /// Create an empty store with both indexes available
    pub fn new() -> Self {
        Self {
            documents: HashMap::new(),
            chunks: BTreeMap::new(),
            entities: HashMap::new(),
            chunk_entities: HashMap::new(),
            relationships: BTreeMap::new(),
            adjacency: HashMap::new(),
            vector_index: true,
            keyword_index: true,
        }
    }

    /// Simulate a deployment where the chunk vector index was never created
    pub fn without_vector_index(mut self) -> Self {
        self.vector_index = false;
        self
    }

    /// Simulate a deployment where the full-text index was never created
    pub fn without_keyword_index(mut self) -> Self {
        self.keyword_index = false;
        self
    }

    pub fn add_document(&mut self, document: DocumentInfo) {
        self.documents.insert(document.name.clone(), document);
    }

    /// Add a chunk; its document must already exist
    pub fn add_chunk(&mut self, record: ChunkRecord, embedding: Vec<f32>) -> Result<()> {
        if !self.documents.contains_key(&record.document) {
            return Err(AppError::Validation {
                message: format!(
                    "chunk '{}' references unknown document '{}'",
                    record.id, record.document
                ),
                field: Some("document".to_string()),
            });
        }

        let terms = keyword_terms(&record.text).into_iter().collect();
        self.chunks.insert(
            record.id.clone(),
            StoredChunk {
                record,
                embedding,
                terms,
            },
        );
        Ok(())
    }

    pub fn add_entity(&mut self, node: GraphNode) {
        self.entities.insert(node.element_id.clone(), node);
    }

    /// Record a `HAS_ENTITY` edge
    pub fn link_entity(&mut self, chunk_id: &str, entity_element_id: &str) -> Result<()> {
        if !self.chunks.contains_key(chunk_id) {
            return Err(not_found("chunk", chunk_id));
        }
        if !self.entities.contains_key(entity_element_id) {
            return Err(not_found("entity", entity_element_id));
        }

        let linked = self.chunk_entities.entry(chunk_id.to_string()).or_default();
        if !linked.iter().any(|e| e == entity_element_id) {
            linked.push(entity_element_id.to_string());
        }
        Ok(())
    }

    /// Add a domain relationship between two known nodes
    pub fn add_relationship(&mut self, relationship: GraphRelationship) -> Result<()> {
        for endpoint in [&relationship.start, &relationship.end] {
            if !self.entities.contains_key(endpoint) {
                return Err(not_found("node", endpoint));
            }
        }

        for endpoint in [relationship.start.clone(), relationship.end.clone()] {
            let touching = self.adjacency.entry(endpoint).or_default();
            if !touching.contains(&relationship.element_id) {
                touching.push(relationship.element_id.clone());
            }
        }
        self.relationships
            .insert(relationship.element_id.clone(), relationship);
        Ok(())
    }

    /// Build a store from a snapshot, validating every reference
    pub fn from_snapshot(snapshot: GraphSnapshot) -> Result<Self> {
        let mut store = Self::new();
        for document in snapshot.documents {
            store.add_document(document);
        }
        for chunk in snapshot.chunks {
            store.add_chunk(chunk.record, chunk.embedding)?;
        }
        for entity in snapshot.entities {
            let labels: Vec<&str> = entity.labels.iter().map(String::as_str).collect();
            let mut node = GraphNode::new(entity.element_id, entity.id, &labels);
            node.description = entity.description;
            node.embedding = entity.embedding;
            store.add_entity(node);
        }
        for (chunk_id, element_id) in &snapshot.chunk_entities {
            store.link_entity(chunk_id, element_id)?;
        }
        for relationship in snapshot.relationships {
            store.add_relationship(relationship)?;
        }
        Ok(store)
    }

    /// Read a JSON snapshot from disk
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let snapshot: GraphSnapshot = serde_json::from_str(&raw)?;
        let store = Self::from_snapshot(snapshot)?;
        info!(
            path = %path.as_ref().display(),
            documents = store.documents.len(),
            chunks = store.chunks.len(),
            entities = store.entities.len(),
            relationships = store.relationships.len(),
            "Loaded graph snapshot"
        );
        Ok(store)
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    fn hit(&self, chunk: &StoredChunk, score: f32) -> Option<ChunkHit> {
        let document = self.documents.get(&chunk.record.document)?;
        Some(ChunkHit {
            chunk: chunk.record.clone(),
            document: document.clone(),
            score,
        })
    }
}

impl Default for InMemoryGraphStore {
    fn default() -> Self {
        Self::new()
    }
}

fn not_found(kind: &str, id: &str) -> AppError {
    AppError::Validation {
        message: format!("unknown {} '{}'", kind, id),
        field: None,
    }
}

/// Best score first, ties broken by chunk id
fn rank_hits(mut hits: Vec<ChunkHit>, limit: usize) -> Vec<ChunkHit> {
    hits.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.chunk.id.cmp(&b.chunk.id))
    });
    hits.truncate(limit);
    hits
}

#[async_trait]
impl GraphStore for InMemoryGraphStore {
    async fn vector_search(
        &self,
        embedding: &[f32],
        limit: usize,
        filter: &DocumentFilter,
    ) -> Result<Vec<ChunkHit>> {
        if !self.vector_index {
            return Err(AppError::configuration("chunk vector index is missing"));
        }

        let hits = self
            .chunks
            .values()
            .filter(|c| filter.allows(&c.record.document))
            .filter_map(|c| {
                let cosine = cosine_similarity(embedding, &c.embedding)?;
                self.hit(c, ((1.0 + cosine) / 2.0).clamp(0.0, 1.0))
            })
            .collect();

        Ok(rank_hits(hits, limit))
    }

    async fn keyword_search(
        &self,
        query: &str,
        limit: usize,
        filter: &DocumentFilter,
    ) -> Result<Vec<ChunkHit>> {
        if !self.keyword_index {
            return Err(AppError::configuration("chunk full-text index is missing"));
        }

        let terms = keyword_terms(query);
        if terms.is_empty() {
            return Ok(Vec::new());
        }

        let hits = self
            .chunks
            .values()
            .filter(|c| filter.allows(&c.record.document))
            .filter_map(|c| {
                let matched = terms.iter().filter(|t| c.terms.contains(*t)).count();
                if matched == 0 {
                    return None;
                }
                self.hit(c, matched as f32 / terms.len() as f32)
            })
            .collect();

        Ok(rank_hits(hits, limit))
    }

    async fn entities_for_chunks(&self, chunk_ids: &[String]) -> Result<Vec<EntityOccurrence>> {
        let mut occurrences = Vec::new();
        for chunk_id in chunk_ids {
            let Some(linked) = self.chunk_entities.get(chunk_id) else {
                continue;
            };
            for element_id in linked {
                if let Some(entity) = self.entities.get(element_id) {
                    occurrences.push(EntityOccurrence {
                        chunk_id: chunk_id.clone(),
                        entity: entity.clone(),
                    });
                }
            }
        }
        Ok(occurrences)
    }

    async fn neighborhood(
        &self,
        element_ids: &[String],
        excluded_relationship_types: &[String],
    ) -> Result<Vec<Adjacency>> {
        let mut seen = HashSet::new();
        let mut edges = Vec::new();

        for element_id in element_ids {
            let Some(touching) = self.adjacency.get(element_id) else {
                continue;
            };
            for rel_id in touching {
                if !seen.insert(rel_id.clone()) {
                    continue;
                }
                let Some(rel) = self.relationships.get(rel_id) else {
                    continue;
                };
                if excluded_relationship_types.iter().any(|t| *t == rel.rel_type) {
                    continue;
                }
                let (Some(start), Some(end)) =
                    (self.entities.get(&rel.start), self.entities.get(&rel.end))
                else {
                    continue;
                };
                edges.push(Adjacency {
                    relationship: rel.clone(),
                    start: start.clone(),
                    end: end.clone(),
                });
            }
        }

        edges.sort_by(|a, b| a.relationship.element_id.cmp(&b.relationship.element_id));
        Ok(edges)
    }

    async fn verify_indexes(&self) -> Result<()> {
        if !self.vector_index {
            return Err(AppError::configuration("chunk vector index is missing"));
        }
        if !self.keyword_index {
            return Err(AppError::configuration("chunk full-text index is missing"));
        }
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(id: &str, document: &str, text: &str) -> ChunkRecord {
        ChunkRecord {
            id: id.to_string(),
            text: text.to_string(),
            position: 0,
            length: text.chars().count() as i32,
            document: document.to_string(),
        }
    }

    fn store() -> InMemoryGraphStore {
        let mut store = InMemoryGraphStore::new();
        store.add_document(DocumentInfo::named("a.pdf"));
        store.add_document(DocumentInfo::named("b.pdf"));
        store
            .add_chunk(chunk("c1", "a.pdf", "Rust ownership rules"), vec![1.0, 0.0])
            .unwrap();
        store
            .add_chunk(chunk("c2", "b.pdf", "Borrow checker and ownership"), vec![0.0, 1.0])
            .unwrap();
        store
            .add_chunk(chunk("c3", "b.pdf", "Unrelated gardening notes"), vec![1.0, 0.0])
            .unwrap();
        store
    }

    #[tokio::test]
    async fn test_vector_search_ranks_and_breaks_ties_by_id() {
        let store = store();
        let hits = store
            .vector_search(&[1.0, 0.0], 10, &DocumentFilter::default())
            .await
            .unwrap();

        let ids: Vec<&str> = hits.iter().map(|h| h.chunk.id.as_str()).collect();
        assert_eq!(ids, vec!["c1", "c3", "c2"]);
        assert!((hits[0].score - 1.0).abs() < 1e-6);
        assert!((hits[2].score - 0.5).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_keyword_search_scores_term_share() {
        let store = store();
        let hits = store
            .keyword_search("ownership rules", 10, &DocumentFilter::default())
            .await
            .unwrap();

        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].chunk.id, "c1");
        assert!((hits[0].score - 1.0).abs() < 1e-6);
        assert!((hits[1].score - 0.5).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_document_filter_applies_to_both_channels() {
        let store = store();
        let filter = DocumentFilter::new(vec!["a.pdf".into()]);

        let vector = store.vector_search(&[0.0, 1.0], 10, &filter).await.unwrap();
        assert!(vector.iter().all(|h| h.document.name == "a.pdf"));

        let keyword = store.keyword_search("ownership", 10, &filter).await.unwrap();
        assert_eq!(keyword.len(), 1);
    }

    #[tokio::test]
    async fn test_missing_indexes_are_configuration_errors() {
        let store = store().without_vector_index();
        let err = store
            .vector_search(&[1.0, 0.0], 5, &DocumentFilter::default())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Configuration { .. }));
        assert!(store.verify_indexes().await.is_err());

        let store = InMemoryGraphStore::new().without_keyword_index();
        assert!(store
            .keyword_search("x y z words", 5, &DocumentFilter::default())
            .await
            .is_err());
    }

    #[test]
    fn test_chunk_requires_document() {
        let mut store = InMemoryGraphStore::new();
        tokio_test::assert_err!(store.add_chunk(chunk("c1", "missing.pdf", "t"), vec![]));
    }

    #[tokio::test]
    async fn test_snapshot_builds_store() {
        let json = r#"{
            "documents": [{"name": "a.pdf", "url": null, "status": "Completed",
                "created_at": null, "updated_at": null, "node_count": 2, "relationship_count": 1}],
            "chunks": [{"id": "c1", "text": "Marie Curie studied radium", "position": 0,
                "length": 26, "document": "a.pdf", "embedding": [1.0, 0.0]}],
            "entities": [
                {"element_id": "e:1", "id": "Marie Curie", "labels": ["__Entity__", "Person"]},
                {"element_id": "e:2", "id": "Radium", "labels": ["Concept"], "description": "element"}
            ],
            "chunk_entities": [["c1", "e:1"]],
            "relationships": [{"element_id": "r:1", "rel_type": "STUDIED", "start": "e:1", "end": "e:2"}]
        }"#;
        let snapshot: GraphSnapshot = serde_json::from_str(json).unwrap();
        let store = InMemoryGraphStore::from_snapshot(snapshot).unwrap();

        assert_eq!(store.chunk_count(), 1);
        let occurrences = store.entities_for_chunks(&["c1".into()]).await.unwrap();
        assert_eq!(occurrences[0].entity.primary_type(), "Person");

        let edges = store.neighborhood(&["e:1".into()], &[]).await.unwrap();
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].other("e:1").id, "Radium");
    }

    #[test]
    fn test_snapshot_rejects_dangling_link() {
        let snapshot = GraphSnapshot {
            chunk_entities: vec![("c1".into(), "e:1".into())],
            ..GraphSnapshot::default()
        };
        assert!(InMemoryGraphStore::from_snapshot(snapshot).is_err());
    }

    #[tokio::test]
    async fn test_entities_for_chunks() {
        let mut store = store();
        store.add_entity(GraphNode::new("e:1", "Rust", &["Technology"]));
        store.link_entity("c1", "e:1").unwrap();
        store.link_entity("c2", "e:1").unwrap();
        store.link_entity("c2", "e:1").unwrap();

        let occurrences = store
            .entities_for_chunks(&["c1".into(), "c2".into(), "c3".into()])
            .await
            .unwrap();
        assert_eq!(occurrences.len(), 2);
        assert!(store.link_entity("c1", "e:missing").is_err());
    }
}
