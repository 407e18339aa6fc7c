//! Knowledge graph read model and store abstraction
//!
//! The graph is built elsewhere (documents → chunks → entities). This module
//! only describes what retrieval reads from it:
//! - Nearest-neighbour search over chunk embeddings
//! - Keyword search over chunk text
//! - Chunk → entity occurrences (`HAS_ENTITY`)
//! - Bounded-hop traversal over domain relationships

mod memory;
mod postgres;
mod traversal;

pub use memory::{GraphSnapshot, InMemoryGraphStore, SnapshotChunk, SnapshotEntity};
pub use postgres::PgGraphStore;
pub use traversal::{ExpansionSpec, TraversalPath};

use crate::errors::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

/// Stored in `url` by ingestion when a document has no external location
pub const URL_PLACEHOLDER: &str = "None";

/// Source document owning a set of chunks
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DocumentInfo {
    /// File name, the document identity
    pub name: String,

    /// External URL, if the document was fetched from one
    pub url: Option<String>,

    /// Ingestion status
    pub status: String,

    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,

    /// Aggregate entity count recorded at ingestion
    pub node_count: i64,

    /// Aggregate relationship count recorded at ingestion
    pub relationship_count: i64,
}

impl DocumentInfo {
    /// Minimal document record, mostly useful for tests and fixtures
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: None,
            status: "Completed".to_string(),
            created_at: None,
            updated_at: None,
            node_count: 0,
            relationship_count: 0,
        }
    }

    /// URL when it is real, otherwise the file name
    pub fn source(&self) -> &str {
        match self.url.as_deref().map(str::trim) {
            Some(url) if !url.is_empty() && url != URL_PLACEHOLDER => url,
            _ => &self.name,
        }
    }
}

/// Immutable slice of document text
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChunkRecord {
    pub id: String,
    pub text: String,
    /// Ordinal position within the document
    pub position: i32,
    /// Character length of `text`
    pub length: i32,
    /// Owning document name (`PART_OF`)
    pub document: String,
}

/// Chunk returned by a search channel, with its owning document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkHit {
    pub chunk: ChunkRecord,
    pub document: DocumentInfo,
    /// Channel-local score in [0, 1]
    pub score: f32,
}

/// Known entity kinds; anything else keeps its original label
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityType {
    Person,
    Organization,
    Location,
    Event,
    Concept,
    Technology,
    Product,
    Other(String),
}

impl EntityType {
    pub fn from_label(label: &str) -> Self {
        match label {
            "Person" => EntityType::Person,
            "Organization" => EntityType::Organization,
            "Location" => EntityType::Location,
            "Event" => EntityType::Event,
            "Concept" => EntityType::Concept,
            "Technology" => EntityType::Technology,
            "Product" => EntityType::Product,
            other => EntityType::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            EntityType::Person => "Person",
            EntityType::Organization => "Organization",
            EntityType::Location => "Location",
            EntityType::Event => "Event",
            EntityType::Concept => "Concept",
            EntityType::Technology => "Technology",
            EntityType::Product => "Product",
            EntityType::Other(label) => label,
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Node label, parsed once when the node is read
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeLabel {
    Chunk,
    Document,
    Community,
    /// Bookkeeping labels like `__Entity__` that carry no type information
    Generic(String),
    Entity(EntityType),
}

impl NodeLabel {
    pub fn parse(label: &str) -> Self {
        match label {
            "Chunk" => NodeLabel::Chunk,
            "Document" => NodeLabel::Document,
            "Community" | "__Community__" => NodeLabel::Community,
            "Entity" => NodeLabel::Generic(label.to_string()),
            l if l.starts_with("__") && l.ends_with("__") => NodeLabel::Generic(l.to_string()),
            other => NodeLabel::Entity(EntityType::from_label(other)),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            NodeLabel::Chunk => "Chunk",
            NodeLabel::Document => "Document",
            NodeLabel::Community => "Community",
            NodeLabel::Generic(label) => label,
            NodeLabel::Entity(kind) => kind.as_str(),
        }
    }

    pub fn is_generic(&self) -> bool {
        matches!(self, NodeLabel::Generic(_))
    }
}

/// Graph node as seen by retrieval
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GraphNode {
    /// Store identity; two nodes are the same node only if this matches
    pub element_id: String,

    /// Human-facing id (the entity name)
    pub id: String,

    pub labels: Vec<NodeLabel>,

    pub description: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
}

impl GraphNode {
    pub fn new(element_id: impl Into<String>, id: impl Into<String>, labels: &[&str]) -> Self {
        Self {
            element_id: element_id.into(),
            id: id.into(),
            labels: labels.iter().map(|l| NodeLabel::parse(l)).collect(),
            description: None,
            embedding: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = Some(embedding);
        self
    }

    /// First label that carries type information
    pub fn primary_type(&self) -> &str {
        self.labels
            .iter()
            .find(|l| !l.is_generic())
            .map(NodeLabel::as_str)
            .unwrap_or("Entity")
    }

    pub fn has_any_label(&self, names: &[String]) -> bool {
        self.labels
            .iter()
            .any(|l| names.iter().any(|n| n == l.as_str()))
    }
}

/// Typed, directed domain edge
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GraphRelationship {
    pub element_id: String,
    pub rel_type: String,
    pub start: String,
    pub end: String,
}

impl GraphRelationship {
    pub fn new(
        element_id: impl Into<String>,
        rel_type: impl Into<String>,
        start: impl Into<String>,
        end: impl Into<String>,
    ) -> Self {
        Self {
            element_id: element_id.into(),
            rel_type: rel_type.into(),
            start: start.into(),
            end: end.into(),
        }
    }
}

/// A domain edge together with both endpoint nodes
#[derive(Debug, Clone)]
pub struct Adjacency {
    pub relationship: GraphRelationship,
    pub start: GraphNode,
    pub end: GraphNode,
}

impl Adjacency {
    /// The endpoint opposite to `element_id`
    pub fn other(&self, element_id: &str) -> &GraphNode {
        if self.start.element_id == element_id {
            &self.end
        } else {
            &self.start
        }
    }
}

/// `HAS_ENTITY` edge from a chunk to an entity
#[derive(Debug, Clone)]
pub struct EntityOccurrence {
    pub chunk_id: String,
    pub entity: GraphNode,
}

/// Restricts candidate chunks to selected documents
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DocumentFilter {
    pub document_names: Vec<String>,
}

impl DocumentFilter {
    pub fn new(document_names: Vec<String>) -> Self {
        Self { document_names }
    }

    pub fn is_empty(&self) -> bool {
        self.document_names.is_empty()
    }

    pub fn allows(&self, document_name: &str) -> bool {
        self.is_empty() || self.document_names.iter().any(|n| n == document_name)
    }
}

/// Lowercased search terms; punctuation stripped, short words dropped
pub fn keyword_terms(query: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    query
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.chars().count() > 2)
        .map(str::to_lowercase)
        .filter(|w| seen.insert(w.clone()))
        .collect()
}

/// Read access to the knowledge graph.
///
/// Every method is a read; implementations must be safe to call from many
/// documents' expansions at once.
#[async_trait]
pub trait GraphStore: Send + Sync {
    /// Nearest chunks by embedding, best first, ties by chunk id
    async fn vector_search(
        &self,
        embedding: &[f32],
        limit: usize,
        filter: &DocumentFilter,
    ) -> Result<Vec<ChunkHit>>;

    /// Full-text matches over chunk text, best first, ties by chunk id
    async fn keyword_search(
        &self,
        query: &str,
        limit: usize,
        filter: &DocumentFilter,
    ) -> Result<Vec<ChunkHit>>;

    /// Entities attached to the given chunks via `HAS_ENTITY`
    async fn entities_for_chunks(&self, chunk_ids: &[String]) -> Result<Vec<EntityOccurrence>>;

    /// Domain edges touching any of the given nodes, minus excluded types
    async fn neighborhood(
        &self,
        element_ids: &[String],
        excluded_relationship_types: &[String],
    ) -> Result<Vec<Adjacency>>;

    /// Fail with a configuration error when a required index is missing
    async fn verify_indexes(&self) -> Result<()>;

    /// Connectivity check
    async fn ping(&self) -> Result<()>;

    /// Bounded-hop expansion from `start`.
    ///
    /// Paths come out breadth-first: the zero-length path, then 1-hop, then
    /// 2-hop paths; at most `spec.path_cap` of them.
    async fn expand(&self, start: &GraphNode, spec: &ExpansionSpec) -> Result<Vec<TraversalPath>> {
        traversal::expand_breadth_first(self, start, spec).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_label_parsing() {
        assert_eq!(NodeLabel::parse("Chunk"), NodeLabel::Chunk);
        assert_eq!(NodeLabel::parse("__Community__"), NodeLabel::Community);
        assert!(NodeLabel::parse("__Entity__").is_generic());
        assert_eq!(
            NodeLabel::parse("Person"),
            NodeLabel::Entity(EntityType::Person)
        );
        assert_eq!(
            NodeLabel::parse("Protein"),
            NodeLabel::Entity(EntityType::Other("Protein".into()))
        );
    }

    #[test]
    fn test_primary_type_skips_generic_labels() {
        let node = GraphNode::new("4:1", "Marie Curie", &["__Entity__", "Person"]);
        assert_eq!(node.primary_type(), "Person");

        let bare = GraphNode::new("4:2", "thing", &["__Entity__"]);
        assert_eq!(bare.primary_type(), "Entity");
    }

    #[test]
    fn test_document_source() {
        let mut doc = DocumentInfo::named("report.pdf");
        assert_eq!(doc.source(), "report.pdf");

        doc.url = Some(URL_PLACEHOLDER.to_string());
        assert_eq!(doc.source(), "report.pdf");

        doc.url = Some("https://example.org/report".to_string());
        assert_eq!(doc.source(), "https://example.org/report");
    }

    #[test]
    fn test_keyword_terms() {
        assert_eq!(
            keyword_terms("Who founded ACME, Inc.?"),
            vec!["who", "founded", "acme", "inc"]
        );
        assert!(keyword_terms("a b ?").is_empty());
    }

    #[test]
    fn test_document_filter() {
        let all = DocumentFilter::default();
        assert!(all.allows("x.pdf"));

        let some = DocumentFilter::new(vec!["a.pdf".into()]);
        assert!(some.allows("a.pdf"));
        assert!(!some.allows("b.pdf"));
    }
}
