//! Identity-only metadata for a formatted document

use crate::aggregate::DocumentGroup;
use crate::dedup::ExpandedGraph;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkDetail {
    pub id: String,
    pub score: f32,
}

/// Ids for the detail service to hydrate
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntityIds {
    #[serde(rename = "entityids")]
    pub entity_ids: Vec<String>,
    #[serde(rename = "relationshipids")]
    pub relationship_ids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    /// Character count of the formatted text
    pub length: usize,

    /// External URL, or the file name when there is none
    pub source: String,

    #[serde(rename = "chunkdetails")]
    pub chunk_details: Vec<ChunkDetail>,

    pub entities: EntityIds,
}

pub fn build_metadata(
    group: &DocumentGroup,
    graph: &ExpandedGraph,
    text: &str,
) -> DocumentMetadata {
    DocumentMetadata {
        length: text.chars().count(),
        source: group.document.source().to_string(),
        chunk_details: group
            .chunks
            .iter()
            .map(|c| ChunkDetail {
                id: c.chunk.id.clone(),
                score: c.score,
            })
            .collect(),
        entities: EntityIds {
            entity_ids: graph
                .unique_nodes
                .iter()
                .map(|n| n.element_id.clone())
                .collect(),
            relationship_ids: graph
                .unique_relationships
                .iter()
                .map(|r| r.element_id.clone())
                .collect(),
        },
    }
}
