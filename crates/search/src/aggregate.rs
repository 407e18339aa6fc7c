//! Groups candidate chunks by owning document

use crate::retrieval::ScoredChunk;
use kgforge_common::graph::DocumentInfo;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Chunks of one document with their mean score
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentGroup {
    pub document: DocumentInfo,

    /// Contributing chunks in retrieval order
    pub chunks: Vec<ScoredChunk>,

    /// Arithmetic mean of the chunk scores
    pub aggregate_score: f32,
}

impl DocumentGroup {
    pub fn chunk_ids(&self) -> Vec<String> {
        self.chunks.iter().map(|c| c.chunk.id.clone()).collect()
    }
}

/// Group chunks by document; groups come out in order of first appearance
pub fn aggregate(chunks: Vec<ScoredChunk>) -> Vec<DocumentGroup> {
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut groups: Vec<DocumentGroup> = Vec::new();

    for chunk in chunks {
        let name = chunk.document.name.clone();
        match index.get(&name) {
            Some(&i) => groups[i].chunks.push(chunk),
            None => {
                index.insert(name, groups.len());
                groups.push(DocumentGroup {
                    document: chunk.document.clone(),
                    chunks: vec![chunk],
                    aggregate_score: 0.0,
                });
            }
        }
    }

    for group in &mut groups {
        group.aggregate_score =
            group.chunks.iter().map(|c| c.score).sum::<f32>() / group.chunks.len() as f32;
    }

    groups
}
