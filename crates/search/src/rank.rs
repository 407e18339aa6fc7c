//! Final ordering of document bundles

use crate::metadata::DocumentMetadata;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Formatted evidence for one source document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentBundle {
    pub document_name: String,
    pub aggregate_score: f32,
    pub text: String,
    pub metadata: DocumentMetadata,
}

/// Aggregate score descending; equal scores by document name
pub fn rank(mut bundles: Vec<DocumentBundle>) -> Vec<DocumentBundle> {
    bundles.sort_by(|a, b| {
        b.aggregate_score
            .partial_cmp(&a.aggregate_score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.document_name.cmp(&b.document_name))
    });
    bundles
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::EntityIds;

    fn bundle(name: &str, score: f32) -> DocumentBundle {
        DocumentBundle {
            document_name: name.to_string(),
            aggregate_score: score,
            text: String::new(),
            metadata: DocumentMetadata {
                length: 0,
                source: name.to_string(),
                chunk_details: Vec::new(),
                entities: EntityIds::default(),
            },
        }
    }

    fn names(bundles: &[DocumentBundle]) -> Vec<&str> {
        bundles.iter().map(|b| b.document_name.as_str()).collect()
    }

    #[test]
    fn test_descending_by_score() {
        let ranked = rank(vec![bundle("a", 0.2), bundle("b", 0.9), bundle("c", 0.5)]);
        assert_eq!(names(&ranked), vec!["b", "c", "a"]);
    }

    #[test]
    fn test_ties_by_name() {
        let ranked = rank(vec![bundle("z", 0.5), bundle("m", 0.5)]);
        assert_eq!(names(&ranked), vec!["m", "z"]);
    }
}
