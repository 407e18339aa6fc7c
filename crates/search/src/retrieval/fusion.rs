//! Score fusion for the vector and keyword channels
//!
//! Two strategies:
//! - Max-normalized: each channel divided by its best score, a chunk found
//!   by both channels keeps the higher of the two
//! - Reciprocal Rank Fusion: weighted `1 / (k + rank)` per channel,
//!   rescaled so the best fused result scores 1.0

use super::ScoredChunk;
use kgforge_common::config::FusionStrategy;
use kgforge_common::graph::ChunkHit;
use std::cmp::Ordering;
use std::collections::BTreeMap;

/// Fusion parameters
#[derive(Debug, Clone)]
pub struct ScoreFusion {
    pub strategy: FusionStrategy,

    /// RRF constant k (typically 60)
    pub k: f32,

    /// RRF weight for vector results
    pub vector_weight: f32,

    /// RRF weight for keyword results
    pub keyword_weight: f32,
}

impl Default for ScoreFusion {
    fn default() -> Self {
        Self {
            strategy: FusionStrategy::MaxNormalized,
            k: 60.0,
            vector_weight: 0.6,
            keyword_weight: 0.4,
        }
    }
}

/// Result of fusion
#[derive(Debug, Clone)]
pub struct FusionResult {
    pub chunk: ScoredChunk,
    pub vector_rank: Option<usize>,
    pub keyword_rank: Option<usize>,
}

struct Entry {
    hit: ChunkHit,
    vector: Option<(usize, f32)>,
    keyword: Option<(usize, f32)>,
}

impl ScoreFusion {
    pub fn new(strategy: FusionStrategy, vector_weight: f32, keyword_weight: f32) -> Self {
        Self {
            strategy,
            vector_weight,
            keyword_weight,
            ..Self::default()
        }
    }

    /// Fuse both channels; best first, ties broken by chunk id
    pub fn fuse(
        &self,
        vector_results: Vec<ChunkHit>,
        keyword_results: Vec<ChunkHit>,
        limit: usize,
    ) -> Vec<FusionResult> {
        let vector_max = channel_max(&vector_results);
        let keyword_max = channel_max(&keyword_results);

        // BTreeMap keeps iteration independent of hash seeds
        let mut entries: BTreeMap<String, Entry> = BTreeMap::new();

        for (rank, hit) in vector_results.into_iter().enumerate() {
            let score = hit.score;
            entries
                .entry(hit.chunk.id.clone())
                .or_insert_with(|| Entry {
                    hit,
                    vector: None,
                    keyword: None,
                })
                .vector = Some((rank + 1, score));
        }

        for (rank, hit) in keyword_results.into_iter().enumerate() {
            let score = hit.score;
            entries
                .entry(hit.chunk.id.clone())
                .or_insert_with(|| Entry {
                    hit,
                    vector: None,
                    keyword: None,
                })
                .keyword = Some((rank + 1, score));
        }

        let mut results: Vec<FusionResult> = entries
            .into_values()
            .map(|entry| {
                let score = match self.strategy {
                    FusionStrategy::MaxNormalized => {
                        let v = entry.vector.map(|(_, s)| normalize(s, vector_max));
                        let k = entry.keyword.map(|(_, s)| normalize(s, keyword_max));
                        v.unwrap_or(0.0).max(k.unwrap_or(0.0))
                    }
                    FusionStrategy::ReciprocalRank => {
                        let v = entry
                            .vector
                            .map(|(r, _)| self.vector_weight / (self.k + r as f32))
                            .unwrap_or(0.0);
                        let k = entry
                            .keyword
                            .map(|(r, _)| self.keyword_weight / (self.k + r as f32))
                            .unwrap_or(0.0);
                        v + k
                    }
                };

                FusionResult {
                    chunk: ScoredChunk {
                        chunk: entry.hit.chunk,
                        document: entry.hit.document,
                        score,
                    },
                    vector_rank: entry.vector.map(|(r, _)| r),
                    keyword_rank: entry.keyword.map(|(r, _)| r),
                }
            })
            .collect();

        results.sort_by(|a, b| {
            b.chunk
                .score
                .partial_cmp(&a.chunk.score)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.chunk.chunk.id.cmp(&b.chunk.chunk.id))
        });

        results.truncate(limit);

        // RRF sums are tiny; rescale to 0-1
        if self.strategy == FusionStrategy::ReciprocalRank {
            if let Some(max_score) = results.first().map(|r| r.chunk.score) {
                if max_score > 0.0 {
                    for result in &mut results {
                        result.chunk.score /= max_score;
                    }
                }
            }
        }

        for result in &mut results {
            result.chunk.score = result.chunk.score.clamp(0.0, 1.0);
        }

        results
    }
}

fn channel_max(hits: &[ChunkHit]) -> f32 {
    hits.iter().map(|h| h.score).fold(0.0, f32::max)
}

fn normalize(score: f32, max: f32) -> f32 {
    if max > 0.0 {
        score / max
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kgforge_common::graph::{ChunkRecord, DocumentInfo};

    fn hit(id: &str, score: f32) -> ChunkHit {
        ChunkHit {
            chunk: ChunkRecord {
                id: id.to_string(),
                text: format!("text of {}", id),
                position: 0,
                length: 10,
                document: "doc.pdf".to_string(),
            },
            document: DocumentInfo::named("doc.pdf"),
            score,
        }
    }

    fn ids(results: &[FusionResult]) -> Vec<&str> {
        results.iter().map(|r| r.chunk.chunk.id.as_str()).collect()
    }

    #[test]
    fn test_rrf_fusion() {
        let fusion = ScoreFusion::new(FusionStrategy::ReciprocalRank, 0.6, 0.4);

        // Vector:  [A, B, C]
        // Keyword: [B, A, D]
        // A and B appear in both; A wins on the heavier vector weight
        let vector = vec![hit("A", 0.9), hit("B", 0.8), hit("C", 0.7)];
        let keyword = vec![hit("B", 0.9), hit("A", 0.7), hit("D", 0.6)];

        let results = fusion.fuse(vector, keyword, 10);

        assert_eq!(ids(&results)[..2], ["A", "B"]);
        assert!((results[0].chunk.score - 1.0).abs() < 1e-6);
        assert_eq!(results[0].vector_rank, Some(1));
        assert_eq!(results[0].keyword_rank, Some(2));
    }

    #[test]
    fn test_max_normalized_keeps_best_channel() {
        let fusion = ScoreFusion::default();

        let vector = vec![hit("A", 0.8), hit("B", 0.4)];
        let keyword = vec![hit("B", 0.5), hit("C", 0.25)];

        let results = fusion.fuse(vector, keyword, 10);

        // A: 0.8/0.8, B: max(0.4/0.8, 0.5/0.5), C: 0.25/0.5
        assert_eq!(ids(&results), vec!["A", "B", "C"]);
        assert!((results[1].chunk.score - 1.0).abs() < 1e-6);
        assert!((results[2].chunk.score - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_ties_break_by_chunk_id() {
        let fusion = ScoreFusion::default();
        let vector = vec![hit("z", 0.5), hit("m", 0.5), hit("a", 0.5)];

        let results = fusion.fuse(vector, Vec::new(), 2);
        assert_eq!(ids(&results), vec!["a", "m"]);
    }

    #[test]
    fn test_empty_channels() {
        let fusion = ScoreFusion::default();
        assert!(fusion.fuse(Vec::new(), Vec::new(), 5).is_empty());
    }
}
