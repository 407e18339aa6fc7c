//! Flattens expansion paths into per-document node and edge sets

use crate::expansion::{DocumentExpansion, RankedEntity};
use kgforge_common::graph::{GraphNode, GraphRelationship};
use std::collections::{HashMap, HashSet};

/// Deduplicated graph evidence for one document
#[derive(Debug, Clone, Default)]
pub struct ExpandedGraph {
    /// Every node on any path, once per identity, first-seen order
    pub unique_nodes: Vec<GraphNode>,

    /// Every relationship on any path, once per identity, first-seen order
    pub unique_relationships: Vec<GraphRelationship>,

    /// Ranked entity list, independent of what the paths reached
    pub unique_entities: Vec<RankedEntity>,
}

impl ExpandedGraph {
    /// Node lookup by element id
    pub fn nodes_by_id(&self) -> HashMap<&str, &GraphNode> {
        self.unique_nodes
            .iter()
            .map(|n| (n.element_id.as_str(), n))
            .collect()
    }
}

/// Identity-based dedup: nodes that merely look alike stay separate
pub fn deduplicate(expansion: DocumentExpansion) -> ExpandedGraph {
    let mut seen_nodes = HashSet::new();
    let mut seen_relationships = HashSet::new();
    let mut unique_nodes = Vec::new();
    let mut unique_relationships = Vec::new();

    for path in expansion.paths {
        for node in path.nodes {
            if seen_nodes.insert(node.element_id.clone()) {
                unique_nodes.push(node);
            }
        }
        for relationship in path.relationships {
            if seen_relationships.insert(relationship.element_id.clone()) {
                unique_relationships.push(relationship);
            }
        }
    }

    ExpandedGraph {
        unique_nodes,
        unique_relationships,
        unique_entities: expansion.entities,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kgforge_common::graph::TraversalPath;

    fn node(eid: &str, name: &str) -> GraphNode {
        GraphNode::new(eid, name, &["Person"])
    }

    fn path(nodes: &[(&str, &str)], rels: &[&str]) -> TraversalPath {
        let nodes: Vec<GraphNode> = nodes.iter().map(|(e, n)| node(e, n)).collect();
        let relationships = rels
            .iter()
            .enumerate()
            .map(|(i, r)| {
                GraphRelationship::new(*r, "KNOWS", &nodes[i].element_id, &nodes[i + 1].element_id)
            })
            .collect();
        TraversalPath {
            nodes,
            relationships,
        }
    }

    #[test]
    fn test_shared_nodes_and_edges_appear_once() {
        let expansion = DocumentExpansion {
            entities: Vec::new(),
            paths: vec![
                path(&[("e:1", "Ada")], &[]),
                path(&[("e:1", "Ada"), ("e:2", "Bob")], &["r:1"]),
                path(&[("e:2", "Bob"), ("e:1", "Ada")], &["r:1"]),
                path(&[("e:2", "Bob"), ("e:1", "Ada"), ("e:3", "Cy")], &["r:1", "r:2"]),
            ],
        };

        let graph = deduplicate(expansion);

        let nodes: Vec<&str> = graph.unique_nodes.iter().map(|n| n.element_id.as_str()).collect();
        assert_eq!(nodes, vec!["e:1", "e:2", "e:3"]);
        let rels: Vec<&str> = graph
            .unique_relationships
            .iter()
            .map(|r| r.element_id.as_str())
            .collect();
        assert_eq!(rels, vec!["r:1", "r:2"]);
    }

    #[test]
    fn test_same_name_different_identity_kept() {
        let expansion = DocumentExpansion {
            entities: Vec::new(),
            paths: vec![path(&[("e:1", "Ada")], &[]), path(&[("e:9", "Ada")], &[])],
        };

        let graph = deduplicate(expansion);
        assert_eq!(graph.unique_nodes.len(), 2);
        assert_eq!(graph.nodes_by_id().len(), 2);
    }

    #[test]
    fn test_ranked_entities_carried_in_rank_order() {
        let ranked = |eid: &str, count: usize| RankedEntity {
            entity: node(eid, eid),
            chunk_count: count,
        };
        let expansion = DocumentExpansion {
            entities: vec![ranked("e:2", 3), ranked("e:1", 1)],
            paths: vec![path(&[("e:1", "Ada")], &[])],
        };

        let graph = deduplicate(expansion);

        let entities: Vec<(&str, usize)> = graph
            .unique_entities
            .iter()
            .map(|r| (r.entity.element_id.as_str(), r.chunk_count))
            .collect();
        assert_eq!(entities, vec![("e:2", 3), ("e:1", 1)]);
        assert_eq!(graph.unique_nodes.len(), 1);
    }
}
