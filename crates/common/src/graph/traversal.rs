//! Bounded breadth-first path enumeration over domain edges

use super::{Adjacency, GraphNode, GraphRelationship, GraphStore};
use crate::errors::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Limits and filters for one entity's expansion
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExpansionSpec {
    /// Maximum hops from the start node
    pub max_depth: usize,

    /// Maximum raw paths returned, counted before any deduplication
    pub path_cap: usize,

    /// Edge types never followed
    pub excluded_relationship_types: Vec<String>,

    /// Nodes carrying any of these labels are never entered
    pub excluded_node_labels: Vec<String>,
}

/// Walk from a start node: `nodes[i]` and `nodes[i + 1]` are joined by
/// `relationships[i]`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraversalPath {
    pub nodes: Vec<GraphNode>,
    pub relationships: Vec<GraphRelationship>,
}

impl TraversalPath {
    /// The zero-length path
    pub fn single(node: GraphNode) -> Self {
        Self {
            nodes: vec![node],
            relationships: Vec::new(),
        }
    }

    /// Number of relationships walked
    pub fn depth(&self) -> usize {
        self.relationships.len()
    }

    pub fn start(&self) -> &GraphNode {
        &self.nodes[0]
    }

    fn tip(&self) -> &GraphNode {
        &self.nodes[self.nodes.len() - 1]
    }

    fn visits(&self, element_id: &str) -> bool {
        self.nodes.iter().any(|n| n.element_id == element_id)
    }

    fn extended(&self, relationship: GraphRelationship, node: GraphNode) -> Self {
        let mut next = self.clone();
        next.relationships.push(relationship);
        next.nodes.push(node);
        next
    }
}

/// Enumerate paths level by level, stopping at `spec.path_cap`.
///
/// Within a level, paths extend in the order their parents were found and
/// each tip's edges are taken in relationship-identity order, so the cut at
/// the cap is the same on every run over the same graph.
pub(crate) async fn expand_breadth_first<S>(
    store: &S,
    start: &GraphNode,
    spec: &ExpansionSpec,
) -> Result<Vec<TraversalPath>>
where
    S: GraphStore + ?Sized,
{
    if spec.path_cap == 0 {
        return Ok(Vec::new());
    }

    let mut paths = vec![TraversalPath::single(start.clone())];
    let mut frontier: Vec<usize> = vec![0];

    for _ in 0..spec.max_depth {
        if frontier.is_empty() || paths.len() >= spec.path_cap {
            break;
        }

        let mut tips: Vec<String> = frontier
            .iter()
            .map(|&i| paths[i].tip().element_id.clone())
            .collect();
        tips.sort();
        tips.dedup();

        let edges = store
            .neighborhood(&tips, &spec.excluded_relationship_types)
            .await?;
        let by_node = index_by_endpoint(&edges);

        let mut next_frontier = Vec::new();
        for parent in frontier {
            let path = paths[parent].clone();
            let tip_id = path.tip().element_id.clone();

            let Some(candidates) = by_node.get(tip_id.as_str()) else {
                continue;
            };

            for edge in candidates {
                if spec
                    .excluded_relationship_types
                    .iter()
                    .any(|t| *t == edge.relationship.rel_type)
                {
                    continue;
                }

                let neighbor = edge.other(&tip_id);
                if path.visits(&neighbor.element_id)
                    || neighbor.has_any_label(&spec.excluded_node_labels)
                {
                    continue;
                }

                paths.push(path.extended(edge.relationship.clone(), neighbor.clone()));
                next_frontier.push(paths.len() - 1);

                if paths.len() >= spec.path_cap {
                    return Ok(paths);
                }
            }
        }

        frontier = next_frontier;
    }

    Ok(paths)
}

/// Edges keyed by each endpoint, sorted by relationship identity
fn index_by_endpoint(edges: &[Adjacency]) -> HashMap<&str, Vec<&Adjacency>> {
    let mut by_node: HashMap<&str, Vec<&Adjacency>> = HashMap::new();
    for edge in edges {
        by_node
            .entry(edge.relationship.start.as_str())
            .or_default()
            .push(edge);
        if edge.relationship.end != edge.relationship.start {
            by_node
                .entry(edge.relationship.end.as_str())
                .or_default()
                .push(edge);
        }
    }
    for list in by_node.values_mut() {
        list.sort_by(|a, b| a.relationship.element_id.cmp(&b.relationship.element_id));
    }
    by_node
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{DocumentInfo, InMemoryGraphStore};

    fn spec(max_depth: usize, path_cap: usize) -> ExpansionSpec {
        ExpansionSpec {
            max_depth,
            path_cap,
            excluded_relationship_types: vec!["HAS_ENTITY".into(), "PART_OF".into()],
            excluded_node_labels: vec!["Chunk".into(), "Document".into(), "Community".into()],
        }
    }

    /// a - b - c chain plus a community node hanging off a
    fn chain_store() -> InMemoryGraphStore {
        let mut store = InMemoryGraphStore::new();
        store.add_document(DocumentInfo::named("doc.pdf"));
        for (eid, name) in [("e:a", "A"), ("e:b", "B"), ("e:c", "C")] {
            store.add_entity(GraphNode::new(eid, name, &["__Entity__", "Concept"]));
        }
        store.add_entity(GraphNode::new("e:comm", "community-1", &["__Community__"]));
        store
            .add_relationship(GraphRelationship::new("r:1", "RELATED_TO", "e:a", "e:b"))
            .unwrap();
        store
            .add_relationship(GraphRelationship::new("r:2", "PART_OF", "e:b", "e:c"))
            .unwrap();
        store
            .add_relationship(GraphRelationship::new("r:3", "USES", "e:c", "e:b"))
            .unwrap();
        store
            .add_relationship(GraphRelationship::new("r:4", "IN_COMMUNITY", "e:a", "e:comm"))
            .unwrap();
        store
    }

    fn start_node() -> GraphNode {
        GraphNode::new("e:a", "A", &["__Entity__", "Concept"])
    }

    #[tokio::test]
    async fn test_zero_length_path_comes_first() {
        let store = chain_store();
        let paths = store.expand(&start_node(), &spec(1, 20)).await.unwrap();

        assert_eq!(paths[0].depth(), 0);
        assert_eq!(paths[0].start().element_id, "e:a");
    }

    #[tokio::test]
    async fn test_one_hop_respects_exclusions() {
        let store = chain_store();
        let paths = store.expand(&start_node(), &spec(1, 20)).await.unwrap();

        // community neighbour is filtered, only a-b remains
        assert_eq!(paths.len(), 2);
        assert_eq!(paths[1].relationships[0].element_id, "r:1");
        assert!(paths.iter().all(|p| p.depth() <= 1));
    }

    #[tokio::test]
    async fn test_two_hops_skip_excluded_edge_types() {
        let store = chain_store();
        let paths = store.expand(&start_node(), &spec(2, 40)).await.unwrap();

        // a, a-b, a-b-c via USES (PART_OF is never walked)
        assert_eq!(paths.len(), 3);
        assert_eq!(paths[2].depth(), 2);
        assert_eq!(paths[2].relationships[1].rel_type, "USES");
        assert!(paths.iter().all(|p| p.depth() <= 2));
    }

    #[tokio::test]
    async fn test_cap_counts_raw_paths() {
        let store = chain_store();
        let paths = store.expand(&start_node(), &spec(2, 2)).await.unwrap();
        assert_eq!(paths.len(), 2);

        let none = store.expand(&start_node(), &spec(2, 0)).await.unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn test_zero_depth_is_entity_alone() {
        let store = chain_store();
        let paths = store.expand(&start_node(), &spec(0, 20)).await.unwrap();
        assert_eq!(paths.len(), 1);
        assert_eq!(paths[0].depth(), 0);
    }
}
