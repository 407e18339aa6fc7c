//! Text rendering of a document's evidence
//!
//! Three sections in fixed order, separated by `----` lines:
//!
//! ```text
//! Text Content:
//! <chunk 1>
//! ----
//! <chunk 2>
//! ----
//! Entities:
//! Person:Marie Curie (physicist)
//! ----
//! Relationships:
//! Person:Marie Curie DISCOVERED Concept:Radium
//! ```

use crate::aggregate::DocumentGroup;
use crate::dedup::ExpandedGraph;
use kgforge_common::graph::{GraphNode, GraphRelationship};
use std::collections::HashMap;

pub const SECTION_SEPARATOR: &str = "\n----\n";

/// `{type}:{id} ({description})`, description clause dropped when blank
pub fn entity_line(node: &GraphNode) -> String {
    match node.description.as_deref().map(str::trim) {
        Some(description) if !description.is_empty() => {
            format!("{}:{} ({})", node.primary_type(), node.id, description)
        }
        _ => format!("{}:{}", node.primary_type(), node.id),
    }
}

/// `{startType}:{startId} {relType} {endType}:{endId}`
pub fn relationship_line(
    relationship: &GraphRelationship,
    nodes: &HashMap<&str, &GraphNode>,
) -> String {
    format!(
        "{} {} {}",
        endpoint(&relationship.start, nodes),
        relationship.rel_type,
        endpoint(&relationship.end, nodes)
    )
}

fn endpoint(element_id: &str, nodes: &HashMap<&str, &GraphNode>) -> String {
    match nodes.get(element_id) {
        Some(node) => format!("{}:{}", node.primary_type(), node.id),
        None => format!("Entity:{}", element_id),
    }
}

/// Byte-identical for identical inputs regardless of path discovery order
pub fn format_document(group: &DocumentGroup, graph: &ExpandedGraph) -> String {
    let text = group
        .chunks
        .iter()
        .map(|c| c.chunk.text.as_str())
        .collect::<Vec<_>>()
        .join(SECTION_SEPARATOR);

    let mut entities: Vec<String> = graph.unique_nodes.iter().map(entity_line).collect();
    entities.sort();

    let nodes = graph.nodes_by_id();
    let mut relationships: Vec<String> = graph
        .unique_relationships
        .iter()
        .map(|r| relationship_line(r, &nodes))
        .collect();
    relationships.sort();

    format!(
        "Text Content:\n{}{}Entities:\n{}{}Relationships:\n{}",
        text,
        SECTION_SEPARATOR,
        entities.join("\n"),
        SECTION_SEPARATOR,
        relationships.join("\n")
    )
}
