//! Arena events and their graph form.
//!
//! Every event becomes a node. Chronologically adjacent events are linked by
//! a [`EdgeKind::Temporal`] edge; consecutive events of one actor that are not
//! already adjacent are linked by a [`EdgeKind::SameActor`] edge.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::CodecError;

/// A raw, timestamped occurrence fed into the codec.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArenaEvent {
    /// Event identifier.
    pub id: String,
    /// Event kind (e.g. `"tool_output"`, `"message"`).
    pub kind: String,
    /// Event payload text.
    pub content: String,
    /// Who produced the event, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actor: Option<String>,
    /// When the event happened.
    pub timestamp: DateTime<Utc>,
}

/// Graph node wrapping one event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphNode {
    /// Node index, equal to its chronological position.
    pub index: usize,
    /// Source event id.
    pub event_id: String,
    /// Event kind.
    pub kind: String,
    /// Event payload text.
    pub label: String,
    /// Event actor.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actor: Option<String>,
    /// Event timestamp.
    pub timestamp: DateTime<Utc>,
}

/// Relationship an edge encodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeKind {
    /// Chronologically adjacent events.
    Temporal,
    /// Consecutive events of the same actor.
    SameActor,
}

impl EdgeKind {
    /// Returns the snake_case label.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Temporal => "temporal",
            Self::SameActor => "same_actor",
        }
    }
}

/// Directed edge between two nodes (earlier to later).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphEdge {
    /// Index of the earlier node.
    pub source: usize,
    /// Index of the later node.
    pub target: usize,
    /// Edge kind.
    pub kind: EdgeKind,
    /// `1 / (1 + gap_seconds)`.
    pub weight: f64,
}

/// Summary facts about a graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphMetadata {
    /// Number of nodes.
    pub node_count: usize,
    /// Number of edges.
    pub edge_count: usize,
    /// Milliseconds between the first and last event.
    pub span_ms: i64,
    /// Distinct actors seen.
    pub actor_count: usize,
}

/// Graph form of a batch of arena events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArenaGraph {
    /// Nodes in chronological order.
    pub nodes: Vec<GraphNode>,
    /// Edges, temporal edges first.
    pub edges: Vec<GraphEdge>,
    /// Summary facts.
    pub metadata: GraphMetadata,
}

/// Parse a JSON array of arena events.
///
/// # Errors
///
/// Returns [`CodecError::UnparseableEvent`] with the index of the first bad
/// element, or of `0` if the payload is not an array.
pub fn parse_events(json: &str) -> Result<Vec<ArenaEvent>, CodecError> {
    let values: Vec<serde_json::Value> =
        serde_json::from_str(json).map_err(|e| CodecError::UnparseableEvent {
            index: 0,
            reason: e.to_string(),
        })?;
    values
        .into_iter()
        .enumerate()
        .map(|(index, value)| {
            serde_json::from_value(value).map_err(|e| CodecError::UnparseableEvent {
                index,
                reason: e.to_string(),
            })
        })
        .collect()
}

/// Build the graph form of `events`.
///
/// Events are ordered by timestamp; equal timestamps keep input order.
pub fn graphize(events: &[ArenaEvent]) -> ArenaGraph {
    let mut ordered: Vec<&ArenaEvent> = events.iter().collect();
    ordered.sort_by_key(|e| e.timestamp);

    let nodes: Vec<GraphNode> = ordered
        .iter()
        .enumerate()
        .map(|(index, e)| GraphNode {
            index,
            event_id: e.id.clone(),
            kind: e.kind.clone(),
            label: e.content.clone(),
            actor: e.actor.clone(),
            timestamp: e.timestamp,
        })
        .collect();

    let mut edges: Vec<GraphEdge> = nodes
        .windows(2)
        .filter_map(|pair| match pair {
            [a, b] => Some(edge(a, b, EdgeKind::Temporal)),
            _ => None,
        })
        .collect();

    let mut last_by_actor: HashMap<&str, &GraphNode> = HashMap::new();
    for node in &nodes {
        let Some(actor) = node.actor.as_deref() else {
            continue;
        };
        if let Some(prev) = last_by_actor.insert(actor, node) {
            if prev.index.saturating_add(1) != node.index {
                edges.push(edge(prev, node, EdgeKind::SameActor));
            }
        }
    }

    let span_ms = match (nodes.first(), nodes.last()) {
        (Some(first), Some(last)) => (last.timestamp - first.timestamp).num_milliseconds(),
        _ => 0,
    };

    let metadata = GraphMetadata {
        node_count: nodes.len(),
        edge_count: edges.len(),
        span_ms,
        actor_count: last_by_actor.len(),
    };

    ArenaGraph {
        nodes,
        edges,
        metadata,
    }
}

fn edge(from: &GraphNode, to: &GraphNode, kind: EdgeKind) -> GraphEdge {
    #[allow(clippy::cast_precision_loss)]
    let gap_secs = (to.timestamp - from.timestamp).num_milliseconds().max(0) as f64 / 1000.0;
    GraphEdge {
        source: from.index,
        target: to.index,
        kind,
        weight: 1.0 / (1.0 + gap_secs),
    }
}
