//! Fixed-length embeddings via signed feature hashing.
//!
//! Each token is hashed with SHA-256; the first eight bytes pick a slot and
//! the ninth byte picks the sign. The accumulated vector is L2-normalised so
//! embeddings of different inputs are comparable by dot product.

use serde::Serialize;
use sha2::{Digest, Sha256};

use super::graph::ArenaGraph;
use crate::packet::{mean_confidence, Fact};

/// What an embedding was computed from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TensorSource {
    /// An [`ArenaGraph`].
    Graph,
    /// A list of facts.
    Facts,
}

/// Facts about how an embedding was produced.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TensorMetadata {
    /// Input kind.
    pub source: TensorSource,
    /// Number of items (nodes or facts) embedded.
    pub item_count: usize,
    /// Number of edges embedded (graphs only).
    pub edge_count: usize,
    /// Mean fact confidence (facts only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mean_confidence: Option<f64>,
}

/// Fixed-length embedding plus metadata.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Tensor {
    /// Embedding values; length equals the configured dimension.
    pub values: Vec<f32>,
    /// Production metadata.
    pub metadata: TensorMetadata,
}

impl Tensor {
    /// Embedding dimension.
    pub fn dim(&self) -> usize {
        self.values.len()
    }

    /// Dot product with another tensor of the same dimension.
    pub fn dot(&self, other: &Tensor) -> f32 {
        self.values
            .iter()
            .zip(&other.values)
            .map(|(a, b)| a * b)
            .sum()
    }
}

/// Embed a graph: node kinds and labels, plus edge shapes weighted by edge weight.
pub fn tensorize(graph: &ArenaGraph, dim: usize) -> Tensor {
    let mut values = vec![0.0f32; dim.max(1)];
    for node in &graph.nodes {
        accumulate(&mut values, &format!("kind:{}", node.kind), 1.0);
        for token in tokens(&node.label) {
            accumulate(&mut values, &token, 1.0);
        }
    }
    for edge in &graph.edges {
        let source_kind = graph.nodes.get(edge.source).map_or("", |n| n.kind.as_str());
        let target_kind = graph.nodes.get(edge.target).map_or("", |n| n.kind.as_str());
        #[allow(clippy::cast_possible_truncation)]
        let weight = (edge.weight * 0.5) as f32;
        accumulate(
            &mut values,
            &format!("edge:{}:{source_kind}->{target_kind}", edge.kind.as_str()),
            weight,
        );
    }
    normalize(&mut values);
    Tensor {
        values,
        metadata: TensorMetadata {
            source: TensorSource::Graph,
            item_count: graph.nodes.len(),
            edge_count: graph.edges.len(),
            mean_confidence: None,
        },
    }
}

/// Embed facts, weighting each fact's tokens by its confidence.
pub fn tensorize_facts(facts: &[Fact], dim: usize) -> Tensor {
    let mut values = vec![0.0f32; dim.max(1)];
    for fact in facts {
        #[allow(clippy::cast_possible_truncation)]
        let weight = fact.confidence.clamp(0.0, 1.0) as f32;
        accumulate(&mut values, &format!("category:{:?}", fact.category), weight);
        for token in tokens(&fact.content) {
            accumulate(&mut values, &token, weight);
        }
    }
    normalize(&mut values);
    Tensor {
        values,
        metadata: TensorMetadata {
            source: TensorSource::Facts,
            item_count: facts.len(),
            edge_count: 0,
            mean_confidence: Some(mean_confidence(facts)),
        },
    }
}

fn tokens(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
}

fn accumulate(values: &mut [f32], token: &str, weight: f32) {
    let digest = Sha256::digest(token.as_bytes());
    let mut slot_bytes = [0u8; 8];
    slot_bytes.copy_from_slice(&digest[..8]);
    let hash = u64::from_le_bytes(slot_bytes);
    let dim = u64::try_from(values.len()).unwrap_or(u64::MAX).max(1);
    let slot = usize::try_from(hash % dim).unwrap_or(0);
    let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
    if let Some(v) = values.get_mut(slot) {
        *v += sign * weight;
    }
}

fn normalize(values: &mut [f32]) {
    let norm = values.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for v in values.iter_mut() {
            *v /= norm;
        }
    }
}
