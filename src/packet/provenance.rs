//! Provenance construction and immutable chain extension.

use chrono::Utc;

use super::{Provenance, ProvenanceStep, Source, TrustLevel};

/// Allocate a provenance record with a fresh id and an empty processing chain.
pub fn create_provenance(source: Source, trust_level: TrustLevel) -> Provenance {
    Provenance {
        id: uuid::Uuid::new_v4().to_string(),
        source,
        trust_level,
        processing_chain: Vec::new(),
    }
}

/// Return a new provenance value with one more chain entry.
///
/// The input is left untouched; earlier entries keep their order.
pub fn add_provenance_step(provenance: &Provenance, step: &str, agent: &str) -> Provenance {
    let mut chain = Vec::with_capacity(provenance.processing_chain.len().saturating_add(1));
    chain.extend_from_slice(&provenance.processing_chain);
    chain.push(ProvenanceStep {
        step: step.to_owned(),
        agent: agent.to_owned(),
        timestamp: Utc::now(),
    });
    Provenance {
        id: provenance.id.clone(),
        source: provenance.source.clone(),
        trust_level: provenance.trust_level,
        processing_chain: chain,
    }
}
