//! Structural validation for every packet shape.
//!
//! Validation never fails: it returns a [`ValidationReport`] that callers must
//! check before handing a packet to the bus.

use serde::Serialize;

use super::{
    BeliefUpdatePacket, EvidencePacket, Fact, IntentPacket, MemoryWritePacket, Packet,
};

/// Outcome of validating a packet.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ValidationReport {
    /// `true` when no errors were found.
    pub valid: bool,
    /// One human-readable message per problem.
    pub errors: Vec<String>,
}

impl ValidationReport {
    fn from_errors(errors: Vec<String>) -> Self {
        Self {
            valid: errors.is_empty(),
            errors,
        }
    }
}

/// Validate an evidence packet: at least one fact, every fact valid.
pub fn validate_evidence_packet(packet: &EvidencePacket) -> ValidationReport {
    let mut errors = Vec::new();
    if packet.id.trim().is_empty() {
        errors.push("packet id is empty".to_owned());
    }
    if packet.facts.is_empty() {
        errors.push("evidence packet has no facts".to_owned());
    }
    for fact in &packet.facts {
        check_fact(fact, &mut errors);
    }
    if let Some(risk) = &packet.risk {
        if !(0.0..=1.0).contains(&risk.score) {
            errors.push(format!("risk score {} is outside [0, 1]", risk.score));
        }
    }
    ValidationReport::from_errors(errors)
}

/// Validate an intent packet: goal description, allowed tools and budget.
pub fn validate_intent_packet(packet: &IntentPacket) -> ValidationReport {
    let mut errors = Vec::new();
    if packet.id.trim().is_empty() {
        errors.push("packet id is empty".to_owned());
    }
    if packet.goal.description.trim().is_empty() {
        errors.push("intent goal description is empty".to_owned());
    }
    if packet.allowed_tools.is_empty() {
        errors.push("intent has no allowed tools".to_owned());
    }
    if packet.allowed_tools.iter().any(|t| t.name.trim().is_empty()) {
        errors.push("intent references a tool with an empty name".to_owned());
    }
    match &packet.budget {
        None => errors.push("intent has no budget".to_owned()),
        Some(budget) if budget.max_tokens == 0 => {
            errors.push("intent budget max_tokens must be positive".to_owned());
        }
        Some(_) => {}
    }
    if let Some(risk) = &packet.risk {
        if !(0.0..=1.0).contains(&risk.score) {
            errors.push(format!("risk score {} is outside [0, 1]", risk.score));
        }
    }
    ValidationReport::from_errors(errors)
}

/// Validate a memory write: store name, provenance.
pub fn validate_memory_write(packet: &MemoryWritePacket) -> ValidationReport {
    let mut errors = Vec::new();
    if packet.id.trim().is_empty() {
        errors.push("packet id is empty".to_owned());
    }
    if packet.store.trim().is_empty() {
        errors.push("memory write has no target store".to_owned());
    }
    if packet.provenance.is_none() {
        errors.push("memory write carries no provenance".to_owned());
    }
    ValidationReport::from_errors(errors)
}

/// Validate a belief update: content, provenance and a complete justification.
pub fn validate_belief_update(packet: &BeliefUpdatePacket) -> ValidationReport {
    let mut errors = Vec::new();
    if packet.id.trim().is_empty() {
        errors.push("packet id is empty".to_owned());
    }
    if packet.content.trim().is_empty() {
        errors.push("belief update has no content".to_owned());
    }
    if packet.provenance.is_none() {
        errors.push("belief update carries no provenance".to_owned());
    }
    match &packet.justification {
        None => errors.push("belief update has no justification".to_owned()),
        Some(j) if j.reason.trim().is_empty() => {
            errors.push("belief update justification has an empty reason".to_owned());
        }
        Some(_) => {}
    }
    ValidationReport::from_errors(errors)
}

/// Validate any packet by dispatching on its variant.
pub fn validate_packet(packet: &Packet) -> ValidationReport {
    match packet {
        Packet::Evidence(p) => validate_evidence_packet(p),
        Packet::Intent(p) => validate_intent_packet(p),
        Packet::MemoryWrite(p) => validate_memory_write(p),
        Packet::BeliefUpdate(p) => validate_belief_update(p),
    }
}

fn check_fact(fact: &Fact, errors: &mut Vec<String>) {
    // NaN fails `contains` as well.
    if !(0.0..=1.0).contains(&fact.confidence) {
        errors.push(format!(
            "fact {} confidence {} is outside [0, 1]",
            fact.id, fact.confidence
        ));
    }
    if fact.content.trim().is_empty() {
        errors.push(format!("fact {} has empty content", fact.id));
    }
}
