//! Heuristic risk assessment for packets that arrive without one.

use crate::packet::{
    EvidencePacket, FactCategory, IntentPacket, RiskAssessment, ToolCapability, TrustLevel,
};

/// Phrases typical of instructions smuggled into evidence.
const INJECTION_MARKERS: &[&str] = &[
    "ignore previous instructions",
    "ignore all previous",
    "disregard your instructions",
    "disregard previous",
    "you are now",
    "new system prompt",
    "jailbreak",
];

/// Phrases typical of attempts to pull core state outward.
const EXFILTRATION_MARKERS: &[&str] = &[
    "exfiltrate",
    "send your memory",
    "dump your memory",
    "reveal your instructions",
    "upload the contents",
    "private key",
];

/// Token budgets above this are flagged.
const LARGE_BUDGET_TOKENS: u64 = 100_000;

/// Mean confidence below this is flagged.
const LOW_CONFIDENCE: f64 = 0.3;

#[derive(Default)]
struct Accumulator {
    score: f64,
    categories: Vec<String>,
    concerns: Vec<String>,
}

impl Accumulator {
    fn add(&mut self, weight: f64, category: Option<&str>, concern: String) {
        self.score += weight;
        if let Some(category) = category {
            if !self.categories.iter().any(|c| c == category) {
                self.categories.push(category.to_owned());
            }
        }
        self.concerns.push(concern);
    }

    fn finish(self) -> RiskAssessment {
        RiskAssessment {
            score: self.score.clamp(0.0, 1.0),
            categories: self.categories,
            concerns: self.concerns,
        }
    }
}

fn trust_baseline(trust: TrustLevel) -> f64 {
    match trust {
        TrustLevel::Trusted => 0.0,
        TrustLevel::Verified => 0.05,
        TrustLevel::Unknown => 0.2,
        TrustLevel::Hostile => 1.0,
    }
}

fn scan_markers(text: &str, acc: &mut Accumulator) {
    let lowered = text.to_lowercase();
    if let Some(marker) = INJECTION_MARKERS.iter().find(|m| lowered.contains(*m)) {
        acc.add(
            0.5,
            Some("prompt_injection"),
            format!("content contains instruction-like phrase {marker:?}"),
        );
    }
    if let Some(marker) = EXFILTRATION_MARKERS.iter().find(|m| lowered.contains(*m)) {
        acc.add(
            0.4,
            Some("exfiltration"),
            format!("content contains exfiltration phrase {marker:?}"),
        );
    }
}

/// Score evidence from its trust level, confidence and content.
pub fn assess_evidence(packet: &EvidencePacket) -> RiskAssessment {
    let mut acc = Accumulator::default();
    let trust = packet.provenance.trust_level();
    let baseline = trust_baseline(trust);
    if baseline > 0.0 {
        acc.add(baseline, None, format!("source trust level is {trust}"));
    }

    let mean = packet.mean_confidence();
    if mean < LOW_CONFIDENCE {
        acc.add(
            0.1,
            Some("low_confidence"),
            format!("mean fact confidence {mean:.2} is low"),
        );
    }

    // Model output is the usual carrier for injected instructions.
    for fact in &packet.facts {
        if matches!(
            fact.category,
            FactCategory::ToolOutput | FactCategory::ModelOutput | FactCategory::Observation
        ) || trust != TrustLevel::Trusted
        {
            scan_markers(&fact.content, &mut acc);
        }
    }
    acc.finish()
}

/// Score an intent from the tools it may use, its budget and its goal text.
pub fn assess_intent(packet: &IntentPacket) -> RiskAssessment {
    let mut acc = Accumulator::default();
    if let Some(provenance) = &packet.provenance {
        let baseline = trust_baseline(provenance.trust_level());
        if baseline > 0.0 {
            acc.add(
                baseline,
                None,
                format!("intent origin trust level is {}", provenance.trust_level()),
            );
        }
    }

    let has = |cap: ToolCapability| packet.allowed_tools.iter().any(|t| t.capability == cap);
    if has(ToolCapability::Execute) {
        acc.add(
            0.4,
            Some("privileged_tool"),
            "intent allows an execution-capable tool".to_owned(),
        );
    }
    if has(ToolCapability::Network) {
        acc.add(
            0.15,
            Some("network_egress"),
            "intent allows outbound network access".to_owned(),
        );
    }
    if has(ToolCapability::Write) {
        acc.add(0.1, None, "intent allows local writes".to_owned());
    }

    if let Some(budget) = &packet.budget {
        if budget.max_tokens > LARGE_BUDGET_TOKENS {
            acc.add(
                0.1,
                None,
                format!("token budget {} is large", budget.max_tokens),
            );
        }
    }

    scan_markers(&packet.goal.description, &mut acc);
    acc.finish()
}
