//! Crossing policy: admission control for every packet on the bus.
//!
//! Rules are evaluated in priority order and the first match wins:
//!
//! 1. hostile source: reject
//! 2. malformed packet: reject
//! 3. blocked risk category or risk score above the maximum: reject
//! 4. low energy and non-urgent priority: defer
//! 5. (outward only) outside the outward window and non-urgent: defer
//! 6. confidence / structural requirements met: approve, otherwise reject
//!
//! A decision depends only on the packet and the [`CrossingContext`]
//! (clock step and energy), so it can be replayed from the history.

pub mod risk;

use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info};

use crate::clock::CrossingWindow;
use crate::config::PolicyConfig;
use crate::packet::{
    validate_evidence_packet, validate_intent_packet, Direction, EvidencePacket, IntentPacket,
    Packet, Priority, RiskAssessment, TrustLevel,
};

// ---------------------------------------------------------------------------
// Decisions and context
// ---------------------------------------------------------------------------

/// Outcome of evaluating one packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CrossingDecision {
    /// The packet may cross.
    Approve,
    /// The packet may not cross.
    Reject,
    /// Try again on a later tick.
    Defer,
}

impl CrossingDecision {
    /// Returns the lowercase label.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Approve => "approve",
            Self::Reject => "reject",
            Self::Defer => "defer",
        }
    }
}

impl std::fmt::Display for CrossingDecision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a crossing was deferred.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeferCause {
    /// Energy at or below the low-energy threshold.
    Energy,
    /// Outside the direction's preferred window.
    Window,
    /// No delta-2 lane had spare capacity.
    LaneCapacity,
}

/// Inputs a decision depends on besides the packet.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CrossingContext {
    /// Clock step in `1..=30` (`0` before the first tick).
    pub sys6_step: u8,
    /// Energy level in `[0, 1]`.
    pub energy_level: f64,
}

impl CrossingContext {
    /// Crossing window the step falls in.
    pub fn window(&self) -> CrossingWindow {
        CrossingWindow::for_step(self.sys6_step)
    }
}

/// One recorded evaluation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PolicyEvaluation {
    /// Evaluated packet.
    pub packet_id: String,
    /// Direction evaluated for.
    pub direction: Direction,
    /// Decision.
    pub decision: CrossingDecision,
    /// Human-readable reason.
    pub reason: String,
    /// Deferral cause, for deferrals.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub defer_cause: Option<DeferCause>,
    /// Risk score used (explicit or assessed).
    pub risk_score: f64,
    /// Context the decision was made in.
    pub context: CrossingContext,
    /// When the evaluation ran.
    pub evaluated_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Policy
// ---------------------------------------------------------------------------

struct Verdict {
    decision: CrossingDecision,
    reason: String,
    defer_cause: Option<DeferCause>,
    risk_score: f64,
}

impl Verdict {
    fn reject(reason: String, risk_score: f64) -> Self {
        Self {
            decision: CrossingDecision::Reject,
            reason,
            defer_cause: None,
            risk_score,
        }
    }

    fn defer(reason: String, cause: DeferCause, risk_score: f64) -> Self {
        Self {
            decision: CrossingDecision::Defer,
            reason,
            defer_cause: Some(cause),
            risk_score,
        }
    }

    fn approve(reason: String, risk_score: f64) -> Self {
        Self {
            decision: CrossingDecision::Approve,
            reason,
            defer_cause: None,
            risk_score,
        }
    }
}

/// Admission-control engine with an append-only decision history.
#[derive(Debug)]
pub struct CrossingPolicy {
    config: PolicyConfig,
    history: Mutex<Vec<PolicyEvaluation>>,
}

impl CrossingPolicy {
    /// Create a policy from configuration.
    pub fn new(config: PolicyConfig) -> Self {
        Self {
            config,
            history: Mutex::new(Vec::new()),
        }
    }

    /// Active configuration.
    pub fn config(&self) -> &PolicyConfig {
        &self.config
    }

    /// Package a clock step and energy level; energy is clamped to `[0, 1]`.
    pub fn create_context(&self, sys6_step: u8, energy_level: f64) -> CrossingContext {
        CrossingContext {
            sys6_step,
            energy_level: energy_level.clamp(0.0, 1.0),
        }
    }

    /// Evaluate any packet by dispatching on its variant.
    pub fn evaluate(&self, packet: &Packet, ctx: &CrossingContext) -> PolicyEvaluation {
        match packet {
            Packet::Evidence(p) => self.evaluate_inward(p, ctx),
            Packet::Intent(p) => self.evaluate_outward(p, ctx),
            Packet::MemoryWrite(_) | Packet::BeliefUpdate(_) => self.record(
                packet.id(),
                Direction::Inward,
                Verdict::reject(format!("{} packets never cross the membrane", packet.kind()), 0.0),
                ctx,
            ),
        }
    }

    /// Evaluate inward evidence.
    pub fn evaluate_inward(&self, packet: &EvidencePacket, ctx: &CrossingContext) -> PolicyEvaluation {
        let verdict = self.judge_inward(packet, ctx);
        self.record(&packet.id, Direction::Inward, verdict, ctx)
    }

    /// Evaluate an outward intent.
    pub fn evaluate_outward(&self, packet: &IntentPacket, ctx: &CrossingContext) -> PolicyEvaluation {
        let verdict = self.judge_outward(packet, ctx);
        self.record(&packet.id, Direction::Outward, verdict, ctx)
    }

    /// Every evaluation so far, in call order.
    ///
    /// An approval the caller could not act on is followed by the deferral
    /// recorded through [`CrossingPolicy::supersede_with_deferral`].
    pub fn history(&self) -> Vec<PolicyEvaluation> {
        self.history.lock().map(|h| h.clone()).unwrap_or_default()
    }

    /// Record that an approved crossing was deferred for `cause` after all.
    ///
    /// The new evaluation keeps the packet, direction, risk score and context
    /// of `approved`, so the last history entry for the packet matches what
    /// happened to it.
    pub fn supersede_with_deferral(
        &self,
        approved: &PolicyEvaluation,
        cause: DeferCause,
        reason: String,
    ) -> PolicyEvaluation {
        self.record(
            &approved.packet_id,
            approved.direction,
            Verdict::defer(reason, cause, approved.risk_score),
            &approved.context,
        )
    }

    fn judge_inward(&self, packet: &EvidencePacket, ctx: &CrossingContext) -> Verdict {
        let trust = packet.provenance.trust_level();
        if trust == TrustLevel::Hostile {
            return Verdict::reject("source trust level is hostile".to_owned(), 1.0);
        }

        let report = validate_evidence_packet(packet);
        if !report.valid {
            return Verdict::reject(format!("malformed packet: {}", report.errors.join("; ")), 0.0);
        }

        let risk = packet
            .risk
            .clone()
            .unwrap_or_else(|| risk::assess_evidence(packet));
        if let Some(verdict) = self.gate_risk(&risk) {
            return verdict;
        }

        if let Some(verdict) = self.gate_energy(packet.priority(), ctx, risk.score) {
            return verdict;
        }

        let mut required = self.config.min_evidence_confidence;
        if trust == TrustLevel::Unknown {
            required += self.config.unknown_trust_margin;
        }
        let mean = packet.mean_confidence();
        if mean < required {
            return Verdict::reject(
                format!("mean fact confidence {mean:.2} is below the required {required:.2} for {trust} sources"),
                risk.score,
            );
        }

        Verdict::approve(
            format!(
                "{} fact(s) from {trust} source within risk budget ({:.2} <= {:.2})",
                packet.facts.len(),
                risk.score,
                self.config.max_risk_score
            ),
            risk.score,
        )
    }

    fn judge_outward(&self, packet: &IntentPacket, ctx: &CrossingContext) -> Verdict {
        if let Some(provenance) = &packet.provenance {
            if provenance.trust_level() == TrustLevel::Hostile {
                return Verdict::reject("intent origin trust level is hostile".to_owned(), 1.0);
            }
        }

        let report = validate_intent_packet(packet);
        if !report.valid {
            return Verdict::reject(format!("malformed packet: {}", report.errors.join("; ")), 0.0);
        }

        let risk = packet
            .risk
            .clone()
            .unwrap_or_else(|| risk::assess_intent(packet));
        if let Some(verdict) = self.gate_risk(&risk) {
            return verdict;
        }

        let priority = packet.priority();
        if let Some(verdict) = self.gate_energy(priority, ctx, risk.score) {
            return verdict;
        }

        let window = ctx.window();
        if !window.prefers(Direction::Outward) && !priority.is_urgent() {
            return Verdict::defer(
                format!(
                    "step {} is in the {} window, outside the outward crossing window",
                    ctx.sys6_step,
                    window.as_str()
                ),
                DeferCause::Window,
                risk.score,
            );
        }

        Verdict::approve(
            format!(
                "intent with {} tool(s) within risk budget ({:.2} <= {:.2})",
                packet.allowed_tools.len(),
                risk.score,
                self.config.max_risk_score
            ),
            risk.score,
        )
    }

    fn gate_risk(&self, risk: &RiskAssessment) -> Option<Verdict> {
        if let Some(category) = risk
            .categories
            .iter()
            .find(|c| self.config.blocked_risk_categories.contains(c))
        {
            return Some(Verdict::reject(
                format!("risk category {category} is blocked"),
                risk.score,
            ));
        }
        if risk.score > self.config.max_risk_score {
            return Some(Verdict::reject(
                format!(
                    "risk score {:.2} exceeds maximum {:.2}",
                    risk.score, self.config.max_risk_score
                ),
                risk.score,
            ));
        }
        None
    }

    fn gate_energy(&self, priority: Priority, ctx: &CrossingContext, risk_score: f64) -> Option<Verdict> {
        if ctx.energy_level <= self.config.low_energy_threshold && !priority.is_urgent() {
            return Some(Verdict::defer(
                format!(
                    "energy level {:.2} is at or below the low-energy threshold {:.2}; deferring {priority:?} priority packet",
                    ctx.energy_level, self.config.low_energy_threshold
                ),
                DeferCause::Energy,
                risk_score,
            ));
        }
        None
    }

    fn record(
        &self,
        packet_id: &str,
        direction: Direction,
        verdict: Verdict,
        ctx: &CrossingContext,
    ) -> PolicyEvaluation {
        let evaluation = PolicyEvaluation {
            packet_id: packet_id.to_owned(),
            direction,
            decision: verdict.decision,
            reason: verdict.reason,
            defer_cause: verdict.defer_cause,
            risk_score: verdict.risk_score,
            context: *ctx,
            evaluated_at: Utc::now(),
        };

        match evaluation.decision {
            CrossingDecision::Defer => debug!(
                packet_id = %packet_id,
                direction = %direction,
                reason = %evaluation.reason,
                "crossing deferred"
            ),
            CrossingDecision::Approve | CrossingDecision::Reject => info!(
                packet_id = %packet_id,
                direction = %direction,
                decision = %evaluation.decision,
                reason = %evaluation.reason,
                "crossing evaluated"
            ),
        }

        if let Ok(mut history) = self.history.lock() {
            history.push(evaluation.clone());
        }
        evaluation
    }
}

impl Default for CrossingPolicy {
    fn default() -> Self {
        Self::new(PolicyConfig::default())
    }
}
