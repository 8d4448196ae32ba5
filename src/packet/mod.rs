//! Packet and provenance model: the only shapes of information allowed to
//! traverse the membrane.
//!
//! Packets are immutable value objects. The [`Packet`] sum type is tagged by a
//! `type` field on the wire and dispatched by exhaustive matching in the bus
//! and the crossing policy.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub mod provenance;
pub mod validate;
pub mod wire;

pub use provenance::{add_provenance_step, create_provenance};
pub use validate::{
    validate_belief_update, validate_evidence_packet, validate_intent_packet,
    validate_memory_write, validate_packet, ValidationReport,
};

// ---------------------------------------------------------------------------
// Provenance
// ---------------------------------------------------------------------------

/// How far the membrane trusts a packet's origin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrustLevel {
    /// Originates inside the core or from an explicitly trusted component.
    Trusted,
    /// Origin was checked against a known identity.
    Verified,
    /// Origin is not known.
    Unknown,
    /// Origin is known to be adversarial.
    Hostile,
}

impl TrustLevel {
    /// Returns the lowercase label used in reasons and on the wire.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Trusted => "trusted",
            Self::Verified => "verified",
            Self::Unknown => "unknown",
            Self::Hostile => "hostile",
        }
    }
}

impl std::fmt::Display for TrustLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of producer a packet came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    /// A tool invocation result.
    Tool,
    /// An external language-model provider.
    Llm,
    /// Direct user input.
    User,
    /// A sensor or other raw event stream.
    Sensor,
    /// A component inside the core.
    Internal,
}

/// Identity of the producer that created a packet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Source {
    /// Kind of producer.
    #[serde(rename = "type")]
    pub source_type: SourceType,
    /// Producer name (tool name, provider name, ...).
    pub name: String,
    /// Producer version, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

impl Source {
    /// Convenience constructor without a version.
    pub fn new(source_type: SourceType, name: impl Into<String>) -> Self {
        Self {
            source_type,
            name: name.into(),
            version: None,
        }
    }
}

/// One entry in a provenance processing chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvenanceStep {
    /// What was done (e.g. `"redact"`).
    pub step: String,
    /// Which component did it.
    pub agent: String,
    /// When it happened.
    pub timestamp: DateTime<Utc>,
}

/// Auditable record of a packet's origin and every processing step.
///
/// The trust level is fixed at creation. The processing chain is append-only
/// and only grows through [`add_provenance_step`], which returns a new value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provenance {
    /// Unique provenance identifier.
    pub id: String,
    /// Producer identity.
    pub source: Source,
    trust_level: TrustLevel,
    #[serde(default)]
    processing_chain: Vec<ProvenanceStep>,
}

impl Provenance {
    /// Trust level assigned at creation.
    pub fn trust_level(&self) -> TrustLevel {
        self.trust_level
    }

    /// Read-only view of the processing chain, oldest step first.
    pub fn processing_chain(&self) -> &[ProvenanceStep] {
        &self.processing_chain
    }
}

// ---------------------------------------------------------------------------
// Shared packet parts
// ---------------------------------------------------------------------------

/// Crossing priority carried in packet metadata.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    /// Background traffic.
    Low,
    /// Default priority.
    #[default]
    Normal,
    /// Crosses even when energy is low.
    High,
    /// Crosses even when energy is low and outside the preferred window.
    Critical,
}

impl Priority {
    /// Whether this priority bypasses energy and window deferral.
    pub fn is_urgent(self) -> bool {
        matches!(self, Self::High | Self::Critical)
    }
}

/// Optional packet metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PacketMetadata {
    /// Crossing priority.
    #[serde(default)]
    pub priority: Priority,
    /// Free-form tags.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

/// Risk assessment attached to a packet by its producer or by the policy.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RiskAssessment {
    /// Aggregate risk score in `[0, 1]`.
    pub score: f64,
    /// Risk categories (e.g. `"prompt_injection"`).
    #[serde(default)]
    pub categories: Vec<String>,
    /// Human-readable concerns.
    #[serde(default)]
    pub concerns: Vec<String>,
}

// ---------------------------------------------------------------------------
// Evidence (inward)
// ---------------------------------------------------------------------------

/// What kind of statement a fact is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FactCategory {
    /// Something directly observed.
    Observation,
    /// Something derived from other facts.
    Inference,
    /// Raw output of a tool.
    ToolOutput,
    /// Something a user stated.
    UserStatement,
    /// Text produced by an external model.
    ModelOutput,
}

/// A single unit of evidence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fact {
    /// Fact identifier.
    pub id: String,
    /// Fact content.
    pub content: String,
    /// Producer's confidence, must lie in `[0, 1]`.
    pub confidence: f64,
    /// Fact category.
    pub category: FactCategory,
}

impl Fact {
    /// Create a fact with a fresh identifier.
    pub fn new(content: impl Into<String>, confidence: f64, category: FactCategory) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            content: content.into(),
            confidence,
            category,
        }
    }
}

/// Evidence travelling inward, from the outer world to the core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvidencePacket {
    /// Packet identifier; the idempotency key on the bus.
    pub id: String,
    /// Facts carried by this packet.
    pub facts: Vec<Fact>,
    /// Origin record.
    pub provenance: Provenance,
    /// Producer-supplied risk assessment.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub risk: Option<RiskAssessment>,
    /// Optional metadata.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<PacketMetadata>,
}

impl EvidencePacket {
    /// Create an evidence packet with a fresh identifier.
    pub fn new(facts: Vec<Fact>, provenance: Provenance) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            facts,
            provenance,
            risk: None,
            metadata: None,
        }
    }

    /// Attach a risk assessment.
    #[must_use]
    pub fn with_risk(mut self, risk: RiskAssessment) -> Self {
        self.risk = Some(risk);
        self
    }

    /// Set the crossing priority.
    #[must_use]
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.metadata.get_or_insert_with(PacketMetadata::default).priority = priority;
        self
    }

    /// Effective priority (`Normal` when no metadata is present).
    pub fn priority(&self) -> Priority {
        self.metadata.as_ref().map(|m| m.priority).unwrap_or_default()
    }

    /// Mean confidence across all facts, `0.0` for an empty packet.
    pub fn mean_confidence(&self) -> f64 {
        mean_confidence(&self.facts)
    }
}

/// Mean confidence of a fact slice, `0.0` when empty.
pub fn mean_confidence(facts: &[Fact]) -> f64 {
    if facts.is_empty() {
        return 0.0;
    }
    let sum: f64 = facts.iter().map(|f| f.confidence).sum();
    #[allow(clippy::cast_precision_loss)]
    let count = facts.len() as f64;
    sum / count
}

// ---------------------------------------------------------------------------
// Intent (outward)
// ---------------------------------------------------------------------------

/// Category of an outward goal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GoalCategory {
    /// Look something up.
    Query,
    /// Perform an action with side effects.
    Action,
    /// Send a message to someone.
    Communication,
    /// Ask a model to reason about something.
    Reasoning,
}

/// The goal an intent pursues.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Goal {
    /// Free-text goal description.
    pub description: String,
    /// Goal category.
    pub category: GoalCategory,
}

/// What a tool is able to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolCapability {
    /// Read-only access.
    Read,
    /// Local writes.
    Write,
    /// Outbound network access.
    Network,
    /// Arbitrary execution.
    Execute,
}

/// Reference to a tool an intent may use.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolRef {
    /// Tool name.
    pub name: String,
    /// What the tool can do.
    pub capability: ToolCapability,
}

impl ToolRef {
    /// Convenience constructor.
    pub fn new(name: impl Into<String>, capability: ToolCapability) -> Self {
        Self {
            name: name.into(),
            capability,
        }
    }
}

/// Resource budget granted to an intent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Budget {
    /// Maximum tokens the outer side may spend.
    pub max_tokens: u64,
    /// Maximum tool invocations.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tool_calls: Option<u32>,
    /// Maximum wall-clock duration in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_duration_ms: Option<u64>,
}

/// Redaction applied to an intent before it leaves the membrane.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedactionPolicy {
    /// Field names whose values are redacted (`field: value`, `field=value`).
    #[serde(default)]
    pub redact_fields: Vec<String>,
    /// Additional regular expressions to redact.
    #[serde(default)]
    pub redact_patterns: Vec<String>,
}

/// An intent travelling outward, from the core to the outer world.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntentPacket {
    /// Packet identifier; the idempotency key on the bus.
    pub id: String,
    /// What the core wants done.
    pub goal: Goal,
    /// Tools the outer side may use.
    #[serde(default)]
    pub allowed_tools: Vec<ToolRef>,
    /// Resource budget; required for approval.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub budget: Option<Budget>,
    /// Redaction to apply before sending.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redaction_policy: Option<RedactionPolicy>,
    /// Description of the expected return.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_return: Option<String>,
    /// Origin record, when the producer attached one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provenance: Option<Provenance>,
    /// Producer-supplied risk assessment.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub risk: Option<RiskAssessment>,
    /// Optional metadata.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<PacketMetadata>,
}

impl IntentPacket {
    /// Create an intent with a fresh identifier.
    pub fn new(goal: Goal, allowed_tools: Vec<ToolRef>, budget: Budget) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            goal,
            allowed_tools,
            budget: Some(budget),
            redaction_policy: None,
            expected_return: None,
            provenance: None,
            risk: None,
            metadata: None,
        }
    }

    /// Set the crossing priority.
    #[must_use]
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.metadata.get_or_insert_with(PacketMetadata::default).priority = priority;
        self
    }

    /// Effective priority (`Normal` when no metadata is present).
    pub fn priority(&self) -> Priority {
        self.metadata.as_ref().map(|m| m.priority).unwrap_or_default()
    }
}

// ---------------------------------------------------------------------------
// Inner-only packets
// ---------------------------------------------------------------------------

/// Write of a memory record into the sealed store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryWritePacket {
    /// Packet identifier.
    pub id: String,
    /// Target store name.
    pub store: String,
    /// Content to write.
    pub content: serde_json::Value,
    /// Origin record; required.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provenance: Option<Provenance>,
    /// When the write was produced.
    pub timestamp: DateTime<Utc>,
}

/// Kind of change a belief update makes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BeliefOperation {
    /// Add a new belief.
    Add,
    /// Revise an existing belief.
    Revise,
    /// Retract an existing belief.
    Retract,
}

/// Why a belief update should be accepted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Justification {
    /// Free-text reasoning.
    pub reason: String,
    /// Whether the update is consistent with held beliefs.
    pub consistent_with_beliefs: bool,
    /// Whether the update is aligned with current goals.
    pub aligned_with_goals: bool,
}

/// Change to the core's belief set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BeliefUpdatePacket {
    /// Packet identifier.
    pub id: String,
    /// Kind of change.
    pub operation: BeliefOperation,
    /// Belief content.
    pub content: String,
    /// Origin record; required.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provenance: Option<Provenance>,
    /// Justification; required.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub justification: Option<Justification>,
    /// When the update was produced.
    pub timestamp: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Packet sum type
// ---------------------------------------------------------------------------

/// Direction of a crossing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Outer world to core.
    Inward,
    /// Core to outer world.
    Outward,
}

impl Direction {
    /// Returns the lowercase label.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Inward => "inward",
            Self::Outward => "outward",
        }
    }

    /// The other direction.
    pub fn opposite(self) -> Self {
        match self {
            Self::Inward => Self::Outward,
            Self::Outward => Self::Inward,
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Every legal packet shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Packet {
    /// Inward evidence.
    Evidence(EvidencePacket),
    /// Outward intent.
    Intent(IntentPacket),
    /// Inner-only memory write.
    MemoryWrite(MemoryWritePacket),
    /// Inner-only belief update.
    BeliefUpdate(BeliefUpdatePacket),
}

impl Packet {
    /// Packet identifier.
    pub fn id(&self) -> &str {
        match self {
            Self::Evidence(p) => &p.id,
            Self::Intent(p) => &p.id,
            Self::MemoryWrite(p) => &p.id,
            Self::BeliefUpdate(p) => &p.id,
        }
    }

    /// Wire discriminant.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Evidence(_) => "evidence",
            Self::Intent(_) => "intent",
            Self::MemoryWrite(_) => "memory_write",
            Self::BeliefUpdate(_) => "belief_update",
        }
    }

    /// Crossing direction, `None` for packets that never leave the core.
    pub fn direction(&self) -> Option<Direction> {
        match self {
            Self::Evidence(_) => Some(Direction::Inward),
            Self::Intent(_) => Some(Direction::Outward),
            Self::MemoryWrite(_) | Self::BeliefUpdate(_) => None,
        }
    }

    /// Effective crossing priority.
    pub fn priority(&self) -> Priority {
        match self {
            Self::Evidence(p) => p.priority(),
            Self::Intent(p) => p.priority(),
            Self::MemoryWrite(_) | Self::BeliefUpdate(_) => Priority::Normal,
        }
    }
}

impl From<EvidencePacket> for Packet {
    fn from(p: EvidencePacket) -> Self {
        Self::Evidence(p)
    }
}

impl From<IntentPacket> for Packet {
    fn from(p: IntentPacket) -> Self {
        Self::Intent(p)
    }
}
