//! Destinations for approved crossings.
//!
//! Inward evidence is written to the sealed store through an [`InnerSink`];
//! outward intents are handed to tools and providers through an
//! [`OuterSink`]. The clock calls a sink only after the policy approved the
//! crossing and the codec sanitized the payload.

pub mod journal;

use async_trait::async_trait;
use serde::Serialize;
use uuid::Uuid;

use crate::clock::Delta3Phase;
use crate::codec::summarize::Summary;
use crate::codec::tensor::Tensor;
use crate::packet::{EvidencePacket, IntentPacket};

pub use self::journal::JsonlSink;

/// Errors a sink can report.
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    /// Writing to the underlying medium failed.
    #[error("sink I/O failed: {0}")]
    Io(#[from] std::io::Error),

    /// The payload could not be serialized.
    #[error("sink serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The destination refused the payload.
    #[error("sink refused payload: {0}")]
    Refused(String),

    /// The destination is not reachable.
    #[error("sink unavailable: {0}")]
    Unavailable(String),
}

/// Sanitized evidence ready for the sealed store.
#[derive(Debug, Clone, Serialize)]
pub struct ApprovedEvidence {
    /// Bus entry the evidence crossed under.
    pub entry_id: Uuid,
    /// Bus sequence number.
    pub sequence: u64,
    /// Clock step of the crossing.
    pub sys6_step: u8,
    /// Delta-3 phase tag of the crossing.
    pub delta3: Delta3Phase,
    /// Redacted evidence with the codec step appended to its provenance.
    pub packet: EvidencePacket,
    /// Feature vector of the facts.
    pub tensor: Tensor,
}

/// Sanitized intent ready for the outer world.
#[derive(Debug, Clone, Serialize)]
pub struct ApprovedIntent {
    /// Bus entry the intent crossed under.
    pub entry_id: Uuid,
    /// Bus sequence number.
    pub sequence: u64,
    /// Clock step of the crossing.
    pub sys6_step: u8,
    /// Delta-3 phase tag of the crossing.
    pub delta3: Delta3Phase,
    /// Redacted intent.
    pub packet: IntentPacket,
    /// Summary of the redacted goal.
    pub summary: Summary,
}

/// Receives evidence that crossed inward.
#[async_trait]
pub trait InnerSink: Send + Sync {
    /// Persist one approved evidence payload.
    async fn write(&self, evidence: &ApprovedEvidence) -> Result<(), SinkError>;
}

/// Receives intents that crossed outward.
#[async_trait]
pub trait OuterSink: Send + Sync {
    /// Dispatch one approved intent.
    async fn send(&self, intent: &ApprovedIntent) -> Result<(), SinkError>;
}
