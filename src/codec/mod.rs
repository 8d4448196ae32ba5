//! Codec pipeline: graph and tensor encodings, summarization and redaction.
//!
//! The [`CodecPipeline`] is the only place text is transformed on its way
//! across the membrane. Failures are returned as [`CodecError`] so the clock
//! can reject the triggering crossing instead of aborting the tick.

pub mod graph;
pub mod redact;
pub mod summarize;
pub mod tensor;

use tracing::debug;

use crate::config::CodecConfig;
use crate::packet::{
    add_provenance_step, EvidencePacket, Fact, IntentPacket, RedactionPolicy,
};

use self::graph::{ArenaEvent, ArenaGraph};
use self::redact::Redactor;
use self::summarize::Summary;
use self::tensor::Tensor;

pub use self::redact::REDACTION_MARKER;

/// Agent name recorded in provenance chains.
const CODEC_AGENT: &str = "codec-pipeline";

/// Errors produced by the codec pipeline.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// A redaction pattern failed to compile.
    #[error("invalid redaction pattern {pattern:?}: {source}")]
    InvalidPattern {
        /// The offending pattern.
        pattern: String,
        /// Compiler error.
        #[source]
        source: regex::Error,
    },

    /// An arena event could not be parsed.
    #[error("unparseable event at index {index}: {reason}")]
    UnparseableEvent {
        /// Position of the offending element.
        index: usize,
        /// Parser message.
        reason: String,
    },
}

/// Sanitized outward intent plus the summary of its goal.
#[derive(Debug, Clone)]
pub struct SanitizedIntent {
    /// Intent with redacted text fields.
    pub packet: IntentPacket,
    /// Summary of the redacted goal description.
    pub summary: Summary,
}

/// Converts raw events into graph/tensor form and sanitizes crossing text.
#[derive(Debug, Clone)]
pub struct CodecPipeline {
    config: CodecConfig,
    redactor: Redactor,
}

impl CodecPipeline {
    /// Create a pipeline from configuration.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::InvalidPattern`] if a configured pattern fails to compile.
    pub fn new(config: CodecConfig) -> Result<Self, CodecError> {
        let redactor = Redactor::new(&config.redact_patterns)?;
        Ok(Self { config, redactor })
    }

    /// Configured embedding dimension.
    pub fn embedding_dim(&self) -> usize {
        self.config.embedding_dim.max(1)
    }

    /// Parse a JSON array of arena events.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::UnparseableEvent`] for malformed input.
    pub fn parse_events(&self, json: &str) -> Result<Vec<ArenaEvent>, CodecError> {
        graph::parse_events(json)
    }

    /// Build a node per event and a temporal edge per adjacent pair.
    pub fn graphize(&self, events: &[ArenaEvent]) -> ArenaGraph {
        graph::graphize(events)
    }

    /// Embed a graph into a fixed-length tensor.
    pub fn tensorize(&self, graph: &ArenaGraph) -> Tensor {
        tensor::tensorize(graph, self.embedding_dim())
    }

    /// Embed facts into a fixed-length tensor that reports mean confidence.
    pub fn tensorize_facts(&self, facts: &[Fact]) -> Tensor {
        tensor::tensorize_facts(facts, self.embedding_dim())
    }

    /// Summarize text without ever lengthening it.
    pub fn summarize(&self, text: &str) -> Summary {
        summarize::summarize(
            text,
            self.config.summary_max_sentences,
            self.config.summary_max_chars,
            self.config.max_key_points,
        )
    }

    /// Redact e-mail addresses, phone numbers, credentials, configured
    /// fields and `policy` patterns.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::InvalidPattern`] if a policy pattern fails to compile.
    pub fn redact(&self, text: &str, policy: &RedactionPolicy) -> Result<String, CodecError> {
        let merged = self.merged_policy(policy);
        self.redactor.redact(text, &merged)
    }

    /// Redact every fact of an evidence packet and record the step in provenance.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::InvalidPattern`] if a configured pattern fails to compile.
    pub fn sanitize_evidence(&self, packet: &EvidencePacket) -> Result<EvidencePacket, CodecError> {
        let policy = RedactionPolicy::default();
        let facts = packet
            .facts
            .iter()
            .map(|fact| {
                Ok(Fact {
                    content: self.redact(&fact.content, &policy)?,
                    ..fact.clone()
                })
            })
            .collect::<Result<Vec<_>, CodecError>>()?;

        debug!(packet_id = %packet.id, facts = facts.len(), "evidence sanitized");
        Ok(EvidencePacket {
            facts,
            provenance: add_provenance_step(&packet.provenance, "redact", CODEC_AGENT),
            ..packet.clone()
        })
    }

    /// Redact an intent with its own redaction policy and summarize its goal.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::InvalidPattern`] if the intent carries a bad pattern.
    pub fn sanitize_intent(&self, packet: &IntentPacket) -> Result<SanitizedIntent, CodecError> {
        let policy = packet.redaction_policy.clone().unwrap_or_default();
        let description = self.redact(&packet.goal.description, &policy)?;
        let expected_return = packet
            .expected_return
            .as_deref()
            .map(|text| self.redact(text, &policy))
            .transpose()?;
        let summary = self.summarize(&description);

        let mut sanitized = packet.clone();
        sanitized.goal.description = description;
        sanitized.expected_return = expected_return;
        sanitized.provenance = packet
            .provenance
            .as_ref()
            .map(|p| add_provenance_step(p, "redact", CODEC_AGENT));

        debug!(packet_id = %packet.id, ratio = summary.compression_ratio, "intent sanitized");
        Ok(SanitizedIntent {
            packet: sanitized,
            summary,
        })
    }

    fn merged_policy(&self, policy: &RedactionPolicy) -> RedactionPolicy {
        let mut merged = policy.clone();
        merged
            .redact_fields
            .extend(self.config.redact_fields.iter().cloned());
        merged
    }
}
