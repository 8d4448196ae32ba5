//! Sanitizing whole packets before they cross.

use membrane::codec::{CodecPipeline, REDACTION_MARKER};
use membrane::packet::{
    create_provenance, Budget, EvidencePacket, Fact, FactCategory, Goal, GoalCategory,
    IntentPacket, RedactionPolicy, Source, SourceType, ToolCapability, ToolRef, TrustLevel,
};

fn pipeline() -> CodecPipeline {
    CodecPipeline::new(Default::default()).expect("default codec builds")
}

fn evidence() -> EvidencePacket {
    EvidencePacket::new(
        vec![
            Fact::new("mail ops@example.org about it", 0.8, FactCategory::ToolOutput),
            Fact::new("disk usage is 40%", 0.9, FactCategory::Observation),
        ],
        create_provenance(Source::new(SourceType::Tool, "df"), TrustLevel::Verified),
    )
}

#[test]
fn sanitize_evidence_redacts_facts_and_extends_chain() {
    let original = evidence();
    let sanitized = pipeline().sanitize_evidence(&original).expect("sanitize");

    assert_eq!(sanitized.id, original.id);
    assert_eq!(sanitized.facts.len(), 2);
    let first = sanitized.facts.first().expect("first fact");
    assert!(!first.content.contains("ops@example.org"));
    assert!(first.content.contains(REDACTION_MARKER));
    assert!((first.confidence - 0.8).abs() < f64::EPSILON);

    let chain = sanitized.provenance.processing_chain();
    assert_eq!(chain.len(), 1);
    assert_eq!(chain.first().map(|s| s.step.as_str()), Some("redact"));
    assert_eq!(sanitized.provenance.id, original.provenance.id);
}

#[test]
fn sanitize_evidence_leaves_input_untouched() {
    let original = evidence();
    let before = original.clone();
    let _ = pipeline().sanitize_evidence(&original).expect("sanitize");
    assert_eq!(original, before);
    assert!(original.provenance.processing_chain().is_empty());
}

#[test]
fn sanitize_intent_uses_intent_policy_and_summarizes() {
    let mut intent = IntentPacket::new(
        Goal {
            description: "Open ticket TCK-42 for bob@example.com. Include the logs.".to_owned(),
            category: GoalCategory::Action,
        },
        vec![ToolRef::new("tracker", ToolCapability::Write)],
        Budget {
            max_tokens: 2_000,
            max_tool_calls: Some(1),
            max_duration_ms: None,
        },
    );
    intent.redaction_policy = Some(RedactionPolicy {
        redact_fields: Vec::new(),
        redact_patterns: vec![r"TCK-\d+".to_owned()],
    });
    intent.expected_return = Some("ticket id for bob@example.com".to_owned());

    let sanitized = pipeline().sanitize_intent(&intent).expect("sanitize");
    let description = &sanitized.packet.goal.description;
    assert!(!description.contains("TCK-42"));
    assert!(!description.contains("bob@example.com"));
    assert!(!sanitized
        .packet
        .expected_return
        .as_deref()
        .unwrap_or_default()
        .contains("bob@example.com"));
    assert!(sanitized.summary.text.chars().count() <= description.chars().count());
    assert!(sanitized.packet.provenance.is_none());
    assert_eq!(intent.goal.description, "Open ticket TCK-42 for bob@example.com. Include the logs.");
}

#[test]
fn sanitize_intent_records_step_when_provenance_present() {
    let mut intent = IntentPacket::new(
        Goal {
            description: "look up the weather".to_owned(),
            category: GoalCategory::Query,
        },
        Vec::new(),
        Budget {
            max_tokens: 500,
            max_tool_calls: None,
            max_duration_ms: None,
        },
    );
    intent.provenance = Some(create_provenance(
        Source::new(SourceType::Internal, "planner"),
        TrustLevel::Trusted,
    ));
    let sanitized = pipeline().sanitize_intent(&intent).expect("sanitize");
    let chain_len = sanitized
        .packet
        .provenance
        .as_ref()
        .map(|p| p.processing_chain().len());
    assert_eq!(chain_len, Some(1));
}
