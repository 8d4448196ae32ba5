//! Outward (intent) crossing decisions.

use membrane::clock::CrossingWindow;
use membrane::policy::{CrossingDecision, CrossingPolicy, DeferCause};
use membrane::packet::{
    create_provenance, Budget, Goal, GoalCategory, IntentPacket, Packet, Priority, Source,
    SourceType, ToolCapability, ToolRef, TrustLevel,
};

fn intent(capability: ToolCapability) -> IntentPacket {
    IntentPacket::new(
        Goal {
            description: "fetch the release notes".to_owned(),
            category: GoalCategory::Query,
        },
        vec![ToolRef::new("http", capability)],
        Budget {
            max_tokens: 8_000,
            max_tool_calls: Some(2),
            max_duration_ms: None,
        },
    )
}

#[test]
fn intent_in_outward_window_is_approved() {
    let policy = CrossingPolicy::default();
    let ctx = policy.create_context(25, 0.9);
    assert_eq!(ctx.window(), CrossingWindow::Outward);

    let eval = policy.evaluate_outward(&intent(ToolCapability::Read), &ctx);
    assert_eq!(eval.decision, CrossingDecision::Approve);
}

#[test]
fn normal_intent_outside_outward_window_defers_on_window() {
    let policy = CrossingPolicy::default();
    for step in [1, 10, 11, 20] {
        let eval = policy.evaluate_outward(
            &intent(ToolCapability::Read),
            &policy.create_context(step, 0.9),
        );
        assert_eq!(eval.decision, CrossingDecision::Defer, "step {step}");
        assert_eq!(eval.defer_cause, Some(DeferCause::Window));
        assert!(eval.reason.contains("window"));
    }
}

#[test]
fn urgent_intent_bypasses_window() {
    let policy = CrossingPolicy::default();
    let packet = intent(ToolCapability::Read).with_priority(Priority::High);
    let eval = policy.evaluate_outward(&packet, &policy.create_context(2, 0.9));
    assert_eq!(eval.decision, CrossingDecision::Approve);
}

#[test]
fn low_energy_defers_before_window_check() {
    let policy = CrossingPolicy::default();
    let eval = policy.evaluate_outward(
        &intent(ToolCapability::Read),
        &policy.create_context(2, 0.1),
    );
    assert_eq!(eval.defer_cause, Some(DeferCause::Energy));
}

#[test]
fn broad_tool_access_exceeds_default_risk_budget() {
    let policy = CrossingPolicy::default();
    let mut packet = intent(ToolCapability::Execute);
    packet
        .allowed_tools
        .push(ToolRef::new("curl", ToolCapability::Network));
    packet
        .allowed_tools
        .push(ToolRef::new("fs", ToolCapability::Write));
    packet.budget = Some(Budget {
        max_tokens: 500_000,
        max_tool_calls: None,
        max_duration_ms: None,
    });
    let eval = policy.evaluate_outward(&packet, &policy.create_context(25, 1.0));
    assert_eq!(eval.decision, CrossingDecision::Reject);
    assert!(eval.risk_score > 0.7);
}

#[test]
fn hostile_origin_intent_is_rejected() {
    let policy = CrossingPolicy::default();
    let mut packet = intent(ToolCapability::Read).with_priority(Priority::Critical);
    packet.provenance = Some(create_provenance(
        Source::new(SourceType::User, "anonymous"),
        TrustLevel::Hostile,
    ));
    let eval = policy.evaluate_outward(&packet, &policy.create_context(25, 1.0));
    assert_eq!(eval.decision, CrossingDecision::Reject);
    assert!(eval.reason.contains("hostile"));
}

#[test]
fn missing_budget_is_rejected_as_malformed() {
    let policy = CrossingPolicy::default();
    let mut packet = intent(ToolCapability::Read);
    packet.budget = None;
    let eval = policy.evaluate_outward(&packet, &policy.create_context(25, 1.0));
    assert_eq!(eval.decision, CrossingDecision::Reject);
    assert!(eval.reason.contains("budget"));
}

#[test]
fn evaluate_dispatches_by_packet_variant() {
    let policy = CrossingPolicy::default();
    let packet = Packet::from(intent(ToolCapability::Read));
    let eval = policy.evaluate(&packet, &policy.create_context(30, 1.0));
    assert_eq!(eval.decision, CrossingDecision::Approve);
    assert_eq!(policy.history().len(), 1);
}
