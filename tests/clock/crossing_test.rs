//! End-to-end crossings through a connected clock.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use membrane::bus::{EntryStatus, MembraneBus};
use membrane::clock::{
    ClockError, CrossedPayload, LaneType, MembraneEvent, Sys6MembraneClock,
};
use membrane::codec::{CodecPipeline, REDACTION_MARKER};
use membrane::config::{ClockConfig, CodecConfig, PolicyConfig};
use membrane::packet::{
    create_provenance, Budget, Direction, EvidencePacket, Fact, FactCategory, Goal, GoalCategory,
    IntentPacket, Priority, RedactionPolicy, RiskAssessment, Source, SourceType, ToolCapability,
    ToolRef, TrustLevel,
};
use membrane::policy::{CrossingDecision, CrossingPolicy, DeferCause};
use membrane::sink::{ApprovedEvidence, ApprovedIntent, InnerSink, OuterSink, SinkError};

#[derive(Default)]
struct RecordingSink {
    fail_inner: bool,
    fail_outer: bool,
    evidence: Mutex<Vec<ApprovedEvidence>>,
    intents: Mutex<Vec<ApprovedIntent>>,
}

impl RecordingSink {
    fn failing() -> Self {
        Self {
            fail_inner: true,
            fail_outer: true,
            ..Self::default()
        }
    }

    fn failing_inner() -> Self {
        Self {
            fail_inner: true,
            ..Self::default()
        }
    }

    fn evidence_count(&self) -> usize {
        self.evidence.lock().expect("lock").len()
    }

    fn intent_count(&self) -> usize {
        self.intents.lock().expect("lock").len()
    }
}

#[async_trait]
impl InnerSink for RecordingSink {
    async fn write(&self, evidence: &ApprovedEvidence) -> Result<(), SinkError> {
        if self.fail_inner {
            return Err(SinkError::Unavailable("store offline".to_owned()));
        }
        self.evidence.lock().expect("lock").push(evidence.clone());
        Ok(())
    }
}

#[async_trait]
impl OuterSink for RecordingSink {
    async fn send(&self, intent: &ApprovedIntent) -> Result<(), SinkError> {
        if self.fail_outer {
            return Err(SinkError::Refused("gateway returned 503".to_owned()));
        }
        self.intents.lock().expect("lock").push(intent.clone());
        Ok(())
    }
}

struct Harness {
    bus: Arc<MembraneBus>,
    policy: Arc<CrossingPolicy>,
    clock: Sys6MembraneClock,
    sink: Arc<RecordingSink>,
}

fn harness_with(policy: PolicyConfig, clock: ClockConfig, sink: RecordingSink) -> Harness {
    let bus = Arc::new(MembraneBus::new());
    bus.start();
    let policy = Arc::new(CrossingPolicy::new(policy));
    let codec = Arc::new(CodecPipeline::new(CodecConfig::default()).expect("codec"));
    let sink = Arc::new(sink);

    let mut clock = Sys6MembraneClock::new(clock);
    clock.connect(Arc::clone(&bus), Arc::clone(&policy), codec);
    clock.set_inner_sink(Arc::clone(&sink) as Arc<dyn InnerSink>);
    clock.set_outer_sink(Arc::clone(&sink) as Arc<dyn OuterSink>);

    Harness {
        bus,
        policy,
        clock,
        sink,
    }
}

fn harness() -> Harness {
    harness_with(
        PolicyConfig::default(),
        ClockConfig::default(),
        RecordingSink::default(),
    )
}

fn evidence(content: &str) -> EvidencePacket {
    EvidencePacket::new(
        vec![Fact::new(content, 0.8, FactCategory::Observation)],
        create_provenance(Source::new(SourceType::Sensor, "inbox"), TrustLevel::Trusted),
    )
    .with_risk(RiskAssessment {
        score: 0.1,
        categories: Vec::new(),
        concerns: Vec::new(),
    })
}

fn intent(description: &str) -> IntentPacket {
    IntentPacket::new(
        Goal {
            description: description.to_owned(),
            category: GoalCategory::Communication,
        },
        vec![ToolRef::new("mailer", ToolCapability::Read)],
        Budget {
            max_tokens: 1_000,
            max_tool_calls: Some(1),
            max_duration_ms: None,
        },
    )
}

fn total_lane_load(clock: &Sys6MembraneClock) -> u32 {
    clock
        .get_delta2_lanes()
        .iter()
        .map(|l| l.current_load)
        .sum()
}

#[tokio::test]
async fn approved_evidence_is_redacted_tensorized_and_written_inward() {
    let mut h = harness();
    let entry = h
        .bus
        .submit_evidence(evidence("Mail from john@example.com arrived."))
        .expect("submit");

    let report = h.clock.tick_and_cross().await.expect("tick");
    assert_eq!(report.snapshot.global_step, 1);
    assert_eq!(report.crossings.len(), 1);

    let crossing = &report.crossings[0];
    assert_eq!(crossing.decision, CrossingDecision::Approve);
    assert_eq!(crossing.direction, Direction::Inward);
    let lane = crossing.lane.expect("lane used");
    assert_eq!(LaneType::for_lane(lane), LaneType::Perception);

    let Some(CrossedPayload::Evidence(approved)) = &crossing.payload else {
        panic!("expected evidence payload");
    };
    let content = &approved.packet.facts[0].content;
    assert!(content.contains(REDACTION_MARKER));
    assert!(!content.contains("john@example.com"));
    assert_eq!(approved.tensor.dim(), 128);
    assert_eq!(
        approved
            .packet
            .provenance
            .processing_chain()
            .last()
            .map(|s| s.step.as_str()),
        Some("redact")
    );

    assert_eq!(h.sink.evidence_count(), 1);
    assert_eq!(
        h.bus.get(entry.id).map(|e| e.status),
        Some(EntryStatus::Approved)
    );
    assert_eq!(total_lane_load(&h.clock), 0);
}

#[tokio::test]
async fn outward_intent_waits_for_its_window_without_hitting_the_cap() {
    let mut h = harness();
    let entry = h
        .bus
        .submit_intent(intent("Tell alice@example.com the report is ready"))
        .expect("submit");

    for step in 1..=20 {
        let report = h.clock.tick_and_cross().await.expect("tick");
        assert_eq!(report.crossings.len(), 1, "step {step}");
        assert_eq!(report.crossings[0].decision, CrossingDecision::Defer);
        assert_eq!(report.crossings[0].defer_cause, Some(DeferCause::Window));
    }
    let waiting = h.bus.get(entry.id).expect("entry");
    assert_eq!(waiting.status, EntryStatus::Pending);
    assert_eq!(waiting.deferrals, 0);

    let report = h.clock.tick_and_cross().await.expect("tick");
    assert_eq!(report.snapshot.global_step, 21);
    let crossing = &report.crossings[0];
    assert_eq!(crossing.decision, CrossingDecision::Approve);
    assert_eq!(
        crossing.lane.map(LaneType::for_lane),
        Some(LaneType::ToolCall)
    );

    let Some(CrossedPayload::Intent(approved)) = &crossing.payload else {
        panic!("expected intent payload");
    };
    assert!(!approved.packet.goal.description.contains("alice@example.com"));
    assert!(approved.summary.compression_ratio <= 1.0);
    assert_eq!(h.sink.intent_count(), 1);
}

#[tokio::test]
async fn inward_window_serves_inward_before_older_outward() {
    let mut h = harness();
    h.bus
        .submit_intent(intent("older outward request").with_priority(Priority::High))
        .expect("intent");
    let inward = h.bus.submit_evidence(evidence("newer evidence")).expect("evidence");

    let report = h.clock.tick_and_cross().await.expect("tick");
    assert_eq!(report.crossings[0].entry_id, inward.id);
    assert_eq!(report.crossings[0].direction, Direction::Inward);
}

#[tokio::test]
async fn outward_window_serves_outward_before_older_inward() {
    let mut h = harness();
    for _ in 0..20 {
        h.clock.tick();
    }
    h.bus.submit_evidence(evidence("older evidence")).expect("evidence");
    let outward = h.bus.submit_intent(intent("newer request")).expect("intent");

    let report = h.clock.tick_and_cross().await.expect("tick");
    assert_eq!(report.snapshot.global_step, 21);
    assert_eq!(report.crossings[0].entry_id, outward.id);
}

#[tokio::test]
async fn transition_window_serves_lowest_sequence_first() {
    let mut h = harness();
    for _ in 0..10 {
        h.clock.tick();
    }
    let outward = h
        .bus
        .submit_intent(intent("urgent request").with_priority(Priority::High))
        .expect("intent");
    h.bus.submit_evidence(evidence("later evidence")).expect("evidence");

    let report = h.clock.tick_and_cross().await.expect("tick");
    assert_eq!(report.snapshot.global_step, 11);
    assert_eq!(report.crossings[0].entry_id, outward.id);
    assert_eq!(report.crossings[0].decision, CrossingDecision::Approve);
}

#[tokio::test]
async fn transition_window_serves_evidence_behind_a_waiting_intent() {
    let mut h = harness();
    for _ in 0..10 {
        h.clock.tick();
    }
    let outward = h.bus.submit_intent(intent("routine request")).expect("intent");
    let inward = h.bus.submit_evidence(evidence("later evidence")).expect("evidence");

    let report = h.clock.tick_and_cross().await.expect("tick");
    assert_eq!(report.snapshot.global_step, 11);
    assert_eq!(report.crossings.len(), 2);
    assert_eq!(report.crossings[0].entry_id, outward.id);
    assert_eq!(report.crossings[0].defer_cause, Some(DeferCause::Window));
    assert_eq!(report.crossings[1].entry_id, inward.id);
    assert_eq!(report.crossings[1].decision, CrossingDecision::Approve);

    assert_eq!(
        h.bus.get(inward.id).map(|e| e.status),
        Some(EntryStatus::Approved)
    );
    assert_eq!(
        h.bus.get(outward.id).map(|e| (e.status, e.deferrals)),
        Some((EntryStatus::Pending, 0))
    );
    assert_eq!(h.sink.evidence_count(), 1);
}

#[tokio::test]
async fn waiting_intent_does_not_stall_transition_window() {
    let mut h = harness();
    for _ in 0..10 {
        h.clock.tick();
    }
    let outward = h.bus.submit_intent(intent("routine request")).expect("intent");
    let inward: Vec<_> = ["one", "two", "three"]
        .iter()
        .map(|c| h.bus.submit_evidence(evidence(c)).expect("evidence").id)
        .collect();

    for _ in 11..=20 {
        h.clock.tick_and_cross().await.expect("tick");
    }
    for id in &inward {
        assert_eq!(
            h.bus.get(*id).map(|e| e.status),
            Some(EntryStatus::Approved)
        );
    }
    assert_eq!(
        h.bus.get(outward.id).map(|e| e.status),
        Some(EntryStatus::Pending)
    );

    let report = h.clock.tick_and_cross().await.expect("tick");
    assert_eq!(report.snapshot.global_step, 21);
    assert_eq!(report.crossings[0].entry_id, outward.id);
    assert_eq!(report.crossings[0].decision, CrossingDecision::Approve);
}

#[tokio::test]
async fn idle_inward_window_spills_over_to_outward() {
    let mut h = harness();
    let outward = h
        .bus
        .submit_intent(intent("critical alert").with_priority(Priority::Critical))
        .expect("intent");

    let report = h.clock.tick_and_cross().await.expect("tick");
    assert_eq!(report.snapshot.global_step, 1);
    assert_eq!(report.crossings[0].entry_id, outward.id);
    assert_eq!(report.crossings[0].decision, CrossingDecision::Approve);
}

#[tokio::test]
async fn repeated_energy_deferrals_hit_the_cap_and_reject() {
    let mut h = harness_with(
        PolicyConfig {
            max_deferrals: 3,
            ..PolicyConfig::default()
        },
        ClockConfig {
            initial_energy: 0.1,
            energy_decay: 0.0,
            ..ClockConfig::default()
        },
        RecordingSink::default(),
    );
    let entry = h
        .bus
        .submit_evidence(evidence("routine reading").with_priority(Priority::Low))
        .expect("submit");

    for expected in 1..=2 {
        let report = h.clock.tick_and_cross().await.expect("tick");
        assert_eq!(report.crossings[0].decision, CrossingDecision::Defer);
        assert_eq!(report.crossings[0].deferrals, expected);
        assert!(report.crossings[0].reason.contains("energy"));
    }

    let report = h.clock.tick_and_cross().await.expect("tick");
    assert_eq!(report.crossings[0].decision, CrossingDecision::Reject);
    assert!(report.crossings[0].reason.contains("deferral cap"));

    let settled = h.bus.get(entry.id).expect("entry");
    assert_eq!(settled.status, EntryStatus::Rejected);
    assert!(settled
        .rejection_reason()
        .is_some_and(|r| r.contains("deferral cap")));
    assert_eq!(h.policy.history().len(), 3);
    assert_eq!(h.sink.evidence_count(), 0);
}

#[tokio::test]
async fn deferred_entry_crosses_once_energy_recovers() {
    let mut h = harness_with(
        PolicyConfig::default(),
        ClockConfig {
            initial_energy: 0.1,
            ..ClockConfig::default()
        },
        RecordingSink::default(),
    );
    let entry = h
        .bus
        .submit_evidence(evidence("battery low").with_priority(Priority::Normal))
        .expect("submit");

    let report = h.clock.tick_and_cross().await.expect("tick");
    assert_eq!(report.crossings[0].decision, CrossingDecision::Defer);

    h.clock.set_energy_level(0.9);
    let report = h.clock.tick_and_cross().await.expect("tick");
    assert_eq!(report.crossings[0].decision, CrossingDecision::Approve);

    let settled = h.bus.get(entry.id).expect("entry");
    assert_eq!(settled.status, EntryStatus::Approved);
    assert_eq!(settled.deferrals, 1);
}

#[tokio::test]
async fn hostile_evidence_is_rejected_and_never_reaches_the_sink() {
    let mut h = harness();
    let packet = EvidencePacket::new(
        vec![Fact::new("trust me", 1.0, FactCategory::UserStatement)],
        create_provenance(Source::new(SourceType::User, "mallory"), TrustLevel::Hostile),
    );
    let entry = h.bus.submit_evidence(packet).expect("submit");

    let report = h.clock.tick_and_cross().await.expect("tick");
    assert_eq!(report.crossings[0].decision, CrossingDecision::Reject);

    let settled = h.bus.get(entry.id).expect("entry");
    assert_eq!(settled.status, EntryStatus::Rejected);
    assert!(settled
        .history
        .iter()
        .any(|c| c.status == EntryStatus::Processing));
    assert_eq!(h.sink.evidence_count(), 0);
}

#[tokio::test]
async fn inner_sink_failure_rejects_entry_and_surfaces_error() {
    let mut h = harness_with(
        PolicyConfig::default(),
        ClockConfig::default(),
        RecordingSink::failing(),
    );
    let entry = h.bus.submit_evidence(evidence("sensor ok")).expect("submit");

    let err = h
        .clock
        .tick_and_cross()
        .await
        .expect_err("inner sink failure should surface");
    assert!(matches!(err, ClockError::InnerSink { entry_id, .. } if entry_id == entry.id));

    let settled = h.bus.get(entry.id).expect("entry");
    assert_eq!(settled.status, EntryStatus::Rejected);
    assert!(settled
        .rejection_reason()
        .is_some_and(|r| r.contains("inner sink failed")));
    assert_eq!(total_lane_load(&h.clock), 0);
}

#[tokio::test]
async fn inner_sink_failure_reports_crossings_settled_earlier_in_the_tick() {
    let mut h = harness_with(
        PolicyConfig::default(),
        ClockConfig {
            crossings_per_tick: 2,
            ..ClockConfig::default()
        },
        RecordingSink::failing_inner(),
    );
    for _ in 0..20 {
        h.clock.tick();
    }
    let inward = h.bus.submit_evidence(evidence("older evidence")).expect("evidence");
    let outward = h.bus.submit_intent(intent("newer request")).expect("intent");

    let err = h
        .clock
        .tick_and_cross()
        .await
        .expect_err("inner sink failure should surface");
    let ClockError::InnerSink {
        entry_id, settled, ..
    } = err
    else {
        panic!("expected an inner sink error");
    };
    assert_eq!(entry_id, inward.id);
    let summary: Vec<_> = settled.iter().map(|c| (c.entry_id, c.decision)).collect();
    assert_eq!(
        summary,
        vec![
            (outward.id, CrossingDecision::Approve),
            (inward.id, CrossingDecision::Reject),
        ]
    );
    assert_eq!(h.sink.intent_count(), 1);
}

#[tokio::test]
async fn outer_sink_failure_is_a_rejection_not_an_error() {
    let mut h = harness_with(
        PolicyConfig::default(),
        ClockConfig::default(),
        RecordingSink::failing(),
    );
    let entry = h
        .bus
        .submit_intent(intent("ping the gateway").with_priority(Priority::High))
        .expect("submit");

    let report = h.clock.tick_and_cross().await.expect("tick completes");
    assert_eq!(report.crossings[0].decision, CrossingDecision::Reject);
    assert!(report.crossings[0].reason.contains("outer sink failed"));
    assert!(report.crossings[0].payload.is_none());
    assert_eq!(
        h.bus.get(entry.id).map(|e| e.status),
        Some(EntryStatus::Rejected)
    );
    assert_eq!(total_lane_load(&h.clock), 0);
}

#[tokio::test]
async fn codec_failure_rejects_crossing_and_tick_continues() {
    let mut h = harness();
    let mut packet = intent("send the summary").with_priority(Priority::High);
    packet.redaction_policy = Some(RedactionPolicy {
        redact_fields: Vec::new(),
        redact_patterns: vec!["([unclosed".to_owned()],
    });
    let entry = h.bus.submit_intent(packet).expect("submit");

    let report = h.clock.tick_and_cross().await.expect("tick completes");
    assert_eq!(report.crossings[0].decision, CrossingDecision::Reject);
    assert!(report.crossings[0].reason.contains("codec failure"));
    assert_eq!(
        h.bus.get(entry.id).map(|e| e.status),
        Some(EntryStatus::Rejected)
    );
    assert_eq!(h.sink.intent_count(), 0);
}

#[tokio::test]
async fn full_lanes_defer_until_capacity_frees() {
    let mut h = harness_with(
        PolicyConfig::default(),
        ClockConfig {
            lane_capacity: 1,
            ..ClockConfig::default()
        },
        RecordingSink::default(),
    );
    let perception: Vec<u8> = h
        .clock
        .get_delta2_lanes()
        .iter()
        .filter(|l| l.lane_type == LaneType::Perception)
        .map(|l| l.id)
        .collect();
    for &lane in &perception {
        assert!(h.clock.allocate_delta2_load(lane, 1));
    }
    let entry = h.bus.submit_evidence(evidence("queued")).expect("submit");

    let report = h.clock.tick_and_cross().await.expect("tick");
    assert_eq!(report.crossings[0].decision, CrossingDecision::Defer);
    assert_eq!(report.crossings[0].defer_cause, Some(DeferCause::LaneCapacity));
    assert_eq!(h.bus.get(entry.id).map(|e| e.deferrals), Some(1));

    let decisions: Vec<_> = h
        .policy
        .history()
        .iter()
        .map(|e| (e.decision, e.defer_cause))
        .collect();
    assert_eq!(
        decisions,
        vec![
            (CrossingDecision::Approve, None),
            (CrossingDecision::Defer, Some(DeferCause::LaneCapacity)),
        ]
    );

    for &lane in &perception {
        assert!(h.clock.release_delta2_load(lane, 1));
    }
    let report = h.clock.tick_and_cross().await.expect("tick");
    assert_eq!(report.crossings[0].decision, CrossingDecision::Approve);
}

#[tokio::test]
async fn several_crossings_per_tick_follow_sequence_order() {
    let mut h = harness_with(
        PolicyConfig::default(),
        ClockConfig {
            crossings_per_tick: 3,
            ..ClockConfig::default()
        },
        RecordingSink::default(),
    );
    let ids: Vec<_> = ["one", "two", "three", "four"]
        .iter()
        .map(|c| h.bus.submit_evidence(evidence(c)).expect("submit").id)
        .collect();

    let report = h.clock.tick_and_cross().await.expect("tick");
    assert_eq!(report.count(CrossingDecision::Approve), 3);
    let crossed: Vec<_> = report.crossings.iter().map(|c| c.entry_id).collect();
    assert_eq!(crossed, ids[..3].to_vec());
    assert_eq!(h.bus.get_queue_depths().inward, 1);
}

#[tokio::test]
async fn unconnected_clock_only_ticks() {
    let mut clock = Sys6MembraneClock::new(ClockConfig::default());
    assert!(!clock.is_connected());
    let report = clock.tick_and_cross().await.expect("tick");
    assert_eq!(report.snapshot.global_step, 1);
    assert!(report.crossings.is_empty());
}

#[tokio::test]
async fn events_are_published_and_full_channel_never_blocks() {
    let mut h = harness_with(
        PolicyConfig::default(),
        ClockConfig {
            event_channel_capacity: 2,
            ..ClockConfig::default()
        },
        RecordingSink::default(),
    );
    let mut rx = h.clock.subscribe();
    h.bus.submit_evidence(evidence("observed")).expect("submit");

    h.clock.tick_and_cross().await.expect("tick");
    assert!(matches!(rx.try_recv(), Ok(MembraneEvent::Tick(s)) if s.global_step == 1));
    assert!(matches!(
        rx.try_recv(),
        Ok(MembraneEvent::Crossing(c)) if c.decision == CrossingDecision::Approve
    ));

    for _ in 0..5 {
        h.clock.tick_and_cross().await.expect("tick with full channel");
    }
    let mut buffered = 0;
    while rx.try_recv().is_ok() {
        buffered += 1;
    }
    assert_eq!(buffered, 2);
}
