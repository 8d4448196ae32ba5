//! Crossing orchestration for a connected clock.
//!
//! Per tick, up to `crossings_per_tick` entries are pulled from the bus:
//!
//! - inward window: oldest inward entry, else oldest outward (idle spill-over)
//! - outward window: oldest outward entry, else oldest inward
//! - transition window: whichever oldest entry has the lower sequence number
//!
//! Each entry is evaluated by the policy. Approved payloads reserve a delta-2
//! lane, are sanitized by the codec and handed to the sink for their
//! direction before the bus entry is settled. A deferral leaves the entry
//! pending. A window deferral sets its direction aside for the rest of the
//! tick; any other deferral ends the tick's crossings.

use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use super::{
    ClockError, ClockSnapshot, Connections, CrossingWindow, Delta3Phase, LaneType, MembraneEvent,
    Sys6MembraneClock,
};
use crate::bus::{BusEntry, BusError, MembraneBus};
use crate::packet::{Direction, Packet};
use crate::policy::{CrossingDecision, DeferCause};
use crate::sink::{ApprovedEvidence, ApprovedIntent};

const CLOCK_AGENT: &str = "sys6-clock";

/// Sanitized payload of an approved crossing.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CrossedPayload {
    /// Evidence delivered inward.
    Evidence(ApprovedEvidence),
    /// Intent delivered outward.
    Intent(ApprovedIntent),
}

/// Result of one crossing attempt.
#[derive(Debug, Clone, Serialize)]
pub struct CrossingOutcome {
    /// Bus entry.
    pub entry_id: Uuid,
    /// Bus sequence number.
    pub sequence: u64,
    /// Packet identifier.
    pub packet_id: String,
    /// Crossing direction.
    pub direction: Direction,
    /// Final decision for this tick.
    pub decision: CrossingDecision,
    /// Human-readable reason.
    pub reason: String,
    /// Deferral cause, for deferrals.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub defer_cause: Option<DeferCause>,
    /// Counted deferrals so far.
    pub deferrals: u32,
    /// Delta-2 lane used, for approved crossings.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lane: Option<u8>,
    /// Clock step of the attempt.
    pub sys6_step: u8,
    /// Delta-3 phase tag of the attempt.
    pub delta3: Delta3Phase,
    /// Sanitized payload, for approved crossings.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<CrossedPayload>,
}

impl CrossingOutcome {
    fn new(entry: &BusEntry, snapshot: &ClockSnapshot, decision: CrossingDecision, reason: String) -> Self {
        Self {
            entry_id: entry.id,
            sequence: entry.sequence,
            packet_id: entry.packet.id().to_owned(),
            direction: entry.direction,
            decision,
            reason,
            defer_cause: None,
            deferrals: entry.deferrals,
            lane: None,
            sys6_step: snapshot.global_step,
            delta3: snapshot.delta3,
            payload: None,
        }
    }

    fn rejected(mut self, reason: String) -> Self {
        self.decision = CrossingDecision::Reject;
        self.reason = reason;
        self.defer_cause = None;
        self.payload = None;
        self
    }
}

/// What one [`Sys6MembraneClock::tick_and_cross`] call did.
#[derive(Debug, Clone, Serialize)]
pub struct TickReport {
    /// Clock state after the tick.
    pub snapshot: ClockSnapshot,
    /// Crossings attempted, in order.
    pub crossings: Vec<CrossingOutcome>,
}

impl TickReport {
    /// Number of crossings that ended with `decision`.
    pub fn count(&self, decision: CrossingDecision) -> usize {
        self.crossings
            .iter()
            .filter(|c| c.decision == decision)
            .count()
    }
}

/// Pick the next pending entry for the window, ignoring `waiting`.
fn select_entry(
    bus: &MembraneBus,
    window: CrossingWindow,
    waiting: Option<Direction>,
) -> Option<BusEntry> {
    let oldest = |direction: Direction| {
        if waiting == Some(direction) {
            None
        } else {
            bus.oldest_pending(direction)
        }
    };
    let inward = oldest(Direction::Inward);
    let outward = oldest(Direction::Outward);
    match window.preferred() {
        Some(Direction::Inward) => inward.or(outward),
        Some(Direction::Outward) => outward.or(inward),
        None => match (inward, outward) {
            (Some(i), Some(o)) => Some(if i.sequence <= o.sequence { i } else { o }),
            (i, o) => i.or(o),
        },
    }
}

fn settle_reject(bus: &MembraneBus, id: Uuid, reason: &str) -> Result<(), BusError> {
    bus.mark_processing(id, CLOCK_AGENT)?;
    bus.reject(id, Some(reason))?;
    Ok(())
}

fn lane_type_for(direction: Direction) -> LaneType {
    match direction {
        Direction::Inward => LaneType::Perception,
        Direction::Outward => LaneType::ToolCall,
    }
}

impl Sys6MembraneClock {
    /// Tick, then run up to `crossings_per_tick` crossings.
    ///
    /// An unconnected clock only ticks. Codec failures and outer sink
    /// failures reject the entry and the tick continues.
    ///
    /// # Errors
    ///
    /// Returns [`ClockError::InnerSink`] when the inner sink fails (the entry
    /// is rejected first; the error carries the crossings settled so far)
    /// and [`ClockError::Bus`] when the bus refuses a transition.
    pub async fn tick_and_cross(&mut self) -> Result<TickReport, ClockError> {
        let snapshot = self.tick();
        let mut crossings = Vec::new();
        let Some(connections) = self.connections.clone() else {
            return Ok(TickReport {
                snapshot,
                crossings,
            });
        };

        // Window deferrals do not use up the budget; the other direction is
        // tried instead for the rest of the tick.
        let mut budget = self.config.crossings_per_tick;
        let mut waiting: Option<Direction> = None;
        while budget > 0 {
            let Some(entry) = select_entry(&connections.bus, snapshot.window, waiting) else {
                break;
            };
            let direction = entry.direction;
            let outcome = match self.cross(&connections, entry, &snapshot).await {
                Ok(outcome) => outcome,
                Err(ClockError::InnerSink {
                    entry_id,
                    source,
                    settled,
                }) => {
                    for failed in settled {
                        self.publish(MembraneEvent::Crossing(failed.clone()));
                        crossings.push(failed);
                    }
                    return Err(ClockError::InnerSink {
                        entry_id,
                        source,
                        settled: crossings,
                    });
                }
                Err(e) => return Err(e),
            };
            let decision = outcome.decision;
            let cause = outcome.defer_cause;
            self.publish(MembraneEvent::Crossing(outcome.clone()));
            crossings.push(outcome);
            match (decision, cause) {
                (CrossingDecision::Defer, Some(DeferCause::Window)) if waiting.is_none() => {
                    waiting = Some(direction);
                }
                (CrossingDecision::Defer, _) => break,
                _ => budget = budget.saturating_sub(1),
            }
        }

        Ok(TickReport {
            snapshot,
            crossings,
        })
    }

    async fn cross(
        &self,
        conn: &Connections,
        entry: BusEntry,
        snapshot: &ClockSnapshot,
    ) -> Result<CrossingOutcome, ClockError> {
        let ctx = conn
            .policy
            .create_context(snapshot.global_step, snapshot.energy_level);
        let evaluation = conn.policy.evaluate(&entry.packet, &ctx);
        let outcome =
            CrossingOutcome::new(&entry, snapshot, evaluation.decision, evaluation.reason.clone());

        match evaluation.decision {
            CrossingDecision::Defer => {
                let cause = evaluation.defer_cause.unwrap_or(DeferCause::Energy);
                self.defer(conn, &entry, outcome, cause)
            }
            CrossingDecision::Reject => {
                settle_reject(&conn.bus, entry.id, &outcome.reason)?;
                Ok(outcome)
            }
            CrossingDecision::Approve => {
                let lane_type = lane_type_for(entry.direction);
                let Some(lane) = self.lanes.reserve(lane_type, 1) else {
                    let superseded = conn.policy.supersede_with_deferral(
                        &evaluation,
                        DeferCause::LaneCapacity,
                        format!("no {lane_type:?} delta-2 lane has spare capacity"),
                    );
                    let mut outcome = outcome;
                    outcome.decision = superseded.decision;
                    outcome.reason = superseded.reason;
                    return self.defer(conn, &entry, outcome, DeferCause::LaneCapacity);
                };
                let result = self.deliver(conn, &entry, snapshot, outcome, lane).await;
                self.lanes.release(lane, 1);
                result
            }
        }
    }

    /// Leave the entry pending, rejecting it once the deferral cap is reached.
    ///
    /// Window deferrals are not counted: an entry waiting for its window is
    /// not stuck.
    fn defer(
        &self,
        conn: &Connections,
        entry: &BusEntry,
        mut outcome: CrossingOutcome,
        cause: DeferCause,
    ) -> Result<CrossingOutcome, ClockError> {
        outcome.defer_cause = Some(cause);
        if cause == DeferCause::Window {
            return Ok(outcome);
        }

        let count = conn.bus.record_deferral(entry.id)?;
        outcome.deferrals = count;
        let cap = conn.policy.config().max_deferrals;
        if count < cap {
            return Ok(outcome);
        }

        let reason = format!(
            "deferred {count} times, reaching the deferral cap of {cap}: {}",
            outcome.reason
        );
        settle_reject(&conn.bus, entry.id, &reason)?;
        warn!(
            entry_id = %entry.id,
            sequence = entry.sequence,
            direction = %entry.direction,
            deferrals = count,
            "deferral cap reached; crossing rejected"
        );
        Ok(outcome.rejected(reason))
    }

    async fn deliver(
        &self,
        conn: &Connections,
        entry: &BusEntry,
        snapshot: &ClockSnapshot,
        mut outcome: CrossingOutcome,
        lane: u8,
    ) -> Result<CrossingOutcome, ClockError> {
        outcome.lane = Some(lane);
        conn.bus.mark_processing(entry.id, CLOCK_AGENT)?;

        let payload = match entry.packet.as_ref() {
            Packet::Evidence(packet) => {
                let sanitized = match conn.codec.sanitize_evidence(packet) {
                    Ok(sanitized) => sanitized,
                    Err(e) => {
                        let reason = format!("codec failure: {e}");
                        conn.bus.reject(entry.id, Some(&reason))?;
                        return Ok(outcome.rejected(reason));
                    }
                };
                let evidence = ApprovedEvidence {
                    entry_id: entry.id,
                    sequence: entry.sequence,
                    sys6_step: snapshot.global_step,
                    delta3: snapshot.delta3,
                    tensor: conn.codec.tensorize_facts(&sanitized.facts),
                    packet: sanitized,
                };
                if let Some(sink) = &conn.inner {
                    if let Err(e) = sink.write(&evidence).await {
                        let reason = format!("inner sink failed: {e}");
                        conn.bus.reject(entry.id, Some(&reason))?;
                        warn!(entry_id = %entry.id, sequence = entry.sequence, error = %e, "inner sink write failed");
                        return Err(ClockError::InnerSink {
                            entry_id: entry.id,
                            source: e,
                            settled: vec![outcome.rejected(reason)],
                        });
                    }
                }
                CrossedPayload::Evidence(evidence)
            }
            Packet::Intent(packet) => {
                let sanitized = match conn.codec.sanitize_intent(packet) {
                    Ok(sanitized) => sanitized,
                    Err(e) => {
                        let reason = format!("codec failure: {e}");
                        conn.bus.reject(entry.id, Some(&reason))?;
                        return Ok(outcome.rejected(reason));
                    }
                };
                let intent = ApprovedIntent {
                    entry_id: entry.id,
                    sequence: entry.sequence,
                    sys6_step: snapshot.global_step,
                    delta3: snapshot.delta3,
                    packet: sanitized.packet,
                    summary: sanitized.summary,
                };
                if let Some(sink) = &conn.outer {
                    if let Err(e) = sink.send(&intent).await {
                        let reason = format!("outer sink failed: {e}");
                        conn.bus.reject(entry.id, Some(&reason))?;
                        warn!(entry_id = %entry.id, sequence = entry.sequence, error = %e, "outer sink send failed");
                        return Ok(outcome.rejected(reason));
                    }
                }
                CrossedPayload::Intent(intent)
            }
            Packet::MemoryWrite(_) | Packet::BeliefUpdate(_) => {
                let reason = format!("{} packets never cross the membrane", entry.packet.kind());
                conn.bus.reject(entry.id, Some(&reason))?;
                return Ok(outcome.rejected(reason));
            }
        };

        conn.bus.approve(entry.id)?;
        info!(
            entry_id = %entry.id,
            sequence = entry.sequence,
            direction = %entry.direction,
            lane,
            step = snapshot.global_step,
            delta3 = %snapshot.delta3,
            "crossing delivered"
        );
        outcome.payload = Some(payload);
        Ok(outcome)
    }
}
