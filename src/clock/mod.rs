//! Sys6 membrane clock: the master scheduler.
//!
//! A single global counter advances modulo 30 (LCM of 2, 3 and 5), so the
//! dyad (A/B), triad (phase 1..3) and five-stage rhythms realign once per
//! cycle. The clock owns the energy level and delta-2 lane accounting; other
//! components only ever see a [`ClockSnapshot`].
//!
//! [`Sys6MembraneClock::tick`] is pure bookkeeping.
//! [`Sys6MembraneClock::tick_and_cross`] additionally pulls pending entries
//! from a connected bus and runs them through policy, codec and sinks.

pub mod crossing;
pub mod delta3;
pub mod lanes;

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::bus::{BusError, MembraneBus};
use crate::codec::CodecPipeline;
use crate::config::ClockConfig;
use crate::packet::Direction;
use crate::policy::CrossingPolicy;
use crate::sink::{InnerSink, OuterSink, SinkError};

pub use self::crossing::{CrossedPayload, CrossingOutcome, TickReport};
pub use self::delta3::Delta3Phase;
pub use self::lanes::{Delta2Lanes, LaneSnapshot, LaneType, DELTA2_LANE_COUNT};

/// Steps in one full cycle.
pub const STEPS_PER_CYCLE: u8 = 30;

/// Steps in one triad phase.
pub const STEPS_PER_PHASE: u8 = 10;

// ---------------------------------------------------------------------------
// Step addressing
// ---------------------------------------------------------------------------

/// Dyadic state, alternating every tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Dyad {
    /// Odd global steps.
    A,
    /// Even global steps.
    B,
}

impl Dyad {
    /// Dyad for a global step.
    pub fn for_step(global_step: u8) -> Self {
        if global_step % 2 == 1 {
            Self::A
        } else {
            Self::B
        }
    }
}

impl std::fmt::Display for Dyad {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::A => f.write_str("A"),
            Self::B => f.write_str("B"),
        }
    }
}

/// Which direction the current step prefers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CrossingWindow {
    /// Phase 1: inward crossings preferred.
    Inward,
    /// Phase 2: neutral.
    Transition,
    /// Phase 3: outward crossings preferred.
    Outward,
}

impl CrossingWindow {
    /// Window for a global step; anything outside `1..=30` is neutral.
    pub fn for_step(global_step: u8) -> Self {
        match global_step {
            1..=10 => Self::Inward,
            21..=30 => Self::Outward,
            _ => Self::Transition,
        }
    }

    /// Whether crossings in `direction` are preferred in this window.
    pub fn prefers(self, direction: Direction) -> bool {
        matches!(
            (self, direction),
            (Self::Inward, Direction::Inward) | (Self::Outward, Direction::Outward)
        )
    }

    /// Preferred direction, if any.
    pub fn preferred(self) -> Option<Direction> {
        match self {
            Self::Inward => Some(Direction::Inward),
            Self::Outward => Some(Direction::Outward),
            Self::Transition => None,
        }
    }

    /// Returns the lowercase label.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Inward => "inward",
            Self::Transition => "transition",
            Self::Outward => "outward",
        }
    }
}

impl std::fmt::Display for CrossingWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Read-only view of the clock at one instant.
///
/// Before the first tick every address field is `0`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ClockSnapshot {
    /// Global step in `1..=30`.
    pub global_step: u8,
    /// Completed full cycles.
    pub cycle: u64,
    /// Total ticks so far.
    pub tick_count: u64,
    /// Triad phase in `1..=3`.
    pub phase: u8,
    /// Position within the phase in `1..=10`.
    pub step_in_phase: u8,
    /// Stage within the phase in `1..=5`.
    pub stage: u8,
    /// Step within the stage in `1..=2`.
    pub step: u8,
    /// Dyadic state.
    pub dyad: Dyad,
    /// Delta-3 phase tag.
    pub delta3: Delta3Phase,
    /// Preferred crossing window.
    pub window: CrossingWindow,
    /// Energy level in `[0, 1]`.
    pub energy_level: f64,
}

impl ClockSnapshot {
    fn at(global_step: u8, cycle: u64, tick_count: u64, energy_level: f64) -> Self {
        let (phase, step_in_phase, stage, step) = match global_step.checked_sub(1) {
            Some(zero_based) => {
                let in_phase = zero_based % STEPS_PER_PHASE;
                (
                    (zero_based / STEPS_PER_PHASE).saturating_add(1),
                    in_phase.saturating_add(1),
                    (in_phase / 2).saturating_add(1),
                    (in_phase % 2).saturating_add(1),
                )
            }
            None => (0, 0, 0, 0),
        };
        Self {
            global_step,
            cycle,
            tick_count,
            phase,
            step_in_phase,
            stage,
            step,
            dyad: Dyad::for_step(global_step),
            delta3: Delta3Phase::for_step(global_step),
            window: CrossingWindow::for_step(global_step),
            energy_level,
        }
    }
}

// ---------------------------------------------------------------------------
// Events and errors
// ---------------------------------------------------------------------------

/// Notification published on the optional event channel.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum MembraneEvent {
    /// The clock advanced.
    Tick(ClockSnapshot),
    /// A crossing was decided.
    Crossing(CrossingOutcome),
}

/// Errors surfaced by [`Sys6MembraneClock::tick_and_cross`].
#[derive(Debug, thiserror::Error)]
pub enum ClockError {
    /// A bus operation failed.
    #[error("bus operation failed: {0}")]
    Bus(#[from] BusError),

    /// The inner sink failed to persist approved evidence. The entry has
    /// already been rejected.
    #[error("inner sink failed for entry {entry_id}: {source}")]
    InnerSink {
        /// Affected bus entry.
        entry_id: Uuid,
        /// Sink failure.
        #[source]
        source: SinkError,
        /// Crossings settled during the tick, ending with the rejected entry.
        settled: Vec<CrossingOutcome>,
    },
}

// ---------------------------------------------------------------------------
// Clock
// ---------------------------------------------------------------------------

#[derive(Clone)]
struct Connections {
    bus: Arc<MembraneBus>,
    policy: Arc<CrossingPolicy>,
    codec: Arc<CodecPipeline>,
    inner: Option<Arc<dyn InnerSink>>,
    outer: Option<Arc<dyn OuterSink>>,
}

/// The 30-step scheduler.
pub struct Sys6MembraneClock {
    config: ClockConfig,
    global_step: u8,
    cycle: u64,
    tick_count: u64,
    energy_level: f64,
    lanes: Delta2Lanes,
    connections: Option<Connections>,
    events: Option<mpsc::Sender<MembraneEvent>>,
}

impl std::fmt::Debug for Sys6MembraneClock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sys6MembraneClock")
            .field("global_step", &self.global_step)
            .field("cycle", &self.cycle)
            .field("energy_level", &self.energy_level)
            .field("connected", &self.connections.is_some())
            .finish_non_exhaustive()
    }
}

impl Sys6MembraneClock {
    /// Create an unconnected clock at step 0.
    pub fn new(config: ClockConfig) -> Self {
        let energy_level = clamp_energy(config.initial_energy);
        let lanes = Delta2Lanes::new(config.lane_capacity);
        Self {
            config,
            global_step: 0,
            cycle: 0,
            tick_count: 0,
            energy_level,
            lanes,
            connections: None,
            events: None,
        }
    }

    /// Advance one step, decay energy and return the new snapshot.
    pub fn tick(&mut self) -> ClockSnapshot {
        if self.global_step >= STEPS_PER_CYCLE {
            self.global_step = 1;
            self.cycle = self.cycle.saturating_add(1);
            debug!(cycle = self.cycle, "clock cycle completed");
        } else {
            self.global_step = self.global_step.saturating_add(1);
        }
        self.tick_count = self.tick_count.saturating_add(1);
        self.energy_level = clamp_energy(self.energy_level - self.config.energy_decay.max(0.0));

        let snapshot = self.snapshot();
        self.publish(MembraneEvent::Tick(snapshot));
        snapshot
    }

    /// Current snapshot without advancing.
    pub fn snapshot(&self) -> ClockSnapshot {
        ClockSnapshot::at(
            self.global_step,
            self.cycle,
            self.tick_count,
            self.energy_level,
        )
    }

    /// Current global step (`0` before the first tick).
    pub fn global_step(&self) -> u8 {
        self.global_step
    }

    /// Current delta-3 phase tag.
    pub fn get_delta3_phase(&self) -> Delta3Phase {
        Delta3Phase::for_step(self.global_step)
    }

    /// Current energy level.
    pub fn get_energy_level(&self) -> f64 {
        self.energy_level
    }

    /// Set the energy level, clamped to `[0, 1]`.
    pub fn set_energy_level(&mut self, level: f64) {
        self.energy_level = clamp_energy(level);
    }

    /// Whether the current step is in the inward window.
    pub fn can_cross_inward(&self) -> bool {
        CrossingWindow::for_step(self.global_step).prefers(Direction::Inward)
    }

    /// Whether the current step is in the outward window.
    pub fn can_cross_outward(&self) -> bool {
        CrossingWindow::for_step(self.global_step).prefers(Direction::Outward)
    }

    /// Snapshots of all eight lanes.
    pub fn get_delta2_lanes(&self) -> Vec<LaneSnapshot> {
        self.lanes.snapshots()
    }

    /// Least-loaded lane of a type.
    pub fn get_optimal_delta2_lane(&self, lane_type: LaneType) -> Option<LaneSnapshot> {
        self.lanes.optimal(lane_type)
    }

    /// Add load to a lane; `false` without effect if it would exceed capacity.
    pub fn allocate_delta2_load(&self, lane_id: u8, amount: u32) -> bool {
        self.lanes.allocate(lane_id, amount)
    }

    /// Remove load from a lane, floored at zero; `false` for unknown lanes.
    pub fn release_delta2_load(&self, lane_id: u8, amount: u32) -> bool {
        self.lanes.release(lane_id, amount)
    }

    /// Wire the clock to a bus, policy and codec.
    pub fn connect(
        &mut self,
        bus: Arc<MembraneBus>,
        policy: Arc<CrossingPolicy>,
        codec: Arc<CodecPipeline>,
    ) {
        let (inner, outer) = self
            .connections
            .take()
            .map(|c| (c.inner, c.outer))
            .unwrap_or_default();
        self.connections = Some(Connections {
            bus,
            policy,
            codec,
            inner,
            outer,
        });
    }

    /// Whether [`connect`](Self::connect) has been called.
    pub fn is_connected(&self) -> bool {
        self.connections.is_some()
    }

    /// Install the inner sink. Ignored until the clock is connected.
    pub fn set_inner_sink(&mut self, sink: Arc<dyn InnerSink>) {
        if let Some(connections) = self.connections.as_mut() {
            connections.inner = Some(sink);
        } else {
            warn!("inner sink set on an unconnected clock; ignoring");
        }
    }

    /// Install the outer sink. Ignored until the clock is connected.
    pub fn set_outer_sink(&mut self, sink: Arc<dyn OuterSink>) {
        if let Some(connections) = self.connections.as_mut() {
            connections.outer = Some(sink);
        } else {
            warn!("outer sink set on an unconnected clock; ignoring");
        }
    }

    /// Open the bounded event channel, replacing any previous subscriber.
    pub fn subscribe(&mut self) -> mpsc::Receiver<MembraneEvent> {
        let (tx, rx) = mpsc::channel(self.config.event_channel_capacity.max(1));
        self.events = Some(tx);
        rx
    }

    fn publish(&mut self, event: MembraneEvent) {
        let Some(tx) = &self.events else {
            return;
        };
        match tx.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!("membrane event channel full; dropping notification");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!("membrane event subscriber gone; closing channel");
                self.events = None;
            }
        }
    }
}

fn clamp_energy(level: f64) -> f64 {
    if level.is_nan() {
        0.0
    } else {
        level.clamp(0.0, 1.0)
    }
}
