//! Two-queue journal of packets awaiting a crossing decision.
//!
//! The [`MembraneBus`] owns every [`BusEntry`]. Sequence numbers are assigned
//! under one lock, so they are unique and strictly increasing across both
//! directions even with concurrent producers. Entries are never removed: the
//! entry log and the cumulative [`BusStats`] form a replayable audit trail for
//! the lifetime of the bus.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::packet::{validate_packet, Direction, EvidencePacket, IntentPacket, Packet};

/// Agent recorded for transitions the bus performs on its own.
const BUS_AGENT: &str = "membrane-bus";

// ---------------------------------------------------------------------------
// Entry model
// ---------------------------------------------------------------------------

/// Lifecycle status of a bus entry.
///
/// Transitions are monotone: `Pending -> Processing -> {Approved, Rejected}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryStatus {
    /// Waiting for a crossing decision.
    Pending,
    /// Claimed by a processing agent.
    Processing,
    /// Crossed the membrane. Terminal.
    Approved,
    /// Refused. Terminal.
    Rejected,
}

impl EntryStatus {
    /// Whether no further transition is possible.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Approved | Self::Rejected)
    }

    /// Whether the entry still counts toward queue depth.
    pub fn is_open(self) -> bool {
        matches!(self, Self::Pending | Self::Processing)
    }

    /// Returns the lowercase label.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        }
    }
}

impl std::fmt::Display for EntryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One recorded status transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusChange {
    /// Status entered.
    pub status: EntryStatus,
    /// Component that caused the transition.
    pub agent: String,
    /// Reason, for rejections.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// When the transition happened.
    pub at: DateTime<Utc>,
}

/// A packet's record on the bus.
#[derive(Debug, Clone)]
pub struct BusEntry {
    /// Entry identifier.
    pub id: Uuid,
    /// Global sequence number, starting at 1.
    pub sequence: u64,
    /// Crossing direction, fixed by packet type.
    pub direction: Direction,
    /// The packet; shared, never mutated.
    pub packet: Arc<Packet>,
    /// Current status.
    pub status: EntryStatus,
    /// Times the crossing was deferred while pending.
    pub deferrals: u32,
    /// Every status the entry has entered, oldest first.
    pub history: Vec<StatusChange>,
    /// When the entry was created.
    pub submitted_at: DateTime<Utc>,
}

impl BusEntry {
    /// Rejection reason, if the entry was rejected.
    pub fn rejection_reason(&self) -> Option<&str> {
        self.history
            .iter()
            .rev()
            .find(|c| c.status == EntryStatus::Rejected)
            .and_then(|c| c.reason.as_deref())
    }
}

/// Open (pending + processing) entries per direction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueDepths {
    /// Open inward entries.
    pub inward: usize,
    /// Open outward entries.
    pub outward: usize,
}

/// Cumulative counters. Never decremented.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BusStats {
    /// Entries ever created.
    pub total_entries: u64,
    /// Entries approved.
    pub approved_count: u64,
    /// Entries rejected.
    pub rejected_count: u64,
    /// Submissions answered with an existing entry.
    pub duplicate_submissions: u64,
    /// Deferrals recorded across all entries.
    pub deferral_count: u64,
}

/// Serializable view of one entry.
#[derive(Debug, Clone, Serialize)]
pub struct EntryRecord {
    /// Entry identifier.
    pub id: Uuid,
    /// Global sequence number.
    pub sequence: u64,
    /// Crossing direction.
    pub direction: Direction,
    /// Packet identifier.
    pub packet_id: String,
    /// Packet wire discriminant.
    pub packet_type: &'static str,
    /// Current status.
    pub status: EntryStatus,
    /// Deferral count.
    pub deferrals: u32,
    /// Status history.
    pub history: Vec<StatusChange>,
}

impl From<&BusEntry> for EntryRecord {
    fn from(entry: &BusEntry) -> Self {
        Self {
            id: entry.id,
            sequence: entry.sequence,
            direction: entry.direction,
            packet_id: entry.packet.id().to_owned(),
            packet_type: entry.packet.kind(),
            status: entry.status,
            deferrals: entry.deferrals,
            history: entry.history.clone(),
        }
    }
}

/// Point-in-time copy of the entry log and counters, safe to persist.
#[derive(Debug, Clone, Serialize)]
pub struct BusSnapshot {
    /// When the snapshot was taken.
    pub taken_at: DateTime<Utc>,
    /// Whether the bus accepted submissions at that time.
    pub running: bool,
    /// Entries in sequence order.
    pub entries: Vec<EntryRecord>,
    /// Counters.
    pub stats: BusStats,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors from bus operations.
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    /// The bus is stopped and refuses submissions.
    #[error("membrane bus is not running")]
    NotRunning,

    /// The packet failed structural validation and was not enqueued.
    #[error("packet {packet_id} failed validation: {}", errors.join("; "))]
    InvalidPacket {
        /// Packet identifier.
        packet_id: String,
        /// Validation messages.
        errors: Vec<String>,
    },

    /// The packet type never crosses the membrane.
    #[error("{kind} packets are inner-only and cannot be submitted")]
    InnerOnly {
        /// Packet wire discriminant.
        kind: &'static str,
    },

    /// No entry has this id.
    #[error("no bus entry with id {0}")]
    NotFound(Uuid),

    /// The requested transition would move an entry backwards or out of a
    /// terminal state.
    #[error("entry {id} cannot move from {from} to {to}")]
    InvalidTransition {
        /// Entry identifier.
        id: Uuid,
        /// Current status.
        from: EntryStatus,
        /// Requested status.
        to: EntryStatus,
    },

    /// Internal lock was poisoned by a panicking holder.
    #[error("bus state lock poisoned: {0}")]
    LockPoisoned(String),
}

// ---------------------------------------------------------------------------
// Bus
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct BusState {
    next_sequence: u64,
    entries: Vec<BusEntry>,
    by_id: HashMap<Uuid, usize>,
    by_packet: HashMap<String, usize>,
    stats: BusStats,
}

impl BusState {
    fn entry_mut(&mut self, id: Uuid) -> Result<&mut BusEntry, BusError> {
        let idx = *self.by_id.get(&id).ok_or(BusError::NotFound(id))?;
        self.entries.get_mut(idx).ok_or(BusError::NotFound(id))
    }
}

/// Bidirectional packet journal with lifecycle tracking.
///
/// Uses a sync [`Mutex`] since every critical section is short (no awaits).
#[derive(Debug, Default)]
pub struct MembraneBus {
    state: Mutex<BusState>,
    running: AtomicBool,
}

impl MembraneBus {
    /// Create a stopped, empty bus.
    pub fn new() -> Self {
        Self::default()
    }

    /// Start accepting submissions.
    pub fn start(&self) {
        if !self.running.swap(true, Ordering::SeqCst) {
            info!("membrane bus started");
        }
    }

    /// Stop accepting submissions. Existing entries can still be resolved.
    pub fn stop(&self) {
        if self.running.swap(false, Ordering::SeqCst) {
            info!("membrane bus stopped");
        }
    }

    /// Whether submissions are accepted.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Submit inward evidence.
    ///
    /// # Errors
    ///
    /// See [`MembraneBus::submit`].
    pub fn submit_evidence(&self, packet: EvidencePacket) -> Result<BusEntry, BusError> {
        self.submit(Packet::Evidence(packet))
    }

    /// Submit an outward intent.
    ///
    /// # Errors
    ///
    /// See [`MembraneBus::submit`].
    pub fn submit_intent(&self, packet: IntentPacket) -> Result<BusEntry, BusError> {
        self.submit(Packet::Intent(packet))
    }

    /// Submit any crossing packet, creating a pending entry.
    ///
    /// Resubmitting a packet id that is already on the bus returns the
    /// existing entry unchanged and consumes no sequence number.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::NotRunning`] when stopped,
    /// [`BusError::InnerOnly`] for packets without a crossing direction and
    /// [`BusError::InvalidPacket`] when validation fails.
    pub fn submit(&self, packet: Packet) -> Result<BusEntry, BusError> {
        if !self.is_running() {
            return Err(BusError::NotRunning);
        }
        let direction = packet.direction().ok_or(BusError::InnerOnly {
            kind: packet.kind(),
        })?;

        let mut state = self.lock()?;

        let existing_idx = state.by_packet.get(packet.id()).copied();
        if let Some(idx) = existing_idx {
            state.stats.duplicate_submissions = state.stats.duplicate_submissions.saturating_add(1);
            let existing = state
                .entries
                .get(idx)
                .cloned()
                .ok_or_else(|| BusError::LockPoisoned("packet index out of range".to_owned()))?;
            debug!(packet_id = %packet.id(), entry_id = %existing.id, "duplicate submission ignored");
            return Ok(existing);
        }

        let report = validate_packet(&packet);
        if !report.valid {
            warn!(packet_id = %packet.id(), errors = ?report.errors, "packet refused by validation");
            return Err(BusError::InvalidPacket {
                packet_id: packet.id().to_owned(),
                errors: report.errors,
            });
        }

        state.next_sequence = state.next_sequence.saturating_add(1);
        let now = Utc::now();
        let entry = BusEntry {
            id: Uuid::new_v4(),
            sequence: state.next_sequence,
            direction,
            packet: Arc::new(packet),
            status: EntryStatus::Pending,
            deferrals: 0,
            history: vec![StatusChange {
                status: EntryStatus::Pending,
                agent: BUS_AGENT.to_owned(),
                reason: None,
                at: now,
            }],
            submitted_at: now,
        };

        let idx = state.entries.len();
        state.by_id.insert(entry.id, idx);
        state.by_packet.insert(entry.packet.id().to_owned(), idx);
        state.entries.push(entry.clone());
        state.stats.total_entries = state.stats.total_entries.saturating_add(1);

        debug!(
            entry_id = %entry.id,
            sequence = entry.sequence,
            direction = %direction,
            "entry submitted"
        );
        Ok(entry)
    }

    /// Claim a pending entry for processing.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::InvalidTransition`] unless the entry is pending.
    pub fn mark_processing(&self, id: Uuid, agent: &str) -> Result<BusEntry, BusError> {
        let mut state = self.lock()?;
        let entry = state.entry_mut(id)?;
        if entry.status != EntryStatus::Pending {
            return Err(BusError::InvalidTransition {
                id,
                from: entry.status,
                to: EntryStatus::Processing,
            });
        }
        push_status(entry, EntryStatus::Processing, agent, None);
        Ok(entry.clone())
    }

    /// Approve an entry. Terminal.
    ///
    /// A pending entry is moved through `processing` first so the audit
    /// trail never skips it.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::InvalidTransition`] for entries already terminal.
    pub fn approve(&self, id: Uuid) -> Result<BusEntry, BusError> {
        self.finish(id, EntryStatus::Approved, None)
    }

    /// Reject an entry with an optional reason. Terminal.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::InvalidTransition`] for entries already terminal.
    pub fn reject(&self, id: Uuid, reason: Option<&str>) -> Result<BusEntry, BusError> {
        self.finish(id, EntryStatus::Rejected, reason)
    }

    /// Count a deferral against a pending entry, returning the new count.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::InvalidTransition`] unless the entry is pending.
    pub fn record_deferral(&self, id: Uuid) -> Result<u32, BusError> {
        let mut state = self.lock()?;
        let entry = state.entry_mut(id)?;
        if entry.status != EntryStatus::Pending {
            return Err(BusError::InvalidTransition {
                id,
                from: entry.status,
                to: EntryStatus::Pending,
            });
        }
        entry.deferrals = entry.deferrals.saturating_add(1);
        let count = entry.deferrals;
        state.stats.deferral_count = state.stats.deferral_count.saturating_add(1);
        Ok(count)
    }

    /// Look up an entry by id.
    pub fn get(&self, id: Uuid) -> Option<BusEntry> {
        let state = self.lock().ok()?;
        let idx = *state.by_id.get(&id)?;
        state.entries.get(idx).cloned()
    }

    /// Look up the entry holding a packet id.
    pub fn get_by_packet(&self, packet_id: &str) -> Option<BusEntry> {
        let state = self.lock().ok()?;
        let idx = *state.by_packet.get(packet_id)?;
        state.entries.get(idx).cloned()
    }

    /// The pending entry with the lowest sequence number in `direction`.
    pub fn oldest_pending(&self, direction: Direction) -> Option<BusEntry> {
        let state = self.lock().ok()?;
        state
            .entries
            .iter()
            .find(|e| e.direction == direction && e.status == EntryStatus::Pending)
            .cloned()
    }

    /// All entries in sequence order.
    pub fn entries(&self) -> Vec<BusEntry> {
        self.lock().map(|s| s.entries.clone()).unwrap_or_default()
    }

    /// Open (pending + processing) entries per direction.
    pub fn get_queue_depths(&self) -> QueueDepths {
        let Ok(state) = self.lock() else {
            return QueueDepths::default();
        };
        state
            .entries
            .iter()
            .filter(|e| e.status.is_open())
            .fold(QueueDepths::default(), |mut depths, e| {
                match e.direction {
                    Direction::Inward => depths.inward = depths.inward.saturating_add(1),
                    Direction::Outward => depths.outward = depths.outward.saturating_add(1),
                }
                depths
            })
    }

    /// Cumulative counters.
    pub fn get_stats(&self) -> BusStats {
        self.lock().map(|s| s.stats).unwrap_or_default()
    }

    /// Copy of the entry log and counters.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::LockPoisoned`] if the state lock is poisoned.
    pub fn snapshot(&self) -> Result<BusSnapshot, BusError> {
        let state = self.lock()?;
        Ok(BusSnapshot {
            taken_at: Utc::now(),
            running: self.is_running(),
            entries: state.entries.iter().map(EntryRecord::from).collect(),
            stats: state.stats,
        })
    }

    fn finish(
        &self,
        id: Uuid,
        target: EntryStatus,
        reason: Option<&str>,
    ) -> Result<BusEntry, BusError> {
        let mut state = self.lock()?;
        let entry = state.entry_mut(id)?;
        if entry.status.is_terminal() {
            return Err(BusError::InvalidTransition {
                id,
                from: entry.status,
                to: target,
            });
        }
        if entry.status == EntryStatus::Pending {
            push_status(entry, EntryStatus::Processing, BUS_AGENT, None);
        }
        push_status(entry, target, BUS_AGENT, reason.map(str::to_owned));
        let finished = entry.clone();

        match target {
            EntryStatus::Approved => {
                state.stats.approved_count = state.stats.approved_count.saturating_add(1);
                info!(entry_id = %id, sequence = finished.sequence, direction = %finished.direction, "entry approved");
            }
            EntryStatus::Rejected => {
                state.stats.rejected_count = state.stats.rejected_count.saturating_add(1);
                info!(
                    entry_id = %id,
                    sequence = finished.sequence,
                    direction = %finished.direction,
                    reason = reason.unwrap_or(""),
                    "entry rejected"
                );
            }
            EntryStatus::Pending | EntryStatus::Processing => {}
        }
        Ok(finished)
    }

    fn lock(&self) -> Result<MutexGuard<'_, BusState>, BusError> {
        self.state
            .lock()
            .map_err(|e| BusError::LockPoisoned(e.to_string()))
    }
}

fn push_status(entry: &mut BusEntry, status: EntryStatus, agent: &str, reason: Option<String>) {
    entry.status = status;
    entry.history.push(StatusChange {
        status,
        agent: agent.to_owned(),
        reason,
        at: Utc::now(),
    });
}
