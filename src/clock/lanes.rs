//! Delta-2 lanes: eight fixed concurrency lanes, one per 3-bit combination.
//!
//! The upper two bits select the lane type, the low bit splits each type into
//! a pair so load can be balanced. Load counters are lock-free atomics updated
//! with compare-and-swap loops, so allocate/release are linearizable per lane.

use std::sync::atomic::{AtomicU32, Ordering};

use serde::Serialize;

/// Number of delta-2 lanes (2^3).
pub const DELTA2_LANE_COUNT: u8 = 8;

/// Kind of work a lane carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LaneType {
    /// Outward tool and provider calls.
    ToolCall,
    /// Model inference.
    Inference,
    /// Inward evidence intake.
    Perception,
    /// Writes into the sealed store.
    MemoryIo,
}

impl LaneType {
    /// Lane type for a 3-bit lane id.
    pub fn for_lane(id: u8) -> Self {
        match (id >> 1) & 0b11 {
            0 => Self::ToolCall,
            1 => Self::Inference,
            2 => Self::Perception,
            _ => Self::MemoryIo,
        }
    }
}

/// Point-in-time view of a lane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LaneSnapshot {
    /// Lane id in `0..8`.
    pub id: u8,
    /// The three binary properties the id encodes, high bit first.
    pub bits: [bool; 3],
    /// Kind of work carried.
    pub lane_type: LaneType,
    /// Maximum load.
    pub capacity: u32,
    /// Current load.
    pub current_load: u32,
}

#[derive(Debug)]
struct Delta2Lane {
    id: u8,
    lane_type: LaneType,
    capacity: u32,
    load: AtomicU32,
}

impl Delta2Lane {
    fn snapshot(&self) -> LaneSnapshot {
        LaneSnapshot {
            id: self.id,
            bits: [self.id & 0b100 != 0, self.id & 0b010 != 0, self.id & 0b001 != 0],
            lane_type: self.lane_type,
            capacity: self.capacity,
            current_load: self.load.load(Ordering::SeqCst),
        }
    }
}

/// The fixed set of eight lanes.
#[derive(Debug)]
pub struct Delta2Lanes {
    lanes: Vec<Delta2Lane>,
}

impl Delta2Lanes {
    /// Create eight empty lanes with the same capacity.
    pub fn new(capacity: u32) -> Self {
        let lanes = (0..DELTA2_LANE_COUNT)
            .map(|id| Delta2Lane {
                id,
                lane_type: LaneType::for_lane(id),
                capacity,
                load: AtomicU32::new(0),
            })
            .collect();
        Self { lanes }
    }

    /// Add `amount` to a lane's load.
    ///
    /// Returns `false` without effect if the lane does not exist or the new
    /// load would exceed capacity.
    pub fn allocate(&self, lane_id: u8, amount: u32) -> bool {
        let Some(lane) = self.lane(lane_id) else {
            return false;
        };
        lane.load
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |current| {
                current
                    .checked_add(amount)
                    .filter(|next| *next <= lane.capacity)
            })
            .is_ok()
    }

    /// Subtract `amount` from a lane's load, floored at zero.
    ///
    /// Returns `false` if the lane does not exist.
    pub fn release(&self, lane_id: u8, amount: u32) -> bool {
        let Some(lane) = self.lane(lane_id) else {
            return false;
        };
        // The closure always returns Some, so the update cannot fail.
        let _ = lane
            .load
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |current| {
                Some(current.saturating_sub(amount))
            });
        true
    }

    /// Lane of the given type with the lowest current load (lowest id on ties).
    pub fn optimal(&self, lane_type: LaneType) -> Option<LaneSnapshot> {
        self.lanes
            .iter()
            .filter(|l| l.lane_type == lane_type)
            .map(Delta2Lane::snapshot)
            .min_by_key(|s| (s.current_load, s.id))
    }

    /// Allocate `amount` on the least-loaded lane of a type that can take it.
    ///
    /// Returns the lane id, or `None` when every lane of the type is full.
    pub fn reserve(&self, lane_type: LaneType, amount: u32) -> Option<u8> {
        let mut candidates: Vec<LaneSnapshot> = self
            .lanes
            .iter()
            .filter(|l| l.lane_type == lane_type)
            .map(Delta2Lane::snapshot)
            .collect();
        candidates.sort_by_key(|s| (s.current_load, s.id));
        candidates
            .into_iter()
            .map(|s| s.id)
            .find(|&id| self.allocate(id, amount))
    }

    /// Snapshot of one lane.
    pub fn get(&self, lane_id: u8) -> Option<LaneSnapshot> {
        self.lane(lane_id).map(Delta2Lane::snapshot)
    }

    /// Snapshots of all lanes in id order.
    pub fn snapshots(&self) -> Vec<LaneSnapshot> {
        self.lanes.iter().map(Delta2Lane::snapshot).collect()
    }

    fn lane(&self, lane_id: u8) -> Option<&Delta2Lane> {
        self.lanes.get(usize::from(lane_id))
    }
}
