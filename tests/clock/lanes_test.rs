//! Delta-2 lane accounting through the clock.

use std::sync::Arc;

use membrane::clock::{LaneType, Sys6MembraneClock, DELTA2_LANE_COUNT};
use membrane::config::ClockConfig;

fn clock_with_capacity(lane_capacity: u32) -> Sys6MembraneClock {
    Sys6MembraneClock::new(ClockConfig {
        lane_capacity,
        ..ClockConfig::default()
    })
}

fn load(clock: &Sys6MembraneClock, lane_id: u8) -> u32 {
    clock
        .get_delta2_lanes()
        .into_iter()
        .find(|l| l.id == lane_id)
        .map(|l| l.current_load)
        .expect("lane exists")
}

#[test]
fn there_are_eight_lanes_with_configured_capacity() {
    let clock = clock_with_capacity(7);
    let lanes = clock.get_delta2_lanes();
    assert_eq!(lanes.len(), usize::from(DELTA2_LANE_COUNT));
    assert!(lanes.iter().all(|l| l.capacity == 7 && l.current_load == 0));
    let ids: Vec<u8> = lanes.iter().map(|l| l.id).collect();
    assert_eq!(ids, (0..8).collect::<Vec<u8>>());
}

#[test]
fn allocate_then_release_conserves_load() {
    let clock = clock_with_capacity(10);
    assert!(clock.allocate_delta2_load(3, 4));
    for lane_id in 0..DELTA2_LANE_COUNT {
        for amount in [0, 1, 3, 6] {
            let before = load(&clock, lane_id);
            if clock.allocate_delta2_load(lane_id, amount) {
                assert!(clock.release_delta2_load(lane_id, amount));
            }
            assert_eq!(load(&clock, lane_id), before, "lane {lane_id} amount {amount}");
        }
    }
}

#[test]
fn allocation_over_capacity_fails_without_effect() {
    let clock = clock_with_capacity(5);
    assert!(clock.allocate_delta2_load(0, 5));
    assert!(!clock.allocate_delta2_load(0, 1));
    assert_eq!(load(&clock, 0), 5);
    assert!(!clock.allocate_delta2_load(8, 1));
}

#[test]
fn release_floors_at_zero_and_rejects_unknown_lanes() {
    let clock = clock_with_capacity(5);
    assert!(clock.allocate_delta2_load(1, 2));
    assert!(clock.release_delta2_load(1, 10));
    assert_eq!(load(&clock, 1), 0);
    assert!(!clock.release_delta2_load(42, 1));
}

#[test]
fn optimal_lane_is_least_loaded_of_type() {
    let clock = clock_with_capacity(10);
    let first = clock
        .get_optimal_delta2_lane(LaneType::ToolCall)
        .expect("tool call lane");
    assert_eq!(first.lane_type, LaneType::ToolCall);

    assert!(clock.allocate_delta2_load(first.id, 3));
    let next = clock
        .get_optimal_delta2_lane(LaneType::ToolCall)
        .expect("tool call lane");
    assert_ne!(next.id, first.id);
    assert_eq!(next.current_load, 0);
}

#[test]
fn concurrent_allocate_release_loses_no_updates() {
    let clock = Arc::new(clock_with_capacity(10_000));
    let handles: Vec<_> = (0..8)
        .map(|_| {
            let clock = Arc::clone(&clock);
            std::thread::spawn(move || {
                for _ in 0..500 {
                    assert!(clock.allocate_delta2_load(6, 2));
                    assert!(clock.release_delta2_load(6, 1));
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().expect("worker");
    }
    assert_eq!(load(&clock, 6), 8 * 500);
}

#[test]
fn concurrent_allocation_never_exceeds_capacity() {
    let clock = Arc::new(clock_with_capacity(50));
    let handles: Vec<_> = (0..8)
        .map(|_| {
            let clock = Arc::clone(&clock);
            std::thread::spawn(move || {
                (0..20)
                    .filter(|_| clock.allocate_delta2_load(2, 1))
                    .count()
            })
        })
        .collect();
    let granted: usize = handles
        .into_iter()
        .map(|h| h.join().expect("worker"))
        .sum();
    assert_eq!(granted, 50);
    assert_eq!(load(&clock, 2), 50);
}
