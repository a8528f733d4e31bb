//! Exercises the perturbation engine's public surface the way a fixed
//! `CAUSAL_MODE` experiment would drive it, without attaching to real
//! signals or hardware counters (scenarios S1-S2's shape, against a
//! synthetic address range instead of a live process).

use std::cell::Cell;
use std::ops::Range;

use causal::engine::{Engine, Mode};
use causal::sample::Kind;

const HOT_RANGE: Range<usize> = 0x1000..0x2000;
const COLD_ADDRESS: usize = 0x5000;

fn count_waits(engine: &Engine, kind: Kind, address: usize) -> usize {
    let waits = Cell::new(0);
    engine.on_sample(kind, address, |_nanos| {
        waits.set(waits.get() + 1);
        0
    });
    waits.get()
}

#[test]
fn normal_mode_never_waits() {
    let engine = Engine::new();
    assert_eq!(engine.mode(), Mode::Normal);
    assert_eq!(count_waits(&engine, Kind::Instruction, 0x1500), 0);
}

#[test]
fn cycle_samples_never_trigger_a_delay() {
    let engine = Engine::new();
    engine.start_slowdown(HOT_RANGE, 1_000);
    assert_eq!(count_waits(&engine, Kind::Cycle, 0x1500), 0);
}

#[test]
fn slowdown_delays_only_in_range_samples() {
    let engine = Engine::new();
    engine.start_slowdown(HOT_RANGE, 1_000);

    assert_eq!(count_waits(&engine, Kind::Instruction, 0x1500), 1);
    assert_eq!(count_waits(&engine, Kind::Instruction, COLD_ADDRESS), 0);
}

#[test]
fn speedup_never_delays_the_sampling_thread_for_its_own_in_range_sample() {
    let engine = Engine::new();
    engine.start_speedup(HOT_RANGE, 1_000);

    assert_eq!(count_waits(&engine, Kind::Instruction, 0x1500), 0);
    assert_eq!(engine.delays_requested(), 1);
}

#[test]
fn speedup_makes_out_of_range_samples_catch_up_to_requested_delays() {
    let engine = Engine::new();
    engine.start_speedup(HOT_RANGE, 1_000);

    // Three in-range samples accrue three requested delays...
    for _ in 0..3 {
        count_waits(&engine, Kind::Instruction, 0x1500);
    }
    assert_eq!(engine.delays_requested(), 3);

    // ...which a single out-of-range sample on this thread must now pay.
    assert_eq!(count_waits(&engine, Kind::Instruction, COLD_ADDRESS), 3);
    assert_eq!(engine.delays_executed(), 3);

    // Once paid, a further out-of-range sample owes nothing more.
    assert_eq!(count_waits(&engine, Kind::Instruction, COLD_ADDRESS), 0);
}

#[test]
fn reset_returns_to_normal_without_advancing_round_number() {
    let engine = Engine::new();
    engine.start_slowdown(HOT_RANGE, 1_000);
    let round = engine.round_number();

    engine.reset();
    assert_eq!(engine.mode(), Mode::Normal);
    assert_eq!(engine.round_number(), round);
    assert_eq!(count_waits(&engine, Kind::Instruction, 0x1500), 0);
}

#[test]
fn starting_a_new_round_advances_round_number_monotonically() {
    let engine = Engine::new();
    engine.start_slowdown(HOT_RANGE, 1_000);
    let first = engine.round_number();
    engine.start_speedup(HOT_RANGE, 1_000);
    assert!(engine.round_number() > first);
}

#[test]
fn a_thread_joining_mid_round_does_not_pay_for_delays_it_missed() {
    use std::sync::Arc;

    let engine = Arc::new(Engine::new());
    engine.start_speedup(HOT_RANGE, 1_000);
    for _ in 0..5 {
        count_waits(&engine, Kind::Instruction, 0x1500);
    }
    assert_eq!(engine.delays_requested(), 5);

    let joined = Arc::clone(&engine);
    let waits_on_new_thread = std::thread::spawn(move || {
        joined.init_thread();
        let waits = Cell::new(0);
        joined.on_sample(Kind::Instruction, COLD_ADDRESS, |_| {
            waits.set(waits.get() + 1);
            0
        });
        waits.get()
    })
    .join()
    .unwrap();

    assert_eq!(
        waits_on_new_thread, 0,
        "a thread that joins mid-round must not owe delays that accrued before it existed"
    );
}
