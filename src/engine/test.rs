use super::*;

fn noop_wait(_nanos: u64) -> u64 {
    0
}

#[test]
fn starts_in_normal_mode_with_zero_round() {
    let engine = Engine::new();
    assert_eq!(engine.mode(), Mode::Normal);
    assert_eq!(engine.round_number(), 0);
}

#[test]
fn starting_a_round_increments_round_number_and_sets_mode() {
    let engine = Engine::new();
    engine.start_slowdown(0x1000..0x2000, 100);
    assert_eq!(engine.mode(), Mode::Slowdown);
    assert_eq!(engine.round_number(), 1);

    engine.start_speedup(0x3000..0x4000, 50);
    assert_eq!(engine.mode(), Mode::Speedup);
    assert_eq!(engine.round_number(), 2);
}

#[test]
fn reset_returns_to_normal_without_bumping_round() {
    let engine = Engine::new();
    engine.start_slowdown(0x1000..0x2000, 100);
    let round = engine.round_number();
    engine.reset();
    assert_eq!(engine.mode(), Mode::Normal);
    assert_eq!(engine.round_number(), round);
}

#[test]
fn slowdown_delays_samples_in_range_only() {
    let engine = Engine::new();
    engine.init_thread();
    engine.start_slowdown(0x1000..0x2000, 100);

    let mut delayed = 0u32;
    engine.on_sample(crate::sample::Kind::Instruction, 0x1500, |_| {
        delayed += 1;
        0
    });
    assert_eq!(delayed, 1);

    let mut delayed_outside = 0u32;
    engine.on_sample(crate::sample::Kind::Instruction, 0x9000, |_| {
        delayed_outside += 1;
        0
    });
    assert_eq!(delayed_outside, 0);
}

#[test]
fn cycle_samples_never_trigger_a_delay() {
    let engine = Engine::new();
    engine.init_thread();
    engine.start_slowdown(0x1000..0x2000, 100);

    let mut delayed = 0u32;
    engine.on_sample(crate::sample::Kind::Cycle, 0x1500, |_| {
        delayed += 1;
        0
    });
    assert_eq!(delayed, 0);
}

#[test]
fn speedup_requests_accumulate_when_sampling_inside_range() {
    let engine = Engine::new();
    engine.init_thread();
    engine.start_speedup(0x1000..0x2000, 10);

    engine.on_sample(crate::sample::Kind::Instruction, 0x1500, noop_wait);
    engine.on_sample(crate::sample::Kind::Instruction, 0x1600, noop_wait);

    assert_eq!(engine.delays_requested(), 2);
}

#[test]
fn speedup_other_thread_catches_up_to_requested_delays() {
    use std::sync::Arc;

    let engine = Arc::new(Engine::new());
    engine.init_thread();
    engine.start_speedup(0x1000..0x2000, 10);

    // This thread samples twice inside the target range.
    engine.on_sample(crate::sample::Kind::Instruction, 0x1500, noop_wait);
    engine.on_sample(crate::sample::Kind::Instruction, 0x1500, noop_wait);
    assert_eq!(engine.delays_requested(), 2);

    // A separate thread, with its own thread-local delay count starting
    // from zero, must wait out both requested delays when it samples
    // outside the range.
    let other_engine = Arc::clone(&engine);
    let waits = std::thread::spawn(move || {
        other_engine.init_thread();
        let mut waits = 0u32;
        other_engine.on_sample(crate::sample::Kind::Instruction, 0x9000, |_| {
            waits += 1;
            0
        });
        waits
    })
    .join()
    .unwrap();

    assert_eq!(waits, 2);
    assert_eq!(engine.delays_executed(), 2);
}

#[test]
fn thread_sampling_inside_its_own_range_does_not_delay_itself() {
    let engine = Engine::new();
    engine.init_thread();
    engine.start_speedup(0x1000..0x2000, 10);

    let mut waits = 0u32;
    engine.on_sample(crate::sample::Kind::Instruction, 0x1500, |_| {
        waits += 1;
        0
    });
    assert_eq!(waits, 0, "the sampling thread must not wait on its own request");
    assert_eq!(engine.delays_requested(), 1);
}

#[test]
fn new_thread_inherits_current_delays_executed_not_zero() {
    use std::sync::Arc;

    let engine = Arc::new(Engine::new());
    engine.init_thread();
    engine.start_speedup(0x1000..0x2000, 10);

    // An existing thread requests 6 delays, then a catch-up thread absorbs
    // them, raising delays_executed to 6.
    for _ in 0..6 {
        engine.on_sample(crate::sample::Kind::Instruction, 0x1500, noop_wait);
    }
    {
        let engine = Arc::clone(&engine);
        std::thread::spawn(move || {
            engine.init_thread();
            engine.on_sample(crate::sample::Kind::Instruction, 0x9000, noop_wait);
        })
        .join()
        .unwrap();
    }
    assert_eq!(engine.delays_executed(), 6);

    // A thread created now (init_thread reads the live delays_executed)
    // must start already caught up and not wait at all.
    let engine = Arc::clone(&engine);
    let waits = std::thread::spawn(move || {
        engine.init_thread();
        let mut waits = 0u32;
        engine.on_sample(crate::sample::Kind::Instruction, 0x9000, |_| {
            waits += 1;
            0
        });
        waits
    })
    .join()
    .unwrap();
    assert_eq!(waits, 0, "a freshly initialized thread starts already caught up");
}
