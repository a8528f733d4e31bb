//! Smoke-tests `causal_progress!`, `causal_begin!` and `causal_end!` as an
//! instrumented application would actually call them: from ordinary
//! library code, with no profiler attached. The constructor that would
//! normally arm sampling still runs (it is a `cdylib`/`rlib` built as a
//! regular dependency here), but registration must never panic or block
//! regardless of whether sampling armed successfully in this sandbox.

#[test]
fn progress_counter_survives_repeated_calls_from_a_loop() {
    for _ in 0..1000 {
        causal::causal_progress!();
    }
}

#[test]
fn begin_and_end_counters_survive_repeated_calls() {
    for _ in 0..100 {
        causal::causal_begin!();
        causal::causal_end!();
    }
}

#[test]
fn each_call_site_is_independent() {
    fn site_a() {
        causal::causal_progress!();
    }
    fn site_b() {
        causal::causal_progress!();
    }
    for _ in 0..10 {
        site_a();
        site_b();
    }
}
