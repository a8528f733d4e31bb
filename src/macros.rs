//! Application-side instrumentation: `causal_progress!`, `causal_begin!`
//! and `causal_end!`.
//!
//! Each expands to a per-call-site static counter plus a `Once` guarding
//! its registration, then an unconditional atomic increment. `SeqCst`
//! matches the ordering the reference implementation's `__ATOMIC_SEQ_CST`
//! increments use throughout.

/// Marks one unit of application-level progress at the call site.
#[macro_export]
macro_rules! causal_progress {
    () => {{
        static COUNTER: ::std::sync::atomic::AtomicUsize = ::std::sync::atomic::AtomicUsize::new(0);
        static ONCE: ::std::sync::Once = ::std::sync::Once::new();
        ONCE.call_once(|| {
            $crate::counters::register_weak(
                $crate::counters::CounterKind::Progress,
                file!(),
                line!(),
                &COUNTER,
            );
        });
        COUNTER.fetch_add(1, ::std::sync::atomic::Ordering::SeqCst);
    }};
}

/// Marks the start of a named transaction. Recognized and recorded by the
/// registry; analytic use is reserved.
#[macro_export]
macro_rules! causal_begin {
    () => {{
        static COUNTER: ::std::sync::atomic::AtomicUsize = ::std::sync::atomic::AtomicUsize::new(0);
        static ONCE: ::std::sync::Once = ::std::sync::Once::new();
        ONCE.call_once(|| {
            $crate::counters::register_weak(
                $crate::counters::CounterKind::Begin,
                file!(),
                line!(),
                &COUNTER,
            );
        });
        COUNTER.fetch_add(1, ::std::sync::atomic::Ordering::SeqCst);
    }};
}

/// Marks the end of a named transaction. See [`causal_begin!`].
#[macro_export]
macro_rules! causal_end {
    () => {{
        static COUNTER: ::std::sync::atomic::AtomicUsize = ::std::sync::atomic::AtomicUsize::new(0);
        static ONCE: ::std::sync::Once = ::std::sync::Once::new();
        ONCE.call_once(|| {
            $crate::counters::register_weak(
                $crate::counters::CounterKind::End,
                file!(),
                line!(),
                &COUNTER,
            );
        });
        COUNTER.fetch_add(1, ::std::sync::atomic::Ordering::SeqCst);
    }};
}
