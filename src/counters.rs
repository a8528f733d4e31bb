//! The progress-counter registry (component C7).

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::RwLock;

/// Which of the three call sites declared a counter.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CounterKind {
    Progress,
    Begin,
    End,
}

/// A user-declared counter. Lives for the rest of the process once
/// registered; the registry never removes entries.
pub struct Counter {
    pub kind: CounterKind,
    pub file: &'static str,
    pub line: u32,
    value: &'static AtomicUsize,
}

impl Counter {
    pub fn load(&self) -> usize {
        self.value.load(Ordering::SeqCst)
    }
}

/// Global table of every counter registered by the instrumented
/// application. Reads take a snapshot by iterating under the lock; writes
/// (registration) are rare (once per call site, guarded by the call site's
/// own once-flag) so a `RwLock` favors the common read path used when a
/// round samples every counter's value.
pub struct Registry {
    counters: RwLock<Vec<Counter>>,
}

impl Registry {
    pub fn new() -> Registry {
        Registry {
            counters: RwLock::new(Vec::new()),
        }
    }

    /// Registers a counter backed by a process-lifetime `'static` atomic.
    /// Called once per call site from `causal_progress!`/`causal_begin!`/
    /// `causal_end!`, guarded by each call site's own `OnceLock`.
    pub fn register(
        &self,
        kind: CounterKind,
        file: &'static str,
        line: u32,
        value: &'static AtomicUsize,
    ) {
        let mut counters = self.counters.write().unwrap_or_else(|e| e.into_inner());
        counters.push(Counter {
            kind,
            file,
            line,
            value,
        });
    }

    /// A snapshot of every registered progress counter's current value,
    /// keyed by its `(file, line)` declaration site.
    pub fn snapshot_progress(&self) -> Vec<(&'static str, u32, usize)> {
        let counters = self.counters.read().unwrap_or_else(|e| e.into_inner());
        counters
            .iter()
            .filter(|c| c.kind == CounterKind::Progress)
            .map(|c| (c.file, c.line, c.load()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.counters.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for Registry {
    fn default() -> Registry {
        Registry::new()
    }
}

/// Entry point used by the `causal_progress!`/`causal_begin!`/`causal_end!`
/// macros. Each call site guards this with its own `Once` so registration
/// happens exactly once no matter how many times the instrumented code
/// runs.
///
/// The reference implementation resolves this indirection through a weak
/// `dlsym` lookup, so instrumented applications link and run even when no
/// profiler is attached. Here the registry is always part of the same
/// crate the application links against, so that distinction collapses to
/// whether [`crate::lifecycle`] actually armed sampling; registration
/// itself never fails.
pub fn register_weak(kind: CounterKind, file: &'static str, line: u32, value: &'static AtomicUsize) {
    crate::lifecycle::runtime().registry.register(kind, file, line, value);
}

#[cfg(test)]
mod test {
    use super::*;

    static COUNTER_A: AtomicUsize = AtomicUsize::new(0);
    static COUNTER_B: AtomicUsize = AtomicUsize::new(0);

    #[test]
    fn registering_then_incrementing_is_visible_in_snapshot() {
        let registry = Registry::new();
        registry.register(CounterKind::Progress, "a.rs", 10, &COUNTER_A);
        COUNTER_A.fetch_add(3, Ordering::SeqCst);

        let snapshot = registry.snapshot_progress();
        assert_eq!(snapshot, vec![("a.rs", 10, 3)]);
    }

    #[test]
    fn begin_end_counters_are_excluded_from_progress_snapshot() {
        let registry = Registry::new();
        registry.register(CounterKind::Begin, "b.rs", 1, &COUNTER_B);
        assert!(registry.snapshot_progress().is_empty());
        assert_eq!(registry.len(), 1);
    }
}
