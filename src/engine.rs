//! The perturbation engine (component C5): the mode machine and delay
//! bookkeeping that implement virtual speedup and slowdown.
//!
//! This module concentrates every piece of global mutable state that a
//! signal handler needs to touch with no calling context, behind atomic
//! accessors. Nothing here allocates.

use std::cell::Cell;
use std::ops::Range;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};

/// The engine's current experiment mode.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum Mode {
    Normal = 0,
    Slowdown = 1,
    Speedup = 2,
}

impl Mode {
    fn from_u8(v: u8) -> Mode {
        match v {
            1 => Mode::Slowdown,
            2 => Mode::Speedup,
            _ => Mode::Normal,
        }
    }
}

/// One round's target, in effect only while `mode() != Mode::Normal`.
#[derive(Clone, Debug)]
struct Round {
    range: Range<usize>,
    delay_nanos: u64,
}

/// Per-thread delay bookkeeping that only the owning thread ever writes,
/// carried across the lifetime of the thread (not the round): when a new
/// round starts, a thread catches its local counters up to the new round
/// number lazily, the first time its handler observes the change.
#[derive(Default)]
struct ThreadState {
    round_number: Cell<u64>,
    delays_applied: Cell<u64>,
}

thread_local! {
    static THREAD_STATE: ThreadState = ThreadState::default();
}

/// Global perturbation state. One instance lives for the process; every
/// application thread's signal handler reads and writes it through atomics.
pub struct Engine {
    mode: AtomicU8,
    round_number: AtomicU64,
    delays_requested: AtomicU64,
    delays_executed: AtomicU64,
    round: std::sync::RwLock<Option<Round>>,
}

impl Engine {
    pub fn new() -> Engine {
        Engine {
            mode: AtomicU8::new(Mode::Normal as u8),
            round_number: AtomicU64::new(0),
            delays_requested: AtomicU64::new(0),
            delays_executed: AtomicU64::new(0),
            round: std::sync::RwLock::new(None),
        }
    }

    pub fn mode(&self) -> Mode {
        Mode::from_u8(self.mode.load(Ordering::Acquire))
    }

    pub fn round_number(&self) -> u64 {
        self.round_number.load(Ordering::Acquire)
    }

    pub fn delays_requested(&self) -> u64 {
        self.delays_requested.load(Ordering::Acquire)
    }

    pub fn delays_executed(&self) -> u64 {
        self.delays_executed.load(Ordering::Acquire)
    }

    /// Begins a slowdown round: every instruction sample inside `range`
    /// delays its own thread by `delay_nanos`, starting immediately.
    pub fn start_slowdown(&self, range: Range<usize>, delay_nanos: u64) {
        self.begin_round(Mode::Slowdown, range, delay_nanos);
    }

    /// Begins a virtual speedup round: every instruction sample inside
    /// `range` requests that every *other* thread accumulate `delay_nanos`
    /// of catch-up delay.
    pub fn start_speedup(&self, range: Range<usize>, delay_nanos: u64) {
        self.begin_round(Mode::Speedup, range, delay_nanos);
    }

    fn begin_round(&self, mode: Mode, range: Range<usize>, delay_nanos: u64) {
        *self.round.write().unwrap_or_else(|e| e.into_inner()) = Some(Round { range, delay_nanos });
        self.delays_requested.store(0, Ordering::Release);
        self.delays_executed.store(0, Ordering::Release);
        self.round_number.fetch_add(1, Ordering::AcqRel);
        self.mode.store(mode as u8, Ordering::Release);
    }

    /// Ends the current round and returns to `Normal`. Does not bump
    /// `round_number`: only starting a new round does that (invariant 5).
    pub fn reset(&self) {
        self.mode.store(Mode::Normal as u8, Ordering::Release);
        *self.round.write().unwrap_or_else(|e| e.into_inner()) = None;
    }

    /// Call from the handler on every overflow sample. Applies the active
    /// experiment, if any, for a sample of `kind` at `address` on the
    /// calling thread. Must only ever run in signal context or in a test
    /// harness simulating it: it calls the blocking delay primitive.
    pub fn on_sample(&self, kind: crate::sample::Kind, address: usize, wait: impl Fn(u64) -> u64) {
        if kind != crate::sample::Kind::Instruction {
            return;
        }
        let mode = self.mode();
        if mode == Mode::Normal {
            return;
        }

        let round = self.round.read().unwrap_or_else(|e| e.into_inner());
        let Some(round) = round.as_ref() else { return };
        let in_range = address >= round.range.start && address < round.range.end;
        let delay_nanos = round.delay_nanos;
        drop(round);

        THREAD_STATE.with(|state| {
            self.sync_thread_round(state);

            match mode {
                Mode::Slowdown => {
                    if in_range {
                        wait(delay_nanos);
                    }
                }
                Mode::Speedup => {
                    if in_range {
                        // Bump our own local count first so our own sample
                        // never causes us to delay ourselves this round
                        // (the before-bump policy).
                        let applied = state.delays_applied.get() + 1;
                        state.delays_applied.set(applied);
                        self.delays_requested.fetch_add(1, Ordering::AcqRel);
                    } else {
                        let target = self.delays_requested.load(Ordering::Acquire);
                        let mut applied = state.delays_applied.get();
                        while applied < target {
                            wait(delay_nanos);
                            applied += 1;
                        }
                        state.delays_applied.set(applied);
                        self.raise_delays_executed(applied);
                    }
                }
                Mode::Normal => unreachable!(),
            }
        });
    }

    /// Resets a thread's local delay count to the start of the current
    /// round when it first observes a new round number, or inherits the
    /// live `delays_executed` count when this is the thread's very first
    /// observation (new thread created mid-round, invariant 6).
    fn sync_thread_round(&self, state: &ThreadState) {
        let current = self.round_number();
        if state.round_number.get() != current {
            state.round_number.set(current);
            state.delays_applied.set(self.delays_executed());
        }
    }

    fn raise_delays_executed(&self, candidate: u64) {
        let mut current = self.delays_executed.load(Ordering::Acquire);
        while candidate > current {
            match self.delays_executed.compare_exchange_weak(
                current,
                candidate,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                Err(observed) => current = observed,
            }
        }
    }

    /// Called when a new thread starts sampling: seeds its local state so
    /// it does not immediately "catch up" on delays that accumulated
    /// before it existed.
    pub fn init_thread(&self) {
        THREAD_STATE.with(|state| {
            state.round_number.set(self.round_number());
            state.delays_applied.set(self.delays_executed());
        });
    }
}

impl Default for Engine {
    fn default() -> Engine {
        Engine::new()
    }
}

#[cfg(test)]
mod test;
