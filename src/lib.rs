//! `causal`: the perturbation-engine core of a causal profiler.
//!
//! Linked as a `cdylib` and preloaded (`LD_PRELOAD`) into a running native
//! program, this crate attaches via a process-lifetime constructor, arms
//! hardware-counter sampling on every thread, and runs a dedicated
//! profiler thread that attributes overflow samples to basic blocks and
//! periodically perturbs one address range with a virtual speedup or
//! slowdown experiment (see [`engine`]). Application code declares
//! progress counters with [`causal_progress!`], [`causal_begin!`] and
//! [`causal_end!`]; [`config`] reads `CAUSAL_MODE`/`CAUSAL_LOG`/
//! `CAUSAL_OUTPUT` from the environment to select a fixed experiment (or
//! the adaptive policy) and where to report.
//!
//! # Module map
//!
//! - [`code`] — the file/function/basic-block address map and the lazy
//!   disassembly-driven block discoverer.
//! - [`sample`] — the per-thread sample buffer and the global queue that
//!   carries sealed buffers from producer threads to the profiler thread.
//! - [`engine`] — the mode machine and delay bookkeeping that implement
//!   virtual speedup and slowdown.
//! - [`profiler`] — the dedicated thread that drains samples, attributes
//!   them, and orchestrates perturbation rounds.
//! - [`counters`] — the progress-counter registry.
//! - [`config`] — environment-driven runtime configuration.
//! - [`output`] — stderr reporting and the `blockstats` artifact.
//! - [`error`] — the crate-wide error type.

pub mod code;
pub mod config;
pub mod counters;
pub mod engine;
pub mod error;
pub mod macros;
pub mod output;
pub mod profiler;
pub mod sample;

mod lifecycle;
mod sampling;
mod wait;

pub use error::{Error, Result};
