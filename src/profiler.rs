//! The profiler thread (component C6): drains the sample pipeline,
//! attributes samples through the code map, and orchestrates perturbation
//! rounds.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::seq::IteratorRandom;

use crate::code::{CodeMap, Resolution};
use crate::config::{Config, ExperimentKind, Mode as ConfigMode};
use crate::counters::Registry;
use crate::engine::{Engine, Mode as EngineMode};
use crate::sample::{Kind, Pipeline, SampleBlock};

/// How long an adaptively chosen experiment runs before the profiler
/// resets to `Normal` and picks a new target. Also the reporting interval
/// for a `CAUSAL_MODE`-fixed experiment, which never resets itself: a
/// fixed round logs a periodic status line on this same cadence instead of
/// a single one at the end (§6 requires "per round" reporting either way).
/// Deliberately simple; see the adaptive-policy note for why this isn't
/// more sophisticated.
const ADAPTIVE_ROUND_WINDOW: Duration = Duration::from_millis(200);

const DEFAULT_ADAPTIVE_DELAY_NANOS: u64 = 5_000;

/// Reads the live bytes of a function directly out of this process's own
/// mapped memory. Sound because block discovery only ever runs for
/// functions this profiler itself discovered from `/proc/self/maps`: the
/// range is guaranteed to be a mapped, readable, executable region for the
/// lifetime of the process.
fn read_function_code(range: &std::ops::Range<usize>) -> Vec<u8> {
    let len = range.end - range.start;
    unsafe { std::slice::from_raw_parts(range.start as *const u8, len).to_vec() }
}

pub struct Profiler {
    pipeline: Arc<Pipeline>,
    engine: &'static Engine,
    registry: &'static Registry,
    config: Config,
    code: CodeMap,
    /// The block range of whichever experiment (fixed or adaptively
    /// chosen) is currently running, so a round report can name "the
    /// chosen range" (§6) instead of a placeholder.
    current_range: Option<std::ops::Range<usize>>,
    current_delay_nanos: u64,
}

impl Profiler {
    pub fn new(
        pipeline: Arc<Pipeline>,
        engine: &'static Engine,
        registry: &'static Registry,
        config: Config,
        code: CodeMap,
    ) -> Profiler {
        Profiler {
            pipeline,
            engine,
            registry,
            config,
            code,
            current_range: None,
            current_delay_nanos: 0,
        }
    }

    /// Entry point for the dedicated profiler thread.
    pub fn run(mut self) {
        if self.config.mode == ConfigMode::Dump {
            self.dump_and_exit();
            return;
        }

        let fixed = matches!(self.config.mode, ConfigMode::Fixed(_));
        if let ConfigMode::Fixed(spec) = self.config.mode.clone() {
            match spec.kind {
                ExperimentKind::Slowdown => {
                    self.engine.start_slowdown(spec.range.clone(), spec.delay_nanos)
                }
                ExperimentKind::Speedup => {
                    self.engine.start_speedup(spec.range.clone(), spec.delay_nanos)
                }
            }
            self.current_range = Some(spec.range);
            self.current_delay_nanos = spec.delay_nanos;
        }

        let adaptive = matches!(self.config.mode, ConfigMode::Adaptive);
        let mut round_started_at = Instant::now();
        let mut seen_since_round: HashSet<(usize, usize)> = HashSet::new();

        loop {
            let Some(block) = self.pipeline.next() else {
                break;
            };
            self.attribute(&block, &mut seen_since_round);

            if adaptive
                && self.engine.mode() == EngineMode::Normal
                && round_started_at.elapsed() >= ADAPTIVE_ROUND_WINDOW
                && !seen_since_round.is_empty()
            {
                self.start_adaptive_round(&seen_since_round);
                seen_since_round.clear();
                round_started_at = Instant::now();
            } else if adaptive
                && self.engine.mode() != EngineMode::Normal
                && round_started_at.elapsed() >= ADAPTIVE_ROUND_WINDOW
            {
                self.finish_round(round_started_at.elapsed());
                round_started_at = Instant::now();
            } else if fixed && round_started_at.elapsed() >= ADAPTIVE_ROUND_WINDOW {
                // A fixed experiment never resets itself (`Mode::Fixed` runs
                // for the rest of the process's life), so report on the same
                // cadence an adaptive round would but without tearing it
                // down.
                self.report_round(round_started_at.elapsed());
                round_started_at = Instant::now();
            }
        }

        // Report whatever round was still in flight when the pipeline
        // drained at shutdown, so a short-lived process still gets at
        // least one line of output.
        if fixed {
            self.report_round(round_started_at.elapsed());
        } else if adaptive && self.engine.mode() != EngineMode::Normal {
            self.finish_round(round_started_at.elapsed());
        }

        self.write_blockstats_if_configured();
    }

    /// Writes the `blockstats` artifact once, when the pipeline has fully
    /// drained at shutdown and `CAUSAL_OUTPUT` named a path. Degraded, not
    /// fatal: a failure here only costs the optional artifact, never the
    /// target program's own exit.
    fn write_blockstats_if_configured(&self) {
        let Some(path) = &self.config.output_path else {
            return;
        };
        if let Err(e) = crate::output::write_blockstats(
            path,
            &self.code,
            crate::sampling::cycle_period(),
            crate::sampling::instruction_period(),
        ) {
            log::warn!("could not write blockstats to {}: {}", path.display(), e);
        }
    }

    fn attribute(&mut self, block: &SampleBlock, seen: &mut HashSet<(usize, usize)>) {
        for sample in block.samples() {
            let resolution = self.code.resolve(sample.address);
            let function_index = match resolution {
                Resolution::UnprocessedFunction { function_index } => Some(function_index),
                _ => None,
            };
            if let Some(function_index) = function_index {
                let range = self.code.function(function_index).range.clone();
                let code = read_function_code(&range);
                self.code.set_function_code(function_index, code);
                self.code.ensure_processed(function_index);
            }

            match self.code.resolve(sample.address) {
                Resolution::Block {
                    function_index,
                    block_index,
                    block,
                } => {
                    block.record_sample(sample.kind);
                    if sample.kind == Kind::Instruction {
                        seen.insert((function_index, block_index));
                    }
                }
                Resolution::UnprocessedFunction { .. } | Resolution::File | Resolution::Orphan => {}
            }
        }
    }

    fn start_adaptive_round(&mut self, seen: &HashSet<(usize, usize)>) {
        let Some(&(function_index, block_index)) = seen.iter().choose(&mut rand::thread_rng()) else {
            return;
        };
        let range = match &self.code.function(function_index).blocks {
            Some(blocks) => blocks[block_index].range.clone(),
            None => return,
        };
        self.current_range = Some(range.clone());
        self.current_delay_nanos = DEFAULT_ADAPTIVE_DELAY_NANOS;
        self.engine.start_speedup(range, DEFAULT_ADAPTIVE_DELAY_NANOS);
    }

    /// Logs one round report without disturbing the engine's current mode.
    /// Used both by `finish_round` (which then resets) and directly for a
    /// fixed experiment's periodic progress line, which must not reset.
    fn report_round(&self, elapsed: Duration) {
        let secs = elapsed.as_secs_f64();
        let report = crate::output::RoundReport {
            mode: self.engine.mode(),
            range: self.current_range.clone().unwrap_or(0..0),
            delay_nanos: self.current_delay_nanos,
            delays_executed: self.engine.delays_executed(),
            elapsed,
            progress_rates_hz: self
                .registry
                .snapshot_progress()
                .into_iter()
                .map(|(file, line, count)| {
                    (file, line, if secs > 0.0 { count as f64 / secs } else { 0.0 })
                })
                .collect(),
        };
        crate::output::log_round(&report);
    }

    fn finish_round(&mut self, elapsed: Duration) {
        self.report_round(elapsed);
        self.engine.reset();
        self.current_range = None;
    }

    fn dump_and_exit(&mut self) {
        let function_indices: Vec<usize> = (0..self.code.functions().count()).collect();
        for function_index in function_indices {
            let range = self.code.function(function_index).range.clone();
            let code = read_function_code(&range);
            self.code.set_function_code(function_index, code);
            self.code.ensure_processed(function_index);
        }

        for (function, file) in self.code.functions_with_file() {
            eprintln!("{} ({})", function.name, file.name.display());
            if let Some(blocks) = &function.blocks {
                for block in blocks {
                    eprintln!(
                        "  {:#x}-{:#x}{} ({} instructions)",
                        block.range.start,
                        block.range.end,
                        if block.entry { " [entry]" } else { "" },
                        block.length,
                    );
                }
            }
        }

        // `dump` mode exists purely to verify block discovery; it never
        // hands control back to the instrumented program.
        std::process::exit(0);
    }
}
