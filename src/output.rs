//! Reporting: a human-readable per-round line to stderr, and an optional
//! `blockstats` artifact describing every sampled block, matching the
//! reference implementation's tab-separated `out.czl` format.

use std::io::Write;
use std::path::Path;

use crate::code::CodeMap;
use crate::engine::Mode;

/// Summarizes one finished experiment round for the stderr log line.
pub struct RoundReport {
    pub mode: Mode,
    pub range: std::ops::Range<usize>,
    pub delay_nanos: u64,
    pub delays_executed: u64,
    pub elapsed: std::time::Duration,
    pub progress_rates_hz: Vec<(&'static str, u32, f64)>,
}

pub fn log_round(report: &RoundReport) {
    let verb = match report.mode {
        Mode::Speedup => "speedup",
        Mode::Slowdown => "slowdown",
        Mode::Normal => "normal",
    };
    log::info!(
        "{} {:#x}-{:#x} delay={}ns delays_executed={} elapsed={:?}",
        verb,
        report.range.start,
        report.range.end,
        report.delay_nanos,
        report.delays_executed,
        report.elapsed,
    );
    for (file, line, rate) in &report.progress_rates_hz {
        log::info!("  {}:{} -> {:.3} Hz", file, line, rate);
    }
}

/// Writes the `blockstats` artifact: a header (basename, and the two
/// sampling periods) followed by one tab-separated line per sampled block.
pub fn write_blockstats(
    path: &Path,
    code: &CodeMap,
    cycle_period: u64,
    inst_period: u64,
) -> std::io::Result<()> {
    let mut out = std::fs::File::create(path)?;
    writeln!(out, "basename\t{}", env!("CARGO_PKG_NAME"))?;
    writeln!(out, "cycle period\t{}", cycle_period)?;
    writeln!(out, "instruction period\t{}", inst_period)?;

    for (function, file) in code.functions_with_file() {
        let Some(blocks) = &function.blocks else {
            continue;
        };
        for block in blocks {
            if block.cycle_samples == 0 && block.inst_samples == 0 {
                continue;
            }
            writeln!(
                out,
                "blockstats\t{}\t{}\t{:#x}-{:#x}\t{}\t{}\t{}",
                file.name.display(),
                function.name,
                block.range.start,
                block.range.end,
                block.length,
                block.cycle_samples,
                block.inst_samples,
            )?;
        }
    }
    Ok(())
}
