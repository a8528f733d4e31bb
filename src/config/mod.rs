//! Runtime configuration, read once at initialization from the environment.

#[cfg(test)]
mod test;

use std::env;
use std::ops::Range;

use crate::error::{Error, Result};

/// Which kind of experiment a fixed `CAUSAL_MODE` selects.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExperimentKind {
    Slowdown,
    Speedup,
}

/// A deterministic experiment pinned by `CAUSAL_MODE`, as opposed to the
/// profiler picking its own target adaptively.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExperimentSpec {
    pub kind: ExperimentKind,
    pub range: Range<usize>,
    pub delay_nanos: u64,
}

/// The parsed value of `CAUSAL_MODE`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Mode {
    /// No fixed experiment: the profiler thread picks targets adaptively.
    Adaptive,
    /// Run exactly this experiment, forever, and never pick another.
    Fixed(ExperimentSpec),
    /// Print the discovered code map (files, functions, basic blocks) to
    /// stderr and exit. Used to test block discovery without perturbing
    /// anything.
    Dump,
}

/// Runtime configuration assembled once at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub mode: Mode,
    pub log_level: log::LevelFilter,
    pub output_path: Option<std::path::PathBuf>,
}

impl Config {
    /// Read `CAUSAL_MODE`, `CAUSAL_LOG` and `CAUSAL_OUTPUT` from the process
    /// environment. Absence of a variable falls back to a documented
    /// default; presence of a malformed value is a fatal configuration
    /// error.
    pub fn from_env() -> Result<Config> {
        let mode = match env::var("CAUSAL_MODE") {
            Err(_) => Mode::Adaptive,
            Ok(s) => parse_mode(&s)?,
        };
        let log_level = match env::var("CAUSAL_LOG") {
            Err(_) => log::LevelFilter::Warn,
            Ok(s) => parse_log_level(&s)?,
        };
        let output_path = env::var_os("CAUSAL_OUTPUT").map(std::path::PathBuf::from);
        Ok(Config {
            mode,
            log_level,
            output_path,
        })
    }
}

fn parse_log_level(s: &str) -> Result<log::LevelFilter> {
    match s.to_ascii_lowercase().as_str() {
        "off" => Ok(log::LevelFilter::Off),
        "error" => Ok(log::LevelFilter::Error),
        "warn" => Ok(log::LevelFilter::Warn),
        "info" => Ok(log::LevelFilter::Info),
        "debug" => Ok(log::LevelFilter::Debug),
        "trace" => Ok(log::LevelFilter::Trace),
        _ => Err(Error::InvalidLogLevel(s.to_string())),
    }
}

/// Parses `"{+|-} 0xBASE-0xLIMIT DELAY_NS"` or the sentinel `"dump"`.
fn parse_mode(s: &str) -> Result<Mode> {
    let s = s.trim();
    if s.eq_ignore_ascii_case("dump") {
        return Ok(Mode::Dump);
    }

    let invalid = || Error::InvalidCausalMode(s.to_string());

    let mut parts = s.split_whitespace();
    let sign = parts.next().ok_or_else(invalid)?;
    let kind = match sign {
        "+" => ExperimentKind::Speedup,
        "-" => ExperimentKind::Slowdown,
        _ => return Err(invalid()),
    };

    let range_str = parts.next().ok_or_else(invalid)?;
    let (base_str, limit_str) = range_str.split_once('-').ok_or_else(invalid)?;
    let base = parse_hex(base_str).ok_or_else(invalid)?;
    let limit = parse_hex(limit_str).ok_or_else(invalid)?;
    if limit <= base {
        return Err(invalid());
    }

    let delay_str = parts.next().ok_or_else(invalid)?;
    let delay_nanos: u64 = delay_str.parse().map_err(|_| invalid())?;

    if parts.next().is_some() {
        return Err(invalid());
    }

    Ok(Mode::Fixed(ExperimentSpec {
        kind,
        range: base..limit,
        delay_nanos,
    }))
}

fn parse_hex(s: &str) -> Option<usize> {
    let s = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X"))?;
    usize::from_str_radix(s, 16).ok()
}
