//! Round-trips `CAUSAL_MODE`/`CAUSAL_LOG`/`CAUSAL_OUTPUT` through the
//! process environment the way the preloaded library itself reads them at
//! startup.
//!
//! Tests run on separate threads within one process but share the
//! environment, so every test here takes `ENV_LOCK` for its duration.

use std::sync::Mutex;

use causal::config::{Config, ExperimentKind, Mode};

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn with_env<F: FnOnce()>(vars: &[(&str, Option<&str>)], f: F) {
    let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    for (key, _) in vars {
        std::env::remove_var(key);
    }
    for (key, value) in vars {
        if let Some(value) = value {
            std::env::set_var(key, value);
        }
    }
    f();
    for (key, _) in vars {
        std::env::remove_var(key);
    }
}

#[test]
fn absent_causal_mode_defaults_to_adaptive() {
    with_env(&[("CAUSAL_MODE", None)], || {
        let config = Config::from_env().unwrap();
        assert_eq!(config.mode, Mode::Adaptive);
    });
}

#[test]
fn fixed_slowdown_mode_parses_from_the_environment() {
    with_env(&[("CAUSAL_MODE", Some("- 0x1000-0x2000 500000"))], || {
        let config = Config::from_env().unwrap();
        match config.mode {
            Mode::Fixed(spec) => {
                assert_eq!(spec.kind, ExperimentKind::Slowdown);
                assert_eq!(spec.range, 0x1000..0x2000);
                assert_eq!(spec.delay_nanos, 500_000);
            }
            other => panic!("expected a fixed experiment, got {other:?}"),
        }
    });
}

#[test]
fn dump_sentinel_is_case_insensitive() {
    with_env(&[("CAUSAL_MODE", Some("Dump"))], || {
        let config = Config::from_env().unwrap();
        assert_eq!(config.mode, Mode::Dump);
    });
}

#[test]
fn malformed_causal_mode_is_a_fatal_configuration_error() {
    with_env(&[("CAUSAL_MODE", Some("sideways"))], || {
        assert!(Config::from_env().is_err());
    });
}

#[test]
fn causal_log_selects_the_log_level_filter() {
    with_env(&[("CAUSAL_LOG", Some("debug"))], || {
        let config = Config::from_env().unwrap();
        assert_eq!(config.log_level, log::LevelFilter::Debug);
    });
}

#[test]
fn absent_causal_log_defaults_to_warn() {
    with_env(&[("CAUSAL_LOG", None)], || {
        let config = Config::from_env().unwrap();
        assert_eq!(config.log_level, log::LevelFilter::Warn);
    });
}

#[test]
fn causal_output_is_carried_through_as_a_path() {
    with_env(&[("CAUSAL_OUTPUT", Some("/tmp/causal-out.czl"))], || {
        let config = Config::from_env().unwrap();
        assert_eq!(
            config.output_path,
            Some(std::path::PathBuf::from("/tmp/causal-out.czl"))
        );
    });
}

#[test]
fn absent_causal_output_is_none() {
    with_env(&[("CAUSAL_OUTPUT", None)], || {
        let config = Config::from_env().unwrap();
        assert_eq!(config.output_path, None);
    });
}
