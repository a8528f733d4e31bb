use super::*;

#[test]
fn parses_dump_sentinel() {
    assert_eq!(parse_mode("dump").unwrap(), Mode::Dump);
    assert_eq!(parse_mode("DUMP").unwrap(), Mode::Dump);
}

#[test]
fn parses_slowdown() {
    let mode = parse_mode("- 0x400500-0x400540 1000000").unwrap();
    assert_eq!(
        mode,
        Mode::Fixed(ExperimentSpec {
            kind: ExperimentKind::Slowdown,
            range: 0x400500..0x400540,
            delay_nanos: 1_000_000,
        })
    );
}

#[test]
fn parses_speedup() {
    let mode = parse_mode("+ 0x400500-0x400540 1000000").unwrap();
    assert_eq!(
        mode,
        Mode::Fixed(ExperimentSpec {
            kind: ExperimentKind::Speedup,
            range: 0x400500..0x400540,
            delay_nanos: 1_000_000,
        })
    );
}

#[test]
fn rejects_empty_range() {
    assert!(parse_mode("+ 0x400540-0x400500 1000000").is_err());
    assert!(parse_mode("+ 0x400500-0x400500 1000000").is_err());
}

#[test]
fn rejects_garbage() {
    assert!(parse_mode("nonsense").is_err());
    assert!(parse_mode("* 0x1-0x2 5").is_err());
    assert!(parse_mode("+ 1-2 5").is_err());
    assert!(parse_mode("+ 0x1-0x2 notanumber").is_err());
    assert!(parse_mode("+ 0x1-0x2 5 trailing").is_err());
}

#[test]
fn log_level_roundtrip() {
    assert_eq!(parse_log_level("info").unwrap(), log::LevelFilter::Info);
    assert_eq!(parse_log_level("TRACE").unwrap(), log::LevelFilter::Trace);
    assert!(parse_log_level("verbose").is_err());
}
