use std::path::PathBuf;

/// Errors the runtime can encounter.
///
/// Only the fatal-configuration variants are meant to ever reach a caller:
/// everything else (a single unreadable mapped image, a dynamic branch during
/// block discovery, a missed condvar wakeup) is logged and absorbed where it
/// happens rather than propagated. See the variants' own docs for which taxon
/// each belongs to.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// `CAUSAL_MODE` could not be parsed. Fatal: initialization aborts.
    #[error("invalid CAUSAL_MODE value: {0:?}")]
    InvalidCausalMode(String),

    /// `CAUSAL_LOG` named an unrecognized level. Fatal.
    #[error("invalid CAUSAL_LOG value: {0:?}")]
    InvalidLogLevel(String),

    /// The hardware counter substrate could not be opened for this thread. Fatal.
    #[error("hardware performance counters unavailable: {0}")]
    HardwareCountersUnavailable(#[source] std::io::Error),

    /// A mapped image's symbol table could not be parsed. Degraded: the image
    /// is skipped and its samples fall into the orphan sink. Kept as an
    /// `Error` variant anyway so call sites can choose to log it uniformly.
    #[error("cannot read symbol table of {path:?}: {source}")]
    SymbolTableUnreadable {
        path: PathBuf,
        #[source]
        source: object::Error,
    },

    /// `/proc/self/maps` could not be read at all. Fatal: without it there is
    /// no code map and sampling would attribute nothing.
    #[error("cannot read process memory map: {0}")]
    ProcessMapUnreadable(#[source] std::io::Error),

    /// Two address ranges inserted into the same interval map overlap.
    #[error("overlapping ranges inserted into interval map: {a:#x?} and {b:#x?}")]
    OverlappingRanges {
        a: std::ops::Range<usize>,
        b: std::ops::Range<usize>,
    },

    /// `pthread_create`/`exit`/... could not be interposed because the real
    /// symbol was not found via `dlsym`. Fatal: without the real symbol there
    /// is no way to delegate to it.
    #[error("could not resolve real symbol {0:?} via dlsym")]
    SymbolNotFound(&'static str),
}

pub type Result<T> = std::result::Result<T, Error>;
