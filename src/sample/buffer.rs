//! The per-thread, signal-safe sample buffer (component C3).

use std::time::Instant;

use arrayvec::ArrayVec;

use super::{Kind, Sample, BUFFER_CAPACITY};
use crate::engine::Mode;

/// A fixed-capacity buffer of samples recorded by one thread while the
/// engine was in one mode.
///
/// [`SampleBlock::push`] never allocates and never blocks: it is the only
/// operation on this type that may run inside a signal handler. Everything
/// else (sealing, timestamping) happens on the handler's non-reentrant tail
/// or on the profiler thread.
pub struct SampleBlock {
    samples: ArrayVec<Sample, BUFFER_CAPACITY>,
    pub mode: Mode,
    pub opened_at: Instant,
    pub closed_at: Option<Instant>,
}

impl SampleBlock {
    pub fn new(mode: Mode) -> SampleBlock {
        SampleBlock {
            samples: ArrayVec::new(),
            mode,
            opened_at: Instant::now(),
            closed_at: None,
        }
    }

    /// Signal-safe. Returns `false` without writing anything if the buffer
    /// is already full; the caller must then seal and publish before
    /// retrying.
    #[must_use]
    pub fn push(&mut self, kind: Kind, address: usize) -> bool {
        if self.samples.is_full() {
            return false;
        }
        self.samples.push(Sample { kind, address });
        true
    }

    pub fn is_full(&self) -> bool {
        self.samples.is_full()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn seal(&mut self) {
        self.closed_at = Some(Instant::now());
    }

    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn push_until_full_then_refuses() {
        let mut block = SampleBlock::new(Mode::Normal);
        for _ in 0..BUFFER_CAPACITY {
            assert!(block.push(Kind::Cycle, 0x1000));
        }
        assert!(block.is_full());
        assert!(!block.push(Kind::Cycle, 0x1000));
    }

    #[test]
    fn seal_stamps_close_time_after_open_time() {
        let mut block = SampleBlock::new(Mode::Normal);
        block.seal();
        assert!(block.closed_at.unwrap() >= block.opened_at);
    }
}
