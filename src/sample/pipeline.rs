//! The global sample queue (component C4): a mutex+condvar protected FIFO of
//! sealed sample buffers, fed by arbitrary producer threads and drained by
//! the one profiler thread.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Condvar, Mutex};

use super::SampleBlock;

/// Shared between every application thread (as a producer) and the
/// profiler thread (as the sole consumer).
///
/// Producing is safe to call with the sampling signal blocked: the
/// critical section is just "push one node onto the deque and notify",
/// matching the discipline required of anything reachable from the
/// overflow handler.
pub struct Pipeline {
    queue: Mutex<VecDeque<SampleBlock>>,
    ready: Condvar,
    active: AtomicBool,
}

impl Pipeline {
    pub fn new() -> Pipeline {
        Pipeline {
            queue: Mutex::new(VecDeque::new()),
            ready: Condvar::new(),
            active: AtomicBool::new(true),
        }
    }

    /// Publishes a sealed block. Called by its owning thread only: each
    /// thread publishes solely its own buffers, so there is never a
    /// publish-vs-publish race to resolve for a single block (documented
    /// invariant, not enforced by the type system).
    pub fn publish(&self, block: SampleBlock) {
        let mut queue = self.queue.lock().unwrap_or_else(|e| e.into_inner());
        queue.push_back(block);
        drop(queue);
        self.ready.notify_one();
    }

    /// Blocks until a buffer is available or the pipeline is shut down, in
    /// which case it returns `None` only once the queue has fully drained.
    pub fn next(&self) -> Option<SampleBlock> {
        let mut queue = self.queue.lock().unwrap_or_else(|e| e.into_inner());
        loop {
            if let Some(block) = queue.pop_front() {
                return Some(block);
            }
            if !self.active.load(Ordering::Acquire) {
                return None;
            }
            queue = self
                .ready
                .wait(queue)
                .unwrap_or_else(|e| e.into_inner());
        }
    }

    /// Wakes the consumer so it observes shutdown even with an empty queue.
    pub fn shut_down(&self) {
        self.active.store(false, Ordering::Release);
        self.ready.notify_all();
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }
}

impl Default for Pipeline {
    fn default() -> Pipeline {
        Pipeline::new()
    }
}

#[cfg(test)]
mod test {
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    use super::*;
    use crate::engine::Mode;

    #[test]
    fn publish_then_next_returns_in_fifo_order() {
        let pipeline = Pipeline::new();
        let mut a = SampleBlock::new(Mode::Normal);
        a.push(crate::sample::Kind::Cycle, 1);
        let mut b = SampleBlock::new(Mode::Normal);
        b.push(crate::sample::Kind::Cycle, 2);

        pipeline.publish(a);
        pipeline.publish(b);

        let first = pipeline.next().unwrap();
        assert_eq!(first.samples()[0].address, 1);
        let second = pipeline.next().unwrap();
        assert_eq!(second.samples()[0].address, 2);
    }

    #[test]
    fn shut_down_unblocks_waiting_consumer_with_none() {
        let pipeline = Arc::new(Pipeline::new());
        let consumer = {
            let pipeline = Arc::clone(&pipeline);
            thread::spawn(move || pipeline.next())
        };
        thread::sleep(Duration::from_millis(20));
        pipeline.shut_down();
        assert!(consumer.join().unwrap().is_none());
    }

    #[test]
    fn shutdown_still_drains_queued_blocks_first() {
        let pipeline = Pipeline::new();
        pipeline.publish(SampleBlock::new(Mode::Normal));
        pipeline.shut_down();
        assert!(pipeline.next().is_some());
        assert!(pipeline.next().is_none());
    }
}
