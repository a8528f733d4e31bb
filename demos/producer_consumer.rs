//! A straight port of the reference profiler's own multi-thread exercise:
//! 5 producers and 3 consumers sharing a small bounded queue, with one
//! progress counter bumped per item consumed. Exercises scenario S5: the
//! profiler must attribute samples across all 8 worker threads without
//! deadlocking against the application's own queue mutex.

use std::sync::{Arc, Condvar, Mutex};
use std::thread;

const ITEMS: usize = 200_000;
const QUEUE_CAPACITY: usize = 10;
const PRODUCERS: usize = 5;
const CONSUMERS: usize = 3;

struct Queue {
    items: Mutex<Vec<u32>>,
    not_full: Condvar,
    not_empty: Condvar,
}

impl Queue {
    fn new() -> Queue {
        Queue {
            items: Mutex::new(Vec::with_capacity(QUEUE_CAPACITY)),
            not_full: Condvar::new(),
            not_empty: Condvar::new(),
        }
    }

    fn push(&self, value: u32) {
        let mut items = self.items.lock().unwrap();
        while items.len() == QUEUE_CAPACITY {
            items = self.not_full.wait(items).unwrap();
        }
        items.push(value);
        self.not_empty.notify_one();
    }

    fn pop(&self) -> u32 {
        let mut items = self.items.lock().unwrap();
        while items.is_empty() {
            items = self.not_empty.wait(items).unwrap();
        }
        let value = items.pop().unwrap();
        self.not_full.notify_one();
        value
    }
}

fn main() {
    let queue = Arc::new(Queue::new());
    let consumed = Arc::new(std::sync::atomic::AtomicUsize::new(0));

    let producers: Vec<_> = (0..PRODUCERS)
        .map(|_| {
            let queue = Arc::clone(&queue);
            thread::spawn(move || {
                for _ in 0..(ITEMS / PRODUCERS) {
                    queue.push(123);
                }
            })
        })
        .collect();

    let consumers: Vec<_> = (0..CONSUMERS)
        .map(|_| {
            let queue = Arc::clone(&queue);
            let consumed = Arc::clone(&consumed);
            thread::spawn(move || loop {
                let value = queue.pop();
                assert_eq!(value, 123);
                causal::causal_progress!();
                if consumed.fetch_add(1, std::sync::atomic::Ordering::SeqCst) + 1 >= ITEMS {
                    break;
                }
            })
        })
        .collect();

    for handle in producers {
        handle.join().unwrap();
    }
    for handle in consumers {
        handle.join().unwrap();
    }

    eprintln!("consumed {} items", consumed.load(std::sync::atomic::Ordering::SeqCst));
}
