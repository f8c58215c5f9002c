//! Key delivery queue
//!
//! Bounded single-producer/single-consumer ring of pre-derived one-time
//! keys. The producer publishes a slot by storing `head` with release
//! ordering after the slot is filled; the consumer loads `head` with
//! acquire ordering before reading the slot, and hands the slot back by
//! storing `tail` with release ordering.
//!
//! Each slot sits behind its own mutex, which is never contended under the
//! single-producer/single-consumer discipline. Blocking uses a condition
//! variable with a short timeout, so a lost notification only costs one
//! poll interval.
//!
//! # Invariants
//!
//! - `tail <= head <= tail + capacity` (wrapping)
//! - A key is handed out at most once; keys still queued at close are
//!   zeroized when the queue is cleared or dropped

use std::{
    sync::{
        Condvar, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::Duration,
};

use sealfs_crypto::OneTimeKey;

use crate::error::SealError;

/// Upper bound on one blocking wait before re-checking the ring.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Bounded SPSC ring of one-time keys.
pub struct KeyQueue {
    slots: Box<[Mutex<Option<OneTimeKey>>]>,
    mask: usize,
    /// Next slot the producer fills
    head: AtomicUsize,
    /// Next slot the consumer drains
    tail: AtomicUsize,
    closed: AtomicBool,
    /// Terminal producer error, reported once the ring is empty
    failure: Mutex<Option<SealError>>,
    signal: Mutex<()>,
    not_empty: Condvar,
    not_full: Condvar,
}

impl KeyQueue {
    /// Ring with room for `capacity` keys.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is not a power of two.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity.is_power_of_two(), "queue capacity must be a power of two");
        Self {
            slots: (0..capacity).map(|_| Mutex::new(None)).collect(),
            mask: capacity - 1,
            head: AtomicUsize::new(0),
            tail: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
            failure: Mutex::new(None),
            signal: Mutex::new(()),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
        }
    }

    /// Maximum number of queued keys.
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of keys ready for the consumer.
    pub fn len(&self) -> usize {
        self.head.load(Ordering::Acquire).wrapping_sub(self.tail.load(Ordering::Acquire))
    }

    /// Whether no key is ready.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether the queue has been shut down.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Publish a key, blocking while the ring is full.
    ///
    /// Producer side only. Returns the key back if the queue was closed;
    /// dropping it zeroizes it.
    pub fn push(&self, key: OneTimeKey) -> Result<(), OneTimeKey> {
        loop {
            if self.is_closed() {
                return Err(key);
            }

            let head = self.head.load(Ordering::Relaxed);
            let tail = self.tail.load(Ordering::Acquire);
            if head.wrapping_sub(tail) < self.capacity() {
                *lock(&self.slots[head & self.mask]) = Some(key);
                self.head.store(head.wrapping_add(1), Ordering::Release);
                self.notify(&self.not_empty);
                return Ok(());
            }

            self.wait(&self.not_full, || {
                head.wrapping_sub(self.tail.load(Ordering::Acquire)) < self.capacity()
            });
        }
    }

    /// Take the next key, blocking while the ring is empty.
    ///
    /// Consumer side only; concurrent callers must serialize around it.
    /// Keys already published are still delivered after a producer
    /// failure. Returns `ShutDown` once the queue is closed.
    pub fn pop(&self) -> Result<OneTimeKey, SealError> {
        loop {
            if self.is_closed() {
                return Err(SealError::ShutDown);
            }

            let tail = self.tail.load(Ordering::Relaxed);
            let head = self.head.load(Ordering::Acquire);
            if head != tail {
                let key = lock(&self.slots[tail & self.mask]).take();
                self.tail.store(tail.wrapping_add(1), Ordering::Release);
                self.notify(&self.not_full);
                let Some(key) = key else {
                    unreachable!("published slot {tail} was empty");
                };
                return Ok(key);
            }

            if let Some(err) = lock(&self.failure).clone() {
                return Err(err);
            }

            self.wait(&self.not_empty, || {
                self.head.load(Ordering::Acquire) != tail || lock(&self.failure).is_some()
            });
        }
    }

    /// Record a terminal producer error. Consumers see it once every key
    /// published before it has been taken.
    pub fn fail(&self, err: SealError) {
        *lock(&self.failure) = Some(err);
        self.notify(&self.not_empty);
    }

    /// Stop both sides. Blocked callers wake up and return.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.notify(&self.not_empty);
        self.notify(&self.not_full);
    }

    /// Zeroize every key still sitting in the ring.
    pub fn clear(&self) {
        for slot in &self.slots {
            lock(slot).take();
        }
    }

    fn notify(&self, cv: &Condvar) {
        let _guard = lock(&self.signal);
        cv.notify_all();
    }

    fn wait(&self, cv: &Condvar, ready: impl Fn() -> bool) {
        let guard = lock(&self.signal);
        if ready() || self.is_closed() {
            return;
        }
        let _ = cv.wait_timeout(guard, POLL_INTERVAL).unwrap_or_else(PoisonError::into_inner);
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, thread};

    use proptest::prelude::*;
    use sealfs_crypto::ChunkRatchet;

    use super::*;

    fn keys(n: u64) -> Vec<OneTimeKey> {
        let mut ratchet = ChunkRatchet::new(&[4u8; 32], 16, n).expect("valid nratchet");
        std::iter::from_fn(|| ratchet.next_key()).collect()
    }

    #[test]
    fn delivers_in_order() {
        let queue = KeyQueue::new(4);
        for key in keys(3) {
            queue.push(key).expect("open queue");
        }
        assert_eq!(queue.len(), 3);
        for expected in 0..3 {
            assert_eq!(queue.pop().expect("key").ratchet_offset(), expected);
        }
        assert!(queue.is_empty());
    }

    #[test]
    fn producer_blocks_until_consumer_frees_a_slot() {
        let queue = Arc::new(KeyQueue::new(2));
        let producer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || {
                for key in keys(16) {
                    if queue.push(key).is_err() {
                        break;
                    }
                }
            })
        };

        for expected in 0..16 {
            assert!(queue.len() <= queue.capacity());
            assert_eq!(queue.pop().expect("key").ratchet_offset(), expected);
        }
        producer.join().expect("producer thread");
    }

    #[test]
    fn failure_is_reported_after_queued_keys() {
        let queue = KeyQueue::new(4);
        for key in keys(2) {
            queue.push(key).expect("open queue");
        }
        queue.fail(SealError::KeystreamExhausted { offset: 48, len: 48 });

        assert!(queue.pop().is_ok());
        assert!(queue.pop().is_ok());
        assert_eq!(
            queue.pop().map(|k| k.ratchet_offset()),
            Err(SealError::KeystreamExhausted { offset: 48, len: 48 })
        );
    }

    #[test]
    fn close_wakes_blocked_consumer() {
        let queue = Arc::new(KeyQueue::new(4));
        let consumer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.pop().map(|k| k.ratchet_offset()))
        };
        thread::sleep(Duration::from_millis(20));
        queue.close();
        assert_eq!(consumer.join().expect("consumer thread"), Err(SealError::ShutDown));
    }

    #[test]
    fn push_after_close_hands_key_back() {
        let queue = KeyQueue::new(1);
        queue.close();
        let key = keys(1).pop().expect("one key");
        assert!(queue.push(key).is_err());
    }

    proptest! {
        #[test]
        fn interleaved_pushes_and_pops_keep_fifo_order(
            shift in 0u32..4,
            ops in prop::collection::vec(any::<bool>(), 1..64),
        ) {
            let queue = KeyQueue::new(1 << shift);
            let mut source = keys(64).into_iter();
            let mut expected = 0;

            for push in ops {
                if push && queue.len() < queue.capacity() {
                    if let Some(key) = source.next() {
                        prop_assert!(queue.push(key).is_ok());
                    }
                } else if !queue.is_empty() {
                    let key = queue.pop().map_err(|e| TestCaseError::fail(e.to_string()))?;
                    prop_assert_eq!(key.ratchet_offset(), expected);
                    expected += 1;
                }
                prop_assert!(queue.len() <= queue.capacity());
            }
        }
    }
}
