//! Bounded, blocking FIFO used to hand packets from the sensor role to the transmitter role.
use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Condvar, Mutex, MutexGuard, PoisonError,
};

use tracing::debug;

use crate::TelemetryPacket;

/// Fixed size ring of slots. One slot is always left empty so that full and empty can be told
/// apart by comparing indexes alone.
struct Ring<T> {
    slots: Box<[Option<T>]>,
    front: usize,
    back: usize,
}

impl<T> Ring<T> {
    fn with_capacity(capacity: usize) -> Self {
        Ring {
            slots: (0..=capacity).map(|_| None).collect(),
            front: 0,
            back: 0,
        }
    }

    fn is_empty(&self) -> bool {
        self.front == self.back
    }

    fn is_full(&self) -> bool {
        (self.back + 1) % self.slots.len() == self.front
    }

    fn len(&self) -> usize {
        (self.back + self.slots.len() - self.front) % self.slots.len()
    }

    fn put(&mut self, item: T) {
        debug_assert!(!self.is_full());
        self.slots[self.back] = Some(item);
        self.back = (self.back + 1) % self.slots.len();
    }

    fn take(&mut self) -> Option<T> {
        if self.is_empty() {
            return None;
        }
        let item = self.slots[self.front].take();
        self.front = (self.front + 1) % self.slots.len();
        item
    }
}

/// A fixed capacity, blocking, multi-producer multi-consumer FIFO queue with cooperative
/// shutdown.
///
/// [push](BoundedQueue::push) blocks while the queue is full and [pop](BoundedQueue::pop)
/// blocks while it is empty. Calling [shutdown](BoundedQueue::shutdown) wakes every blocked
/// caller: blocked and future pushes return without inserting, while pops keep draining
/// buffered items and then report end-of-stream.
///
/// # Example
/// ```
/// use telemetry::BoundedQueue;
///
/// let queue = BoundedQueue::new(2);
/// assert!(queue.push(1));
/// assert!(queue.push(2));
/// queue.shutdown();
///
/// assert!(!queue.push(3), "pushes after shutdown are dropped");
/// assert_eq!(queue.pop(), Some(1));
/// assert_eq!(queue.pop(), Some(2));
/// assert_eq!(queue.pop(), None);
/// ```
pub struct BoundedQueue<T> {
    ring: Mutex<Ring<T>>,
    not_full: Condvar,
    not_empty: Condvar,
    // Only ever set while holding `ring`, but may be read without it.
    stopped: AtomicBool,
    capacity: usize,
    dropped: AtomicU64,
}

impl<T> BoundedQueue<T> {
    /// Create a queue that holds at most `capacity` items.
    ///
    /// # Panics
    /// If `capacity` is 0.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "queue capacity must be at least 1");
        BoundedQueue {
            ring: Mutex::new(Ring::with_capacity(capacity)),
            not_full: Condvar::new(),
            not_empty: Condvar::new(),
            stopped: AtomicBool::new(false),
            capacity,
            dropped: AtomicU64::new(0),
        }
    }

    // Ring state is never left half updated, so a poisoned lock is still usable.
    fn lock(&self) -> MutexGuard<'_, Ring<T>> {
        self.ring.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append `item`, blocking while the queue is full.
    ///
    /// Returns `false`, dropping `item`, if the queue has been shut down before or while
    /// waiting for space.
    pub fn push(&self, item: T) -> bool {
        let mut ring = self
            .not_full
            .wait_while(self.lock(), |ring| {
                !self.stopped.load(Ordering::Acquire) && ring.is_full()
            })
            .unwrap_or_else(PoisonError::into_inner);

        if self.stopped.load(Ordering::Acquire) {
            drop(ring);
            self.dropped.fetch_add(1, Ordering::Relaxed);
            debug!("queue shut down; dropping pushed item");
            return false;
        }

        ring.put(item);
        drop(ring);
        self.not_empty.notify_one();
        true
    }

    /// Remove the oldest item, blocking while the queue is empty.
    ///
    /// Returns `None` only once the queue has been shut down and every buffered item has been
    /// handed out. This is the single end-of-stream signal for consumers.
    pub fn pop(&self) -> Option<T> {
        let mut ring = self
            .not_empty
            .wait_while(self.lock(), |ring| {
                !self.stopped.load(Ordering::Acquire) && ring.is_empty()
            })
            .unwrap_or_else(PoisonError::into_inner);

        let item = ring.take()?;
        drop(ring);
        self.not_full.notify_one();
        Some(item)
    }

    /// Stop the queue and wake every blocked caller.
    ///
    /// Only the first call has an effect and returns `true`; later calls return `false`.
    pub fn shutdown(&self) -> bool {
        let ring = self.lock();
        let first = !self.stopped.swap(true, Ordering::AcqRel);
        let remaining = ring.len();
        drop(ring);

        if first {
            debug!(remaining, "queue shutting down");
            self.not_full.notify_all();
            self.not_empty.notify_all();
        }
        first
    }

    /// True once [shutdown](BoundedQueue::shutdown) has been called. Does not take the lock.
    pub fn is_shutdown(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    /// Number of items currently buffered.
    ///
    /// This is only a snapshot; concurrent pushes and pops may change it as soon as it is
    /// returned.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of pushes that were dropped because the queue was shut down.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl BoundedQueue<TelemetryPacket> {
    /// Like [pop](BoundedQueue::pop), but signals end-of-stream in-band by returning
    /// [TelemetryPacket::SENTINEL], whose timestamp is 0.
    pub fn pop_packet(&self) -> TelemetryPacket {
        self.pop().unwrap_or(TelemetryPacket::SENTINEL)
    }
}

impl<T> std::fmt::Debug for BoundedQueue<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoundedQueue")
            .field("capacity", &self.capacity)
            .field("len", &self.len())
            .field("stopped", &self.is_shutdown())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{mpsc, Arc},
        thread,
        time::Duration,
    };

    use super::*;
    use test_case::test_case;

    const WAIT: Duration = Duration::from_secs(5);

    fn packet(timestamp: u64) -> TelemetryPacket {
        TelemetryPacket {
            timestamp,
            ..Default::default()
        }
    }

    #[test]
    fn test_ring_indexes() {
        let mut ring = Ring::with_capacity(3);
        assert_eq!(ring.slots.len(), 4);
        assert!(ring.is_empty());

        for i in 0..3 {
            ring.put(i);
        }
        assert!(ring.is_full());
        assert_eq!(ring.len(), 3);

        // wrap the indexes around the end of the slot array
        for i in 0..10 {
            assert_eq!(ring.take(), Some(i));
            ring.put(i + 3);
            assert!(ring.front < 4 && ring.back < 4);
            assert_eq!(ring.len(), 3);
        }
        assert_eq!(ring.take(), Some(10));
        assert_eq!(ring.len(), 2);
    }

    #[test]
    #[should_panic(expected = "capacity")]
    fn test_zero_capacity() {
        let _ = BoundedQueue::<u32>::new(0);
    }

    #[test]
    fn test_shutdown_drains_then_sentinel() {
        let queue = BoundedQueue::new(10);
        for ts in 1..=3 {
            assert!(queue.push(packet(ts)));
        }
        assert!(queue.shutdown());

        assert_eq!(queue.pop_packet().timestamp, 1);
        assert_eq!(queue.pop_packet().timestamp, 2);
        assert_eq!(queue.pop_packet().timestamp, 3);
        assert!(queue.pop_packet().is_sentinel());
        assert!(queue.pop_packet().is_sentinel());
    }

    #[test]
    fn test_shutdown_is_idempotent() {
        let queue: BoundedQueue<u8> = BoundedQueue::new(1);
        assert!(!queue.is_shutdown());
        assert!(queue.shutdown());
        assert!(!queue.shutdown());
        assert!(queue.is_shutdown());
    }

    #[test]
    fn test_push_after_shutdown_is_noop() {
        let queue = BoundedQueue::new(4);
        queue.shutdown();
        assert!(!queue.push(1));
        assert!(!queue.push(2));
        assert_eq!(queue.len(), 0);
        assert_eq!(queue.dropped(), 2);
        assert_eq!(queue.pop(), None);
    }

    #[test_case(1)]
    #[test_case(2)]
    #[test_case(7)]
    #[test_case(100)]
    fn test_fifo_sequential(capacity: usize) {
        let queue = BoundedQueue::new(capacity);
        let mut popped = Vec::new();
        let mut next = 0;
        // interleave bursts of pushes with bursts of pops
        while popped.len() < 50 {
            while next < 50 && queue.len() < capacity {
                assert!(queue.push(next));
                next += 1;
            }
            assert!(queue.len() <= capacity);
            popped.push(queue.pop().unwrap());
        }
        assert_eq!(popped, (0..50).collect::<Vec<_>>());
    }

    #[test_case(1)]
    #[test_case(3)]
    #[test_case(64)]
    fn test_fifo_threaded(capacity: usize) {
        const N: usize = 2000;
        let queue = Arc::new(BoundedQueue::new(capacity));

        let producer = {
            let queue = queue.clone();
            thread::spawn(move || {
                for i in 0..N {
                    assert!(queue.push(i));
                    assert!(queue.len() <= capacity);
                }
            })
        };
        let popped: Vec<usize> = (0..N).map(|_| queue.pop().unwrap()).collect();
        producer.join().unwrap();

        assert_eq!(popped, (0..N).collect::<Vec<_>>());
    }

    #[test]
    fn test_push_blocks_when_full() {
        let queue = Arc::new(BoundedQueue::new(2));
        queue.push(1);
        queue.push(2);

        let (tx, rx) = mpsc::channel();
        let handle = {
            let queue = queue.clone();
            thread::spawn(move || {
                let inserted = queue.push(3);
                tx.send(inserted).unwrap();
            })
        };

        assert!(
            rx.recv_timeout(Duration::from_millis(100)).is_err(),
            "push should block while full"
        );
        assert_eq!(queue.len(), 2);

        assert_eq!(queue.pop(), Some(1));
        assert_eq!(rx.recv_timeout(WAIT), Ok(true));
        handle.join().unwrap();
        assert_eq!(queue.pop(), Some(2));
        assert_eq!(queue.pop(), Some(3));
    }

    #[test]
    fn test_shutdown_unblocks_push() {
        let queue = Arc::new(BoundedQueue::new(1));
        queue.push(packet(1));

        let (tx, rx) = mpsc::channel();
        let handle = {
            let queue = queue.clone();
            thread::spawn(move || tx.send(queue.push(packet(2))).unwrap())
        };
        assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());

        queue.shutdown();
        assert_eq!(rx.recv_timeout(WAIT), Ok(false));
        handle.join().unwrap();

        // the blocked item was not inserted, the buffered one survives
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.pop_packet().timestamp, 1);
        assert!(queue.pop_packet().is_sentinel());
    }

    #[test]
    fn test_shutdown_unblocks_pop() {
        let queue: Arc<BoundedQueue<TelemetryPacket>> = Arc::new(BoundedQueue::new(4));

        let (tx, rx) = mpsc::channel();
        let handles: Vec<_> = (0..3)
            .map(|_| {
                let queue = queue.clone();
                let tx = tx.clone();
                thread::spawn(move || tx.send(queue.pop_packet()).unwrap())
            })
            .collect();
        assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());

        queue.shutdown();
        for _ in 0..3 {
            let pkt = rx.recv_timeout(WAIT).expect("pop should be woken by shutdown");
            assert!(pkt.is_sentinel());
        }
        for handle in handles {
            handle.join().unwrap();
        }
    }

    #[test]
    fn test_multiple_producers_and_consumers() {
        const PRODUCERS: u64 = 4;
        const PER_PRODUCER: u64 = 2500;
        let queue = Arc::new(BoundedQueue::new(16));

        let producers: Vec<_> = (0..PRODUCERS)
            .map(|p| {
                let queue = queue.clone();
                thread::spawn(move || {
                    for i in 0..PER_PRODUCER {
                        assert!(queue.push((p, i)));
                    }
                })
            })
            .collect();
        let consumers: Vec<_> = (0..3)
            .map(|_| {
                let queue = queue.clone();
                thread::spawn(move || {
                    let mut got = Vec::new();
                    while let Some(item) = queue.pop() {
                        got.push(item);
                    }
                    got
                })
            })
            .collect();

        for handle in producers {
            handle.join().unwrap();
        }
        queue.shutdown();

        let mut all = Vec::new();
        for handle in consumers {
            let got = handle.join().unwrap();
            // each consumer sees every producer's items in that producer's order
            for p in 0..PRODUCERS {
                let seq: Vec<u64> = got.iter().filter(|(q, _)| *q == p).map(|(_, i)| *i).collect();
                assert!(seq.windows(2).all(|w| w[0] < w[1]), "producer {p} reordered");
            }
            all.extend(got);
        }
        all.sort_unstable();
        let expected: Vec<(u64, u64)> = (0..PRODUCERS)
            .flat_map(|p| (0..PER_PRODUCER).map(move |i| (p, i)))
            .collect();
        assert_eq!(all, expected, "items lost or duplicated");
    }
}
