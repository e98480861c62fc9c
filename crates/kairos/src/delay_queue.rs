//! Blocking priority queue of deadline-keyed items
//!
//! The scheduler uses one shared `DelayQueue<Arc<Bucket>>` to wake its
//! driver exactly when the next occupied bucket is due. The queue is a
//! min-heap under a mutex; a condvar waker lets a blocked `poll` re-evaluate
//! its sleep when an earlier deadline is offered, and due items are emitted
//! on a channel consumed by the dispatcher.

use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::{Condvar, Mutex};
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

struct Entry<T> {
    deadline_ms: i64,
    /// Insertion order tiebreak for equal deadlines.
    seq: u64,
    item: T,
}

impl<T> PartialEq for Entry<T> {
    fn eq(&self, other: &Self) -> bool {
        self.deadline_ms == other.deadline_ms && self.seq == other.seq
    }
}

impl<T> Eq for Entry<T> {}

impl<T> PartialOrd for Entry<T> {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for Entry<T> {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (self.deadline_ms, self.seq).cmp(&(other.deadline_ms, other.seq))
    }
}

/// Concurrency-safe blocking queue of `(item, deadline)` pairs.
///
/// `poll` runs on a dedicated thread and never emits an item before its
/// deadline. The queue does not deduplicate: offering the same item twice
/// yields two emissions. Callers that need at-most-one entry per item must
/// suppress repeat offers themselves.
pub struct DelayQueue<T> {
    heap: Mutex<BinaryHeap<Reverse<Entry<T>>>>,
    available: Condvar,
    /// True while `poll` is parked on the condvar; lets `offer` skip the
    /// wakeup when nobody is sleeping.
    sleeping: AtomicBool,
    exited: AtomicBool,
    seq: AtomicU64,
    tx: Sender<T>,
    rx: Receiver<T>,
}

impl<T> DelayQueue<T> {
    pub fn new() -> Self {
        let (tx, rx) = unbounded();
        Self {
            heap: Mutex::new(BinaryHeap::new()),
            available: Condvar::new(),
            sleeping: AtomicBool::new(false),
            exited: AtomicBool::new(false),
            seq: AtomicU64::new(0),
            tx,
            rx,
        }
    }

    /// Output endpoint carrying due items, in deadline order.
    pub fn receiver(&self) -> Receiver<T> {
        self.rx.clone()
    }

    /// Inserts an item with an absolute deadline in milliseconds.
    ///
    /// Wakes a sleeping `poll` only when the new entry became the earliest
    /// deadline; anything later cannot shorten the current sleep.
    pub fn offer(&self, item: T, deadline_ms: i64) {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        let mut heap = self.heap.lock();
        heap.push(Reverse(Entry {
            deadline_ms,
            seq,
            item,
        }));
        let new_root = heap.peek().map(|r| r.0.seq == seq).unwrap_or(false);
        drop(heap);

        if new_root && self.sleeping.swap(false, Ordering::AcqRel) {
            self.available.notify_one();
        }
    }

    /// Blocking driver loop: emits each item on the output channel once its
    /// deadline has passed according to `now_ms`, sleeping in between.
    /// Returns after [`shutdown`](DelayQueue::shutdown) is called.
    pub fn poll<F>(&self, now_ms: F)
    where
        F: Fn() -> i64,
    {
        loop {
            if self.exited.load(Ordering::Acquire) {
                break;
            }

            let mut heap = self.heap.lock();
            match heap.peek().map(|r| r.0.deadline_ms) {
                None => {
                    self.sleeping.store(true, Ordering::Release);
                    self.available.wait(&mut heap);
                }
                Some(deadline_ms) => {
                    let now = now_ms();
                    if deadline_ms <= now {
                        if let Some(Reverse(entry)) = heap.pop() {
                            drop(heap);
                            // Receiver is owned by the queue, send cannot
                            // fail while the queue is alive.
                            let _ = self.tx.send(entry.item);
                        }
                        continue;
                    }
                    self.sleeping.store(true, Ordering::Release);
                    let timeout = Duration::from_millis((deadline_ms - now) as u64);
                    let _ = self.available.wait_for(&mut heap, timeout);
                }
            }
            self.sleeping.store(false, Ordering::Release);
        }
    }

    /// Raises the exit flag and wakes any sleeping `poll`.
    pub fn shutdown(&self) {
        self.exited.store(true, Ordering::Release);
        // Taking the lock here closes the window where poll has decided to
        // sleep but has not parked yet; without it the notification could
        // be lost and poll would sleep through shutdown.
        let _heap = self.heap.lock();
        self.available.notify_all();
    }

    /// Number of pending entries (diagnostics and tests).
    pub fn len(&self) -> usize {
        self.heap.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T> Default for DelayQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock;
    use std::sync::Arc;
    use std::thread;
    use std::time::Instant;

    fn spawn_poller(queue: &Arc<DelayQueue<u32>>) -> thread::JoinHandle<()> {
        let queue = Arc::clone(queue);
        thread::spawn(move || queue.poll(clock::now_ms))
    }

    #[test]
    fn test_emits_in_deadline_order() {
        let queue = Arc::new(DelayQueue::new());
        let rx = queue.receiver();
        let now = clock::now_ms();
        queue.offer(2, now + 40);
        queue.offer(1, now + 10);
        queue.offer(3, now + 70);

        let poller = spawn_poller(&queue);

        let timeout = Duration::from_secs(2);
        assert_eq!(rx.recv_timeout(timeout).unwrap(), 1);
        assert_eq!(rx.recv_timeout(timeout).unwrap(), 2);
        assert_eq!(rx.recv_timeout(timeout).unwrap(), 3);

        queue.shutdown();
        poller.join().unwrap();
    }

    #[test]
    fn test_never_emits_early() {
        let queue = Arc::new(DelayQueue::new());
        let rx = queue.receiver();
        let start = Instant::now();
        queue.offer(7, clock::now_ms() + 60);

        let poller = spawn_poller(&queue);

        assert!(rx.recv_timeout(Duration::from_millis(20)).is_err());
        assert_eq!(rx.recv_timeout(Duration::from_secs(2)).unwrap(), 7);
        assert!(start.elapsed() >= Duration::from_millis(59));

        queue.shutdown();
        poller.join().unwrap();
    }

    #[test]
    fn test_offer_wakes_sleeping_poll() {
        let queue = Arc::new(DelayQueue::new());
        let rx = queue.receiver();

        // Poller parks on an empty heap first.
        let poller = spawn_poller(&queue);
        thread::sleep(Duration::from_millis(20));

        queue.offer(9, clock::now_ms() + 10);
        assert_eq!(rx.recv_timeout(Duration::from_secs(2)).unwrap(), 9);

        queue.shutdown();
        poller.join().unwrap();
    }

    #[test]
    fn test_earlier_offer_shortens_sleep() {
        let queue = Arc::new(DelayQueue::new());
        let rx = queue.receiver();
        queue.offer(2, clock::now_ms() + 5_000);

        let poller = spawn_poller(&queue);
        thread::sleep(Duration::from_millis(20));

        queue.offer(1, clock::now_ms() + 10);
        assert_eq!(rx.recv_timeout(Duration::from_secs(2)).unwrap(), 1);

        queue.shutdown();
        poller.join().unwrap();
    }

    #[test]
    fn test_shutdown_interrupts_blocking_poll() {
        let queue: Arc<DelayQueue<u32>> = Arc::new(DelayQueue::new());
        let poller = spawn_poller(&queue);
        thread::sleep(Duration::from_millis(20));

        queue.shutdown();
        poller.join().unwrap();
    }

    #[test]
    fn test_len_tracks_pending_entries() {
        let queue: DelayQueue<u32> = DelayQueue::new();
        assert!(queue.is_empty());
        queue.offer(1, 100);
        queue.offer(2, 200);
        assert_eq!(queue.len(), 2);
    }
}
