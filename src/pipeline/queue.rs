//! Bounded MPMC queue with an explicit close.

use crossbeam_channel::{Receiver, Sender, bounded};
use std::sync::Mutex;

/// Fixed-capacity multi-producer/multi-consumer FIFO over a crossbeam bounded channel.
///
/// `put` blocks while full; `get` blocks while empty and not closed. After [`close`](Self::close)
/// no new puts are accepted, but items already queued stay retrievable until drained; `get` then
/// returns `None`.
///
/// Close works by dropping the queue's own sender. A `put` that started before the close holds a
/// clone of the sender, so its item still lands before consumers see the channel disconnect.
pub struct BoundedQueue<T> {
    tx: Mutex<Option<Sender<T>>>,
    rx: Receiver<T>,
    capacity: usize,
}

impl<T> BoundedQueue<T> {
    /// # Panics
    /// If `capacity` is 0 (a rendezvous channel is not a buffer).
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "queue capacity must be at least 1");
        let (tx, rx) = bounded(capacity);
        Self {
            tx: Mutex::new(Some(tx)),
            rx,
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Items currently buffered.
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    pub fn is_closed(&self) -> bool {
        self.tx.lock().unwrap().is_none()
    }

    /// Enqueue `item`, blocking while the queue is full.
    ///
    /// # Panics
    /// If the queue is closed. Putting after close is a pipeline wiring bug.
    pub fn put(&self, item: T) {
        let tx = self
            .tx
            .lock()
            .unwrap()
            .clone()
            .expect("put on a closed queue");
        // Our own receiver is alive for as long as `self`, so send cannot see a disconnect.
        if tx.send(item).is_err() {
            unreachable!("queue receiver dropped while queue is alive");
        }
    }

    /// Dequeue the next item, blocking while empty. `None` once closed and drained.
    pub fn get(&self) -> Option<T> {
        self.rx.recv().ok()
    }

    /// Stop accepting puts. Queued items remain retrievable.
    ///
    /// # Panics
    /// If the queue is already closed.
    pub fn close(&self) {
        let tx = self.tx.lock().unwrap().take();
        assert!(tx.is_some(), "queue closed twice");
    }
}
