//! Bounded FIFO work queue between producers and the writer thread.
//!
//! Producers call [`BoundedWorkQueue::offer`], which never blocks: a full or
//! shut-down queue hands the request back. The single consumer blocks in
//! [`BoundedWorkQueue::take`] until a request arrives or the queue is shut
//! down. Internally this is a `crossbeam::channel::bounded` channel plus a
//! second channel whose disconnection wakes a blocked consumer on shutdown.
//!
//! An accepted request is either handed to the consumer or counted by
//! [`BoundedWorkQueue::shutdown`]. Offers hold a read lock on the closed flag
//! across the send, and shutdown drains under the write lock.

use std::sync::{Condvar, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::{Duration, Instant};

use crossbeam::channel::{self, Receiver, Sender, TrySendError};

use crate::record::WriteRequest;

/// Why an offer was rejected. Carries the request back to the caller.
#[derive(Debug, thiserror::Error)]
pub enum OfferError {
    #[error("queue is full")]
    Full(WriteRequest),
    #[error("queue is shut down")]
    Closed(WriteRequest),
}

impl OfferError {
    #[must_use]
    pub fn into_inner(self) -> WriteRequest {
        match self {
            Self::Full(req) | Self::Closed(req) => req,
        }
    }

    #[must_use]
    pub fn is_full(&self) -> bool {
        matches!(self, Self::Full(_))
    }
}

/// Fixed-capacity, non-blocking-producer FIFO of [`WriteRequest`]s.
pub struct BoundedWorkQueue {
    items_tx: Sender<WriteRequest>,
    items_rx: Receiver<WriteRequest>,
    shutdown_tx: Mutex<Option<Sender<()>>>,
    shutdown_rx: Receiver<()>,
    closed: RwLock<bool>,
    capacity: usize,
    // Accepted but not yet completed by the consumer.
    pending: Mutex<usize>,
    drained: Condvar,
}

impl BoundedWorkQueue {
    /// Create a queue holding at most `capacity` requests.
    ///
    /// # Panics
    /// Panics when `capacity == 0`.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "queue capacity must be > 0");
        let (items_tx, items_rx) = channel::bounded(capacity);
        let (shutdown_tx, shutdown_rx) = channel::bounded(0);
        Self {
            items_tx,
            items_rx,
            shutdown_tx: Mutex::new(Some(shutdown_tx)),
            shutdown_rx,
            closed: RwLock::new(false),
            capacity,
            pending: Mutex::new(0),
            drained: Condvar::new(),
        }
    }

    /// Enqueue without blocking.
    pub fn offer(&self, request: WriteRequest) -> Result<(), OfferError> {
        let closed = self.closed.read().unwrap_or_else(PoisonError::into_inner);
        if *closed {
            return Err(OfferError::Closed(request));
        }

        // Count first so a fast consumer can never complete an item that is
        // not yet accounted for.
        *self.lock_pending() += 1;
        let sent = self.items_tx.try_send(request);
        drop(closed);
        match sent {
            Ok(()) => Ok(()),
            Err(err) => {
                self.finish(1);
                match err {
                    TrySendError::Full(req) => Err(OfferError::Full(req)),
                    TrySendError::Disconnected(req) => Err(OfferError::Closed(req)),
                }
            }
        }
    }

    /// Block until a request is available.
    ///
    /// Returns `None` once the queue has been shut down. Every request
    /// returned must later be acknowledged with [`complete`](Self::complete).
    pub fn take(&self) -> Option<WriteRequest> {
        if self.is_closed() {
            return None;
        }

        channel::select! {
            recv(self.items_rx) -> msg => msg.ok(),
            recv(self.shutdown_rx) -> _ => None,
        }
    }

    /// Non-blocking variant of [`take`](Self::take).
    pub fn try_take(&self) -> Option<WriteRequest> {
        if self.is_closed() {
            return None;
        }
        self.items_rx.try_recv().ok()
    }

    /// Acknowledge that a taken request has been fully processed.
    pub fn complete(&self) {
        self.finish(1);
    }

    /// Shut the queue down and wake the consumer.
    ///
    /// Requests still queued are discarded; the number discarded is returned.
    /// Calling this more than once returns 0 after the first call.
    pub fn shutdown(&self) -> usize {
        let mut closed = self.closed.write().unwrap_or_else(PoisonError::into_inner);
        if *closed {
            return 0;
        }
        *closed = true;

        drop(
            self.shutdown_tx
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take(),
        );

        let discarded = self.items_rx.try_iter().count();
        drop(closed);
        self.finish(discarded);
        discarded
    }

    /// Wait until every accepted request has been completed or discarded.
    ///
    /// Returns `false` if `timeout` elapsed first.
    pub fn wait_drained(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut pending = self.lock_pending();
        while *pending > 0 {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            pending = self
                .drained
                .wait_timeout(pending, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        true
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        *self.closed.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current queue depth.
    #[must_use]
    pub fn len(&self) -> usize {
        self.items_rx.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items_rx.is_empty()
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Requests accepted but not yet completed.
    #[must_use]
    pub fn pending(&self) -> usize {
        *self.lock_pending()
    }

    fn lock_pending(&self) -> MutexGuard<'_, usize> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn finish(&self, count: usize) {
        if count == 0 {
            return;
        }
        let mut pending = self.lock_pending();
        *pending = pending.saturating_sub(count);
        if *pending == 0 {
            self.drained.notify_all();
        }
    }
}

impl std::fmt::Debug for BoundedWorkQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoundedWorkQueue")
            .field("capacity", &self.capacity)
            .field("len", &self.len())
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use super::*;
    use crate::record::SerializedLog;

    fn req(id: usize) -> WriteRequest {
        WriteRequest::new("/tmp/q.log", SerializedLog::new(format!("q-{id}"), "x"))
    }

    #[test]
    fn preserves_fifo_order() {
        let queue = BoundedWorkQueue::new(8);
        for i in 0..3 {
            queue.offer(req(i)).unwrap();
        }
        for i in 0..3 {
            assert_eq!(queue.take().unwrap().correlation_id(), format!("q-{i}"));
            queue.complete();
        }
        assert_eq!(queue.pending(), 0);
    }

    #[test]
    fn offer_rejects_at_capacity_without_blocking() {
        let queue = BoundedWorkQueue::new(2);
        assert!(queue.offer(req(0)).is_ok());
        assert!(queue.offer(req(1)).is_ok());
        let err = queue.offer(req(2)).unwrap_err();
        assert!(err.is_full());
        assert_eq!(err.into_inner().correlation_id(), "q-2");
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.pending(), 2);
    }

    #[test]
    fn offer_after_shutdown_is_closed() {
        let queue = BoundedWorkQueue::new(2);
        queue.shutdown();
        assert!(matches!(queue.offer(req(0)), Err(OfferError::Closed(_))));
        assert_eq!(queue.pending(), 0);
    }

    #[test]
    fn shutdown_discards_and_counts_queued_items() {
        let queue = BoundedWorkQueue::new(4);
        queue.offer(req(0)).unwrap();
        queue.offer(req(1)).unwrap();
        assert_eq!(queue.shutdown(), 2);
        assert_eq!(queue.shutdown(), 0);
        assert!(queue.take().is_none());
        assert!(queue.wait_drained(Duration::ZERO));
    }

    #[test]
    fn shutdown_wakes_blocked_consumer() {
        let queue = Arc::new(BoundedWorkQueue::new(1));
        let consumer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.take())
        };
        // Either order is fine: a consumer that starts after shutdown sees
        // the closed flag, one that is already blocked is woken.
        queue.shutdown();
        assert!(consumer.join().unwrap().is_none());
    }

    #[test]
    fn wait_drained_tracks_completion() {
        let queue = Arc::new(BoundedWorkQueue::new(4));
        queue.offer(req(0)).unwrap();
        assert!(!queue.wait_drained(Duration::from_millis(10)));

        let consumer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || {
                let item = queue.take();
                queue.complete();
                item
            })
        };
        assert!(queue.wait_drained(Duration::from_secs(5)));
        assert!(consumer.join().unwrap().is_some());
    }

    #[test]
    fn try_take_on_empty_is_none() {
        let queue = BoundedWorkQueue::new(1);
        assert!(queue.try_take().is_none());
        queue.offer(req(0)).unwrap();
        assert!(queue.try_take().is_some());
    }

    #[test]
    fn offers_racing_shutdown_are_never_stranded() {
        for _ in 0..200 {
            let queue = Arc::new(BoundedWorkQueue::new(64));
            let producers: Vec<_> = (0..4)
                .map(|p| {
                    let queue = Arc::clone(&queue);
                    thread::spawn(move || {
                        (0..32)
                            .filter(|i| queue.offer(req(p * 100 + i)).is_ok())
                            .count()
                    })
                })
                .collect();
            let discarded = queue.shutdown();
            let accepted: usize = producers.into_iter().map(|h| h.join().unwrap()).sum();

            assert_eq!(accepted, discarded);
            assert!(queue.is_empty());
            assert_eq!(queue.pending(), 0);
        }
    }

    #[test]
    #[should_panic(expected = "queue capacity must be > 0")]
    fn zero_capacity_panics() {
        let _ = BoundedWorkQueue::new(0);
    }
}
