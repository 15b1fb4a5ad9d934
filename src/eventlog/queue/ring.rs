//! Fixed-capacity ring backend.
//!
//! Slots are addressed by a global sequence number (`seq % capacity`).
//! Producers reserve disjoint sequence ranges with a CAS on `claimed`, fill
//! their slots, then wait for their turn and move `published` over the
//! whole range in one store. Consumers read every `seq < published` and
//! move their own cursor forward.
//!
//! A producer may reuse a slot only when every consumer cursor is past the
//! value it holds. The gate used for that check is the minimum of all
//! cursors and `published`; a consumer subscribing late starts at
//! `published`, which is never below a gate computed earlier.

use super::{FanoutQueue, Polled, PublishRejected, QueueConsumer, QueueError};
use crossbeam::utils::{Backoff, CachePadded};
use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

struct Shared<T> {
    slots: Box<[UnsafeCell<Option<T>>]>,
    capacity: u64,
    claimed: CachePadded<AtomicU64>,
    published: CachePadded<AtomicU64>,
    cursors: RwLock<Vec<Arc<AtomicU64>>>,
    closed: AtomicBool,
}

// SAFETY: a slot is written only by the producer that claimed its sequence,
// and only after every consumer cursor has moved past the previous value in
// that slot (see `Shared::gate`). Consumers only read slots below
// `published`, which is stored with Release after the writes.
unsafe impl<T: Send + Sync> Sync for Shared<T> {}
// SAFETY: see above; the cells only hold `T` values that are themselves Send.
unsafe impl<T: Send + Sync> Send for Shared<T> {}

impl<T> Shared<T> {
    fn gate(&self) -> u64 {
        let published = self.published.load(Ordering::Acquire);
        let cursors = self.cursors.read().unwrap_or_else(PoisonError::into_inner);
        cursors
            .iter()
            .map(|c| c.load(Ordering::Acquire))
            .fold(published, u64::min)
    }

    fn slot(&self, seq: u64) -> &UnsafeCell<Option<T>> {
        &self.slots[(seq % self.capacity) as usize]
    }
}

/// Bounded broadcast ring.
pub struct RingQueue<T> {
    shared: Arc<Shared<T>>,
}

impl<T> RingQueue<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Create a ring holding `capacity` values (at least one).
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let slots = (0..capacity)
            .map(|_| UnsafeCell::new(None))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Self {
            shared: Arc::new(Shared {
                slots,
                capacity: capacity as u64,
                claimed: CachePadded::new(AtomicU64::new(0)),
                published: CachePadded::new(AtomicU64::new(0)),
                cursors: RwLock::new(Vec::new()),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Reserve `[start, start + n)` if the slots are free right now.
    fn try_claim(&self, n: u64) -> Result<u64, QueueError> {
        let shared = &self.shared;
        loop {
            if shared.closed.load(Ordering::Acquire) {
                return Err(QueueError::Closed);
            }
            let start = shared.claimed.load(Ordering::Acquire);
            let end = start + n;
            if end - shared.gate() > shared.capacity {
                return Err(QueueError::Full);
            }
            if shared
                .claimed
                .compare_exchange_weak(start, end, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return Ok(start);
            }
        }
    }

    fn check_len(&self, len: usize) -> Result<(), QueueError> {
        if self.shared.closed.load(Ordering::Acquire) {
            return Err(QueueError::Closed);
        }
        if len as u64 > self.shared.capacity {
            return Err(QueueError::BatchTooLarge {
                len,
                capacity: self.shared.capacity as usize,
            });
        }
        Ok(())
    }

    fn fill_and_publish(&self, start: u64, batch: Vec<T>) {
        let shared = &self.shared;
        let end = start + batch.len() as u64;
        for (seq, value) in (start..end).zip(batch) {
            // SAFETY: `[start, end)` was claimed by this producer alone and
            // the gate check proved no consumer still needs these slots.
            unsafe {
                *shared.slot(seq).get() = Some(value);
            }
        }

        // Earlier claims publish first so `published` never skips a range.
        let backoff = Backoff::new();
        while shared.published.load(Ordering::Acquire) != start {
            if backoff.is_completed() {
                std::thread::yield_now();
            } else {
                backoff.snooze();
            }
        }
        shared.published.store(end, Ordering::Release);
    }
}

impl<T> FanoutQueue<T> for RingQueue<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn publish_batch(&self, batch: Vec<T>) -> Result<(), PublishRejected<T>> {
        if batch.is_empty() {
            return Ok(());
        }
        if let Err(reason) = self.check_len(batch.len()) {
            return Err(PublishRejected { reason, batch });
        }

        let backoff = Backoff::new();
        loop {
            match self.try_claim(batch.len() as u64) {
                Ok(start) => {
                    self.fill_and_publish(start, batch);
                    return Ok(());
                }
                Err(QueueError::Full) => {
                    if backoff.is_completed() {
                        std::thread::yield_now();
                    } else {
                        backoff.snooze();
                    }
                }
                Err(reason) => return Err(PublishRejected { reason, batch }),
            }
        }
    }

    fn try_publish_batch(&self, batch: Vec<T>) -> Result<(), PublishRejected<T>> {
        if batch.is_empty() {
            return Ok(());
        }
        if let Err(reason) = self.check_len(batch.len()) {
            return Err(PublishRejected { reason, batch });
        }
        match self.try_claim(batch.len() as u64) {
            Ok(start) => {
                self.fill_and_publish(start, batch);
                Ok(())
            }
            Err(reason) => Err(PublishRejected { reason, batch }),
        }
    }

    fn subscribe(&self) -> Box<dyn QueueConsumer<T>> {
        let mut cursors = self
            .shared
            .cursors
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let cursor = Arc::new(AtomicU64::new(
            self.shared.published.load(Ordering::Acquire),
        ));
        cursors.push(Arc::clone(&cursor));
        Box::new(RingConsumer {
            shared: Arc::clone(&self.shared),
            cursor,
        })
    }

    fn capacity(&self) -> Option<usize> {
        Some(self.shared.capacity as usize)
    }

    fn consumer_count(&self) -> usize {
        self.shared
            .cursors
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn close(&self) {
        self.shared.closed.store(true, Ordering::Release);
    }

    fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }
}

struct RingConsumer<T> {
    shared: Arc<Shared<T>>,
    cursor: Arc<AtomicU64>,
}

impl<T> QueueConsumer<T> for RingConsumer<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn next(&mut self) -> Polled<T> {
        let seq = self.cursor.load(Ordering::Relaxed);
        if seq >= self.shared.published.load(Ordering::Acquire) {
            return if self.shared.closed.load(Ordering::Acquire) {
                Polled::Closed
            } else {
                Polled::Empty
            };
        }

        // SAFETY: `seq < published`, so the slot was fully written, and our
        // cursor still equals `seq`, so no producer can reuse it yet.
        let value = unsafe { (*self.shared.slot(seq).get()).clone() };
        self.cursor.store(seq + 1, Ordering::Release);
        match value {
            Some(value) => Polled::Ready(value),
            None => Polled::Empty,
        }
    }
}

impl<T> Drop for RingConsumer<T> {
    fn drop(&mut self) {
        let mut cursors = self
            .shared
            .cursors
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        cursors.retain(|c| !Arc::ptr_eq(c, &self.cursor));
    }
}
