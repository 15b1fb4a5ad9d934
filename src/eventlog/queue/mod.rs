//! Concurrent fan-out of committed values.
//!
//! A [`FanoutQueue`] distributes batches published by producers to every
//! registered consumer. Each consumer holds its own [`QueueConsumer`] and
//! sees every value published after it subscribed, in publish order, at
//! its own pace. Values are cloned per consumer, never taken away from
//! the others.
//!
//! Producers publish through a [`Transaction`] sized up front:
//!
//! ```text
//!  Transaction::begin(queue, n) ── add(v1) ── add(v2) ... ── commit()
//!                                                              │
//!                         one atomic step, whole batch visible ▼
//!  consumer A: next() -> v1, v2, ...     consumer B: next() -> v1, v2, ...
//! ```
//!
//! Two backends implement the contract:
//!
//! - [`RingQueue`]: a fixed-capacity ring with one cursor per consumer. A
//!   producer that would overwrite a slot some consumer has not read yet
//!   is held back.
//! - [`MailboxQueue`]: one bounded mailbox of pending batches per consumer.
//!   A producer waits while any mailbox is full.

mod mailbox;
mod ring;

pub use mailbox::MailboxQueue;
pub use ring::RingQueue;

use super::config::FanoutConfig;
use std::fmt;
use std::sync::Arc;

/// Errors reported by a fan-out queue.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueueError {
    /// The queue has no room for the batch right now.
    #[error("queue is full")]
    Full,

    /// The queue was closed.
    #[error("queue is closed")]
    Closed,

    /// More values were added than the transaction reserved.
    #[error("transaction reserved {reserved} values and is already full")]
    TransactionFull {
        /// Number of values reserved at begin.
        reserved: usize,
    },

    /// The batch can never fit into the queue.
    #[error("batch of {len} values exceeds queue capacity {capacity}")]
    BatchTooLarge {
        /// Length of the batch.
        len: usize,
        /// Capacity of the queue.
        capacity: usize,
    },
}

/// A batch that could not be published, handed back to the producer.
pub struct PublishRejected<T> {
    /// Why the batch was refused.
    pub reason: QueueError,
    /// The values, unchanged.
    pub batch: Vec<T>,
}

impl<T> fmt::Debug for PublishRejected<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PublishRejected")
            .field("reason", &self.reason)
            .field("len", &self.batch.len())
            .finish()
    }
}

/// Result of polling a consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Polled<T> {
    /// The next unseen value.
    Ready(T),
    /// Nothing new yet; poll again later.
    Empty,
    /// The queue was closed and everything published has been seen.
    Closed,
}

impl<T> Polled<T> {
    /// The value, if one was ready.
    pub fn ready(self) -> Option<T> {
        match self {
            Polled::Ready(value) => Some(value),
            Polled::Empty | Polled::Closed => None,
        }
    }
}

/// The broadcast contract shared by every backend.
pub trait FanoutQueue<T>: Send + Sync {
    /// Publish `batch` atomically, waiting for room if necessary.
    ///
    /// # Errors
    ///
    /// Returns the batch if the queue is closed or the batch can never fit.
    fn publish_batch(&self, batch: Vec<T>) -> Result<(), PublishRejected<T>>;

    /// Publish `batch` atomically if there is room right now.
    ///
    /// # Errors
    ///
    /// Returns the batch with [`QueueError::Full`] when there is no room,
    /// or with the reasons of [`publish_batch`](Self::publish_batch).
    fn try_publish_batch(&self, batch: Vec<T>) -> Result<(), PublishRejected<T>>;

    /// Register a new consumer. It sees values published from now on.
    fn subscribe(&self) -> Box<dyn QueueConsumer<T>>;

    /// Fixed capacity in values, or `None` if the backend has none.
    fn capacity(&self) -> Option<usize>;

    /// Number of live consumers.
    fn consumer_count(&self) -> usize;

    /// Close the queue. Consumers drain what was published, then see
    /// [`Polled::Closed`]; further publishes fail.
    fn close(&self);

    /// Returns `true` once [`close`](Self::close) was called.
    fn is_closed(&self) -> bool;
}

/// One consumer's view of a [`FanoutQueue`].
///
/// Dropping the consumer unregisters it.
pub trait QueueConsumer<T>: Send {
    /// The next unseen value, without blocking.
    fn next(&mut self) -> Polled<T>;
}

/// A producer-side batch of a known size.
///
/// Nothing is visible to consumers until [`commit`](Self::commit).
/// Dropping a transaction without committing discards its values.
pub struct Transaction<'q, T> {
    queue: &'q dyn FanoutQueue<T>,
    reserved: usize,
    values: Vec<T>,
}

impl<'q, T> Transaction<'q, T> {
    /// Reserve room for `n` upcoming values.
    ///
    /// # Errors
    ///
    /// - [`QueueError::Closed`] if the queue is closed
    /// - [`QueueError::BatchTooLarge`] if `n` exceeds the queue capacity
    pub fn begin(queue: &'q dyn FanoutQueue<T>, n: usize) -> Result<Self, QueueError> {
        if queue.is_closed() {
            return Err(QueueError::Closed);
        }
        match queue.capacity() {
            Some(capacity) if n > capacity => {
                return Err(QueueError::BatchTooLarge { len: n, capacity });
            }
            _ => {}
        }
        Ok(Self {
            queue,
            reserved: n,
            values: Vec::with_capacity(n),
        })
    }

    /// Fill the next reserved slot.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::TransactionFull`] once all reserved slots are
    /// filled.
    pub fn add(&mut self, value: T) -> Result<(), QueueError> {
        if self.values.len() >= self.reserved {
            return Err(QueueError::TransactionFull {
                reserved: self.reserved,
            });
        }
        self.values.push(value);
        Ok(())
    }

    /// Number of values added so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns `true` if nothing was added.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Publish the batch, waiting for room.
    ///
    /// # Errors
    ///
    /// Returns the queue's refusal reason; the values are dropped.
    pub fn commit(self) -> Result<(), QueueError> {
        if self.values.is_empty() {
            return Ok(());
        }
        self.queue
            .publish_batch(self.values)
            .map_err(|rejected| rejected.reason)
    }

    /// Publish the batch only if there is room right now.
    ///
    /// # Errors
    ///
    /// Hands the values back together with the refusal reason.
    pub fn try_commit(self) -> Result<(), PublishRejected<T>> {
        if self.values.is_empty() {
            return Ok(());
        }
        self.queue.try_publish_batch(self.values)
    }
}

/// Build the queue backend selected by `config`.
pub fn build<T>(config: &FanoutConfig) -> Arc<dyn FanoutQueue<T>>
where
    T: Clone + Send + Sync + 'static,
{
    match *config {
        FanoutConfig::Ring { capacity } => Arc::new(RingQueue::new(capacity)),
        FanoutConfig::Mailbox {
            max_pending_batches,
        } => Arc::new(MailboxQueue::new(max_pending_batches)),
    }
}
