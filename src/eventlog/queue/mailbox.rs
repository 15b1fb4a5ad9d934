//! Per-consumer mailbox backend.
//!
//! Every consumer owns a bounded `crossbeam` channel of pending batches.
//! Publishing pushes one shared `Arc<[T]>` into every mailbox while holding
//! the producer lock, so all consumers receive batches in the same order.
//! A full mailbox holds the producer back; `try_publish_batch` refuses
//! instead. Mailboxes whose consumer was dropped are pruned on the next
//! publish.

use super::{FanoutQueue, Polled, PublishRejected, QueueConsumer, QueueError};
use crossbeam::channel::{self, Receiver, SendTimeoutError, Sender, TryRecvError, TrySendError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;
use tracing::trace;

/// How long a blocked publish waits before re-checking for close.
const SEND_RETRY: Duration = Duration::from_millis(10);

/// Producer side of one consumer's mailbox.
struct Mailbox<T> {
    tx: Sender<Arc<[T]>>,
    /// Dead once the consumer holding the matching `Arc` is dropped.
    alive: Weak<()>,
}

impl<T> Mailbox<T> {
    fn is_alive(&self) -> bool {
        self.alive.strong_count() > 0
    }
}

/// Broadcast queue with one bounded mailbox per consumer.
pub struct MailboxQueue<T> {
    mailboxes: Mutex<Vec<Mailbox<T>>>,
    max_pending_batches: usize,
    closed: AtomicBool,
}

impl<T> MailboxQueue<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Create a queue whose mailboxes each hold up to
    /// `max_pending_batches` unread batches (at least one).
    #[must_use]
    pub fn new(max_pending_batches: usize) -> Self {
        Self {
            mailboxes: Mutex::new(Vec::new()),
            max_pending_batches: max_pending_batches.max(1),
            closed: AtomicBool::new(false),
        }
    }

    /// Maximum number of unread batches per consumer.
    #[must_use]
    pub fn max_pending_batches(&self) -> usize {
        self.max_pending_batches
    }
}

impl<T> FanoutQueue<T> for MailboxQueue<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn publish_batch(&self, batch: Vec<T>) -> Result<(), PublishRejected<T>> {
        if batch.is_empty() {
            return Ok(());
        }
        let mut mailboxes = self
            .mailboxes
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if self.closed.load(Ordering::Acquire) {
            return Err(PublishRejected {
                reason: QueueError::Closed,
                batch,
            });
        }

        mailboxes.retain(Mailbox::is_alive);
        let shared: Arc<[T]> = Arc::from(batch);
        let mut index = 0;
        while index < mailboxes.len() {
            let mut pending = Arc::clone(&shared);
            loop {
                match mailboxes[index].tx.send_timeout(pending, SEND_RETRY) {
                    Ok(()) => {
                        index += 1;
                        break;
                    }
                    Err(SendTimeoutError::Timeout(back)) => {
                        // Mailboxes before `index` already hold the batch;
                        // it cannot be taken back, so only close stops us.
                        if self.closed.load(Ordering::Acquire) {
                            return Err(PublishRejected {
                                reason: QueueError::Closed,
                                batch: Vec::new(),
                            });
                        }
                        pending = back;
                    }
                    Err(SendTimeoutError::Disconnected(_)) => {
                        trace!("pruning disconnected mailbox");
                        mailboxes.swap_remove(index);
                        break;
                    }
                }
            }
        }
        Ok(())
    }

    fn try_publish_batch(&self, batch: Vec<T>) -> Result<(), PublishRejected<T>> {
        if batch.is_empty() {
            return Ok(());
        }
        let mut mailboxes = self
            .mailboxes
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if self.closed.load(Ordering::Acquire) {
            return Err(PublishRejected {
                reason: QueueError::Closed,
                batch,
            });
        }

        mailboxes.retain(Mailbox::is_alive);
        // Consumers only ever drain, so a mailbox with room now keeps it
        // while we hold the producer lock.
        if mailboxes.iter().any(|mailbox| mailbox.tx.is_full()) {
            return Err(PublishRejected {
                reason: QueueError::Full,
                batch,
            });
        }

        let shared: Arc<[T]> = Arc::from(batch);
        mailboxes.retain(|mailbox| match mailbox.tx.try_send(Arc::clone(&shared)) {
            Ok(()) => true,
            Err(TrySendError::Disconnected(_)) => false,
            // Unreachable under the lock; keep the mailbox.
            Err(TrySendError::Full(_)) => true,
        });
        Ok(())
    }

    fn subscribe(&self) -> Box<dyn QueueConsumer<T>> {
        let (tx, rx) = channel::bounded(self.max_pending_batches);
        let alive = Arc::new(());
        let mut mailboxes = self
            .mailboxes
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if !self.closed.load(Ordering::Acquire) {
            mailboxes.push(Mailbox {
                tx,
                alive: Arc::downgrade(&alive),
            });
        }
        Box::new(MailboxConsumer {
            rx,
            current: None,
            _alive: alive,
        })
    }

    fn capacity(&self) -> Option<usize> {
        None
    }

    fn consumer_count(&self) -> usize {
        let mut mailboxes = self
            .mailboxes
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        mailboxes.retain(Mailbox::is_alive);
        mailboxes.len()
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
        // Dropping the senders lets consumers drain and then see
        // disconnection.
        self.mailboxes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

struct MailboxConsumer<T> {
    rx: Receiver<Arc<[T]>>,
    current: Option<(Arc<[T]>, usize)>,
    _alive: Arc<()>,
}

impl<T> QueueConsumer<T> for MailboxConsumer<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn next(&mut self) -> Polled<T> {
        loop {
            if let Some((batch, index)) = &mut self.current {
                if let Some(value) = batch.get(*index) {
                    *index += 1;
                    return Polled::Ready(value.clone());
                }
                self.current = None;
            }
            match self.rx.try_recv() {
                Ok(batch) => self.current = Some((batch, 0)),
                Err(TryRecvError::Empty) => return Polled::Empty,
                Err(TryRecvError::Disconnected) => return Polled::Closed,
            }
        }
    }
}
