//! Seams between a commit log and its callers.
//!
//! - [`Sink`]: the only way to append
//! - [`ColdSource`]: replays history from a subscriber's saved position
//! - [`HotSource`]: delivers commits as they happen
//! - [`Subscriber`]: receives entries and owns its checkpoint
//! - [`SourcedLog`]: cold replay followed by hot delivery behind one call
//!
//! # Cold to hot
//!
//! ```text
//!  open_tail ──▶ consumer registered, tail T captured   (one actor unit)
//!      │
//!      ├──▶ cold replay: subscriber revisions ..= T
//!      │
//!      └──▶ hot delivery: everything after T
//! ```
//!
//! The hot consumer is registered in the same serialized step that reads
//! the tail, so every commit after `T` reaches the queue and every commit
//! up to `T` is on disk. Replay stops exactly at `T`.
//!
//! Delivery is at-least-once: a subscriber's revisions advance only after
//! `on_committed` succeeds and are saved after each delivered batch.

pub mod file;

use super::error::LogError;
use super::queue::{Polled, QueueConsumer};
use super::revision::Revisions;
use super::types::{CommitResult, Committed, Uncommitted};
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, error, trace};

/// Receives committed entries and keeps its own checkpoint.
///
/// The log reads the checkpoint once through
/// [`load_revisions`](Self::load_revisions), then delivers entries in
/// commit order per partition.
pub trait Subscriber: Send + 'static {
    /// Process one committed unit.
    ///
    /// # Errors
    ///
    /// An error stops the subscription; the entry is not counted as seen.
    fn on_committed(&mut self, entry: &Committed) -> Result<(), LogError>;

    /// The position to resume from.
    fn load_revisions(&mut self) -> Revisions;

    /// Persist the position reached so far.
    ///
    /// # Errors
    ///
    /// An error stops the subscription.
    fn save_revisions(&mut self, revisions: &Revisions) -> Result<(), LogError>;
}

/// Accepts append attempts.
pub trait Sink: Send + Sync {
    /// Append `attempt` to `topic` if its expected revision is the
    /// partition tail; otherwise report the conflict.
    ///
    /// # Errors
    ///
    /// Returns [`LogError`] for invalid attempts or I/O failures. A lost
    /// optimistic-concurrency race is a [`CommitResult::Conflict`], not an
    /// error.
    fn try_send(
        &self,
        topic: &str,
        attempt: Uncommitted,
    ) -> impl Future<Output = Result<CommitResult, LogError>> + Send;
}

/// Replays history.
pub trait ColdSource: Send + Sync {
    /// Deliver every commit of `topic` after `from` and up to `until` (the
    /// current tail when `None`), returning the revisions reached.
    ///
    /// # Errors
    ///
    /// Returns the first read, position or subscriber error.
    fn load_range<S: Subscriber>(
        &self,
        topic: &str,
        subscriber: &mut S,
        from: Revisions,
        until: Option<Revisions>,
    ) -> impl Future<Output = Result<Revisions, LogError>> + Send;

    /// Deliver everything after the subscriber's saved revisions.
    ///
    /// # Errors
    ///
    /// Same as [`load_range`](Self::load_range).
    fn load<S: Subscriber>(
        &self,
        topic: &str,
        subscriber: &mut S,
    ) -> impl Future<Output = Result<Revisions, LogError>> + Send {
        async move {
            let from = subscriber.load_revisions();
            self.load_range(topic, subscriber, from, None).await
        }
    }
}

/// Delivers commits as they happen.
pub trait HotSource: Send + Sync {
    /// Register a consumer on `topic` and capture the tail at that instant.
    ///
    /// # Errors
    ///
    /// Returns [`LogError`] if the topic cannot be opened or is closed.
    fn open_tail(&self, topic: &str) -> impl Future<Output = Result<HotTail, LogError>> + Send;

    /// Deliver every commit made from now on to `subscriber`.
    ///
    /// Commits already covered by the subscriber's saved revisions are
    /// skipped. Must be called within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Same as [`open_tail`](Self::open_tail).
    fn subscribe<S: Subscriber>(
        &self,
        topic: &str,
        mut subscriber: S,
    ) -> impl Future<Output = Result<Subscription<S>, LogError>> + Send {
        async move {
            let tail = self.open_tail(topic).await?;
            let revisions = subscriber.load_revisions();
            Ok(tail.start(subscriber, revisions))
        }
    }
}

/// A registered hot consumer that has not started delivering yet.
///
/// Dropping it unregisters the consumer.
pub struct HotTail {
    topic: String,
    consumer: Box<dyn QueueConsumer<Arc<Committed>>>,
    wakeup: Arc<Notify>,
    tail: Revisions,
}

impl HotTail {
    pub(crate) fn new(
        topic: String,
        consumer: Box<dyn QueueConsumer<Arc<Committed>>>,
        wakeup: Arc<Notify>,
        tail: Revisions,
    ) -> Self {
        Self {
            topic,
            consumer,
            wakeup,
            tail,
        }
    }

    /// Tail of every partition at registration.
    #[must_use]
    pub fn revisions(&self) -> &Revisions {
        &self.tail
    }

    /// Topic this consumer is registered on.
    #[must_use]
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Spawn delivery to `subscriber`, starting from `revisions`.
    ///
    /// Must be called within a tokio runtime.
    pub fn start<S: Subscriber>(self, subscriber: S, revisions: Revisions) -> Subscription<S> {
        let cancel = Arc::new(CancelSignal::default());
        let topic = self.topic.clone();
        let handle = tokio::spawn(deliver(self, subscriber, revisions, Arc::clone(&cancel)));
        Subscription {
            topic,
            cancel,
            handle,
        }
    }
}

impl std::fmt::Debug for HotTail {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HotTail")
            .field("topic", &self.topic)
            .field("tail", &self.tail)
            .finish()
    }
}

#[derive(Default)]
struct CancelSignal {
    cancelled: AtomicBool,
    notify: Notify,
}

impl CancelSignal {
    fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
        // notify_one keeps a permit if the task is not waiting yet.
        self.notify.notify_one();
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

/// What a finished subscription hands back.
#[derive(Debug)]
pub struct Stopped<S> {
    /// The subscriber, for reuse or inspection.
    pub subscriber: S,
    /// Revisions reached. Already saved unless `error` came from saving.
    pub revisions: Revisions,
    /// Why delivery stopped, if it was not a cancel or a close.
    pub error: Option<LogError>,
}

/// Handle to a running hot delivery.
///
/// Cancellation is best-effort: an entry being delivered when
/// [`cancel`](Self::cancel) is called may still complete.
pub struct Subscription<S> {
    topic: String,
    cancel: Arc<CancelSignal>,
    handle: JoinHandle<Stopped<S>>,
}

impl<S> Subscription<S> {
    /// Topic being delivered.
    #[must_use]
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Ask delivery to stop without waiting.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Returns `true` once delivery has ended.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Cancel and wait for delivery to end.
    ///
    /// # Errors
    ///
    /// Returns [`LogError::Subscriber`] if the delivery task panicked.
    pub async fn stop(self) -> Result<Stopped<S>, LogError> {
        self.cancel.cancel();
        self.join().await
    }

    /// Wait for delivery to end on its own (topic closed or subscriber
    /// error).
    ///
    /// # Errors
    ///
    /// Returns [`LogError::Subscriber`] if the delivery task panicked.
    pub async fn join(self) -> Result<Stopped<S>, LogError> {
        self.handle.await.map_err(|e| LogError::Subscriber {
            message: format!("delivery task failed: {e}"),
        })
    }
}

impl<S> std::fmt::Debug for Subscription<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("topic", &self.topic)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}

async fn deliver<S: Subscriber>(
    mut tail: HotTail,
    mut subscriber: S,
    mut revisions: Revisions,
    cancel: Arc<CancelSignal>,
) -> Stopped<S> {
    let wakeup = Arc::clone(&tail.wakeup);
    debug!(topic = %tail.topic, "hot delivery started");

    loop {
        // Register interest before draining so a publish racing with the
        // drain still wakes us.
        let notified = wakeup.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();

        let mut delivered = 0usize;
        let mut closed = false;
        while !cancel.is_cancelled() {
            match tail.consumer.next() {
                Polled::Ready(entry) => {
                    if revisions.covers(entry.actual) {
                        trace!(
                            topic = %tail.topic,
                            revision = %entry.actual,
                            "skipping already seen commit"
                        );
                        continue;
                    }
                    if let Err(err) = subscriber.on_committed(&entry) {
                        error!(
                            topic = %tail.topic,
                            revision = %entry.actual,
                            error = %err,
                            "subscriber failed"
                        );
                        if let Err(save_err) = subscriber.save_revisions(&revisions) {
                            error!(
                                topic = %tail.topic,
                                error = %save_err,
                                "saving revisions failed"
                            );
                        }
                        return Stopped {
                            subscriber,
                            revisions,
                            error: Some(err),
                        };
                    }
                    revisions.advance(entry.actual);
                    delivered += 1;
                }
                Polled::Empty => break,
                Polled::Closed => {
                    closed = true;
                    break;
                }
            }
        }

        if delivered > 0 {
            if let Err(err) = subscriber.save_revisions(&revisions) {
                error!(topic = %tail.topic, error = %err, "saving revisions failed");
                return Stopped {
                    subscriber,
                    revisions,
                    error: Some(err),
                };
            }
        }

        if closed || cancel.is_cancelled() {
            debug!(topic = %tail.topic, closed, "hot delivery stopped");
            return Stopped {
                subscriber,
                revisions,
                error: None,
            };
        }

        tokio::select! {
            _ = &mut notified => {}
            _ = cancel.notify.notified() => {}
        }
    }
}

/// One cold source and one hot source behind a single `subscribe`.
#[derive(Debug, Clone)]
pub struct SourcedLog<C, H> {
    cold: C,
    hot: H,
}

impl<C, H> SourcedLog<C, H>
where
    C: ColdSource,
    H: HotSource,
{
    /// Bind `cold` and `hot`.
    pub fn new(cold: C, hot: H) -> Self {
        Self { cold, hot }
    }

    /// Replay history from the subscriber's saved revisions, then continue
    /// with live commits. No commit is skipped or delivered twice at the
    /// switch.
    ///
    /// Must be called within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns the first error of registration or replay.
    pub async fn subscribe<S: Subscriber>(
        &self,
        topic: &str,
        mut subscriber: S,
    ) -> Result<Subscription<S>, LogError> {
        let tail = self.hot.open_tail(topic).await?;
        let from = subscriber.load_revisions();
        let until = tail.revisions().clone();
        let revisions = self
            .cold
            .load_range(topic, &mut subscriber, from, Some(until))
            .await?;
        debug!(topic = %topic, "cold replay finished, switching to hot delivery");
        Ok(tail.start(subscriber, revisions))
    }

    /// The cold half.
    pub fn cold(&self) -> &C {
        &self.cold
    }

    /// The hot half.
    pub fn hot(&self) -> &H {
        &self.hot
    }
}
