//! Single-writer execution wrapper around one shared mutable resource.
//!
//! A [`ResourceActor`] owns its resource (a partition writer set, a remote
//! client handle, ...) on a dedicated worker thread. Callers submit units of
//! work as closures and await the result; the worker runs them one at a
//! time, in submission order. The resource itself never needs to be
//! `Sync` and no lock is exposed to callers.
//!
//! ```text
//!  caller ──execute(f)──▶ [ bounded mpsc ] ──▶ worker thread: f(&mut R)
//!     ▲                                               │
//!     └──────────────── oneshot result ◀──────────────┘
//! ```
//!
//! A unit that panics does not take the worker down: the panic is captured
//! into that unit's result as [`ActorError::Panicked`] and the next unit
//! runs normally.
//!
//! Closing runs one final teardown unit. Units still queued when the close
//! request is made fail with [`ActorError::Closed`], as does every later
//! submission.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, trace};

/// Default depth of the actor's submission queue.
pub const DEFAULT_ACTOR_MAILBOX: usize = 1024;

type Unit<R> = Box<dyn FnOnce(&mut R) + Send + 'static>;

enum Envelope<R> {
    Run(Unit<R>),
    Close {
        teardown: Unit<R>,
        done: oneshot::Sender<()>,
    },
}

/// Errors produced by a [`ResourceActor`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ActorError {
    /// The actor was closed before the unit could run.
    #[error("resource actor {name} is closed")]
    Closed {
        /// Name of the actor.
        name: String,
    },

    /// The unit panicked while running against the resource.
    #[error("unit of work on {name} panicked: {message}")]
    Panicked {
        /// Name of the actor.
        name: String,
        /// The panic payload, if it was a string.
        message: String,
    },

    /// The worker thread could not be started.
    #[error("failed to start worker for {name}: {message}")]
    Spawn {
        /// Name of the actor.
        name: String,
        /// The underlying error message.
        message: String,
    },
}

/// Serialized access to a resource of type `R`.
///
/// Cloning is not supported; share the actor behind an [`Arc`].
pub struct ResourceActor<R> {
    name: Arc<str>,
    tx: mpsc::Sender<Envelope<R>>,
    closing: Arc<AtomicBool>,
    completed: Arc<AtomicU64>,
}

impl<R> ResourceActor<R>
where
    R: Send + 'static,
{
    /// Spawn an actor owning `resource` with the default mailbox depth.
    ///
    /// # Errors
    ///
    /// Returns [`ActorError::Spawn`] if the worker thread cannot be created.
    pub fn spawn(name: &str, resource: R) -> Result<Self, ActorError> {
        Self::spawn_with_mailbox(name, resource, DEFAULT_ACTOR_MAILBOX)
    }

    /// Spawn an actor owning `resource`.
    ///
    /// `mailbox` bounds the number of queued units; submitters wait for
    /// room once it is full.
    ///
    /// # Errors
    ///
    /// Returns [`ActorError::Spawn`] if the worker thread cannot be created.
    pub fn spawn_with_mailbox(name: &str, resource: R, mailbox: usize) -> Result<Self, ActorError> {
        let (tx, rx) = mpsc::channel(mailbox.max(1));
        let name: Arc<str> = Arc::from(name);
        let closing = Arc::new(AtomicBool::new(false));
        let completed = Arc::new(AtomicU64::new(0));

        let worker = Worker {
            name: Arc::clone(&name),
            resource,
            rx,
            closing: Arc::clone(&closing),
            completed: Arc::clone(&completed),
        };

        std::thread::Builder::new()
            .name(format!("actor-{name}"))
            .spawn(move || worker.run())
            .map_err(|e| ActorError::Spawn {
                name: name.to_string(),
                message: e.to_string(),
            })?;

        Ok(Self {
            name,
            tx,
            closing,
            completed,
        })
    }

    /// Name given to the actor at spawn time.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns `true` once [`close`](Self::close) has been requested.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closing.load(Ordering::Acquire) || self.tx.is_closed()
    }

    /// Number of units that have finished running (including panicked ones).
    #[must_use]
    pub fn completed_units(&self) -> u64 {
        self.completed.load(Ordering::Relaxed)
    }

    fn closed_error(&self) -> ActorError {
        ActorError::Closed {
            name: self.name.to_string(),
        }
    }

    /// Run `f` with exclusive access to the resource and return its result.
    ///
    /// # Errors
    ///
    /// - [`ActorError::Closed`] if the actor is closed or closes before the
    ///   unit runs
    /// - [`ActorError::Panicked`] if `f` panics
    pub async fn execute<T, F>(&self, f: F) -> Result<T, ActorError>
    where
        T: Send + 'static,
        F: FnOnce(&mut R) -> T + Send + 'static,
    {
        if self.closing.load(Ordering::Acquire) {
            return Err(self.closed_error());
        }

        let (result_tx, result_rx) = oneshot::channel();
        let name = Arc::clone(&self.name);
        let unit: Unit<R> = Box::new(move |resource: &mut R| {
            let outcome = catch_unwind(AssertUnwindSafe(|| f(resource))).map_err(|payload| {
                let message = panic_message(payload.as_ref());
                error!(actor = %name, %message, "unit of work panicked");
                ActorError::Panicked {
                    name: name.to_string(),
                    message,
                }
            });
            // The caller may have stopped waiting; that is not an error here.
            let _ = result_tx.send(outcome);
        });

        self.tx
            .send(Envelope::Run(unit))
            .await
            .map_err(|_| self.closed_error())?;

        match result_rx.await {
            Ok(outcome) => outcome,
            // The worker dropped the unit without running it.
            Err(_) => Err(self.closed_error()),
        }
    }

    /// Side-effect-only variant of [`execute`](Self::execute).
    ///
    /// # Errors
    ///
    /// Same as [`execute`](Self::execute).
    pub async fn perform<F>(&self, f: F) -> Result<(), ActorError>
    where
        F: FnOnce(&mut R) + Send + 'static,
    {
        self.execute(f).await
    }

    /// Close the actor, running `teardown` as the final unit.
    ///
    /// Units still queued are dropped and their callers receive
    /// [`ActorError::Closed`]. Returns once `teardown` has run.
    ///
    /// # Errors
    ///
    /// Returns [`ActorError::Closed`] if the actor was already closed.
    pub async fn close<F>(&self, teardown: F) -> Result<(), ActorError>
    where
        F: FnOnce(&mut R) + Send + 'static,
    {
        if self.closing.swap(true, Ordering::AcqRel) {
            return Err(self.closed_error());
        }
        debug!(actor = %self.name, "closing resource actor");

        let (done_tx, done_rx) = oneshot::channel();
        self.tx
            .send(Envelope::Close {
                teardown: Box::new(teardown),
                done: done_tx,
            })
            .await
            .map_err(|_| self.closed_error())?;

        done_rx.await.map_err(|_| self.closed_error())
    }
}

impl<R> std::fmt::Debug for ResourceActor<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceActor")
            .field("name", &self.name)
            .field("closing", &self.closing.load(Ordering::Relaxed))
            .field("completed", &self.completed.load(Ordering::Relaxed))
            .finish()
    }
}

struct Worker<R> {
    name: Arc<str>,
    resource: R,
    rx: mpsc::Receiver<Envelope<R>>,
    closing: Arc<AtomicBool>,
    completed: Arc<AtomicU64>,
}

impl<R> Worker<R> {
    fn run(mut self) {
        debug!(actor = %self.name, "resource actor started");

        while let Some(envelope) = self.rx.blocking_recv() {
            match envelope {
                Envelope::Run(unit) => {
                    if self.closing.load(Ordering::Acquire) {
                        trace!(actor = %self.name, "dropping unit queued behind close");
                        continue;
                    }
                    unit(&mut self.resource);
                    self.completed.fetch_add(1, Ordering::Relaxed);
                }
                Envelope::Close { teardown, done } => {
                    if catch_unwind(AssertUnwindSafe(|| teardown(&mut self.resource))).is_err() {
                        error!(actor = %self.name, "teardown unit panicked");
                    }
                    self.completed.fetch_add(1, Ordering::Relaxed);
                    self.rx.close();
                    // Anything still buffered is refused; dropping a unit
                    // drops its result sender and fails the caller.
                    while self.rx.try_recv().is_ok() {}
                    let _ = done.send(());
                    break;
                }
            }
        }

        debug!(actor = %self.name, "resource actor stopped");
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
