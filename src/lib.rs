//! # Revisioned Commit Log for Event Sourcing
//!
//! An append-only, partitioned commit log. Writers append with optimistic
//! concurrency: every attempt names the revision it believes is the tail of
//! its partition, and the log either commits it or reports the real tail.
//! Readers see the same entries through two channels:
//!
//! - **Cold**: replay of durable history from a saved position
//! - **Hot**: live fan-out of entries as they are committed
//!
//! A [`SourcedLog`] stitches both together so a subscriber replays history
//! and then follows the live tail without gaps or duplicates at the switch.
//!
//! ## Key Features
//!
//! - **Optimistic Concurrency**: an append succeeds only when its expected
//!   revision equals the partition tail; losers get a
//!   [`CommitResult::Conflict`] carrying the true tail.
//!
//! - **Single Writer per Topic**: every topic's files are owned by a
//!   [`ResourceActor`], a dedicated thread running submitted units of work
//!   one at a time.
//!
//! - **Lock-Free Reads**: cold readers locate frames through a
//!   `crossbeam-skiplist` index and read them through bounded read-only
//!   memory maps, never touching the writer.
//!
//! - **Two Fan-Out Backends**: a disruptor-style ring with per-consumer
//!   cursors, or one bounded mailbox per consumer. Both deliver every
//!   published value to every registered consumer in publish order.
//!
//! - **Crash Recovery**: partition files are rescanned on open; a final
//!   frame cut short by a crash is detected and repaired.
//!
//! - **Schema Evolution**: schema-tagged payloads with reader/writer
//!   compatibility checks, inline or through a registry.
//!
//! ## On-Disk Layout
//!
//! ```text
//! <root>/<topic>/partition-00000.log
//!
//! frame := [4: 0xFEEDC0DE][8: id hi][8: id lo][8: timestamp ms]
//!          [4: key len][key] ([4: entry len][entry])* [4: 0xFEEDC0DE]
//! ```
//!
//! All integers are little-endian. Offsets count entries, so a commit of
//! `n` entries at offset `o` moves the tail to `o + n`.
//!
//! ## Example
//!
//! ```no_run
//! use eventlog_rs::prelude::*;
//!
//! struct Printer {
//!     seen: Revisions,
//! }
//!
//! impl Subscriber for Printer {
//!     fn on_committed(&mut self, entry: &Committed) -> Result<(), LogError> {
//!         println!("{} -> {} entries", entry.actual, entry.entries.len());
//!         Ok(())
//!     }
//!
//!     fn load_revisions(&mut self) -> Revisions {
//!         self.seen.clone()
//!     }
//!
//!     fn save_revisions(&mut self, revisions: &Revisions) -> Result<(), LogError> {
//!         self.seen = revisions.clone();
//!         Ok(())
//!     }
//! }
//!
//! # async fn run() -> Result<(), LogError> {
//! let log = FileChannel::open("/tmp/eventlog-demo", LogConfig::default())?;
//! let attempt = Uncommitted::from_slices(b"cart-7", &[b"item-added"], Revision::origin(0));
//! log.try_send("carts", attempt).await?;
//!
//! let subscription = log
//!     .sourced()
//!     .subscribe("carts", Printer { seen: Revisions::new() })
//!     .await?;
//! subscription.stop().await?;
//! log.close().await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Delivery Guarantees
//!
//! Delivery is at-least-once. A subscriber's revisions advance only after
//! its `on_committed` returns `Ok` and are saved after every delivered
//! batch; after a crash, entries past the last save are delivered again.

pub mod eventlog;

pub mod prelude;
mod utils;

pub use eventlog::{
    ActorError, ColdSource, CommitResult, Committed, Compatibility, FanoutConfig, FanoutQueue,
    FieldSchema, FieldType, FileChannel, Fingerprint, HotSource, HotTail, Identifier,
    InlineSchemaCodec, LogConfig, LogError, MemorySchemaRegistry, OpenFlags, Polled,
    PublishRejected, QueueConsumer, QueueError, Reaction, ReactionError, RecordSchema,
    RegistrySchemaCodec, ResourceActor, Revision, Revisions, Schema, SchemaCodec, SchemaError,
    SchemaRegistry, Sink, SourcedLog, Stopped, Subscriber, Subscription, Transaction, Uncommitted,
    check_evolution,
};
pub use utils::current_time_millis;
