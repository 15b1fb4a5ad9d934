//! Append-only, revisioned commit log.

pub mod actor;
/// File-backed and abstract channels.
pub mod channel;
pub mod config;
pub mod error;
/// Binary commit frame.
pub mod frame;
/// Concurrent single-producer fan-out queues.
pub mod queue;
pub mod reaction;
pub mod revision;
pub mod schema;
pub mod types;

pub use actor::{ActorError, DEFAULT_ACTOR_MAILBOX, ResourceActor};
pub use channel::file::FileChannel;
pub use channel::{
    ColdSource, HotSource, HotTail, Sink, SourcedLog, Stopped, Subscriber, Subscription,
};
pub use config::{FanoutConfig, LogConfig, OpenFlags};
pub use error::LogError;
pub use queue::{FanoutQueue, Polled, PublishRejected, QueueConsumer, QueueError, Transaction};
pub use reaction::{Reaction, ReactionError};
pub use revision::{Identifier, Revision, Revisions};
pub use schema::{
    Compatibility, FieldSchema, FieldType, Fingerprint, InlineSchemaCodec, MemorySchemaRegistry,
    RecordSchema, RegistrySchemaCodec, Schema, SchemaCodec, SchemaError, SchemaRegistry,
    check_evolution,
};
pub use types::{CommitResult, Committed, Uncommitted};
