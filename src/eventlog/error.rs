//! Error types for the commit log.
//!
//! [`LogError`] covers every failure mode of the log: I/O, corrupt or
//! misaligned frames, closed resources, and errors raised by the actor,
//! queue, schema and reaction layers. Write conflicts are *not* errors;
//! they are reported as [`CommitResult::Conflict`](super::CommitResult).

use super::actor::ActorError;
use super::queue::QueueError;
use super::reaction::ReactionError;
use super::revision::Revision;
use super::schema::SchemaError;
use std::fmt;
use std::path::PathBuf;

/// Errors that can occur within the commit log.
#[derive(Debug)]
#[non_exhaustive]
pub enum LogError {
    /// An I/O error occurred while reading or writing partition files.
    Io {
        /// The underlying I/O error message.
        message: String,
        /// The file path involved, if known.
        path: Option<PathBuf>,
    },

    /// The requested starting revision is not a legal read position: it
    /// does not fall on a frame boundary, lies beyond the tail, or the bytes
    /// at that position do not begin with the commit delimiter.
    InvalidPosition {
        /// The revision that was requested.
        revision: Revision,
        /// Description of the positioning problem.
        message: String,
    },

    /// A partition file is structurally damaged (truncated frame, missing
    /// terminator, oversized length field).
    Corrupt {
        /// The partition file.
        path: PathBuf,
        /// Byte offset of the damaged frame.
        offset: u64,
        /// Description of the damage.
        message: String,
    },

    /// A single entry exceeds the configured maximum entry size.
    EntryTooLarge {
        /// Size of the offending entry in bytes.
        entry_bytes: usize,
        /// Configured limit in bytes.
        max_entry_bytes: usize,
    },

    /// The revision names a partition the topic does not have.
    InvalidPartition {
        /// The topic.
        topic: String,
        /// The requested partition.
        partition: u32,
        /// Number of partitions in the topic.
        partitions: u32,
    },

    /// The topic does not exist and the channel is not allowed to create it.
    UnknownTopic {
        /// The topic name.
        topic: String,
    },

    /// The operation is not permitted in the current state or configuration.
    InvalidOperation {
        /// Description of the error.
        message: String,
    },

    /// The configuration is inconsistent.
    InvalidConfig {
        /// Description of the problem.
        message: String,
    },

    /// The channel or topic has been closed.
    Closed {
        /// The topic that was closed, or the channel root.
        resource: String,
    },

    /// A subscriber rejected a delivered entry.
    Subscriber {
        /// The message reported by the subscriber.
        message: String,
    },

    /// Error raised by the resource actor.
    Actor(ActorError),

    /// Error raised by a fan-out queue.
    Queue(QueueError),

    /// Error raised by a schema codec.
    Schema(SchemaError),

    /// Error raised while encoding or decoding a reaction.
    Reaction(ReactionError),
}

impl fmt::Display for LogError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogError::Io { message, path } => {
                if let Some(p) = path {
                    write!(f, "log I/O error at {}: {message}", p.display())
                } else {
                    write!(f, "log I/O error: {message}")
                }
            }
            LogError::InvalidPosition { revision, message } => {
                write!(f, "invalid read position {revision}: {message}")
            }
            LogError::Corrupt {
                path,
                offset,
                message,
            } => {
                write!(
                    f,
                    "corrupt log frame in {} at byte {offset}: {message}",
                    path.display()
                )
            }
            LogError::EntryTooLarge {
                entry_bytes,
                max_entry_bytes,
            } => {
                write!(
                    f,
                    "log entry too large: {entry_bytes} bytes exceeds \
                     limit of {max_entry_bytes} bytes"
                )
            }
            LogError::InvalidPartition {
                topic,
                partition,
                partitions,
            } => {
                write!(
                    f,
                    "topic {topic} has {partitions} partitions, partition {partition} does not exist"
                )
            }
            LogError::UnknownTopic { topic } => write!(f, "unknown topic: {topic}"),
            LogError::InvalidOperation { message } => write!(f, "invalid operation: {message}"),
            LogError::InvalidConfig { message } => {
                write!(f, "invalid log configuration: {message}")
            }
            LogError::Closed { resource } => write!(f, "{resource} is closed"),
            LogError::Subscriber { message } => write!(f, "subscriber failed: {message}"),
            LogError::Actor(err) => write!(f, "actor error: {err}"),
            LogError::Queue(err) => write!(f, "queue error: {err}"),
            LogError::Schema(err) => write!(f, "schema error: {err}"),
            LogError::Reaction(err) => write!(f, "reaction error: {err}"),
        }
    }
}

impl std::error::Error for LogError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            LogError::Actor(err) => Some(err),
            LogError::Queue(err) => Some(err),
            LogError::Schema(err) => Some(err),
            LogError::Reaction(err) => Some(err),
            _ => None,
        }
    }
}

impl LogError {
    /// Wrap an I/O error together with the path it concerns.
    #[cold]
    pub(crate) fn io_at(err: std::io::Error, path: impl Into<PathBuf>) -> Self {
        LogError::Io {
            message: err.to_string(),
            path: Some(path.into()),
        }
    }

    /// Returns `true` for errors that mean the resource was closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        matches!(
            self,
            LogError::Closed { .. } | LogError::Actor(ActorError::Closed { .. })
        )
    }
}

impl From<std::io::Error> for LogError {
    #[cold]
    fn from(err: std::io::Error) -> Self {
        LogError::Io {
            message: err.to_string(),
            path: None,
        }
    }
}

impl From<ActorError> for LogError {
    fn from(err: ActorError) -> Self {
        LogError::Actor(err)
    }
}

impl From<QueueError> for LogError {
    fn from(err: QueueError) -> Self {
        LogError::Queue(err)
    }
}

impl From<SchemaError> for LogError {
    fn from(err: SchemaError) -> Self {
        LogError::Schema(err)
    }
}

impl From<ReactionError> for LogError {
    fn from(err: ReactionError) -> Self {
        LogError::Reaction(err)
    }
}
