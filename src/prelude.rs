/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 19/10/26
******************************************************************************/

//! Prelude module that re-exports commonly used types and traits.
//!
//! ```rust
//! use eventlog_rs::prelude::*;
//! ```

// Commit protocol
pub use crate::eventlog::revision::{Identifier, Revision, Revisions};
pub use crate::eventlog::types::{CommitResult, Committed, Uncommitted};

// Channels
pub use crate::eventlog::channel::file::FileChannel;
pub use crate::eventlog::channel::{
    ColdSource, HotSource, Sink, SourcedLog, Stopped, Subscriber, Subscription,
};

// Configuration and errors
pub use crate::eventlog::config::{FanoutConfig, LogConfig, OpenFlags};
pub use crate::eventlog::error::LogError;

// Command outcomes and schemas
pub use crate::eventlog::reaction::Reaction;
pub use crate::eventlog::schema::{
    Compatibility, FieldType, RecordSchema, Schema, SchemaCodec, check_evolution,
};

// Utility functions
pub use crate::utils::current_time_millis;
