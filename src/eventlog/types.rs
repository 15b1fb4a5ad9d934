//! Core types of the commit protocol.
//!
//! A writer builds an [`Uncommitted`] attempt, submits it through a
//! [`Sink`](super::channel::Sink) and receives a [`CommitResult`]. On
//! success the log creates exactly one [`Committed`] entry; that is the only
//! form readers ever see, through cold replay or hot subscription.
//!
//! Keys and values default to raw [`Bytes`]; typed layers decode them with a
//! [`SchemaCodec`](super::schema::SchemaCodec).

use super::revision::{Identifier, Revision};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// A proposed append.
///
/// `expected` is the revision the writer believes is the current tail of
/// the target partition. The append succeeds only if the log agrees.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Uncommitted<K = Bytes, V = Bytes> {
    /// Key of the committed unit (for example an aggregate id).
    pub key: K,
    /// Entries to append, in order.
    pub entries: Vec<V>,
    /// Partition and offset the writer believes is the tail.
    pub expected: Revision,
}

impl<K, V> Uncommitted<K, V> {
    /// Create a new append attempt.
    pub fn new(key: K, entries: Vec<V>, expected: Revision) -> Self {
        Self {
            key,
            entries,
            expected,
        }
    }

    /// Number of entries in the attempt.
    #[must_use]
    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if the attempt carries no entries.
    #[must_use]
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Uncommitted<Bytes, Bytes> {
    /// Convenience constructor copying byte slices.
    pub fn from_slices(key: &[u8], entries: &[&[u8]], expected: Revision) -> Self {
        Self {
            key: Bytes::copy_from_slice(key),
            entries: entries.iter().map(|e| Bytes::copy_from_slice(e)).collect(),
            expected,
        }
    }
}

/// A durable, ordered log entry. Immutable once written.
///
/// `expected` is where the writer believed the tail was; `actual` is the
/// tail right after this commit, so `actual.offset - expected.offset` is
/// the number of entries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Committed<K = Bytes, V = Bytes> {
    /// Causal identity of the commit.
    pub id: Identifier,
    /// Wall-clock time of the commit in milliseconds since the Unix epoch.
    pub timestamp_ms: u64,
    /// Key of the committed unit.
    pub key: K,
    /// Committed entries, in order.
    pub entries: Vec<V>,
    /// Revision of the partition tail after this commit.
    pub actual: Revision,
    /// Revision the writer held when it submitted the attempt.
    pub expected: Revision,
}

impl<K, V> Committed<K, V> {
    /// The partition this entry belongs to.
    #[must_use]
    #[inline]
    pub fn partition(&self) -> u32 {
        self.actual.partition
    }

    /// Number of entries in the commit.
    #[must_use]
    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if the commit carries no entries.
    #[must_use]
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Transform key and entries, keeping identity and positions.
    ///
    /// Used by typed layers to decode raw payloads.
    pub fn try_map<K2, V2, E>(
        self,
        mut key: impl FnMut(K) -> Result<K2, E>,
        mut entry: impl FnMut(V) -> Result<V2, E>,
    ) -> Result<Committed<K2, V2>, E> {
        let entries = self
            .entries
            .into_iter()
            .map(&mut entry)
            .collect::<Result<Vec<_>, E>>()?;
        Ok(Committed {
            id: self.id,
            timestamp_ms: self.timestamp_ms,
            key: key(self.key)?,
            entries,
            actual: self.actual,
            expected: self.expected,
        })
    }
}

/// Outcome of an append attempt. Exactly one of success or conflict.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitResult<K = Bytes, V = Bytes> {
    /// The attempt was appended.
    Committed(Arc<Committed<K, V>>),

    /// The expected revision did not match the partition tail. Nothing was
    /// written.
    Conflict {
        /// The revision the writer expected.
        expected: Revision,
        /// The true tail of the partition.
        actual: Revision,
    },
}

impl<K, V> CommitResult<K, V> {
    /// Returns `true` if the attempt was appended.
    #[must_use]
    #[inline]
    pub fn is_committed(&self) -> bool {
        matches!(self, CommitResult::Committed(_))
    }

    /// Returns `true` if the attempt lost the optimistic-concurrency race.
    #[must_use]
    #[inline]
    pub fn is_conflict(&self) -> bool {
        matches!(self, CommitResult::Conflict { .. })
    }

    /// The committed entry, if any.
    #[must_use]
    pub fn committed(&self) -> Option<&Arc<Committed<K, V>>> {
        match self {
            CommitResult::Committed(committed) => Some(committed),
            CommitResult::Conflict { .. } => None,
        }
    }

    /// The partition tail after the attempt resolved: the new tail on
    /// success, the true tail on conflict.
    #[must_use]
    pub fn actual(&self) -> Revision {
        match self {
            CommitResult::Committed(committed) => committed.actual,
            CommitResult::Conflict { actual, .. } => *actual,
        }
    }
}
