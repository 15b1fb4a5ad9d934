//! Causal identity and log positions.
//!
//! - [`Identifier`]: two 64-bit halves naming one committed unit
//! - [`Revision`]: a position (partition, entry offset) inside one log
//! - [`Revisions`]: one [`Revision`] per partition, used as a consumer
//!   checkpoint and as the tail snapshot of a topic
//!
//! # Binary Encoding (little-endian)
//!
//! ```text
//! Revision:  [4 bytes: partition][8 bytes: offset]
//! Revisions: [4 bytes: count]([4 bytes: partition][8 bytes: offset])*
//! ```

use bytes::{Buf, BufMut};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Encoded size of a [`Revision`] in bytes.
pub const REVISION_ENCODED_SIZE: usize = 4 + 8;

/// Causal identity of a committed unit.
///
/// Immutable once created. New identifiers are drawn from a random v4 UUID
/// so that independent writers never collide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Identifier {
    /// High 64 bits.
    pub hi: u64,
    /// Low 64 bits.
    pub lo: u64,
}

impl Identifier {
    /// Build an identifier from its two halves.
    #[must_use]
    #[inline]
    pub const fn new(hi: u64, lo: u64) -> Self {
        Self { hi, lo }
    }

    /// Generate a fresh random identifier.
    #[must_use]
    pub fn generate() -> Self {
        let (hi, lo) = uuid::Uuid::new_v4().as_u64_pair();
        Self { hi, lo }
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}{:016x}", self.hi, self.lo)
    }
}

/// A position within one partition of one log.
///
/// `offset` counts entries, not bytes: a commit of `n` entries starting at
/// offset `o` moves the partition tail to `o + n`.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Revision {
    /// Partition index.
    pub partition: u32,
    /// Entry offset within the partition.
    pub offset: u64,
}

impl Revision {
    /// Build a revision.
    #[must_use]
    #[inline]
    pub const fn new(partition: u32, offset: u64) -> Self {
        Self { partition, offset }
    }

    /// The start of a partition.
    #[must_use]
    #[inline]
    pub const fn origin(partition: u32) -> Self {
        Self {
            partition,
            offset: 0,
        }
    }

    /// Returns this revision moved forward by `entries` entries.
    #[must_use]
    #[inline]
    pub const fn advanced_by(self, entries: u64) -> Self {
        Self {
            partition: self.partition,
            offset: self.offset.saturating_add(entries),
        }
    }

    /// Append the binary form to `buf`.
    pub fn encode(&self, buf: &mut impl BufMut) {
        buf.put_u32_le(self.partition);
        buf.put_u64_le(self.offset);
    }

    /// Read a revision from `buf`, or `None` if fewer than
    /// [`REVISION_ENCODED_SIZE`] bytes remain.
    pub fn decode(buf: &mut impl Buf) -> Option<Self> {
        if buf.remaining() < REVISION_ENCODED_SIZE {
            return None;
        }
        let partition = buf.get_u32_le();
        let offset = buf.get_u64_le();
        Some(Self { partition, offset })
    }
}

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.partition, self.offset)
    }
}

/// A vector of revisions, one per partition.
///
/// Partition keys are unique. Advancing never moves a partition backwards.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Revisions {
    positions: BTreeMap<u32, u64>,
}

impl Revisions {
    /// An empty checkpoint: every partition starts at offset zero.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the revision held for `partition`, defaulting to its origin.
    #[must_use]
    pub fn get(&self, partition: u32) -> Revision {
        Revision::new(
            partition,
            self.positions.get(&partition).copied().unwrap_or(0),
        )
    }

    /// Returns `true` if a revision is explicitly recorded for `partition`.
    #[must_use]
    pub fn contains(&self, partition: u32) -> bool {
        self.positions.contains_key(&partition)
    }

    /// Record `revision`, replacing whatever was held for its partition.
    pub fn set(&mut self, revision: Revision) {
        self.positions.insert(revision.partition, revision.offset);
    }

    /// Move the partition of `revision` forward to it. Older revisions are
    /// ignored.
    pub fn advance(&mut self, revision: Revision) {
        let slot = self.positions.entry(revision.partition).or_insert(0);
        if revision.offset > *slot {
            *slot = revision.offset;
        }
    }

    /// Returns `true` if `revision` is at or behind the recorded position,
    /// i.e. everything up to it has already been seen.
    #[must_use]
    pub fn covers(&self, revision: Revision) -> bool {
        self.get(revision.partition).offset >= revision.offset
    }

    /// Number of partitions recorded.
    #[must_use]
    pub fn len(&self) -> usize {
        self.positions.len()
    }

    /// Returns `true` if no partition is recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// Iterate over the recorded revisions in partition order.
    pub fn iter(&self) -> impl Iterator<Item = Revision> + '_ {
        self.positions
            .iter()
            .map(|(&partition, &offset)| Revision::new(partition, offset))
    }

    /// Append the count-prefixed binary form to `buf`.
    pub fn encode(&self, buf: &mut impl BufMut) {
        let count = u32::try_from(self.positions.len()).unwrap_or(u32::MAX);
        buf.put_u32_le(count);
        for revision in self.iter().take(count as usize) {
            revision.encode(buf);
        }
    }

    /// Read a count-prefixed revision vector, or `None` if `buf` is short.
    pub fn decode(buf: &mut impl Buf) -> Option<Self> {
        if buf.remaining() < 4 {
            return None;
        }
        let count = buf.get_u32_le() as usize;
        if buf.remaining() < count.checked_mul(REVISION_ENCODED_SIZE)? {
            return None;
        }
        let mut revisions = Self::new();
        for _ in 0..count {
            revisions.set(Revision::decode(buf)?);
        }
        Some(revisions)
    }
}

impl FromIterator<Revision> for Revisions {
    fn from_iter<I: IntoIterator<Item = Revision>>(iter: I) -> Self {
        let mut revisions = Self::new();
        for revision in iter {
            revisions.set(revision);
        }
        revisions
    }
}
