//! Outcome of evaluating a command against current state.
//!
//! # Wire Format (little-endian)
//!
//! ```text
//! Accepted: [1 byte: 0][4 bytes: event count](event)*
//! Rejected: [1 byte: 1][4 bytes: reason length][UTF-8 reason]
//! ```
//!
//! Events are written and read by caller-supplied callbacks, since their
//! encoding depends on the event schema.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

/// Tag byte of [`Reaction::Accepted`].
pub const TAG_ACCEPTED: u8 = 0;

/// Tag byte of [`Reaction::Rejected`].
pub const TAG_REJECTED: u8 = 1;

/// Errors raised while encoding or decoding a [`Reaction`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReactionError {
    /// The tag byte is neither accepted nor rejected.
    #[error("unknown reaction tag {tag}")]
    UnknownTag {
        /// The tag that was read.
        tag: u8,
    },

    /// The buffer ended before the reaction was complete.
    #[error("reaction truncated: needed {needed} bytes, {remaining} remaining")]
    Truncated {
        /// Bytes required by the next field.
        needed: usize,
        /// Bytes left in the buffer.
        remaining: usize,
    },

    /// The rejection reason is not valid UTF-8.
    #[error("rejection reason is not valid UTF-8")]
    InvalidReason,

    /// A sequence or string is too long for its length prefix.
    #[error("{what} of length {len} does not fit a 32-bit length prefix")]
    TooLong {
        /// What was being written.
        what: &'static str,
        /// The offending length.
        len: usize,
    },

    /// The event callback failed.
    #[error("event codec failed: {message}")]
    Event {
        /// The message reported by the callback.
        message: String,
    },
}

/// Result of applying a command: events produced, or a reason it was
/// refused.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Reaction<E> {
    /// The command was accepted and produced these events, in order.
    Accepted(Vec<E>),
    /// The command was refused.
    Rejected(String),
}

impl<E> Reaction<E> {
    /// Build a rejection.
    pub fn rejected(reason: impl Into<String>) -> Self {
        Reaction::Rejected(reason.into())
    }

    /// Returns `true` for [`Reaction::Accepted`].
    #[must_use]
    pub fn is_accepted(&self) -> bool {
        matches!(self, Reaction::Accepted(_))
    }

    /// The produced events, or an empty slice for a rejection.
    #[must_use]
    pub fn events(&self) -> &[E] {
        match self {
            Reaction::Accepted(events) => events,
            Reaction::Rejected(_) => &[],
        }
    }

    /// Collapse both cases into one value.
    pub fn fold<T>(
        self,
        accepted: impl FnOnce(Vec<E>) -> T,
        rejected: impl FnOnce(String) -> T,
    ) -> T {
        match self {
            Reaction::Accepted(events) => accepted(events),
            Reaction::Rejected(reason) => rejected(reason),
        }
    }

    /// Map every event, keeping the outcome.
    pub fn map<F>(self, f: impl FnMut(E) -> F) -> Reaction<F> {
        match self {
            Reaction::Accepted(events) => Reaction::Accepted(events.into_iter().map(f).collect()),
            Reaction::Rejected(reason) => Reaction::Rejected(reason),
        }
    }

    /// Append the wire form to `buf`, writing each event with `write_event`.
    ///
    /// # Errors
    ///
    /// Returns [`ReactionError::TooLong`] if a count or reason exceeds the
    /// 32-bit prefix, or the error of `write_event`.
    pub fn encode<W>(&self, buf: &mut BytesMut, mut write_event: W) -> Result<(), ReactionError>
    where
        W: FnMut(&E, &mut BytesMut) -> Result<(), ReactionError>,
    {
        match self {
            Reaction::Accepted(events) => {
                let count = u32::try_from(events.len()).map_err(|_| ReactionError::TooLong {
                    what: "event sequence",
                    len: events.len(),
                })?;
                buf.put_u8(TAG_ACCEPTED);
                buf.put_u32_le(count);
                for event in events {
                    write_event(event, buf)?;
                }
            }
            Reaction::Rejected(reason) => {
                let len = u32::try_from(reason.len()).map_err(|_| ReactionError::TooLong {
                    what: "rejection reason",
                    len: reason.len(),
                })?;
                buf.put_u8(TAG_REJECTED);
                buf.put_u32_le(len);
                buf.put_slice(reason.as_bytes());
            }
        }
        Ok(())
    }

    /// Read one reaction from `buf`, reading each event with `read_event`.
    ///
    /// # Errors
    ///
    /// - [`ReactionError::UnknownTag`] for a tag other than 0 or 1
    /// - [`ReactionError::Truncated`] if `buf` ends early
    /// - [`ReactionError::InvalidReason`] for a non-UTF-8 reason
    /// - the error of `read_event`
    pub fn decode<R>(buf: &mut Bytes, mut read_event: R) -> Result<Self, ReactionError>
    where
        R: FnMut(&mut Bytes) -> Result<E, ReactionError>,
    {
        ensure(buf, 1)?;
        match buf.get_u8() {
            TAG_ACCEPTED => {
                ensure(buf, 4)?;
                let count = buf.get_u32_le() as usize;
                // A corrupt count must not drive the allocation.
                let mut events = Vec::with_capacity(count.min(buf.remaining()));
                for _ in 0..count {
                    events.push(read_event(buf)?);
                }
                Ok(Reaction::Accepted(events))
            }
            TAG_REJECTED => {
                ensure(buf, 4)?;
                let len = buf.get_u32_le() as usize;
                ensure(buf, len)?;
                let raw = buf.split_to(len);
                let reason =
                    String::from_utf8(raw.to_vec()).map_err(|_| ReactionError::InvalidReason)?;
                Ok(Reaction::Rejected(reason))
            }
            tag => Err(ReactionError::UnknownTag { tag }),
        }
    }
}

/// Length-prefixed byte events, the encoding used when events are opaque
/// payloads.
impl Reaction<Bytes> {
    /// Encode with each event written as `[4 bytes: len][bytes]`.
    ///
    /// # Errors
    ///
    /// Same as [`Reaction::encode`].
    pub fn encode_bytes(&self, buf: &mut BytesMut) -> Result<(), ReactionError> {
        self.encode(buf, |event, out| {
            let len = u32::try_from(event.len()).map_err(|_| ReactionError::TooLong {
                what: "event",
                len: event.len(),
            })?;
            out.put_u32_le(len);
            out.put_slice(event);
            Ok(())
        })
    }

    /// Decode the form written by [`encode_bytes`](Self::encode_bytes).
    ///
    /// # Errors
    ///
    /// Same as [`Reaction::decode`].
    pub fn decode_bytes(buf: &mut Bytes) -> Result<Self, ReactionError> {
        Self::decode(buf, |input| {
            ensure(input, 4)?;
            let len = input.get_u32_le() as usize;
            ensure(input, len)?;
            Ok(input.split_to(len))
        })
    }
}

#[inline]
fn ensure(buf: &Bytes, needed: usize) -> Result<(), ReactionError> {
    if buf.remaining() < needed {
        return Err(ReactionError::Truncated {
            needed,
            remaining: buf.remaining(),
        });
    }
    Ok(())
}
