//! Binary commit frame.
//!
//! One frame is written per committed unit, as a contiguous run of fixed
//! and length-prefixed fields.
//!
//! # On-Disk Frame Format (little-endian)
//!
//! ```text
//! [4 bytes: delimiter][8 bytes: id_hi][8 bytes: id_lo][8 bytes: timestamp_ms]
//! [4 bytes: key_len][key bytes]
//! ([4 bytes: entry_len][entry bytes])*
//! [4 bytes: delimiter]
//! ```
//!
//! - The first length-prefixed field is the commit key; the remaining ones
//!   are the entries.
//! - The terminator is a length field equal to [`COMMIT_DELIMITER`]. Field
//!   lengths are bounded well below the delimiter, so the sentinel can never
//!   be mistaken for a real length.
//! - A reader rejects any frame whose first four bytes are not the
//!   delimiter.

use super::revision::Identifier;
use bytes::{BufMut, Bytes};

/// Marker opening every frame and terminating its field list.
pub const COMMIT_DELIMITER: u32 = 0xFEED_C0DE;

/// Size of the fixed frame header in bytes.
///
/// Layout: `[4 bytes delimiter][8 bytes id_hi][8 bytes id_lo][8 bytes timestamp_ms]`
pub const FRAME_HEADER_SIZE: usize = 4 + 8 + 8 + 8;

/// Size of the length prefix in front of every field.
pub const FIELD_PREFIX_SIZE: usize = 4;

/// Size of the terminating delimiter in bytes.
pub const FRAME_TRAILER_SIZE: usize = 4;

/// Hard upper bound for a single field. Configured limits are clamped to it.
pub const MAX_FIELD_LEN: usize = 1 << 30;

/// Location summary of a frame, as produced by [`measure`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameSpan {
    /// Total encoded length in bytes, delimiter and terminator included.
    pub len: usize,
    /// Number of entries (the key is not counted).
    pub entries: usize,
}

/// A fully decoded frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Commit identity.
    pub id: Identifier,
    /// Commit time in milliseconds since the Unix epoch.
    pub timestamp_ms: u64,
    /// Commit key.
    pub key: Bytes,
    /// Committed entries.
    pub entries: Vec<Bytes>,
}

/// Reasons a byte range is not a valid frame.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    /// The first four bytes are not [`COMMIT_DELIMITER`].
    #[error("frame does not begin with the commit delimiter (found {found:#010x})")]
    BadDelimiter {
        /// The value found instead.
        found: u32,
    },

    /// The data ends before the frame terminator.
    #[error("frame is incomplete: data ends after {available} bytes")]
    Incomplete {
        /// Bytes available when the data ran out.
        available: usize,
    },

    /// The frame carries no key field.
    #[error("frame has no key field")]
    MissingKey,

    /// A length field exceeds the allowed maximum.
    #[error("field of {len} bytes exceeds limit of {max} bytes")]
    FieldTooLarge {
        /// The length read from the frame.
        len: usize,
        /// The limit in force.
        max: usize,
    },
}

/// Encoded size of a frame holding `key` and `entries`.
#[must_use]
pub fn encoded_len(key: &[u8], entries: &[Bytes]) -> usize {
    let fields: usize = entries
        .iter()
        .map(|e| FIELD_PREFIX_SIZE.saturating_add(e.len()))
        .fold(0usize, usize::saturating_add);
    FRAME_HEADER_SIZE
        .saturating_add(FIELD_PREFIX_SIZE)
        .saturating_add(key.len())
        .saturating_add(fields)
        .saturating_add(FRAME_TRAILER_SIZE)
}

/// Append one frame to `buf`.
///
/// Field lengths must already have been validated against
/// [`MAX_FIELD_LEN`]; the log checks them against its configured entry limit
/// before encoding.
pub fn encode(
    buf: &mut impl BufMut,
    id: Identifier,
    timestamp_ms: u64,
    key: &[u8],
    entries: &[Bytes],
) {
    buf.put_u32_le(COMMIT_DELIMITER);
    buf.put_u64_le(id.hi);
    buf.put_u64_le(id.lo);
    buf.put_u64_le(timestamp_ms);
    put_field(buf, key);
    for entry in entries {
        put_field(buf, entry);
    }
    buf.put_u32_le(COMMIT_DELIMITER);
}

#[inline]
fn put_field(buf: &mut impl BufMut, field: &[u8]) {
    // Callers bound field sizes by MAX_FIELD_LEN, which fits in u32.
    buf.put_u32_le(field.len() as u32);
    buf.put_slice(field);
}

#[inline]
fn read_u32(data: &[u8], at: usize) -> Option<u32> {
    let bytes = data.get(at..at.checked_add(4)?)?;
    Some(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

#[inline]
fn read_u64(data: &[u8], at: usize) -> Option<u64> {
    let bytes = data.get(at..at.checked_add(8)?)?;
    let mut raw = [0u8; 8];
    raw.copy_from_slice(bytes);
    Some(u64::from_le_bytes(raw))
}

/// Walk the frame at the start of `data` without copying it.
///
/// # Errors
///
/// - [`FrameError::BadDelimiter`] if `data` does not start with a frame
/// - [`FrameError::Incomplete`] if `data` ends inside the frame
/// - [`FrameError::FieldTooLarge`] if a length exceeds `max_field`
/// - [`FrameError::MissingKey`] if the frame terminates before its key
pub fn measure(data: &[u8], max_field: usize) -> Result<FrameSpan, FrameError> {
    let available = data.len();
    let delimiter = read_u32(data, 0).ok_or(FrameError::Incomplete { available })?;
    if delimiter != COMMIT_DELIMITER {
        return Err(FrameError::BadDelimiter { found: delimiter });
    }
    if available < FRAME_HEADER_SIZE {
        return Err(FrameError::Incomplete { available });
    }

    let max_field = max_field.min(MAX_FIELD_LEN);
    let mut pos = FRAME_HEADER_SIZE;
    let mut fields = 0usize;
    loop {
        let len = read_u32(data, pos).ok_or(FrameError::Incomplete { available })?;
        pos += FIELD_PREFIX_SIZE;
        if len == COMMIT_DELIMITER {
            break;
        }
        let len = len as usize;
        if len > max_field {
            return Err(FrameError::FieldTooLarge {
                len,
                max: max_field,
            });
        }
        pos = pos
            .checked_add(len)
            .filter(|end| *end <= available)
            .ok_or(FrameError::Incomplete { available })?;
        fields = fields.saturating_add(1);
    }

    if fields == 0 {
        return Err(FrameError::MissingKey);
    }
    Ok(FrameSpan {
        len: pos,
        entries: fields - 1,
    })
}

/// Decode the frame at the start of `data`, copying key and entries out.
///
/// # Errors
///
/// Same conditions as [`measure`].
pub fn decode(data: &[u8], max_field: usize) -> Result<(Frame, FrameSpan), FrameError> {
    let span = measure(data, max_field)?;
    let available = data.len();
    let incomplete = || FrameError::Incomplete { available };

    let hi = read_u64(data, 4).ok_or_else(incomplete)?;
    let lo = read_u64(data, 12).ok_or_else(incomplete)?;
    let timestamp_ms = read_u64(data, 20).ok_or_else(incomplete)?;

    let mut pos = FRAME_HEADER_SIZE;
    let mut fields = Vec::with_capacity(span.entries.saturating_add(1));
    // measure() already proved every field fits and the terminator exists.
    while let Some(len) = read_u32(data, pos) {
        pos += FIELD_PREFIX_SIZE;
        if len == COMMIT_DELIMITER {
            break;
        }
        let end = pos + len as usize;
        let field = data.get(pos..end).ok_or_else(incomplete)?;
        fields.push(Bytes::copy_from_slice(field));
        pos = end;
    }

    let mut fields = fields.into_iter();
    let key = fields.next().ok_or(FrameError::MissingKey)?;
    Ok((
        Frame {
            id: Identifier::new(hi, lo),
            timestamp_ms,
            key,
            entries: fields.collect(),
        },
        span,
    ))
}
