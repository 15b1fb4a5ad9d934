//! Configuration of a file-backed log.

use super::actor::DEFAULT_ACTOR_MAILBOX;
use super::error::LogError;
use super::frame::{COMMIT_DELIMITER, MAX_FIELD_LEN};
use bitflags::bitflags;
use serde::{Deserialize, Serialize};

/// Default number of partitions per topic.
pub const DEFAULT_PARTITIONS: u32 = 1;

/// Default upper bound of a single entry (4 MiB).
pub const DEFAULT_MAX_ENTRY_BYTES: usize = 4 * 1024 * 1024;

/// Default upper bound of one read-only mapping (64 MiB).
pub const DEFAULT_MAX_MAP_BYTES: usize = 64 * 1024 * 1024;

/// Default ring capacity of the hot queue.
pub const DEFAULT_RING_CAPACITY: usize = 4096;

#[cfg(target_pointer_width = "32")]
const MAP_CEILING: usize = 1 << 30;
#[cfg(not(target_pointer_width = "32"))]
const MAP_CEILING: usize = isize::MAX as usize;

bitflags! {
    /// How partition files are opened.
    ///
    /// Files are never opened for random-access writes; without `APPEND`
    /// the channel is read-only.
    ///
    /// # Examples
    /// ```
    /// use eventlog_rs::OpenFlags;
    ///
    /// let read_only = OpenFlags::empty();
    /// let fast = OpenFlags::CREATE | OpenFlags::APPEND;
    /// assert!(!fast.contains(OpenFlags::DURABLE));
    /// assert!(OpenFlags::default().contains(OpenFlags::DURABLE));
    /// # let _ = read_only;
    /// ```
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct OpenFlags: u8 {
        /// Create topic directories and partition files that do not exist.
        const CREATE = 1 << 0;

        /// Allow appends.
        const APPEND = 1 << 1;

        /// Force every frame to stable storage before acknowledging it.
        const DURABLE = 1 << 2;
    }
}

impl Default for OpenFlags {
    fn default() -> Self {
        OpenFlags::CREATE | OpenFlags::APPEND | OpenFlags::DURABLE
    }
}

/// Backend of the hot fan-out queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FanoutConfig {
    /// Fixed-capacity ring, counted in committed units.
    Ring {
        /// Number of slots.
        capacity: usize,
    },
    /// One bounded mailbox per subscriber.
    Mailbox {
        /// Unread batches a subscriber may fall behind by.
        max_pending_batches: usize,
    },
}

impl Default for FanoutConfig {
    fn default() -> Self {
        FanoutConfig::Ring {
            capacity: DEFAULT_RING_CAPACITY,
        }
    }
}

/// Settings of a [`FileChannel`](super::FileChannel).
///
/// # Examples
/// ```
/// use eventlog_rs::{FanoutConfig, LogConfig};
///
/// let config = LogConfig::default()
///     .with_partitions(4)
///     .with_fanout(FanoutConfig::Mailbox { max_pending_batches: 64 });
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Partitions per topic.
    pub partitions: u32,
    /// Largest accepted key or entry, in bytes.
    pub max_entry_bytes: usize,
    /// Largest read-only mapping created for one cold read window.
    pub max_map_bytes: usize,
    /// Cut off a torn final frame on open instead of failing.
    pub repair_torn_tail: bool,
    /// Depth of each topic actor's submission queue.
    pub actor_mailbox: usize,
    /// Hot queue backend.
    pub fanout: FanoutConfig,
    /// File open behaviour.
    pub open_flags: OpenFlags,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            partitions: DEFAULT_PARTITIONS,
            max_entry_bytes: DEFAULT_MAX_ENTRY_BYTES,
            max_map_bytes: DEFAULT_MAX_MAP_BYTES,
            repair_torn_tail: true,
            actor_mailbox: DEFAULT_ACTOR_MAILBOX,
            fanout: FanoutConfig::default(),
            open_flags: OpenFlags::default(),
        }
    }
}

impl LogConfig {
    /// Parse a configuration from JSON. Missing fields take their defaults.
    ///
    /// # Errors
    ///
    /// Returns [`LogError::InvalidConfig`] if the JSON is malformed or the
    /// result fails [`validate`](Self::validate).
    pub fn from_json(json: &str) -> Result<Self, LogError> {
        let config: Self = serde_json::from_str(json).map_err(|e| LogError::InvalidConfig {
            message: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Sets the number of partitions per topic.
    #[must_use]
    pub fn with_partitions(mut self, partitions: u32) -> Self {
        self.partitions = partitions;
        self
    }

    /// Sets the largest accepted entry.
    #[must_use]
    pub fn with_max_entry_bytes(mut self, max_entry_bytes: usize) -> Self {
        self.max_entry_bytes = max_entry_bytes;
        self
    }

    /// Sets the largest read-only mapping.
    #[must_use]
    pub fn with_max_map_bytes(mut self, max_map_bytes: usize) -> Self {
        self.max_map_bytes = max_map_bytes;
        self
    }

    /// Sets whether a torn final frame is repaired on open.
    #[must_use]
    pub fn with_repair_torn_tail(mut self, repair: bool) -> Self {
        self.repair_torn_tail = repair;
        self
    }

    /// Sets the actor submission queue depth.
    #[must_use]
    pub fn with_actor_mailbox(mut self, depth: usize) -> Self {
        self.actor_mailbox = depth;
        self
    }

    /// Sets the hot queue backend.
    #[must_use]
    pub fn with_fanout(mut self, fanout: FanoutConfig) -> Self {
        self.fanout = fanout;
        self
    }

    /// Sets the file open flags.
    #[must_use]
    pub fn with_open_flags(mut self, flags: OpenFlags) -> Self {
        self.open_flags = flags;
        self
    }

    /// The mapping bound actually used: the configured value capped by the
    /// address space of the target.
    #[must_use]
    pub fn effective_max_map_bytes(&self) -> usize {
        self.max_map_bytes.min(MAP_CEILING)
    }

    /// Check the settings for consistency.
    ///
    /// # Errors
    ///
    /// Returns [`LogError::InvalidConfig`] describing the first problem.
    pub fn validate(&self) -> Result<(), LogError> {
        let invalid = |message: String| Err(LogError::InvalidConfig { message });

        if self.partitions == 0 {
            return invalid("partitions must be at least 1".to_string());
        }
        if self.max_entry_bytes == 0 || self.max_entry_bytes > MAX_FIELD_LEN {
            return invalid(format!(
                "max_entry_bytes must be between 1 and {MAX_FIELD_LEN}"
            ));
        }
        // A length equal to the delimiter would read as a terminator.
        if self.max_entry_bytes as u64 >= u64::from(COMMIT_DELIMITER) {
            return invalid("max_entry_bytes collides with the commit delimiter".to_string());
        }
        if self.effective_max_map_bytes() < self.max_entry_bytes {
            return invalid(format!(
                "max_map_bytes ({}) must be at least max_entry_bytes ({})",
                self.max_map_bytes, self.max_entry_bytes
            ));
        }
        if self.actor_mailbox == 0 {
            return invalid("actor_mailbox must be at least 1".to_string());
        }
        match self.fanout {
            FanoutConfig::Ring { capacity: 0 } => {
                invalid("ring capacity must be at least 1".to_string())
            }
            FanoutConfig::Mailbox {
                max_pending_batches: 0,
            } => invalid("max_pending_batches must be at least 1".to_string()),
            _ => Ok(()),
        }
    }
}
