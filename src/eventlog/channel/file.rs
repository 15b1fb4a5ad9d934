//! File-backed commit log.
//!
//! [`FileChannel`] stores each topic as a directory of append-only
//! partition files, one [frame](crate::eventlog::frame) per commit:
//!
//! ```text
//! <root>/<topic>/partition-00000.log
//! <root>/<topic>/partition-00001.log
//! ```
//!
//! # Writes
//!
//! Every topic owns one [`ResourceActor`] holding its partition files. An
//! append checks the expected revision against the partition tail, writes
//! the frame with a single append, forces it to disk when
//! [`OpenFlags::DURABLE`] is set, records it in the partition index and
//! publishes the commit to the topic's hot queue, all inside one actor
//! unit.
//!
//! # Reads
//!
//! Cold reads never go through the actor. A lock-free index
//! (`SkipMap<start offset, frame location>`) per partition tells a reader
//! where each frame lives; the bytes are read through a read-only mapping
//! covering at most [`LogConfig::max_map_bytes`] per window. A frame is
//! indexed only after it is fully written, so readers never see a partial
//! commit.
//!
//! # Recovery
//!
//! Opening a topic scans every partition file. A final frame cut short by
//! a crash, or a run of zero bytes after the last whole frame, is a torn
//! write and is truncated when [`LogConfig::repair_torn_tail`] is set; any
//! other damage fails the open.

use super::{ColdSource, HotSource, HotTail, Sink, SourcedLog, Subscriber};
use crate::eventlog::actor::{ActorError, ResourceActor};
use crate::eventlog::config::{LogConfig, OpenFlags};
use crate::eventlog::error::LogError;
use crate::eventlog::frame::{self, FrameError};
use crate::eventlog::queue::{self, FanoutQueue, QueueError, Transaction};
use crate::eventlog::revision::{Identifier, Revision, Revisions};
use crate::eventlog::types::{CommitResult, Committed, Uncommitted};
use crate::utils::current_time_millis;
use bytes::BytesMut;
use crossbeam_skiplist::SkipMap;
use dashmap::DashMap;
use memmap2::{Mmap, MmapOptions};
use std::fs::{self, File, OpenOptions};
use std::future::Future;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::Notify;
use tracing::{debug, error, info, trace, warn};

/// Commits read per step of a cold replay.
const REPLAY_CHUNK: usize = 256;

/// Location of one frame inside a partition file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FrameLoc {
    /// Byte position of the frame's delimiter.
    pos: u64,
    /// Encoded length in bytes.
    len: u64,
    /// Entries in the frame.
    entries: u64,
}

/// Shared, lock-free view of one partition. Written only by the topic
/// actor, read by anyone.
struct PartitionIndex {
    partition: u32,
    path: PathBuf,
    /// Frames keyed by the entry offset they start at.
    frames: SkipMap<u64, FrameLoc>,
    tail_offset: AtomicU64,
    tail_bytes: AtomicU64,
}

impl PartitionIndex {
    fn new(partition: u32, path: PathBuf) -> Self {
        Self {
            partition,
            path,
            frames: SkipMap::new(),
            tail_offset: AtomicU64::new(0),
            tail_bytes: AtomicU64::new(0),
        }
    }

    fn tail(&self) -> Revision {
        Revision::new(self.partition, self.tail_offset.load(Ordering::Acquire))
    }

    /// Make a fully written frame visible to readers.
    fn record(&self, start: u64, loc: FrameLoc) {
        self.frames.insert(start, loc);
        self.tail_bytes.store(loc.pos + loc.len, Ordering::Release);
        self.tail_offset
            .store(start + loc.entries, Ordering::Release);
    }
}

/// Result of walking a partition file frame by frame.
#[derive(Debug, Default)]
struct ScanOutcome {
    frames: Vec<(u64, FrameLoc)>,
    /// Bytes covered by whole frames.
    valid_bytes: u64,
    /// Entries covered by whole frames.
    entries: u64,
    /// Length of the file when scanned.
    file_len: u64,
    /// Description of a torn final frame, if any.
    torn: Option<String>,
}

/// Map `len` bytes of `file` starting at `pos`, read-only.
fn map_window(file: &File, path: &Path, pos: u64, len: u64) -> Result<Mmap, LogError> {
    let len = usize::try_from(len).map_err(|_| LogError::InvalidOperation {
        message: format!("mapping of {len} bytes exceeds the address space"),
    })?;
    // SAFETY: Read-only mapping of an append-only partition file. Bytes
    // below the indexed tail are never rewritten while the channel is open,
    // and callers check `pos + len` against the file length first.
    unsafe {
        MmapOptions::new()
            .offset(pos)
            .len(len)
            .map(file)
            .map_err(|e| LogError::io_at(e, path))
    }
}

/// Returns `true` when every byte of the file from `from` to `file_len` is
/// zero, as left behind when the file grew but the data never reached disk.
fn zero_filled(
    file: &File,
    path: &Path,
    from: u64,
    file_len: u64,
    window: u64,
) -> Result<bool, LogError> {
    let mut pos = from;
    while pos < file_len {
        let len = (file_len - pos).min(window);
        let map = map_window(file, path, pos, len)?;
        if map.iter().any(|&b| b != 0) {
            return Ok(false);
        }
        pos += len;
    }
    Ok(true)
}

/// Walk every frame of the partition file at `path`.
///
/// Frames are measured through read-only windows of at most `max_map`
/// bytes; a window grows only for a frame larger than it.
fn scan_partition(path: &Path, max_field: usize, max_map: usize) -> Result<ScanOutcome, LogError> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(ScanOutcome::default()),
        Err(e) => return Err(LogError::io_at(e, path)),
    };
    let file_len = file.metadata().map_err(|e| LogError::io_at(e, path))?.len();

    let mut outcome = ScanOutcome {
        file_len,
        ..ScanOutcome::default()
    };
    let base_window = max_map.max(1) as u64;
    let mut window = base_window;
    let mut pos = 0u64;

    'windows: while pos < file_len {
        let len = (file_len - pos).min(window);
        let map = map_window(&file, path, pos, len)?;
        let reaches_end = pos + len >= file_len;
        let mut rel = 0usize;

        while rel < map.len() {
            match frame::measure(&map[rel..], max_field) {
                Ok(span) if span.entries == 0 => {
                    return Err(LogError::Corrupt {
                        path: path.to_path_buf(),
                        offset: pos + rel as u64,
                        message: "frame carries no entries".to_string(),
                    });
                }
                Ok(span) => {
                    let loc = FrameLoc {
                        pos: pos + rel as u64,
                        len: span.len as u64,
                        entries: span.entries as u64,
                    };
                    outcome.frames.push((outcome.entries, loc));
                    outcome.entries += loc.entries;
                    rel += span.len;
                }
                Err(FrameError::Incomplete { available }) if reaches_end => {
                    outcome.torn = Some(format!(
                        "final frame at byte {} is cut short after {available} bytes",
                        pos + rel as u64
                    ));
                    pos += rel as u64;
                    break 'windows;
                }
                Err(FrameError::Incomplete { .. }) => break,
                Err(e) => {
                    let at = pos + rel as u64;
                    if zero_filled(&file, path, at, file_len, base_window)? {
                        outcome.torn = Some(format!(
                            "{} zero bytes follow the final frame at byte {at}",
                            file_len - at
                        ));
                        pos = at;
                        break 'windows;
                    }
                    return Err(LogError::Corrupt {
                        path: path.to_path_buf(),
                        offset: at,
                        message: e.to_string(),
                    });
                }
            }
        }

        // A frame larger than the window: retry it with a wider one.
        window = if rel == 0 {
            window.saturating_mul(2)
        } else {
            base_window
        };
        pos += rel as u64;
    }

    outcome.valid_bytes = pos;
    Ok(outcome)
}

fn partition_path(dir: &Path, partition: u32) -> PathBuf {
    dir.join(format!("partition-{partition:05}.log"))
}

fn validate_topic_name(name: &str) -> Result<(), LogError> {
    let bad = name.is_empty()
        || name == "."
        || name == ".."
        || name.contains(['/', '\\'])
        || name.contains('\0');
    if bad {
        return Err(LogError::InvalidOperation {
            message: format!("invalid topic name {name:?}"),
        });
    }
    Ok(())
}

struct PartitionWriter {
    index: Arc<PartitionIndex>,
    /// `None` when the channel is read-only.
    file: Option<File>,
}

/// The resource owned by a topic's actor.
struct TopicWriter {
    topic: String,
    partitions: Vec<PartitionWriter>,
    durable: bool,
    max_entry_bytes: usize,
    queue: Arc<dyn FanoutQueue<Arc<Committed>>>,
    wakeup: Arc<Notify>,
}

impl TopicWriter {
    fn tail(&self) -> Revisions {
        self.partitions.iter().map(|p| p.index.tail()).collect()
    }

    fn check_sizes(&self, attempt: &Uncommitted) -> Result<(), LogError> {
        let largest = attempt
            .entries
            .iter()
            .map(|e| e.len())
            .chain(std::iter::once(attempt.key.len()))
            .max()
            .unwrap_or(0);
        if largest > self.max_entry_bytes {
            return Err(LogError::EntryTooLarge {
                entry_bytes: largest,
                max_entry_bytes: self.max_entry_bytes,
            });
        }
        Ok(())
    }

    /// Append one attempt if its expected revision is the tail.
    fn append(&mut self, attempt: Uncommitted) -> Result<CommitResult, LogError> {
        let partitions = self.partitions.len() as u32;
        let p = attempt.expected.partition;
        if p >= partitions {
            return Err(LogError::InvalidPartition {
                topic: self.topic.clone(),
                partition: p,
                partitions,
            });
        }
        if attempt.is_empty() {
            return Err(LogError::InvalidOperation {
                message: "a commit must carry at least one entry".to_string(),
            });
        }
        self.check_sizes(&attempt)?;

        let durable = self.durable;
        let writer = &mut self.partitions[p as usize];
        let tail = writer.index.tail();
        if attempt.expected != tail {
            debug!(
                topic = %self.topic,
                expected = %attempt.expected,
                actual = %tail,
                "commit conflict"
            );
            return Ok(CommitResult::Conflict {
                expected: attempt.expected,
                actual: tail,
            });
        }

        let Some(file) = writer.file.as_mut() else {
            return Err(LogError::InvalidOperation {
                message: "channel was opened without APPEND".to_string(),
            });
        };

        let id = Identifier::generate();
        let timestamp_ms = current_time_millis();
        let mut buf = BytesMut::with_capacity(frame::encoded_len(&attempt.key, &attempt.entries));
        frame::encode(&mut buf, id, timestamp_ms, &attempt.key, &attempt.entries);

        let pos = writer.index.tail_bytes.load(Ordering::Acquire);
        let written = file
            .write_all(&buf)
            .and_then(|()| if durable { file.sync_data() } else { Ok(()) });
        if let Err(err) = written {
            let path = writer.index.path.clone();
            error!(topic = %self.topic, path = %path.display(), error = %err, "frame write failed");
            // Cut any partial frame so the file stays a run of whole frames.
            if let Err(cut) = file.set_len(pos) {
                error!(
                    topic = %self.topic,
                    path = %path.display(),
                    error = %cut,
                    "could not truncate partial frame"
                );
            }
            return Err(LogError::io_at(err, path));
        }

        let entries = attempt.entries.len() as u64;
        writer.index.record(
            tail.offset,
            FrameLoc {
                pos,
                len: buf.len() as u64,
                entries,
            },
        );

        let committed = Committed {
            id,
            timestamp_ms,
            key: attempt.key,
            entries: attempt.entries,
            actual: tail.advanced_by(entries),
            expected: attempt.expected,
        };
        trace!(topic = %self.topic, id = %committed.id, actual = %committed.actual, "committed");
        Ok(CommitResult::Committed(Arc::new(committed)))
    }

    /// Hand new commits to hot consumers and wake them.
    fn publish(&self, committed: Vec<Arc<Committed>>) {
        if committed.is_empty() {
            return;
        }
        let step = self.queue.capacity().unwrap_or(committed.len()).max(1);
        let mut pending = committed.into_iter().peekable();
        while pending.peek().is_some() {
            let chunk: Vec<_> = pending.by_ref().take(step).collect();
            if let Err(err) = self.publish_chunk(chunk) {
                // Commits are durable already; only live delivery misses them.
                warn!(
                    topic = %self.topic,
                    error = %err,
                    "could not publish commits to hot consumers"
                );
                return;
            }
            self.wakeup.notify_waiters();
        }
    }

    fn publish_chunk(&self, chunk: Vec<Arc<Committed>>) -> Result<(), QueueError> {
        let mut tx = Transaction::begin(self.queue.as_ref(), chunk.len())?;
        for entry in chunk {
            tx.add(entry)?;
        }
        tx.commit()
    }

    /// Final unit run when the topic closes.
    fn shutdown(&mut self) {
        for writer in &mut self.partitions {
            if let Some(file) = writer.file.take() {
                if let Err(err) = file.sync_all() {
                    error!(
                        topic = %self.topic,
                        path = %writer.index.path.display(),
                        error = %err,
                        "final sync failed"
                    );
                }
            }
        }
        self.queue.close();
        self.wakeup.notify_waiters();
        debug!(topic = %self.topic, "topic writer shut down");
    }
}

/// One opened topic.
struct Topic {
    name: String,
    partitions: Vec<Arc<PartitionIndex>>,
    actor: ResourceActor<TopicWriter>,
    queue: Arc<dyn FanoutQueue<Arc<Committed>>>,
    wakeup: Arc<Notify>,
    max_entry_bytes: usize,
    max_map_bytes: usize,
}

impl Topic {
    fn open(root: &Path, name: &str, config: &LogConfig) -> Result<Self, LogError> {
        validate_topic_name(name)?;
        let flags = config.open_flags;
        let dir = root.join(name);
        if !dir.is_dir() {
            if !flags.contains(OpenFlags::CREATE) {
                return Err(LogError::UnknownTopic {
                    topic: name.to_string(),
                });
            }
            fs::create_dir_all(&dir).map_err(|e| LogError::io_at(e, &dir))?;
        }

        let max_entry_bytes = config.max_entry_bytes;
        let max_map_bytes = config.effective_max_map_bytes();
        let mut indexes = Vec::with_capacity(config.partitions as usize);
        let mut writers = Vec::with_capacity(config.partitions as usize);
        let mut total_entries = 0u64;

        for partition in 0..config.partitions {
            let path = partition_path(&dir, partition);
            let scan = scan_partition(&path, max_entry_bytes, max_map_bytes)?;

            if let Some(torn) = &scan.torn {
                if !config.repair_torn_tail {
                    return Err(LogError::Corrupt {
                        path,
                        offset: scan.valid_bytes,
                        message: torn.clone(),
                    });
                }
                if flags.contains(OpenFlags::APPEND) {
                    warn!(
                        topic = %name,
                        partition,
                        valid_bytes = scan.valid_bytes,
                        discarded = scan.file_len - scan.valid_bytes,
                        "truncating torn final frame"
                    );
                    let file = OpenOptions::new()
                        .write(true)
                        .open(&path)
                        .map_err(|e| LogError::io_at(e, &path))?;
                    file.set_len(scan.valid_bytes)
                        .and_then(|()| file.sync_all())
                        .map_err(|e| LogError::io_at(e, &path))?;
                } else {
                    warn!(
                        topic = %name,
                        partition,
                        "ignoring torn final frame of read-only partition"
                    );
                }
            }

            let index = Arc::new(PartitionIndex::new(partition, path.clone()));
            for (start, loc) in scan.frames {
                index.record(start, loc);
            }
            total_entries += scan.entries;

            let file = if flags.contains(OpenFlags::APPEND) {
                let file = OpenOptions::new()
                    .append(true)
                    .create(flags.contains(OpenFlags::CREATE))
                    .open(&path)
                    .map_err(|e| LogError::io_at(e, &path))?;
                Some(file)
            } else {
                None
            };

            writers.push(PartitionWriter {
                index: Arc::clone(&index),
                file,
            });
            indexes.push(index);
        }

        let queue = queue::build::<Arc<Committed>>(&config.fanout);
        let wakeup = Arc::new(Notify::new());
        let writer = TopicWriter {
            topic: name.to_string(),
            partitions: writers,
            durable: flags.contains(OpenFlags::DURABLE),
            max_entry_bytes,
            queue: Arc::clone(&queue),
            wakeup: Arc::clone(&wakeup),
        };
        let actor = ResourceActor::spawn_with_mailbox(name, writer, config.actor_mailbox)?;

        info!(
            topic = %name,
            partitions = config.partitions,
            entries = total_entries,
            "opened topic"
        );

        Ok(Self {
            name: name.to_string(),
            partitions: indexes,
            actor,
            queue,
            wakeup,
            max_entry_bytes,
            max_map_bytes,
        })
    }

    fn partition(&self, partition: u32) -> Result<&Arc<PartitionIndex>, LogError> {
        self.partitions
            .get(partition as usize)
            .ok_or_else(|| LogError::InvalidPartition {
                topic: self.name.clone(),
                partition,
                partitions: self.partitions.len() as u32,
            })
    }

    /// Tails read straight from the index, without the actor.
    fn indexed_tail(&self) -> Revisions {
        self.partitions.iter().map(|p| p.tail()).collect()
    }

    fn closed(&self, err: ActorError) -> LogError {
        match err {
            ActorError::Closed { .. } => LogError::Closed {
                resource: self.name.clone(),
            },
            other => LogError::Actor(other),
        }
    }

    /// Read up to `count` commits starting at the frame boundary `start`.
    fn read(&self, start: Revision, count: usize) -> Result<Vec<Committed>, LogError> {
        let index = self.partition(start.partition)?;
        let tail = index.tail_offset.load(Ordering::Acquire);
        if start.offset > tail {
            return Err(LogError::InvalidPosition {
                revision: start,
                message: format!("beyond the partition tail at {tail}"),
            });
        }
        if start.offset == tail || count == 0 {
            return Ok(Vec::new());
        }
        if !index.frames.contains_key(&start.offset) {
            return Err(LogError::InvalidPosition {
                revision: start,
                message: "not a frame boundary".to_string(),
            });
        }

        let locs: Vec<(u64, FrameLoc)> = index
            .frames
            .range(start.offset..tail)
            .take(count)
            .map(|e| (*e.key(), *e.value()))
            .collect();

        let path = &index.path;
        let file = File::open(path).map_err(|e| LogError::io_at(e, path))?;
        let file_len = file.metadata().map_err(|e| LogError::io_at(e, path))?.len();
        let max_map = self.max_map_bytes as u64;

        let mut out = Vec::with_capacity(locs.len());
        let mut i = 0;
        while i < locs.len() {
            let window_start = locs[i].1.pos;
            let mut window_end = window_start + locs[i].1.len;
            let mut j = i + 1;
            while let Some((_, loc)) = locs.get(j) {
                let end = loc.pos + loc.len;
                if end - window_start > max_map {
                    break;
                }
                window_end = end;
                j += 1;
            }

            if window_end > file_len {
                return Err(LogError::Corrupt {
                    path: path.clone(),
                    offset: window_start,
                    message: format!(
                        "file ends at byte {file_len} but frames extend to byte {window_end}"
                    ),
                });
            }

            let map = map_window(&file, path, window_start, window_end - window_start)?;
            for &(offset, loc) in &locs[i..j] {
                let rel = (loc.pos - window_start) as usize;
                let revision = Revision::new(index.partition, offset);
                let Some(bytes) = map.get(rel..rel + loc.len as usize) else {
                    return Err(LogError::Corrupt {
                        path: path.clone(),
                        offset: loc.pos,
                        message: "frame lies outside the mapped window".to_string(),
                    });
                };
                let decoded = frame::decode(bytes, self.max_entry_bytes);
                let (decoded, span) = decoded.map_err(|e| match e {
                    FrameError::BadDelimiter { .. } => LogError::InvalidPosition {
                        revision,
                        message: e.to_string(),
                    },
                    other => LogError::Corrupt {
                        path: path.clone(),
                        offset: loc.pos,
                        message: other.to_string(),
                    },
                })?;
                if span.len as u64 != loc.len || span.entries as u64 != loc.entries {
                    return Err(LogError::Corrupt {
                        path: path.clone(),
                        offset: loc.pos,
                        message: format!(
                            "frame holds {} entries in {} bytes, index expects {} in {}",
                            span.entries, span.len, loc.entries, loc.len
                        ),
                    });
                }
                out.push(Committed {
                    id: decoded.id,
                    timestamp_ms: decoded.timestamp_ms,
                    key: decoded.key,
                    entries: decoded.entries,
                    actual: revision.advanced_by(loc.entries),
                    expected: revision,
                });
            }
            i = j;
        }
        Ok(out)
    }

    /// Rescan every partition file and compare it with the index.
    fn verify(&self) -> Result<Revisions, LogError> {
        let mut found = Revisions::new();
        for index in &self.partitions {
            let scan = scan_partition(&index.path, self.max_entry_bytes, self.max_map_bytes)?;
            if let Some(torn) = scan.torn {
                return Err(LogError::Corrupt {
                    path: index.path.clone(),
                    offset: scan.valid_bytes,
                    message: torn,
                });
            }
            let indexed = index.tail_offset.load(Ordering::Acquire);
            if scan.entries < indexed {
                return Err(LogError::Corrupt {
                    path: index.path.clone(),
                    offset: scan.valid_bytes,
                    message: format!(
                        "file holds {} entries but {indexed} were committed",
                        scan.entries
                    ),
                });
            }
            found.set(Revision::new(index.partition, scan.entries));
        }
        Ok(found)
    }
}

struct ChannelInner {
    root: PathBuf,
    config: LogConfig,
    topics: DashMap<String, Arc<Topic>>,
    /// Held while a topic is scanned and opened, so no two opens touch the
    /// same files at once.
    opening: Mutex<()>,
    closed: AtomicBool,
}

impl ChannelInner {
    fn closed_error(&self) -> LogError {
        LogError::Closed {
            resource: self.root.display().to_string(),
        }
    }

    /// Look `name` up, opening it first if needed. Blocks on file I/O.
    fn topic(&self, name: &str) -> Result<Arc<Topic>, LogError> {
        if let Some(topic) = self.topics.get(name) {
            return Ok(Arc::clone(topic.value()));
        }
        let _opening = self.opening.lock().unwrap_or_else(PoisonError::into_inner);
        if self.closed.load(Ordering::Acquire) {
            return Err(self.closed_error());
        }
        if let Some(topic) = self.topics.get(name) {
            return Ok(Arc::clone(topic.value()));
        }
        let topic = Arc::new(Topic::open(&self.root, name, &self.config)?);
        self.topics.insert(name.to_string(), Arc::clone(&topic));
        Ok(topic)
    }
}

impl Drop for ChannelInner {
    fn drop(&mut self) {
        // Let hot deliveries finish instead of waiting forever.
        for topic in self.topics.iter() {
            topic.queue.close();
            topic.wakeup.notify_waiters();
        }
    }
}

/// The file-backed commit log: a [`Sink`], [`ColdSource`] and
/// [`HotSource`] over a directory of topics.
///
/// Cloning is cheap; clones share topics, actors and queues.
///
/// # Examples
/// ```no_run
/// use eventlog_rs::{FileChannel, LogConfig, Revision, Sink, Uncommitted};
///
/// # async fn example() -> Result<(), eventlog_rs::LogError> {
/// let log = FileChannel::open("/tmp/eventlog", LogConfig::default())?;
/// let attempt = Uncommitted::from_slices(b"order-1", &[b"created"], Revision::origin(0));
/// let result = log.try_send("orders", attempt).await?;
/// assert!(result.is_committed());
/// let history = log.request("orders", Revision::origin(0), 10)?;
/// assert_eq!(history.len(), 1);
/// log.close().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct FileChannel {
    inner: Arc<ChannelInner>,
}

impl FileChannel {
    /// Open (or create, with [`OpenFlags::CREATE`]) a log rooted at `root`.
    ///
    /// Topics are opened lazily on first use, or up front with
    /// [`open_topic`](Self::open_topic).
    ///
    /// # Errors
    ///
    /// Returns [`LogError::InvalidConfig`] for an inconsistent `config` or
    /// [`LogError::Io`] if the root directory cannot be created or found.
    pub fn open<P: AsRef<Path>>(root: P, config: LogConfig) -> Result<Self, LogError> {
        config.validate()?;
        let root = root.as_ref().to_path_buf();
        if config.open_flags.contains(OpenFlags::CREATE) {
            fs::create_dir_all(&root).map_err(|e| LogError::io_at(e, &root))?;
        } else if !root.is_dir() {
            return Err(LogError::io_at(
                std::io::Error::new(ErrorKind::NotFound, "log root does not exist"),
                &root,
            ));
        }
        info!(root = %root.display(), partitions = config.partitions, "opened file channel");
        Ok(Self {
            inner: Arc::new(ChannelInner {
                root,
                config,
                topics: DashMap::new(),
                opening: Mutex::new(()),
                closed: AtomicBool::new(false),
            }),
        })
    }

    /// Root directory of the log.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.inner.root
    }

    /// Configuration in force.
    #[must_use]
    pub fn config(&self) -> &LogConfig {
        &self.inner.config
    }

    /// Returns `true` once [`close`](Self::close) was called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    fn topic(&self, name: &str) -> Result<Arc<Topic>, LogError> {
        if self.is_closed() {
            return Err(self.inner.closed_error());
        }
        self.inner.topic(name)
    }

    /// Like `topic`, but a topic that is not open yet is scanned and
    /// opened on the blocking pool instead of the calling task.
    async fn topic_async(&self, name: &str) -> Result<Arc<Topic>, LogError> {
        if self.is_closed() {
            return Err(self.inner.closed_error());
        }
        if let Some(topic) = self.inner.topics.get(name) {
            return Ok(Arc::clone(topic.value()));
        }
        let inner = Arc::clone(&self.inner);
        let name = name.to_string();
        tokio::task::spawn_blocking(move || inner.topic(&name))
            .await
            .map_err(|e| LogError::InvalidOperation {
                message: format!("topic open task failed: {e}"),
            })?
    }

    /// Open `topic` now instead of on first use, recovering its partition
    /// files, and return its tail.
    ///
    /// # Errors
    ///
    /// - [`LogError::UnknownTopic`] if it does not exist and
    ///   [`OpenFlags::CREATE`] is not set
    /// - [`LogError::Corrupt`] if its files are damaged
    /// - [`LogError::Closed`] if the channel is closed
    pub async fn open_topic(&self, topic: &str) -> Result<Revisions, LogError> {
        Ok(self.topic_async(topic).await?.indexed_tail())
    }

    fn check_writable(&self) -> Result<(), LogError> {
        if !self.inner.config.open_flags.contains(OpenFlags::APPEND) {
            return Err(LogError::InvalidOperation {
                message: "channel was opened without APPEND".to_string(),
            });
        }
        Ok(())
    }

    /// Apply several attempts to `topic` in one serialized step.
    ///
    /// Each attempt is checked and appended on its own, in order, so a
    /// later attempt may build on an earlier one. All successful commits
    /// reach hot consumers as one batch.
    ///
    /// # Errors
    ///
    /// The outer error is returned if the topic cannot be used at all;
    /// per-attempt failures are reported in the returned vector.
    pub async fn try_send_all(
        &self,
        topic: &str,
        attempts: Vec<Uncommitted>,
    ) -> Result<Vec<Result<CommitResult, LogError>>, LogError> {
        self.check_writable()?;
        let topic = self.topic_async(topic).await?;
        topic
            .actor
            .execute(move |writer| {
                let results: Vec<_> = attempts.into_iter().map(|a| writer.append(a)).collect();
                let committed = results
                    .iter()
                    .filter_map(|r| r.as_ref().ok().and_then(CommitResult::committed))
                    .cloned()
                    .collect();
                writer.publish(committed);
                results
            })
            .await
            .map_err(|e| topic.closed(e))
    }

    /// Read up to `count` commits of `topic` starting at `start`.
    ///
    /// `start` must be a frame boundary: the origin, the `actual` revision
    /// of some commit, or the tail (which yields nothing).
    ///
    /// # Errors
    ///
    /// - [`LogError::InvalidPosition`] if `start` is beyond the tail, not a
    ///   frame boundary, or the bytes there do not begin with the commit
    ///   delimiter
    /// - [`LogError::Corrupt`] if the file no longer holds the frames
    /// - [`LogError::InvalidPartition`] for an unknown partition
    pub fn request(
        &self,
        topic: &str,
        start: Revision,
        count: usize,
    ) -> Result<Vec<Committed>, LogError> {
        self.topic(topic)?.read(start, count)
    }

    /// Current tail of every partition of `topic`, consistent with commits.
    ///
    /// # Errors
    ///
    /// Returns [`LogError::Closed`] if the channel is closed.
    pub async fn tail(&self, topic: &str) -> Result<Revisions, LogError> {
        let topic = self.topic_async(topic).await?;
        topic
            .actor
            .execute(|writer| writer.tail())
            .await
            .map_err(|e| topic.closed(e))
    }

    /// Rescan `topic` on disk and return the tail the files actually hold.
    ///
    /// # Errors
    ///
    /// Returns [`LogError::Corrupt`] for the first structural problem
    /// found, including files holding fewer entries than were committed.
    pub fn verify(&self, topic: &str) -> Result<Revisions, LogError> {
        self.topic(topic)?.verify()
    }

    /// Names of the topics present under the root directory.
    ///
    /// # Errors
    ///
    /// Returns [`LogError::Io`] if the root cannot be listed.
    pub fn topics(&self) -> Result<Vec<String>, LogError> {
        let root = &self.inner.root;
        let mut names = Vec::new();
        for entry in fs::read_dir(root).map_err(|e| LogError::io_at(e, root))? {
            let entry = entry.map_err(|e| LogError::io_at(e, root))?;
            if entry.path().is_dir() {
                if let Some(name) = entry.file_name().to_str() {
                    names.push(name.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }

    /// This channel as both halves of a [`SourcedLog`].
    #[must_use]
    pub fn sourced(&self) -> SourcedLog<FileChannel, FileChannel> {
        SourcedLog::new(self.clone(), self.clone())
    }

    /// Close every topic: sync and release partition files, end hot
    /// deliveries and refuse further work. Calling it again is a no-op.
    ///
    /// # Errors
    ///
    /// Returns the first actor error met while closing.
    pub async fn close(&self) -> Result<(), LogError> {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let topics: Vec<Arc<Topic>> = self
            .inner
            .topics
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();

        // A unit blocked publishing to a full queue must give up before the
        // teardown unit queued behind it can run.
        for topic in &topics {
            topic.queue.close();
            topic.wakeup.notify_waiters();
        }

        let mut first_error = None;
        for topic in topics {
            match topic.actor.close(TopicWriter::shutdown).await {
                Ok(()) | Err(ActorError::Closed { .. }) => {}
                Err(err) => {
                    error!(topic = %topic.name, error = %err, "closing topic failed");
                    first_error.get_or_insert(LogError::Actor(err));
                }
            }
        }
        info!(root = %self.inner.root.display(), "closed file channel");
        first_error.map_or(Ok(()), Err)
    }
}

impl std::fmt::Debug for FileChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileChannel")
            .field("root", &self.inner.root)
            .field("topics", &self.inner.topics.len())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl Sink for FileChannel {
    fn try_send(
        &self,
        topic: &str,
        attempt: Uncommitted,
    ) -> impl Future<Output = Result<CommitResult, LogError>> + Send {
        async move {
            self.check_writable()?;
            let topic = self.topic_async(topic).await?;
            topic
                .actor
                .execute(move |writer| {
                    let result = writer.append(attempt)?;
                    if let CommitResult::Committed(committed) = &result {
                        writer.publish(vec![Arc::clone(committed)]);
                    }
                    Ok(result)
                })
                .await
                .map_err(|e| topic.closed(e))?
        }
    }
}

impl ColdSource for FileChannel {
    fn load_range<S: Subscriber>(
        &self,
        topic: &str,
        subscriber: &mut S,
        from: Revisions,
        until: Option<Revisions>,
    ) -> impl Future<Output = Result<Revisions, LogError>> + Send {
        async move {
            let topic = self.topic_async(topic).await?;
            let until = until.unwrap_or_else(|| topic.indexed_tail());
            let mut reached = from;

            for partition in 0..topic.partitions.len() as u32 {
                let end = until.get(partition).offset;
                loop {
                    let start = reached.get(partition);
                    if start.offset >= end {
                        break;
                    }
                    let reader = Arc::clone(&topic);
                    let job = tokio::task::spawn_blocking(move || reader.read(start, REPLAY_CHUNK));
                    let chunk = job.await.map_err(|e| LogError::InvalidOperation {
                        message: format!("cold read task failed: {e}"),
                    })??;
                    if chunk.is_empty() {
                        break;
                    }

                    let mut delivered = 0usize;
                    for entry in chunk.iter().take_while(|e| e.actual.offset <= end) {
                        if let Err(err) = subscriber.on_committed(entry) {
                            error!(
                                topic = %topic.name,
                                revision = %entry.actual,
                                error = %err,
                                "subscriber failed during replay"
                            );
                            subscriber.save_revisions(&reached)?;
                            return Err(err);
                        }
                        reached.advance(entry.actual);
                        delivered += 1;
                    }
                    if delivered > 0 {
                        subscriber.save_revisions(&reached)?;
                    }
                    if delivered < chunk.len() {
                        break;
                    }
                }
            }

            debug!(topic = %topic.name, reached = ?reached, "cold replay complete");
            Ok(reached)
        }
    }
}

impl HotSource for FileChannel {
    fn open_tail(&self, topic: &str) -> impl Future<Output = Result<HotTail, LogError>> + Send {
        async move {
            let topic = self.topic_async(topic).await?;
            let queue = Arc::clone(&topic.queue);
            let (consumer, tail) = topic
                .actor
                .execute(move |writer| (queue.subscribe(), writer.tail()))
                .await
                .map_err(|e| topic.closed(e))?;
            debug!(topic = %topic.name, tail = ?tail, "registered hot consumer");
            Ok(HotTail::new(
                topic.name.clone(),
                consumer,
                Arc::clone(&topic.wakeup),
                tail,
            ))
        }
    }
}
