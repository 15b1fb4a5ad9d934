//! Shared helpers.

use eventlog_rs::{
    Committed, FileChannel, LogConfig, LogError, Revision, Revisions, Subscriber, Uncommitted,
};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub fn temp_dir() -> tempfile::TempDir {
    tempfile::TempDir::new().unwrap_or_else(|_| panic!("failed to create temp dir"))
}

pub fn open(dir: &Path, config: LogConfig) -> FileChannel {
    FileChannel::open(dir, config).unwrap_or_else(|e| panic!("open failed: {e}"))
}

pub fn attempt(key: &str, entries: &[&str], expected: Revision) -> Uncommitted {
    let entries: Vec<&[u8]> = entries.iter().map(|e| e.as_bytes()).collect();
    Uncommitted::from_slices(key.as_bytes(), &entries, expected)
}

/// What a [`Recorder`] has seen, shared with the test body.
#[derive(Debug, Default)]
pub struct Seen {
    pub revisions: Vec<Revision>,
    pub saved: Option<Revisions>,
    pub saves: usize,
}

/// Subscriber that records every delivered revision.
#[derive(Debug, Clone)]
pub struct Recorder {
    pub start: Revisions,
    pub seen: Arc<Mutex<Seen>>,
    /// Fail on the delivery of this revision.
    pub fail_at: Option<Revision>,
}

impl Recorder {
    pub fn new(start: Revisions) -> Self {
        Self {
            start,
            seen: Arc::new(Mutex::new(Seen::default())),
            fail_at: None,
        }
    }

    pub fn count(&self) -> usize {
        self.seen.lock().map(|s| s.revisions.len()).unwrap_or(0)
    }

    pub fn revisions(&self) -> Vec<Revision> {
        self.seen
            .lock()
            .map(|s| s.revisions.clone())
            .unwrap_or_default()
    }

    pub fn saved(&self) -> Option<Revisions> {
        self.seen.lock().ok().and_then(|s| s.saved.clone())
    }

    /// Wait until `n` entries were delivered or give up after five seconds.
    pub async fn wait_for(&self, n: usize) -> bool {
        for _ in 0..500 {
            if self.count() >= n {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }
}

impl Subscriber for Recorder {
    fn on_committed(&mut self, entry: &Committed) -> Result<(), LogError> {
        if self.fail_at == Some(entry.actual) {
            return Err(LogError::Subscriber {
                message: format!("refused {}", entry.actual),
            });
        }
        if let Ok(mut seen) = self.seen.lock() {
            seen.revisions.push(entry.actual);
        }
        Ok(())
    }

    fn load_revisions(&mut self) -> Revisions {
        self.saved().unwrap_or_else(|| self.start.clone())
    }

    fn save_revisions(&mut self, revisions: &Revisions) -> Result<(), LogError> {
        if let Ok(mut seen) = self.seen.lock() {
            seen.saved = Some(revisions.clone());
            seen.saves += 1;
        }
        Ok(())
    }
}
