//! Several writers race to extend one partition.
//!
//! This example shows how to:
//! 1. Append with an expected revision
//! 2. Recover from a conflict by retrying at the reported tail
//! 3. Read the resulting history back in commit order

use demos::setup_logger;
use eventlog_rs::{CommitResult, FileChannel, LogConfig, LogError, Revision, Sink, Uncommitted};
use tracing::info;

const WRITERS: usize = 4;
const COMMITS_PER_WRITER: usize = 5;

#[tokio::main]
async fn main() -> Result<(), LogError> {
    setup_logger();
    info!("=== Optimistic Writers Demo ===");

    let dir = tempfile::TempDir::new()?;
    let log = FileChannel::open(dir.path(), LogConfig::default())?;

    let mut handles = Vec::new();
    for writer in 0..WRITERS {
        let log = log.clone();
        handles.push(tokio::spawn(async move { write_loop(log, writer).await }));
    }

    let mut conflicts = 0;
    for handle in handles {
        conflicts += handle.await.map_err(|e| LogError::InvalidOperation {
            message: e.to_string(),
        })??;
    }

    let history = log.request("counter", Revision::origin(0), WRITERS * COMMITS_PER_WRITER)?;
    for commit in &history {
        info!(
            key = %String::from_utf8_lossy(&commit.key),
            expected = %commit.expected,
            actual = %commit.actual,
            "commit"
        );
    }
    info!(commits = history.len(), conflicts, "all writers done");

    log.close().await
}

/// Append `COMMITS_PER_WRITER` commits, retrying on conflicts. Returns the
/// number of conflicts met.
async fn write_loop(log: FileChannel, writer: usize) -> Result<usize, LogError> {
    let key = format!("writer-{writer}");
    let mut expected = Revision::origin(0);
    let mut conflicts = 0;
    let mut written = 0;
    while written < COMMITS_PER_WRITER {
        let entry = format!("increment {written}");
        let attempt = Uncommitted::from_slices(key.as_bytes(), &[entry.as_bytes()], expected);
        match log.try_send("counter", attempt).await? {
            CommitResult::Committed(committed) => {
                expected = committed.actual;
                written += 1;
            }
            CommitResult::Conflict { actual, .. } => {
                conflicts += 1;
                expected = actual;
            }
        }
    }
    Ok(conflicts)
}
