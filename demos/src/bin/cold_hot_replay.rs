//! A projection that catches up on history, then follows live commits.
//!
//! This example shows how to:
//! 1. Implement a `Subscriber` that keeps its own checkpoint
//! 2. Replay history and switch to live delivery with a `SourcedLog`
//! 3. Resume from the saved checkpoint after a restart

use demos::setup_logger;
use eventlog_rs::{
    Committed, FileChannel, LogConfig, LogError, Revisions, Sink, Subscriber, Uncommitted,
};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::info;

/// Counts entries per key and stores its checkpoint in shared memory.
#[derive(Clone, Default)]
struct Projection {
    totals: Arc<Mutex<std::collections::BTreeMap<String, usize>>>,
    checkpoint: Arc<Mutex<Revisions>>,
}

impl Subscriber for Projection {
    fn on_committed(&mut self, entry: &Committed) -> Result<(), LogError> {
        let key = String::from_utf8_lossy(&entry.key).into_owned();
        let mut totals = self.totals.lock().map_err(|e| LogError::Subscriber {
            message: e.to_string(),
        })?;
        *totals.entry(key).or_default() += entry.entries.len();
        Ok(())
    }

    fn load_revisions(&mut self) -> Revisions {
        self.checkpoint
            .lock()
            .map(|c| c.clone())
            .unwrap_or_default()
    }

    fn save_revisions(&mut self, revisions: &Revisions) -> Result<(), LogError> {
        let mut checkpoint = self.checkpoint.lock().map_err(|e| LogError::Subscriber {
            message: e.to_string(),
        })?;
        *checkpoint = revisions.clone();
        Ok(())
    }
}

async fn append(log: &FileChannel, key: &str, events: &[&str]) -> Result<(), LogError> {
    let entries: Vec<&[u8]> = events.iter().map(|e| e.as_bytes()).collect();
    loop {
        let tail = log.tail("carts").await?.get(0);
        let attempt = Uncommitted::from_slices(key.as_bytes(), &entries, tail);
        if log.try_send("carts", attempt).await?.is_committed() {
            return Ok(());
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), LogError> {
    setup_logger();
    info!("=== Cold/Hot Replay Demo ===");

    let dir = tempfile::TempDir::new()?;
    let projection = Projection::default();

    // Step 1: history written before anyone listens.
    {
        let log = FileChannel::open(dir.path(), LogConfig::default())?;
        append(&log, "cart-1", &["item-added", "item-added"]).await?;
        append(&log, "cart-2", &["item-added"]).await?;
        log.close().await?;
    }

    // Step 2: replay history, then follow live commits.
    let log = FileChannel::open(dir.path(), LogConfig::default())?;
    let subscription = log.sourced().subscribe("carts", projection.clone()).await?;
    append(&log, "cart-1", &["checked-out"]).await?;
    append(&log, "cart-3", &["item-added"]).await?;
    tokio::time::sleep(Duration::from_millis(100)).await;

    let stopped = subscription.stop().await?;
    info!(reached = %stopped.revisions.get(0), "live delivery stopped");

    // Step 3: resume after a "restart"; only new commits are delivered.
    append(&log, "cart-2", &["item-removed"]).await?;
    let subscription = log.sourced().subscribe("carts", projection.clone()).await?;
    tokio::time::sleep(Duration::from_millis(100)).await;
    let stopped = subscription.stop().await?;

    if let Ok(totals) = projection.totals.lock() {
        for (key, count) in totals.iter() {
            info!(%key, count, "projection");
        }
    }
    info!(checkpoint = %stopped.revisions.get(0), "final checkpoint");
    log.close().await
}
