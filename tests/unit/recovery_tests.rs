//! Reopening, torn writes and corruption.

use crate::common::{attempt, open, temp_dir};
use eventlog_rs::{FileChannel, LogConfig, LogError, OpenFlags, Revision, Sink};
use std::fs::{self, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

fn partition_file(root: &Path, topic: &str) -> PathBuf {
    root.join(topic).join("partition-00000.log")
}

async fn write_commits(log: &FileChannel, topic: &str, count: usize) -> Revision {
    let mut expected = Revision::origin(0);
    for i in 0..count {
        let value = format!("value-{i}");
        let result = log
            .try_send(topic, attempt("key", &[&value], expected))
            .await
            .unwrap_or_else(|e| panic!("{e}"));
        expected = result.actual();
    }
    expected
}

fn file_len(path: &Path) -> u64 {
    fs::metadata(path).map(|m| m.len()).unwrap_or(0)
}

fn truncate(path: &Path, len: u64) {
    let file = OpenOptions::new()
        .write(true)
        .open(path)
        .unwrap_or_else(|e| panic!("{e}"));
    assert!(file.set_len(len).is_ok());
}

#[tokio::test]
async fn reopen_restores_tail_and_continues() {
    let dir = temp_dir();
    let log = open(dir.path(), LogConfig::default());
    let tail = write_commits(&log, "orders", 3).await;
    assert!(log.close().await.is_ok());

    let reopened = open(dir.path(), LogConfig::default());
    let restored = reopened
        .tail("orders")
        .await
        .unwrap_or_else(|e| panic!("{e}"));
    assert_eq!(restored.get(0), tail);

    let next = reopened
        .try_send("orders", attempt("key", &["more"], tail))
        .await
        .unwrap_or_else(|e| panic!("{e}"));
    assert!(next.is_committed());
    assert_eq!(next.actual(), Revision::new(0, 4));
    assert!(reopened.close().await.is_ok());
}

#[tokio::test]
async fn torn_final_frame_is_repaired() {
    let dir = temp_dir();
    let log = open(dir.path(), LogConfig::default());
    write_commits(&log, "orders", 2).await;
    assert!(log.close().await.is_ok());

    let path = partition_file(dir.path(), "orders");
    let whole = file_len(&path);
    // Simulate a crash halfway through a third frame.
    {
        let mut file = OpenOptions::new()
            .append(true)
            .open(&path)
            .unwrap_or_else(|e| panic!("{e}"));
        assert!(file.write_all(&[0xDE, 0xC0, 0xED, 0xFE, 1, 2, 3]).is_ok());
    }

    let reopened = open(dir.path(), LogConfig::default());
    let tail = reopened
        .tail("orders")
        .await
        .unwrap_or_else(|e| panic!("{e}"));
    assert_eq!(tail.get(0), Revision::new(0, 2));
    assert_eq!(file_len(&path), whole);
    assert!(reopened.verify("orders").is_ok());
    assert!(reopened.close().await.is_ok());
}

#[tokio::test]
async fn zero_filled_tail_is_repaired() {
    let dir = temp_dir();
    let log = open(dir.path(), LogConfig::default());
    write_commits(&log, "orders", 2).await;
    assert!(log.close().await.is_ok());

    let path = partition_file(dir.path(), "orders");
    let whole = file_len(&path);
    // The file grew after a crash but the frame bytes never landed.
    {
        let mut file = OpenOptions::new()
            .append(true)
            .open(&path)
            .unwrap_or_else(|e| panic!("{e}"));
        assert!(file.write_all(&[0u8; 64]).is_ok());
    }

    let config = LogConfig::default().with_repair_torn_tail(false);
    let strict = open(dir.path(), config);
    let refused = strict.request("orders", Revision::origin(0), 10);
    assert!(matches!(refused, Err(LogError::Corrupt { offset, .. }) if offset == whole));
    drop(strict);

    let reopened = open(dir.path(), LogConfig::default());
    let history = reopened
        .request("orders", Revision::origin(0), 10)
        .unwrap_or_else(|e| panic!("{e}"));
    assert_eq!(history.len(), 2);
    assert_eq!(file_len(&path), whole);

    let next = reopened
        .try_send("orders", attempt("key", &["after"], Revision::new(0, 2)))
        .await
        .unwrap_or_else(|e| panic!("{e}"));
    assert!(next.is_committed());
    assert!(reopened.close().await.is_ok());
}

#[tokio::test]
async fn torn_final_frame_fails_without_repair() {
    let dir = temp_dir();
    let log = open(dir.path(), LogConfig::default());
    write_commits(&log, "orders", 2).await;
    assert!(log.close().await.is_ok());

    let path = partition_file(dir.path(), "orders");
    truncate(&path, file_len(&path) - 2);

    let config = LogConfig::default().with_repair_torn_tail(false);
    let strict = open(dir.path(), config);
    let result = strict.request("orders", Revision::origin(0), 10);
    assert!(matches!(result, Err(LogError::Corrupt { .. })));
}

#[tokio::test]
async fn read_only_open_leaves_torn_file_untouched() {
    let dir = temp_dir();
    let log = open(dir.path(), LogConfig::default());
    write_commits(&log, "orders", 2).await;
    assert!(log.close().await.is_ok());

    let path = partition_file(dir.path(), "orders");
    let cut = file_len(&path) - 3;
    truncate(&path, cut);

    let reader = open(
        dir.path(),
        LogConfig::default().with_open_flags(OpenFlags::empty()),
    );
    let history = reader
        .request("orders", Revision::origin(0), 10)
        .unwrap_or_else(|e| panic!("{e}"));
    assert_eq!(history.len(), 1);
    assert_eq!(file_len(&path), cut);
}

#[tokio::test]
async fn truncation_while_open_is_reported_as_corruption() {
    let dir = temp_dir();
    let log = open(dir.path(), LogConfig::default());
    write_commits(&log, "orders", 3).await;

    let path = partition_file(dir.path(), "orders");
    truncate(&path, file_len(&path) - 5);

    let result = log.request("orders", Revision::origin(0), 10);
    assert!(matches!(result, Err(LogError::Corrupt { .. })));
    assert!(matches!(log.verify("orders"), Err(LogError::Corrupt { .. })));
    assert!(log.close().await.is_ok());
}

#[tokio::test]
async fn overwritten_delimiter_is_an_invalid_position() {
    let dir = temp_dir();
    let log = open(dir.path(), LogConfig::default());
    write_commits(&log, "orders", 2).await;

    let first = log
        .request("orders", Revision::origin(0), 1)
        .unwrap_or_else(|e| panic!("{e}"));
    let second_start = first[0].actual;
    let frame_len = file_len(&partition_file(dir.path(), "orders")) / 2;

    let path = partition_file(dir.path(), "orders");
    {
        let mut file = OpenOptions::new()
            .write(true)
            .open(&path)
            .unwrap_or_else(|e| panic!("{e}"));
        assert!(file.seek(SeekFrom::Start(frame_len)).is_ok());
        assert!(file.write_all(&[0, 0, 0, 0]).is_ok());
    }

    let result = log.request("orders", second_start, 1);
    assert!(matches!(
        result,
        Err(LogError::InvalidPosition { revision, .. }) if revision == second_start
    ));
    assert!(log.close().await.is_ok());

    // The damage is in the middle of the file now, which fails a fresh open.
    let reopened = open(dir.path(), LogConfig::default());
    let result = reopened.request("orders", Revision::origin(0), 10);
    assert!(matches!(result, Err(LogError::Corrupt { .. })));
}

#[tokio::test]
async fn unknown_topic_without_create() {
    let dir = temp_dir();
    let reader = open(
        dir.path(),
        LogConfig::default().with_open_flags(OpenFlags::APPEND),
    );
    let result = reader
        .try_send("nowhere", attempt("k", &["v"], Revision::origin(0)))
        .await;
    assert!(matches!(result, Err(LogError::UnknownTopic { .. })));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_first_use_opens_the_topic_once() {
    let dir = temp_dir();
    let log = open(dir.path(), LogConfig::default());
    let tail = write_commits(&log, "orders", 3).await;
    assert!(log.close().await.is_ok());

    let reopened = open(dir.path(), LogConfig::default());
    let writers: Vec<_> = (0..8)
        .map(|i| {
            let log = reopened.clone();
            tokio::spawn(async move {
                let opened = log
                    .open_topic("orders")
                    .await
                    .unwrap_or_else(|e| panic!("{e}"));
                let value = format!("writer-{i}");
                let result = log
                    .try_send("orders", attempt("key", &[&value], tail))
                    .await
                    .unwrap_or_else(|e| panic!("{e}"));
                (opened.get(0), result.is_committed())
            })
        })
        .collect();

    let mut winners = 0;
    for writer in writers {
        let (opened, committed) = writer.await.unwrap_or_else(|e| panic!("{e}"));
        assert!(opened == tail || opened == Revision::new(0, 4));
        winners += usize::from(committed);
    }
    assert_eq!(winners, 1);
    assert!(reopened.verify("orders").is_ok());
    assert!(reopened.close().await.is_ok());

    let strict = open(
        dir.path(),
        LogConfig::default().with_open_flags(OpenFlags::APPEND),
    );
    assert!(matches!(
        strict.open_topic("nowhere").await,
        Err(LogError::UnknownTopic { .. })
    ));
}
