//! Append, read and conflict behaviour of the file channel.

use crate::common::{attempt, open, temp_dir};
use eventlog_rs::{CommitResult, FanoutConfig, LogConfig, LogError, Revision, Revisions, Sink};
use proptest::prelude::*;
use std::sync::Arc;

// ---------------------------------------------------------------------------
// Optimistic concurrency
// ---------------------------------------------------------------------------

#[tokio::test]
async fn first_append_commits_and_stale_append_conflicts() {
    let dir = temp_dir();
    let log = open(dir.path(), LogConfig::default());

    let first = log
        .try_send("carts", attempt("A", &["x"], Revision::new(0, 0)))
        .await
        .unwrap_or_else(|e| panic!("{e}"));
    let committed = first
        .committed()
        .cloned()
        .unwrap_or_else(|| panic!("not committed"));
    assert_eq!(committed.expected, Revision::new(0, 0));
    assert_eq!(committed.actual, Revision::new(0, 1));
    assert_eq!(committed.key.as_ref(), b"A");

    let stale = log
        .try_send("carts", attempt("A", &["y"], Revision::new(0, 0)))
        .await
        .unwrap_or_else(|e| panic!("{e}"));
    assert_eq!(
        stale,
        CommitResult::Conflict {
            expected: Revision::new(0, 0),
            actual: Revision::new(0, 1),
        }
    );

    // Nothing was written by the conflicting attempt.
    let history = log.request("carts", Revision::origin(0), 10);
    assert_eq!(history.map(|h| h.len()).ok(), Some(1));
    assert!(log.close().await.is_ok());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_writers_on_one_revision_have_one_winner() {
    let dir = temp_dir();
    let log = open(dir.path(), LogConfig::default());

    let mut handles = Vec::new();
    for writer in 0..16 {
        let log = log.clone();
        handles.push(tokio::spawn(async move {
            let name = format!("w{writer}");
            let first = attempt(&name, &["payload"], Revision::origin(0));
            log.try_send("race", first).await
        }));
    }

    let mut committed = 0;
    let mut conflicts = 0;
    for handle in handles {
        match handle.await {
            Ok(Ok(CommitResult::Committed(_))) => committed += 1,
            Ok(Ok(CommitResult::Conflict { actual, .. })) => {
                assert_eq!(actual, Revision::new(0, 1));
                conflicts += 1;
            }
            other => panic!("unexpected outcome {other:?}"),
        }
    }
    assert_eq!(committed, 1);
    assert_eq!(conflicts, 15);
    assert!(log.close().await.is_ok());
}

#[tokio::test]
async fn partitions_advance_independently() {
    let dir = temp_dir();
    let log = open(dir.path(), LogConfig::default().with_partitions(3));

    for partition in [0u32, 2, 2, 0, 2] {
        let tail = log
            .tail("orders")
            .await
            .unwrap_or_else(|e| panic!("{e}"))
            .get(partition);
        let next = attempt("k", &["a", "b"], tail);
        let result = log.try_send("orders", next).await;
        assert!(matches!(result, Ok(CommitResult::Committed(_))));
    }

    let tail = log
        .tail("orders")
        .await
        .unwrap_or_else(|e| panic!("{e}"));
    assert_eq!(tail.get(0), Revision::new(0, 4));
    assert_eq!(tail.get(1), Revision::new(1, 0));
    assert_eq!(tail.get(2), Revision::new(2, 6));
    assert!(log.close().await.is_ok());
}

// ---------------------------------------------------------------------------
// Reads
// ---------------------------------------------------------------------------

#[tokio::test]
async fn replay_is_deterministic() {
    let dir = temp_dir();
    let log = open(dir.path(), LogConfig::default());
    let mut expected = Revision::origin(0);
    for i in 0..10 {
        let value = format!("v{i}");
        let result = log
            .try_send("ledger", attempt("acct", &[&value, "extra"], expected))
            .await
            .unwrap_or_else(|e| panic!("{e}"));
        expected = result.actual();
    }

    let first = log
        .request("ledger", Revision::origin(0), 100)
        .unwrap_or_else(|e| panic!("{e}"));
    let second = log
        .request("ledger", Revision::origin(0), 100)
        .unwrap_or_else(|e| panic!("{e}"));
    assert_eq!(first.len(), 10);
    assert_eq!(first, second);
    assert!(log.close().await.is_ok());

    let reopened = open(dir.path(), LogConfig::default());
    let third = reopened
        .request("ledger", Revision::origin(0), 100)
        .unwrap_or_else(|e| panic!("{e}"));
    assert_eq!(first, third);
    assert!(reopened.close().await.is_ok());
}

#[tokio::test]
async fn request_counts_commits_and_resumes_at_actual() {
    let dir = temp_dir();
    let log = open(dir.path(), LogConfig::default());
    let mut expected = Revision::origin(0);
    for _ in 0..5 {
        let result = log
            .try_send("t", attempt("k", &["a", "b", "c"], expected))
            .await
            .unwrap_or_else(|e| panic!("{e}"));
        expected = result.actual();
    }

    let head = log
        .request("t", Revision::origin(0), 2)
        .unwrap_or_else(|e| panic!("{e}"));
    assert_eq!(head.len(), 2);
    assert_eq!(head[1].actual, Revision::new(0, 6));

    let rest = log
        .request("t", head[1].actual, 100)
        .unwrap_or_else(|e| panic!("{e}"));
    assert_eq!(rest.len(), 3);
    assert_eq!(rest[0].expected, Revision::new(0, 6));
    assert_eq!(rest[2].actual, Revision::new(0, 15));
    assert!(log.close().await.is_ok());
}

#[tokio::test]
async fn small_map_windows_read_everything() {
    let dir = temp_dir();
    let config = LogConfig::default()
        .with_max_entry_bytes(256)
        .with_max_map_bytes(256);
    let log = open(dir.path(), config);
    let big = "z".repeat(200);
    let mut expected = Revision::origin(0);
    for _ in 0..8 {
        let result = log
            .try_send("wide", attempt("k", &[&big], expected))
            .await
            .unwrap_or_else(|e| panic!("{e}"));
        expected = result.actual();
    }

    let all = log
        .request("wide", Revision::origin(0), 8)
        .unwrap_or_else(|e| panic!("{e}"));
    assert_eq!(all.len(), 8);
    assert!(all.iter().all(|c| c.entries[0].len() == 200));
    assert!(log.close().await.is_ok());
}

#[tokio::test]
async fn batch_append_publishes_past_ring_capacity() {
    let dir = temp_dir();
    let config = LogConfig::default().with_fanout(FanoutConfig::Ring { capacity: 2 });
    let log = open(dir.path(), config);

    let attempts = (0..5u64)
        .map(|i| attempt("k", &["e"], Revision::new(0, i)))
        .collect();
    let results = log
        .try_send_all("bulk", attempts)
        .await
        .unwrap_or_else(|e| panic!("{e}"));
    let committed = results
        .iter()
        .all(|r| matches!(r, Ok(CommitResult::Committed(_))));
    assert!(committed);
    let tail = log.tail("bulk").await.map(|t| t.get(0)).ok();
    assert_eq!(tail, Some(Revision::new(0, 5)));
    assert!(log.close().await.is_ok());
}

#[tokio::test]
async fn cold_load_delivers_and_checkpoints() {
    use crate::common::Recorder;
    use eventlog_rs::ColdSource;

    let dir = temp_dir();
    let log = open(dir.path(), LogConfig::default());
    let mut expected = Revision::origin(0);
    for _ in 0..4 {
        let result = log
            .try_send("cold", attempt("k", &["a"], expected))
            .await
            .unwrap_or_else(|e| panic!("{e}"));
        expected = result.actual();
    }

    let mut from_two = Revisions::new();
    from_two.set(Revision::new(0, 2));
    let mut recorder = Recorder::new(from_two);
    let reached = log
        .load("cold", &mut recorder)
        .await
        .unwrap_or_else(|e| panic!("{e}"));
    assert_eq!(reached.get(0), Revision::new(0, 4));
    let delivered = vec![Revision::new(0, 3), Revision::new(0, 4)];
    assert_eq!(recorder.revisions(), delivered);
    let saved = recorder.saved().map(|s| s.get(0));
    assert_eq!(saved, Some(Revision::new(0, 4)));
    assert!(log.close().await.is_ok());
}

#[tokio::test]
async fn cold_load_stops_at_subscriber_error() {
    use crate::common::Recorder;
    use eventlog_rs::ColdSource;

    let dir = temp_dir();
    let log = open(dir.path(), LogConfig::default());
    let mut expected = Revision::origin(0);
    for _ in 0..4 {
        let result = log
            .try_send("cold", attempt("k", &["a"], expected))
            .await
            .unwrap_or_else(|e| panic!("{e}"));
        expected = result.actual();
    }

    let mut recorder = Recorder::new(Revisions::new());
    recorder.fail_at = Some(Revision::new(0, 3));
    let result = log.load("cold", &mut recorder).await;
    assert!(matches!(result, Err(LogError::Subscriber { .. })));
    assert_eq!(recorder.count(), 2);
    // The failed entry is not part of the checkpoint.
    let saved = recorder.saved().map(|s| s.get(0));
    assert_eq!(saved, Some(Revision::new(0, 2)));
    assert!(log.close().await.is_ok());
}

#[tokio::test]
async fn topics_lists_created_directories() {
    let dir = temp_dir();
    let log = open(dir.path(), LogConfig::default());
    for topic in ["b", "a"] {
        let first = attempt("k", &["v"], Revision::origin(0));
        let result = log.try_send(topic, first).await;
        assert!(result.is_ok());
    }
    assert_eq!(
        log.topics().unwrap_or_default(),
        vec!["a".to_string(), "b".to_string()]
    );
    assert!(log.close().await.is_ok());
}

// ---------------------------------------------------------------------------
// Properties
// ---------------------------------------------------------------------------

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn appends_move_the_tail_by_their_entry_count(sizes in prop::collection::vec(1usize..6, 1..20)) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap_or_else(|e| panic!("{e}"));
        runtime.block_on(async {
            let dir = temp_dir();
            let log = Arc::new(open(dir.path(), LogConfig::default().with_open_flags(
                eventlog_rs::OpenFlags::CREATE | eventlog_rs::OpenFlags::APPEND,
            )));
            let mut tail = Revision::origin(0);
            for n in &sizes {
                let entries: Vec<String> = (0..*n).map(|i| format!("e{i}")).collect();
                let refs: Vec<&str> = entries.iter().map(String::as_str).collect();
                let result = log
                    .try_send("prop", attempt("k", &refs, tail))
                    .await
                    .unwrap_or_else(|e| panic!("{e}"));
                let committed = result
                    .committed()
                    .cloned()
                    .unwrap_or_else(|| panic!("conflict"));
                assert_eq!(committed.expected, tail);
                assert_eq!(committed.actual.offset, tail.offset + *n as u64);
                tail = committed.actual;
            }

            let total: usize = sizes.iter().sum();
            assert_eq!(tail.offset, total as u64);
            let history = log
                .request("prop", Revision::origin(0), sizes.len())
                .unwrap_or_else(|e| panic!("{e}"));
            let mut previous = Revision::origin(0);
            for commit in &history {
                assert_eq!(commit.expected, previous);
                assert!(commit.actual > commit.expected);
                previous = commit.actual;
            }
            assert!(log.close().await.is_ok());
        });
    }
}
