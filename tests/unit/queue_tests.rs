//! Broadcast behaviour shared by both fan-out backends.

use eventlog_rs::eventlog::queue::{self, MailboxQueue, RingQueue};
use eventlog_rs::{FanoutConfig, FanoutQueue, Polled, QueueError, Transaction};
use proptest::prelude::*;
use std::sync::Arc;
use std::thread;

fn drain(consumer: &mut dyn eventlog_rs::QueueConsumer<u64>) -> Vec<u64> {
    let mut out = Vec::new();
    while let Polled::Ready(value) = consumer.next() {
        out.push(value);
    }
    out
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn every_consumer_sees_every_batch_in_order(
        batches in prop::collection::vec(prop::collection::vec(any::<u64>(), 1..8), 1..12),
        consumers in 1usize..4,
        use_ring in any::<bool>(),
    ) {
        let config = if use_ring {
            FanoutConfig::Ring { capacity: 128 }
        } else {
            FanoutConfig::Mailbox { max_pending_batches: 16 }
        };
        let queue = queue::build::<u64>(&config);
        let mut handles: Vec<_> = (0..consumers).map(|_| queue.subscribe()).collect();

        let mut expected = Vec::new();
        for batch in &batches {
            expected.extend_from_slice(batch);
            let mut tx = Transaction::begin(queue.as_ref(), batch.len())
                .unwrap_or_else(|e| panic!("{e}"));
            for value in batch {
                prop_assert!(tx.add(*value).is_ok());
            }
            prop_assert!(tx.commit().is_ok());
        }

        for handle in &mut handles {
            prop_assert_eq!(drain(handle.as_mut()), expected.clone());
        }
    }
}

#[test]
fn late_consumer_sees_only_later_values() {
    for queue in [
        queue::build::<u64>(&FanoutConfig::Ring { capacity: 16 }),
        queue::build::<u64>(&FanoutConfig::Mailbox {
            max_pending_batches: 16,
        }),
    ] {
        assert!(queue.publish_batch(vec![1, 2]).is_ok());
        let mut late = queue.subscribe();
        assert!(queue.publish_batch(vec![3]).is_ok());
        assert_eq!(drain(late.as_mut()), vec![3]);
    }
}

#[test]
fn dropped_transaction_publishes_nothing() {
    let queue = RingQueue::<u64>::new(8);
    let mut consumer = queue.subscribe();
    {
        let mut tx = Transaction::begin(&queue, 2).unwrap_or_else(|e| panic!("{e}"));
        assert!(tx.add(1).is_ok());
        assert!(tx.add(2).is_ok());
    }
    assert!(matches!(consumer.next(), Polled::Empty));
}

#[test]
fn full_ring_rejects_try_publish_until_drained() {
    let queue = RingQueue::<u64>::new(4);
    let mut consumer = queue.subscribe();
    assert!(queue.try_publish_batch(vec![1, 2, 3, 4]).is_ok());

    let rejected = queue.try_publish_batch(vec![5]);
    let rejected = rejected
        .err()
        .unwrap_or_else(|| panic!("expected a full ring"));
    assert_eq!(rejected.reason, QueueError::Full);
    assert_eq!(rejected.batch, vec![5]);

    assert!(matches!(consumer.next(), Polled::Ready(1)));
    assert!(queue.try_publish_batch(vec![5]).is_ok());
    assert_eq!(drain(consumer.as_mut()), vec![2, 3, 4, 5]);
}

#[test]
fn full_mailbox_rejects_try_publish() {
    let queue = MailboxQueue::<u64>::new(1);
    let mut consumer = queue.subscribe();
    assert!(queue.try_publish_batch(vec![1]).is_ok());
    let rejected = queue.try_publish_batch(vec![2]);
    assert!(matches!(rejected, Err(ref r) if r.reason == QueueError::Full));
    assert_eq!(drain(consumer.as_mut()), vec![1]);
}

#[test]
fn oversized_batch_is_refused_by_the_ring() {
    let queue = RingQueue::<u64>::new(2);
    assert!(matches!(
        Transaction::begin(&queue, 3),
        Err(QueueError::BatchTooLarge { len: 3, capacity: 2 })
    ));
}

#[test]
fn close_lets_consumers_drain_then_reports_closed() {
    for queue in [
        queue::build::<u64>(&FanoutConfig::Ring { capacity: 8 }),
        queue::build::<u64>(&FanoutConfig::Mailbox {
            max_pending_batches: 8,
        }),
    ] {
        let mut consumer = queue.subscribe();
        assert!(queue.publish_batch(vec![7, 8]).is_ok());
        queue.close();
        assert!(queue.is_closed());
        assert!(queue.publish_batch(vec![9]).is_err());
        assert_eq!(drain(consumer.as_mut()), vec![7, 8]);
        assert!(matches!(consumer.next(), Polled::Closed));
    }
}

#[test]
fn blocking_publish_waits_for_slow_consumers() {
    for queue in [
        queue::build::<u64>(&FanoutConfig::Ring { capacity: 4 }),
        queue::build::<u64>(&FanoutConfig::Mailbox {
            max_pending_batches: 2,
        }),
    ] {
        let queue: Arc<dyn FanoutQueue<u64>> = queue;
        let consumers: Vec<_> = (0..3).map(|_| queue.subscribe()).collect();

        let readers: Vec<_> = consumers
            .into_iter()
            .map(|mut consumer| {
                thread::spawn(move || {
                    let mut seen = Vec::new();
                    loop {
                        match consumer.next() {
                            Polled::Ready(value) => seen.push(value),
                            Polled::Empty => thread::yield_now(),
                            Polled::Closed => return seen,
                        }
                    }
                })
            })
            .collect();

        for value in 0..200u64 {
            assert!(queue.publish_batch(vec![value]).is_ok());
        }
        queue.close();

        let expected: Vec<u64> = (0..200).collect();
        for reader in readers {
            let seen = reader.join().unwrap_or_else(|_| panic!("reader panicked"));
            assert_eq!(seen, expected);
        }
    }
}

#[test]
fn dropped_consumer_is_unregistered() {
    let queue = RingQueue::<u64>::new(2);
    let consumer = queue.subscribe();
    assert_eq!(queue.consumer_count(), 1);
    drop(consumer);
    assert_eq!(queue.consumer_count(), 0);
    // Nothing holds the ring back any more.
    for value in 0..10 {
        assert!(queue.try_publish_batch(vec![value]).is_ok());
    }
}
