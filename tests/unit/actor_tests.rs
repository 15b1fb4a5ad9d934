//! Serialized access through the resource actor.

use eventlog_rs::{ActorError, ResourceActor};
use std::sync::Arc;

#[derive(Debug, Default)]
struct Account {
    balance: i64,
    history: Vec<i64>,
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_units_never_interleave() {
    let actor = Arc::new(
        ResourceActor::spawn("account", Account::default()).unwrap_or_else(|e| panic!("{e}")),
    );

    let mut handles = Vec::new();
    for task in 0..8i64 {
        let actor = Arc::clone(&actor);
        handles.push(tokio::spawn(async move {
            for _ in 0..50 {
                let result = actor
                    .execute(move |account: &mut Account| {
                        // A read-modify-write that would lose updates if units overlapped.
                        let before = account.balance;
                        std::thread::yield_now();
                        account.balance = before + task;
                        account.history.push(task);
                    })
                    .await;
                assert!(result.is_ok());
            }
        }));
    }
    for handle in handles {
        assert!(handle.await.is_ok());
    }

    let (balance, units) = actor
        .execute(|account: &mut Account| (account.balance, account.history.len()))
        .await
        .unwrap_or_else(|e| panic!("{e}"));
    assert_eq!(balance, (0..8).sum::<i64>() * 50);
    assert_eq!(units, 400);
    assert!(actor.completed_units() >= 400);
}

#[tokio::test]
async fn panicking_unit_leaves_the_resource_usable() {
    let actor =
        ResourceActor::spawn("fragile", Account::default()).unwrap_or_else(|e| panic!("{e}"));

    let panicked = actor
        .execute(|account: &mut Account| {
            account.balance = 10;
            if account.balance > 5 {
                panic!("overdrawn");
            }
        })
        .await;
    assert!(matches!(
        panicked,
        Err(ActorError::Panicked { ref message, .. }) if message.contains("overdrawn")
    ));

    let balance = actor.execute(|account: &mut Account| account.balance).await;
    assert_eq!(balance.ok(), Some(10));
}

#[tokio::test]
async fn close_runs_teardown_and_refuses_new_units() {
    let actor =
        ResourceActor::spawn("closing", Account::default()).unwrap_or_else(|e| panic!("{e}"));
    let (tx, rx) = tokio::sync::oneshot::channel();

    let performed = actor.perform(|account: &mut Account| account.balance = 3);
    assert!(performed.await.is_ok());
    let closed = actor
        .close(move |account: &mut Account| {
            let _ = tx.send(account.balance);
        })
        .await;
    assert!(closed.is_ok());
    assert_eq!(rx.await.ok(), Some(3));
    assert!(actor.is_closed());

    let late = actor.execute(|account: &mut Account| account.balance).await;
    assert!(matches!(late, Err(ActorError::Closed { .. })));
    assert!(matches!(
        actor.close(|_: &mut Account| {}).await,
        Err(ActorError::Closed { .. })
    ));
}
