use std::{cell::RefCell, rc::Rc};

use assert_call::{CallRecorder, call};
use futures::{
    executor::LocalPool,
    future::{LocalFutureObj, ready},
    task::{LocalSpawn, SpawnError},
};
use pretty_assertions::assert_eq;
use rstest::rstest;

use super::*;
use crate::utils::test_helpers::{failure, reply, todo};

fn reconciler(pool: &LocalPool) -> Reconciler<&'static str> {
    Reconciler::new([todo(1, "A")], pool.spawner())
}

#[test]
fn observe_is_idempotent() {
    let pool = LocalPool::new();
    let r = reconciler(&pool);
    let (_tx, op) = reply();
    r.add(todo(1000, "B"), || op).unwrap();

    assert_eq!(r.observe(), r.observe());
}

#[test]
fn add_is_visible_before_settlement() {
    let mut pool = LocalPool::new();
    let r = reconciler(&pool);
    let (_tx, op) = reply();
    r.add(todo(1000, "B"), || op).unwrap();
    pool.run_until_stalled();

    assert_eq!(r.observe(), vec![todo(1, "A"), todo(1000, "B")]);
    assert_eq!(r.base(), vec![todo(1, "A")]);
    assert!(r.is_pending());
}

#[test]
fn add_commits_confirmed_item() {
    let mut pool = LocalPool::new();
    let r = reconciler(&pool);
    let (tx, op) = reply();
    r.add(todo(1000, "B"), || op).unwrap();

    tx.send(Ok(todo(2, "B"))).unwrap();
    pool.run_until_stalled();

    assert_eq!(r.observe(), vec![todo(1, "A"), todo(2, "B")]);
    assert_eq!(r.base(), vec![todo(1, "A"), todo(2, "B")]);
    assert_eq!(r.pending_len(), 0);
}

#[test]
fn add_rolls_back_on_failure() {
    let mut pool = LocalPool::new();
    let r = reconciler(&pool);
    let (tx, op) = reply();
    r.add(todo(1000, "C"), || op).unwrap();
    assert!(r.observe().contains(&todo(1000, "C")));

    tx.send(failure()).unwrap();
    pool.run_until_stalled();

    assert_eq!(r.observe(), vec![todo(1, "A")]);
    assert_eq!(r.base(), vec![todo(1, "A")]);
    assert!(!r.is_pending());
}

#[test]
fn concurrent_adds_settle_independently() {
    let mut pool = LocalPool::new();
    let r = reconciler(&pool);
    let (slow_tx, slow) = reply();
    let (fast_tx, fast) = reply();
    r.add(todo(1000, "slow"), || slow).unwrap();
    r.add(todo(1001, "fast"), || fast).unwrap();

    fast_tx.send(Ok(todo(3, "fast"))).unwrap();
    pool.run_until_stalled();
    assert_eq!(
        r.observe(),
        vec![todo(1, "A"), todo(3, "fast"), todo(1000, "slow")]
    );

    slow_tx.send(Ok(todo(4, "slow"))).unwrap();
    pool.run_until_stalled();
    assert_eq!(
        r.observe(),
        vec![todo(1, "A"), todo(3, "fast"), todo(4, "slow")]
    );
}

#[test]
fn confirmed_id_of_pending_add_is_rejected() {
    let mut cr = CallRecorder::new();
    let mut pool = LocalPool::new();
    let r = reconciler(&pool);
    let _s = r.on_settled(|s| {
        if let Outcome::Failure(e) = &s.outcome {
            call!("{} {}", s.mutation.item.id, e.message());
        }
    });
    let (tx, op) = reply();
    let (_tx, pending) = reply();
    r.add(todo(1000, "B"), || op).unwrap();
    r.add(todo(2000, "C"), || pending).unwrap();

    tx.send(Ok(todo(2000, "B"))).unwrap();
    pool.run_until_stalled();
    cr.verify("1000 item 2000 has a pending add");
    assert_eq!(r.observe(), vec![todo(1, "A"), todo(2000, "C")]);
    assert_eq!(r.base(), vec![todo(1, "A")]);
}

#[test]
fn confirmed_id_of_pending_remove_is_rejected() {
    let mut cr = CallRecorder::new();
    let mut pool = LocalPool::new();
    let r = Reconciler::new([todo(1, "A"), todo(2, "B")], pool.spawner());
    let _s = r.on_settled(|s| {
        if let Outcome::Failure(e) = &s.outcome {
            call!("{}", e.message());
        }
    });
    let (remove_tx, remove) = reply();
    let (add_tx, add) = reply();
    r.remove(ItemId(2), |_| remove).unwrap();
    r.add(todo(1000, "C"), || add).unwrap();

    add_tx.send(Ok(todo(2, "C"))).unwrap();
    pool.run_until_stalled();
    cr.verify("item 2 has a pending remove");
    assert_eq!(r.base(), vec![todo(1, "A"), todo(2, "B")]);

    remove_tx.send(Ok(todo(2, "B"))).unwrap();
    pool.run_until_stalled();
    assert_eq!(r.observe(), vec![todo(1, "A")]);
    assert_eq!(r.base(), vec![todo(1, "A")]);
}

#[test]
fn confirmed_id_already_in_base_is_rejected() {
    let mut cr = CallRecorder::new();
    let mut pool = LocalPool::new();
    let r = reconciler(&pool);
    let _s = r.on_settled(|s| call!("{}", s.outcome.is_success()));
    let (tx, op) = reply();
    r.add(todo(1000, "B"), || op).unwrap();

    tx.send(Ok(todo(1, "B"))).unwrap();
    pool.run_until_stalled();
    cr.verify("false");
    assert_eq!(r.observe(), vec![todo(1, "A")]);
}

#[test]
fn update_keeps_target_id_when_server_returns_another() {
    let mut pool = LocalPool::new();
    let r = Reconciler::new([Item::new(1, 150), Item::new(2, 89)], pool.spawner());
    let (tx, op) = reply();
    r.update(Item::new(2, 90), || op).unwrap();

    tx.send(Ok(Item::new(1, 90))).unwrap();
    pool.run_until_stalled();
    assert_eq!(r.base(), vec![Item::new(1, 150), Item::new(2, 90)]);
}

#[test]
fn remove_hides_item_until_confirmed() {
    let mut pool = LocalPool::new();
    let r = Reconciler::new([todo(1, "A"), todo(2, "B")], pool.spawner());
    let (tx, op) = reply();
    r.remove(ItemId(1), |_| op).unwrap();
    assert_eq!(r.observe(), vec![todo(2, "B")]);
    assert_eq!(r.base().len(), 2);

    tx.send(Ok(todo(1, "A"))).unwrap();
    pool.run_until_stalled();
    assert_eq!(r.base(), vec![todo(2, "B")]);
    assert_eq!(r.observe(), vec![todo(2, "B")]);
}

#[rstest]
#[case(RemoveFailurePolicy::Rollback, vec![todo(1, "A"), todo(2, "B")])]
#[case(RemoveFailurePolicy::KeepRemoved, vec![todo(2, "B")])]
fn remove_failure_policy(
    #[case] remove_failure: RemoveFailurePolicy,
    #[case] expected: Vec<Item<&'static str>>,
) {
    let mut pool = LocalPool::new();
    let r = Reconciler::with_options(
        [todo(1, "A"), todo(2, "B")],
        pool.spawner(),
        ReconcilerOptions { remove_failure },
    );
    let (tx, op) = reply();
    r.remove(ItemId(1), |_| op).unwrap();

    tx.send(failure()).unwrap();
    pool.run_until_stalled();
    assert_eq!(r.observe(), expected);
    assert_eq!(r.base(), expected);
}

#[test]
fn remove_passes_target_to_operation() {
    let mut cr = CallRecorder::new();
    let pool = LocalPool::new();
    let r = reconciler(&pool);
    r.remove(ItemId(1), |item| {
        call!("{} {}", item.id, item.payload);
        ready(Ok(item))
    })
    .unwrap();
    cr.verify("1 A");
}

#[test]
fn remove_of_pending_add_conflicts() {
    let pool = LocalPool::new();
    let r = reconciler(&pool);
    let (_tx, op) = reply();
    r.add(todo(1000, "B"), || op).unwrap();

    let e = r
        .remove(ItemId(1000), |item| ready(Ok(item)))
        .unwrap_err();
    assert_eq!(e.reason, ConflictReason::Pending(MutationKind::Add));

    let e = r.remove(ItemId(5), |item| ready(Ok(item))).unwrap_err();
    assert_eq!(e.reason, ConflictReason::NotFound);
}

#[test]
fn update_shows_new_payload_then_commits() {
    let mut pool = LocalPool::new();
    let r = Reconciler::new([Item::new(1, 150), Item::new(2, 89)], pool.spawner());
    let (tx, op) = reply();
    r.update(Item::new(2, 90), || op).unwrap();
    assert_eq!(
        r.observe_entries()[1],
        ViewEntry {
            item: Item::new(2, 90),
            pending: Some(MutationKind::Update)
        }
    );

    tx.send(Ok(Item::new(2, 90))).unwrap();
    pool.run_until_stalled();
    assert_eq!(r.base(), vec![Item::new(1, 150), Item::new(2, 90)]);
    assert!(r.observe_entries().iter().all(|e| !e.is_pending()));
}

#[test]
fn update_rolls_back_on_failure() {
    let mut pool = LocalPool::new();
    let r = Reconciler::new([Item::new(1, 150)], pool.spawner());
    let (tx, op) = reply();
    r.update(Item::new(1, 151), || op).unwrap();
    assert_eq!(r.observe(), vec![Item::new(1, 151)]);

    tx.send(Err(OperationFailure::new("post not found"))).unwrap();
    pool.run_until_stalled();
    assert_eq!(r.observe(), vec![Item::new(1, 150)]);
}

#[test]
fn conflict_does_not_start_operation() {
    let mut cr = CallRecorder::new();
    let pool = LocalPool::new();
    let r = reconciler(&pool);
    let e = r
        .add(todo(1, "dup"), || {
            call!("started");
            ready(Ok(todo(1, "dup")))
        })
        .unwrap_err();

    assert_eq!(e.reason, ConflictReason::Confirmed);
    assert_eq!(r.pending_len(), 0);
    cr.verify(());
}

#[test]
fn subscribe_reports_every_change() {
    let mut cr = CallRecorder::new();
    let mut pool = LocalPool::new();
    let r = reconciler(&pool);
    let s = r.subscribe(|items| {
        let ids: Vec<_> = items.iter().map(|item| item.id.to_string()).collect();
        call!("{}", ids.join(","));
    });

    let (tx, op) = reply();
    r.add(todo(1000, "B"), || op).unwrap();
    cr.verify("1,1000");

    tx.send(Ok(todo(2, "B"))).unwrap();
    pool.run_until_stalled();
    cr.verify("1,2");

    drop(s);
    let (tx, op) = reply();
    r.add(todo(1001, "C"), || op).unwrap();
    tx.send(failure()).unwrap();
    pool.run_until_stalled();
    cr.verify(());
}

#[test]
fn on_settled_reports_failures() {
    let mut cr = CallRecorder::new();
    let mut pool = LocalPool::new();
    let r = reconciler(&pool);
    let _s = r.on_settled(|s| match &s.outcome {
        Outcome::Success(item) => {
            call!("{} ok {}", s.mutation.kind, item.id);
        }
        Outcome::Failure(e) => {
            call!("{} failed: {}", s.mutation.kind, e.message());
        }
    });

    let (tx0, op0) = reply();
    let (tx1, op1) = reply();
    r.add(todo(1000, "B"), || op0).unwrap();
    r.remove(ItemId(1), |_| op1).unwrap();

    tx1.send(failure()).unwrap();
    pool.run_until_stalled();
    cr.verify("remove failed: server connection error");

    tx0.send(Ok(todo(2, "B"))).unwrap();
    pool.run_until_stalled();
    cr.verify("add ok 2");
}

#[test]
fn listener_can_submit_reentrantly() {
    let mut pool = LocalPool::new();
    let r = reconciler(&pool);
    let retried = Rc::new(RefCell::new(false));
    let _s = r.on_settled({
        let r = r.clone();
        let retried = retried.clone();
        move |s| {
            if s.outcome.failure().is_some() && !*retried.borrow() {
                *retried.borrow_mut() = true;
                let item = s.mutation.item.clone();
                r.add(item, || ready(Ok(todo(2, "B")))).unwrap();
            }
        }
    });

    let (tx, op) = reply();
    r.add(todo(1000, "B"), || op).unwrap();
    tx.send(failure()).unwrap();
    pool.run_until_stalled();

    assert_eq!(r.observe(), vec![todo(1, "A"), todo(2, "B")]);
}

#[test]
fn dropped_reconciler_ignores_late_settlement() {
    let mut pool = LocalPool::new();
    let r = reconciler(&pool);
    let (tx, op) = reply();
    r.add(todo(1000, "B"), || op).unwrap();
    drop(r);

    tx.send(Ok(todo(2, "B"))).unwrap();
    pool.run_until_stalled();
}

struct ShutdownSpawner;

impl LocalSpawn for ShutdownSpawner {
    fn spawn_local_obj(&self, _future: LocalFutureObj<'static, ()>) -> Result<(), SpawnError> {
        Err(SpawnError::shutdown())
    }
}

#[test]
fn spawn_failure_rolls_back_immediately() {
    let mut cr = CallRecorder::new();
    let r = Reconciler::new([todo(1, "A")], ShutdownSpawner);
    let _s = r.on_settled(|s| call!("{}", s.outcome.is_success()));

    let id = r.add(todo(1000, "B"), || ready(Ok(todo(2, "B"))));
    assert!(id.is_ok());
    cr.verify("false");
    assert_eq!(r.observe(), vec![todo(1, "A")]);
}

#[test]
fn duplicate_initial_ids_keep_first() {
    let pool = LocalPool::new();
    let r = Reconciler::new([todo(1, "A"), todo(1, "A'")], pool.spawner());
    assert_eq!(r.base(), vec![todo(1, "A")]);
}

#[test]
fn serialize_confirmed_list() {
    let pool = LocalPool::new();
    let r = reconciler(&pool);
    let (_tx, op) = reply();
    r.add(todo(1000, "B"), || op).unwrap();

    let json = serde_json::to_string(&r).unwrap();
    assert_eq!(json, r#"[{"id":1,"payload":"A"}]"#);
}

#[test]
fn options_from_json() {
    let o: ReconcilerOptions =
        serde_json::from_str(r#"{"remove_failure":"keep_removed"}"#).unwrap();
    assert_eq!(o.remove_failure, RemoveFailurePolicy::KeepRemoved);

    let o: ReconcilerOptions = serde_json::from_str("{}").unwrap();
    assert_eq!(o, ReconcilerOptions::default());
    assert_eq!(o.remove_failure.to_string(), "rollback");
}
