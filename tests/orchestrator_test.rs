//! Integration tests for the work orchestrator.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use palindrome_rs::error::Error;
use palindrome_rs::model::{Fingerprint, MessageId, Outcome, Verdict};
use palindrome_rs::orchestrator::{
    AttachKind, Orchestrator, OrchestratorConfig, TryRecvError, WorkOrchestrator,
};
use palindrome_rs::work::{Palindrome, WorkFunction};

fn orchestrator() -> WorkOrchestrator<Palindrome> {
    WorkOrchestrator::new(Palindrome, OrchestratorConfig::default())
        .expect("failed to create orchestrator")
}

/// Palindrome work that counts how often it runs.
fn counting(calls: Arc<AtomicUsize>) -> impl Fn(&str) -> Outcome + Send + Sync + 'static {
    move |payload: &str| {
        calls.fetch_add(1, Ordering::SeqCst);
        Palindrome.compute(payload)
    }
}

async fn wait_until_done(
    orch: &impl Orchestrator,
    requester: MessageId,
    fingerprint: &Fingerprint,
) -> Outcome {
    for _ in 0..300 {
        if let Some(snapshot) = orch.poll(requester, fingerprint) {
            if snapshot.outcome.done {
                return snapshot.outcome;
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("work for {fingerprint} never finished");
}

// ---------------------------------------------------------------------------
// Attach
// ---------------------------------------------------------------------------

#[tokio::test]
async fn attach_returns_pending_and_computes_in_background() {
    let orch = orchestrator();
    let fp = Fingerprint::of("racecar");

    let attached = orch.attach(MessageId(1), &fp, "racecar");
    assert_eq!(attached.kind, AttachKind::Created);
    assert_eq!(attached.outcome, Outcome::pending());

    let outcome = wait_until_done(&orch, MessageId(1), &fp).await;
    assert_eq!(outcome, Outcome::finished(Verdict::True));
}

#[tokio::test]
async fn first_subscriber_is_notified() {
    let orch = orchestrator();
    let fp = Fingerprint::of("hello");

    let attached = orch.attach(MessageId(1), &fp, "hello");
    let update = tokio::time::timeout(Duration::from_secs(2), attached.listener.recv())
        .await
        .expect("timed out waiting for notification");

    assert_eq!(update, Some(Outcome::finished(Verdict::False)));
}

#[tokio::test]
async fn same_fingerprint_runs_work_once() {
    let calls = Arc::new(AtomicUsize::new(0));
    let orch = WorkOrchestrator::new(counting(calls.clone()), OrchestratorConfig::default())
        .unwrap();
    let fp = Fingerprint::of("abba");

    let first = orch.attach(MessageId(1), &fp, "abba");
    let second = orch.attach(MessageId(2), &fp, "abba");
    assert_eq!(first.kind, AttachKind::Created);
    assert_eq!(second.kind, AttachKind::Joined);
    assert!(!first.listener.same_channel(&second.listener));

    wait_until_done(&orch, MessageId(2), &fp).await;
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(orch.subscriber_count(&fp), Some(2));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_attaches_share_one_computation() {
    let calls = Arc::new(AtomicUsize::new(0));
    let orch = WorkOrchestrator::new(counting(calls.clone()), OrchestratorConfig::default())
        .unwrap();
    let fp = Fingerprint::of("step on no pets");

    let handles: Vec<_> = (1..=16)
        .map(|n| {
            let orch = orch.clone();
            let fp = fp.clone();
            tokio::spawn(async move { orch.attach(MessageId(n), &fp, "step on no pets").kind })
        })
        .collect();

    let mut created = 0;
    for handle in handles {
        if handle.await.unwrap() == AttachKind::Created {
            created += 1;
        }
    }
    assert_eq!(created, 1);

    let outcome = wait_until_done(&orch, MessageId(1), &fp).await;
    assert_eq!(outcome.verdict, Verdict::True);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(orch.subscriber_count(&fp), Some(16));
}

#[tokio::test]
async fn reattach_reuses_channel() {
    let orch = orchestrator();
    let fp = Fingerprint::of("level");

    let first = orch.attach(MessageId(7), &fp, "level");
    let again = orch.attach(MessageId(7), &fp, "level");

    assert_eq!(again.kind, AttachKind::Rejoined);
    assert!(first.listener.same_channel(&again.listener));
    assert_eq!(orch.subscriber_count(&fp), Some(1));
}

#[tokio::test]
async fn joining_finished_work_returns_result_immediately() {
    let calls = Arc::new(AtomicUsize::new(0));
    let orch = WorkOrchestrator::new(counting(calls.clone()), OrchestratorConfig::default())
        .unwrap();
    let fp = Fingerprint::of("noon");

    orch.attach(MessageId(1), &fp, "noon");
    wait_until_done(&orch, MessageId(1), &fp).await;

    let late = orch.attach(MessageId(2), &fp, "noon");
    assert_eq!(late.kind, AttachKind::Joined);
    assert_eq!(late.outcome, Outcome::finished(Verdict::True));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn empty_payload_finishes_unknown() {
    let orch = orchestrator();
    let fp = Fingerprint::of("");

    orch.attach(MessageId(1), &fp, "");
    let outcome = wait_until_done(&orch, MessageId(1), &fp).await;

    assert_eq!(outcome.verdict, Verdict::Unknown);
    assert_eq!(outcome.as_option(), None);
}

#[tokio::test]
async fn panicking_work_is_recorded_as_failed() {
    let orch = WorkOrchestrator::new(
        |_: &str| -> Outcome { panic!("predicate exploded") },
        OrchestratorConfig::default(),
    )
    .unwrap();
    let fp = Fingerprint::of("boom");

    orch.attach(MessageId(1), &fp, "boom");
    let outcome = wait_until_done(&orch, MessageId(1), &fp).await;

    assert!(outcome.is_failed());
    assert_eq!(outcome.as_option(), None);
}

#[tokio::test]
async fn work_returning_pending_is_recorded_as_failed() {
    let orch =
        WorkOrchestrator::new(|_: &str| Outcome::pending(), OrchestratorConfig::default()).unwrap();
    let fp = Fingerprint::of("never");

    orch.attach(MessageId(1), &fp, "never");
    let outcome = wait_until_done(&orch, MessageId(1), &fp).await;

    assert!(outcome.is_failed());
}

// ---------------------------------------------------------------------------
// Poll
// ---------------------------------------------------------------------------

#[tokio::test]
async fn poll_unknown_fingerprint_is_not_found() {
    let orch = orchestrator();
    assert!(orch.poll(MessageId(1), &Fingerprint::of("nothing")).is_none());
}

#[tokio::test]
async fn poll_without_subscription_has_no_listener() {
    let orch = orchestrator();
    let fp = Fingerprint::of("kayak");
    orch.attach(MessageId(1), &fp, "kayak");

    let snapshot = orch.poll(MessageId(99), &fp).expect("work should be tracked");
    assert!(snapshot.listener.is_none());

    // Polling never subscribes.
    assert_eq!(orch.subscriber_count(&fp), Some(1));
}

#[tokio::test]
async fn poll_with_subscription_returns_same_listener() {
    let orch = orchestrator();
    let fp = Fingerprint::of("refer");
    let attached = orch.attach(MessageId(3), &fp, "refer");

    let snapshot = orch.poll(MessageId(3), &fp).unwrap();
    let listener = snapshot.listener.expect("subscriber should have a listener");
    assert!(listener.same_channel(&attached.listener));
}

// ---------------------------------------------------------------------------
// Detach
// ---------------------------------------------------------------------------

#[tokio::test]
async fn work_is_removed_only_after_last_detach() {
    let orch = orchestrator();
    let fp = Fingerprint::of("madam");

    for n in 1..=3 {
        orch.attach(MessageId(n), &fp, "madam");
    }

    orch.detach(MessageId(1), &fp).unwrap();
    orch.detach(MessageId(2), &fp).unwrap();
    assert_eq!(orch.subscriber_count(&fp), Some(1));
    assert!(orch.poll(MessageId(3), &fp).is_some());

    orch.detach(MessageId(3), &fp).unwrap();
    assert!(orch.poll(MessageId(3), &fp).is_none());
    assert!(orch.is_empty());
}

#[tokio::test]
async fn detach_unknown_subscriber_is_not_found() {
    let orch = orchestrator();
    let fp = Fingerprint::of("civic");
    orch.attach(MessageId(1), &fp, "civic");

    let err = orch.detach(MessageId(2), &fp).unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));
    assert_eq!(orch.subscriber_count(&fp), Some(1));
}

#[tokio::test]
async fn detach_untracked_work_is_noop() {
    let orch = orchestrator();
    orch.detach(MessageId(1), &Fingerprint::of("gone")).unwrap();
}

#[tokio::test]
async fn detach_releases_only_that_channel() {
    let orch = orchestrator();
    let fp = Fingerprint::of("rotor");
    let leaving = orch.attach(MessageId(1), &fp, "rotor").listener;
    let staying = orch.attach(MessageId(2), &fp, "rotor").listener;

    orch.detach(MessageId(1), &fp).unwrap();

    let closed = tokio::time::timeout(Duration::from_secs(2), async {
        // Drain a result that may have been delivered before the detach.
        while leaving.recv().await.is_some() {}
    })
    .await;
    assert!(closed.is_ok(), "released channel should close");

    let update = tokio::time::timeout(Duration::from_secs(2), staying.recv())
        .await
        .unwrap();
    assert_eq!(update, Some(Outcome::finished(Verdict::True)));
}

#[tokio::test]
async fn try_recv_yields_to_waiting_clone() {
    let orch = WorkOrchestrator::new(
        Palindrome,
        OrchestratorConfig {
            work_delay: Duration::from_millis(200),
            ..Default::default()
        },
    )
    .unwrap();
    let fp = Fingerprint::of("stats");
    let listener = orch.attach(MessageId(1), &fp, "stats").listener;

    let waiting = listener.clone();
    let waiter = tokio::spawn(async move { waiting.recv().await });
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert_eq!(listener.try_recv(), Err(TryRecvError::Empty));

    let update = tokio::time::timeout(Duration::from_secs(2), waiter)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(update, Some(Outcome::finished(Verdict::True)));
    assert_eq!(listener.try_recv(), Err(TryRecvError::Empty));
}

// ---------------------------------------------------------------------------
// Cancellation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn detach_during_delay_cancels_work() {
    let calls = Arc::new(AtomicUsize::new(0));
    let orch = WorkOrchestrator::new(
        counting(calls.clone()),
        OrchestratorConfig {
            work_delay: Duration::from_millis(400),
            ..Default::default()
        },
    )
    .unwrap();
    let fp = Fingerprint::of("redder");

    let listener = orch.attach(MessageId(1), &fp, "redder").listener;
    tokio::time::sleep(Duration::from_millis(50)).await;
    orch.detach(MessageId(1), &fp).unwrap();

    tokio::time::sleep(Duration::from_millis(600)).await;

    assert!(orch.poll(MessageId(1), &fp).is_none());
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert_eq!(listener.try_recv(), Err(TryRecvError::Disconnected));
}

#[tokio::test]
async fn late_result_does_not_leak_into_new_work() {
    // The first call is slow and wrong; the second is fast and right.
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let orch = WorkOrchestrator::new(
        move |_: &str| {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                std::thread::sleep(Duration::from_millis(300));
                Outcome::finished(Verdict::False)
            } else {
                Outcome::finished(Verdict::True)
            }
        },
        OrchestratorConfig::default(),
    )
    .unwrap();
    let fp = Fingerprint::of("tenet");

    orch.attach(MessageId(1), &fp, "tenet");
    tokio::time::sleep(Duration::from_millis(50)).await;
    orch.detach(MessageId(1), &fp).unwrap();

    let second = orch.attach(MessageId(2), &fp, "tenet");
    assert_eq!(second.kind, AttachKind::Created);

    let outcome = wait_until_done(&orch, MessageId(2), &fp).await;
    assert_eq!(outcome.verdict, Verdict::True);

    // Let the slow first call finish and try to commit.
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    let snapshot = orch.poll(MessageId(2), &fp).unwrap();
    assert_eq!(snapshot.outcome.verdict, Verdict::True);
}

#[tokio::test]
async fn late_result_after_last_detach_is_discarded() {
    let orch = WorkOrchestrator::new(
        |payload: &str| {
            std::thread::sleep(Duration::from_millis(200));
            Palindrome.compute(payload)
        },
        OrchestratorConfig::default(),
    )
    .unwrap();
    let fp = Fingerprint::of("stats");

    let listener = orch.attach(MessageId(1), &fp, "stats").listener;
    tokio::time::sleep(Duration::from_millis(20)).await;
    orch.detach(MessageId(1), &fp).unwrap();

    tokio::time::sleep(Duration::from_millis(400)).await;
    assert!(orch.poll(MessageId(1), &fp).is_none());
    assert!(orch.is_empty());
    assert_eq!(listener.try_recv(), Err(TryRecvError::Disconnected));
}

// ---------------------------------------------------------------------------
// ClearAll
// ---------------------------------------------------------------------------

#[tokio::test]
async fn clear_all_forgets_everything() {
    let orch = WorkOrchestrator::new(
        Palindrome,
        OrchestratorConfig {
            work_delay: Duration::from_millis(200),
            ..Default::default()
        },
    )
    .unwrap();

    let texts = ["racecar", "hello", "wow"];
    let listeners: Vec<_> = texts
        .iter()
        .enumerate()
        .map(|(n, text)| {
            orch.attach(MessageId(n as u64 + 1), &Fingerprint::of(text), text)
                .listener
        })
        .collect();
    assert_eq!(orch.len(), 3);

    orch.clear_all().unwrap();
    assert!(orch.is_empty());

    tokio::time::sleep(Duration::from_millis(400)).await;
    for (n, text) in texts.iter().enumerate() {
        assert!(orch.poll(MessageId(n as u64 + 1), &Fingerprint::of(text)).is_none());
    }
    for listener in &listeners {
        assert_eq!(listener.try_recv(), Err(TryRecvError::Disconnected));
    }
}

#[test]
fn orchestrator_requires_runtime() {
    let result = WorkOrchestrator::new(Palindrome, OrchestratorConfig::default());
    assert!(matches!(result, Err(Error::Runtime(_))));
}
