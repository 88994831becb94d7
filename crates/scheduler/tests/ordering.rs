use std::sync::Arc;
use std::time::Duration;

use crossrun_core_types::RelayError;
use crossrun_scheduler::metrics::{self, Stage};
use crossrun_scheduler::CommandQueue;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::time::sleep;

type Journal = Arc<Mutex<Vec<String>>>;

fn step(
    queue: &CommandQueue,
    journal: &Journal,
    name: &'static str,
    latency: Duration,
) -> crossrun_scheduler::Queued {
    let journal = journal.clone();
    queue.push(name, move || async move {
        journal.lock().push(format!("{name} start"));
        sleep(latency).await;
        journal.lock().push(format!("{name} end"));
        Ok(Value::from(name))
    })
}

#[tokio::test(start_paused = true)]
async fn drains_in_call_order_regardless_of_latency() {
    let queue = CommandQueue::default();
    let journal: Journal = Arc::default();
    let a = step(&queue, &journal, "A", Duration::from_millis(5));
    let b = step(&queue, &journal, "B", Duration::from_millis(80));
    let c = step(&queue, &journal, "C", Duration::from_millis(1));

    assert_eq!(queue.drain().await.unwrap(), Value::from("C"));
    assert_eq!(
        *journal.lock(),
        vec!["A start", "A end", "B start", "B end", "C start", "C end"]
    );
    assert_eq!(a.await.unwrap(), Value::from("A"));
    assert_eq!(b.await.unwrap(), Value::from("B"));
    assert_eq!(c.await.unwrap(), Value::from("C"));
}

#[tokio::test(start_paused = true)]
async fn failure_aborts_the_rest_of_the_drain() {
    let queue = CommandQueue::default();
    let journal: Journal = Arc::default();
    let failed = metrics::count(Stage::Failed);
    let aborted_before = metrics::count(Stage::Aborted);

    let a = step(&queue, &journal, "A", Duration::from_millis(1));
    let b = queue.push("B", || async {
        Err(RelayError::Precondition("<button> is disabled".into()))
    });
    let c = step(&queue, &journal, "C", Duration::from_millis(1));

    let err = queue.drain().await.unwrap_err();
    assert_eq!(err.name(), "PreconditionError");
    assert!(a.await.is_ok());
    assert_eq!(b.await.unwrap_err().name(), "PreconditionError");
    let aborted = c.await.unwrap_err();
    assert_eq!(aborted.name(), "AbortError");
    assert!(aborted.to_string().contains("after B failed"));
    assert_eq!(*journal.lock(), vec!["A start", "A end"]);

    assert!(metrics::count(Stage::Failed) > failed);
    assert!(metrics::count(Stage::Aborted) > aborted_before);
}

#[tokio::test(start_paused = true)]
async fn later_drains_are_independent() {
    let queue = CommandQueue::default();
    let journal: Journal = Arc::default();
    let _ = queue.push("bad", || async { Err(RelayError::NotFound("nope".into())) });
    assert!(queue.drain().await.is_err());

    let ok = step(&queue, &journal, "next", Duration::from_millis(1));
    queue.drain().await.unwrap();
    assert!(ok.await.is_ok());
}

#[test]
fn queued_handles_wait_for_a_drain() {
    let queue = CommandQueue::default();
    let mut handle = tokio_test::task::spawn(queue.push("idle", || async { Ok(Value::Null) }));
    tokio_test::assert_pending!(handle.poll());
    assert_eq!(handle.label(), "idle");
}
