//! Agent bus behavior: FIFO dispatch, concurrency cap, bounded submission,
//! callbacks.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use atelier::bus::{AgentBus, TaskCallback, TaskHandler, TaskItem, TaskOutcome};
use atelier::CoreError;
use serde_json::{json, Value};
use uuid::Uuid;

struct EchoHandler;

#[async_trait]
impl TaskHandler for EchoHandler {
    async fn handle(&self, item: &TaskItem) -> Result<Value, CoreError> {
        Ok(json!({"echo": item.payload.clone()}))
    }
}

/// Records dispatch-start order and tracks the in-flight high-water mark.
struct RecordingHandler {
    started: Arc<Mutex<Vec<String>>>,
    current: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
    work: Duration,
}

#[async_trait]
impl TaskHandler for RecordingHandler {
    async fn handle(&self, item: &TaskItem) -> Result<Value, CoreError> {
        self.started.lock().unwrap().push(item.task_id.clone());
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(self.work).await;
        self.current.fetch_sub(1, Ordering::SeqCst);
        Ok(json!({}))
    }
}

struct NeverFinishes;

#[async_trait]
impl TaskHandler for NeverFinishes {
    async fn handle(&self, _item: &TaskItem) -> Result<Value, CoreError> {
        std::future::pending::<()>().await;
        unreachable!()
    }
}

#[tokio::test]
async fn submit_wait_round_trip() {
    let bus = AgentBus::new(10);
    let agent = Uuid::new_v4();
    bus.register(agent, Arc::new(EchoHandler), 3);

    let handle = bus
        .submit(agent, "t0", json!({"n": 1}), None)
        .await
        .unwrap();
    let outcome = handle.wait().await.unwrap();
    assert_eq!(outcome.task_id, "t0");
    assert_eq!(outcome.result.unwrap()["echo"]["n"], 1);
}

#[tokio::test]
async fn dispatch_start_is_fifo_per_agent() {
    let bus = AgentBus::new(100);
    let agent = Uuid::new_v4();
    let started = Arc::new(Mutex::new(Vec::new()));
    bus.register(
        agent,
        Arc::new(RecordingHandler {
            started: started.clone(),
            current: Arc::new(AtomicUsize::new(0)),
            peak: Arc::new(AtomicUsize::new(0)),
            work: Duration::from_millis(10),
        }),
        1,
    );

    let mut handles = Vec::new();
    for i in 0..5 {
        handles.push(bus.submit(agent, format!("t{i}"), json!({}), None).await.unwrap());
    }
    for handle in handles {
        handle.wait().await.unwrap();
    }
    assert_eq!(*started.lock().unwrap(), vec!["t0", "t1", "t2", "t3", "t4"]);
}

#[tokio::test]
async fn concurrency_never_exceeds_the_cap() {
    let bus = AgentBus::new(100);
    let agent = Uuid::new_v4();
    let peak = Arc::new(AtomicUsize::new(0));
    bus.register(
        agent,
        Arc::new(RecordingHandler {
            started: Arc::new(Mutex::new(Vec::new())),
            current: Arc::new(AtomicUsize::new(0)),
            peak: peak.clone(),
            work: Duration::from_millis(50),
        }),
        2,
    );

    let mut handles = Vec::new();
    for i in 0..6 {
        handles.push(bus.submit(agent, format!("t{i}"), json!({}), None).await.unwrap());
    }
    for handle in handles {
        handle.wait().await.unwrap();
    }
    assert!(peak.load(Ordering::SeqCst) <= 2, "cap exceeded");
}

#[tokio::test(start_paused = true)]
async fn bounded_submission_fails_with_queue_full() {
    let bus = AgentBus::new(1);
    let agent = Uuid::new_v4();
    bus.register(agent, Arc::new(NeverFinishes), 1);

    // First task: dispatched, stuck in the handler. Second: held by the
    // consumer behind the cap. Third: fills the queue.
    for i in 0..3 {
        bus.submit(agent, format!("t{i}"), json!({}), None).await.unwrap();
    }
    let err = bus.submit(agent, "t3", json!({}), None).await.unwrap_err();
    assert!(matches!(err, CoreError::QueueFull(id) if id == agent));
}

#[tokio::test]
async fn submit_to_unregistered_agent_is_validation() {
    let bus = AgentBus::new(10);
    let err = bus
        .submit(Uuid::new_v4(), "t0", json!({}), None)
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::Validation(_)));
}

struct CountingCallback {
    calls: Arc<AtomicUsize>,
    fail: bool,
}

#[async_trait]
impl TaskCallback for CountingCallback {
    async fn on_complete(&self, _outcome: &TaskOutcome) -> Result<(), CoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            Err(CoreError::Internal("callback boom".to_string()))
        } else {
            Ok(())
        }
    }
}

#[tokio::test]
async fn callback_runs_and_its_errors_are_swallowed() {
    let bus = AgentBus::new(10);
    let agent = Uuid::new_v4();
    bus.register(agent, Arc::new(EchoHandler), 3);

    let calls = Arc::new(AtomicUsize::new(0));
    let callback = Arc::new(CountingCallback {
        calls: calls.clone(),
        fail: true,
    });
    let handle = bus
        .submit(agent, "t0", json!({}), Some(callback))
        .await
        .unwrap();
    let outcome = handle.wait().await.unwrap();
    assert!(outcome.result.is_ok());

    // The callback may run just after the completion signal.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn reregistration_is_a_no_op_and_deregister_drops_the_queue() {
    let bus = AgentBus::new(10);
    let agent = Uuid::new_v4();
    bus.register(agent, Arc::new(EchoHandler), 3);
    bus.register(agent, Arc::new(NeverFinishes), 1); // ignored

    let handle = bus.submit(agent, "t0", json!({}), None).await.unwrap();
    assert!(handle.wait().await.unwrap().result.is_ok());

    bus.deregister(agent);
    assert!(!bus.is_registered(agent));
    assert!(bus.submit(agent, "t1", json!({}), None).await.is_err());

    bus.cleanup();
    assert_eq!(bus.stats().registered_agents, 0);
}
