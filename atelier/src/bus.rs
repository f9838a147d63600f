//! Agent bus: one bounded queue and one consumer task per registered agent.
//!
//! Dispatch start is FIFO per agent; completion order is unconstrained
//! because the consumer forks each task and only gates on the concurrency
//! cap. Backpressure is cooperative: the consumer sleeps while `in_flight`
//! is at the cap, so a slow handler throttles dispatch without blocking
//! submission (submission is bounded separately by the queue).

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::error::CoreError;

/// Bounded wait for enqueue before failing with `QueueFull`.
const SUBMIT_TIMEOUT: Duration = Duration::from_secs(5);
/// Sleep while the agent is at its concurrency cap.
const BACKPRESSURE_POLL: Duration = Duration::from_millis(100);

/// One queued unit of work.
#[derive(Clone, Debug)]
pub struct TaskItem {
    pub task_id: String,
    pub agent_id: Uuid,
    pub payload: Value,
}

/// Executes one task for its agent.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn handle(&self, item: &TaskItem) -> Result<Value, CoreError>;
}

/// Invoked after completion (success or failure). Errors are logged and
/// swallowed; a broken callback must not poison the consumer.
#[async_trait]
pub trait TaskCallback: Send + Sync {
    async fn on_complete(&self, outcome: &TaskOutcome) -> Result<(), CoreError>;
}

#[derive(Clone, Debug)]
pub struct TaskOutcome {
    pub task_id: String,
    pub agent_id: Uuid,
    pub result: Result<Value, String>,
}

/// Handle returned by [`AgentBus::submit`]; resolves when the task finishes.
#[derive(Debug)]
pub struct SubmitHandle {
    pub task_id: String,
    done: oneshot::Receiver<TaskOutcome>,
}

impl SubmitHandle {
    pub async fn wait(self) -> Result<TaskOutcome, CoreError> {
        self.done
            .await
            .map_err(|_| CoreError::Internal("task dropped before completion".to_string()))
    }
}

struct QueueItem {
    item: TaskItem,
    done: oneshot::Sender<TaskOutcome>,
    callback: Option<Arc<dyn TaskCallback>>,
}

struct AgentEntry {
    sender: mpsc::Sender<QueueItem>,
    worker: JoinHandle<()>,
    in_flight: Arc<AtomicUsize>,
    max_concurrency: usize,
}

#[derive(Clone, Debug)]
pub struct AgentBusStats {
    pub registered_agents: usize,
    pub total_queue_size: usize,
    pub total_active_tasks: usize,
}

/// Process-wide task coordinator. Cheap to share via `Arc`.
pub struct AgentBus {
    entries: DashMap<Uuid, AgentEntry>,
    queue_size: usize,
}

impl AgentBus {
    pub fn new(queue_size: usize) -> Self {
        Self {
            entries: DashMap::new(),
            queue_size,
        }
    }

    /// Registers an agent and starts its consumer. Re-registration is a
    /// logged no-op.
    pub fn register(
        &self,
        agent_id: Uuid,
        handler: Arc<dyn TaskHandler>,
        max_concurrency: usize,
    ) {
        if self.entries.contains_key(&agent_id) {
            tracing::warn!(agent_id = %agent_id, "agent already registered");
            return;
        }

        let (sender, receiver) = mpsc::channel::<QueueItem>(self.queue_size);
        let in_flight = Arc::new(AtomicUsize::new(0));
        let worker = tokio::spawn(consumer_loop(
            agent_id,
            receiver,
            handler,
            in_flight.clone(),
            max_concurrency,
        ));

        self.entries.insert(
            agent_id,
            AgentEntry {
                sender,
                worker,
                in_flight,
                max_concurrency,
            },
        );
        tracing::info!(agent_id = %agent_id, max_concurrency, "agent registered");
    }

    /// Enqueues one task with a bounded wait. `QueueFull` when the queue does
    /// not accept the item within the submit window.
    pub async fn submit(
        &self,
        agent_id: Uuid,
        task_id: impl Into<String>,
        payload: Value,
        callback: Option<Arc<dyn TaskCallback>>,
    ) -> Result<SubmitHandle, CoreError> {
        let task_id = task_id.into();
        let sender = {
            let entry = self
                .entries
                .get(&agent_id)
                .ok_or_else(|| CoreError::Validation(format!("agent {agent_id} not registered")))?;
            entry.sender.clone()
        };

        let (done_tx, done_rx) = oneshot::channel();
        let queued = QueueItem {
            item: TaskItem {
                task_id: task_id.clone(),
                agent_id,
                payload,
            },
            done: done_tx,
            callback,
        };

        match sender.send_timeout(queued, SUBMIT_TIMEOUT).await {
            Ok(()) => {
                tracing::info!(task_id = %task_id, agent_id = %agent_id, "task submitted");
                Ok(SubmitHandle {
                    task_id,
                    done: done_rx,
                })
            }
            Err(_) => {
                tracing::error!(task_id = %task_id, agent_id = %agent_id, "task submission timeout");
                Err(CoreError::QueueFull(agent_id))
            }
        }
    }

    /// Cancels the consumer and drops the agent's queue.
    pub fn deregister(&self, agent_id: Uuid) {
        match self.entries.remove(&agent_id) {
            Some((_, entry)) => {
                entry.worker.abort();
                tracing::info!(agent_id = %agent_id, "agent deregistered");
            }
            None => tracing::warn!(agent_id = %agent_id, "agent not registered"),
        }
    }

    pub fn is_registered(&self, agent_id: Uuid) -> bool {
        self.entries.contains_key(&agent_id)
    }

    pub fn queue_size(&self, agent_id: Uuid) -> usize {
        self.entries
            .get(&agent_id)
            .map(|e| e.sender.max_capacity() - e.sender.capacity())
            .unwrap_or(0)
    }

    pub fn active_tasks(&self, agent_id: Uuid) -> usize {
        self.entries
            .get(&agent_id)
            .map(|e| e.in_flight.load(Ordering::SeqCst))
            .unwrap_or(0)
    }

    pub fn max_concurrency(&self, agent_id: Uuid) -> Option<usize> {
        self.entries.get(&agent_id).map(|e| e.max_concurrency)
    }

    pub fn stats(&self) -> AgentBusStats {
        let mut total_queue_size = 0;
        let mut total_active_tasks = 0;
        for entry in self.entries.iter() {
            total_queue_size += entry.sender.max_capacity() - entry.sender.capacity();
            total_active_tasks += entry.in_flight.load(Ordering::SeqCst);
        }
        AgentBusStats {
            registered_agents: self.entries.len(),
            total_queue_size,
            total_active_tasks,
        }
    }

    /// Deregisters every agent. Called once at shutdown.
    pub fn cleanup(&self) {
        let ids: Vec<Uuid> = self.entries.iter().map(|e| *e.key()).collect();
        tracing::info!(agent_count = ids.len(), "agent bus cleanup");
        for id in ids {
            self.deregister(id);
        }
    }
}

async fn consumer_loop(
    agent_id: Uuid,
    mut receiver: mpsc::Receiver<QueueItem>,
    handler: Arc<dyn TaskHandler>,
    in_flight: Arc<AtomicUsize>,
    max_concurrency: usize,
) {
    tracing::info!(agent_id = %agent_id, "worker started");
    while let Some(queued) = receiver.recv().await {
        while in_flight.load(Ordering::SeqCst) >= max_concurrency {
            tokio::time::sleep(BACKPRESSURE_POLL).await;
        }
        in_flight.fetch_add(1, Ordering::SeqCst);
        tokio::spawn(process_task(
            handler.clone(),
            in_flight.clone(),
            queued,
        ));
    }
    tracing::info!(agent_id = %agent_id, "worker stopped");
}

async fn process_task(
    handler: Arc<dyn TaskHandler>,
    in_flight: Arc<AtomicUsize>,
    queued: QueueItem,
) {
    let QueueItem {
        item,
        done,
        callback,
    } = queued;

    tracing::info!(task_id = %item.task_id, agent_id = %item.agent_id, "task started");
    let result = match handler.handle(&item).await {
        Ok(value) => {
            tracing::info!(task_id = %item.task_id, agent_id = %item.agent_id, "task completed");
            Ok(value)
        }
        Err(err) => {
            tracing::error!(
                task_id = %item.task_id,
                agent_id = %item.agent_id,
                error = %err,
                "task failed"
            );
            Err(err.to_string())
        }
    };

    in_flight.fetch_sub(1, Ordering::SeqCst);

    let outcome = TaskOutcome {
        task_id: item.task_id.clone(),
        agent_id: item.agent_id,
        result,
    };
    let _ = done.send(outcome.clone());

    if let Some(callback) = callback {
        if let Err(err) = callback.on_complete(&outcome).await {
            tracing::error!(task_id = %item.task_id, error = %err, "callback failed");
        }
    }
}
