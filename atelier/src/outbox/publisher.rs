//! Background publisher: drains pending outbox rows to the stream broker.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{Duration as ChronoDuration, Utc};
use config::OutboxSettings;
use serde_json::{json, Value};
use stream_event::{StreamEvent, StreamEventType};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::broker::StreamBroker;
use crate::error::CoreError;
use crate::models::{OutboxEvent, OutboxStatus};
use crate::outbox::repository;
use crate::store::Database;

#[derive(Clone, Debug, Default)]
pub struct OutboxMetrics {
    pub pending_count: u64,
    pub published_total: u64,
    pub failed_total: u64,
}

/// `delay = min(initial · 2^retry, max)` in whole seconds. Integer math, no
/// float drift.
fn backoff_seconds(initial: u64, max: u64, retry_count: u32) -> u64 {
    let factor = 1u64.checked_shl(retry_count).unwrap_or(u64::MAX);
    initial.saturating_mul(factor).min(max)
}

/// Single publisher instance per process. `start`/`stop` are idempotent.
pub struct OutboxPublisher {
    db: Database,
    broker: Arc<StreamBroker>,
    settings: OutboxSettings,
    pending_count: AtomicU64,
    published_total: AtomicU64,
    failed_total: AtomicU64,
    run_state: tokio::sync::Mutex<Option<(CancellationToken, JoinHandle<()>)>>,
}

impl OutboxPublisher {
    pub fn new(db: Database, broker: Arc<StreamBroker>, settings: OutboxSettings) -> Self {
        Self {
            db,
            broker,
            settings,
            pending_count: AtomicU64::new(0),
            published_total: AtomicU64::new(0),
            failed_total: AtomicU64::new(0),
            run_state: tokio::sync::Mutex::new(None),
        }
    }

    pub async fn start(self: &Arc<Self>) {
        let mut state = self.run_state.lock().await;
        if state.is_some() {
            tracing::warn!("outbox publisher already running");
            return;
        }
        let token = CancellationToken::new();
        let child = token.clone();
        let publisher = self.clone();
        let handle = tokio::spawn(async move {
            tracing::info!("outbox publisher loop started");
            let poll = Duration::from_secs(publisher.settings.poll_interval_seconds);
            loop {
                if let Err(err) = publisher.process_batch().await {
                    tracing::error!(error = %err, "publisher cycle failed");
                }
                tokio::select! {
                    _ = child.cancelled() => break,
                    _ = tokio::time::sleep(poll) => {}
                }
            }
            tracing::info!("outbox publisher loop stopped");
        });
        *state = Some((token, handle));
        tracing::info!("outbox publisher started");
    }

    pub async fn stop(&self) {
        let mut state = self.run_state.lock().await;
        match state.take() {
            Some((token, handle)) => {
                token.cancel();
                let _ = handle.await;
                tracing::info!("outbox publisher stopped");
            }
            None => tracing::warn!("outbox publisher not running"),
        }
    }

    /// One cycle: claim due rows under the repository's lease contract, then
    /// publish each and record the outcome. Public so tests (and operators)
    /// can drive cycles without the poll loop.
    pub async fn process_batch(&self) -> Result<(), CoreError> {
        let batch = self.settings.batch_size;
        let lease = Duration::from_secs(self.settings.poll_interval_seconds);
        let events = self
            .db
            .with_tx(move |tx| repository::claim_due(tx, batch, lease, None, None))
            .await?;

        self.pending_count.store(events.len() as u64, Ordering::SeqCst);
        if events.is_empty() {
            return Ok(());
        }
        tracing::debug!(count = events.len(), "processing pending events");

        for event in events {
            self.publish_one(event).await?;
        }
        Ok(())
    }

    async fn publish_one(&self, event: OutboxEvent) -> Result<(), CoreError> {
        let event_id = event.id;
        match self.try_publish(&event).await {
            Ok(()) => {
                self.db
                    .with_tx(move |tx| repository::mark_published(tx, event_id))
                    .await?;
                self.published_total.fetch_add(1, Ordering::SeqCst);
                tracing::info!(
                    event_id = %event_id,
                    event_type = %event.event_type,
                    owner_id = %event.owner_id,
                    "event published"
                );
            }
            Err(err) => {
                let reason = err.to_string();
                tracing::error!(
                    event_id = %event_id,
                    event_type = %event.event_type,
                    error = %reason,
                    "event publish failed"
                );
                if event.retry_count >= self.settings.max_retries {
                    let error_text = reason.clone();
                    self.db
                        .with_tx(move |tx| repository::mark_terminal(tx, event_id, &error_text))
                        .await?;
                    self.failed_total.fetch_add(1, Ordering::SeqCst);
                    tracing::error!(
                        event_id = %event_id,
                        retry_count = event.retry_count,
                        "event permanently failed"
                    );
                } else {
                    let delay = backoff_seconds(
                        self.settings.initial_retry_delay_seconds,
                        self.settings.max_retry_delay_seconds,
                        event.retry_count,
                    );
                    let next_retry_at = Utc::now() + ChronoDuration::seconds(delay as i64);
                    let error_text = reason.clone();
                    self.db
                        .with_tx(move |tx| {
                            repository::mark_failed(tx, event_id, &error_text, next_retry_at)
                        })
                        .await?;
                    tracing::info!(
                        event_id = %event_id,
                        retry_count = event.retry_count + 1,
                        next_retry_at = %next_retry_at,
                        "event scheduled for retry"
                    );
                }
            }
        }
        Ok(())
    }

    /// Builds the wire event and pushes it to the session derived from the
    /// payload, or to the owner. `event_id` equals the outbox primary key on
    /// every attempt.
    async fn try_publish(&self, event: &OutboxEvent) -> Result<(), CoreError> {
        let event_type: StreamEventType = event
            .event_type
            .parse()
            .map_err(|e| CoreError::Publish(format!("{e}")))?;

        let mut payload = match &event.payload {
            Value::Object(map) => Value::Object(map.clone()),
            other => json!({"data": other}),
        };
        if let Value::Object(map) = &mut payload {
            map.insert("event_id".to_string(), json!(event.id.to_string()));
            map.insert("aggregate_type".to_string(), json!(event.aggregate_type));
            map.insert(
                "aggregate_id".to_string(),
                json!(event.aggregate_id.to_string()),
            );
        }

        let session_id = event
            .payload
            .get("session_id")
            .and_then(Value::as_str)
            .and_then(|s| Uuid::parse_str(s).ok());

        let stream_event = StreamEvent::new(event_type, payload);
        match session_id {
            Some(session) => {
                self.broker
                    .broadcast(session, stream_event.with_session(session), true)
                    .await?;
            }
            None => {
                self.broker
                    .broadcast_to_owner(event.owner_id, stream_event, true)
                    .await?;
            }
        }
        Ok(())
    }

    /// Operator reset for a terminal row.
    pub async fn reprocess(&self, event_id: Uuid) -> Result<(), CoreError> {
        let outcome = self
            .db
            .with_tx(move |tx| {
                let Some(event) = repository::get_event(tx, event_id)? else {
                    return Ok(None);
                };
                if event.status != OutboxStatus::Failed {
                    return Ok(Some(false));
                }
                repository::reprocess(tx, event_id)?;
                Ok(Some(true))
            })
            .await?;
        match outcome {
            None => Err(CoreError::NotFound(format!("outbox event {event_id}"))),
            Some(false) => Err(CoreError::Validation(format!(
                "outbox event {event_id} is not in the failed state"
            ))),
            Some(true) => {
                tracing::info!(event_id = %event_id, "event reprocessed");
                Ok(())
            }
        }
    }

    pub fn metrics(&self) -> OutboxMetrics {
        OutboxMetrics {
            pending_count: self.pending_count.load(Ordering::SeqCst),
            published_total: self.published_total.load(Ordering::SeqCst),
            failed_total: self.failed_total.load(Ordering::SeqCst),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_and_caps() {
        assert_eq!(backoff_seconds(5, 300, 0), 5);
        assert_eq!(backoff_seconds(5, 300, 1), 10);
        assert_eq!(backoff_seconds(5, 300, 2), 20);
        assert_eq!(backoff_seconds(5, 300, 5), 160);
        assert_eq!(backoff_seconds(5, 300, 6), 300);
        assert_eq!(backoff_seconds(5, 300, 63), 300);
        assert_eq!(backoff_seconds(5, 300, 64), 300);
    }
}
