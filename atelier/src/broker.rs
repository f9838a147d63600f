//! Stream broker: in-process fan-out of events to live client connections.
//!
//! Each connection is an mpsc queue of [`StreamItem`]; `Closed` is the
//! terminal sentinel the NDJSON generator recognizes. Broadcasts also append
//! to a bounded per-session replay buffer in the cache, so a reconnecting
//! client can pass `since` and receive only what it missed.
//!
//! Connection tables are mutated only under the broker's own lock.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::json;
use stream_event::{StreamEvent, StreamEventType};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::cache::Cache;
use crate::error::CoreError;

/// What a connection receives: events until the terminal `Closed` sentinel.
#[derive(Clone, Debug)]
pub enum StreamItem {
    Event(StreamEvent),
    Closed,
}

#[derive(Clone, Debug)]
pub struct BrokerConfig {
    /// Payloads serialized beyond this many bytes are replaced with an error
    /// stub before broadcast.
    pub max_event_bytes: usize,
    /// Replay buffer length per session.
    pub buffer_size: usize,
    /// Replay buffer TTL.
    pub buffer_ttl: Duration,
    pub heartbeat_interval: Duration,
    /// Per-connection queue capacity.
    pub queue_capacity: usize,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            max_event_bytes: 10 * 1024,
            buffer_size: 100,
            buffer_ttl: Duration::from_secs(300),
            heartbeat_interval: Duration::from_secs(30),
            queue_capacity: 1000,
        }
    }
}

struct Connection {
    id: Uuid,
    session_id: Uuid,
    sender: mpsc::Sender<StreamItem>,
}

#[derive(Default)]
struct Tables {
    /// session -> open connections.
    connections: HashMap<Uuid, Vec<Connection>>,
    /// owner -> sessions with at least one connection.
    owner_sessions: HashMap<Uuid, HashSet<Uuid>>,
    /// connection -> owner, for unregister bookkeeping.
    owners: HashMap<Uuid, Uuid>,
}

#[derive(Clone, Debug)]
pub struct BrokerStats {
    pub total_connections: usize,
    pub total_sessions: usize,
    pub total_users: usize,
}

pub struct StreamBroker {
    tables: Mutex<Tables>,
    cache: Arc<dyn Cache>,
    config: BrokerConfig,
    heartbeat: Mutex<Option<(CancellationToken, JoinHandle<()>)>>,
}

impl StreamBroker {
    pub fn new(cache: Arc<dyn Cache>, config: BrokerConfig) -> Self {
        Self {
            tables: Mutex::new(Tables::default()),
            cache,
            config,
            heartbeat: Mutex::new(None),
        }
    }

    fn buffer_key(session_id: Uuid) -> String {
        format!("stream:buffer:{session_id}")
    }

    /// Starts the heartbeat task. Idempotent.
    pub async fn start(self: &Arc<Self>) {
        let mut guard = self.heartbeat.lock().await;
        if guard.is_some() {
            return;
        }
        let token = CancellationToken::new();
        let broker = self.clone();
        let child = token.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(broker.config.heartbeat_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // First tick fires immediately; skip it so heartbeats are periodic.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = child.cancelled() => break,
                    _ = ticker.tick() => broker.heartbeat_sweep().await,
                }
            }
        });
        *guard = Some((token, handle));
        tracing::info!("stream broker started");
    }

    /// Cancels the heartbeat and closes every connection with the sentinel.
    pub async fn stop(&self) {
        if let Some((token, handle)) = self.heartbeat.lock().await.take() {
            token.cancel();
            let _ = handle.await;
        }
        let mut tables = self.tables.lock().await;
        for connections in tables.connections.values() {
            for connection in connections {
                let _ = connection.sender.try_send(StreamItem::Closed);
            }
        }
        tables.connections.clear();
        tables.owner_sessions.clear();
        tables.owners.clear();
        tracing::info!("stream broker stopped");
    }

    /// Registers a connection and replays buffered events (only those after
    /// `since`, when given). Returns the connection id and its queue.
    pub async fn register(
        &self,
        session_id: Uuid,
        owner_id: Uuid,
        since: Option<DateTime<Utc>>,
    ) -> (Uuid, mpsc::Receiver<StreamItem>) {
        let (sender, receiver) = mpsc::channel(self.config.queue_capacity);
        let connection_id = Uuid::new_v4();

        {
            let mut tables = self.tables.lock().await;
            tables.connections.entry(session_id).or_default().push(Connection {
                id: connection_id,
                session_id,
                sender: sender.clone(),
            });
            tables.owner_sessions.entry(owner_id).or_default().insert(session_id);
            tables.owners.insert(connection_id, owner_id);
        }
        tracing::info!(
            session_id = %session_id,
            owner_id = %owner_id,
            "streaming connection registered"
        );

        self.replay_buffered(session_id, &sender, since).await;
        (connection_id, receiver)
    }

    /// Removes one connection; the last unregister drops the session and
    /// owner index entries.
    pub async fn unregister(&self, session_id: Uuid, connection_id: Uuid) {
        let mut tables = self.tables.lock().await;
        if let Some(connections) = tables.connections.get_mut(&session_id) {
            connections.retain(|c| c.id != connection_id);
            if connections.is_empty() {
                tables.connections.remove(&session_id);
            }
        }
        if let Some(owner_id) = tables.owners.remove(&connection_id) {
            let session_gone = !tables.connections.contains_key(&session_id);
            if session_gone {
                if let Some(sessions) = tables.owner_sessions.get_mut(&owner_id) {
                    sessions.remove(&session_id);
                    if sessions.is_empty() {
                        tables.owner_sessions.remove(&owner_id);
                    }
                }
            }
        }
        tracing::info!(session_id = %session_id, "streaming connection unregistered");
    }

    /// Broadcasts to every connection of the session. Returns the number of
    /// successful enqueues.
    pub async fn broadcast(
        &self,
        session_id: Uuid,
        mut event: StreamEvent,
        buffer: bool,
    ) -> Result<usize, CoreError> {
        let payload_len = serde_json::to_string(&event.payload)?.len();
        if payload_len > self.config.max_event_bytes {
            tracing::warn!(
                session_id = %session_id,
                payload_len,
                cap = self.config.max_event_bytes,
                "event payload over size cap, replacing"
            );
            event.payload = json!({"error": "payload too large, fetch via API"});
        }

        if buffer {
            self.buffer_event(session_id, &event).await?;
        }

        let senders: Vec<mpsc::Sender<StreamItem>> = {
            let tables = self.tables.lock().await;
            tables
                .connections
                .get(&session_id)
                .map(|conns| conns.iter().map(|c| c.sender.clone()).collect())
                .unwrap_or_default()
        };

        let mut sent = 0;
        for sender in senders {
            if sender.send(StreamItem::Event(event.clone())).await.is_ok() {
                sent += 1;
            }
        }
        tracing::debug!(
            session_id = %session_id,
            event_type = event.event_type.as_str(),
            sent,
            "event broadcast"
        );
        Ok(sent)
    }

    /// Broadcasts to every session the owner has open.
    pub async fn broadcast_to_owner(
        &self,
        owner_id: Uuid,
        event: StreamEvent,
        buffer: bool,
    ) -> Result<usize, CoreError> {
        let sessions: Vec<Uuid> = {
            let tables = self.tables.lock().await;
            tables
                .owner_sessions
                .get(&owner_id)
                .map(|s| s.iter().copied().collect())
                .unwrap_or_default()
        };
        let mut total = 0;
        for session_id in sessions {
            total += self
                .broadcast(session_id, event.clone().with_session(session_id), buffer)
                .await?;
        }
        Ok(total)
    }

    /// Closes every connection of one session with the sentinel.
    pub async fn close_session(&self, session_id: Uuid) {
        let mut tables = self.tables.lock().await;
        if let Some(connections) = tables.connections.remove(&session_id) {
            for connection in &connections {
                let _ = connection.sender.try_send(StreamItem::Closed);
                tables.owners.remove(&connection.id);
            }
        }
        for sessions in tables.owner_sessions.values_mut() {
            sessions.remove(&session_id);
        }
        tables.owner_sessions.retain(|_, sessions| !sessions.is_empty());
        tracing::info!(session_id = %session_id, "session closed");
    }

    pub async fn stats(&self) -> BrokerStats {
        let tables = self.tables.lock().await;
        BrokerStats {
            total_connections: tables.connections.values().map(Vec::len).sum(),
            total_sessions: tables.connections.len(),
            total_users: tables.owner_sessions.len(),
        }
    }

    async fn buffer_event(&self, session_id: Uuid, event: &StreamEvent) -> Result<(), CoreError> {
        let key = Self::buffer_key(session_id);
        let serialized = serde_json::to_string(event)?;
        self.cache
            .push_front(&key, serialized)
            .await
            .map_err(|e| CoreError::Publish(format!("buffer push: {e}")))?;
        self.cache
            .trim(&key, self.config.buffer_size)
            .await
            .map_err(|e| CoreError::Publish(format!("buffer trim: {e}")))?;
        self.cache
            .expire(&key, self.config.buffer_ttl)
            .await
            .map_err(|e| CoreError::Publish(format!("buffer expire: {e}")))?;
        Ok(())
    }

    async fn replay_buffered(
        &self,
        session_id: Uuid,
        sender: &mpsc::Sender<StreamItem>,
        since: Option<DateTime<Utc>>,
    ) {
        let buffered = match self.cache.range(&Self::buffer_key(session_id)).await {
            Ok(items) => items,
            Err(err) => {
                tracing::error!(session_id = %session_id, error = %err, "buffer read failed");
                return;
            }
        };
        if buffered.is_empty() {
            return;
        }
        // Buffer is newest first; replay oldest first.
        let mut replayed = 0;
        for raw in buffered.iter().rev() {
            let event: StreamEvent = match serde_json::from_str(raw) {
                Ok(event) => event,
                Err(err) => {
                    tracing::error!(session_id = %session_id, error = %err, "bad buffered event");
                    continue;
                }
            };
            if let Some(since) = since {
                if event.timestamp <= since {
                    continue;
                }
            }
            if sender.send(StreamItem::Event(event)).await.is_ok() {
                replayed += 1;
            }
        }
        tracing::info!(
            session_id = %session_id,
            replayed,
            total_buffered = buffered.len(),
            "buffered events replayed"
        );
    }

    /// One heartbeat pass: prune dead queues, enqueue a heartbeat on the rest.
    async fn heartbeat_sweep(&self) {
        let connections: Vec<(Uuid, mpsc::Sender<StreamItem>)> = {
            let mut tables = self.tables.lock().await;
            // Drop connections whose receiver went away (client disconnect).
            let mut dead = Vec::new();
            for (session_id, conns) in tables.connections.iter_mut() {
                conns.retain(|c| {
                    if c.sender.is_closed() {
                        dead.push((*session_id, c.id));
                        false
                    } else {
                        true
                    }
                });
            }
            tables.connections.retain(|_, conns| !conns.is_empty());
            for (session_id, connection_id) in dead {
                if let Some(owner_id) = tables.owners.remove(&connection_id) {
                    if !tables.connections.contains_key(&session_id) {
                        if let Some(sessions) = tables.owner_sessions.get_mut(&owner_id) {
                            sessions.remove(&session_id);
                        }
                    }
                }
            }
            tables.owner_sessions.retain(|_, sessions| !sessions.is_empty());

            tables
                .connections
                .values()
                .flatten()
                .map(|c| (c.session_id, c.sender.clone()))
                .collect()
        };

        for (session_id, sender) in &connections {
            let event = StreamEvent::new(
                StreamEventType::Heartbeat,
                json!({"timestamp": Utc::now().to_rfc3339()}),
            )
            .with_session(*session_id);
            let _ = sender.send(StreamItem::Event(event)).await;
        }
        tracing::debug!(connections = connections.len(), "heartbeat sent");
    }
}
