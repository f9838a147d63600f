//! Transactional outbox: write path and the background publisher.
//!
//! Request handlers insert events with [`repository::record_event`] inside
//! the same transaction as the domain write; the [`OutboxPublisher`] drains
//! pending rows to the stream broker with exponential backoff. A row's `id`
//! is stable for its whole lifetime and rides along as `event_id` on every
//! attempt — the consumer deduplication key.

pub mod repository;

mod publisher;

pub use publisher::{OutboxMetrics, OutboxPublisher};
