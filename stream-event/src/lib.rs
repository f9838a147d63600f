//! Stream event protocol: the wire shape of one client-facing event.
//!
//! This crate defines the event type vocabulary, the [`StreamEvent`] envelope
//! (type + payload + timestamp + session), and the two wire encodings:
//! NDJSON (one JSON object + newline per event) and an SSE wrapper for legacy
//! consumers. It does not depend on the core library; the core constructs
//! events and the server encodes them.

mod event;

pub use event::{StreamEvent, StreamEventType, UnknownEventType};
