//! # Live Ingestors Module
//!
//! The two live paths that bring events into the engine between full
//! fetches. Both decode into `EventRecord` batches and publish them on the
//! `LiveChannel`; neither touches the working set directly.
//!
//! ## Contained Modules:
//! - **`sse_frame`**: incremental `text/event-stream` decoder.
//! - **`sse_stream`**: the streaming HTTP session, its handle and the
//!   `StreamConnector` seam the supervisor drives.
//! - **`push_payload`**: decoder for push data messages.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

/// Incremental server-sent event parser.
pub mod sse_frame;
/// The long-lived event stream client.
pub mod sse_stream;
/// Push message decoding and routing.
pub mod push_payload;

// --- Public API Re-exports ---
pub use push_payload::{PushMessage, PushNotification, PushOutcome, PushReceiver};
pub use sse_frame::{SseDecoder, SseEvent};
pub use sse_stream::{SseStreamClient, StreamConnector, StreamHandle, StreamOutcome, StreamState};
