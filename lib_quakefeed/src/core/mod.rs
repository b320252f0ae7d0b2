//! # Core Engine Module
//!
//! The pieces that keep one working set of earthquakes correct while events
//! arrive from several directions at once.
//!
//! ## Core Components:
//!
//! - **`reconciler`**: pure merge of live batches into a bounded, deduplicated,
//!   newest-first snapshot (`WorkingSet`).
//!
//! - **`live_channel`**: in-process fan-out of decoded live batches. The stream
//!   client and the push receiver publish on it, the controller listens.
//!
//! - **`supervisor`**: keeps exactly one stream session alive, retrying with a
//!   bounded backoff and publishing a `ConnectivityState`.
//!
//! - **`feed_controller`**: single-writer owner of the working set. Runs full
//!   fetches with tickets, merges live batches and publishes `FeedState`.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

/// Id-keyed merge into a bounded, ordered snapshot.
pub mod reconciler;
/// In-process publish/subscribe for decoded live batches.
pub mod live_channel;
/// Reconnect loop with backoff around a stream connector.
pub mod supervisor;
/// The orchestrator owning the working set.
pub mod feed_controller;

// --- Public API Re-exports ---
pub use feed_controller::{AlertNotice, FeedController, FeedState};
pub use live_channel::{BatchOrigin, LiveBatch, LiveChannel};
pub use reconciler::{CollisionPolicy, Reconciler, WorkingSet};
pub use supervisor::{BackoffPolicy, ConnectivityState, ReconnectSupervisor, RetryPolicy};
