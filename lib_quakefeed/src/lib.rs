//! # lib_quakefeed
//!
//! Real-time earthquake feed engine. Events arrive out of order from a
//! server-sent-event stream and from push data messages; both are merged
//! into one bounded, deduplicated, time-ordered working set that is kept
//! fresh by periodic full fetches.
//!
//! ## Layout:
//! - **`quakes`**: the `EventRecord` value type and the region catalog.
//! - **`core`**: reconciler, live channel, reconnect supervisor and the
//!   `FeedController` that ties them together.
//! - **`filters`**: user filter criteria and their UTC-normalized query form.
//! - **`ingestors`**: the SSE stream client and the push payload receiver.
//! - **`retrieve`**: the HTTP client and the fetch service built on it.
//! - **`reports`**: aggregate reports with a tagged load state.
//! - **`configs`**: the `FeedConfig` tunables.

#![forbid(unsafe_code)]

pub mod configs;
pub mod core;
pub mod error;
pub mod filters;
pub mod ingestors;
pub mod quakes;
pub mod reports;
pub mod retrieve;
pub mod runtime;

// Re-export the everyday surface
pub use configs::feed_config::FeedConfig;
pub use core::feed_controller::{FeedController, FeedState};
pub use core::live_channel::{BatchOrigin, LiveBatch, LiveChannel};
pub use core::reconciler::{CollisionPolicy, Reconciler, WorkingSet};
pub use core::supervisor::{BackoffPolicy, ConnectivityState, ReconnectSupervisor, RetryPolicy};
pub use error::{DecodeError, FeedError, TransportError};
pub use filters::filter_engine::{DateBound, FilterSpec, ServerQuery};
pub use quakes::event_record::EventRecord;
pub use runtime::FeedRuntime;
