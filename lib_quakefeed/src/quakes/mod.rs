//! # Seismic Data Module
//!
//! Value types describing earthquakes as they travel through the engine.
//!
//! ## Contained Modules:
//! - **`event_record`**: the immutable `EventRecord`, its wire decoding and
//!   the newest-first ordering used everywhere a working set is built.
//! - **`region`**: the catalog of federal entities a filter can target.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

/// The seismic event value type and batch decoding.
pub mod event_record;
/// The catalog of regions (federal entities) usable as filter criteria.
pub mod region;

pub use event_record::{decode_batch, EventRecord, MagnitudeCategory};
pub use region::Region;
