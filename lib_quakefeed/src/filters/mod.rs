//! # Filters Module
//!
//! ## Contained Modules:
//! - **`filter_engine`**: `FilterSpec`, its activity rule and the UTC
//!   normalization into a `ServerQuery`.
//! - **`filter_input`**: parsing of form text fields into a `FilterSpec`.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

/// Filter criteria and their server-ready form.
pub mod filter_engine;
/// Text form parsing and validation.
pub mod filter_input;

pub use filter_engine::{normalize, DateBound, FilterSpec, ServerQuery};
pub use filter_input::{FilterInput, FilterInputError};
