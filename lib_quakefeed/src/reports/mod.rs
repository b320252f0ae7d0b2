//! # Reports Module
//!
//! Aggregate seismic reports for fixed periods, each exposed to consumers as
//! a tagged `LoadState` (`Idle`, `Loading`, `Success`, `Error`).
//!
//! ## Contained Modules:
//! - **`seismic_report`**: the report type and local summarization.
//! - **`reports_controller`**: per-kind load state on `watch` channels.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

/// Report value types.
pub mod seismic_report;
/// Load state tracking for the fixed reports.
pub mod reports_controller;

pub use reports_controller::{LoadState, ReportsController};
pub use seismic_report::{EventSummary, ReportKind, SeismicReport};
