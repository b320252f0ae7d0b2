//! # Data Retrieval Module
//!
//! Request/response access to the events service. Streaming lives in
//! `ingestors`; everything here is a bounded call with a timeout.
//!
//! ## Contained Modules:
//!
//! - **`ky_http`**: generic `ApiClient` on `reqwest` and `reqwest-middleware`
//!   with exponential-backoff retries for transient failures.
//! - **`quake_api`**: the `FetchService` and `ReportService` seams and their
//!   HTTP implementation.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

/// Generic HTTP API client with retry middleware.
pub mod ky_http;
/// Events and reports endpoints.
pub mod quake_api;

pub use ky_http::{ApiClient, ApiResponse, ClientOptions};
pub use quake_api::{ApiPaths, FetchService, HttpFetchService, ReportService};
