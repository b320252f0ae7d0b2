//! # Configuration Modules
//!
//! Library-side configuration. Layering (file, environment, command line)
//! is done by the binaries; the library only defines and validates values.

/// The `FeedConfig` tunables and their validation.
pub mod feed_config;

pub use feed_config::{ConfigError, FeedConfig};
