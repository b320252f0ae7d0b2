//! # Feed Runtime
//!
//! Composition root. Builds one `LiveChannel` and hands it to every
//! producer (stream client, push receiver) and to the controller, so that
//! each live event is published exactly once and merged exactly once.
//!
//! ```text
//!  SseStreamClient ──┐                      ┌── FeedController ── FeedState
//!                    ├──> LiveChannel ──────┤
//!  PushReceiver ─────┘                      └── (other subscribers)
//!
//!  HttpFetchService ──> FeedController (full fetches)
//!                   └─> ReportsController
//! ```

use std::sync::Arc;

use crate::configs::feed_config::FeedConfig;
use crate::core::feed_controller::FeedController;
use crate::core::live_channel::LiveChannel;
use crate::error::FeedError;
use crate::ingestors::push_payload::PushReceiver;
use crate::ingestors::sse_stream::{SseStreamClient, StreamConnector};
use crate::reports::reports_controller::ReportsController;
use crate::retrieve::quake_api::{FetchService, HttpFetchService, ReportService};

/// Everything a front end needs, wired from one config.
pub struct FeedRuntime {
    config: FeedConfig,
    channel: LiveChannel,
    controller: Arc<FeedController>,
    push: PushReceiver,
    reports: ReportsController,
}

impl FeedRuntime {
    /// Wires the HTTP implementations described by `config`.
    ///
    /// Must be called inside a Tokio runtime.
    pub fn from_config(config: FeedConfig) -> Result<Self, FeedError> {
        config.validate()?;
        let http = Arc::new(HttpFetchService::from_config(&config)?);
        let stream = Arc::new(SseStreamClient::from_config(&config)?);
        log::info!("{}", config);
        Self::with_services(config, http.clone(), http, stream)
    }

    /// Wires caller-supplied services; used by tests and alternative
    /// transports.
    pub fn with_services(
        config: FeedConfig,
        fetcher: Arc<dyn FetchService>,
        reports: Arc<dyn ReportService>,
        connector: Arc<dyn StreamConnector>,
    ) -> Result<Self, FeedError> {
        let channel = LiveChannel::new();
        let controller = Arc::new(FeedController::new(&config, fetcher, connector, channel.clone())?);
        let push = PushReceiver::new(channel.clone(), config.alert_threshold);
        Ok(Self { config, channel, controller, push, reports: ReportsController::new(reports) })
    }

    /// Initializes the controller (stream, timer, first fetch).
    pub async fn start(&self) -> Result<(), FeedError> {
        self.controller.initialize().await
    }

    /// Tears everything down. Idempotent.
    pub async fn shutdown(&self) {
        self.controller.teardown().await;
        log::info!("Feed runtime stopped ({} live subscriber(s) left)", self.channel.subscriber_count());
    }

    /// The working set owner.
    pub fn controller(&self) -> &Arc<FeedController> {
        &self.controller
    }

    /// Entry point for push data messages.
    pub fn push(&self) -> &PushReceiver {
        &self.push
    }

    /// The reports state holder.
    pub fn reports(&self) -> &ReportsController {
        &self.reports
    }

    /// The shared live channel.
    pub fn channel(&self) -> &LiveChannel {
        &self.channel
    }

    /// The config this runtime was built from.
    pub fn config(&self) -> &FeedConfig {
        &self.config
    }
}
