//! # Reports Controller
//!
//! Holds one [`LoadState`] per [`ReportKind`] and publishes each on its own
//! `watch` channel.

use std::sync::Arc;

use tokio::sync::watch;

use crate::reports::seismic_report::{ReportKind, SeismicReport};
use crate::retrieve::quake_api::ReportService;

/// Tagged load state of an asynchronously fetched value.
#[derive(Debug, Clone, PartialEq)]
pub enum LoadState<T> {
    /// Never requested.
    Idle,
    /// Request in flight.
    Loading,
    /// Last request succeeded.
    Success(T),
    /// Last request failed, with a displayable message.
    Error(String),
}

impl<T> LoadState<T> {
    /// Whether a request is in flight.
    pub fn is_loading(&self) -> bool {
        matches!(self, LoadState::Loading)
    }

    /// The loaded value, if any.
    pub fn value(&self) -> Option<&T> {
        match self {
            LoadState::Success(v) => Some(v),
            LoadState::Idle | LoadState::Loading | LoadState::Error(_) => None,
        }
    }
}

/// # Reports Controller
pub struct ReportsController {
    service: Arc<dyn ReportService>,
    quarterly: watch::Sender<LoadState<Arc<SeismicReport>>>,
    semiannual: watch::Sender<LoadState<Arc<SeismicReport>>>,
    annual: watch::Sender<LoadState<Arc<SeismicReport>>>,
}

impl ReportsController {
    /// Creates a controller with every report `Idle`.
    pub fn new(service: Arc<dyn ReportService>) -> Self {
        Self {
            service,
            quarterly: watch::channel(LoadState::Idle).0,
            semiannual: watch::channel(LoadState::Idle).0,
            annual: watch::channel(LoadState::Idle).0,
        }
    }

    fn slot(&self, kind: ReportKind) -> &watch::Sender<LoadState<Arc<SeismicReport>>> {
        match kind {
            ReportKind::Quarterly => &self.quarterly,
            ReportKind::Semiannual => &self.semiannual,
            ReportKind::Annual => &self.annual,
        }
    }

    /// Follows the state of one report.
    pub fn subscribe(&self, kind: ReportKind) -> watch::Receiver<LoadState<Arc<SeismicReport>>> {
        self.slot(kind).subscribe()
    }

    /// Current state of one report.
    pub fn state(&self, kind: ReportKind) -> LoadState<Arc<SeismicReport>> {
        self.slot(kind).borrow().clone()
    }

    /// Fetches one report, moving its state through `Loading` to `Success`
    /// or `Error`.
    pub async fn load(&self, kind: ReportKind) {
        let slot = self.slot(kind);
        slot.send_replace(LoadState::Loading);
        log::debug!("Loading {} report", kind);

        match self.service.fetch_report(kind).await {
            Ok(report) => {
                log::info!("Loaded {} report: {} events", kind, report.total_events);
                slot.send_replace(LoadState::Success(Arc::new(report)));
            }
            Err(e) => {
                log::error!("Failed to load {} report: {}", kind, e);
                slot.send_replace(LoadState::Error(e.to_string()));
            }
        }
    }

    /// Loads every report concurrently.
    pub async fn load_all(&self) {
        tokio::join!(
            self.load(ReportKind::Quarterly),
            self.load(ReportKind::Semiannual),
            self.load(ReportKind::Annual),
        );
    }

    /// Puts one report back to `Idle`.
    pub fn reset(&self, kind: ReportKind) {
        self.slot(kind).send_replace(LoadState::Idle);
    }
}
