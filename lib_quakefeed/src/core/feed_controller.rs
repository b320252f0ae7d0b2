//! # Feed Controller
//!
//! Owner of the working set. Full fetches and live batches race each other;
//! the controller serializes them through one writer task fed by an mpsc
//! queue, so every published `FeedState` is a complete snapshot.
//!
//! ## Fetch tickets
//!
//! Every full fetch takes a ticket from a monotonically increasing counter.
//! When a result lands:
//! - a ticket older than the last applied one is discarded, as is a result
//!   computed for a filter that is no longer current;
//! - live batches merged after the fetch started are merged again on top of
//!   the replacement snapshot, so a replace never erases live events;
//! - a failure keeps the working set and records `last_error`.
//!
//! After [`FeedController::teardown`] the writer is gone and late results
//! fall on the floor.

use std::collections::{BTreeSet, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::configs::feed_config::FeedConfig;
use crate::core::live_channel::{LiveBatch, LiveChannel};
use crate::core::reconciler::{Reconciler, WorkingSet};
use crate::core::supervisor::{ConnectivityState, ReconnectSupervisor};
use crate::error::FeedError;
use crate::filters::filter_engine::{normalize, FilterSpec};
use crate::ingestors::sse_stream::StreamConnector;
use crate::quakes::event_record::EventRecord;
use crate::retrieve::quake_api::FetchService;

/// Something worth notifying the user about.
#[derive(Debug, Clone, PartialEq)]
pub struct AlertNotice {
    /// Notification title.
    pub title: String,
    /// Notification text.
    pub body: String,
    /// Magnitude, when known.
    pub magnitude: Option<f64>,
    /// Event id, when the alert is about a specific record.
    pub event_id: Option<String>,
}

impl AlertNotice {
    /// Title used when a message names none.
    pub const DEFAULT_TITLE: &'static str = "Earthquake Alert";
    /// Text used when a message carries none.
    pub const DEFAULT_BODY: &'static str = "New earthquake detected";

    /// Alert describing one record.
    pub fn for_event(event: &EventRecord) -> Self {
        Self {
            title: format!("Earthquake M{}", event.magnitude),
            body: format!("{} - Depth {} km", event.place, event.depth_km),
            magnitude: Some(event.magnitude),
            event_id: Some(event.id.clone()),
        }
    }
}

/// Read-only snapshot published after every mutation.
#[derive(Debug, Clone)]
pub struct FeedState {
    /// The current working set.
    pub working_set: Arc<WorkingSet>,
    /// Whether a full fetch is in flight.
    pub is_loading: bool,
    /// Message of the last failed fetch, cleared by the next success.
    pub last_error: Option<String>,
    /// Filter the working set was (or is being) fetched with.
    pub current_filter: FilterSpec,
    /// Shorthand for `current_filter.is_active()`.
    pub is_filter_active: bool,
    /// When the last full fetch was applied.
    pub last_refreshed: Option<DateTime<Utc>>,
}

impl FeedState {
    fn initial(capacity: usize) -> Self {
        Self {
            working_set: Arc::new(WorkingSet::empty(capacity)),
            is_loading: false,
            last_error: None,
            current_filter: FilterSpec::empty(),
            is_filter_active: false,
            last_refreshed: None,
        }
    }
}

type FetchAck = oneshot::Sender<Result<(), FeedError>>;

enum Command {
    SetFilter(FilterSpec),
    FetchStarted {
        ticket: u64,
    },
    FetchFinished {
        ticket: u64,
        filter: FilterSpec,
        result: Result<Vec<EventRecord>, FeedError>,
        ack: Option<FetchAck>,
    },
    Merge(Arc<LiveBatch>),
    Flush(oneshot::Sender<()>),
}

/// State shared between the controller handle, fetch tasks and timers.
struct Shared {
    fetcher: Arc<dyn FetchService>,
    commands: mpsc::UnboundedSender<Command>,
    state: Arc<watch::Sender<FeedState>>,
    alerts: broadcast::Sender<AlertNotice>,
    tickets: AtomicU64,
    filter: Mutex<FilterSpec>,
    zone: Tz,
    fetch_timeout: Duration,
    cancel: CancellationToken,
}

impl Shared {
    fn filter(&self) -> FilterSpec {
        self.filter.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    fn send(&self, command: Command) -> Result<(), FeedError> {
        if self.cancel.is_cancelled() {
            return Err(FeedError::ShutDown);
        }
        self.commands.send(command).map_err(|_| FeedError::ShutDown)
    }

    /// Takes a ticket and spawns the fetch. The receiver resolves once the
    /// writer has dealt with the result.
    fn start_fetch(self: &Arc<Self>, filter: FilterSpec) -> Result<oneshot::Receiver<Result<(), FeedError>>, FeedError> {
        let ticket = self.tickets.fetch_add(1, Ordering::SeqCst) + 1;
        self.send(Command::FetchStarted { ticket })?;

        let (ack, done) = oneshot::channel();
        let query = normalize(&filter, &self.zone);
        let shared = Arc::clone(self);
        tokio::spawn(async move {
            log::debug!("Fetch #{} started (filtered: {})", ticket, query.is_filtered());
            let fetch = tokio::time::timeout(shared.fetch_timeout, shared.fetcher.fetch_events(&query));
            let result = tokio::select! {
                _ = shared.cancel.cancelled() => return,
                outcome = fetch => match outcome {
                    Ok(result) => result,
                    Err(_) => Err(FeedError::Timeout(shared.fetch_timeout)),
                },
            };
            let finished = Command::FetchFinished { ticket, filter, result, ack: Some(ack) };
            if shared.commands.send(finished).is_err() {
                log::debug!("Fetch #{} finished after teardown", ticket);
            }
        });
        Ok(done)
    }

    async fn run_fetch(self: &Arc<Self>, filter: FilterSpec) -> Result<(), FeedError> {
        let done = self.start_fetch(filter)?;
        done.await.unwrap_or(Err(FeedError::ShutDown))
    }
}

/// The single writer of the working set.
struct Writer {
    reconciler: Reconciler,
    commands: mpsc::UnboundedReceiver<Command>,
    state: Arc<watch::Sender<FeedState>>,
    alerts: broadcast::Sender<AlertNotice>,
    alert_threshold: f64,
    cancel: CancellationToken,
    current_filter: FilterSpec,
    in_flight: BTreeSet<u64>,
    latest_started: u64,
    applied: u64,
    /// Live batches merged while fetches were in flight, tagged with the
    /// newest ticket started at merge time.
    replay: Vec<(u64, Arc<LiveBatch>)>,
}

impl Writer {
    async fn run(mut self) {
        loop {
            let command = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                command = self.commands.recv() => match command {
                    Some(c) => c,
                    None => break,
                },
            };
            match command {
                Command::SetFilter(filter) => self.set_filter(filter),
                Command::FetchStarted { ticket } => self.fetch_started(ticket),
                Command::FetchFinished { ticket, filter, result, ack } => {
                    let outcome = self.fetch_finished(ticket, filter, result);
                    if let Some(ack) = ack {
                        let _ = ack.send(outcome);
                    }
                }
                Command::Merge(batch) => self.merge(batch),
                Command::Flush(done) => {
                    let _ = done.send(());
                }
            }
        }
        log::debug!("Feed writer stopped");
    }

    fn set_filter(&mut self, filter: FilterSpec) {
        log::info!("Filter set (active: {})", filter.is_active());
        self.current_filter = filter.clone();
        self.state.send_modify(|s| {
            s.is_filter_active = filter.is_active();
            s.current_filter = filter;
        });
    }

    fn fetch_started(&mut self, ticket: u64) {
        self.in_flight.insert(ticket);
        self.latest_started = self.latest_started.max(ticket);
        self.state.send_modify(|s| s.is_loading = true);
    }

    fn fetch_finished(
        &mut self,
        ticket: u64,
        filter: FilterSpec,
        result: Result<Vec<EventRecord>, FeedError>,
    ) -> Result<(), FeedError> {
        self.in_flight.remove(&ticket);
        let loading = !self.in_flight.is_empty();

        if ticket < self.applied || filter != self.current_filter {
            log::debug!("Discarding stale fetch #{} (applied #{})", ticket, self.applied);
            self.prune_replay();
            self.state.send_modify(|s| s.is_loading = loading);
            return Ok(());
        }

        let outcome = match result {
            Ok(events) => {
                self.applied = ticket;
                let fresh = self.reconciler.rebuild(&events);
                let replayed: Vec<EventRecord> = self
                    .replay
                    .iter()
                    .filter(|(tag, _)| *tag >= ticket)
                    .flat_map(|(_, batch)| batch.events.iter().cloned())
                    .collect();
                let working_set = if replayed.is_empty() {
                    fresh
                } else {
                    log::debug!("Replaying {} live event(s) over fetch #{}", replayed.len(), ticket);
                    self.reconciler.apply(&fresh, &replayed)
                };
                log::info!("Fetch #{} applied: {} event(s)", ticket, working_set.len());
                self.state.send_modify(|s| {
                    s.working_set = working_set;
                    s.last_error = None;
                    s.last_refreshed = Some(Utc::now());
                    s.is_loading = loading;
                });
                Ok(())
            }
            Err(e) => {
                log::error!("Fetch #{} failed: {}", ticket, e);
                let message = e.to_string();
                self.state.send_modify(|s| {
                    s.last_error = Some(message);
                    s.is_loading = loading;
                });
                Err(e)
            }
        };
        self.prune_replay();
        outcome
    }

    fn prune_replay(&mut self) {
        match self.in_flight.first() {
            None => self.replay.clear(),
            Some(&oldest) => self.replay.retain(|(tag, _)| *tag >= oldest),
        }
    }

    fn merge(&mut self, batch: Arc<LiveBatch>) {
        let current = Arc::clone(&self.state.borrow().working_set);
        let next = self.reconciler.apply(&current, &batch.events);

        // One alert per id that is new to the set and made it past capacity.
        let threshold = self.alert_threshold;
        let mut alerted = HashSet::new();
        let alerts: Vec<AlertNotice> = batch
            .events
            .iter()
            .filter(|e| !current.contains(&e.id) && alerted.insert(e.id.as_str()))
            .filter_map(|e| next.get(&e.id))
            .filter(|held| held.is_alert(threshold))
            .map(AlertNotice::for_event)
            .collect();

        log::debug!(
            "Merged {} {:?} event(s), working set now {}",
            batch.events.len(),
            batch.origin,
            next.len()
        );
        if !self.in_flight.is_empty() {
            self.replay.push((self.latest_started, batch));
        }
        self.state.send_modify(|s| s.working_set = next);

        for alert in alerts {
            log::warn!("{}: {}", alert.title, alert.body);
            let _ = self.alerts.send(alert);
        }
    }
}

/// # Feed Controller
///
/// Must be created inside a Tokio runtime: the writer task is spawned by
/// [`FeedController::new`].
pub struct FeedController {
    shared: Arc<Shared>,
    supervisor: Arc<ReconnectSupervisor>,
    channel: LiveChannel,
    refresh_interval: Duration,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    initialized: AtomicBool,
    torn_down: AtomicBool,
}

impl FeedController {
    /// Wires a controller from a validated config.
    pub fn new(
        config: &FeedConfig,
        fetcher: Arc<dyn FetchService>,
        connector: Arc<dyn StreamConnector>,
        channel: LiveChannel,
    ) -> Result<Self, FeedError> {
        config.validate()?;
        let zone = config.zone()?;

        let (commands, receiver) = mpsc::unbounded_channel();
        let (state, _) = watch::channel(FeedState::initial(config.capacity));
        let state = Arc::new(state);
        let (alerts, _) = broadcast::channel(32);
        let cancel = CancellationToken::new();

        let writer = Writer {
            reconciler: config.reconciler(),
            commands: receiver,
            state: Arc::clone(&state),
            alerts: alerts.clone(),
            alert_threshold: config.alert_threshold,
            cancel: cancel.clone(),
            current_filter: FilterSpec::empty(),
            in_flight: BTreeSet::new(),
            latest_started: 0,
            applied: 0,
            replay: Vec::new(),
        };
        let writer_task = tokio::spawn(writer.run());

        let supervisor = Arc::new(ReconnectSupervisor::new(connector, channel.clone(), config.retry));

        Ok(Self {
            shared: Arc::new(Shared {
                fetcher,
                commands,
                state,
                alerts,
                tickets: AtomicU64::new(0),
                filter: Mutex::new(FilterSpec::empty()),
                zone,
                fetch_timeout: config.fetch_timeout(),
                cancel,
            }),
            supervisor,
            channel,
            refresh_interval: config.refresh_interval(),
            tasks: Mutex::new(vec![writer_task]),
            initialized: AtomicBool::new(false),
            torn_down: AtomicBool::new(false),
        })
    }

    fn track(&self, task: JoinHandle<()>) {
        self.tasks.lock().unwrap_or_else(|p| p.into_inner()).push(task);
    }

    /// # Initialize
    ///
    /// Runs once; later calls return `Ok(())` without doing anything.
    ///
    /// Sets the current-month filter, starts listening on the live channel,
    /// starts the stream supervisor and the periodic refresh, then performs
    /// the first full fetch. The engine keeps running when that fetch fails;
    /// its error is returned and also recorded in `last_error`.
    pub async fn initialize(&self) -> Result<(), FeedError> {
        if self.torn_down.load(Ordering::SeqCst) {
            return Err(FeedError::ShutDown);
        }
        if self.initialized.swap(true, Ordering::SeqCst) {
            log::debug!("Feed controller already initialized");
            return Ok(());
        }

        let filter = FilterSpec::current_month(&self.shared.zone, Utc::now());
        self.set_filter(filter.clone())?;

        // Subscribe before anything can publish.
        let mut live = self.channel.subscribe("feed-controller");
        let shared = Arc::clone(&self.shared);
        self.track(tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = shared.cancel.cancelled() => break,
                    batch = live.recv() => match batch {
                        Some(batch) => {
                            if shared.send(Command::Merge(batch)).is_err() {
                                break;
                            }
                        }
                        None => break,
                    },
                }
            }
            log::debug!("Live listener stopped");
        }));

        self.supervisor.start();

        let shared = Arc::clone(&self.shared);
        let period = self.refresh_interval;
        self.track(tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    biased;
                    _ = shared.cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        log::info!("Periodic refresh");
                        if let Err(e) = shared.start_fetch(shared.filter()) {
                            log::debug!("Periodic refresh skipped: {}", e);
                            break;
                        }
                    }
                }
            }
        }));

        log::info!("Feed controller initialized, loading the current month");
        self.shared.run_fetch(filter).await
    }

    /// The guard is held until the command is queued, so the stored filter
    /// and the writer's filter change in the same order.
    fn set_filter(&self, filter: FilterSpec) -> Result<(), FeedError> {
        let mut stored = self.shared.filter.lock().unwrap_or_else(|p| p.into_inner());
        self.shared.send(Command::SetFilter(filter.clone()))?;
        *stored = filter;
        Ok(())
    }

    /// Full replace-fetch with the current filter. Resolves once the result
    /// has been applied (or discarded as stale).
    pub async fn refresh(&self) -> Result<(), FeedError> {
        self.shared.run_fetch(self.shared.filter()).await
    }

    /// Makes `spec` the current filter and replace-fetches with it.
    pub async fn apply_filter(&self, spec: FilterSpec) -> Result<(), FeedError> {
        self.set_filter(spec.clone())?;
        self.shared.run_fetch(spec).await
    }

    /// Back to the unfiltered first page.
    pub async fn clear_filter(&self) -> Result<(), FeedError> {
        self.apply_filter(FilterSpec::empty()).await
    }

    /// Queues a live batch for merging. Batches normally arrive through the
    /// live channel; this is the direct entry point.
    pub fn on_incoming(&self, batch: LiveBatch) -> Result<(), FeedError> {
        self.shared.send(Command::Merge(Arc::new(batch)))
    }

    /// Resolves once every command queued before the call has been applied.
    pub async fn flush(&self) -> Result<(), FeedError> {
        let (tx, rx) = oneshot::channel();
        self.shared.send(Command::Flush(tx))?;
        rx.await.map_err(|_| FeedError::ShutDown)
    }

    /// Asks the supervisor to reconnect the stream now.
    pub fn reconnect(&self) {
        self.supervisor.reconnect();
    }

    /// # Teardown
    ///
    /// Cancels the periodic timer, the live listener, in-flight fetches and
    /// the supervisor, then waits for all of them. Idempotent.
    pub async fn teardown(&self) {
        if self.torn_down.swap(true, Ordering::SeqCst) {
            return;
        }
        self.shared.cancel.cancel();
        self.supervisor.shutdown().await;

        let tasks: Vec<JoinHandle<()>> = std::mem::take(&mut *self.tasks.lock().unwrap_or_else(|p| p.into_inner()));
        for task in tasks {
            if let Err(e) = task.await {
                log::error!("Feed task ended abnormally: {}", e);
            }
        }
        self.shared.state.send_modify(|s| s.is_loading = false);
        log::info!("Feed controller torn down");
    }

    /// Latest published state.
    pub fn state(&self) -> FeedState {
        self.shared.state.borrow().clone()
    }

    /// Follows the published state.
    pub fn subscribe(&self) -> watch::Receiver<FeedState> {
        self.shared.state.subscribe()
    }

    /// The current working set.
    pub fn working_set(&self) -> Arc<WorkingSet> {
        Arc::clone(&self.shared.state.borrow().working_set)
    }

    /// Whether a full fetch is in flight.
    pub fn is_loading(&self) -> bool {
        self.shared.state.borrow().is_loading
    }

    /// Message of the last failed fetch.
    pub fn last_error(&self) -> Option<String> {
        self.shared.state.borrow().last_error.clone()
    }

    /// The filter in effect.
    pub fn current_filter(&self) -> FilterSpec {
        self.shared.state.borrow().current_filter.clone()
    }

    /// Whether the filter in effect has any criterion.
    pub fn is_filter_active(&self) -> bool {
        self.shared.state.borrow().is_filter_active
    }

    /// Stream connectivity.
    pub fn connectivity(&self) -> ConnectivityState {
        self.supervisor.connectivity()
    }

    /// Follows stream connectivity.
    pub fn subscribe_connectivity(&self) -> watch::Receiver<ConnectivityState> {
        self.supervisor.subscribe()
    }

    /// Every connectivity transition, in order.
    pub fn subscribe_transitions(&self) -> broadcast::Receiver<ConnectivityState> {
        self.supervisor.subscribe_transitions()
    }

    /// Alerts for strong live events.
    pub fn subscribe_alerts(&self) -> broadcast::Receiver<AlertNotice> {
        self.shared.alerts.subscribe()
    }

    /// The live channel the controller listens on.
    pub fn live_channel(&self) -> &LiveChannel {
        &self.channel
    }
}

impl Drop for FeedController {
    fn drop(&mut self) {
        self.shared.cancel.cancel();
    }
}
