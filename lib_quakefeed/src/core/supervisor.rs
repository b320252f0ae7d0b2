//! # Reconnect Supervisor
//!
//! Keeps one stream session alive through a [`StreamConnector`].
//!
//! A single driver task walks an explicit phase machine:
//!
//! ```text
//!   Connecting{failures} --ok--> Session(handle) --closed--> Idle
//!          |                           |
//!        error                       failed
//!          v                           v
//!   Backoff{failures, delay} <---- (failures + 1 < max)
//!          |
//!   delay elapsed / reconnect() ---> Connecting{failures}
//!
//!   failures reaching max ---> Idle (Disconnected with the last error)
//! ```
//!
//! The failure counter lives in the phase value, never in a loop variable.
//! Every transition is published on a `watch` (latest state) and on a
//! `broadcast` (full history for observers that must not miss a step).

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::core::live_channel::LiveChannel;
use crate::error::{FeedError, TransportError};
use crate::ingestors::sse_stream::{StreamConnector, StreamHandle, StreamOutcome};

/// How the delay grows with consecutive failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "kind")]
pub enum BackoffPolicy {
    /// `attempt * base_delay`.
    #[default]
    Linear,
    /// `base_delay * 2^(attempt - 1)`, never above `max`.
    Exponential {
        /// Upper bound on a single delay.
        #[serde(with = "duration_ms")]
        max: Duration,
    },
}

/// Retry parameters. Fields missing from a config file take their
/// [`Default`] values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RetryPolicy {
    /// Consecutive failures after which the supervisor gives up.
    pub max_attempts: u32,
    /// Delay unit.
    #[serde(rename = "baseDelayMs", with = "duration_ms")]
    pub base_delay: Duration,
    /// Growth curve.
    pub backoff: BackoffPolicy,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(2000),
            backoff: BackoffPolicy::Linear,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let attempt = attempt.max(1);
        match self.backoff {
            BackoffPolicy::Linear => self.base_delay.saturating_mul(attempt),
            BackoffPolicy::Exponential { max } => {
                let factor = 1u32.checked_shl(attempt - 1).unwrap_or(u32::MAX);
                self.base_delay.saturating_mul(factor).min(max)
            }
        }
    }
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis().min(u64::MAX as u128) as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

/// Health of the live path as seen by consumers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectivityState {
    /// Not connected. Carries the reason when the supervisor gave up.
    Disconnected(Option<String>),
    /// Fresh start in progress.
    Connecting,
    /// A session is open.
    Connected,
    /// Waiting `next_delay` before retry number `attempt`.
    Retrying {
        /// Consecutive failures so far.
        attempt: u32,
        /// Pause before the next attempt.
        next_delay: Duration,
    },
}

#[derive(Debug)]
enum Command {
    Reconnect,
}

enum Phase {
    Connecting { failures: u32 },
    Session(StreamHandle),
    Backoff { failures: u32, delay: Duration },
    Idle,
}

/// # Reconnect Supervisor
///
/// Share it behind an `Arc`; every method takes `&self`.
pub struct ReconnectSupervisor {
    connector: Arc<dyn StreamConnector>,
    channel: LiveChannel,
    policy: RetryPolicy,
    state: Arc<watch::Sender<ConnectivityState>>,
    transitions: broadcast::Sender<ConnectivityState>,
    commands: mpsc::UnboundedSender<Command>,
    pending: Mutex<Option<mpsc::UnboundedReceiver<Command>>>,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ReconnectSupervisor {
    /// Creates an idle supervisor. Nothing happens until [`start`](Self::start).
    pub fn new(connector: Arc<dyn StreamConnector>, channel: LiveChannel, policy: RetryPolicy) -> Self {
        let (state, _) = watch::channel(ConnectivityState::Disconnected(None));
        let (transitions, _) = broadcast::channel(64);
        let (commands, pending) = mpsc::unbounded_channel();
        Self {
            connector,
            channel,
            policy,
            state: Arc::new(state),
            transitions,
            commands,
            pending: Mutex::new(Some(pending)),
            cancel: CancellationToken::new(),
            task: Mutex::new(None),
        }
    }

    /// Spawns the driver task. Later calls are no-ops.
    pub fn start(&self) {
        let Some(commands) = self.pending.lock().unwrap_or_else(|p| p.into_inner()).take() else {
            log::debug!("Reconnect supervisor already started");
            return;
        };
        if self.cancel.is_cancelled() {
            log::warn!("Reconnect supervisor was shut down before it started");
            return;
        }

        let driver = Driver {
            connector: Arc::clone(&self.connector),
            channel: self.channel.clone(),
            policy: self.policy,
            state: Arc::clone(&self.state),
            transitions: self.transitions.clone(),
            commands,
            cancel: self.cancel.clone(),
        };
        let task = tokio::spawn(driver.run());
        *self.task.lock().unwrap_or_else(|p| p.into_inner()) = Some(task);
    }

    /// Asks for a connection now.
    ///
    /// No-op while connecting or connected. While retrying, the pending
    /// backoff is skipped. After giving up (or a clean close) a fresh run
    /// starts with a zero failure count.
    pub fn reconnect(&self) {
        if self.commands.send(Command::Reconnect).is_err() {
            log::debug!("Reconnect requested after the supervisor stopped");
        }
    }

    /// Latest connectivity state.
    pub fn connectivity(&self) -> ConnectivityState {
        self.state.borrow().clone()
    }

    /// Follows the latest connectivity state.
    pub fn subscribe(&self) -> watch::Receiver<ConnectivityState> {
        self.state.subscribe()
    }

    /// Receives every transition, in order.
    pub fn subscribe_transitions(&self) -> broadcast::Receiver<ConnectivityState> {
        self.transitions.subscribe()
    }

    /// The retry parameters in use.
    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Cancels any pending backoff or open, closes the active session and
    /// waits for the driver task to finish.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let task = self.task.lock().unwrap_or_else(|p| p.into_inner()).take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                log::error!("Reconnect supervisor task ended abnormally: {}", e);
            }
        }
        if *self.state.borrow() != ConnectivityState::Disconnected(None) {
            self.state.send_replace(ConnectivityState::Disconnected(None));
            let _ = self.transitions.send(ConnectivityState::Disconnected(None));
        }
        log::info!("Reconnect supervisor stopped");
    }
}

impl Drop for ReconnectSupervisor {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

struct Driver {
    connector: Arc<dyn StreamConnector>,
    channel: LiveChannel,
    policy: RetryPolicy,
    state: Arc<watch::Sender<ConnectivityState>>,
    transitions: broadcast::Sender<ConnectivityState>,
    commands: mpsc::UnboundedReceiver<Command>,
    cancel: CancellationToken,
}

impl Driver {
    fn emit(&self, next: ConnectivityState) {
        log::info!("Connectivity: {:?}", next);
        self.state.send_replace(next.clone());
        let _ = self.transitions.send(next);
    }

    async fn run(mut self) {
        self.emit(ConnectivityState::Connecting);
        let mut phase = Phase::Connecting { failures: 0 };

        loop {
            let next = match phase {
                Phase::Connecting { failures } => self.connecting(failures).await,
                Phase::Session(handle) => self.session(handle).await,
                Phase::Backoff { failures, delay } => self.backoff(failures, delay).await,
                Phase::Idle => self.idle().await,
            };
            match next {
                Some(p) => phase = p,
                None => break,
            }
        }
        log::debug!("Reconnect driver exiting");
    }

    async fn connecting(&mut self, failures: u32) -> Option<Phase> {
        let connector = Arc::clone(&self.connector);
        let channel = self.channel.clone();
        let connect = connector.connect(channel);
        tokio::pin!(connect);

        let result = loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return None,
                cmd = self.commands.recv() => match cmd {
                    Some(Command::Reconnect) => log::debug!("Reconnect ignored: already connecting"),
                    None => return None,
                },
                result = &mut connect => break result,
            }
        };

        Some(match result {
            Ok(handle) => {
                self.emit(ConnectivityState::Connected);
                Phase::Session(handle)
            }
            Err(e) => {
                log::warn!("Stream connect failed: {}", e);
                self.failed(failures + 1, e)
            }
        })
    }

    async fn session(&mut self, mut handle: StreamHandle) -> Option<Phase> {
        let outcome = loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    handle.close().await;
                    return None;
                }
                cmd = self.commands.recv() => match cmd {
                    Some(Command::Reconnect) => log::debug!("Reconnect ignored: already connected"),
                    None => {
                        handle.close().await;
                        return None;
                    }
                },
                outcome = handle.wait() => break outcome,
            }
        };

        Some(match outcome {
            StreamOutcome::Closed => {
                self.emit(ConnectivityState::Disconnected(None));
                Phase::Idle
            }
            StreamOutcome::Failed(e) => {
                log::warn!("Stream session failed: {}", e);
                self.failed(1, e)
            }
        })
    }

    fn failed(&self, failures: u32, last: TransportError) -> Phase {
        if failures >= self.policy.max_attempts {
            let reason = FeedError::ExhaustedRetries { attempts: failures, last }.to_string();
            log::error!("Giving up on the event stream: {}", reason);
            self.emit(ConnectivityState::Disconnected(Some(reason)));
            return Phase::Idle;
        }
        let delay = self.policy.delay_for(failures);
        self.emit(ConnectivityState::Retrying { attempt: failures, next_delay: delay });
        Phase::Backoff { failures, delay }
    }

    async fn backoff(&mut self, failures: u32, delay: Duration) -> Option<Phase> {
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            cmd = self.commands.recv() => match cmd {
                Some(Command::Reconnect) => {
                    log::info!("Reconnect requested, skipping {:?} backoff", delay);
                    Some(Phase::Connecting { failures })
                }
                None => None,
            },
            _ = &mut sleep => Some(Phase::Connecting { failures }),
        }
    }

    async fn idle(&mut self) -> Option<Phase> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            cmd = self.commands.recv() => match cmd {
                Some(Command::Reconnect) => {
                    self.emit(ConnectivityState::Connecting);
                    Some(Phase::Connecting { failures: 0 })
                }
                None => None,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

    enum Step {
        Fail,
        Serve,
        CloseAtOnce,
    }

    struct ScriptedConnector {
        script: Mutex<VecDeque<Step>>,
        attempts: AtomicU32,
        session_cancelled: Arc<AtomicBool>,
    }

    impl ScriptedConnector {
        fn new(steps: Vec<Step>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(steps.into()),
                attempts: AtomicU32::new(0),
                session_cancelled: Arc::new(AtomicBool::new(false)),
            })
        }
    }

    #[async_trait]
    impl StreamConnector for ScriptedConnector {
        async fn connect(&self, _channel: LiveChannel) -> Result<StreamHandle, TransportError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            let step = self.script.lock().unwrap().pop_front().unwrap_or(Step::Fail);
            match step {
                Step::Fail => Err(TransportError::Connect("connection refused".into())),
                Step::Serve => {
                    let flag = Arc::clone(&self.session_cancelled);
                    Ok(StreamHandle::detached(move |cancel| async move {
                        cancel.cancelled().await;
                        flag.store(true, Ordering::SeqCst);
                        StreamOutcome::Closed
                    }))
                }
                Step::CloseAtOnce => Ok(StreamHandle::detached(|_| async { StreamOutcome::Closed })),
            }
        }
    }

    async fn collect_until(
        rx: &mut broadcast::Receiver<ConnectivityState>,
        stop: impl Fn(&ConnectivityState) -> bool,
    ) -> Vec<ConnectivityState> {
        let mut seen = Vec::new();
        loop {
            let state = rx.recv().await.unwrap();
            let done = stop(&state);
            seen.push(state);
            if done {
                return seen;
            }
        }
    }

    #[test]
    fn delays_follow_the_policy() {
        let linear = RetryPolicy::default();
        assert_eq!(linear.delay_for(1), Duration::from_secs(2));
        assert_eq!(linear.delay_for(3), Duration::from_secs(6));

        let expo = RetryPolicy {
            backoff: BackoffPolicy::Exponential { max: Duration::from_secs(10) },
            ..RetryPolicy::default()
        };
        assert_eq!(expo.delay_for(1), Duration::from_secs(2));
        assert_eq!(expo.delay_for(3), Duration::from_secs(8));
        assert_eq!(expo.delay_for(4), Duration::from_secs(10));
        assert_eq!(expo.delay_for(40), Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn three_failures_then_connected() {
        let connector = ScriptedConnector::new(vec![Step::Fail, Step::Fail, Step::Fail, Step::Serve]);
        let sup = ReconnectSupervisor::new(connector.clone(), LiveChannel::new(), RetryPolicy::default());
        let mut rx = sup.subscribe_transitions();
        sup.start();

        let seen = collect_until(&mut rx, |s| *s == ConnectivityState::Connected).await;
        assert_eq!(
            seen,
            vec![
                ConnectivityState::Connecting,
                ConnectivityState::Retrying { attempt: 1, next_delay: Duration::from_secs(2) },
                ConnectivityState::Retrying { attempt: 2, next_delay: Duration::from_secs(4) },
                ConnectivityState::Retrying { attempt: 3, next_delay: Duration::from_secs(6) },
                ConnectivityState::Connected,
            ]
        );
        assert!(!seen.iter().any(|s| matches!(s, ConnectivityState::Disconnected(_))));
        assert_eq!(connector.attempts.load(Ordering::SeqCst), 4);

        sup.shutdown().await;
        assert!(connector.session_cancelled.load(Ordering::SeqCst));
        assert_eq!(sup.connectivity(), ConnectivityState::Disconnected(None));
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_max_attempts() {
        let connector = ScriptedConnector::new(vec![]);
        let sup = ReconnectSupervisor::new(connector.clone(), LiveChannel::new(), RetryPolicy::default());
        let mut rx = sup.subscribe_transitions();
        sup.start();

        let seen = collect_until(&mut rx, |s| matches!(s, ConnectivityState::Disconnected(_))).await;
        let retries = seen.iter().filter(|s| matches!(s, ConnectivityState::Retrying { .. })).count();
        assert_eq!(retries, 4);
        match seen.last() {
            Some(ConnectivityState::Disconnected(Some(reason))) => {
                assert!(reason.starts_with("gave up after 5 consecutive failures"));
            }
            other => panic!("unexpected final state {other:?}"),
        }
        assert_eq!(connector.attempts.load(Ordering::SeqCst), 5);

        // No automatic retry afterwards.
        tokio::time::sleep(Duration::from_secs(3600)).await;
        assert_eq!(connector.attempts.load(Ordering::SeqCst), 5);

        // A manual reconnect starts a fresh run.
        sup.reconnect();
        let seen = collect_until(&mut rx, |s| matches!(s, ConnectivityState::Retrying { .. })).await;
        assert_eq!(
            seen,
            vec![
                ConnectivityState::Connecting,
                ConnectivityState::Retrying { attempt: 1, next_delay: Duration::from_secs(2) },
            ]
        );
        sup.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn reconnect_skips_pending_backoff() {
        let connector = ScriptedConnector::new(vec![Step::Fail, Step::Serve]);
        let policy = RetryPolicy { base_delay: Duration::from_secs(60), ..RetryPolicy::default() };
        let sup = ReconnectSupervisor::new(connector.clone(), LiveChannel::new(), policy);
        let mut rx = sup.subscribe_transitions();
        sup.start();

        collect_until(&mut rx, |s| matches!(s, ConnectivityState::Retrying { .. })).await;
        let before = tokio::time::Instant::now();
        sup.reconnect();
        collect_until(&mut rx, |s| *s == ConnectivityState::Connected).await;
        assert!(before.elapsed() < Duration::from_secs(60));

        // Connected: another reconnect is a no-op.
        sup.reconnect();
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(connector.attempts.load(Ordering::SeqCst), 2);
        assert_eq!(sup.connectivity(), ConnectivityState::Connected);
        sup.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn clean_close_disconnects_without_retry() {
        let connector = ScriptedConnector::new(vec![Step::CloseAtOnce]);
        let sup = ReconnectSupervisor::new(connector.clone(), LiveChannel::new(), RetryPolicy::default());
        let mut rx = sup.subscribe_transitions();
        sup.start();

        let seen = collect_until(&mut rx, |s| matches!(s, ConnectivityState::Disconnected(_))).await;
        assert_eq!(seen.last(), Some(&ConnectivityState::Disconnected(None)));
        tokio::time::sleep(Duration::from_secs(600)).await;
        assert_eq!(connector.attempts.load(Ordering::SeqCst), 1);
        sup.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_cancels_pending_backoff() {
        let connector = ScriptedConnector::new(vec![]);
        let sup = ReconnectSupervisor::new(connector.clone(), LiveChannel::new(), RetryPolicy::default());
        let mut rx = sup.subscribe_transitions();
        sup.start();
        collect_until(&mut rx, |s| matches!(s, ConnectivityState::Retrying { .. })).await;

        sup.shutdown().await;
        tokio::time::sleep(Duration::from_secs(600)).await;
        assert_eq!(connector.attempts.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn retry_policy_reads_from_json() {
        let policy: RetryPolicy = serde_json::from_str(
            r#"{"maxAttempts":3,"baseDelayMs":500,"backoff":{"kind":"exponential","max":4000}}"#,
        )
        .unwrap();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.base_delay, Duration::from_millis(500));
        assert_eq!(policy.backoff, BackoffPolicy::Exponential { max: Duration::from_secs(4) });
    }

    #[test]
    fn partial_retry_policy_fills_in_defaults() {
        let policy: RetryPolicy = serde_json::from_str(r#"{"maxAttempts":9}"#).unwrap();
        assert_eq!(policy.max_attempts, 9);
        assert_eq!(policy.base_delay, RetryPolicy::default().base_delay);
        assert_eq!(policy.backoff, BackoffPolicy::Linear);

        let empty: RetryPolicy = serde_json::from_str("{}").unwrap();
        assert_eq!(empty, RetryPolicy::default());
    }
}
