//! # SSE Stream Client
//!
//! Opens the long-lived `text/event-stream` endpoint and turns every event
//! with the configured name into a `LiveBatch` on the live channel.
//!
//! A session is represented by a [`StreamHandle`]. The handle owns the reader
//! task: `close()` cancels it and waits for it, dropping the handle cancels it.
//! Reconnecting is not this module's business, the supervisor does that by
//! calling [`StreamConnector::connect`] again.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::header::{ACCEPT, CACHE_CONTROL};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::configs::feed_config::FeedConfig;
use crate::core::live_channel::{BatchOrigin, LiveBatch, LiveChannel};
use crate::error::{FeedError, TransportError};
use crate::ingestors::sse_frame::{SseDecoder, SseEvent};
use crate::quakes::event_record::decode_batch;

/// Header carrying the opaque device identifier.
pub const DEVICE_ID_HEADER: &str = "X-Device-Id";

/// Lifecycle of one stream session.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamState {
    /// Nothing attempted yet.
    Idle,
    /// Request sent, waiting for response headers.
    Opening,
    /// Headers accepted, body being read.
    Open,
    /// Body ended cleanly or the session was closed locally.
    Closed,
    /// The open or the read failed.
    Failed(TransportError),
}

/// How a session ended.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamOutcome {
    /// Clean end of body, or cancelled by `close()`.
    Closed,
    /// Mid-stream I/O failure.
    Failed(TransportError),
}

/// Something that can open a live session feeding a [`LiveChannel`].
#[async_trait]
pub trait StreamConnector: Send + Sync + 'static {
    /// Opens a session. Resolves once the session is established (headers
    /// accepted), or fails with the transport error that prevented it.
    async fn connect(&self, channel: LiveChannel) -> Result<StreamHandle, TransportError>;
}

/// # Stream Handle
///
/// Owns one running session.
#[derive(Debug)]
pub struct StreamHandle {
    cancel: CancellationToken,
    task: Option<JoinHandle<StreamOutcome>>,
    state: watch::Receiver<StreamState>,
    finished: Option<StreamOutcome>,
}

impl StreamHandle {
    /// Spawns `body` as the session's reader task.
    ///
    /// `state` flips to `Open` immediately and to `Closed`/`Failed` when
    /// `body` resolves. `body` must return once its token is cancelled.
    pub fn spawn<F, Fut>(state: Arc<watch::Sender<StreamState>>, body: F) -> Self
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = StreamOutcome> + Send + 'static,
    {
        let cancel = CancellationToken::new();
        let receiver = state.subscribe();
        state.send_replace(StreamState::Open);

        let session = body(cancel.clone());
        let task = tokio::spawn(async move {
            let outcome = session.await;
            state.send_replace(match &outcome {
                StreamOutcome::Closed => StreamState::Closed,
                StreamOutcome::Failed(e) => StreamState::Failed(e.clone()),
            });
            outcome
        });

        Self { cancel, task: Some(task), state: receiver, finished: None }
    }

    /// Same as [`StreamHandle::spawn`] with a private state channel.
    pub fn detached<F, Fut>(body: F) -> Self
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = StreamOutcome> + Send + 'static,
    {
        let (tx, _rx) = watch::channel(StreamState::Opening);
        Self::spawn(Arc::new(tx), body)
    }

    /// Current session state.
    pub fn state(&self) -> StreamState {
        self.state.borrow().clone()
    }

    /// Waits for the session to end on its own. Cancel safe.
    pub async fn wait(&mut self) -> StreamOutcome {
        if let Some(done) = &self.finished {
            return done.clone();
        }
        let Some(task) = self.task.as_mut() else {
            return StreamOutcome::Closed;
        };
        let outcome = match task.await {
            Ok(outcome) => outcome,
            Err(e) => StreamOutcome::Failed(TransportError::Read(format!("reader task aborted: {e}"))),
        };
        self.task = None;
        self.finished = Some(outcome.clone());
        outcome
    }

    /// Cancels the reader and waits for it. Idempotent; once this returns
    /// the session publishes nothing more.
    pub async fn close(&mut self) {
        self.cancel.cancel();
        let _ = self.wait().await;
    }

    /// Whether the reader task has ended.
    pub fn is_finished(&self) -> bool {
        self.finished.is_some() || self.task.as_ref().map_or(true, |t| t.is_finished())
    }
}

impl Drop for StreamHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// # SSE Stream Client
///
/// `reqwest` based connector for the events stream. No request timeout is
/// set: the session is expected to stay open indefinitely.
pub struct SseStreamClient {
    http: reqwest::Client,
    url: Url,
    event_name: String,
    device_id: Option<String>,
    state: Arc<watch::Sender<StreamState>>,
}

impl SseStreamClient {
    /// Creates a client for `url`, forwarding events named `event_name`.
    pub fn new(url: Url, event_name: impl Into<String>, device_id: Option<String>) -> Result<Self, FeedError> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("quakefeed/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| FeedError::Config(format!("stream client: {e}")))?;
        let (state, _) = watch::channel(StreamState::Idle);
        Ok(Self {
            http,
            url,
            event_name: event_name.into(),
            device_id,
            state: Arc::new(state),
        })
    }

    /// Builds the client from the stream path, event name and device id of
    /// a config.
    pub fn from_config(config: &FeedConfig) -> Result<Self, FeedError> {
        let url = config.endpoint(&config.stream_path)?;
        Self::new(url, config.stream_event.clone(), config.device_id.clone())
    }

    /// Follows the state of the latest session.
    pub fn subscribe_state(&self) -> watch::Receiver<StreamState> {
        self.state.subscribe()
    }
}

#[async_trait]
impl StreamConnector for SseStreamClient {
    async fn connect(&self, channel: LiveChannel) -> Result<StreamHandle, TransportError> {
        self.state.send_replace(StreamState::Opening);
        log::info!("Opening event stream {}", self.url);

        let mut request = self
            .http
            .get(self.url.clone())
            .header(ACCEPT, "text/event-stream")
            .header(CACHE_CONTROL, "no-cache");
        if let Some(device) = &self.device_id {
            request = request.header(DEVICE_ID_HEADER, device);
        }

        let response = match request.send().await {
            Ok(resp) if resp.status().is_success() => resp,
            Ok(resp) => {
                let err = TransportError::Status(resp.status().as_u16());
                self.state.send_replace(StreamState::Failed(err.clone()));
                return Err(err);
            }
            Err(e) => {
                let err = TransportError::from(e);
                self.state.send_replace(StreamState::Failed(err.clone()));
                return Err(err);
            }
        };

        log::info!("Event stream open ({})", response.status());
        let event_name = self.event_name.clone();
        Ok(StreamHandle::spawn(self.state.clone(), move |cancel| {
            read_session(response, event_name, channel, cancel)
        }))
    }
}

async fn read_session(
    response: reqwest::Response,
    event_name: String,
    channel: LiveChannel,
    cancel: CancellationToken,
) -> StreamOutcome {
    let mut body = response.bytes_stream();
    let mut decoder = SseDecoder::new();

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                log::debug!("Event stream closed locally");
                return StreamOutcome::Closed;
            }
            chunk = body.next() => match chunk {
                Some(Ok(bytes)) => {
                    for event in decoder.push(&bytes) {
                        forward_event(&event, &event_name, &channel);
                    }
                }
                Some(Err(e)) => {
                    log::error!("Event stream read error: {}", e);
                    return StreamOutcome::Failed(TransportError::Read(e.to_string()));
                }
                None => {
                    log::warn!("Event stream closed by remote host");
                    return StreamOutcome::Closed;
                }
            }
        }
    }
}

fn forward_event(event: &SseEvent, event_name: &str, channel: &LiveChannel) {
    if event.event != event_name {
        log::trace!("Ignoring stream event `{}`", event.event);
        return;
    }
    match decode_batch(&event.data) {
        Ok(events) => {
            channel.publish(LiveBatch::new(BatchOrigin::Stream, events));
        }
        Err(e) => log::warn!("Dropping malformed `{}` payload: {}", event_name, e),
    }
}
