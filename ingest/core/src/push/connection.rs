//! Push connection lifecycle
//!
//! ```text
//!                  connect()
//!  Disconnected ─────────────► Connecting ──open──► Connected
//!       ▲                         ▲                    │
//!       │ disconnect()            │ backoff elapsed    │ transport error
//!       │                         │                    ▼
//!       └──────────────────── Reconnecting ◄───────────┘
//!                                 │
//!                                 └─ attempts exhausted ─► Error
//! ```
//!
//! The loop runs on its own task. Status and metrics live in a small shared
//! block so callers can read them without talking to the task.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::StreamExt;
use parking_lot::Mutex;
use reqwest::Url;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::backoff::BackoffPolicy;
use super::event::PushEvent;
use super::metrics::{ConnectionMetrics, MetricsCounters};
use super::transport::PushTransport;
use crate::error::{ErrorKind, IngestError, Result};

/// Path of the event endpoint relative to the base URL
pub const EVENT_PATH: &str = "event";

/// Connection state
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    /// Not connected (initial, and terminal after disconnect)
    Disconnected,
    /// Opening a stream
    Connecting,
    /// Stream open
    Connected,
    /// Waiting out a backoff delay
    Reconnecting,
    /// Gave up; `connect()` may be called again
    Error,
}

/// Notification delivered to the connection's owner
#[derive(Clone, Debug, PartialEq)]
pub enum ConnectionNotice {
    /// A stream was opened
    Opened,
    /// A well-formed event arrived
    Event(PushEvent),
    /// Transport failure or malformed event
    Error {
        /// Error classification
        kind: ErrorKind,
        /// Human-readable detail
        message: String,
    },
    /// The connection changed state
    Status(ConnectionStatus),
}

/// Push connection settings
#[derive(Clone, Debug)]
pub struct PushConfig {
    /// Server base URL (the event path is appended)
    pub base_url: String,
    /// Channel stamped on events that carry none
    pub channel: String,
    /// Access token sent as the `token` query parameter
    pub token: Option<String>,
    /// Reconnect delays
    pub backoff: BackoffPolicy,
    /// Consecutive failed attempts tolerated before giving up
    pub max_reconnect_attempts: Option<u32>,
}

impl PushConfig {
    /// Settings with default backoff and unlimited retries
    pub fn new(base_url: impl Into<String>, channel: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            channel: channel.into(),
            token: None,
            backoff: BackoffPolicy::default(),
            max_reconnect_attempts: None,
        }
    }

    /// Set the access token
    #[must_use]
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Set the backoff policy
    #[must_use]
    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    /// Limit consecutive failed attempts
    #[must_use]
    pub fn with_max_reconnect_attempts(mut self, max: u32) -> Self {
        self.max_reconnect_attempts = Some(max);
        self
    }

    /// Event endpoint URL; empty parameters are omitted
    pub fn event_url(&self, last_event_id: Option<&str>) -> Result<Url> {
        let base = self.base_url.trim_end_matches('/');
        let mut url = Url::parse(&format!("{base}/{EVENT_PATH}"))
            .map_err(|e| IngestError::Parse(format!("Invalid push URL '{}': {e}", self.base_url)))?;

        let params: Vec<(&str, &str)> = [
            ("token", self.token.as_deref()),
            ("lastEventId", last_event_id),
        ]
        .into_iter()
        .filter_map(|(key, value)| value.filter(|v| !v.is_empty()).map(|v| (key, v)))
        .collect();

        if !params.is_empty() {
            url.query_pairs_mut().extend_pairs(params);
        }
        Ok(url)
    }
}

// ============================================================================
// Shared state
// ============================================================================

#[derive(Debug)]
struct Shared {
    status: Mutex<ConnectionStatus>,
    last_event_id: Mutex<Option<String>>,
    metrics: MetricsCounters,
    disposed: AtomicBool,
    running: AtomicBool,
    notices: mpsc::UnboundedSender<ConnectionNotice>,
}

impl Shared {
    fn notify(&self, notice: ConnectionNotice) {
        // The owner may have dropped the receiver
        let _ = self.notices.send(notice);
    }

    /// Change state; a disposed connection only ever moves to Disconnected
    fn set_status(&self, status: ConnectionStatus) {
        if self.disposed.load(Ordering::SeqCst) && status != ConnectionStatus::Disconnected {
            return;
        }
        let changed = {
            let mut current = self.status.lock();
            let changed = *current != status;
            *current = status;
            changed
        };
        if changed {
            tracing::debug!(?status, "Push connection status changed");
            self.notify(ConnectionNotice::Status(status));
        }
    }

    /// Stop the loop for good. `running` clears before the Error notice goes
    /// out so an owner reacting to it can `connect()` again.
    fn give_up(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.set_status(ConnectionStatus::Error);
        tracing::debug!("Push connection loop gave up");
    }

    fn report_error(&self, error: &IngestError) {
        MetricsCounters::incr(&self.metrics.errors);
        self.notify(ConnectionNotice::Error {
            kind: error.kind(),
            message: error.to_string(),
        });
    }
}

// ============================================================================
// Connection
// ============================================================================

/// Long-lived push connection with resumable reconnection
pub struct PushConnection<T: PushTransport> {
    config: Arc<PushConfig>,
    transport: Arc<T>,
    shared: Arc<Shared>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl<T: PushTransport> PushConnection<T> {
    /// Create a disconnected connection and the receiver for its notices
    pub fn new(
        config: PushConfig,
        transport: T,
    ) -> Result<(Self, mpsc::UnboundedReceiver<ConnectionNotice>)> {
        config.event_url(None)?;

        let (notices, rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            status: Mutex::new(ConnectionStatus::Disconnected),
            last_event_id: Mutex::new(None),
            metrics: MetricsCounters::default(),
            disposed: AtomicBool::new(false),
            running: AtomicBool::new(false),
            notices,
        });

        Ok((
            Self {
                config: Arc::new(config),
                transport: Arc::new(transport),
                shared,
                cancel: CancellationToken::new(),
                task: None,
            },
            rx,
        ))
    }

    /// Start the connection loop
    ///
    /// Returns false when disposed or already running.
    pub fn connect(&mut self) -> bool {
        if self.shared.disposed.load(Ordering::SeqCst) {
            return false;
        }
        if self.shared.running.swap(true, Ordering::SeqCst) {
            return false;
        }

        tracing::info!(base_url = %self.config.base_url, channel = %self.config.channel, "Starting push connection");
        let task = ConnectionTask {
            config: self.config.clone(),
            transport: self.transport.clone(),
            shared: self.shared.clone(),
            cancel: self.cancel.clone(),
        };
        self.task = Some(tokio::spawn(task.run()));
        true
    }

    /// Dispose the connection. Cancels the live read and any pending
    /// reconnect; the instance never reconnects afterwards.
    pub fn disconnect(&mut self) {
        if self.shared.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::info!(channel = %self.config.channel, "Disconnecting push connection");
        self.cancel.cancel();
        self.shared.set_status(ConnectionStatus::Disconnected);
    }

    /// Wait for the connection task to exit
    pub async fn join(&mut self) {
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "Push connection task failed");
            }
        }
    }

    /// Current state
    #[must_use]
    pub fn status(&self) -> ConnectionStatus {
        *self.shared.status.lock()
    }

    /// Counter snapshot
    #[must_use]
    pub fn metrics(&self) -> ConnectionMetrics {
        self.shared.metrics.snapshot()
    }

    /// Resumption id sent on the next reconnect
    #[must_use]
    pub fn last_event_id(&self) -> Option<String> {
        self.shared.last_event_id.lock().clone()
    }

    /// Whether `disconnect` has been called
    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.shared.disposed.load(Ordering::SeqCst)
    }

    /// Settings
    #[must_use]
    pub fn config(&self) -> &PushConfig {
        &self.config
    }
}

impl<T: PushTransport> Drop for PushConnection<T> {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Why a connected stream stopped
enum StreamEnd {
    Cancelled,
    Failed(IngestError),
}

struct ConnectionTask<T: PushTransport> {
    config: Arc<PushConfig>,
    transport: Arc<T>,
    shared: Arc<Shared>,
    cancel: CancellationToken,
}

impl<T: PushTransport> ConnectionTask<T> {
    async fn run(self) {
        let mut attempt: u32 = 0;

        while !self.cancel.is_cancelled() {
            self.shared.set_status(ConnectionStatus::Connecting);
            MetricsCounters::incr(&self.shared.metrics.attempts);

            let failure = match self.attempt(&mut attempt).await {
                StreamEnd::Cancelled => break,
                StreamEnd::Failed(e) => e,
            };

            tracing::warn!(error = %failure, attempt, "Push connection failed");
            self.shared.report_error(&failure);

            if !failure.is_retryable() {
                self.shared.give_up();
                return;
            }
            if let Some(max) = self.config.max_reconnect_attempts {
                if attempt >= max {
                    tracing::warn!(max, "Push reconnect attempts exhausted");
                    self.shared.give_up();
                    return;
                }
            }

            let delay = self.config.backoff.delay_for_attempt(attempt);
            attempt += 1;
            self.shared
                .metrics
                .current_backoff_ms
                .store(delay.as_millis() as u64, Ordering::Relaxed);
            self.shared.set_status(ConnectionStatus::Reconnecting);
            tracing::debug!(delay_ms = delay.as_millis() as u64, attempt, "Scheduling push reconnect");

            tokio::select! {
                biased;
                () = self.cancel.cancelled() => break,
                () = tokio::time::sleep(delay) => {}
            }
        }

        self.shared.running.store(false, Ordering::SeqCst);
        tracing::debug!("Push connection loop exited");
    }

    /// One connect-and-read cycle
    async fn attempt(&self, attempt: &mut u32) -> StreamEnd {
        let last_event_id = self.shared.last_event_id.lock().clone();
        let url = match self.config.event_url(last_event_id.as_deref()) {
            Ok(url) => url,
            Err(e) => return StreamEnd::Failed(e),
        };

        let opened = tokio::select! {
            biased;
            () = self.cancel.cancelled() => return StreamEnd::Cancelled,
            opened = self.transport.open(&url) => opened,
        };
        let mut stream = match opened {
            Ok(stream) => stream,
            Err(e) => return StreamEnd::Failed(e),
        };

        *attempt = 0;
        MetricsCounters::incr(&self.shared.metrics.successes);
        self.shared.set_status(ConnectionStatus::Connected);
        self.shared.notify(ConnectionNotice::Opened);
        tracing::info!(channel = %self.config.channel, "Push connection opened");

        loop {
            let next = tokio::select! {
                biased;
                () = self.cancel.cancelled() => return StreamEnd::Cancelled,
                next = stream.next() => next,
            };
            match next {
                Some(Ok(line)) => self.handle_line(&line),
                Some(Err(e)) => return StreamEnd::Failed(e),
                None => {
                    return StreamEnd::Failed(IngestError::Network(
                        "Push stream closed by server".to_string(),
                    ))
                }
            }
        }
    }

    fn handle_line(&self, line: &str) {
        // Tolerate SSE framing: `data:` prefixes and `:` comments
        let line = line.trim();
        if line.is_empty() || line.starts_with(':') {
            return;
        }
        let payload = line
            .strip_prefix("data:")
            .map(str::trim_start)
            .unwrap_or(line);

        match PushEvent::parse(payload, &self.config.channel) {
            Ok(event) => {
                MetricsCounters::incr(&self.shared.metrics.events_received);
                if let Some(id) = event.event_id.as_ref().filter(|id| !id.is_empty()) {
                    *self.shared.last_event_id.lock() = Some(id.clone());
                }
                self.shared.notify(ConnectionNotice::Event(event));
            }
            Err(e) => {
                tracing::warn!(error = %e, "Dropping malformed push event");
                self.shared.report_error(&e);
            }
        }
    }
}
