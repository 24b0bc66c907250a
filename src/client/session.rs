//! Reconnection engine
//!
//! A [`Session`] owns one logical subscription and walks it through
//! `Idle → Connecting → Open → Backoff → Connecting → … → Closed`.
//!
//! - The stream is driven by a background Tokio task started by the first
//!   [`Session::connect`]. Every wait in that task (connect, read, backoff)
//!   races against close.
//! - Each (re)connect carries the watermark, the highest id delivered so far,
//!   so the server can replay what was missed. Records at or below the
//!   watermark are discarded as duplicates. A stale-watermark notice from the
//!   server moves the watermark back to the server's last id.
//! - Consumer callbacks, watermark updates and state changes all happen under
//!   one lock. Once [`Session::close`] returns no callback runs again.
//! - `Closed` is terminal. It is entered by `close` or when the attempt ceiling
//!   is reached, never left.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use parking_lot::{Mutex, MutexGuard};
use tokio::runtime::Handle;
use tokio::sync::{Notify, watch};
use tracing::{debug, info, warn};

use crate::broker::{Message, ReplayGap};
use crate::client::backoff::Backoff;
use crate::client::connector::{Connector, FrameStream, HttpConnector};
use crate::client::consumer::Consumer;
use crate::client::options::ClientConfig;
use crate::transport::parse::{Frame, RawEvent};
use crate::transport::wire::GAP_EVENT;
use crate::utils::error::ClientError;

/// Lifecycle of a [`Session`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Created, `connect` not called yet.
    Idle,
    Connecting,
    /// Receiving records.
    Open,
    /// Waiting before the next attempt.
    Backoff,
    /// Terminal.
    Closed,
}

impl ConnectionState {
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Open)
    }

    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Closed)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Open => "open",
            Self::Backoff => "backoff",
            Self::Closed => "closed",
        };
        f.write_str(name)
    }
}

struct Inner {
    state: ConnectionState,
    watermark: Option<u64>,
    attempts: u32,
    current_delay: Duration,
    consumer: Option<Box<dyn Consumer>>,
}

struct Shared {
    config: ClientConfig,
    backoff: Backoff,
    connector: Box<dyn Connector>,
    inner: Mutex<Inner>,
    state_tx: watch::Sender<ConnectionState>,
    retry_now: Notify,
}

/// Client side of one subscription. Dropping it closes it.
pub struct Session {
    shared: Arc<Shared>,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.shared.inner.lock();
        f.debug_struct("Session")
            .field("endpoint", &self.shared.config.endpoint)
            .field("state", &inner.state)
            .field("watermark", &inner.watermark)
            .field("attempts", &inner.attempts)
            .finish()
    }
}

impl Session {
    pub fn new(
        config: ClientConfig,
        connector: impl Connector,
        consumer: impl Consumer,
    ) -> Result<Self, ClientError> {
        config.validate().map_err(ClientError::Config)?;
        let backoff = config.backoff();
        let (state_tx, _) = watch::channel(ConnectionState::Idle);
        let inner = Inner {
            state: ConnectionState::Idle,
            watermark: config.last_event_id.filter(|&id| id > 0),
            attempts: 0,
            current_delay: backoff.base,
            consumer: Some(Box::new(consumer)),
        };
        Ok(Self {
            shared: Arc::new(Shared {
                config,
                backoff,
                connector: Box::new(connector),
                inner: Mutex::new(inner),
                state_tx,
                retry_now: Notify::new(),
            }),
        })
    }

    /// A session that reaches its endpoint over HTTP.
    pub fn http(config: ClientConfig, consumer: impl Consumer) -> Result<Self, ClientError> {
        let connector = HttpConnector::new(config.connect_timeout)?;
        Self::new(config, connector, consumer)
    }

    /// Replaces the consumer. Later deliveries go to the new one only.
    pub fn set_consumer(&self, consumer: impl Consumer) -> Result<(), ClientError> {
        let mut inner = self.shared.inner.lock();
        if inner.state.is_closed() {
            return Err(ClientError::Closed);
        }
        inner.consumer = Some(Box::new(consumer));
        Ok(())
    }

    /// Starts the session, or cuts a pending backoff short.
    ///
    /// Must be called from within a Tokio runtime the first time. A no-op while
    /// connecting or open.
    pub fn connect(&self) -> Result<(), ClientError> {
        let mut inner = self.shared.inner.lock();
        match inner.state {
            ConnectionState::Closed => Err(ClientError::Closed),
            ConnectionState::Connecting | ConnectionState::Open => Ok(()),
            ConnectionState::Backoff => {
                debug!(endpoint = %self.shared.config.endpoint, "retrying without waiting");
                self.shared.retry_now.notify_waiters();
                Ok(())
            }
            ConnectionState::Idle => {
                let runtime = Handle::try_current().map_err(|_| ClientError::NoRuntime)?;
                self.shared.set_state(&mut inner, ConnectionState::Connecting);
                runtime.spawn(drive(self.shared.clone()));
                Ok(())
            }
        }
    }

    /// Closes the session from any state.
    ///
    /// The consumer receives [`ClientError::Closed`] (unless the session had
    /// already terminated) and is dropped before this returns.
    pub fn close(&self) {
        self.shared.close();
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.inner.lock().state
    }

    /// Highest id delivered so far.
    pub fn watermark(&self) -> Option<u64> {
        self.shared.inner.lock().watermark
    }

    /// Consecutive failed attempts since the last successful open.
    pub fn attempts(&self) -> u32 {
        self.shared.inner.lock().attempts
    }

    /// The most recent backoff wait, or the base interval after a successful open.
    pub fn current_delay(&self) -> Duration {
        self.shared.inner.lock().current_delay
    }

    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state_tx.subscribe()
    }

    /// Resolves once the session is closed, whatever closed it.
    pub async fn closed(&self) {
        let mut changes = self.state_changes();
        wait_closed(&mut changes).await;
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.shared.close();
    }
}

impl Shared {
    fn set_state(&self, inner: &mut MutexGuard<'_, Inner>, state: ConnectionState) {
        inner.state = state;
        self.state_tx.send_replace(state);
    }

    /// Enters `Connecting` and returns the watermark to resume from.
    /// `None` once closed.
    fn begin_attempt(&self) -> Option<Option<u64>> {
        let mut inner = self.inner.lock();
        if inner.state.is_closed() {
            return None;
        }
        self.set_state(&mut inner, ConnectionState::Connecting);
        info!(
            endpoint = %self.config.endpoint,
            attempt = inner.attempts,
            watermark = ?inner.watermark,
            "connecting"
        );
        Some(inner.watermark)
    }

    fn opened(&self) -> bool {
        let mut inner = self.inner.lock();
        if inner.state.is_closed() {
            return false;
        }
        self.set_state(&mut inner, ConnectionState::Open);
        inner.attempts = 0;
        inner.current_delay = self.backoff.base;
        info!(endpoint = %self.config.endpoint, "stream open");
        if let Some(consumer) = inner.consumer.as_mut() {
            consumer.on_open();
        }
        true
    }

    /// Handles one frame. Returns `false` once the session is closed.
    fn deliver(&self, frame: Frame) -> bool {
        let raw = match frame {
            Frame::Comment => return true,
            Frame::Event(raw) => raw,
        };

        let Some(id) = raw.id.as_deref().filter(|id| !id.is_empty()) else {
            return self.control(raw);
        };
        let Ok(id) = id.trim().parse::<u64>() else {
            warn!(id, "skipping event with a non-numeric id");
            return true;
        };

        let mut inner = self.inner.lock();
        if inner.state.is_closed() {
            return false;
        }
        if inner.watermark.is_some_and(|watermark| id <= watermark) {
            debug!(id, "skipping duplicate");
            return true;
        }

        let message = Message {
            id,
            event_type: raw.event,
            targets: Vec::new(),
            payload: raw.data,
        };
        if let Some(consumer) = inner.consumer.as_mut() {
            consumer.on_message(message);
        }
        inner.watermark = Some(id);
        true
    }

    fn control(&self, raw: RawEvent) -> bool {
        if raw.event != GAP_EVENT {
            warn!(event = %raw.event, "skipping event without an id");
            return true;
        }
        let gap: ReplayGap = match serde_json::from_slice(&raw.data) {
            Ok(gap) => gap,
            Err(e) => {
                warn!(error = %e, "malformed replay gap notice");
                return true;
            }
        };

        let mut inner = self.inner.lock();
        if inner.state.is_closed() {
            return false;
        }
        warn!(
            requested = gap.requested,
            oldest = ?gap.oldest,
            missed = gap.missed(),
            "server could not replay everything after the watermark"
        );
        if gap.is_stale() {
            inner.watermark = (gap.latest > 0).then_some(gap.latest);
        }
        if let Some(consumer) = inner.consumer.as_mut() {
            consumer.on_data_loss(&gap);
        }
        true
    }

    /// Records a lost stream. Returns the wait before the next attempt, or
    /// `None` if the session is now closed.
    fn lost(&self, error: ClientError) -> Option<Duration> {
        let mut inner = self.inner.lock();
        if inner.state.is_closed() {
            return None;
        }

        let max = self.config.max_reconnect_attempts;
        if max > 0 && inner.attempts >= max {
            warn!(
                endpoint = %self.config.endpoint,
                attempts = inner.attempts,
                error = %error,
                "giving up"
            );
            let terminal = ClientError::RetriesExhausted {
                attempts: inner.attempts,
                last_error: error.to_string(),
            };
            self.terminate(&mut inner, &terminal);
            return None;
        }

        inner.attempts += 1;
        let delay = self.backoff.delay(inner.attempts);
        inner.current_delay = delay;
        self.set_state(&mut inner, ConnectionState::Backoff);
        warn!(
            endpoint = %self.config.endpoint,
            attempt = inner.attempts,
            delay_ms = millis(delay),
            error = %error,
            "stream lost, backing off"
        );
        Some(delay)
    }

    fn close(&self) {
        let mut inner = self.inner.lock();
        if inner.state.is_closed() {
            return;
        }
        info!(endpoint = %self.config.endpoint, "session closed");
        self.terminate(&mut inner, &ClientError::Closed);
    }

    fn terminate(&self, inner: &mut MutexGuard<'_, Inner>, error: &ClientError) {
        if let Some(mut consumer) = inner.consumer.take() {
            consumer.on_terminal(error);
        }
        self.set_state(inner, ConnectionState::Closed);
    }
}

/// Whole milliseconds, saturating at `u64::MAX`.
pub(super) fn millis(delay: Duration) -> u64 {
    u64::try_from(delay.as_millis()).unwrap_or(u64::MAX)
}

async fn wait_closed(changes: &mut watch::Receiver<ConnectionState>) {
    // The sender lives as long as the session; an error means it is gone.
    let _ = changes.wait_for(ConnectionState::is_closed).await;
}

async fn open(shared: &Shared, watermark: Option<u64>) -> Result<FrameStream, ClientError> {
    let timeout = shared.config.connect_timeout;
    tokio::time::timeout(
        timeout,
        shared.connector.connect(&shared.config.endpoint, watermark),
    )
    .await
    .unwrap_or(Err(ClientError::Timeout(timeout)))
}

async fn read(
    stream: &mut FrameStream,
    read_timeout: Option<Duration>,
) -> Option<Result<Frame, ClientError>> {
    match read_timeout {
        Some(limit) => tokio::time::timeout(limit, stream.next())
            .await
            .unwrap_or(Some(Err(ClientError::Timeout(limit)))),
        None => stream.next().await,
    }
}

async fn drive(shared: Arc<Shared>) {
    let mut changes = shared.state_tx.subscribe();

    loop {
        let Some(watermark) = shared.begin_attempt() else {
            return;
        };

        let opened = tokio::select! {
            biased;
            _ = wait_closed(&mut changes) => return,
            result = open(&shared, watermark) => result,
        };

        let error = match opened {
            Ok(mut stream) => {
                if !shared.opened() {
                    return;
                }
                loop {
                    let item = tokio::select! {
                        biased;
                        _ = wait_closed(&mut changes) => return,
                        item = read(&mut stream, shared.config.read_timeout) => item,
                    };
                    match item {
                        Some(Ok(frame)) => {
                            if !shared.deliver(frame) {
                                return;
                            }
                        }
                        Some(Err(e)) => break e,
                        None => break ClientError::StreamEnded,
                    }
                }
            }
            Err(e) => e,
        };

        // Registered before entering Backoff so a `connect` in between is seen.
        let retry_now = shared.retry_now.notified();
        tokio::pin!(retry_now);
        retry_now.as_mut().enable();

        let Some(delay) = shared.lost(error) else {
            return;
        };

        tokio::select! {
            biased;
            _ = wait_closed(&mut changes) => return,
            _ = retry_now => {}
            _ = tokio::time::sleep(delay) => {}
        }
    }
}
