// STOMP push channel with protocol fallback.
//
// One logical connection carries every channel subscription. The driver
// task connects through the primary (WebSocket) factory, and on repeated
// low-level failures swaps in the long-poll factory. If the fallback cannot
// connect within its window the channel gives up: it raises a connectivity
// alert and deactivates itself.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use arc_swap::ArcSwapOption;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde_json::Value;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};
use url::Url;

use crate::error::Error;
use crate::socket::{SocketConnection, SocketFactory, SocketKind};
use crate::stomp::{Command, Frame};

const EVENT_CHANNEL_CAPACITY: usize = 256;

// ── Configuration ────────────────────────────────────────────────────

/// Exponential backoff between reconnection attempts.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Delay before the first reconnection attempt. Default: 1s.
    pub initial_delay: Duration,

    /// Upper bound on backoff delay. Default: 30s.
    pub max_delay: Duration,

    /// Attempts on the primary protocol before giving up.
    /// `None` means retry until the fallback window decides.
    pub max_retries: Option<u32>,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            max_retries: None,
        }
    }
}

/// Push channel settings.
#[derive(Debug, Clone)]
pub struct PushConfig {
    /// HTTP(S) root of the push endpoint, e.g. `https://host/iaf/api/ws`.
    pub url: Url,
    /// How long the fallback protocol may try before the channel fails.
    pub fallback_timeout: Duration,
    /// Consecutive low-level errors on the primary protocol that trigger fallback.
    pub fallback_error_threshold: u32,
    /// Deadline for the STOMP CONNECTED reply after the socket opened.
    pub connect_timeout: Duration,
    /// STOMP heart-beat offer `(outgoing, incoming)` in milliseconds.
    pub heart_beat: (u64, u64),
    pub reconnect: ReconnectConfig,
}

impl PushConfig {
    pub fn new(url: Url) -> Self {
        Self {
            url,
            fallback_timeout: Duration::from_secs(20),
            fallback_error_threshold: 2,
            connect_timeout: Duration::from_secs(10),
            heart_beat: (0, 0),
            reconnect: ReconnectConfig::default(),
        }
    }
}

// ── Observable state ─────────────────────────────────────────────────

/// Which protocol the channel is on, or whether it gave up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolState {
    Primary,
    Fallback,
    Failed,
}

/// Lifecycle notifications, broadcast to every observer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleEvent {
    Connected { protocol: SocketKind },
    Disconnected,
    /// Bad STOMP frame, ERROR frame, or undecodable payload.
    ProtocolError(String),
    /// The peer closed the socket cleanly.
    SocketClosed,
    /// Low-level socket failure (connect refused, I/O error, abnormal close).
    SocketError(String),
    FallbackEngaged,
    Failed,
}

/// Blocking alert raised once the channel has given up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectivityAlert {
    pub title: String,
    pub message: String,
}

impl ConnectivityAlert {
    fn connection_lost() -> Self {
        Self {
            title: "Connection lost".into(),
            message: "The server stopped responding to live updates. \
                      Log in again or reload to continue."
                .into(),
        }
    }
}

// ── Fallback state machine ───────────────────────────────────────────

/// Pure transition logic behind [`ProtocolState`].
///
/// Low-level errors are only counted on the primary protocol. The failure
/// deadline is armed on entering fallback and disarmed by a connect. A
/// connect resets the error counter but never returns to the primary
/// protocol.
#[derive(Debug, Clone)]
pub struct FallbackMachine {
    state: ProtocolState,
    consecutive_errors: u32,
    threshold: u32,
    timeout: Duration,
    deadline: Option<Instant>,
}

impl FallbackMachine {
    pub fn new(threshold: u32, timeout: Duration) -> Self {
        Self {
            state: ProtocolState::Primary,
            consecutive_errors: 0,
            threshold: threshold.max(1),
            timeout,
            deadline: None,
        }
    }

    pub fn state(&self) -> ProtocolState {
        self.state
    }

    pub fn consecutive_errors(&self) -> u32 {
        self.consecutive_errors
    }

    /// Instant at which fallback gives up, if armed.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn on_connected(&mut self) {
        self.consecutive_errors = 0;
        self.deadline = None;
    }

    /// Record a low-level error. Returns `true` when this error switched
    /// the machine to [`ProtocolState::Fallback`].
    pub fn on_low_level_error(&mut self, now: Instant) -> bool {
        if self.state != ProtocolState::Primary {
            return false;
        }
        self.consecutive_errors += 1;
        if self.consecutive_errors >= self.threshold {
            self.state = ProtocolState::Fallback;
            self.deadline = Some(now + self.timeout);
            return true;
        }
        false
    }

    /// Move to [`ProtocolState::Failed`] if the fallback deadline has passed.
    pub fn expire(&mut self, now: Instant) -> bool {
        match (self.state, self.deadline) {
            (ProtocolState::Fallback, Some(deadline)) if now >= deadline => {
                self.state = ProtocolState::Failed;
                self.deadline = None;
                true
            }
            _ => false,
        }
    }

    /// Give up regardless of the deadline (retry budget exhausted).
    pub fn fail(&mut self) {
        self.state = ProtocolState::Failed;
        self.deadline = None;
    }
}

// ── Subscriptions ────────────────────────────────────────────────────

type Handler = Arc<dyn Fn(Value) + Send + Sync>;

struct SubscriptionEntry {
    id: String,
    handler: Handler,
}

/// Token for one channel subscription.
///
/// Dropping the token leaves the subscription in place; call
/// [`unsubscribe`](Self::unsubscribe) to end it.
#[derive(Debug)]
pub struct Subscription {
    channel: String,
    id: String,
    inner: Weak<PushInner>,
}

impl Subscription {
    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Remove the subscription. Once this returns the handler is never
    /// called again: removal waits for any delivery in progress.
    ///
    /// Handlers must not unsubscribe their own channel.
    pub fn unsubscribe(self) {
        let Some(inner) = self.inner.upgrade() else {
            return;
        };
        if inner
            .subscriptions
            .remove_if(&self.channel, |_, entry| entry.id == self.id)
            .is_some()
        {
            debug!(channel = %self.channel, id = %self.id, "unsubscribed");
            inner.queue(Frame::unsubscribe(&self.id));
        }
    }
}

// ── PushClient ───────────────────────────────────────────────────────

/// Owns the single push connection and its channel subscriptions.
///
/// Cheaply cloneable; all clones drive the same connection.
#[derive(Clone)]
pub struct PushClient {
    inner: Arc<PushInner>,
}

struct Session {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

struct PushInner {
    config: PushConfig,
    primary: Arc<dyn SocketFactory>,
    fallback: Arc<dyn SocketFactory>,
    subscriptions: DashMap<String, SubscriptionEntry>,
    next_subscription: AtomicU64,
    /// Frames for the live session; `None` while disconnected.
    outbound: ArcSwapOption<mpsc::UnboundedSender<Frame>>,
    session: Mutex<Option<Session>>,
    state: watch::Sender<ProtocolState>,
    connected: watch::Sender<bool>,
    alert: watch::Sender<Option<ConnectivityAlert>>,
    events: broadcast::Sender<LifecycleEvent>,
}

impl std::fmt::Debug for PushInner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PushInner")
            .field("url", &self.config.url.as_str())
            .field("subscriptions", &self.subscriptions.len())
            .finish_non_exhaustive()
    }
}

impl PushClient {
    pub fn new(
        config: PushConfig,
        primary: Arc<dyn SocketFactory>,
        fallback: Arc<dyn SocketFactory>,
    ) -> Self {
        let (state, _) = watch::channel(ProtocolState::Primary);
        let (connected, _) = watch::channel(false);
        let (alert, _) = watch::channel(None);
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        Self {
            inner: Arc::new(PushInner {
                config,
                primary,
                fallback,
                subscriptions: DashMap::new(),
                next_subscription: AtomicU64::new(0),
                outbound: ArcSwapOption::empty(),
                session: Mutex::new(None),
                state,
                connected,
                alert,
                events,
            }),
        }
    }

    /// Open the push connection on the primary protocol.
    ///
    /// No-op while a connection is open or being retried. After the channel
    /// failed, activating again starts over on the primary protocol.
    pub fn activate(&self) {
        let mut session = self.inner.session.lock().expect("push session lock poisoned");
        if session.as_ref().is_some_and(|s| !s.handle.is_finished()) {
            debug!("push channel already active");
            return;
        }

        self.inner.state.send_replace(ProtocolState::Primary);
        self.inner.alert.send_replace(None);

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(drive(Arc::clone(&self.inner), cancel.clone()));
        *session = Some(Session { cancel, handle });
        info!(url = %self.inner.config.url, "push channel activated");
    }

    /// Close the connection and drop every subscription. Idempotent.
    pub fn deactivate(&self) {
        self.inner.teardown();
    }

    pub fn is_active(&self) -> bool {
        self.inner
            .session
            .lock()
            .expect("push session lock poisoned")
            .as_ref()
            .is_some_and(|s| !s.handle.is_finished())
    }

    pub fn is_connected(&self) -> bool {
        *self.inner.connected.borrow()
    }

    pub fn protocol(&self) -> ProtocolState {
        *self.inner.state.borrow()
    }

    pub fn state(&self) -> watch::Receiver<ProtocolState> {
        self.inner.state.subscribe()
    }

    pub fn alert(&self) -> watch::Receiver<Option<ConnectivityAlert>> {
        self.inner.alert.subscribe()
    }

    pub fn events(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.inner.events.subscribe()
    }

    /// Subscribe `handler` to `channel`.
    ///
    /// At most one subscription exists per channel: subscribing again keeps
    /// the existing handler and returns a token for it. Subscriptions made
    /// while disconnected are sent on the next connect.
    pub fn subscribe<F>(&self, channel: &str, handler: F) -> Subscription
    where
        F: Fn(Value) + Send + Sync + 'static,
    {
        let id = match self.inner.subscriptions.entry(channel.to_owned()) {
            Entry::Occupied(existing) => {
                debug!(channel, "channel already subscribed");
                return Subscription {
                    channel: channel.to_owned(),
                    id: existing.get().id.clone(),
                    inner: Arc::downgrade(&self.inner),
                };
            }
            Entry::Vacant(slot) => {
                let n = self.inner.next_subscription.fetch_add(1, Ordering::Relaxed);
                let id = format!("sub-{n}");
                slot.insert(SubscriptionEntry {
                    id: id.clone(),
                    handler: Arc::new(handler),
                });
                id
            }
        };

        debug!(channel, id = %id, "subscribed");
        self.inner.queue(Frame::subscribe(&id, channel));
        Subscription {
            channel: channel.to_owned(),
            id,
            inner: Arc::downgrade(&self.inner),
        }
    }

    pub fn is_subscribed(&self, channel: &str) -> bool {
        self.inner.subscriptions.contains_key(channel)
    }

    /// Fire-and-forget SEND. Dropped silently while disconnected.
    pub fn publish(&self, channel: &str, payload: &Value) {
        if !self.inner.queue(Frame::send(channel, payload.to_string())) {
            debug!(channel, "push channel not connected, publish dropped");
        }
    }
}

impl PushInner {
    fn emit(&self, event: LifecycleEvent) {
        // No receivers is fine
        let _ = self.events.send(event);
    }

    /// Hand a frame to the live session. Returns `false` when disconnected.
    fn queue(&self, frame: Frame) -> bool {
        match &*self.outbound.load() {
            Some(tx) => tx.send(frame).is_ok(),
            None => false,
        }
    }

    fn teardown(&self) {
        let session = self.session.lock().expect("push session lock poisoned").take();
        if let Some(session) = session {
            session.cancel.cancel();
            info!("push channel deactivated");
        }
        self.subscriptions.clear();
        self.outbound.store(None);
        self.connected.send_replace(false);
    }

    fn fail(&self) {
        error!(
            timeout_secs = self.config.fallback_timeout.as_secs(),
            "push channel could not reconnect, giving up"
        );
        self.state.send_replace(ProtocolState::Failed);
        self.alert.send_replace(Some(ConnectivityAlert::connection_lost()));
        self.emit(LifecycleEvent::Failed);
        self.teardown();
    }

    /// Report a failed connect or session. Returns `true` if it engaged the
    /// fallback protocol.
    fn record_failure(&self, machine: &mut FallbackMachine, error: &Error) -> bool {
        if !error.is_low_level() {
            warn!(error = %error, "push protocol error");
            self.emit(LifecycleEvent::ProtocolError(error.to_string()));
            return false;
        }

        warn!(error = %error, errors = machine.consecutive_errors() + 1, "push socket error");
        self.emit(LifecycleEvent::SocketError(error.to_string()));
        if machine.on_low_level_error(Instant::now()) {
            warn!(
                timeout_secs = self.config.fallback_timeout.as_secs(),
                "switching push channel to long-poll fallback"
            );
            self.state.send_replace(ProtocolState::Fallback);
            self.emit(LifecycleEvent::FallbackEngaged);
            return true;
        }
        false
    }

    /// Open a socket and complete the STOMP handshake.
    async fn handshake(&self, factory: &dyn SocketFactory) -> Result<SocketConnection, Error> {
        let kind = factory.kind();
        let mut connection = factory.connect(&self.config.url).await?;

        let host = self.config.url.host_str().unwrap_or("localhost");
        connection
            .outgoing
            .send(Frame::connect(host, self.config.heart_beat).encode())
            .map_err(|_| closed_during_handshake(kind))?;

        let incoming = &mut connection.incoming;
        let reply = async {
            loop {
                let text = match incoming.recv().await {
                    Some(Ok(text)) => text,
                    Some(Err(e)) => return Err(e),
                    None => return Err(closed_during_handshake(kind)),
                };
                let frame = match Frame::decode(&text) {
                    Ok(frame) => frame,
                    Err(e) => return Err(e),
                };
                match frame {
                    None => {}
                    Some(frame) if frame.command == Command::Connected => return Ok(()),
                    Some(frame) if frame.command == Command::Error => {
                        return Err(Error::Protocol(error_text(&frame)));
                    }
                    Some(frame) => {
                        return Err(Error::Protocol(format!(
                            "expected CONNECTED, got {}",
                            frame.command
                        )));
                    }
                }
            }
        };

        match tokio::time::timeout(self.config.connect_timeout, reply).await {
            Ok(Ok(())) => Ok(connection),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(Error::Timeout {
                timeout_secs: self.config.connect_timeout.as_secs(),
            }),
        }
    }

    /// Pump frames for one connected session until it ends.
    async fn run_session(
        &self,
        mut connection: SocketConnection,
        cancel: &CancellationToken,
    ) -> SessionEnd {
        let (tx, mut rx) = mpsc::unbounded_channel::<Frame>();
        self.outbound.store(Some(Arc::new(tx)));
        self.connected.send_replace(true);

        for entry in self.subscriptions.iter() {
            self.queue(Frame::subscribe(&entry.id, entry.key()));
        }

        // Subscription ids sent on this socket; filters duplicate SUBSCRIBEs
        // racing with the resubscribe above.
        let mut active: HashSet<String> = HashSet::new();

        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    let _ = connection.outgoing.send(Frame::disconnect().encode());
                    return SessionEnd::Cancelled;
                }
                frame = rx.recv() => {
                    let Some(frame) = frame else {
                        return SessionEnd::Cancelled;
                    };
                    let id = frame.get("id").map(str::to_owned);
                    let duplicate = match (frame.command, id) {
                        (Command::Subscribe, Some(id)) => !active.insert(id),
                        (Command::Unsubscribe, Some(id)) => !active.remove(&id),
                        _ => false,
                    };
                    if duplicate {
                        continue;
                    }
                    trace!(command = %frame.command, "sending frame");
                    // A dead writer reports through `incoming`.
                    let _ = connection.outgoing.send(frame.encode());
                }
                message = connection.incoming.recv() => match message {
                    Some(Ok(text)) => self.dispatch(&text),
                    Some(Err(e)) => return SessionEnd::Failed(e),
                    None => return SessionEnd::Closed,
                },
            }
        }
    }

    fn dispatch(&self, text: &str) {
        let frame = match Frame::decode(text) {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                trace!("heart-beat");
                return;
            }
            Err(e) => {
                warn!(error = %e, "undecodable frame");
                self.emit(LifecycleEvent::ProtocolError(e.to_string()));
                return;
            }
        };

        match frame.command {
            Command::Message => self.deliver(&frame),
            Command::Error => {
                let message = error_text(&frame);
                warn!(message = %message, "broker sent ERROR frame");
                self.emit(LifecycleEvent::ProtocolError(message));
            }
            Command::Receipt | Command::Connected => trace!(command = %frame.command, "ignored"),
            other => debug!(command = %other, "unexpected frame from broker"),
        }
    }

    fn deliver(&self, frame: &Frame) {
        let Some(destination) = frame.get("destination") else {
            self.emit(LifecycleEvent::ProtocolError(
                "MESSAGE frame without destination".into(),
            ));
            return;
        };

        // Held for the duration of the handler call so that removal waits.
        let Some(entry) = self.subscriptions.get(destination) else {
            debug!(channel = destination, "message for unsubscribed channel dropped");
            return;
        };
        if frame.get("subscription").is_some_and(|id| id != entry.id) {
            debug!(channel = destination, "message for stale subscription dropped");
            return;
        }

        match serde_json::from_str::<Value>(&frame.body) {
            Ok(payload) => (entry.handler)(payload),
            Err(e) => {
                warn!(channel = destination, error = %e, "push payload is not JSON");
                self.emit(LifecycleEvent::ProtocolError(format!(
                    "invalid payload on {destination}: {e}"
                )));
            }
        }
    }
}

enum SessionEnd {
    Cancelled,
    Closed,
    Failed(Error),
}

fn closed_during_handshake(kind: SocketKind) -> Error {
    let message = "socket closed during STOMP handshake".to_owned();
    match kind {
        SocketKind::LongPoll => Error::LongPoll(message),
        SocketKind::WebSocket | SocketKind::Custom => Error::WebSocketConnect(message),
    }
}

fn error_text(frame: &Frame) -> String {
    frame
        .get("message")
        .map_or_else(|| frame.body.clone(), str::to_owned)
}

async fn until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

// ── Background driver ────────────────────────────────────────────────

/// Connect → run session → on failure, back off (or fall back) → reconnect.
async fn drive(inner: Arc<PushInner>, cancel: CancellationToken) {
    let mut machine = FallbackMachine::new(
        inner.config.fallback_error_threshold,
        inner.config.fallback_timeout,
    );
    let mut attempt: u32 = 0;

    loop {
        let factory = match machine.state() {
            ProtocolState::Primary => Arc::clone(&inner.primary),
            ProtocolState::Fallback => Arc::clone(&inner.fallback),
            ProtocolState::Failed => break,
        };

        let connected = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            () = until(machine.deadline()) => {
                machine.expire(Instant::now());
                inner.fail();
                break;
            }
            result = inner.handshake(factory.as_ref()) => result,
        };

        let engaged = match connected {
            Ok(connection) => {
                let protocol = factory.kind();
                machine.on_connected();
                attempt = 0;
                info!(%protocol, "push channel connected");
                inner.emit(LifecycleEvent::Connected { protocol });

                let end = inner.run_session(connection, &cancel).await;
                if matches!(end, SessionEnd::Cancelled) {
                    // Teardown already cleared the session state.
                    inner.emit(LifecycleEvent::Disconnected);
                    break;
                }
                inner.outbound.store(None);
                inner.connected.send_replace(false);

                let engaged = match end {
                    SessionEnd::Cancelled => break,
                    SessionEnd::Closed => {
                        info!("push socket closed by peer");
                        inner.emit(LifecycleEvent::SocketClosed);
                        false
                    }
                    SessionEnd::Failed(e) => inner.record_failure(&mut machine, &e),
                };
                inner.emit(LifecycleEvent::Disconnected);
                engaged
            }
            Err(e) => inner.record_failure(&mut machine, &e),
        };

        // The fallback protocol gets an immediate first attempt.
        let delay = if engaged {
            attempt = 0;
            Duration::ZERO
        } else {
            if machine.state() == ProtocolState::Primary
                && inner
                    .config
                    .reconnect
                    .max_retries
                    .is_some_and(|max| attempt >= max)
            {
                machine.fail();
                inner.fail();
                break;
            }
            let delay = calculate_backoff(attempt, &inner.config.reconnect);
            attempt = attempt.saturating_add(1);
            delay
        };
        debug!(delay_ms = delay.as_millis(), attempt, "waiting before reconnect");

        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            () = until(machine.deadline()) => {
                machine.expire(Instant::now());
                inner.fail();
                break;
            }
            () = tokio::time::sleep(delay) => {}
        }
    }

    debug!("push driver exiting");
}

// ── Backoff calculation ──────────────────────────────────────────────

/// Exponential backoff with jitter.
///
/// `delay = min(initial * 2^attempt, max) * (1 + 0.25 * sin(attempt * 7.3))`
pub fn calculate_backoff(attempt: u32, config: &ReconnectConfig) -> Duration {
    let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
    let base = config.initial_delay.as_secs_f64() * 2.0_f64.powi(exponent);
    let capped = base.min(config.max_delay.as_secs_f64());

    // Deterministic "jitter" seeded from the attempt number.
    let jitter_factor = 1.0 + 0.25 * (f64::from(attempt) * 7.3).sin();
    let with_jitter = (capped * jitter_factor).max(0.0);

    Duration::from_secs_f64(with_jitter)
}

// ── Tests ────────────────────────────────────────────────────────────
