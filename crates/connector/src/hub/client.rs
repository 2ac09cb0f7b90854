//! Hub subscription client
//!
//! One `listen` call is one session: connect, authenticate when credentials
//! are configured, subscribe to every channel plus the heartbeat, then serve
//! under the heartbeat watchdog until stopped or failed.
//!
//! The hub answers one invocation at a time, so `invoke` is serialized per
//! session and a single response slot is armed before each call is sent.

use serde_json::{json, Value};
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, trace, warn};

use crate::auth::ApiCredentials;
use crate::decode::decode_payload;
use crate::dispatch::{spawn_category_workers, CategoryQueues, HandlerRegistry};
use crate::error::ConnectorError;
use crate::hub::protocol::{parse_frame, HubInvocation, HubPush, InboundFrame, InvokeStatus};
use crate::hub::transport::{HubTransport, TransportEvent};
use crate::metrics::HubMetrics;
use crate::watchdog::{Watchdog, WatchdogExit};

/// Reserved channel carrying liveness pushes
pub const HEARTBEAT_CHANNEL: &str = "heartbeat";

const AUTHENTICATION_EXPIRING: &str = "authenticationExpiring";

pub const DEFAULT_HUB: &str = "c3";
pub const DEFAULT_HEARTBEAT_TIMEOUT: Duration = Duration::from_secs(6);
pub const DEFAULT_INVOKE_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    Disconnected = 0,
    Connecting = 1,
    ConnectedUnauthenticated = 2,
    Authenticated = 3,
    Subscribing = 4,
    Active = 5,
    Stopping = 6,
    Stopped = 7,
}

impl ConnectionState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => ConnectionState::Connecting,
            2 => ConnectionState::ConnectedUnauthenticated,
            3 => ConnectionState::Authenticated,
            4 => ConnectionState::Subscribing,
            5 => ConnectionState::Active,
            6 => ConnectionState::Stopping,
            7 => ConnectionState::Stopped,
            _ => ConnectionState::Disconnected,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Feed name used in logs and metric labels
    pub feed: String,
    pub hub: String,
    pub heartbeat_timeout: Duration,
    /// None waits forever for a hub response
    pub invoke_timeout: Option<Duration>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            feed: "bittrex".to_string(),
            hub: DEFAULT_HUB.to_string(),
            heartbeat_timeout: DEFAULT_HEARTBEAT_TIMEOUT,
            invoke_timeout: Some(DEFAULT_INVOKE_TIMEOUT),
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

type Reply = Result<Value, String>;

/// State of one connected session, shared with its dispatcher and any
/// re-authentication task
struct Session {
    hub: String,
    credentials: Option<ApiCredentials>,
    invoke_timeout: Option<Duration>,
    watchdog: Watchdog,
    outbound: Mutex<Option<mpsc::Sender<String>>>,
    invoke_lock: tokio::sync::Mutex<()>,
    pending: Mutex<Option<(u64, oneshot::Sender<Reply>)>>,
    next_id: AtomicU64,
    reauth_armed: AtomicBool,
    failure: Mutex<Option<ConnectorError>>,
}

impl Session {
    async fn invoke(&self, method: &str, args: Vec<Value>) -> Result<Value, ConnectorError> {
        let _guard = self.invoke_lock.lock().await;

        let outbound = lock(&self.outbound).clone().ok_or(ConnectorError::Stopped)?;
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let frame = serde_json::to_string(&HubInvocation {
            hub: &self.hub,
            method,
            args: &args,
            id,
        })
        .map_err(|e| ConnectorError::Protocol(e.to_string()))?;

        let (tx, rx) = oneshot::channel();
        *lock(&self.pending) = Some((id, tx));
        debug!(method, id, "Invoking hub method");
        let reply = match outbound.send(frame).await {
            Ok(()) => self.await_reply(method, rx).await,
            Err(_) => Err(ConnectorError::Disconnected("hub connection closed".to_string())),
        };
        lock(&self.pending).take();

        reply?.map_err(|message| ConnectorError::InvokeFailed {
            method: method.to_string(),
            message,
        })
    }

    async fn await_reply(
        &self,
        method: &str,
        rx: oneshot::Receiver<Reply>,
    ) -> Result<Reply, ConnectorError> {
        let reply = async {
            rx.await.map_err(|_| {
                ConnectorError::Disconnected("session ended before hub response".to_string())
            })
        };
        let bounded = async {
            match self.invoke_timeout {
                Some(limit) => match tokio::time::timeout(limit, reply).await {
                    Ok(result) => result,
                    Err(_) => Err(ConnectorError::InvokeTimeout {
                        method: method.to_string(),
                        timeout: limit,
                    }),
                },
                None => reply.await,
            }
        };
        tokio::select! {
            result = bounded => result,
            _ = self.watchdog.stopped() => Err(ConnectorError::Stopped),
        }
    }

    /// Complete the pending invoke. Replies for an older id are dropped.
    fn resolve(&self, id: Option<u64>, reply: Reply) {
        let mut pending = lock(&self.pending);
        match pending.take() {
            Some((expected, tx)) if id.map_or(true, |id| id == expected) => {
                let _ = tx.send(reply);
            }
            Some(slot) => {
                warn!(id = ?id, expected = slot.0, "Dropping stale hub response");
                *pending = Some(slot);
            }
            None => debug!(id = ?id, "Hub response with no pending invoke"),
        }
    }

    /// Returns whether the hub accepted the credentials. Rejection is logged
    /// and not an error.
    async fn authenticate(&self) -> Result<bool, ConnectorError> {
        let Some(credentials) = &self.credentials else {
            return Ok(false);
        };
        let challenge = credentials
            .sign_challenge()
            .map_err(|e| ConnectorError::AuthFailed(e.to_string()))?;
        let reply = self
            .invoke(
                "Authenticate",
                vec![
                    json!(credentials.api_key),
                    json!(challenge.timestamp),
                    json!(challenge.nonce),
                    json!(challenge.signature),
                ],
            )
            .await?;
        let status: InvokeStatus = serde_json::from_value(reply)
            .map_err(|e| ConnectorError::Protocol(format!("Authenticate reply: {}", e)))?;

        if status.success {
            info!("Authenticated");
            self.reauth_armed.store(true, Ordering::SeqCst);
        } else {
            warn!(error_code = status.error_code(), "Authentication failed");
        }
        Ok(status.success)
    }

    async fn subscribe(&self, channels: &[String]) -> Result<(), ConnectorError> {
        let reply = self.invoke("Subscribe", vec![json!(channels)]).await?;
        let statuses: Vec<InvokeStatus> = serde_json::from_value(reply)
            .map_err(|e| ConnectorError::Protocol(format!("Subscribe reply: {}", e)))?;
        if statuses.len() != channels.len() {
            error!(
                expected = channels.len(),
                received = statuses.len(),
                "Subscribe reply does not cover every channel"
            );
            return Err(ConnectorError::SubscriptionFailed(format!(
                "expected {} results, got {}",
                channels.len(),
                statuses.len()
            )));
        }

        let mut failed = Vec::new();
        for (channel, status) in channels.iter().zip(&statuses) {
            if status.success {
                info!(channel = %channel, "Subscription succeeded");
            } else {
                error!(channel = %channel, error_code = status.error_code(), "Subscription failed");
                failed.push(format!("{}: {}", channel, status.error_code()));
            }
        }
        if failed.is_empty() {
            Ok(())
        } else {
            Err(ConnectorError::SubscriptionFailed(failed.join(", ")))
        }
    }

    fn spawn_reauthentication(self: &Arc<Self>) {
        if !self.reauth_armed.load(Ordering::SeqCst) {
            debug!("Ignoring authenticationExpiring on an unauthenticated session");
            return;
        }
        let session = Arc::clone(self);
        tokio::spawn(async move {
            info!("Authentication expiring, re-authenticating");
            match session.authenticate().await {
                Ok(_) => {}
                Err(ConnectorError::Stopped) => debug!("Re-authentication abandoned, session stopped"),
                Err(e) => warn!(error = %e, "Re-authentication failed"),
            }
        });
    }

    /// Record the first fatal error and stop the session
    fn fail(&self, err: ConnectorError) {
        lock(&self.failure).get_or_insert(err);
        self.watchdog.stop();
    }

    fn take_failure(&self) -> Option<ConnectorError> {
        lock(&self.failure).take()
    }

    /// Outcome for a session that ended because it was stopped
    fn stopped_outcome(&self) -> Result<(), ConnectorError> {
        match self.take_failure() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn close(&self) {
        self.watchdog.stop();
        lock(&self.outbound).take();
        lock(&self.pending).take();
    }
}

/// Routes inbound frames for one session. Decoded events are queued to the
/// category workers; the read path never waits on a handler.
struct Dispatcher {
    session: Arc<Session>,
    registry: Arc<HandlerRegistry>,
    queues: CategoryQueues,
    metrics: HubMetrics,
}

impl Dispatcher {
    async fn run(self, mut inbound: mpsc::Receiver<TransportEvent>) {
        while let Some(event) = inbound.recv().await {
            match event {
                TransportEvent::Frame(text) => self.route(&text),
                TransportEvent::Error(e) => {
                    error!(error = %e, "Hub transport error");
                    self.session.fail(ConnectorError::Transport(e));
                    return;
                }
                TransportEvent::Closed => {
                    warn!("Hub connection closed");
                    self.session
                        .fail(ConnectorError::Transport("connection closed".to_string()));
                    return;
                }
            }
        }
        self.session
            .fail(ConnectorError::Transport("inbound channel closed".to_string()));
    }

    fn route(&self, text: &str) {
        match parse_frame(text) {
            Ok(InboundFrame::KeepAlive) | Ok(InboundFrame::Other) => {}
            Ok(InboundFrame::Response { id, result }) => self.session.resolve(id, Ok(result)),
            Ok(InboundFrame::HubError { id, message }) => {
                warn!(id = ?id, error = %message, "Hub returned an error");
                self.session.resolve(id, Err(message));
            }
            Ok(InboundFrame::Pushes(pushes)) => {
                for push in pushes {
                    self.route_push(push);
                }
            }
            Err(e) => warn!(error = %e, "Malformed hub frame"),
        }
    }

    fn route_push(&self, push: HubPush) {
        let method = push.method.as_str();
        if method.eq_ignore_ascii_case(HEARTBEAT_CHANNEL) {
            trace!("Heartbeat");
            self.session.watchdog.reset();
            self.metrics.set_last_heartbeat();
            return;
        }
        if method.eq_ignore_ascii_case(AUTHENTICATION_EXPIRING) {
            self.session.spawn_reauthentication();
            return;
        }
        let Some(entry) = self.registry.get(method) else {
            debug!(method, "No handler for hub push");
            return;
        };

        let category = entry.category.name();
        self.metrics.inc_message(category);
        let decoded = decode_payload(&push.args)
            .and_then(|payload| payload.map(|p| entry.category.decode(p)).transpose());
        let event = match decoded {
            Ok(Some(event)) => event,
            Ok(None) => {
                trace!(category, "Empty hub push");
                return;
            }
            Err(e) => {
                warn!(category, error = %e, "Failed to decode hub push");
                self.metrics.inc_decode_error(category);
                return;
            }
        };
        let queued = self
            .queues
            .get(&category.to_ascii_lowercase())
            .map(|queue| queue.send(Arc::new(event)).is_ok());
        if queued != Some(true) {
            warn!(category, "Category worker unavailable, event dropped");
        }
    }
}

async fn until_stopped<T, F>(watchdog: &Watchdog, fut: F) -> Result<T, ConnectorError>
where
    F: Future<Output = Result<T, ConnectorError>>,
{
    tokio::select! {
        result = fut => result,
        _ = watchdog.stopped() => Err(ConnectorError::Stopped),
    }
}

/// Authenticated, multi-channel hub subscription. One `listen` at a time.
pub struct SubscriptionClient<T: HubTransport> {
    transport: T,
    credentials: Option<ApiCredentials>,
    config: ClientConfig,
    state: AtomicU8,
    connected: Arc<AtomicBool>,
    watchdog: Mutex<Option<Watchdog>>,
    metrics: HubMetrics,
}

impl<T: HubTransport> SubscriptionClient<T> {
    pub fn new(transport: T, config: ClientConfig) -> Self {
        let metrics = HubMetrics::new(config.feed.clone());
        Self {
            transport,
            credentials: None,
            config,
            state: AtomicU8::new(ConnectionState::Disconnected as u8),
            connected: Arc::new(AtomicBool::new(false)),
            watchdog: Mutex::new(None),
            metrics,
        }
    }

    pub fn with_credentials(mut self, credentials: ApiCredentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// True while the session is subscribed and serving
    pub fn connected_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.connected)
    }

    /// Stop the running session, if any. `listen` then returns.
    pub fn stop(&self) {
        if let Some(watchdog) = lock(&self.watchdog).as_ref() {
            info!(feed = %self.config.feed, "Stopping hub session");
            watchdog.stop();
        }
    }

    /// Run one session over `channels` and return when it ends: `Ok` after
    /// `stop()`, otherwise the error that ended it.
    pub async fn listen(
        &self,
        channels: Vec<String>,
        registry: Arc<HandlerRegistry>,
    ) -> Result<(), ConnectorError> {
        if let Some(reserved) = channels
            .iter()
            .find(|c| c.eq_ignore_ascii_case(HEARTBEAT_CHANNEL))
        {
            error!(channel = %reserved, "Channel list must not contain the heartbeat channel");
            return Err(ConnectorError::ReservedChannel(reserved.clone()));
        }

        // installed before the first await so stop() always reaches it
        let watchdog = Watchdog::new(self.config.heartbeat_timeout);
        *lock(&self.watchdog) = Some(watchdog.clone());

        let result = self.run_session(channels, registry, watchdog).await;

        lock(&self.watchdog).take();
        self.set_state(ConnectionState::Stopped);
        match &result {
            Ok(()) => {
                info!(feed = %self.config.feed, "Hub session stopped");
                self.metrics.inc_session_end("stopped");
            }
            Err(e) => {
                error!(feed = %self.config.feed, error = %e, "Hub session ended");
                self.metrics.inc_session_end(e.cause());
            }
        }
        result
    }

    async fn run_session(
        &self,
        channels: Vec<String>,
        registry: Arc<HandlerRegistry>,
        watchdog: Watchdog,
    ) -> Result<(), ConnectorError> {
        self.set_state(ConnectionState::Connecting);
        info!(feed = %self.config.feed, hub = %self.config.hub, "Connecting to hub");
        let connection =
            match until_stopped(&watchdog, self.transport.connect(&self.config.hub)).await {
                Ok(connection) => connection,
                Err(ConnectorError::Stopped) => return Ok(()),
                Err(e) => return Err(e),
            };

        let session = Arc::new(Session {
            hub: self.config.hub.clone(),
            credentials: self.credentials.clone(),
            invoke_timeout: self.config.invoke_timeout,
            watchdog,
            outbound: Mutex::new(Some(connection.outbound)),
            invoke_lock: tokio::sync::Mutex::new(()),
            pending: Mutex::new(None),
            next_id: AtomicU64::new(0),
            reauth_armed: AtomicBool::new(false),
            failure: Mutex::new(None),
        });
        let dispatcher = tokio::spawn(
            Dispatcher {
                session: Arc::clone(&session),
                queues: spawn_category_workers(&registry, &self.metrics),
                registry,
                metrics: self.metrics.clone(),
            }
            .run(connection.inbound),
        );
        self.set_state(ConnectionState::ConnectedUnauthenticated);

        let result = self.serve(&session, channels).await;

        self.set_state(ConnectionState::Stopping);
        dispatcher.abort();
        session.close();
        result
    }

    async fn serve(
        &self,
        session: &Arc<Session>,
        mut channels: Vec<String>,
    ) -> Result<(), ConnectorError> {
        if session.credentials.is_some() {
            match session.authenticate().await {
                Ok(true) => self.set_state(ConnectionState::Authenticated),
                Ok(false) => {}
                Err(ConnectorError::Stopped) => return session.stopped_outcome(),
                Err(e) => warn!(error = %e, "Authentication request failed, continuing unauthenticated"),
            }
        }

        channels.push(HEARTBEAT_CHANNEL.to_string());
        self.set_state(ConnectionState::Subscribing);
        match session.subscribe(&channels).await {
            Ok(()) => {}
            Err(ConnectorError::Stopped) => return session.stopped_outcome(),
            Err(e) => return Err(e),
        }

        self.set_state(ConnectionState::Active);
        info!(feed = %self.config.feed, channels = channels.len(), "Hub session active");

        match session.watchdog.run().await {
            WatchdogExit::TimedOut { silent_for } => {
                Err(ConnectorError::HeartbeatTimeout(silent_for))
            }
            WatchdogExit::Stopped => session.stopped_outcome(),
        }
    }

    fn set_state(&self, state: ConnectionState) {
        self.state.store(state as u8, Ordering::SeqCst);
        let active = state == ConnectionState::Active;
        if self.connected.swap(active, Ordering::SeqCst) != active {
            self.metrics.set_connected(active);
        }
    }
}
