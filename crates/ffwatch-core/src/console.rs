// ── Console facade ──
//
// Wires the REST client, push channel, poller, reconciler and notifier
// into one connection to a console backend. Every partial update, from
// whichever source, goes through a single channel into one merge task:
// that task is the only writer of canonical state.

use std::sync::Arc;

use ffwatch_api::{
    ApiClient, BasicAuth, ConnectivityAlert, HttpConfig, LifecycleEvent, LongPollFactory,
    ProtocolState, PushClient, PushConfig, Subscription, WebSocketFactory,
};
use serde_json::{Value, json};
use strum::{Display, EnumString};
use tokio::sync::{Mutex, broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::ConsoleConfig;
use crate::error::CoreError;
use crate::kv::KeyValueStore;
use crate::model::{Adapter, ClusterMember, Configuration, ConfigurationMessageLog, Summary};
use crate::notifier::Notifier;
use crate::poller::{Poller, PollerEvent};
use crate::store::{Delta, MergeReport, Reconciler};
use crate::stream::EntityStream;

/// Key under which the selected configuration is persisted.
pub const SELECTED_CONFIGURATION_KEY: &str = "ffwatch.selectedConfiguration";

const ADAPTERS_URI: &str = "/adapters?expanded=all";
const CONFIGURATIONS_URI: &str = "/server/configurations";
const WARNINGS_URI: &str = "/server/warnings";
const CLUSTER_URI: &str = "/cluster/members";

const ADAPTERS_CHANNEL: &str = "/event/adapters";
const WARNINGS_CHANNEL: &str = "/event/server-warnings";
const CLUSTER_CHANNEL: &str = "/event/cluster";

const DIAGNOSTICS_CHANNEL_SIZE: usize = 16;

// ── Public types ─────────────────────────────────────────────────────

/// Input to the merge task.
#[derive(Debug, Clone)]
pub enum Update {
    Adapters(Value),
    AdaptersFull(Value),
    MessageLog(Value),
    Configurations(Value),
    ClusterMembers(Value),
    ClusterMembersFull(Value),
}

/// Connection state observable by consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    /// Push gave up (or is disabled); pollers feed the state instead.
    Degraded,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum AdapterAction {
    Start,
    Stop,
    Reload,
}

// ── Console ──────────────────────────────────────────────────────────

/// Live connection to one console backend.
///
/// Cheaply cloneable via `Arc<ConsoleInner>`. Does not connect on
/// construction: call [`connect()`](Self::connect).
#[derive(Clone)]
pub struct Console {
    inner: Arc<ConsoleInner>,
}

struct ConsoleInner {
    config: ConsoleConfig,
    api: ApiClient,
    push: PushClient,
    poller: Poller,
    reconciler: Reconciler,
    notifier: Notifier,
    store: Arc<dyn KeyValueStore>,
    updates: mpsc::UnboundedSender<Update>,
    updates_rx: Mutex<Option<mpsc::UnboundedReceiver<Update>>>,
    connection_state: watch::Sender<ConnectionState>,
    diagnostics: broadcast::Sender<Arc<CoreError>>,
    cancel: CancellationToken,
    subscriptions: Mutex<Vec<Subscription>>,
    task_handles: Mutex<Vec<JoinHandle<()>>>,
}

impl Console {
    pub fn new(config: ConsoleConfig, store: Arc<dyn KeyValueStore>) -> Result<Self, CoreError> {
        let http = HttpConfig {
            tls: (&config.tls).into(),
            timeout: config.timeout,
            cookie_jar: None,
        }
        .with_cookie_jar()
        .build_client()?;

        let auth = config.credentials.as_ref().map(|c| BasicAuth {
            username: c.username.clone(),
            password: c.password.clone(),
        });

        let mut api = ApiClient::from_reqwest(config.api_url()?.as_str(), http.clone())?;
        let mut websocket = WebSocketFactory::new();
        let mut long_poll = LongPollFactory::new(http.clone());
        if let Some(auth) = auth {
            if let Some(value) = auth.header_value(&http) {
                websocket = websocket.with_header("Authorization", value);
            }
            api = api.with_basic_auth(auth.clone());
            long_poll = long_poll.with_basic_auth(auth);
        }

        let push = PushClient::new(
            PushConfig {
                fallback_timeout: config.fallback_timeout,
                fallback_error_threshold: config.fallback_error_threshold,
                reconnect: config.reconnect.clone(),
                ..PushConfig::new(config.push_url()?)
            },
            Arc::new(websocket),
            Arc::new(long_poll),
        );
        let poller = Poller::new(Arc::new(api.clone()), config.poll_interval);
        let reconciler = Reconciler::new(config.message_cap, config.summary);
        let (updates, updates_rx) = mpsc::unbounded_channel();
        let (connection_state, _) = watch::channel(ConnectionState::Disconnected);
        let (diagnostics, _) = broadcast::channel(DIAGNOSTICS_CHANNEL_SIZE);

        Ok(Self {
            inner: Arc::new(ConsoleInner {
                config,
                api,
                push,
                poller,
                reconciler,
                notifier: Notifier::default(),
                store,
                updates,
                updates_rx: Mutex::new(Some(updates_rx)),
                connection_state,
                diagnostics,
                cancel: CancellationToken::new(),
                subscriptions: Mutex::new(Vec::new()),
                task_handles: Mutex::new(Vec::new()),
            }),
        })
    }

    pub fn config(&self) -> &ConsoleConfig {
        &self.inner.config
    }

    // ── Connection lifecycle ─────────────────────────────────────────

    /// Load the initial state and start live updates.
    ///
    /// Performs a full fetch, restores the selected configuration, then
    /// activates the push channel (or the pollers, when push is disabled).
    pub async fn connect(&self) -> Result<(), CoreError> {
        let Some(rx) = self.inner.updates_rx.lock().await.take() else {
            return Err(CoreError::Internal("console already connected".into()));
        };
        self.inner
            .connection_state
            .send_replace(ConnectionState::Connecting);

        if let Err(e) = self.initial_load().await {
            self.inner
                .connection_state
                .send_replace(ConnectionState::Failed);
            return Err(e);
        }

        let reconciler = &self.inner.reconciler;
        match self.inner.store.get(SELECTED_CONFIGURATION_KEY) {
            Some(selected) => reconciler.select_configuration(Some(selected)),
            None => {
                reconciler.request_summary(true);
            }
        }

        let mut handles = self.inner.task_handles.lock().await;
        handles.push(tokio::spawn(merge_task(
            Arc::clone(&self.inner),
            rx,
            self.inner.cancel.clone(),
        )));
        handles.push(tokio::spawn(poller_watch_task(
            Arc::clone(&self.inner),
            self.inner.poller.events(),
            self.inner.cancel.clone(),
        )));

        if self.inner.config.push_enabled {
            self.subscribe_push().await;
            self.inner.push.activate();
            handles.push(tokio::spawn(push_watch_task(
                Arc::clone(&self.inner),
                self.inner.cancel.clone(),
            )));
        } else {
            debug!("push disabled, polling");
            self.inner.start_polling();
        }
        drop(handles);

        self.inner
            .connection_state
            .send_replace(ConnectionState::Connected);
        info!(url = %self.inner.config.url, "connected to console");
        Ok(())
    }

    /// Stop live updates and background tasks.
    pub async fn disconnect(&self) {
        self.inner.cancel.cancel();
        self.inner.subscriptions.lock().await.clear();
        self.inner.push.deactivate();
        self.inner.poller.get_all().remove();

        let mut handles = self.inner.task_handles.lock().await;
        for handle in handles.drain(..) {
            let _ = handle.await;
        }

        self.inner
            .connection_state
            .send_replace(ConnectionState::Disconnected);
        debug!("disconnected");
    }

    /// Fetch everything again and feed it through the merge task.
    pub async fn trigger_reload(&self) -> Result<(), CoreError> {
        for update in self.full_fetch().await? {
            self.inner
                .updates
                .send(update)
                .map_err(|_| CoreError::Disconnected)?;
        }
        Ok(())
    }

    // ── Commands ─────────────────────────────────────────────────────

    /// Restrict summaries to `configuration` (`None` for all) and persist
    /// the choice.
    pub fn select_configuration(&self, configuration: Option<&str>) {
        match configuration {
            Some(name) => self.inner.store.set(SELECTED_CONFIGURATION_KEY, name),
            None => self.inner.store.remove(SELECTED_CONFIGURATION_KEY),
        }
        self.inner
            .reconciler
            .select_configuration(configuration.map(str::to_owned));
    }

    /// Start, stop or reload one adapter. The resulting state arrives as
    /// a regular update.
    pub async fn adapter_action(
        &self,
        configuration: &str,
        adapter: &str,
        action: AdapterAction,
    ) -> Result<(), CoreError> {
        let path = format!("/configurations/{configuration}/adapters/{adapter}");
        debug!(path, %action, "adapter action");
        self.inner
            .api
            .put_no_response(&path, &json!({ "action": action.to_string() }))
            .await?;
        Ok(())
    }

    // ── Readers ──────────────────────────────────────────────────────

    pub fn get_adapters(&self) -> Arc<Vec<Arc<Adapter>>> {
        self.inner.reconciler.adapter_snapshot()
    }

    pub fn get_configurations(&self) -> Arc<Vec<Arc<Configuration>>> {
        self.inner.reconciler.configuration_snapshot()
    }

    pub fn get_cluster_members(&self) -> Arc<Vec<Arc<ClusterMember>>> {
        self.inner.reconciler.cluster_member_snapshot()
    }

    pub fn get_message_log(&self, configuration: &str) -> Option<Arc<ConfigurationMessageLog>> {
        self.inner.reconciler.message_log(configuration)
    }

    pub fn adapters(&self) -> EntityStream<Adapter> {
        self.inner.reconciler.adapters()
    }

    pub fn summary(&self) -> Summary {
        self.inner.reconciler.summary()
    }

    pub fn summary_stream(&self) -> watch::Receiver<Summary> {
        self.inner.reconciler.summary_stream()
    }

    pub fn subscribe_deltas(&self) -> broadcast::Receiver<Delta> {
        self.inner.reconciler.subscribe_deltas()
    }

    pub fn notifier(&self) -> &Notifier {
        &self.inner.notifier
    }

    pub fn reconciler(&self) -> &Reconciler {
        &self.inner.reconciler
    }

    pub fn poller(&self) -> &Poller {
        &self.inner.poller
    }

    pub fn connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.connection_state.subscribe()
    }

    /// Non-blocking diagnostics, currently pollers that gave up.
    pub fn diagnostics(&self) -> broadcast::Receiver<Arc<CoreError>> {
        self.inner.diagnostics.subscribe()
    }

    /// Blocking alert raised when the push channel gives up.
    pub fn alert(&self) -> watch::Receiver<Option<ConnectivityAlert>> {
        self.inner.push.alert()
    }

    // ── Private helpers ──────────────────────────────────────────────

    /// Apply a full fetch directly. Runs before the merge task exists.
    async fn initial_load(&self) -> Result<(), CoreError> {
        for update in self.full_fetch().await? {
            self.inner.apply(update);
        }
        Ok(())
    }

    async fn full_fetch(&self) -> Result<Vec<Update>, CoreError> {
        let api = &self.inner.api;
        let (configurations, adapters, warnings, cluster) = tokio::join!(
            api.get::<Value>(CONFIGURATIONS_URI),
            api.get::<Value>(ADAPTERS_URI),
            api.get::<Value>(WARNINGS_URI),
            api.get::<Value>(CLUSTER_URI),
        );

        let mut updates = vec![
            Update::Configurations(configurations?),
            Update::AdaptersFull(adapters?),
            Update::MessageLog(warnings?),
        ];
        match cluster {
            Ok(members) => updates.push(Update::ClusterMembersFull(members)),
            Err(e) if e.is_not_found() => debug!("console has no cluster endpoint"),
            Err(e) => return Err(e.into()),
        }
        Ok(updates)
    }

    async fn subscribe_push(&self) {
        let channels: [(&str, fn(Value) -> Update); 3] = [
            (ADAPTERS_CHANNEL, Update::Adapters),
            (WARNINGS_CHANNEL, Update::MessageLog),
            (CLUSTER_CHANNEL, Update::ClusterMembers),
        ];
        let mut subscriptions = self.inner.subscriptions.lock().await;
        for (channel, wrap) in channels {
            let tx = self.inner.updates.clone();
            subscriptions.push(self.inner.push.subscribe(channel, move |payload| {
                let _ = tx.send(wrap(payload));
            }));
        }
    }
}

impl ConsoleInner {
    /// Merge one update and notify on adapter transitions.
    fn apply(&self, update: Update) {
        let reconciler = &self.reconciler;
        let before = reconciler.adapter_snapshot();
        let (report, adapters_touched): (MergeReport, bool) = match update {
            Update::Adapters(partial) => (reconciler.merge_adapters(&partial), true),
            Update::AdaptersFull(full) => (reconciler.replace_adapters(&full), true),
            Update::MessageLog(partial) => (reconciler.merge_message_log(&partial), false),
            Update::Configurations(full) => (reconciler.merge_configurations(&full), false),
            Update::ClusterMembers(partial) => (reconciler.merge_cluster_members(&partial), false),
            Update::ClusterMembersFull(full) => {
                (reconciler.replace_cluster_members(&full), false)
            }
        };

        if adapters_touched && report.has_changes() {
            let after = reconciler.adapter_snapshot();
            self.notifier.on_reconciled(&before, &after);
        }
    }

    /// Pollers stand in for the push channel.
    fn start_polling(&self) {
        let tx = self.updates.clone();
        self.poller.add(
            ADAPTERS_URI,
            move |full| {
                let _ = tx.send(Update::AdaptersFull(full));
            },
            true,
            None,
        );
        let tx = self.updates.clone();
        self.poller.add(
            WARNINGS_URI,
            move |partial| {
                let _ = tx.send(Update::MessageLog(partial));
            },
            true,
            None,
        );
    }
}

// ── Background tasks ─────────────────────────────────────────────────

/// Sole writer of canonical state.
async fn merge_task(
    inner: Arc<ConsoleInner>,
    mut rx: mpsc::UnboundedReceiver<Update>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            update = rx.recv() => {
                let Some(update) = update else { break };
                inner.apply(update);
            }
        }
    }
}

/// Follow the push channel; fall back to polling once it gives up.
async fn push_watch_task(inner: Arc<ConsoleInner>, cancel: CancellationToken) {
    let mut protocol = inner.push.state();
    let mut events = inner.push.events();

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            changed = protocol.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = *protocol.borrow_and_update();
                if state == ProtocolState::Failed {
                    warn!("push channel failed, polling instead");
                    inner.start_polling();
                    inner.connection_state.send_replace(ConnectionState::Degraded);
                }
            }
            event = events.recv() => match event {
                Ok(LifecycleEvent::Connected { protocol }) => {
                    debug!(%protocol, "push connected");
                    inner.connection_state.send_replace(ConnectionState::Connected);
                }
                Ok(other) => debug!(event = ?other, "push lifecycle"),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(skipped = n, "push events lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
        }
    }
}

/// Report pollers that opened their circuit. Once none is left while
/// polling is the only input, the console has gone blind: that is a
/// failed connection.
async fn poller_watch_task(
    inner: Arc<ConsoleInner>,
    mut events: broadcast::Receiver<PollerEvent>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            event = events.recv() => match event {
                Ok(PollerEvent::CircuitOpen { uri, failures }) => {
                    let error = CoreError::CircuitOpen { uri, failures };
                    warn!(error = %error, "poll source lost");
                    let _ = inner.diagnostics.send(Arc::new(error));
                    if inner.poller.list().is_empty() {
                        inner.connection_state.send_replace(ConnectionState::Failed);
                    }
                }
                Ok(PollerEvent::ModeChanged { uri, mode, interval }) => {
                    debug!(uri, %mode, ?interval, "poll pace changed");
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(skipped = n, "poller events lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
        }
    }
}
