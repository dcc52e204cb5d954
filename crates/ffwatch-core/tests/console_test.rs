#![allow(clippy::unwrap_used)]
// Integration tests for `Console` against a wiremock console backend.

use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;
use serde_json::{Value, json};
use url::Url;
use wiremock::matchers::{body_json, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use ffwatch_core::console::SELECTED_CONFIGURATION_KEY;
use ffwatch_core::{
    AdapterAction, AdapterStatus, ConnectionState, Console, ConsoleConfig, CoreError,
    KeyValueStore, MemoryStore, PollMode,
};

// ── Helpers ─────────────────────────────────────────────────────────

fn adapters(state: &str) -> Value {
    json!({
        "Main/Ingest": {
            "name": "Ingest",
            "configuration": "Main",
            "state": state,
            "receivers": [{ "name": "http", "state": "started" }],
            "pipes": [
                { "name": "send", "sender": "HttpSender", "hasMessageLog": true, "messageLogCount": 4 }
            ],
            "messages": [{ "date": 1_700_000_000_000_i64, "level": "INFO", "message": "Adapter up" }]
        },
        "Other/Export": {
            "name": "Export",
            "configuration": "Other",
            "state": "started",
            "receivers": [{ "name": "jms", "state": "stopped" }]
        }
    })
}

async fn mount_get(server: &MockServer, route: &str, body: Value) {
    Mock::given(method("GET"))
        .and(path(format!("/iaf/api{route}")))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .mount(server)
        .await;
}

async fn mount_backend(server: &MockServer) {
    mount_get(
        server,
        "/server/configurations",
        json!([{ "name": "Main", "version": "1" }, { "name": "Other" }]),
    )
    .await;
    mount_get(
        server,
        "/server/warnings",
        json!({
            "totalErrorStoreCount": 0,
            "Main": { "messages": [{ "date": 1, "level": "WARN", "message": "slow start" }] }
        }),
    )
    .await;
    Mock::given(method("GET"))
        .and(path("/iaf/api/cluster/members"))
        .respond_with(ResponseTemplate::new(404))
        .mount(server)
        .await;
}

fn config(server: &MockServer) -> ConsoleConfig {
    let mut config = ConsoleConfig::new(Url::parse(&server.uri()).unwrap());
    config.push_enabled = false;
    config.poll_interval = Duration::from_secs(60);
    config
}

// ── Connect ─────────────────────────────────────────────────────────

#[tokio::test]
async fn connect_loads_state_and_summary() {
    let server = MockServer::start().await;
    mount_backend(&server).await;
    Mock::given(method("GET"))
        .and(path("/iaf/api/adapters"))
        .and(query_param("expanded", "all"))
        .respond_with(ResponseTemplate::new(200).set_body_json(adapters("started")))
        .mount(&server)
        .await;

    let console = Console::new(config(&server), Arc::new(MemoryStore::new())).unwrap();
    console.connect().await.unwrap();
    assert_eq!(*console.connection_state().borrow(), ConnectionState::Connected);

    let snapshot = console.get_adapters();
    assert_eq!(snapshot.len(), 2);
    let ingest = snapshot.iter().find(|a| a.name == "Ingest").unwrap();
    assert_eq!(ingest.status, AdapterStatus::Started);
    assert_eq!(ingest.senders_message_log_count, 4);
    let export = snapshot.iter().find(|a| a.name == "Export").unwrap();
    assert_eq!(export.status, AdapterStatus::Warning);

    assert_eq!(console.get_configurations().len(), 2);
    assert!(console.get_cluster_members().is_empty());
    assert_eq!(console.get_message_log("Main").unwrap().messages.len(), 1);

    let summary = console.summary();
    assert_eq!(summary.configuration, None);
    assert_eq!(summary.adapters.started, 2);
    assert_eq!(summary.receivers.started, 1);
    assert_eq!(summary.receivers.stopped, 1);
    assert_eq!(summary.messages.info, 1);

    // Push disabled: pollers are the live input.
    let tasks = console.poller().list();
    assert_eq!(tasks.len(), 2);
    assert!(tasks.iter().all(|t| t.mode != PollMode::Stopped));

    console.disconnect().await;
    assert_eq!(*console.connection_state().borrow(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn connect_fails_when_adapters_unavailable() {
    let server = MockServer::start().await;
    mount_backend(&server).await;
    Mock::given(method("GET"))
        .and(path("/iaf/api/adapters"))
        .respond_with(ResponseTemplate::new(401).set_body_string("login required"))
        .mount(&server)
        .await;

    let console = Console::new(config(&server), Arc::new(MemoryStore::new())).unwrap();
    let err = console.connect().await.unwrap_err();
    assert!(matches!(err, CoreError::AuthenticationFailed { .. }));
    assert_eq!(*console.connection_state().borrow(), ConnectionState::Failed);
}

// ── Configuration selection ─────────────────────────────────────────

#[tokio::test]
async fn selected_configuration_is_persisted_and_summarized() {
    let server = MockServer::start().await;
    mount_backend(&server).await;
    mount_get(&server, "/adapters", adapters("started")).await;

    let store = Arc::new(MemoryStore::new());
    let console = Console::new(config(&server), store.clone()).unwrap();
    console.connect().await.unwrap();

    console.select_configuration(Some("Other"));
    assert_eq!(store.get(SELECTED_CONFIGURATION_KEY).as_deref(), Some("Other"));
    let summary = console.summary();
    assert_eq!(summary.configuration.as_deref(), Some("Other"));
    assert_eq!(summary.adapters.total(), 1);
    assert_eq!(summary.receivers.stopped, 1);

    console.select_configuration(None);
    assert_eq!(store.get(SELECTED_CONFIGURATION_KEY), None);
    assert_eq!(console.summary().adapters.total(), 2);
    console.disconnect().await;
}

#[tokio::test]
async fn stored_selection_is_restored_on_connect() {
    let server = MockServer::start().await;
    mount_backend(&server).await;
    mount_get(&server, "/adapters", adapters("started")).await;

    let store = Arc::new(MemoryStore::new());
    store.set(SELECTED_CONFIGURATION_KEY, "Main");
    let console = Console::new(config(&server), store).unwrap();
    console.connect().await.unwrap();

    let summary = console.summary();
    assert_eq!(summary.configuration.as_deref(), Some("Main"));
    assert_eq!(summary.adapters.total(), 1);
    console.disconnect().await;
}

// ── Live updates ────────────────────────────────────────────────────

#[tokio::test]
async fn polled_stop_raises_a_notification() {
    let server = MockServer::start().await;
    mount_backend(&server).await;
    Mock::given(method("GET"))
        .and(path("/iaf/api/adapters"))
        .respond_with(ResponseTemplate::new(200).set_body_json(adapters("started")))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    mount_get(&server, "/adapters", adapters("stopped")).await;

    let console = Console::new(config(&server), Arc::new(MemoryStore::new())).unwrap();
    let mut notifications = console.notifier().subscribe();
    console.connect().await.unwrap();

    // The adapters poller fires right after connect.
    let notification = tokio::time::timeout(Duration::from_secs(5), notifications.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(notification.title, "Adapter is stopped!");
    assert_eq!(console.notifier().unread_count(), 1);

    let ingest = console
        .get_adapters()
        .iter()
        .find(|a| a.name == "Ingest")
        .cloned()
        .unwrap();
    assert_eq!(ingest.status, AdapterStatus::Stopped);
    console.disconnect().await;
}

#[tokio::test]
async fn trigger_reload_goes_through_the_merge_task() {
    let server = MockServer::start().await;
    mount_backend(&server).await;
    mount_get(&server, "/adapters", adapters("started")).await;

    let console = Console::new(config(&server), Arc::new(MemoryStore::new())).unwrap();
    console.connect().await.unwrap();
    // Only the reload should produce deltas from here on.
    console.poller().get_all().remove();

    let mut deltas = console.subscribe_deltas();
    console.trigger_reload().await.unwrap();

    let mut kinds = Vec::new();
    for _ in 0..3 {
        let delta = tokio::time::timeout(Duration::from_secs(5), deltas.recv())
            .await
            .unwrap()
            .unwrap();
        kinds.push(delta.kind.to_string());
    }
    kinds.sort();
    assert_eq!(kinds, vec!["adapters", "configurations", "message_log"]);
    console.disconnect().await;
}

#[tokio::test]
async fn failing_pollers_surface_diagnostics_then_fail() {
    let server = MockServer::start().await;
    mount_get(&server, "/server/configurations", json!([{ "name": "Main" }])).await;
    Mock::given(method("GET"))
        .and(path("/iaf/api/cluster/members"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    // The initial load succeeds, every poll after it gets a 503.
    for (route, body) in [
        ("/iaf/api/adapters", adapters("started")),
        ("/iaf/api/server/warnings", json!({})),
    ] {
        Mock::given(method("GET"))
            .and(path(route))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path(route))
            .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
            .mount(&server)
            .await;
    }

    let mut config = config(&server);
    config.poll_interval = Duration::from_millis(50);
    let console = Console::new(config, Arc::new(MemoryStore::new())).unwrap();
    let mut diagnostics = console.diagnostics();
    let mut state = console.connection_state();
    console.connect().await.unwrap();

    let mut lost = Vec::new();
    for _ in 0..2 {
        let diagnostic = tokio::time::timeout(Duration::from_secs(5), diagnostics.recv())
            .await
            .unwrap()
            .unwrap();
        match diagnostic.as_ref() {
            CoreError::CircuitOpen { uri, failures } => {
                assert_eq!(*failures, 3);
                lost.push(uri.clone());
            }
            other => panic!("unexpected diagnostic: {other}"),
        }
    }
    lost.sort();
    assert_eq!(lost, vec!["/adapters?expanded=all", "/server/warnings"]);

    tokio::time::timeout(
        Duration::from_secs(5),
        state.wait_for(|s| *s == ConnectionState::Failed),
    )
    .await
    .unwrap()
    .unwrap();
    assert!(console.poller().list().is_empty());
    // The last good state is still readable.
    assert_eq!(console.get_adapters().len(), 2);
    console.disconnect().await;
}

// ── Commands ────────────────────────────────────────────────────────

#[tokio::test]
async fn adapter_action_puts_the_action() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/iaf/api/configurations/Main/adapters/Ingest"))
        .and(body_json(json!({ "action": "stop" })))
        .respond_with(ResponseTemplate::new(202))
        .expect(1)
        .mount(&server)
        .await;

    let console = Console::new(config(&server), Arc::new(MemoryStore::new())).unwrap();
    console
        .adapter_action("Main", "Ingest", AdapterAction::Stop)
        .await
        .unwrap();
}
