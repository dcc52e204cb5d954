//! Plain-text and JSON rendering of monitor events.

use serde_json::json;

use ffwatch_core::{
    Adapter, ConnectionState, ConnectivityAlert, CoreError, LevelCounts, NavigationTarget,
    Notification, StateCounts, Summary,
};

pub fn summary_line(summary: &Summary) -> String {
    format!(
        "[{}] adapters: {} | receivers: {} | messages: {}",
        summary.configuration.as_deref().unwrap_or("all"),
        state_counts(&summary.adapters),
        state_counts(&summary.receivers),
        level_counts(&summary.messages),
    )
}

fn state_counts(counts: &StateCounts) -> String {
    let mut parts = vec![format!("{} started", counts.started)];
    for (n, label) in [
        (counts.starting, "starting"),
        (counts.stopping, "stopping"),
        (counts.stopped, "stopped"),
        (counts.error, "error"),
    ] {
        if n > 0 {
            parts.push(format!("{n} {label}"));
        }
    }
    parts.join(", ")
}

fn level_counts(counts: &LevelCounts) -> String {
    format!(
        "{} info, {} warn, {} error",
        counts.info, counts.warn, counts.error
    )
}

pub fn notification_line(notification: &Notification) -> String {
    let mut line = format!(
        "{} {:<7} {}",
        notification.created_at.format("%Y-%m-%d %H:%M:%S"),
        notification.icon.to_string().to_uppercase(),
        notification.title
    );
    if let Some(ref message) = notification.message {
        line.push(' ');
        line.push_str(message);
    }
    if let Some(ref target) = notification.target {
        line.push_str(&format!(" -> {}", target_path(target)));
    }
    line
}

fn target_path(target: &NavigationTarget) -> String {
    match target {
        NavigationTarget::Adapter {
            configuration,
            name,
        } => format!("{configuration}/{name}"),
        NavigationTarget::Receiver {
            configuration,
            adapter,
            receiver,
        } => format!("{configuration}/{adapter}#{receiver}"),
    }
}

pub fn adapter_line(adapter: &Adapter) -> String {
    format!(
        "{:<24} {:<32} {:<10} {}",
        adapter.configuration, adapter.name, adapter.state, adapter.status
    )
}

pub fn state_line(state: ConnectionState) -> String {
    format!("connection: {state}")
}

pub fn alert_line(alert: &ConnectivityAlert) -> String {
    format!("!! {}: {}", alert.title, alert.message)
}

pub fn diagnostic_line(error: &CoreError) -> String {
    format!("warning: {error}")
}

// ── JSON events ──────────────────────────────────────────────────────

pub fn summary_json(summary: &Summary) -> String {
    json!({ "event": "summary", "summary": summary }).to_string()
}

pub fn notification_json(notification: &Notification) -> String {
    json!({ "event": "notification", "notification": notification }).to_string()
}

pub fn state_json(state: ConnectionState) -> String {
    json!({ "event": "connection", "state": state.to_string() }).to_string()
}

pub fn diagnostic_json(error: &CoreError) -> String {
    json!({ "event": "diagnostic", "message": error.to_string() }).to_string()
}

pub fn alert_json(alert: &ConnectivityAlert) -> String {
    json!({ "event": "alert", "title": alert.title, "message": alert.message }).to_string()
}
