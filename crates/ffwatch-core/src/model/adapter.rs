// ── Adapter domain types ──

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use strum::{Display, EnumIter};

/// Lifecycle state shared by adapters and receivers.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumIter,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum RunState {
    Started,
    Starting,
    Stopping,
    #[default]
    Stopped,
    Error,
    ExceptionStarting,
    ExceptionStopping,
    #[serde(other)]
    Unknown,
}

impl RunState {
    pub fn is_started(self) -> bool {
        matches!(self, Self::Started)
    }
}

/// Severity of an adapter or configuration message.
///
/// Ordered by severity, so `max()` over a list yields its aggregate level.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumIter,
)]
#[serde(rename_all = "UPPERCASE")]
#[strum(serialize_all = "UPPERCASE")]
pub enum MessageLevel {
    #[default]
    Info,
    #[serde(alias = "WARNING")]
    Warn,
    Error,
}

/// Health derived from an adapter's state, receivers, pipes and messages.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum AdapterStatus {
    Started,
    Warning,
    #[default]
    Stopped,
}

/// One entry of an adapter's (or configuration's) message log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub date: DateTime<Utc>,
    #[serde(default)]
    pub level: MessageLevel,
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capacity: Option<u32>,
}

/// Count of messages in one transactional store of a receiver.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TransactionalStore {
    pub name: Option<String>,
    /// `-1` when the backend cannot count.
    pub number_of_messages: i64,
}

/// Inbound endpoint of an adapter.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Receiver {
    pub name: String,
    pub state: RunState,
    /// Keyed by outcome, e.g. `DONE` / `ERROR`.
    pub transactional_stores: BTreeMap<String, TransactionalStore>,
}

impl Receiver {
    /// Messages in the `ERROR` store (0 when the store is absent).
    pub fn error_count(&self) -> i64 {
        self.transactional_stores
            .get("ERROR")
            .map_or(0, |store| store.number_of_messages)
    }
}

/// Processing step of an adapter.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Pipe {
    pub name: String,
    /// Sender class, for pipes backed by a sender.
    pub sender: Option<String>,
    pub has_message_log: bool,
    /// Number or numeric string on the wire; anything else reads as unknown.
    #[serde(deserialize_with = "lenient_count")]
    pub message_log_count: Option<u64>,
    pub is_sender_transactional_storage: bool,
}

impl Pipe {
    pub fn is_sender(&self) -> bool {
        self.sender.is_some()
    }
}

/// A managed integration unit, identified by `(configuration, name)`.
///
/// `status` and the sender counters are derived on every merge and never
/// read from the wire.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Adapter {
    pub name: String,
    pub configuration: String,
    pub description: Option<String>,
    pub state: RunState,
    /// Epoch milliseconds.
    pub up_since: Option<i64>,
    pub receivers: Vec<Receiver>,
    pub pipes: Vec<Pipe>,
    /// Newest first, capped.
    pub messages: Vec<Message>,
    pub receiver_reached_max_exceptions: bool,

    // ── Derived ──────────────────────────────────────────────────────
    #[serde(skip_deserializing)]
    pub status: AdapterStatus,
    #[serde(skip_deserializing)]
    pub has_sender: bool,
    #[serde(skip_deserializing)]
    pub senders_message_log_count: u64,
    #[serde(skip_deserializing)]
    pub sender_transactional_storage_message_count: u64,
}

impl Adapter {
    /// Canonical map key: `configuration/name`.
    pub fn key(&self) -> String {
        adapter_key(&self.configuration, &self.name)
    }

    pub fn receiver(&self, name: &str) -> Option<&Receiver> {
        self.receivers.iter().find(|r| r.name == name)
    }
}

pub fn adapter_key(configuration: &str, name: &str) -> String {
    format!("{configuration}/{name}")
}

fn lenient_count<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<u64>, D::Error> {
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::Number(n)) => n.as_u64(),
        Some(Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    })
}
