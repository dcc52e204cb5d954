// ── Server-level domain types ──

use serde::{Deserialize, Serialize};

use super::adapter::{Message, MessageLevel};

/// A deployed configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Configuration {
    pub name: String,
    pub version: Option<String>,
    pub stubbed: bool,
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub parent: Option<String>,
}

/// Per-configuration message log, as reported by `/server/warnings`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConfigurationMessageLog {
    pub configuration: String,
    /// Newest first, capped.
    pub messages: Vec<Message>,
    pub error_store_count: i64,
    pub warnings: Vec<String>,
    pub exception: Option<String>,

    /// Highest severity in `messages` (INFO when empty).
    #[serde(skip_deserializing)]
    pub level: MessageLevel,
}

/// A node of the console cluster.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClusterMember {
    pub id: String,
    pub name: Option<String>,
    pub address: String,
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub selected_member: bool,
}
