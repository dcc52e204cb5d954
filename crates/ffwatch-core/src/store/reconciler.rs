// ── Reconciler ──
//
// The canonical state store. Partial updates from the push channel and
// from pollers land here indistinguishably; each entity family keeps the
// merged raw JSON per key next to its typed, derived form.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use strum::Display;
use tokio::sync::{broadcast, watch};
use tracing::{debug, warn};

use super::collection::EntityCollection;
use super::debounce::{Debouncer, Trigger};
use super::merge::deep_merge;
use super::status::{derive_adapter, derive_message_log, normalize_messages};
use super::summary::compute_summary;
use crate::config::DebounceConfig;
use crate::error::CoreError;
use crate::model::{Adapter, ClusterMember, Configuration, ConfigurationMessageLog, Message, Summary};
use crate::stream::EntityStream;

const DELTA_CAPACITY: usize = 256;

// ── Deltas & reports ─────────────────────────────────────────────────

/// Which entity family a delta touched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[strum(serialize_all = "snake_case")]
pub enum DeltaKind {
    Adapters,
    Configurations,
    MessageLog,
    ClusterMembers,
}

/// Keys changed by one merge, published on the delta stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delta {
    pub kind: DeltaKind,
    pub upserted: Vec<String>,
    pub removed: Vec<String>,
}

/// Outcome of a single merge call.
///
/// Rejected keys are reported, never fatal: the rest of the payload applies.
#[derive(Debug, Default)]
pub struct MergeReport {
    pub upserted: Vec<String>,
    pub removed: Vec<String>,
    pub rejected: Vec<CoreError>,
}

impl MergeReport {
    pub fn has_changes(&self) -> bool {
        !self.upserted.is_empty() || !self.removed.is_empty()
    }

    fn reject(&mut self, kind: &'static str, key: &str, reason: impl Into<String>) {
        let reason = reason.into();
        warn!(kind, key, reason = %reason, "dropping malformed partial value");
        self.rejected.push(CoreError::MergeConflict {
            kind,
            key: key.to_owned(),
            reason,
        });
    }
}

// ── Entity families ──────────────────────────────────────────────────

/// Per-family merge rules.
trait Reconcile: DeserializeOwned + Clone + Send + Sync + 'static {
    const KIND: &'static str;
    const DELTA: DeltaKind;
    /// Whether the `messages` array is combined instead of positionally merged.
    const HAS_MESSAGES: bool = false;
    /// Top-level keys of a payload that are not entities.
    const SKIP_KEYS: &'static [&'static str] = &[];

    /// Fill identity fields the wire leaves implicit in the map key.
    fn identify(key: &str, value: &mut Map<String, Value>);

    /// Recompute derived fields.
    fn derive(&mut self, cap: usize);
}

impl Reconcile for Adapter {
    const KIND: &'static str = "adapter";
    const DELTA: DeltaKind = DeltaKind::Adapters;
    const HAS_MESSAGES: bool = true;

    fn identify(key: &str, value: &mut Map<String, Value>) {
        let (configuration, name) = key.rsplit_once('/').unwrap_or(("", key));
        value
            .entry("name")
            .or_insert_with(|| Value::String(name.to_owned()));
        value
            .entry("configuration")
            .or_insert_with(|| Value::String(configuration.to_owned()));
    }

    fn derive(&mut self, cap: usize) {
        derive_adapter(self, cap);
    }
}

impl Reconcile for ConfigurationMessageLog {
    const KIND: &'static str = "message log";
    const DELTA: DeltaKind = DeltaKind::MessageLog;
    const HAS_MESSAGES: bool = true;
    const SKIP_KEYS: &'static [&'static str] = &["totalErrorStoreCount", "totalErrorCount"];

    fn identify(key: &str, value: &mut Map<String, Value>) {
        value
            .entry("configuration")
            .or_insert_with(|| Value::String(key.to_owned()));
    }

    fn derive(&mut self, cap: usize) {
        derive_message_log(self, cap);
    }
}

impl Reconcile for ClusterMember {
    const KIND: &'static str = "cluster member";
    const DELTA: DeltaKind = DeltaKind::ClusterMembers;

    fn identify(key: &str, value: &mut Map<String, Value>) {
        value
            .entry("id")
            .or_insert_with(|| Value::String(key.to_owned()));
    }

    fn derive(&mut self, _cap: usize) {}
}

/// Merged raw JSON per key plus the typed collection derived from it.
struct Family<T: Reconcile> {
    raw: DashMap<String, Value>,
    typed: EntityCollection<T>,
}

impl<T: Reconcile> Family<T> {
    fn new() -> Self {
        Self {
            raw: DashMap::new(),
            typed: EntityCollection::new(),
        }
    }

    /// Merge a keyed payload. With `fresh`, existing state is ignored and
    /// keys missing from the payload are removed.
    fn merge(&self, payload: &Map<String, Value>, cap: usize, fresh: bool) -> MergeReport {
        let mut report = MergeReport::default();
        let mut upserts = Vec::new();

        if fresh {
            let stale: Vec<String> = self
                .raw
                .iter()
                .map(|r| r.key().clone())
                .filter(|k| !payload.contains_key(k))
                .collect();
            for key in stale {
                self.raw.remove(&key);
                report.removed.push(key);
            }
        }

        for (key, incoming) in payload {
            if T::SKIP_KEYS.contains(&key.as_str()) {
                continue;
            }
            match incoming {
                Value::Null => {
                    if self.raw.remove(key).is_some() {
                        report.removed.push(key.clone());
                    }
                }
                Value::Object(patch) => {
                    let existing = if fresh {
                        None
                    } else {
                        self.raw.get(key).map(|r| r.value().clone())
                    };
                    match Self::merge_one(key, existing.as_ref(), patch, cap) {
                        Ok((merged, entity)) => {
                            self.raw.insert(key.clone(), merged);
                            report.upserted.push(key.clone());
                            upserts.push((key.clone(), entity));
                        }
                        Err(reason) => report.reject(T::KIND, key, reason),
                    }
                }
                other => report.reject(
                    T::KIND,
                    key,
                    format!("expected an object or null, got {}", json_type(other)),
                ),
            }
        }

        self.typed.apply(upserts, &report.removed);
        report
    }

    fn merge_one(
        key: &str,
        existing: Option<&Value>,
        patch: &Map<String, Value>,
        cap: usize,
    ) -> Result<(Value, T), String> {
        let mut patch = patch.clone();
        let incoming_messages = if T::HAS_MESSAGES {
            patch.remove("messages")
        } else {
            None
        };

        let base = existing
            .cloned()
            .unwrap_or_else(|| Value::Object(Map::new()));
        let Value::Object(mut merged) = deep_merge(&base, &Value::Object(patch)) else {
            return Err("merged value is not an object".into());
        };

        match incoming_messages {
            Some(Value::Null) => {
                merged.remove("messages");
            }
            Some(incoming) => {
                let combined =
                    combine_messages(key, merged.get("messages"), &incoming, cap);
                merged.insert("messages".into(), combined);
            }
            None => {}
        }

        T::identify(key, &mut merged);
        let merged = Value::Object(merged);
        let mut entity: T = serde_json::from_value(merged.clone()).map_err(|e| e.to_string())?;
        entity.derive(cap);
        Ok((merged, entity))
    }
}

/// Union existing and incoming messages, newest first, capped.
fn combine_messages(key: &str, existing: Option<&Value>, incoming: &Value, cap: usize) -> Value {
    let mut messages: Vec<Message> = Vec::new();
    for source in existing.into_iter().chain(std::iter::once(incoming)) {
        let Some(items) = source.as_array() else {
            warn!(key, "ignoring non-array messages");
            continue;
        };
        for item in items {
            match serde_json::from_value::<Message>(item.clone()) {
                Ok(message) => messages.push(message),
                Err(e) => warn!(key, error = %e, "skipping invalid message"),
            }
        }
    }
    normalize_messages(&mut messages, cap);
    serde_json::to_value(messages).unwrap_or_else(|_| Value::Array(Vec::new()))
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Turn an array of entities into a map keyed by `id_field`. Objects pass
/// through unchanged.
fn keyed(kind: &'static str, payload: &Value, id_field: &str) -> Result<Map<String, Value>, CoreError> {
    match payload {
        Value::Object(map) => Ok(map.clone()),
        Value::Array(items) => {
            let mut map = Map::new();
            for item in items {
                let id = item.get(id_field).and_then(|v| match v {
                    Value::String(s) => Some(s.clone()),
                    Value::Number(n) => Some(n.to_string()),
                    _ => None,
                });
                match id {
                    Some(id) => {
                        map.insert(id, item.clone());
                    }
                    None => warn!(kind, id_field, "skipping entry without identity"),
                }
            }
            Ok(map)
        }
        other => Err(CoreError::MergeConflict {
            kind,
            key: "*".into(),
            reason: format!("expected an object or array, got {}", json_type(other)),
        }),
    }
}

// ── Reconciler ───────────────────────────────────────────────────────

/// Canonical, derived view of the console state.
///
/// Cheaply cloneable. Mutation methods take `&self` but are meant to be
/// called from a single writer (the console's merge task); readers use
/// snapshots, `EntityStream`s and the delta stream.
#[derive(Clone)]
pub struct Reconciler {
    inner: Arc<ReconcilerInner>,
}

struct ReconcilerInner {
    message_cap: usize,
    adapters: Family<Adapter>,
    message_logs: Family<ConfigurationMessageLog>,
    cluster_members: Family<ClusterMember>,
    configurations: EntityCollection<Configuration>,
    selected_configuration: watch::Sender<Option<String>>,
    summary: watch::Sender<Summary>,
    summary_runs: AtomicU64,
    deltas: broadcast::Sender<Delta>,
    debouncer: Debouncer,
}

impl Reconciler {
    pub fn new(message_cap: usize, summary: DebounceConfig) -> Self {
        let (selected_configuration, _) = watch::channel(None);
        let (summary_tx, _) = watch::channel(Summary::default());
        let (deltas, _) = broadcast::channel(DELTA_CAPACITY);

        Self {
            inner: Arc::new(ReconcilerInner {
                message_cap,
                adapters: Family::new(),
                message_logs: Family::new(),
                cluster_members: Family::new(),
                configurations: EntityCollection::new(),
                selected_configuration,
                summary: summary_tx,
                summary_runs: AtomicU64::new(0),
                deltas,
                debouncer: Debouncer::new(summary),
            }),
        }
    }

    // ── Merges ───────────────────────────────────────────────────────

    /// Merge a partial adapter update keyed by `configuration/name`.
    pub fn merge_adapters(&self, partial: &Value) -> MergeReport {
        let report = self.merge_family(&self.inner.adapters, partial, false);
        if report.has_changes() {
            self.request_summary(false);
        }
        report
    }

    /// Replace the adapter map with a full fetch.
    pub fn replace_adapters(&self, full: &Value) -> MergeReport {
        let report = self.merge_family(&self.inner.adapters, full, true);
        if report.has_changes() {
            self.request_summary(false);
        }
        report
    }

    /// Merge a partial message-log update keyed by configuration.
    pub fn merge_message_log(&self, partial: &Value) -> MergeReport {
        self.merge_family(&self.inner.message_logs, partial, false)
    }

    /// Replace the configuration list. Accepts an array or a map keyed by
    /// name.
    pub fn merge_configurations(&self, full: &Value) -> MergeReport {
        let mut report = MergeReport::default();
        let entries = match keyed("configuration", full, "name") {
            Ok(entries) => entries,
            Err(e) => {
                warn!(error = %e, "dropping configuration payload");
                report.rejected.push(e);
                return report;
            }
        };

        let mut configurations = Vec::with_capacity(entries.len());
        for (name, mut value) in entries {
            if let Value::Object(map) = &mut value {
                map.entry("name")
                    .or_insert_with(|| Value::String(name.clone()));
            }
            match serde_json::from_value::<Configuration>(value) {
                Ok(configuration) => {
                    report.upserted.push(name.clone());
                    configurations.push((name, configuration));
                }
                Err(e) => report.reject("configuration", &name, e.to_string()),
            }
        }

        let kept: HashSet<&str> = report.upserted.iter().map(String::as_str).collect();
        report.removed = self
            .inner
            .configurations
            .snapshot()
            .iter()
            .map(|c| c.name.clone())
            .filter(|name| !kept.contains(name.as_str()))
            .collect();

        self.inner.configurations.replace(configurations);
        self.publish(DeltaKind::Configurations, &report);
        report
    }

    /// Merge a partial cluster update keyed by member id.
    pub fn merge_cluster_members(&self, partial: &Value) -> MergeReport {
        match keyed("cluster member", partial, "id") {
            Ok(entries) => self.merge_keyed(&self.inner.cluster_members, &entries, false),
            Err(e) => rejected(e),
        }
    }

    /// Replace the cluster member list (array or map keyed by id).
    pub fn replace_cluster_members(&self, full: &Value) -> MergeReport {
        match keyed("cluster member", full, "id") {
            Ok(entries) => self.merge_keyed(&self.inner.cluster_members, &entries, true),
            Err(e) => rejected(e),
        }
    }

    /// Mark `id` as the selected cluster member and clear the flag on
    /// every other member.
    pub fn select_cluster_member(&self, id: &str) -> Result<MergeReport, CoreError> {
        if !self.inner.cluster_members.raw.contains_key(id) {
            return Err(CoreError::NotFound {
                entity_type: "cluster member".into(),
                identifier: id.to_owned(),
            });
        }
        let patch: Map<String, Value> = self
            .inner
            .cluster_members
            .raw
            .iter()
            .map(|r| {
                let selected = r.key() == id;
                (r.key().clone(), serde_json::json!({ "selectedMember": selected }))
            })
            .collect();
        Ok(self.merge_keyed(&self.inner.cluster_members, &patch, false))
    }

    /// Restrict summaries to one configuration (`None` for all). Forces an
    /// immediate summary recomputation.
    pub fn select_configuration(&self, configuration: Option<String>) {
        debug!(configuration = ?configuration, "selecting configuration");
        self.inner
            .selected_configuration
            .send_replace(configuration);
        self.request_summary(true);
    }

    /// Ask for a summary recomputation. Non-forced requests are debounced.
    pub fn request_summary(&self, force: bool) -> Trigger {
        let weak: Weak<ReconcilerInner> = Arc::downgrade(&self.inner);
        self.inner.debouncer.request(force, move || {
            if let Some(inner) = weak.upgrade() {
                inner.recompute_summary();
            }
        })
    }

    // ── Readers ──────────────────────────────────────────────────────

    pub fn adapters(&self) -> EntityStream<Adapter> {
        EntityStream::new(self.inner.adapters.typed.subscribe())
    }

    pub fn adapter_snapshot(&self) -> Arc<Vec<Arc<Adapter>>> {
        self.inner.adapters.typed.snapshot()
    }

    /// Look up an adapter by its `configuration/name` key.
    pub fn adapter(&self, key: &str) -> Option<Arc<Adapter>> {
        self.inner.adapters.typed.get(key)
    }

    pub fn message_logs(&self) -> EntityStream<ConfigurationMessageLog> {
        EntityStream::new(self.inner.message_logs.typed.subscribe())
    }

    pub fn message_log(&self, configuration: &str) -> Option<Arc<ConfigurationMessageLog>> {
        self.inner.message_logs.typed.get(configuration)
    }

    pub fn configurations(&self) -> EntityStream<Configuration> {
        EntityStream::new(self.inner.configurations.subscribe())
    }

    pub fn configuration_snapshot(&self) -> Arc<Vec<Arc<Configuration>>> {
        self.inner.configurations.snapshot()
    }

    pub fn cluster_members(&self) -> EntityStream<ClusterMember> {
        EntityStream::new(self.inner.cluster_members.typed.subscribe())
    }

    pub fn cluster_member_snapshot(&self) -> Arc<Vec<Arc<ClusterMember>>> {
        self.inner.cluster_members.typed.snapshot()
    }

    pub fn selected_configuration(&self) -> Option<String> {
        self.inner.selected_configuration.borrow().clone()
    }

    /// Latest computed summary.
    pub fn summary(&self) -> Summary {
        self.inner.summary.borrow().clone()
    }

    pub fn summary_stream(&self) -> watch::Receiver<Summary> {
        self.inner.summary.subscribe()
    }

    /// How many times the summary was actually recomputed.
    pub fn summary_runs(&self) -> u64 {
        self.inner.summary_runs.load(Ordering::SeqCst)
    }

    pub fn subscribe_deltas(&self) -> broadcast::Receiver<Delta> {
        self.inner.deltas.subscribe()
    }

    // ── Private helpers ──────────────────────────────────────────────

    fn merge_family<T: Reconcile>(&self, family: &Family<T>, payload: &Value, fresh: bool) -> MergeReport {
        match payload {
            Value::Object(entries) => self.merge_keyed(family, entries, fresh),
            other => rejected(CoreError::MergeConflict {
                kind: T::KIND,
                key: "*".into(),
                reason: format!("expected an object keyed by id, got {}", json_type(other)),
            }),
        }
    }

    fn merge_keyed<T: Reconcile>(
        &self,
        family: &Family<T>,
        entries: &Map<String, Value>,
        fresh: bool,
    ) -> MergeReport {
        let report = family.merge(entries, self.inner.message_cap, fresh);
        debug!(
            kind = T::KIND,
            upserted = report.upserted.len(),
            removed = report.removed.len(),
            rejected = report.rejected.len(),
            "merged"
        );
        self.publish(T::DELTA, &report);
        report
    }

    fn publish(&self, kind: DeltaKind, report: &MergeReport) {
        if !report.has_changes() {
            return;
        }
        // No receivers is fine.
        let _ = self.inner.deltas.send(Delta {
            kind,
            upserted: report.upserted.clone(),
            removed: report.removed.clone(),
        });
    }
}

impl ReconcilerInner {
    fn recompute_summary(&self) {
        let selected = self.selected_configuration.borrow().clone();
        let summary = compute_summary(&self.adapters.typed.snapshot(), selected.as_deref());
        self.summary_runs.fetch_add(1, Ordering::SeqCst);
        self.summary.send_replace(summary);
    }
}

fn rejected(error: CoreError) -> MergeReport {
    warn!(error = %error, "dropping payload");
    MergeReport {
        rejected: vec![error],
        ..MergeReport::default()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::time::Duration;

    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;
    use crate::model::{AdapterStatus, MessageLevel, RunState};

    fn reconciler() -> Reconciler {
        Reconciler::new(10, DebounceConfig::default())
    }

    #[tokio::test]
    async fn receiver_stop_turns_adapter_to_warning() {
        let rec = reconciler();
        rec.merge_adapters(&json!({
            "A": { "state": "started", "receivers": [{ "state": "started" }] }
        }));
        assert_eq!(rec.adapter("A").unwrap().status, AdapterStatus::Started);

        rec.merge_adapters(&json!({ "A": { "receivers": [{ "state": "stopped" }] } }));
        let adapter = rec.adapter("A").unwrap();
        assert_eq!(adapter.status, AdapterStatus::Warning);
        assert_eq!(adapter.state, RunState::Started);
    }

    #[tokio::test]
    async fn identity_is_filled_from_the_key() {
        let rec = reconciler();
        rec.merge_adapters(&json!({ "Main/Ingest": { "state": "stopped" } }));
        let adapter = rec.adapter("Main/Ingest").unwrap();
        assert_eq!(adapter.configuration, "Main");
        assert_eq!(adapter.name, "Ingest");
        assert_eq!(adapter.key(), "Main/Ingest");
    }

    #[tokio::test]
    async fn merging_twice_equals_merging_once() {
        let partial = json!({
            "Main/A": {
                "state": "started",
                "description": null,
                "receivers": [{ "name": "r", "state": "started", "transactionalStores": { "ERROR": { "numberOfMessages": 0 } } }],
                "messages": [
                    { "date": 1000, "level": "INFO", "message": "up" },
                    { "date": 2000, "level": "WARN", "message": "slow" }
                ]
            }
        });

        let once = reconciler();
        once.merge_adapters(&partial);

        let twice = reconciler();
        twice.merge_adapters(&partial);
        twice.merge_adapters(&partial);

        assert_eq!(once.adapter("Main/A"), twice.adapter("Main/A"));
        assert_eq!(twice.adapter("Main/A").unwrap().messages.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn null_deletes_and_summary_excludes_it() {
        let rec = reconciler();
        rec.merge_adapters(&json!({
            "Main/A": { "state": "started" },
            "Main/B": { "state": "stopped" }
        }));
        assert_eq!(rec.summary().adapters.total(), 2);

        let report = rec.merge_adapters(&json!({ "Main/A": null }));
        assert_eq!(report.removed, vec!["Main/A".to_owned()]);
        assert!(rec.adapter("Main/A").is_none());

        tokio::time::sleep(Duration::from_secs(2)).await;
        let summary = rec.summary();
        assert_eq!(summary.adapters.total(), 1);
        assert_eq!(summary.adapters.started, 0);
        assert_eq!(summary.adapters.stopped, 1);
    }

    #[tokio::test]
    async fn messages_stay_capped_and_sorted() {
        let rec = Reconciler::new(3, DebounceConfig::default());
        for batch in 0..4_i64 {
            let messages: Vec<Value> = (0..3)
                .map(|i| json!({ "date": batch * 10 + i, "level": "INFO", "message": format!("m{batch}{i}") }))
                .collect();
            rec.merge_adapters(&json!({ "Main/A": { "state": "started", "messages": messages } }));

            let adapter = rec.adapter("Main/A").unwrap();
            assert!(adapter.messages.len() <= 3);
            assert!(adapter.messages.windows(2).all(|w| w[0].date >= w[1].date));
        }
        let newest = &rec.adapter("Main/A").unwrap().messages[0];
        assert_eq!(newest.message, "m32");
    }

    #[tokio::test]
    async fn malformed_values_are_dropped_not_fatal() {
        let rec = reconciler();
        let report = rec.merge_adapters(&json!({
            "Main/A": { "state": "started" },
            "Main/B": 42,
            "Main/C": { "receivers": "nope" }
        }));
        assert_eq!(report.upserted, vec!["Main/A".to_owned()]);
        assert_eq!(report.rejected.len(), 2);
        assert!(matches!(
            report.rejected[0],
            CoreError::MergeConflict { kind: "adapter", .. }
        ));
        assert!(rec.adapter("Main/B").is_none());
        assert!(rec.adapter("Main/C").is_none());
    }

    #[tokio::test]
    async fn failed_merge_keeps_previous_state() {
        let rec = reconciler();
        rec.merge_adapters(&json!({ "Main/A": { "state": "started", "pipes": [] } }));
        let report = rec.merge_adapters(&json!({ "Main/A": { "pipes": 7 } }));
        assert_eq!(report.rejected.len(), 1);
        assert_eq!(rec.adapter("Main/A").unwrap().state, RunState::Started);

        // The rejected patch never reached the raw state either.
        rec.merge_adapters(&json!({ "Main/A": { "state": "stopped" } }));
        assert_eq!(rec.adapter("Main/A").unwrap().state, RunState::Stopped);
    }

    #[tokio::test]
    async fn non_object_payload_is_rejected() {
        let rec = reconciler();
        let report = rec.merge_adapters(&json!([1, 2, 3]));
        assert!(!report.has_changes());
        assert_eq!(report.rejected.len(), 1);
    }

    #[tokio::test]
    async fn replace_drops_absent_adapters() {
        let rec = reconciler();
        rec.merge_adapters(&json!({ "Main/A": { "state": "started" }, "Main/B": { "state": "started" } }));
        let report = rec.replace_adapters(&json!({ "Main/B": { "state": "stopped" } }));
        assert_eq!(report.removed, vec!["Main/A".to_owned()]);
        assert_eq!(rec.adapter_snapshot().len(), 1);
        assert_eq!(rec.adapter("Main/B").unwrap().status, AdapterStatus::Stopped);
    }

    #[tokio::test]
    async fn message_log_level_and_skipped_totals() {
        let rec = reconciler();
        let report = rec.merge_message_log(&json!({
            "totalErrorStoreCount": 3,
            "Main": {
                "messages": [
                    { "date": 1, "level": "INFO", "message": "loaded" },
                    { "date": 2, "level": "ERROR", "message": "broken" }
                ]
            }
        }));
        assert!(report.rejected.is_empty());
        let log = rec.message_log("Main").unwrap();
        assert_eq!(log.configuration, "Main");
        assert_eq!(log.level, MessageLevel::Error);
        assert_eq!(log.messages[0].message, "broken");
    }

    #[tokio::test]
    async fn configurations_accept_arrays() {
        let rec = reconciler();
        rec.merge_configurations(&json!([{ "name": "Main", "version": "1" }, { "name": "Other" }]));
        assert_eq!(rec.configuration_snapshot().len(), 2);

        let report = rec.merge_configurations(&json!([{ "name": "Main" }]));
        assert_eq!(report.removed, vec!["Other".to_owned()]);
        assert_eq!(rec.configuration_snapshot().len(), 1);
    }

    #[tokio::test]
    async fn cluster_selection_is_exclusive() {
        let rec = reconciler();
        rec.replace_cluster_members(&json!([
            { "id": "n1", "address": "10.0.0.1", "selectedMember": true },
            { "id": "n2", "address": "10.0.0.2" }
        ]));
        rec.select_cluster_member("n2").unwrap();

        let members = rec.cluster_member_snapshot();
        let selected: Vec<&str> = members
            .iter()
            .filter(|m| m.selected_member)
            .map(|m| m.id.as_str())
            .collect();
        assert_eq!(selected, vec!["n2"]);
        assert!(matches!(
            rec.select_cluster_member("n9"),
            Err(CoreError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn deltas_are_published_per_merge() {
        let rec = reconciler();
        let mut deltas = rec.subscribe_deltas();
        rec.merge_adapters(&json!({ "Main/A": { "state": "started" } }));
        rec.merge_adapters(&json!({ "Main/A": null, "Main/Z": null }));

        let first = deltas.recv().await.unwrap();
        assert_eq!(first.kind, DeltaKind::Adapters);
        assert_eq!(first.upserted, vec!["Main/A".to_owned()]);
        let second = deltas.recv().await.unwrap();
        assert_eq!(second.removed, vec!["Main/A".to_owned()]);
        assert!(deltas.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn selecting_a_configuration_forces_a_summary() {
        let rec = reconciler();
        rec.merge_adapters(&json!({
            "Main/A": { "state": "started" },
            "Other/B": { "state": "started" }
        }));
        let runs = rec.summary_runs();

        rec.select_configuration(Some("Other".into()));
        assert_eq!(rec.summary_runs(), runs + 1);
        let summary = rec.summary();
        assert_eq!(summary.configuration.as_deref(), Some("Other"));
        assert_eq!(summary.adapters.total(), 1);
    }
}
