// ── Derived fields ──
//
// Pure functions over an adapter's current state. The reconciler calls
// `derive_adapter` after every merge; nothing here is ever carried
// forward from a previous derivation.

use std::collections::HashSet;

use crate::model::{Adapter, AdapterStatus, ConfigurationMessageLog, Message, MessageLevel, RunState};

/// Health status, rules applied in order with later rules winning:
///
/// 1. `started`
/// 2. any receiver not started: `warning`
/// 3. any receiver with messages in its ERROR store: `warning`
/// 4. receiver reached max exceptions: `warning`
/// 5. newest message is not INFO and the adapter is not stopped: `warning`
/// 6. adapter not started: `stopped`
pub fn derive_status(adapter: &Adapter) -> AdapterStatus {
    let mut status = AdapterStatus::Started;

    if adapter.receivers.iter().any(|r| !r.state.is_started()) {
        status = AdapterStatus::Warning;
    }
    if adapter.receivers.iter().any(|r| r.error_count() > 0) {
        status = AdapterStatus::Warning;
    }
    if adapter.receiver_reached_max_exceptions {
        status = AdapterStatus::Warning;
    }
    if adapter
        .messages
        .first()
        .is_some_and(|m| m.level != MessageLevel::Info)
        && adapter.state != RunState::Stopped
    {
        status = AdapterStatus::Warning;
    }
    if !adapter.state.is_started() {
        status = AdapterStatus::Stopped;
    }
    status
}

/// Recompute the sender counters from the current pipe list.
pub fn derive_counters(adapter: &mut Adapter) {
    adapter.has_sender = false;
    adapter.senders_message_log_count = 0;
    adapter.sender_transactional_storage_message_count = 0;

    for pipe in adapter.pipes.iter().filter(|p| p.is_sender()) {
        adapter.has_sender = true;
        if !pipe.has_message_log {
            continue;
        }
        let Some(count) = pipe.message_log_count else {
            continue;
        };
        if pipe.is_sender_transactional_storage {
            adapter.sender_transactional_storage_message_count += count;
        } else {
            adapter.senders_message_log_count += count;
        }
    }
}

/// Sort newest first, drop exact duplicates and truncate to `cap`.
pub fn normalize_messages(messages: &mut Vec<Message>, cap: usize) {
    let mut seen = HashSet::new();
    messages.retain(|m| seen.insert((m.date, m.level, m.message.clone())));
    messages.sort_by(|a, b| b.date.cmp(&a.date));
    messages.truncate(cap);
}

/// Derive every computed field of an adapter.
pub fn derive_adapter(adapter: &mut Adapter, cap: usize) {
    normalize_messages(&mut adapter.messages, cap);
    derive_counters(adapter);
    adapter.status = derive_status(adapter);
}

/// Derive the aggregate level of a configuration's message log.
pub fn derive_message_log(log: &mut ConfigurationMessageLog, cap: usize) {
    normalize_messages(&mut log.messages, cap);
    log.level = log
        .messages
        .iter()
        .map(|m| m.level)
        .max()
        .unwrap_or_default();
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    use super::*;

    fn adapter(value: serde_json::Value) -> Adapter {
        serde_json::from_value(value).unwrap()
    }

    fn message(ms: i64, level: MessageLevel) -> Message {
        Message {
            date: Utc.timestamp_millis_opt(ms).unwrap(),
            level,
            message: format!("at {ms}"),
            capacity: None,
        }
    }

    #[test]
    fn started_adapter_with_healthy_receivers() {
        let a = adapter(json!({ "state": "started", "receivers": [{ "state": "started" }] }));
        assert_eq!(derive_status(&a), AdapterStatus::Started);
    }

    #[test]
    fn stopped_receiver_warns() {
        let a = adapter(json!({ "state": "started", "receivers": [{ "state": "stopped" }] }));
        assert_eq!(derive_status(&a), AdapterStatus::Warning);
    }

    #[test]
    fn error_store_warns() {
        let a = adapter(json!({
            "state": "started",
            "receivers": [{
                "state": "started",
                "transactionalStores": { "ERROR": { "numberOfMessages": 1 }, "DONE": { "numberOfMessages": 40 } }
            }]
        }));
        assert_eq!(derive_status(&a), AdapterStatus::Warning);

        let unknown = adapter(json!({
            "state": "started",
            "receivers": [{ "state": "started", "transactionalStores": { "ERROR": { "numberOfMessages": -1 } } }]
        }));
        assert_eq!(derive_status(&unknown), AdapterStatus::Started);
    }

    #[test]
    fn max_exceptions_warns() {
        let a = adapter(json!({ "state": "started", "receiverReachedMaxExceptions": true }));
        assert_eq!(derive_status(&a), AdapterStatus::Warning);
    }

    #[test]
    fn newest_message_level_decides() {
        let mut a = adapter(json!({ "state": "started" }));
        a.messages = vec![message(2, MessageLevel::Info), message(1, MessageLevel::Error)];
        assert_eq!(derive_status(&a), AdapterStatus::Started);

        a.messages = vec![message(2, MessageLevel::Warn), message(1, MessageLevel::Info)];
        assert_eq!(derive_status(&a), AdapterStatus::Warning);
    }

    #[test]
    fn not_started_wins_over_warning() {
        let mut a = adapter(json!({
            "state": "starting",
            "receivers": [{ "state": "stopped" }],
            "receiverReachedMaxExceptions": true
        }));
        a.messages = vec![message(1, MessageLevel::Error)];
        assert_eq!(derive_status(&a), AdapterStatus::Stopped);
    }

    #[test]
    fn status_is_deterministic() {
        let a = adapter(json!({ "state": "started", "receivers": [{ "state": "error" }] }));
        let first = derive_status(&a);
        for _ in 0..10 {
            assert_eq!(derive_status(&a), first);
        }
    }

    #[test]
    fn counters_are_recomputed_from_scratch() {
        let mut a = adapter(json!({
            "pipes": [
                { "sender": "HttpSender", "hasMessageLog": true, "messageLogCount": 3 },
                { "sender": "JdbcSender", "hasMessageLog": true, "messageLogCount": "5", "isSenderTransactionalStorage": true },
                { "sender": "FileSender", "hasMessageLog": true, "messageLogCount": "?" },
                { "sender": "MailSender", "hasMessageLog": false, "messageLogCount": 100 },
                { "name": "NoSender", "hasMessageLog": true, "messageLogCount": 100 }
            ]
        }));
        derive_counters(&mut a);
        derive_counters(&mut a);

        assert!(a.has_sender);
        assert_eq!(a.senders_message_log_count, 3);
        assert_eq!(a.sender_transactional_storage_message_count, 5);

        a.pipes.clear();
        derive_counters(&mut a);
        assert!(!a.has_sender);
        assert_eq!(a.senders_message_log_count, 0);
    }

    #[test]
    fn messages_sorted_deduped_and_capped() {
        let mut messages: Vec<Message> = (0..15).map(|i| message(i, MessageLevel::Info)).collect();
        messages.push(message(14, MessageLevel::Info));
        normalize_messages(&mut messages, 10);

        assert_eq!(messages.len(), 10);
        assert_eq!(messages[0].date.timestamp_millis(), 14);
        assert_eq!(messages[1].date.timestamp_millis(), 13);
        assert!(messages.windows(2).all(|w| w[0].date >= w[1].date));
    }

    #[test]
    fn message_log_level_is_highest_severity() {
        let mut log = ConfigurationMessageLog::default();
        derive_message_log(&mut log, 10);
        assert_eq!(log.level, MessageLevel::Info);

        log.messages = vec![message(3, MessageLevel::Info), message(2, MessageLevel::Error), message(1, MessageLevel::Warn)];
        derive_message_log(&mut log, 10);
        assert_eq!(log.level, MessageLevel::Error);
    }
}
