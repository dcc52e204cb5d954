// ── Summary computation ──

use std::sync::Arc;

use crate::model::{Adapter, Summary};

/// Count adapters, receivers and messages per state / level.
///
/// `configuration` restricts the summary to one configuration; `None`
/// covers all of them.
pub fn compute_summary(adapters: &[Arc<Adapter>], configuration: Option<&str>) -> Summary {
    let mut summary = Summary {
        configuration: configuration.map(str::to_owned),
        ..Summary::default()
    };

    let selected = adapters
        .iter()
        .filter(|a| configuration.is_none_or(|c| a.configuration == c));
    for adapter in selected {
        summary.adapters.add(adapter.state);
        for receiver in &adapter.receivers {
            summary.receivers.add(receiver.state);
        }
        for message in &adapter.messages {
            summary.messages.add(message.level);
        }
    }
    summary
}
