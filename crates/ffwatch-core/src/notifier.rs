// ── Transition notifications ──
//
// Watches reconciled adapter snapshots and raises one notification per
// started → not-started transition. Notifications are never deduplicated
// by content.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::Serialize;
use strum::Display;
use tokio::sync::{broadcast, watch};
use tracing::info;

use crate::model::{Adapter, Receiver};

const DEFAULT_CAPACITY: usize = 100;
const EVENT_CHANNEL_SIZE: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum NotificationIcon {
    Info,
    Warning,
    Error,
}

/// Where the presentation layer should take the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NavigationTarget {
    Adapter {
        configuration: String,
        name: String,
    },
    Receiver {
        configuration: String,
        adapter: String,
        receiver: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    /// Strictly increasing per notifier.
    pub id: u64,
    pub icon: NotificationIcon,
    pub title: String,
    pub message: Option<String>,
    pub target: Option<NavigationTarget>,
    pub created_at: DateTime<Utc>,
}

/// Notification list with an unread counter.
#[derive(Clone)]
pub struct Notifier {
    inner: Arc<NotifierInner>,
}

struct NotifierInner {
    capacity: usize,
    next_id: AtomicU64,
    list: Mutex<VecDeque<Arc<Notification>>>,
    unread: watch::Sender<usize>,
    events: broadcast::Sender<Arc<Notification>>,
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl Notifier {
    /// Keep at most `capacity` notifications, dropping the oldest.
    pub fn new(capacity: usize) -> Self {
        let (unread, _) = watch::channel(0);
        let (events, _) = broadcast::channel(EVENT_CHANNEL_SIZE);
        Self {
            inner: Arc::new(NotifierInner {
                capacity,
                next_id: AtomicU64::new(1),
                list: Mutex::new(VecDeque::new()),
                unread,
                events,
            }),
        }
    }

    /// Record a notification and bump the unread counter.
    pub fn add(
        &self,
        icon: NotificationIcon,
        title: impl Into<String>,
        message: Option<String>,
        target: Option<NavigationTarget>,
    ) -> Arc<Notification> {
        let notification = Arc::new(Notification {
            id: self.inner.next_id.fetch_add(1, Ordering::SeqCst),
            icon,
            title: title.into(),
            message,
            target,
            created_at: Utc::now(),
        });
        info!(
            id = notification.id,
            title = %notification.title,
            message = notification.message.as_deref().unwrap_or_default(),
            "notification"
        );

        {
            let mut list = self.inner.list.lock().expect("notification lock poisoned");
            list.push_front(Arc::clone(&notification));
            list.truncate(self.inner.capacity);
        }
        self.inner.unread.send_modify(|n| *n += 1);
        let _ = self.inner.events.send(Arc::clone(&notification));
        notification
    }

    /// Compare two reconciled adapter snapshots and notify on stops.
    ///
    /// An adapter that stops yields one notification for itself and none
    /// for its receivers. Receivers that stop under a started adapter
    /// yield one notification each.
    pub fn on_reconciled(
        &self,
        previous: &[Arc<Adapter>],
        current: &[Arc<Adapter>],
    ) -> Vec<Arc<Notification>> {
        let before: HashMap<String, &Adapter> =
            previous.iter().map(|a| (a.key(), a.as_ref())).collect();
        let mut raised = Vec::new();

        for adapter in current {
            let Some(old) = before.get(&adapter.key()) else {
                continue;
            };
            if old.state.is_started() && !adapter.state.is_started() {
                raised.push(self.add(
                    NotificationIcon::Error,
                    "Adapter is stopped!",
                    Some(adapter.name.clone()),
                    Some(NavigationTarget::Adapter {
                        configuration: adapter.configuration.clone(),
                        name: adapter.name.clone(),
                    }),
                ));
                continue;
            }
            if !adapter.state.is_started() {
                continue;
            }
            for (index, receiver) in adapter.receivers.iter().enumerate() {
                let was_started = counterpart(old, index, receiver).is_some_and(|r| r.state.is_started());
                if was_started && !receiver.state.is_started() {
                    raised.push(self.add(
                        NotificationIcon::Warning,
                        "Receiver is stopped!",
                        Some(format!("{}: {}", adapter.name, receiver.name)),
                        Some(NavigationTarget::Receiver {
                            configuration: adapter.configuration.clone(),
                            adapter: adapter.name.clone(),
                            receiver: receiver.name.clone(),
                        }),
                    ));
                }
            }
        }
        raised
    }

    /// Newest first.
    pub fn list(&self) -> Vec<Arc<Notification>> {
        self.inner
            .list
            .lock()
            .expect("notification lock poisoned")
            .iter()
            .cloned()
            .collect()
    }

    pub fn unread(&self) -> watch::Receiver<usize> {
        self.inner.unread.subscribe()
    }

    pub fn unread_count(&self) -> usize {
        *self.inner.unread.borrow()
    }

    pub fn mark_all_read(&self) {
        self.inner.unread.send_replace(0);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Arc<Notification>> {
        self.inner.events.subscribe()
    }
}

/// The previous version of a receiver: by name, or by position when
/// receivers are unnamed.
fn counterpart<'a>(old: &'a Adapter, index: usize, receiver: &Receiver) -> Option<&'a Receiver> {
    if receiver.name.is_empty() {
        old.receivers.get(index)
    } else {
        old.receiver(&receiver.name)
    }
}
