// ── Family subscriptions ──
//
// Readers follow one entity family through versioned snapshots. Every
// merge that changed the family publishes exactly one new version, so a
// reader can tell merges apart and count the ones it slept through.

use std::ops::Deref;
use std::sync::Arc;

use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;

/// One published state of an entity family, ordered by key.
#[derive(Debug)]
pub struct Snapshot<T> {
    /// Number of changing merges applied to the family so far.
    pub version: u64,
    pub entities: Arc<Vec<Arc<T>>>,
}

impl<T> Snapshot<T> {
    pub(crate) fn empty() -> Self {
        Self {
            version: 0,
            entities: Arc::new(Vec::new()),
        }
    }
}

impl<T> Clone for Snapshot<T> {
    fn clone(&self) -> Self {
        Self {
            version: self.version,
            entities: Arc::clone(&self.entities),
        }
    }
}

impl<T> Deref for Snapshot<T> {
    type Target = [Arc<T>];

    fn deref(&self) -> &Self::Target {
        &self.entities
    }
}

/// A reader's view of one entity family: the snapshot it last saw plus
/// a subscription to newer ones.
pub struct EntityStream<T: Send + Sync + 'static> {
    seen: Snapshot<T>,
    receiver: watch::Receiver<Snapshot<T>>,
}

impl<T: Send + Sync + 'static> EntityStream<T> {
    pub(crate) fn new(mut receiver: watch::Receiver<Snapshot<T>>) -> Self {
        let seen = receiver.borrow_and_update().clone();
        Self { seen, receiver }
    }

    /// Snapshot as of creation or the last `changed()`.
    pub fn current(&self) -> &Snapshot<T> {
        &self.seen
    }

    /// Newest published snapshot, without marking it seen.
    pub fn latest(&self) -> Snapshot<T> {
        self.receiver.borrow().clone()
    }

    /// Wait for a newer version. Versions published while the reader was
    /// busy collapse into the newest one. `None` once the Reconciler is gone.
    pub async fn changed(&mut self) -> Option<Snapshot<T>> {
        self.receiver.changed().await.ok()?;
        self.seen = self.receiver.borrow_and_update().clone();
        Some(self.seen.clone())
    }

    /// Versions published since the last seen one.
    pub fn pending(&self) -> u64 {
        self.receiver.borrow().version - self.seen.version
    }

    /// Every newer snapshot as a `Stream`, starting with the current one.
    pub fn into_stream(self) -> WatchStream<Snapshot<T>> {
        WatchStream::new(self.receiver)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use futures_util::StreamExt;
    use serde_json::json;

    use crate::config::DebounceConfig;
    use crate::store::Reconciler;

    fn reconciler() -> Reconciler {
        Reconciler::new(10, DebounceConfig::default())
    }

    #[tokio::test]
    async fn changed_follows_merge_versions() {
        let rec = reconciler();
        let mut adapters = rec.adapters();
        assert!(adapters.current().is_empty());
        assert_eq!(adapters.current().version, 0);

        rec.merge_adapters(&json!({ "Main/A": { "state": "started" } }));
        let snap = adapters.changed().await.unwrap();
        assert_eq!(snap.version, 1);
        assert_eq!(snap.len(), 1);
        assert_eq!(adapters.current()[0].name, "A");
    }

    #[tokio::test]
    async fn merges_without_effect_publish_nothing() {
        let rec = reconciler();
        let adapters = rec.adapters();

        rec.merge_adapters(&json!({ "Main/A": { "state": "started" } }));
        rec.merge_adapters(&json!({}));
        rec.merge_adapters(&json!({ "Main/Gone": null }));
        assert_eq!(adapters.pending(), 1);
        assert_eq!(adapters.latest().version, 1);
    }

    #[tokio::test]
    async fn slow_readers_see_how_many_merges_they_missed() {
        let rec = reconciler();
        let mut adapters = rec.adapters();

        rec.merge_adapters(&json!({ "Main/A": { "state": "started" } }));
        rec.merge_adapters(&json!({ "Main/B": { "state": "stopped" } }));
        rec.merge_adapters(&json!({ "Main/A": null }));
        assert_eq!(adapters.pending(), 3);

        let snap = adapters.changed().await.unwrap();
        assert_eq!(snap.version, 3);
        assert_eq!(snap.len(), 1);
        assert_eq!(snap[0].name, "B");
        assert_eq!(adapters.pending(), 0);
    }

    #[tokio::test]
    async fn stream_yields_current_then_updates() {
        let rec = reconciler();
        let mut stream = rec.adapters().into_stream();
        let first = stream.next().await.unwrap();
        assert!(first.is_empty());

        rec.merge_adapters(&json!({ "Main/A": { "state": "started" } }));
        let next = stream.next().await.unwrap();
        assert_eq!((next.version, next.len()), (1, 1));
    }
}
