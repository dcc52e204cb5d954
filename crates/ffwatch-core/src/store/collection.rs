// ── Generic reactive entity collection ──
//
// Concurrent keyed storage with push-based change notification via
// `watch` channels.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::watch;

use crate::stream::Snapshot;

/// A reactive collection for a single entity type.
///
/// Uses `DashMap` for concurrent lookups and a `watch` channel for
/// push-based change notification. Every mutation publishes one
/// key-ordered [`Snapshot`] under the next version.
pub(crate) struct EntityCollection<T: Clone + Send + Sync + 'static> {
    by_key: DashMap<String, Arc<T>>,
    published: watch::Sender<Snapshot<T>>,
}

impl<T: Clone + Send + Sync + 'static> EntityCollection<T> {
    pub(crate) fn new() -> Self {
        let (published, _) = watch::channel(Snapshot::empty());
        Self {
            by_key: DashMap::new(),
            published,
        }
    }

    /// Apply a batch of upserts and removals, publishing one snapshot.
    pub(crate) fn apply(&self, upserts: Vec<(String, T)>, removals: &[String]) {
        if upserts.is_empty() && removals.is_empty() {
            return;
        }
        for key in removals {
            self.by_key.remove(key);
        }
        for (key, entity) in upserts {
            self.by_key.insert(key, Arc::new(entity));
        }
        self.publish();
    }

    /// Replace the whole collection.
    pub(crate) fn replace(&self, entities: Vec<(String, T)>) {
        self.by_key.clear();
        for (key, entity) in entities {
            self.by_key.insert(key, Arc::new(entity));
        }
        self.publish();
    }

    pub(crate) fn get(&self, key: &str) -> Option<Arc<T>> {
        self.by_key.get(key).map(|r| Arc::clone(r.value()))
    }

    /// Entities of the latest snapshot (cheap `Arc` clone).
    pub(crate) fn snapshot(&self) -> Arc<Vec<Arc<T>>> {
        Arc::clone(&self.published.borrow().entities)
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<Snapshot<T>> {
        self.published.subscribe()
    }

    /// Rebuild the key-ordered snapshot and publish it as the next version.
    fn publish(&self) {
        let mut entries: Vec<(String, Arc<T>)> = self
            .by_key
            .iter()
            .map(|r| (r.key().clone(), Arc::clone(r.value())))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        let entities = Arc::new(entries.into_iter().map(|(_, v)| v).collect());
        // `send_modify` updates unconditionally, even with zero receivers.
        self.published.send_modify(|snap| {
            snap.version += 1;
            snap.entities = entities;
        });
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn version(col: &EntityCollection<String>) -> u64 {
        col.subscribe().borrow().version
    }

    #[test]
    fn apply_upserts_and_removes_in_one_version() {
        let col: EntityCollection<String> = EntityCollection::new();
        col.apply(vec![("a".into(), "x".into()), ("b".into(), "y".into())], &[]);
        assert_eq!(version(&col), 1);
        assert_eq!(col.snapshot().len(), 2);

        col.apply(vec![("c".into(), "z".into())], &["a".into()]);
        assert_eq!(version(&col), 2);
        assert!(col.get("a").is_none());
        assert_eq!(*col.get("c").unwrap(), "z");
    }

    #[test]
    fn empty_batch_is_not_a_mutation() {
        let col: EntityCollection<String> = EntityCollection::new();
        col.apply(Vec::new(), &[]);
        assert_eq!(version(&col), 0);
    }

    #[test]
    fn snapshot_is_ordered_by_key() {
        let col: EntityCollection<String> = EntityCollection::new();
        col.apply(
            vec![
                ("c".into(), "3".into()),
                ("a".into(), "1".into()),
                ("b".into(), "2".into()),
            ],
            &[],
        );
        let snap: Vec<String> = col.snapshot().iter().map(|v| (**v).clone()).collect();
        assert_eq!(snap, vec!["1", "2", "3"]);
    }

    #[test]
    fn replace_drops_missing_keys() {
        let col: EntityCollection<String> = EntityCollection::new();
        col.apply(vec![("a".into(), "x".into())], &[]);
        col.replace(vec![("b".into(), "y".into())]);
        assert!(col.get("a").is_none());
        assert_eq!(col.snapshot().len(), 1);
        assert_eq!(version(&col), 2);
    }

    #[tokio::test]
    async fn subscribers_see_new_snapshots() {
        let col: EntityCollection<String> = EntityCollection::new();
        let mut rx = col.subscribe();
        col.apply(vec![("a".into(), "x".into())], &[]);
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow().len(), 1);
        assert_eq!(rx.borrow().version, 1);
    }
}
