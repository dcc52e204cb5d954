// ── Key-value session storage ──
//
// The engine only needs get / set / remove on string keys. Hosts plug in
// whatever persistence they have; `MemoryStore` keeps values in-process.

use dashmap::DashMap;

/// Minimal session storage contract.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: &str);
    fn remove(&self, key: &str);
}

/// Process-local store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    values: DashMap<String, String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Option<String> {
        self.values.get(key).map(|v| v.value().clone())
    }

    fn set(&self, key: &str, value: &str) {
        self.values.insert(key.to_owned(), value.to_owned());
    }

    fn remove(&self, key: &str) {
        self.values.remove(key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_get_remove() {
        let store = MemoryStore::new();
        assert_eq!(store.get("configuration"), None);
        store.set("configuration", "Main");
        assert_eq!(store.get("configuration").as_deref(), Some("Main"));
        store.set("configuration", "Other");
        assert_eq!(store.get("configuration").as_deref(), Some("Other"));
        store.remove("configuration");
        assert_eq!(store.get("configuration"), None);
    }
}
