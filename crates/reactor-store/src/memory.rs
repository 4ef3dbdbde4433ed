use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{broadcast, RwLock};

use crate::error::StoreError;
use crate::store::{CoordinationStore, StoreEvent};

#[derive(Debug, Default)]
struct Inner {
    nodes: HashMap<String, String>,
    ephemeral: HashSet<String>,
}

/// In-memory [`CoordinationStore`]. All data is lost on process exit.
/// Extended with a broadcast channel so reconciler and manager tests can
/// exercise watch-driven code paths without a real backend.
#[derive(Clone)]
pub struct InMemoryStore {
    inner: Arc<RwLock<Inner>>,
    events: broadcast::Sender<StoreEvent>,
}

impl std::fmt::Debug for InMemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryStore").finish_non_exhaustive()
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(1024);
        Self {
            inner: Arc::new(RwLock::new(Inner::default())),
            events,
        }
    }

    fn parent_of(path: &str) -> Option<String> {
        let trimmed = path.trim_end_matches('/');
        let idx = trimmed.rfind('/')?;
        if idx == 0 {
            Some("/".to_string())
        } else {
            Some(trimmed[..idx].to_string())
        }
    }

    fn notify_write(&self, path: &str) {
        let _ = self.events.send(StoreEvent::ContentsChanged { path: path.to_string() });
        if let Some(parent) = Self::parent_of(path) {
            let _ = self.events.send(StoreEvent::ChildrenChanged { path: parent });
        }
    }
}

#[async_trait]
impl CoordinationStore for InMemoryStore {
    async fn read(&self, path: &str) -> Result<Option<String>, StoreError> {
        let guard = self.inner.read().await;
        Ok(guard.nodes.get(path).cloned())
    }

    async fn list_children(&self, path: &str) -> Result<Vec<String>, StoreError> {
        let guard = self.inner.read().await;
        let prefix = format!("{}/", path.trim_end_matches('/'));
        let mut seen = HashSet::new();
        for key in guard.nodes.keys() {
            if let Some(rest) = key.strip_prefix(&prefix) {
                if let Some(child) = rest.split('/').next() {
                    seen.insert(child.to_string());
                }
            }
        }
        let mut out: Vec<String> = seen.into_iter().collect();
        out.sort();
        Ok(out)
    }

    async fn write(&self, path: &str, value: &str) -> Result<(), StoreError> {
        {
            let mut guard = self.inner.write().await;
            guard.nodes.insert(path.to_string(), value.to_string());
            guard.ephemeral.remove(path);
        }
        self.notify_write(path);
        Ok(())
    }

    async fn write_ephemeral(&self, path: &str, value: &str) -> Result<(), StoreError> {
        {
            let mut guard = self.inner.write().await;
            guard.nodes.insert(path.to_string(), value.to_string());
            guard.ephemeral.insert(path.to_string());
        }
        self.notify_write(path);
        Ok(())
    }

    async fn delete(&self, path: &str) -> Result<(), StoreError> {
        {
            let mut guard = self.inner.write().await;
            let prefix = format!("{}/", path.trim_end_matches('/'));
            guard.nodes.retain(|k, _| k != path && !k.starts_with(&prefix));
            guard.ephemeral.retain(|k| k != path && !k.starts_with(&prefix));
        }
        self.notify_write(path);
        Ok(())
    }

    async fn try_lock(&self, path: &str, value: &str) -> Result<bool, StoreError> {
        let mut guard = self.inner.write().await;
        if guard.nodes.contains_key(path) {
            return Ok(false);
        }
        guard.nodes.insert(path.to_string(), value.to_string());
        guard.ephemeral.insert(path.to_string());
        drop(guard);
        self.notify_write(path);
        Ok(true)
    }

    fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.events.subscribe()
    }

    async fn release_ephemerals(&self) -> Result<(), StoreError> {
        let removed: Vec<String> = {
            let mut guard = self.inner.write().await;
            let ephemeral: Vec<String> = guard.ephemeral.iter().cloned().collect();
            for path in &ephemeral {
                guard.nodes.remove(path);
            }
            guard.ephemeral.clear();
            ephemeral
        };
        for path in removed {
            self.notify_write(&path);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn write_and_read_roundtrip() {
        let store = InMemoryStore::new();
        store.write("/endpoints/web", "{}").await.unwrap();
        assert_eq!(store.read("/endpoints/web").await.unwrap(), Some("{}".to_string()));
    }

    #[tokio::test]
    async fn list_children_returns_immediate_segment_only() {
        let store = InMemoryStore::new();
        store.write("/endpoints/web/confirmed_ip/10.0.0.1", "").await.unwrap();
        store.write("/endpoints/web/confirmed_ip/10.0.0.2", "").await.unwrap();
        store.write("/endpoints/api/confirmed_ip/10.0.0.3", "").await.unwrap();

        let mut children = store.list_children("/endpoints/web/confirmed_ip").await.unwrap();
        children.sort();
        assert_eq!(children, vec!["10.0.0.1".to_string(), "10.0.0.2".to_string()]);
    }

    #[tokio::test]
    async fn try_lock_is_exclusive() {
        let store = InMemoryStore::new();
        assert!(store.try_lock("/lock", "a").await.unwrap());
        assert!(!store.try_lock("/lock", "b").await.unwrap());
        assert_eq!(store.read("/lock").await.unwrap(), Some("a".to_string()));
    }

    #[tokio::test]
    async fn release_ephemerals_drops_only_ephemeral_nodes() {
        let store = InMemoryStore::new();
        store.write("/endpoints/web", "persisted").await.unwrap();
        store.write_ephemeral("/managers/keys/u1", "k1,k2").await.unwrap();

        store.release_ephemerals().await.unwrap();

        assert_eq!(store.read("/endpoints/web").await.unwrap(), Some("persisted".to_string()));
        assert_eq!(store.read("/managers/keys/u1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn write_notifies_subscribers_of_contents_and_children() {
        let store = InMemoryStore::new();
        let mut rx = store.subscribe();
        store.write("/endpoints/web/state", "running").await.unwrap();

        let mut saw_contents = false;
        let mut saw_children = false;
        for _ in 0..2 {
            match rx.try_recv().unwrap() {
                StoreEvent::ContentsChanged { path } if path == "/endpoints/web/state" => {
                    saw_contents = true
                }
                StoreEvent::ChildrenChanged { path } if path == "/endpoints/web" => {
                    saw_children = true
                }
                other => panic!("unexpected event: {:?}", other),
            }
        }
        assert!(saw_contents && saw_children);
    }
}
