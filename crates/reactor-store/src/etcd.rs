use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use etcd_client::{
    Client, Compare, CompareOp, DeleteOptions, GetOptions, PutOptions, Txn, TxnOp, WatchOptions,
};
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::error::StoreError;
use crate::store::{CoordinationStore, StoreEvent};

/// Session time-to-live for the ephemeral lease, in seconds. Nodes written
/// with [`CoordinationStore::write_ephemeral`] vanish this long after the
/// client stops renewing (process crash, network partition).
const LEASE_TTL_SECS: i64 = 10;

/// etcd-backed [`CoordinationStore`]. etcd's lease mechanism is the direct
/// analog of a Zookeeper ephemeral znode tied to the client session; its
/// `Txn`/compare-on-create-revision gives the try-lock primitive, and its
/// watch API (prefix watches) gives both "watch contents" and "watch
/// children" for free.
pub struct EtcdStore {
    client: Client,
    lease_id: AtomicI64,
    events: broadcast::Sender<StoreEvent>,
}

impl EtcdStore {
    /// Connect to `endpoints` and grant the ephemeral-node lease, renewing
    /// it in a background task for the life of the store.
    pub async fn connect(endpoints: &[String]) -> Result<Self, StoreError> {
        let mut client = Client::connect(endpoints, None)
            .await
            .map_err(|e| StoreError::Unreachable(e.to_string()))?;

        let lease = client
            .lease_grant(LEASE_TTL_SECS, None)
            .await
            .map_err(|e| StoreError::Unreachable(e.to_string()))?;
        let lease_id = lease.id();

        let (mut keeper, mut keep_alive_stream) = client
            .lease_keep_alive(lease_id)
            .await
            .map_err(|e| StoreError::Unreachable(e.to_string()))?;

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(
                (LEASE_TTL_SECS / 3).max(1) as u64,
            ));
            loop {
                interval.tick().await;
                if keeper.keep_alive().await.is_err() {
                    warn!("etcd lease keep-alive send failed, session may expire");
                    break;
                }
                if keep_alive_stream.message().await.is_err() {
                    warn!("etcd lease keep-alive response failed, session may expire");
                    break;
                }
            }
        });

        let (events, _) = broadcast::channel(1024);
        let store = Self {
            client,
            lease_id: AtomicI64::new(lease_id),
            events,
        };

        store.watch_prefix("/").await?;

        Ok(store)
    }

    fn lease(&self) -> i64 {
        self.lease_id.load(Ordering::Relaxed)
    }

    /// Start a background watcher over every key under `prefix`, forwarding
    /// each put/delete as a [`StoreEvent`] on the broadcast channel.
    async fn watch_prefix(&self, prefix: &str) -> Result<(), StoreError> {
        let (_watcher, mut stream) = self
            .client
            .clone()
            .watch(prefix, Some(WatchOptions::new().with_prefix()))
            .await
            .map_err(|e| StoreError::Unreachable(e.to_string()))?;

        let events = self.events.clone();
        tokio::spawn(async move {
            loop {
                match stream.message().await {
                    Ok(Some(resp)) => {
                        if resp.canceled() {
                            let _ = events.send(StoreEvent::SessionExpired);
                            break;
                        }
                        for event in resp.events() {
                            let Some(kv) = event.kv() else { continue };
                            let Ok(path) = kv.key_str() else { continue };
                            let path = path.to_string();
                            let parent = path
                                .trim_end_matches('/')
                                .rfind('/')
                                .map(|i| {
                                    if i == 0 {
                                        "/".to_string()
                                    } else {
                                        path[..i].to_string()
                                    }
                                })
                                .unwrap_or_else(|| "/".to_string());
                            debug!(?event.event_type, %path, "etcd watch event");
                            let _ = events.send(StoreEvent::ContentsChanged { path });
                            let _ = events.send(StoreEvent::ChildrenChanged { path: parent });
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        warn!(error = %e, "etcd watch stream error, session likely expired");
                        let _ = events.send(StoreEvent::SessionExpired);
                        break;
                    }
                }
            }
        });

        Ok(())
    }
}

#[async_trait]
impl CoordinationStore for EtcdStore {
    async fn read(&self, path: &str) -> Result<Option<String>, StoreError> {
        let resp = self
            .client
            .clone()
            .get(path, None)
            .await
            .map_err(|e| StoreError::Unreachable(e.to_string()))?;
        match resp.kvs().first() {
            Some(kv) => Ok(Some(
                kv.value_str()
                    .map_err(|e| StoreError::Internal(e.to_string()))?
                    .to_string(),
            )),
            None => Ok(None),
        }
    }

    async fn list_children(&self, path: &str) -> Result<Vec<String>, StoreError> {
        let prefix = format!("{}/", path.trim_end_matches('/'));
        let resp = self
            .client
            .clone()
            .get(
                prefix.clone(),
                Some(GetOptions::new().with_prefix().with_keys_only()),
            )
            .await
            .map_err(|e| StoreError::Unreachable(e.to_string()))?;

        let mut children = std::collections::BTreeSet::new();
        for kv in resp.kvs() {
            let Ok(key) = kv.key_str() else { continue };
            if let Some(rest) = key.strip_prefix(&prefix) {
                if let Some(child) = rest.split('/').next() {
                    children.insert(child.to_string());
                }
            }
        }
        Ok(children.into_iter().collect())
    }

    async fn write(&self, path: &str, value: &str) -> Result<(), StoreError> {
        self.client
            .clone()
            .put(path, value, None)
            .await
            .map_err(|e| StoreError::Unreachable(e.to_string()))?;
        Ok(())
    }

    async fn write_ephemeral(&self, path: &str, value: &str) -> Result<(), StoreError> {
        self.client
            .clone()
            .put(path, value, Some(PutOptions::new().with_lease(self.lease())))
            .await
            .map_err(|e| StoreError::Unreachable(e.to_string()))?;
        Ok(())
    }

    async fn delete(&self, path: &str) -> Result<(), StoreError> {
        self.client
            .clone()
            .delete(path, Some(DeleteOptions::new().with_prefix()))
            .await
            .map_err(|e| StoreError::Unreachable(e.to_string()))?;
        Ok(())
    }

    async fn try_lock(&self, path: &str, value: &str) -> Result<bool, StoreError> {
        let txn = Txn::new()
            .when(vec![Compare::create_revision(path, CompareOp::Equal, 0)])
            .and_then(vec![TxnOp::put(
                path,
                value,
                Some(PutOptions::new().with_lease(self.lease())),
            )]);

        let resp = self
            .client
            .clone()
            .txn(txn)
            .await
            .map_err(|e| StoreError::Unreachable(e.to_string()))?;
        Ok(resp.succeeded())
    }

    fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.events.subscribe()
    }

    async fn release_ephemerals(&self) -> Result<(), StoreError> {
        self.client
            .clone()
            .lease_revoke(self.lease())
            .await
            .map_err(|e| StoreError::Unreachable(e.to_string()))?;

        let lease = self
            .client
            .clone()
            .lease_grant(LEASE_TTL_SECS, None)
            .await
            .map_err(|e| StoreError::Unreachable(e.to_string()))?;
        self.lease_id.store(lease.id(), Ordering::Relaxed);
        Ok(())
    }
}
