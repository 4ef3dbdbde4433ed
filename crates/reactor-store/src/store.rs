use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::error::StoreError;

/// A change observed in the coordination store, delivered to every
/// subscriber. The manager's event loop owns all mutable state and consumes
/// these from a single place rather than mutating state from a watch
/// callback (design note: "watches as callbacks").
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreEvent {
    /// The value at `path` changed (or was created/deleted).
    ContentsChanged { path: String },
    /// The set of children of `path` changed.
    ChildrenChanged { path: String },
    /// The client's session was lost; every ephemeral node it held is gone.
    /// Subscribers should treat this as session-fatal: unmanage everything
    /// and reconnect.
    SessionExpired,
}

/// Hierarchical key/value coordination store with ephemeral nodes, watches,
/// and compare-and-create locks. Implemented by [`crate::memory::InMemoryStore`]
/// for tests and by [`crate::etcd::EtcdStore`] against a real backend.
///
/// Paths are `/`-separated, root-relative (see [`crate::paths`]). A node's
/// "children" are the immediate next path segment of every node whose path
/// is prefixed by it.
#[async_trait]
pub trait CoordinationStore: Send + Sync + 'static {
    /// Read the value at `path`, or `None` if it does not exist.
    async fn read(&self, path: &str) -> Result<Option<String>, StoreError>;

    /// List the immediate child names of `path` (not full paths).
    async fn list_children(&self, path: &str) -> Result<Vec<String>, StoreError>;

    /// Create or overwrite `path` with a durable value.
    async fn write(&self, path: &str, value: &str) -> Result<(), StoreError>;

    /// Create or overwrite `path` with a value tied to this client's
    /// session: it disappears automatically if the session dies.
    async fn write_ephemeral(&self, path: &str, value: &str) -> Result<(), StoreError>;

    /// Remove `path` (and, implicitly, its now-orphaned children in the
    /// in-memory backend; real backends should do the same for parity).
    async fn delete(&self, path: &str) -> Result<(), StoreError>;

    /// Atomically create `path` with `value` only if it does not already
    /// exist. Returns `true` if the lock was acquired.
    async fn try_lock(&self, path: &str, value: &str) -> Result<bool, StoreError>;

    /// Subscribe to every [`StoreEvent`] this store emits from now on.
    fn subscribe(&self) -> broadcast::Receiver<StoreEvent>;

    /// Release every ephemeral node held by this client's session. Called on
    /// clean shutdown or after a session-fatal error, before reconnecting.
    async fn release_ephemerals(&self) -> Result<(), StoreError>;
}
