use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Transient: the coordination store connection dropped or timed out.
    /// Callers retry on the next tick.
    #[error("coordination store unreachable: {0}")]
    Unreachable(String),

    /// Session-fatal: the client session expired and every ephemeral node
    /// it held is gone.
    #[error("coordination session expired")]
    SessionExpired,

    #[error("try-lock on {path} already held")]
    LockConflict { path: String },

    #[error("internal store error: {0}")]
    Internal(String),
}
