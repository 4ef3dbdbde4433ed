use thiserror::Error;

#[derive(Debug, Error)]
pub enum LbError {
    #[error("load balancer config write failed: {0}")]
    WriteFailed(String),

    #[error("load balancer reload failed: {0}")]
    ReloadFailed(String),

    #[error("internal load balancer error: {0}")]
    Internal(String),
}
