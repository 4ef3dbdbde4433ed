use thiserror::Error;

#[derive(Debug, Error)]
pub enum DriverError {
    #[error("no driver registered for cloud: {0}")]
    DriverNotConfigured(String),

    #[error("start_instance failed: {0}")]
    StartFailed(String),

    #[error("delete_instance failed: {0}")]
    DeleteFailed(String),

    #[error("list_instances failed: {0}")]
    ListFailed(String),

    #[error("internal driver error: {0}")]
    Internal(String),
}
