use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("config error: {0}")]
    Config(#[from] reactor_config::ConfigError),

    #[error("domain error: {0}")]
    Domain(#[from] reactor_domain::DomainError),

    #[error("store error: {0}")]
    Store(#[from] reactor_store::StoreError),

    #[error("driver error: {0}")]
    Driver(#[from] reactor_driver::DriverError),

    #[error("load balancer error: {0}")]
    Lb(#[from] reactor_lb::LbError),

    #[error("internal reconciler error: {0}")]
    Internal(String),
}
