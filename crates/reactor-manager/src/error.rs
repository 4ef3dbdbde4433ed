use thiserror::Error;

#[derive(Debug, Error)]
pub enum ManagerError {
    #[error("config error: {0}")]
    Config(#[from] reactor_config::ConfigError),

    #[error("store error: {0}")]
    Store(#[from] reactor_store::StoreError),

    #[error("driver error: {0}")]
    Driver(#[from] reactor_driver::DriverError),

    #[error("load balancer error: {0}")]
    Lb(#[from] reactor_lb::LbError),

    #[error("reconcile error: {0}")]
    Reconcile(#[from] reactor_reconciler::ReconcileError),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("no reachable ip could be resolved at startup")]
    NoReachableIp,
}
