//! Everything a tick or a membership operation needs, threaded explicitly
//! rather than reached through a manager back-pointer (design note:
//! "cyclic references").

use std::sync::Arc;

use reactor_config::ManagerConfig;
use reactor_driver::DriverRegistry;
use reactor_domain::ManagerId;
use reactor_lb::LbDriver;
use reactor_store::CoordinationStore;

/// Per-process values established once at startup and passed by reference
/// into every subsequent operation.
pub struct ManagerContext {
    pub id: ManagerId,
    pub ip: String,
    pub store: Arc<dyn CoordinationStore>,
    pub clouds: Arc<DriverRegistry>,
    pub loadbalancers: Vec<Arc<dyn LbDriver>>,
    pub config: ManagerConfig,
}

impl ManagerContext {
    pub fn new(
        id: ManagerId,
        ip: String,
        store: Arc<dyn CoordinationStore>,
        clouds: Arc<DriverRegistry>,
        loadbalancers: Vec<Arc<dyn LbDriver>>,
        config: ManagerConfig,
    ) -> Self {
        Self { id, ip, store, clouds, loadbalancers, config }
    }
}
