pub mod driver;
pub mod error;
pub mod nginx_log;
pub mod null;
pub mod reactor_log;

pub use driver::{merge_host_metrics, Backend, HostMetrics, LbDriver};
pub use error::LbError;
pub use null::NullLb;
pub use reactor_log::ReactorLogLb;
