pub mod error;
mod loader;
mod raw;

pub use error::ConfigError;
pub use loader::{
    dump_endpoint, load_endpoint, load_manager_config, ManagerConfig, KNOWN_METRICS,
};
