use std::collections::HashMap;
use std::sync::Arc;

use crate::driver::CloudDriver;
use crate::error::DriverError;

/// Dispatches by an endpoint's `cloud:` field (a plain string — `"local"`,
/// `"ec2"`, or an operator-defined name) to the matching [`CloudDriver`].
#[derive(Default)]
pub struct DriverRegistry {
    drivers: HashMap<String, Arc<dyn CloudDriver>>,
}

impl DriverRegistry {
    pub fn new() -> Self {
        Self { drivers: HashMap::new() }
    }

    /// Register a driver under a cloud name. Returns `&mut self` for chaining.
    pub fn register(&mut self, cloud: impl Into<String>, driver: Arc<dyn CloudDriver>) -> &mut Self {
        self.drivers.insert(cloud.into(), driver);
        self
    }

    /// Resolve the driver for an endpoint's `cloud` field.
    pub fn get(&self, cloud: &str) -> Result<Arc<dyn CloudDriver>, DriverError> {
        self.drivers
            .get(cloud)
            .cloned()
            .ok_or_else(|| DriverError::DriverNotConfigured(cloud.to_string()))
    }

    /// All cloud names with a registered driver.
    pub fn active_clouds(&self) -> Vec<&str> {
        self.drivers.keys().map(String::as_str).collect()
    }
}
