use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use reactor_domain::{Instance, InstanceId};
use tracing::debug;

use crate::driver::{CloudDriver, StartParams};
use crate::error::DriverError;

/// A stub driver that simulates a cloud locally. Produces synthetic instances
/// with `local://<endpoint>/<n>` addresses; performs no real I/O. Instances
/// are keyed by the serialized `cloud_config` so distinct endpoints sharing
/// this driver don't see each other's fleets.
#[derive(Default)]
pub struct LocalDriver {
    fleets: Mutex<HashMap<String, Vec<Instance>>>,
    next_id: Mutex<u64>,
}

impl LocalDriver {
    pub fn new() -> Self {
        Self::default()
    }

    fn fleet_key(cloud_config: &serde_json::Value) -> String {
        serde_json::to_string(cloud_config).unwrap_or_default()
    }
}

#[async_trait]
impl CloudDriver for LocalDriver {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn list_instances(
        &self,
        cloud_config: &serde_json::Value,
    ) -> Result<Vec<Instance>, DriverError> {
        let key = Self::fleet_key(cloud_config);
        let fleets = self.fleets.lock().unwrap();
        Ok(fleets.get(&key).cloned().unwrap_or_default())
    }

    async fn start_instance(&self, params: &StartParams) -> Result<Instance, DriverError> {
        let key = Self::fleet_key(&params.config);
        let id = {
            let mut next = self.next_id.lock().unwrap();
            *next += 1;
            *next
        };
        let instance = Instance {
            id: InstanceId::new(format!("local-{}-{}", params.endpoint_name, id)),
            name: format!("{}-{}", params.endpoint_name, id),
            addresses: vec![format!("10.0.{}.{}", id / 255, id % 255)],
            created: Utc::now(),
        };
        debug!(instance = %instance.id, "LocalDriver: start_instance");
        self.fleets
            .lock()
            .unwrap()
            .entry(key)
            .or_default()
            .push(instance.clone());
        Ok(instance)
    }

    async fn delete_instance(
        &self,
        cloud_config: &serde_json::Value,
        id: &str,
    ) -> Result<(), DriverError> {
        let key = Self::fleet_key(cloud_config);
        debug!(instance = id, "LocalDriver: delete_instance");
        if let Some(fleet) = self.fleets.lock().unwrap().get_mut(&key) {
            fleet.retain(|i| i.id.as_str() != id);
        }
        Ok(())
    }
}
