use async_trait::async_trait;
use reactor_domain::Instance;

use crate::error::DriverError;

/// Parameters passed to `start_instance`, carried verbatim from
/// `Endpoint::cloud_config` plus whatever the caller needs to name/tag the
/// new instance.
#[derive(Debug, Clone)]
pub struct StartParams {
    /// Endpoint name, used to tag/name the instance for later `list_instances`
    /// attribution.
    pub endpoint_name: String,
    /// Opaque, cloud-specific launch configuration (AMI, instance type,
    /// security groups, …), taken straight from `Endpoint::cloud_config`.
    pub config: serde_json::Value,
}

/// A driver exposes list/start/delete over a single cloud account and a pure
/// extraction path from whatever the underlying API returns. Errors from the
/// underlying cloud API must be caught, logged, and swallowed at this
/// boundary — the reconciler treats every call as best-effort and relies on
/// the next tick to observe reality.
#[async_trait]
pub trait CloudDriver: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    /// List every instance this driver knows about for `cloud_config`,
    /// ordered by creation time ascending.
    async fn list_instances(
        &self,
        cloud_config: &serde_json::Value,
    ) -> Result<Vec<Instance>, DriverError>;

    /// Start a new instance. Returns as soon as the cloud API accepts the
    /// request; the instance need not be running yet.
    async fn start_instance(&self, params: &StartParams) -> Result<Instance, DriverError>;

    /// Request deletion of an instance by id. Idempotent: deleting an
    /// already-gone instance is not an error.
    async fn delete_instance(
        &self,
        cloud_config: &serde_json::Value,
        id: &str,
    ) -> Result<(), DriverError>;
}
