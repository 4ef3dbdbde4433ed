pub mod driver;
pub mod ec2;
pub mod error;
pub mod local;
pub mod registry;

pub use driver::{CloudDriver, StartParams};
pub use ec2::{Ec2Driver, Ec2DriverConfig};
pub use error::DriverError;
pub use local::LocalDriver;
pub use registry::DriverRegistry;
