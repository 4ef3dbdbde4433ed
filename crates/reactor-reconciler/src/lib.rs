pub mod error;
pub mod reconcile;
pub mod report;

pub use error::ReconcileError;
pub use reconcile::{health_check, match_new_ip, plan_scaling, scaling_tick, target_range};
pub use report::{Change, ReconcileReport, TickInput};
