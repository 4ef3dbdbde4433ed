use thiserror::Error;

#[derive(Debug, Error)]
pub enum DomainError {
    #[error("invalid endpoint name: {0}")]
    InvalidEndpointName(String),

    #[error("invalid rule metric: {0}")]
    InvalidRuleMetric(String),

    #[error("min_instances ({min}) greater than max_instances ({max})")]
    InvalidInstanceRange { min: u32, max: u32 },

    #[error("invalid ip state transition: {from} -> {to}")]
    InvalidIpTransition { from: String, to: String },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}
