use std::path::PathBuf;

use clap::{Parser, ValueEnum};

#[derive(Debug, Parser)]
#[command(
    name = "reactor-manager",
    about = "Elastic scaling control plane: one peer in a manager fleet that owns a shard of endpoints",
    version
)]
pub struct Cli {
    /// Coordination store backend.
    #[arg(long, value_enum, default_value = "memory")]
    pub store: StoreBackend,

    /// Comma-separated etcd endpoints, required when --store=etcd.
    #[arg(long, env = "REACTOR_ETCD_ENDPOINTS")]
    pub etcd_endpoints: Option<String>,

    /// This manager's reachable IP, published to the ring. Auto-detected via
    /// the default outbound route if omitted.
    #[arg(long, env = "REACTOR_BIND_IP")]
    pub bind_ip: Option<String>,

    /// Override the number of virtual ring nodes this manager publishes.
    #[arg(long)]
    pub keys: Option<u32>,

    /// Override the reconciliation tick interval, in seconds.
    #[arg(long)]
    pub health_check: Option<u64>,

    /// Cloud drivers to make available to endpoints (by `cloud:` name).
    #[arg(long = "cloud", value_enum, num_args = 1.., default_values_t = vec![CloudArg::Local])]
    pub clouds: Vec<CloudArg>,

    /// EC2 default region, used when --cloud=ec2.
    #[arg(long, default_value = "us-east-1")]
    pub ec2_region: String,

    /// Load-balancer drivers to enable (by `loadbalancer:` name).
    #[arg(long = "lb", value_enum, num_args = 1.., default_values_t = vec![LbArg::Null])]
    pub loadbalancers: Vec<LbArg>,

    /// Directory the reactor-log driver writes backend-map files to.
    #[arg(long, default_value = "./reactor-lb")]
    pub lb_config_dir: PathBuf,

    /// Access log path the reactor-log driver tails for per-host metrics.
    #[arg(long, default_value = "./reactor-access.log")]
    pub lb_access_log: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StoreBackend {
    Memory,
    Etcd,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum CloudArg {
    Local,
    Ec2,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LbArg {
    Null,
    ReactorLog,
}
