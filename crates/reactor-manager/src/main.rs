use std::net::UdpSocket;
use std::sync::Arc;

use clap::Parser;
use reactor_domain::ManagerId;
use reactor_driver::{CloudDriver, DriverRegistry, Ec2Driver, Ec2DriverConfig, LocalDriver};
use reactor_lb::{LbDriver, NullLb, ReactorLogLb};
use reactor_manager::cli::{Cli, CloudArg, LbArg, StoreBackend};
use reactor_manager::{ManagerContext, ManagerError, ManagerLoop};
use reactor_store::{paths, CoordinationStore, EtcdStore, InMemoryStore};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> std::process::ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .init();

    let cli = Cli::parse();

    match bootstrap(cli).await {
        Ok(manager) => match manager.run().await {
            Ok(()) => std::process::ExitCode::SUCCESS,
            Err(err) => {
                error!(error = %err, "manager loop exited with an error");
                std::process::ExitCode::from(1)
            }
        },
        Err(err @ ManagerError::Store(reactor_store::StoreError::Unreachable(_))) => {
            error!(error = %err, "coordination store unreachable after startup retries");
            std::process::ExitCode::from(2)
        }
        Err(err) => {
            error!(error = %err, "fatal configuration error at startup");
            std::process::ExitCode::from(1)
        }
    }
}

async fn bootstrap(cli: Cli) -> Result<ManagerLoop, ManagerError> {
    let bind_ip = match cli.bind_ip.clone() {
        Some(ip) => ip,
        None => detect_local_ip()?,
    };

    let store: Arc<dyn CoordinationStore> = match cli.store {
        StoreBackend::Memory => {
            info!("using in-memory coordination store (state lost on exit)");
            Arc::new(InMemoryStore::new())
        }
        StoreBackend::Etcd => {
            let endpoints: Vec<String> = cli
                .etcd_endpoints
                .as_deref()
                .unwrap_or("")
                .split(',')
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect();
            if endpoints.is_empty() {
                return Err(ManagerError::Store(reactor_store::StoreError::Unreachable(
                    "--etcd-endpoints is required with --store=etcd".to_string(),
                )));
            }
            info!(endpoints = ?endpoints, "connecting to etcd");
            Arc::new(EtcdStore::connect(&endpoints).await?)
        }
    };

    let manager_id = ManagerId::new();

    let global_json = store.read(&paths::config()).await?;
    let local_json = store.read(&paths::manager_config(&manager_id.to_string())).await?;
    let mut manager_config =
        reactor_config::load_manager_config(global_json.as_deref(), local_json.as_deref())?;
    if let Some(keys) = cli.keys {
        manager_config.keys = keys;
    }
    if let Some(secs) = cli.health_check {
        manager_config.health_check_secs = secs;
    }

    let mut clouds = DriverRegistry::new();
    for cloud in &cli.clouds {
        match cloud {
            CloudArg::Local => {
                clouds.register("local", Arc::new(LocalDriver::new()) as Arc<dyn CloudDriver>);
            }
            CloudArg::Ec2 => {
                let driver = Ec2Driver::new(Ec2DriverConfig { default_region: cli.ec2_region.clone() }).await?;
                clouds.register("ec2", Arc::new(driver) as Arc<dyn CloudDriver>);
            }
        }
    }

    let mut loadbalancers: Vec<Arc<dyn LbDriver>> = Vec::new();
    for lb in &cli.loadbalancers {
        match lb {
            LbArg::Null => loadbalancers.push(Arc::new(NullLb::new())),
            LbArg::ReactorLog => {
                loadbalancers.push(Arc::new(ReactorLogLb::new(cli.lb_config_dir.clone(), cli.lb_access_log.clone())));
            }
        }
    }

    info!(manager = %manager_id, ip = %bind_ip, clouds = ?cli.clouds, lb = ?cli.loadbalancers, "bootstrapped manager");

    let ctx = ManagerContext::new(manager_id, bind_ip, store, Arc::new(clouds), loadbalancers, manager_config);
    Ok(ManagerLoop::new(ctx))
}

/// No cloud DNS lookup or outbound packet is actually sent (UDP connect is
/// local route resolution only); this just asks the kernel which local
/// address would be used to reach a public host, the same trick used to
/// discover a routable interface without hard-coding one.
fn detect_local_ip() -> Result<String, ManagerError> {
    let socket = UdpSocket::bind("0.0.0.0:0").map_err(|_| ManagerError::NoReachableIp)?;
    socket.connect("8.8.8.8:80").map_err(|_| ManagerError::NoReachableIp)?;
    let addr = socket.local_addr().map_err(|_| ManagerError::NoReachableIp)?;
    Ok(addr.ip().to_string())
}
