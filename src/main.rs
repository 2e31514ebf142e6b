use avl_ingest::cmd::Args;
use avl_ingest::notify::LogNotifier;
use avl_ingest::persist::{MemoryGateway, Vehicle};
use avl_ingest::server::{ServerConfig, run};
use avl_ingest::{Result, tracer};
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    if args.log_json {
        tracer::setup_json_tracing()?;
    } else {
        tracer::setup_simple_tracing()?;
    }

    let gateway = Arc::new(MemoryGateway::new(Some(args.snapshot_dir.clone())));
    if let Some(path) = &args.fleet_file {
        let vehicles: Vec<Vehicle> = serde_json::from_slice(&std::fs::read(path)?)?;
        info!(count = vehicles.len(), file = %path.display(), "fleet loaded");
        for vehicle in vehicles {
            gateway.register_vehicle(vehicle)?;
        }
    }

    let config = ServerConfig {
        port: args.port,
        speed_limit_kmh: args.speed_limit,
        cooldown: Duration::from_secs(args.cooldown_secs),
    };
    run(config, gateway, Arc::new(LogNotifier)).await
}
