use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug, Clone)]
#[clap(author, version, about = "AVL telemetry ingest server for Teltonika-compatible trackers")]
pub struct Args {
    /// TCP port the AVL listener binds to.
    #[arg(short, long, env = "AVL_PORT", default_value_t = 5027)]
    pub port: u16,

    /// Directory where evidentiary snapshots from command frames are stored.
    #[arg(long, env = "AVL_SNAPSHOT_DIR", default_value = "snapshots")]
    pub snapshot_dir: PathBuf,

    /// Speeding threshold in km/h.
    #[arg(long, env = "AVL_SPEED_LIMIT", default_value_t = 100)]
    pub speed_limit: u16,

    /// Minimum seconds between speeding notifications per device.
    #[arg(long, env = "AVL_COOLDOWN_SECS", default_value_t = 300)]
    pub cooldown_secs: u64,

    /// JSON file with the vehicles to serve, `[{"id", "imei", "driver_id", ...}]`.
    /// Stands in for the fleet CRUD service this process does not own.
    #[arg(long, env = "AVL_FLEET_FILE")]
    pub fleet_file: Option<PathBuf>,

    /// Emit logs as JSON.
    #[arg(long, env = "AVL_LOG_JSON", default_value_t = false)]
    pub log_json: bool,
}
