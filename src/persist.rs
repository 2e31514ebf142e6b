use crate::events::{BehaviorEvent, io_ids};
use crate::protocol::record::AvlRecord;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::error;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vehicle {
    pub id: i64,
    pub imei: String,
    #[serde(default)]
    pub driver_id: Option<i64>,
    #[serde(default)]
    pub last_location_time: Option<u64>,
}

/// Telemetry fields extracted from one record: the fixed GPS block plus the
/// well-known IO ids, typed out for the live-state row and history rows.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TelemetryUpdate {
    pub timestamp: u64,
    pub lat: f64,
    pub lng: f64,
    pub altitude: i16,
    pub angle: u16,
    pub satellites: u8,
    pub speed: u16,
    pub ignition: Option<bool>,
    pub gsm_signal: Option<i64>,
    pub battery_voltage: Option<i64>,
    pub battery_current: Option<i64>,
    pub odometer_total: Option<i64>,
    pub odometer_trip: Option<i64>,
    pub engine_hours: Option<i64>,
    pub temperature: Option<i64>,
    pub fuel_level: Option<i64>,
}

impl TelemetryUpdate {
    pub fn from_record(record: &AvlRecord) -> Self {
        let io = &record.io;
        Self {
            timestamp: record.timestamp,
            lat: record.lat,
            lng: record.lng,
            altitude: record.altitude,
            angle: record.angle,
            satellites: record.satellites,
            speed: record.speed,
            ignition: io.get(&io_ids::IGNITION).map(|v| *v != 0),
            gsm_signal: io.get(&io_ids::GSM_SIGNAL).copied(),
            battery_voltage: io.get(&io_ids::BATTERY_VOLTAGE).copied(),
            battery_current: io.get(&io_ids::BATTERY_CURRENT).copied(),
            odometer_total: io.get(&io_ids::ODOMETER_TOTAL).copied(),
            odometer_trip: io.get(&io_ids::ODOMETER_TRIP).copied(),
            engine_hours: io.get(&io_ids::ENGINE_HOURS).copied(),
            temperature: io.get(&io_ids::TEMPERATURE).copied(),
            fuel_level: io.get(&io_ids::FUEL_LEVEL).copied(),
        }
    }
}

/// A stored evidentiary blob from a command frame.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SnapshotRecord {
    pub imei: String,
    pub timestamp: u64,
    pub kind: u8,
    pub url: String,
    #[serde(skip)]
    pub bytes: Vec<u8>,
}

/// Storage contract the protocol engine writes through. The relational
/// schema behind it belongs to another service; here it is the seam the
/// server and its tests share.
pub trait PersistenceGateway: Send + Sync + 'static {
    fn find_vehicle_by_imei(&self, imei: &str) -> Result<Option<Vehicle>>;

    /// Live-state upsert. Updates older than (or equal to) the stored
    /// `last_location_time` are ignored; history is unaffected either way.
    fn upsert_vehicle_telemetry(&self, imei: &str, update: &TelemetryUpdate) -> Result<()>;

    fn append_location_history(&self, vehicle_id: i64, update: &TelemetryUpdate) -> Result<()>;

    fn insert_behavior_event(&self, event: &BehaviorEvent) -> Result<()>;

    /// Store an evidentiary blob, returning its locator.
    fn save_snapshot(&self, imei: &str, timestamp: u64, kind: u8, bytes: &[u8]) -> Result<String>;
}

#[derive(Debug, Default)]
struct Store {
    vehicles: HashMap<String, Vehicle>,
    live: HashMap<i64, TelemetryUpdate>,
    history: Vec<(i64, TelemetryUpdate)>,
    events: Vec<BehaviorEvent>,
    snapshots: Vec<SnapshotRecord>,
}

/// In-memory gateway implementation. Snapshots are additionally written to
/// `snapshot_dir` when one is configured, with a JSON sidecar describing
/// the blob.
#[derive(Debug, Default)]
pub struct MemoryGateway {
    store: Mutex<Store>,
    snapshot_dir: Option<PathBuf>,
}

impl MemoryGateway {
    pub fn new(snapshot_dir: Option<PathBuf>) -> Self {
        Self {
            store: Mutex::new(Store::default()),
            snapshot_dir,
        }
    }

    fn store(&self) -> Result<MutexGuard<'_, Store>> {
        self.store
            .lock()
            .map_err(|_| Error::Persistence("store mutex poisoned".into()))
    }

    /// Seed one vehicle; stands in for the fleet CRUD service.
    pub fn register_vehicle(&self, vehicle: Vehicle) -> Result<()> {
        self.store()?.vehicles.insert(vehicle.imei.clone(), vehicle);
        Ok(())
    }

    pub fn live_state(&self, vehicle_id: i64) -> Result<Option<TelemetryUpdate>> {
        Ok(self.store()?.live.get(&vehicle_id).cloned())
    }

    pub fn history(&self) -> Result<Vec<(i64, TelemetryUpdate)>> {
        Ok(self.store()?.history.clone())
    }

    pub fn events(&self) -> Result<Vec<BehaviorEvent>> {
        Ok(self.store()?.events.clone())
    }

    pub fn snapshots(&self) -> Result<Vec<SnapshotRecord>> {
        Ok(self.store()?.snapshots.clone())
    }
}

impl PersistenceGateway for MemoryGateway {
    fn find_vehicle_by_imei(&self, imei: &str) -> Result<Option<Vehicle>> {
        Ok(self.store()?.vehicles.get(imei).cloned())
    }

    fn upsert_vehicle_telemetry(&self, imei: &str, update: &TelemetryUpdate) -> Result<()> {
        let mut store = self.store()?;
        let vehicle = store
            .vehicles
            .get_mut(imei)
            .ok_or_else(|| Error::Persistence(format!("no vehicle for imei {imei}")))?;
        if vehicle
            .last_location_time
            .is_some_and(|t| update.timestamp <= t)
        {
            // Late or duplicated record: keep the newer live state.
            return Ok(());
        }
        vehicle.last_location_time = Some(update.timestamp);
        let vehicle_id = vehicle.id;
        store.live.insert(vehicle_id, update.clone());
        Ok(())
    }

    fn append_location_history(&self, vehicle_id: i64, update: &TelemetryUpdate) -> Result<()> {
        self.store()?.history.push((vehicle_id, update.clone()));
        Ok(())
    }

    fn insert_behavior_event(&self, event: &BehaviorEvent) -> Result<()> {
        self.store()?.events.push(event.clone());
        Ok(())
    }

    fn save_snapshot(&self, imei: &str, timestamp: u64, kind: u8, bytes: &[u8]) -> Result<String> {
        let name = format!("{imei}-{timestamp}-{kind:02x}.bin");
        let url = match &self.snapshot_dir {
            Some(dir) => {
                std::fs::create_dir_all(dir)?;
                let path = dir.join(&name);
                std::fs::write(&path, bytes)?;
                let meta = serde_json::json!({
                    "imei": imei,
                    "timestamp": timestamp,
                    "type": kind,
                    "size": bytes.len(),
                });
                std::fs::write(path.with_extension("json"), serde_json::to_vec_pretty(&meta)?)?;
                path.display().to_string()
            }
            None => format!("mem://{name}"),
        };
        self.store()?.snapshots.push(SnapshotRecord {
            imei: imei.to_string(),
            timestamp,
            kind,
            url: url.clone(),
            bytes: bytes.to_vec(),
        });
        Ok(url)
    }
}

/// One queued storage write. Jobs from one connection execute strictly in
/// enqueue order, which is what keeps per-vehicle history ordered.
#[derive(Debug)]
pub enum PersistJob {
    History {
        vehicle_id: i64,
        update: TelemetryUpdate,
    },
    UpsertLive {
        imei: String,
        update: TelemetryUpdate,
    },
    Event(BehaviorEvent),
    Snapshot {
        imei: String,
        timestamp: u64,
        kind: u8,
        bytes: Vec<u8>,
    },
}

/// Depth of each connection's write queue. A slow backend backpressures
/// its own connection once this fills, instead of stalling socket reads
/// for everyone.
pub const PERSIST_QUEUE_DEPTH: usize = 256;

/// Spawn the writer task for one connection. Dropping the sender drains the
/// queue and ends the task; a storage failure drops that write, logs, and
/// keeps going — the device has already been ACKed by then.
pub fn spawn_writer<G: PersistenceGateway>(
    gateway: Arc<G>,
) -> (mpsc::Sender<PersistJob>, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::channel(PERSIST_QUEUE_DEPTH);
    let handle = tokio::spawn(async move {
        while let Some(job) = rx.recv().await {
            if let Err(err) = apply(gateway.as_ref(), job) {
                error!(%err, "persistence write failed, record dropped");
            }
        }
    });
    (tx, handle)
}

fn apply<G: PersistenceGateway>(gateway: &G, job: PersistJob) -> Result<()> {
    match job {
        PersistJob::History { vehicle_id, update } => {
            gateway.append_location_history(vehicle_id, &update)
        }
        PersistJob::UpsertLive { imei, update } => gateway.upsert_vehicle_telemetry(&imei, &update),
        PersistJob::Event(event) => gateway.insert_behavior_event(&event),
        PersistJob::Snapshot {
            imei,
            timestamp,
            kind,
            bytes,
        } => gateway
            .save_snapshot(&imei, timestamp, kind, &bytes)
            .map(|_| ()),
    }
}
