use crate::events::{self, BehaviorEvent, EventType};
use crate::notify::NotificationService;
use crate::persist::{PersistJob, PersistenceGateway, TelemetryUpdate, Vehicle};
use crate::protocol::AvlCodec;
use crate::protocol::command::{COMMAND_CODECS, carries_report, decode_command};
use crate::protocol::frame::{Ack, RawFrame};
use crate::protocol::io::printable_ascii;
use crate::protocol::reader::ByteReader;
use crate::protocol::record::decode_record;
use crate::throttle::NotificationThrottle;
use crate::{Error, Result};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Everything one connection needs besides its socket.
pub struct SessionContext<G, N> {
    pub gateway: Arc<G>,
    pub notifier: Arc<N>,
    pub throttle: Arc<NotificationThrottle>,
    pub speed_limit_kmh: u16,
}

/// Route one extracted frame and return the ACK to write back. Decode and
/// storage problems are logged and absorbed here; the device is always
/// answered so its retransmission logic cannot wedge.
pub async fn dispatch_frame<G: PersistenceGateway, N: NotificationService>(
    ctx: &SessionContext<G, N>,
    writer: &mpsc::Sender<PersistJob>,
    imei: &str,
    frame: &RawFrame,
) -> Ack {
    let codec_id = frame.codec_id();
    let declared = frame.record_count() as u32;
    match AvlCodec::from_id(codec_id) {
        Some(codec) => {
            process_records(ctx, writer, imei, frame, codec).await;
            Ack::Records(declared)
        }
        None if COMMAND_CODECS.contains(&codec_id) => {
            if let Err(err) = process_command(ctx, writer, imei, frame).await {
                warn!(imei, codec_id, %err, "command frame dropped");
            }
            Ack::Records(declared)
        }
        None => {
            warn!(imei, codec_id, "unknown codec id, acknowledged without decoding");
            Ack::Records(declared)
        }
    }
}

async fn process_records<G: PersistenceGateway, N: NotificationService>(
    ctx: &SessionContext<G, N>,
    writer: &mpsc::Sender<PersistJob>,
    imei: &str,
    frame: &RawFrame,
    codec: AvlCodec,
) {
    let mut reader = ByteReader::new(frame.body());
    for index in 0..frame.record_count() {
        let record = match decode_record(&mut reader, codec) {
            Ok(record) => record,
            Err(Error::TimestampOutOfRange(ts)) => {
                // A corrupt timestamp means the record boundary has
                // drifted; everything after it would misparse.
                warn!(imei, index, ts, "corrupt timestamp, dropping rest of frame");
                return;
            }
            Err(err) => {
                warn!(imei, index, %err, "record decode failed, dropping rest of frame");
                return;
            }
        };

        if !record.has_fix() {
            debug!(imei, index, "record without GPS fix, skipped");
            continue;
        }
        let vehicle = match ctx.gateway.find_vehicle_by_imei(imei) {
            Ok(Some(vehicle)) => vehicle,
            Ok(None) => {
                warn!(imei, "no vehicle registered for device, record dropped");
                continue;
            }
            Err(err) => {
                warn!(imei, %err, "vehicle lookup failed, record dropped");
                continue;
            }
        };

        let update = TelemetryUpdate::from_record(&record);
        send_job(
            writer,
            PersistJob::History {
                vehicle_id: vehicle.id,
                update: update.clone(),
            },
        )
        .await;
        send_job(
            writer,
            PersistJob::UpsertLive {
                imei: imei.to_string(),
                update,
            },
        )
        .await;

        for event in events::derive_events(&record, &vehicle, ctx.speed_limit_kmh) {
            let speeding = event.event_type == EventType::Speeding;
            send_job(writer, PersistJob::Event(event)).await;
            if speeding {
                notify_speeding(ctx, &vehicle, record.speed, record.timestamp).await;
            }
        }
    }
}

async fn process_command<G: PersistenceGateway, N: NotificationService>(
    ctx: &SessionContext<G, N>,
    writer: &mpsc::Sender<PersistJob>,
    imei: &str,
    frame: &RawFrame,
) -> Result<()> {
    let message = decode_command(frame.codec_id(), frame.body())?;
    if !carries_report(message.kind) {
        debug!(imei, kind = message.kind, "command type without report payload, ignored");
        return Ok(());
    }
    let text = printable_ascii(&message.payload);
    match events::fatigue_event_for_text(&text) {
        Some(event_type) => {
            // Command reports carry no GPS timestamp; stamp on arrival.
            let Some(vehicle) = ctx.gateway.find_vehicle_by_imei(imei)? else {
                warn!(imei, %event_type, "report for unregistered device, dropped");
                return Ok(());
            };
            send_job(
                writer,
                PersistJob::Event(BehaviorEvent {
                    vehicle_id: vehicle.id,
                    driver_id: vehicle.driver_id,
                    event_type,
                    value: 1,
                    timestamp: now_ms(),
                }),
            )
            .await;
        }
        None => {
            // No keyword: the payload is an evidentiary blob (DSM camera
            // snapshot), stored as-is.
            send_job(
                writer,
                PersistJob::Snapshot {
                    imei: imei.to_string(),
                    timestamp: now_ms(),
                    kind: message.kind,
                    bytes: message.payload,
                },
            )
            .await;
        }
    }
    Ok(())
}

async fn notify_speeding<G: PersistenceGateway, N: NotificationService>(
    ctx: &SessionContext<G, N>,
    vehicle: &Vehicle,
    speed: u16,
    timestamp: u64,
) {
    if !ctx.throttle.should_notify(&vehicle.imei).await {
        debug!(imei = %vehicle.imei, "speeding alert suppressed by cooldown");
        return;
    }
    match ctx.notifier.send_speeding_alert(vehicle, speed, timestamp) {
        Ok(()) => ctx.throttle.mark_sent(&vehicle.imei).await,
        Err(err) => warn!(imei = %vehicle.imei, %err, "speeding alert failed"),
    }
}

async fn send_job(writer: &mpsc::Sender<PersistJob>, job: PersistJob) {
    if writer.send(job).await.is_err() {
        warn!("persistence writer gone, write dropped");
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}
