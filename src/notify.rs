use crate::Result;
use crate::persist::Vehicle;
use tracing::info;

/// Outbound push collaborator. Fire-and-forget from the protocol loop's
/// perspective: the caller logs failures and moves on, the read loop never
/// waits on delivery.
pub trait NotificationService: Send + Sync + 'static {
    fn send_speeding_alert(&self, vehicle: &Vehicle, speed: u16, timestamp: u64) -> Result<()>;
}

/// Stand-in service that writes alerts to the log.
#[derive(Debug, Default)]
pub struct LogNotifier;

impl NotificationService for LogNotifier {
    fn send_speeding_alert(&self, vehicle: &Vehicle, speed: u16, timestamp: u64) -> Result<()> {
        info!(
            imei = %vehicle.imei,
            vehicle_id = vehicle.id,
            speed,
            timestamp,
            "speeding alert"
        );
        Ok(())
    }
}
