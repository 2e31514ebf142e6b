use crate::persist::Vehicle;
use crate::protocol::record::AvlRecord;
use derive_more::Display;
use serde::Serialize;
use tracing::warn;

/// Default speeding threshold in km/h, overridable from configuration.
pub const DEFAULT_SPEED_LIMIT_KMH: u16 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, Serialize)]
pub enum EventType {
    #[display("SPEEDING")]
    Speeding,
    #[display("DROWSINESS")]
    Drowsiness,
    #[display("DISTRACTION")]
    Distraction,
    #[display("YAWNING")]
    Yawning,
    #[display("PHONE_USAGE")]
    PhoneUsage,
    #[display("SMOKING")]
    Smoking,
    #[display("DRIVER_ABSENCE")]
    DriverAbsence,
}

/// One derived safety event. Append-only: persisted once, never updated.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BehaviorEvent {
    pub vehicle_id: i64,
    pub driver_id: Option<i64>,
    pub event_type: EventType,
    pub value: i64,
    pub timestamp: u64,
}

/// Well-known telemetry IO ids (Teltonika AVL id set).
pub mod io_ids {
    pub const ODOMETER_TOTAL: u16 = 16;
    pub const GSM_SIGNAL: u16 = 21;
    pub const FUEL_LEVEL: u16 = 30;
    pub const BATTERY_VOLTAGE: u16 = 67;
    pub const BATTERY_CURRENT: u16 = 68;
    pub const TEMPERATURE: u16 = 72;
    pub const ENGINE_HOURS: u16 = 102;
    pub const ODOMETER_TRIP: u16 = 199;
    pub const IGNITION: u16 = 239;
}

/// Movon DSM event IO ids. Two firmware generations report the same events
/// under different code blocks; both map to the same event types.
const DSM_CODES: [(u16, u16, EventType); 6] = [
    (11700, 12923, EventType::Drowsiness),
    (11701, 12924, EventType::Distraction),
    (11702, 12925, EventType::Yawning),
    (11703, 12926, EventType::PhoneUsage),
    (11704, 12927, EventType::Smoking),
    (11705, 12928, EventType::DriverAbsence),
];

/// Keywords some DSM firmware emits as free text instead of numeric codes.
const DSM_KEYWORDS: [(&str, EventType); 6] = [
    ("Drowsiness", EventType::Drowsiness),
    ("Distraction", EventType::Distraction),
    ("Yawning", EventType::Yawning),
    ("Phone", EventType::PhoneUsage),
    ("Smoking", EventType::Smoking),
    ("Absence", EventType::DriverAbsence),
];

/// Fatigue event type for a DSM IO id, either firmware generation.
pub fn fatigue_event_for_io(id: u16) -> Option<EventType> {
    DSM_CODES
        .iter()
        .find(|(a, b, _)| *a == id || *b == id)
        .map(|(_, _, event)| *event)
}

/// Scan free text for a DSM keyword.
pub fn fatigue_event_for_text(text: &str) -> Option<EventType> {
    DSM_KEYWORDS
        .iter()
        .find(|(keyword, _)| text.contains(keyword))
        .map(|(_, event)| *event)
}

/// The numeric IO code a fatigue event is normalized to when it arrived as
/// text instead of a code.
pub fn primary_dsm_code(event: EventType) -> Option<u16> {
    DSM_CODES
        .iter()
        .find(|(_, _, e)| *e == event)
        .map(|(primary, _, _)| *primary)
}

/// Map one decoded record to the safety events it implies. Rules fire
/// independently; a single record can produce several events.
pub fn derive_events(record: &AvlRecord, vehicle: &Vehicle, speed_limit_kmh: u16) -> Vec<BehaviorEvent> {
    let mut events = Vec::new();

    if record.speed > speed_limit_kmh {
        events.push(BehaviorEvent {
            vehicle_id: vehicle.id,
            driver_id: vehicle.driver_id,
            event_type: EventType::Speeding,
            value: record.speed as i64,
            timestamp: record.timestamp,
        });
    }

    for (&id, &value) in &record.io {
        let Some(event_type) = fatigue_event_for_io(id) else {
            continue;
        };
        if value != 1 {
            continue;
        }
        let Some(driver_id) = vehicle.driver_id else {
            // Never invent a driver for a driver-monitoring event.
            warn!(
                imei = %vehicle.imei,
                %event_type,
                "fatigue event on vehicle without assigned driver, dropped"
            );
            continue;
        };
        events.push(BehaviorEvent {
            vehicle_id: vehicle.id,
            driver_id: Some(driver_id),
            event_type,
            value,
            timestamp: record.timestamp,
        });
    }

    events
}
