use super::AvlCodec;
use super::io::decode_io_elements;
use super::reader::ByteReader;
use crate::{Error, Result};
use serde::Serialize;
use std::collections::HashMap;

/// 2020-01-01T00:00:00Z in ms. Trackers with a dead RTC report epochs far
/// in the past; persisting those poisons the history ordering.
pub const MIN_TIMESTAMP_MS: u64 = 1_577_836_800_000;
/// 2100-01-01T00:00:00Z in ms.
pub const MAX_TIMESTAMP_MS: u64 = 4_102_444_800_000;

/// One decoded AVL record. Coordinates are degrees (raw i32 ÷ 1e7), speed
/// is km/h, `io` holds every IO element keyed by its id normalized to u16.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AvlRecord {
    pub timestamp: u64,
    pub priority: u8,
    pub lng: f64,
    pub lat: f64,
    pub altitude: i16,
    pub angle: u16,
    pub satellites: u8,
    pub speed: u16,
    pub io: HashMap<u16, i64>,
}

impl AvlRecord {
    /// Records without a GPS fix come through as all-zero coordinates.
    pub fn has_fix(&self) -> bool {
        self.lat != 0.0 || self.lng != 0.0
    }
}

/// Decode one record at the reader's position. The event IO id and total IO
/// count fields are frame metadata and are skipped, not folded into `io`.
pub fn decode_record(r: &mut ByteReader, codec: AvlCodec) -> Result<AvlRecord> {
    let timestamp = r.read_u64()?;
    if !(MIN_TIMESTAMP_MS..MAX_TIMESTAMP_MS).contains(&timestamp) {
        return Err(Error::TimestampOutOfRange(timestamp));
    }
    let priority = r.read_u8()?;
    let lng = r.read_i32()? as f64 / 1e7;
    let lat = r.read_i32()? as f64 / 1e7;
    let altitude = r.read_i16()?;
    let angle = r.read_u16()?;
    let satellites = r.read_u8()?;
    let speed = r.read_u16()?;
    match codec {
        AvlCodec::Codec8 => {
            r.read_u8()?;
            r.read_u8()?;
        }
        AvlCodec::Codec8Ext => {
            r.read_u16()?;
            r.read_u16()?;
        }
    }
    let io = decode_io_elements(r, codec)?;
    Ok(AvlRecord {
        timestamp,
        priority,
        lng,
        lat,
        altitude,
        angle,
        satellites,
        speed,
        io,
    })
}


#[cfg(test)]
mod tests {
    use super::testdata::{TS, record_bytes, sample_record};
    use super::*;

    #[test]
    fn codec8_record_round_trip() {
        let record = sample_record(150, &[(239, 1), (67, 12188), (16, 1234567)]);
        let bytes = record_bytes(AvlCodec::Codec8, &record);
        let mut r = ByteReader::new(&bytes);
        let decoded = decode_record(&mut r, AvlCodec::Codec8).unwrap();
        assert_eq!(decoded.timestamp, TS);
        assert_eq!(decoded.speed, 150);
        assert_eq!(decoded.satellites, 11);
        assert!((decoded.lat - 52.5214447).abs() < 1e-6);
        assert!((decoded.lng - 13.3138893).abs() < 1e-6);
        assert_eq!(decoded.io, record.io);
        assert_eq!(r.remaining(), 0);
    }

    #[test]
    fn codec8ext_record_round_trip() {
        let record = sample_record(64, &[(11700, 1), (102, 300)]);
        let bytes = record_bytes(AvlCodec::Codec8Ext, &record);
        let mut r = ByteReader::new(&bytes);
        let decoded = decode_record(&mut r, AvlCodec::Codec8Ext).unwrap();
        assert_eq!(decoded.io, record.io);
        assert_eq!(r.remaining(), 0);
    }

    #[test]
    fn negative_altitude_and_southern_coordinates() {
        let mut record = sample_record(30, &[]);
        record.lat = -33.8688197;
        record.lng = -70.6692655;
        record.altitude = -12;
        let bytes = record_bytes(AvlCodec::Codec8, &record);
        let mut r = ByteReader::new(&bytes);
        let decoded = decode_record(&mut r, AvlCodec::Codec8).unwrap();
        assert!((decoded.lat + 33.8688197).abs() < 1e-6);
        assert!((decoded.lng + 70.6692655).abs() < 1e-6);
        assert_eq!(decoded.altitude, -12);
    }

    #[test]
    fn ancient_timestamp_is_rejected() {
        let mut record = sample_record(10, &[]);
        record.timestamp = 946_684_800_000; // year 2000
        let bytes = record_bytes(AvlCodec::Codec8, &record);
        let mut r = ByteReader::new(&bytes);
        assert!(matches!(
            decode_record(&mut r, AvlCodec::Codec8),
            Err(Error::TimestampOutOfRange(_))
        ));
    }

    #[test]
    fn far_future_timestamp_is_rejected() {
        let mut record = sample_record(10, &[]);
        record.timestamp = MAX_TIMESTAMP_MS;
        let bytes = record_bytes(AvlCodec::Codec8, &record);
        let mut r = ByteReader::new(&bytes);
        assert!(matches!(
            decode_record(&mut r, AvlCodec::Codec8),
            Err(Error::TimestampOutOfRange(_))
        ));
    }

    #[test]
    fn zero_coordinates_mean_no_fix() {
        let mut record = sample_record(10, &[]);
        record.lat = 0.0;
        record.lng = 0.0;
        assert!(!record.has_fix());
        assert!(sample_record(10, &[]).has_fix());
    }
}
