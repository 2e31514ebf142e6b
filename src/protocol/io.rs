use super::AvlCodec;
use super::reader::ByteReader;
use crate::Result;
use crate::events;
use std::collections::HashMap;
use tracing::debug;

fn read_count(r: &mut ByteReader, codec: AvlCodec) -> Result<usize> {
    match codec {
        AvlCodec::Codec8 => Ok(r.read_u8()? as usize),
        AvlCodec::Codec8Ext => Ok(r.read_u16()? as usize),
    }
}

fn read_id(r: &mut ByteReader, codec: AvlCodec) -> Result<u16> {
    match codec {
        AvlCodec::Codec8 => Ok(r.read_u8()? as u16),
        AvlCodec::Codec8Ext => r.read_u16(),
    }
}

/// One fixed-width IO group: a count field, then that many `(id, value)`
/// pairs. Values are sign-interpreted at their wire width.
fn decode_fixed_group(
    r: &mut ByteReader,
    codec: AvlCodec,
    value_width: usize,
    io: &mut HashMap<u16, i64>,
) -> Result<()> {
    let count = read_count(r, codec)?;
    for _ in 0..count {
        let id = read_id(r, codec)?;
        let value = match value_width {
            1 => r.read_i8()? as i64,
            2 => r.read_i16()? as i64,
            4 => r.read_i32()? as i64,
            _ => r.read_i64()?,
        };
        io.insert(id, value);
    }
    Ok(())
}

/// Codec 8 Extended variable-length IOs: `(2-byte id, 2-byte length, raw
/// bytes)`. Some DSM firmware reports fatigue events as free text here
/// instead of a numeric IO code; recognized keywords are folded back into
/// the value map under their numeric code so everything downstream sees one
/// shape. This shim is deliberate compatibility behavior, keep it.
fn decode_variable_group(r: &mut ByteReader, io: &mut HashMap<u16, i64>) -> Result<()> {
    let count = r.read_u16()? as usize;
    for _ in 0..count {
        let id = r.read_u16()?;
        let len = r.read_u16()? as usize;
        let raw = r.take(len)?;
        let text = printable_ascii(raw);
        match events::fatigue_event_for_text(&text).and_then(events::primary_dsm_code) {
            Some(code) => {
                io.insert(code, 1);
            }
            None => debug!(id, len, "variable IO without recognized keyword"),
        }
    }
    Ok(())
}

/// Decode all IO groups of one record: the four fixed value widths, plus
/// the variable-length group for Codec 8 Extended. IDs are normalized to
/// `u16` regardless of their wire width.
pub fn decode_io_elements(r: &mut ByteReader, codec: AvlCodec) -> Result<HashMap<u16, i64>> {
    let mut io = HashMap::new();
    for value_width in [1, 2, 4, 8] {
        decode_fixed_group(r, codec, value_width, &mut io)?;
    }
    if codec == AvlCodec::Codec8Ext {
        decode_variable_group(r, &mut io)?;
    }
    Ok(io)
}

/// Keep the printable ASCII range, drop everything else.
pub fn printable_ascii(raw: &[u8]) -> String {
    raw.iter()
        .copied()
        .filter(|b| (0x20..=0x7e).contains(b))
        .map(char::from)
        .collect()
}
