use super::reader::ByteReader;
use crate::Result;

/// Codec ids carrying command responses / reports instead of AVL records.
pub const COMMAND_CODECS: [u8; 3] = [12, 13, 15];

/// Response types whose payload is either a DSM text report or an
/// evidentiary snapshot blob.
pub fn carries_report(kind: u8) -> bool {
    matches!(kind, 0x05 | 0x06)
}

/// Command/report message carried by codecs 12, 13 and 15.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandMessage {
    pub codec_id: u8,
    pub kind: u8,
    pub payload: Vec<u8>,
}

/// Body layout after the frame header: `[type(1)][payloadLength u32][payload]`.
pub fn decode_command(codec_id: u8, body: &[u8]) -> Result<CommandMessage> {
    let mut r = ByteReader::new(body);
    let kind = r.read_u8()?;
    let len = r.read_u32()? as usize;
    let payload = r.take(len)?.to_vec();
    Ok(CommandMessage {
        codec_id,
        kind,
        payload,
    })
}
