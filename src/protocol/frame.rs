use crate::Result;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use regex::Regex;
use std::sync::OnceLock;
use tokio_util::codec::{Decoder, Encoder};
use tracing::debug;

/// Envelope overhead around the data region: preamble(4) + length(4) + crc(4).
const FRAME_OVERHEAD: usize = 12;

/// Smallest data region that can hold a frame header: codec id, record
/// count, record count repeat.
const MIN_DATA_LENGTH: usize = 3;

/// Largest declared data length we will buffer for. Anything bigger is line
/// noise with an accidental zero preamble, and is resynchronized past.
const MAX_DATA_LENGTH: usize = 1 << 20;

/// IMEIs are 15 digits in the wild; the handshake heuristic tolerates up to
/// this many before calling the length field garbage.
const MAX_IMEI_LENGTH: usize = 50;

fn imei_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\d+$").expect("valid pattern"))
}

/// One unit extracted from the inbound byte stream.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// Initial or repeated identity announcement from the device.
    Handshake { imei: String },
    /// One complete AVL envelope, preamble through CRC.
    Data(RawFrame),
}

/// A complete AVL frame as sliced off the stream. Accessors are safe: the
/// decoder only constructs one once the whole envelope is buffered.
#[derive(Debug, Clone, PartialEq)]
pub struct RawFrame {
    bytes: Bytes,
}

impl RawFrame {
    pub(crate) fn new(bytes: Bytes) -> Self {
        debug_assert!(bytes.len() >= FRAME_OVERHEAD + MIN_DATA_LENGTH);
        Self { bytes }
    }

    pub fn codec_id(&self) -> u8 {
        self.bytes[8]
    }

    /// Record count for codec 8/8E, response quantity for command codecs.
    pub fn record_count(&self) -> u8 {
        self.bytes[9]
    }

    /// The region between the record count and its trailing repeat.
    pub fn body(&self) -> &[u8] {
        &self.bytes[10..self.bytes.len() - 5]
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }
}

/// Replies written back to the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ack {
    /// Single-byte handshake accept.
    Accept,
    /// Count of records in the frame just processed.
    Records(u32),
}

enum HandshakeMatch {
    /// Length field plausible but the payload is not fully buffered yet.
    NeedMore,
    /// The first `consumed` bytes form an IMEI announcement.
    Imei { consumed: usize, imei: String },
    /// Cannot be a handshake at this position.
    No,
}

/// The heuristic that tells an IMEI announcement apart from unsynchronized
/// noise: a 2-byte length in (0, 50] followed by that many ASCII digits.
/// Whether devices ever legitimately re-send their IMEI mid-stream is an
/// open question; this stays a resync safety net either way.
fn match_handshake(buf: &[u8]) -> HandshakeMatch {
    if buf.len() < 2 {
        return HandshakeMatch::NeedMore;
    }
    let declared = u16::from_be_bytes([buf[0], buf[1]]) as usize;
    if declared == 0 || declared > MAX_IMEI_LENGTH {
        return HandshakeMatch::No;
    }
    if buf.len() < 2 + declared {
        return HandshakeMatch::NeedMore;
    }
    match std::str::from_utf8(&buf[2..2 + declared]) {
        Ok(s) if imei_pattern().is_match(s) => HandshakeMatch::Imei {
            consumed: 2 + declared,
            imei: s.to_string(),
        },
        _ => HandshakeMatch::No,
    }
}

/// Stream framer for one device connection. Accumulates raw bytes, yields
/// handshakes and complete AVL frames, and resynchronizes one byte at a
/// time when the stream does not line up with a known frame shape — a
/// malformed chunk costs at most its own length, never the connection.
#[derive(Debug, Default)]
pub struct AvlFrameCodec {
    identified: bool,
}

impl AvlFrameCodec {
    pub fn new() -> Self {
        Self { identified: false }
    }
}

impl Decoder for AvlFrameCodec {
    type Item = Frame;
    type Error = crate::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>> {
        // Nothing is interpreted as AVL data until the device has announced
        // an IMEI; the first inbound bytes must be the handshake.
        if !self.identified {
            loop {
                match match_handshake(src) {
                    HandshakeMatch::NeedMore => return Ok(None),
                    HandshakeMatch::Imei { consumed, imei } => {
                        src.advance(consumed);
                        self.identified = true;
                        return Ok(Some(Frame::Handshake { imei }));
                    }
                    HandshakeMatch::No => src.advance(1),
                }
            }
        }

        while src.len() >= FRAME_OVERHEAD {
            let preamble = u32::from_be_bytes(src[..4].try_into()?);
            if preamble == 0 {
                let data_len = u32::from_be_bytes(src[4..8].try_into()?) as usize;
                if !(MIN_DATA_LENGTH..=MAX_DATA_LENGTH).contains(&data_len) {
                    debug!(data_len, "implausible declared length, resynchronizing");
                    src.advance(1);
                    continue;
                }
                let total = data_len + FRAME_OVERHEAD;
                if src.len() < total {
                    // Partial frame: consume nothing, wait for more bytes.
                    return Ok(None);
                }
                let frame = src.split_to(total).freeze();
                return Ok(Some(Frame::Data(RawFrame::new(frame))));
            }
            // Not a data-frame preamble: either the device re-announced its
            // IMEI, or we are looking at noise.
            match match_handshake(src) {
                HandshakeMatch::Imei { consumed, imei } => {
                    src.advance(consumed);
                    return Ok(Some(Frame::Handshake { imei }));
                }
                HandshakeMatch::NeedMore => return Ok(None),
                HandshakeMatch::No => src.advance(1),
            }
        }
        Ok(None)
    }
}

impl Encoder<Ack> for AvlFrameCodec {
    type Error = crate::Error;

    fn encode(&mut self, item: Ack, dst: &mut BytesMut) -> Result<()> {
        match item {
            Ack::Accept => dst.put_u8(0x01),
            Ack::Records(n) => dst.put_u32(n),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const IMEI: &str = "123456789012345";

    fn handshake_bytes(imei: &str) -> Vec<u8> {
        let mut out = (imei.len() as u16).to_be_bytes().to_vec();
        out.extend_from_slice(imei.as_bytes());
        out
    }

    /// Minimal envelope around an arbitrary data region (codec id, count,
    /// body, count repeat). CRC is zeroed; the server never checks it.
    fn data_frame(codec_id: u8, count: u8, body: &[u8]) -> Vec<u8> {
        let data_len = body.len() + 3;
        let mut out = vec![0, 0, 0, 0];
        out.extend_from_slice(&(data_len as u32).to_be_bytes());
        out.push(codec_id);
        out.push(count);
        out.extend_from_slice(body);
        out.push(count);
        out.extend_from_slice(&[0, 0, 0, 0]);
        out
    }

    fn identified_codec() -> (AvlFrameCodec, BytesMut) {
        let mut codec = AvlFrameCodec::new();
        let mut buf = BytesMut::from(&handshake_bytes(IMEI)[..]);
        let frame = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(frame, Frame::Handshake { imei: IMEI.into() });
        assert!(buf.is_empty());
        (codec, buf)
    }

    #[test]
    fn initial_handshake_example() {
        let mut codec = AvlFrameCodec::new();
        let mut buf = BytesMut::new();
        buf.put_u8(0x00);
        buf.put_u8(0x0f);
        buf.extend_from_slice(b"123456789012345");
        let frame = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(frame, Frame::Handshake { imei: IMEI.into() });
    }

    #[test]
    fn handshake_waits_for_payload() {
        let mut codec = AvlFrameCodec::new();
        let mut buf = BytesMut::from(&handshake_bytes(IMEI)[..5]);
        assert_eq!(codec.decode(&mut buf).unwrap(), None);
        buf.extend_from_slice(&handshake_bytes(IMEI)[5..]);
        assert!(codec.decode(&mut buf).unwrap().is_some());
    }

    #[test]
    fn garbage_before_handshake_is_skipped() {
        let mut codec = AvlFrameCodec::new();
        let mut buf = BytesMut::from(&[0xde, 0xad, 0xbe, 0xef][..]);
        buf.extend_from_slice(&handshake_bytes(IMEI));
        let frame = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(frame, Frame::Handshake { imei: IMEI.into() });
    }

    #[test]
    fn non_digit_identity_is_noise() {
        let mut codec = AvlFrameCodec::new();
        let mut payload = vec![0x00, 0x05];
        payload.extend_from_slice(b"abc12");
        let mut buf = BytesMut::from(&payload[..]);
        assert_eq!(codec.decode(&mut buf).unwrap(), None);
        assert!(!codec.identified);
    }

    #[test]
    fn whole_data_frame_extracted() {
        let (mut codec, mut buf) = identified_codec();
        let frame = data_frame(0x08, 1, &[0xaa, 0xbb, 0xcc]);
        buf.extend_from_slice(&frame);
        match codec.decode(&mut buf).unwrap().unwrap() {
            Frame::Data(raw) => {
                assert_eq!(raw.codec_id(), 0x08);
                assert_eq!(raw.record_count(), 1);
                assert_eq!(raw.body(), &[0xaa, 0xbb, 0xcc]);
                assert_eq!(raw.len(), frame.len());
            }
            other => panic!("expected data frame, got {other:?}"),
        }
        assert!(buf.is_empty());
    }

    #[test]
    fn partial_data_frame_consumes_nothing() {
        let (mut codec, mut buf) = identified_codec();
        let frame = data_frame(0x08, 1, &[0xaa, 0xbb, 0xcc]);
        for split in 1..frame.len() {
            buf.clear();
            buf.extend_from_slice(&frame[..split]);
            let before = buf.len();
            assert_eq!(codec.decode(&mut buf).unwrap(), None, "split at {split}");
            assert_eq!(buf.len(), before, "split at {split}");
        }
    }

    #[test]
    fn byte_at_a_time_feed_yields_one_frame() {
        let (mut codec, mut buf) = identified_codec();
        let frame = data_frame(0x8e, 2, &[1, 2, 3, 4, 5]);
        let mut decoded = Vec::new();
        for byte in &frame {
            buf.put_u8(*byte);
            if let Some(f) = codec.decode(&mut buf).unwrap() {
                decoded.push(f);
            }
        }
        assert_eq!(decoded.len(), 1);
        match &decoded[0] {
            Frame::Data(raw) => assert_eq!(raw.record_count(), 2),
            other => panic!("expected data frame, got {other:?}"),
        }
    }

    #[test]
    fn resynchronizes_within_garbage_length() {
        let (mut codec, mut buf) = identified_codec();
        let garbage = [0xde, 0xad, 0xbe, 0xef, 0xfe, 0xed, 0xfa, 0xce];
        buf.extend_from_slice(&garbage);
        buf.extend_from_slice(&data_frame(0x08, 1, &[9, 9, 9]));
        match codec.decode(&mut buf).unwrap().unwrap() {
            Frame::Data(raw) => assert_eq!(raw.body(), &[9, 9, 9]),
            other => panic!("expected data frame, got {other:?}"),
        }
        assert!(buf.is_empty());
    }

    #[test]
    fn oversized_declared_length_is_noise() {
        let (mut codec, mut buf) = identified_codec();
        // Zero preamble followed by an absurd length must not stall the
        // stream waiting for megabytes that will never come.
        buf.extend_from_slice(&[0, 0, 0, 0, 0xff, 0xff, 0xff, 0xff]);
        buf.extend_from_slice(&handshake_bytes("860000000000001"));
        let frame = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(
            frame,
            Frame::Handshake {
                imei: "860000000000001".into()
            }
        );
    }

    #[test]
    fn rehandshake_mid_stream() {
        let (mut codec, mut buf) = identified_codec();
        buf.extend_from_slice(&data_frame(0x08, 1, &[1, 2, 3]));
        buf.extend_from_slice(&handshake_bytes("860000000000002"));
        assert!(matches!(
            codec.decode(&mut buf).unwrap().unwrap(),
            Frame::Data(_)
        ));
        let frame = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(
            frame,
            Frame::Handshake {
                imei: "860000000000002".into()
            }
        );
    }

    #[test]
    fn ack_encoding() {
        let mut codec = AvlFrameCodec::new();
        let mut buf = BytesMut::new();
        codec.encode(Ack::Accept, &mut buf).unwrap();
        assert_eq!(buf.as_ref(), &[0x01]);
        buf.clear();
        codec.encode(Ack::Records(1), &mut buf).unwrap();
        assert_eq!(buf.as_ref(), &[0x00, 0x00, 0x00, 0x01]);
    }
}
