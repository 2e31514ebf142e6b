use crate::{Error, Result};

/// Bounds-checked big-endian cursor over one frame's bytes. Every read that
/// would run past the end returns `Error::FrameIncomplete` instead of
/// panicking, so a truncated record can never take the connection down.
pub struct ByteReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn pos(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let buf: &'a [u8] = self.buf;
        let end = self.pos.checked_add(n).ok_or(Error::FrameIncomplete)?;
        let slice = buf.get(self.pos..end).ok_or(Error::FrameIncomplete)?;
        self.pos = end;
        Ok(slice)
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    pub fn read_u16(&mut self) -> Result<u16> {
        Ok(u16::from_be_bytes(self.take(2)?.try_into()?))
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        Ok(u32::from_be_bytes(self.take(4)?.try_into()?))
    }

    pub fn read_u64(&mut self) -> Result<u64> {
        Ok(u64::from_be_bytes(self.take(8)?.try_into()?))
    }

    pub fn read_i8(&mut self) -> Result<i8> {
        Ok(self.take(1)?[0] as i8)
    }

    pub fn read_i16(&mut self) -> Result<i16> {
        Ok(i16::from_be_bytes(self.take(2)?.try_into()?))
    }

    pub fn read_i32(&mut self) -> Result<i32> {
        Ok(i32::from_be_bytes(self.take(4)?.try_into()?))
    }

    pub fn read_i64(&mut self) -> Result<i64> {
        Ok(i64::from_be_bytes(self.take(8)?.try_into()?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_advance_in_order() {
        let mut r = ByteReader::new(&[0x01, 0x00, 0x02, 0xff, 0xff, 0xff, 0xfe]);
        assert_eq!(r.read_u8().unwrap(), 1);
        assert_eq!(r.read_u16().unwrap(), 2);
        assert_eq!(r.read_i32().unwrap(), -2);
        assert_eq!(r.remaining(), 0);
    }

    #[test]
    fn short_read_is_frame_incomplete() {
        let mut r = ByteReader::new(&[0x01, 0x02]);
        assert!(matches!(r.read_u32(), Err(Error::FrameIncomplete)));
        // position untouched by the failed read
        assert_eq!(r.pos(), 0);
    }
}
