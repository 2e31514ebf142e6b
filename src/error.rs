use std::array::TryFromSliceError;

pub type Result<T> = core::result::Result<T, Error>;

#[derive(Debug)]
pub enum Error {
    General(String),
    /// A read would run past the end of the current frame. Aborts the
    /// record being decoded, never the connection.
    FrameIncomplete,
    /// Decoded timestamp outside the accepted calendar window. Implies the
    /// record boundary has drifted, so the rest of the frame is dropped too.
    TimestampOutOfRange(u64),
    Persistence(String),
    Io(std::io::Error),
    Serde(serde_json::Error),
    InvalidBinaryFormat(TryFromSliceError),
}

impl core::fmt::Display for Error {
    fn fmt(&self, fmt: &mut core::fmt::Formatter) -> core::result::Result<(), core::fmt::Error> {
        write!(fmt, "{self:?}")
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<serde_json::Error> for Error {
    fn from(value: serde_json::Error) -> Self {
        Self::Serde(value)
    }
}

impl From<TryFromSliceError> for Error {
    fn from(value: TryFromSliceError) -> Self {
        Self::InvalidBinaryFormat(value)
    }
}
