use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Buffer too short: need {expected} bytes, got {actual}")]
    ShortBuffer { expected: usize, actual: usize },

    #[error("Payload of {0} bytes does not fit a classic CAN frame")]
    PayloadTooLong(usize),

    #[error("CAN identifier {0:#x} out of range")]
    InvalidId(u32),

    #[error("Invalid data length code {0}")]
    InvalidDlc(u8),

    #[error("BCM header declares {declared} frames, buffer holds {actual}")]
    FrameCountMismatch { declared: u32, actual: usize },

    #[error("Unknown BCM opcode {0}")]
    UnknownOpcode(u32),

    #[error("Invalid BCM interval: {sec} s {usec} us")]
    InvalidInterval { sec: i64, usec: i64 },

    #[error("Invalid frame string: {0}")]
    InvalidFrameString(String),

    #[error("IO Error: {0}")]
    IOError(#[from] std::io::Error),
}
