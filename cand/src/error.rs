use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO Error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Protocol Error: {0}")]
    Protocol(#[from] socketcan_proto::Error),

    #[error("No such CAN interface: {0}")]
    InterfaceNotFound(String),

    #[error("Short write: {written} of {expected} bytes")]
    ShortWrite { expected: usize, written: usize },

    #[error("Reactor has shut down")]
    ReactorClosed,

    #[error("Lost the CAN uplink")]
    UplinkLost,
}
