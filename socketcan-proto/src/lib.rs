//! Wire formats of Linux SocketCAN: classic `struct can_frame` and the
//! broadcast manager's `struct bcm_msg_head`, plus a `tokio-util` codec for
//! carrying frames over byte streams.

mod error;

pub mod bcm;
pub mod codec;
pub mod frame;

pub use bcm::{BcmFlags, BcmMsg, BcmOpcode};
pub use codec::CanFrameCodec;
pub use error::*;
pub use frame::{CanFlags, CanFrame};
