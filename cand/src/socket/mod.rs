//! Blocking wrappers around the kernel's `AF_CAN` socket protocols.
//!
//! Each wrapper owns its file descriptor and closes it on drop.

pub mod bcm;
pub mod isotp;
pub mod raw;
pub mod sys;

pub use bcm::CanBcmSocket;
pub use isotp::{CanIsoTpSocket, FlowControl, IsoTpOptions};
pub use raw::{CanFilter, CanRawSocket};
