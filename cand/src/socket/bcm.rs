use std::os::fd::{AsFd, AsRawFd, BorrowedFd, RawFd};
use std::time::Duration;

use libc::SOCK_DGRAM;
use socketcan_proto::bcm::BCM_MAX_MSG_LEN;
use socketcan_proto::{BcmFlags, BcmMsg, BcmOpcode, CanFrame};

use super::sys::{self, SockAddrCan, Socket};
use crate::Result;

/// `CAN_BCM` socket connected to one interface.
///
/// The kernel runs the cyclic jobs; this type only issues commands and reads
/// notifications. Jobs are removed by the kernel when the socket closes.
#[derive(Debug)]
pub struct CanBcmSocket {
    socket: Socket,
}

impl CanBcmSocket {
    pub fn open(ifname: &str) -> Result<Self> {
        let if_index = sys::if_index(ifname)?;
        let socket = Socket::new(SOCK_DGRAM, sys::CAN_BCM)?;
        socket.connect(&SockAddrCan::new(if_index))?;
        log::debug!("Opened CAN_BCM socket on {}", ifname);
        Ok(CanBcmSocket { socket })
    }

    pub fn send(&self, msg: &BcmMsg) -> Result<()> {
        log::trace!("BCM TX {:?}", msg);
        self.socket.send_all(&msg.to_bytes())
    }

    /// Blocks until the kernel reports something (status, timeout, change).
    pub fn recv(&self) -> Result<BcmMsg> {
        let mut buf = vec![0u8; BCM_MAX_MSG_LEN];
        let len = self.socket.recv(&mut buf)?;
        let msg = BcmMsg::from_bytes(&buf[..len])?;
        log::trace!("BCM RX {:?}", msg);
        Ok(msg)
    }

    /// Starts sending `frame` every `interval` until the job is deleted.
    pub fn setup_cyclic_transmit(&self, frame: &CanFrame, interval: Duration) -> Result<()> {
        self.send(&cyclic_transmit(frame, interval))
    }

    /// Subscribes to `can_id`. With a timeout the kernel reports
    /// `RxTimeout` when no frame arrives within it.
    pub fn setup_cyclic_receive(&self, can_id: u32, timeout: Option<Duration>) -> Result<()> {
        self.send(&cyclic_receive(can_id, timeout))
    }

    /// Stops the job `setup_cyclic_transmit` started for `frame`. Jobs are
    /// keyed by the full identifier word, format and RTR bits included.
    pub fn delete_cyclic_transmit(&self, frame: &CanFrame) -> Result<()> {
        self.send(&delete_transmit(frame))
    }

    pub fn delete_cyclic_receive(&self, can_id: u32) -> Result<()> {
        self.send(&BcmMsg::new(BcmOpcode::RxDelete, can_id))
    }

    pub fn set_nonblocking(&self, nonblocking: bool) -> Result<()> {
        self.socket.set_nonblocking(nonblocking)?;
        Ok(())
    }

    pub fn set_read_timeout(&self, timeout: Option<Duration>) -> Result<()> {
        self.socket.set_read_timeout(timeout)?;
        Ok(())
    }

    pub fn set_write_timeout(&self, timeout: Option<Duration>) -> Result<()> {
        self.socket.set_write_timeout(timeout)?;
        Ok(())
    }
}

impl AsRawFd for CanBcmSocket {
    fn as_raw_fd(&self) -> RawFd {
        self.socket.as_raw_fd()
    }
}

impl AsFd for CanBcmSocket {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.socket.as_fd()
    }
}

fn cyclic_transmit(frame: &CanFrame, interval: Duration) -> BcmMsg {
    BcmMsg::new(BcmOpcode::TxSetup, frame.raw_id())
        .with_flags(BcmFlags::SETTIMER | BcmFlags::STARTTIMER)
        .with_ival2(interval)
        .with_frames(vec![*frame])
}

fn delete_transmit(frame: &CanFrame) -> BcmMsg {
    BcmMsg::new(BcmOpcode::TxDelete, frame.raw_id())
}

fn cyclic_receive(can_id: u32, timeout: Option<Duration>) -> BcmMsg {
    let msg = BcmMsg::new(BcmOpcode::RxSetup, can_id).with_flags(BcmFlags::RX_FILTER_ID);
    match timeout {
        Some(timeout) => msg
            .with_flags(BcmFlags::RX_FILTER_ID | BcmFlags::SETTIMER | BcmFlags::STARTTIMER)
            .with_ival1(timeout),
        None => msg,
    }
}
