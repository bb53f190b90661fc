use std::io;
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, RawFd};
use std::time::Duration;

use byteorder::NativeEndian;
use libc::{c_uint, SOCK_RAW};
use socketcan_proto::frame::{CAN_FRAME_LEN, EFF_FLAG, EFF_MASK, RTR_FLAG, SFF_MASK};
use socketcan_proto::CanFrame;

use super::sys::{self, SockAddrCan, Socket};
use crate::Result;

/// `struct can_filter`: a frame passes when
/// `received_id & can_mask == can_id & can_mask`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(C)]
pub struct CanFilter {
    pub can_id: u32,
    pub can_mask: u32,
}

impl CanFilter {
    pub const fn new(can_id: u32, can_mask: u32) -> Self {
        CanFilter { can_id, can_mask }
    }

    /// Matches exactly one data frame identifier in the format implied by its
    /// width.
    pub const fn exact(can_id: u32) -> Self {
        if can_id > SFF_MASK {
            CanFilter::new(can_id | EFF_FLAG, EFF_MASK | EFF_FLAG | RTR_FLAG)
        } else {
            CanFilter::new(can_id, SFF_MASK | EFF_FLAG | RTR_FLAG)
        }
    }
}

/// `CAN_RAW` socket bound to one interface, one frame per datagram.
#[derive(Debug)]
pub struct CanRawSocket {
    socket: Socket,
    if_index: c_uint,
}

impl CanRawSocket {
    /// Opens a raw socket on a named interface such as `vcan0`.
    pub fn open(ifname: &str) -> Result<Self> {
        let if_index = sys::if_index(ifname)?;
        Self::open_if(if_index)
    }

    pub fn open_if(if_index: c_uint) -> Result<Self> {
        let socket = Socket::new(SOCK_RAW, sys::CAN_RAW)?;
        socket.bind(&SockAddrCan::new(if_index))?;
        log::debug!("Opened CAN_RAW socket on interface {}", if_index);
        Ok(CanRawSocket { socket, if_index })
    }

    pub fn if_index(&self) -> c_uint {
        self.if_index
    }

    pub fn send(&self, frame: &CanFrame) -> Result<()> {
        log::trace!("TX {}", frame);
        self.socket.send_all(&frame.encode::<NativeEndian>())
    }

    /// Blocks until the kernel delivers the next frame.
    pub fn recv(&self) -> Result<CanFrame> {
        let mut buf = [0u8; CAN_FRAME_LEN];
        let len = self.socket.recv(&mut buf)?;
        let frame = CanFrame::decode::<NativeEndian>(&buf[..len])?;
        log::trace!("RX {}", frame);
        Ok(frame)
    }

    pub(crate) fn send_raw(&self, buf: &[u8]) -> io::Result<usize> {
        self.socket.send(buf)
    }

    pub(crate) fn recv_raw(&self, buf: &mut [u8]) -> io::Result<usize> {
        self.socket.recv(buf)
    }

    /// Replaces the receive filters. An empty list receives nothing.
    pub fn set_filters(&self, filters: &[CanFilter]) -> Result<()> {
        self.socket
            .set_option_slice(sys::SOL_CAN_RAW, sys::CAN_RAW_FILTER, filters)?;
        Ok(())
    }

    /// Selects which error classes are delivered as error frames.
    pub fn set_error_mask(&self, mask: u32) -> Result<()> {
        self.socket
            .set_option(sys::SOL_CAN_RAW, sys::CAN_RAW_ERR_FILTER, &mask)?;
        Ok(())
    }

    pub fn set_loopback(&self, enabled: bool) -> Result<()> {
        self.socket
            .set_bool_option(sys::SOL_CAN_RAW, sys::CAN_RAW_LOOPBACK, enabled)?;
        Ok(())
    }

    pub fn set_recv_own_msgs(&self, enabled: bool) -> Result<()> {
        self.socket
            .set_bool_option(sys::SOL_CAN_RAW, sys::CAN_RAW_RECV_OWN_MSGS, enabled)?;
        Ok(())
    }

    /// Frames must match all filters instead of any.
    pub fn set_join_filters(&self, enabled: bool) -> Result<()> {
        self.socket
            .set_bool_option(sys::SOL_CAN_RAW, sys::CAN_RAW_JOIN_FILTERS, enabled)?;
        Ok(())
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

impl AsRawFd for CanRawSocket {
    fn as_raw_fd(&self) -> RawFd {
        self.socket.as_raw_fd()
    }
}

impl AsFd for CanRawSocket {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.socket.as_fd()
    }
}
