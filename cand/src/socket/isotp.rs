use std::io;
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, RawFd};
use std::time::Duration;

use libc::SOCK_DGRAM;
use socketcan_proto::frame::with_format_flag;

use super::sys::{self, SockAddrCan, Socket};
use crate::Result;

// CAN_ISOTP_* option flags
pub const LISTEN_MODE: u32 = 0x001;
pub const EXTEND_ADDR: u32 = 0x002;
pub const TX_PADDING: u32 = 0x004;
pub const RX_PADDING: u32 = 0x008;
pub const CHK_PAD_LEN: u32 = 0x010;
pub const CHK_PAD_DATA: u32 = 0x020;
pub const HALF_DUPLEX: u32 = 0x040;
pub const FORCE_TXSTMIN: u32 = 0x080;
pub const FORCE_RXSTMIN: u32 = 0x100;
pub const RX_EXT_ADDR: u32 = 0x200;
pub const WAIT_TX_DONE: u32 = 0x400;

const DEFAULT_PAD_CONTENT: u8 = 0xcc;
const DEFAULT_FRAME_TXTIME_NS: u32 = 50_000;

// Largest PDU current kernels accept with their default `max_pdu_size`.
pub(crate) const RECV_BUF_LEN: usize = 8300;

#[repr(C)]
struct RawIsoTpOptions {
    flags: u32,
    frame_txtime: u32,
    ext_address: u8,
    txpad_content: u8,
    rxpad_content: u8,
    rx_ext_address: u8,
}

#[repr(C)]
struct RawFlowControl {
    bs: u8,
    stmin: u8,
    wftmax: u8,
}

/// Flow control parameters this socket sends as receiver.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FlowControl {
    /// Frames per block, 0 for no limit.
    pub block_size: u8,
    /// Raw ISO 15765-2 `STmin` byte.
    pub st_min: u8,
    /// Maximum number of wait frames, 0 to never send any.
    pub wft_max: u8,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct IsoTpOptions {
    /// Extra `CAN_ISOTP_*` flags. Flags implied by the fields below are
    /// added automatically.
    pub flags: u32,
    pub frame_txtime: Option<Duration>,
    pub ext_address: Option<u8>,
    pub tx_padding: Option<u8>,
    pub rx_padding: Option<u8>,
    pub rx_ext_address: Option<u8>,
    pub flow_control: Option<FlowControl>,
}

impl IsoTpOptions {
    fn to_raw(&self) -> RawIsoTpOptions {
        let mut flags = self.flags;
        if self.ext_address.is_some() {
            flags |= EXTEND_ADDR;
        }
        if self.tx_padding.is_some() {
            flags |= TX_PADDING;
        }
        if self.rx_padding.is_some() {
            flags |= RX_PADDING;
        }
        if self.rx_ext_address.is_some() {
            flags |= RX_EXT_ADDR;
        }

        let frame_txtime = self
            .frame_txtime
            .map(|t| u32::try_from(t.as_nanos()).unwrap_or(u32::MAX))
            .unwrap_or(DEFAULT_FRAME_TXTIME_NS);

        RawIsoTpOptions {
            flags,
            frame_txtime,
            ext_address: self.ext_address.unwrap_or(0),
            txpad_content: self.tx_padding.unwrap_or(DEFAULT_PAD_CONTENT),
            rxpad_content: self.rx_padding.unwrap_or(DEFAULT_PAD_CONTENT),
            rx_ext_address: self.rx_ext_address.unwrap_or(0),
        }
    }
}

/// `CAN_ISOTP` socket: whole transport PDUs per `send`/`recv`, segmentation
/// and flow control are done by the kernel.
#[derive(Debug)]
pub struct CanIsoTpSocket {
    socket: Socket,
}

impl CanIsoTpSocket {
    /// Listens on `rx_id` and sends on `tx_id`. Identifiers above `0x7FF`
    /// use the extended format.
    pub fn open(ifname: &str, rx_id: u32, tx_id: u32) -> Result<Self> {
        let if_index = sys::if_index(ifname)?;
        let socket = Socket::new(SOCK_DGRAM, sys::CAN_ISOTP)?;
        Self::bind(socket, if_index, rx_id, tx_id, ifname)
    }

    pub fn open_with(ifname: &str, rx_id: u32, tx_id: u32, options: &IsoTpOptions) -> Result<Self> {
        let if_index = sys::if_index(ifname)?;
        let socket = Socket::new(SOCK_DGRAM, sys::CAN_ISOTP)?;

        // must happen before bind
        socket.set_option(sys::SOL_CAN_ISOTP, sys::CAN_ISOTP_OPTS, &options.to_raw())?;
        if let Some(fc) = options.flow_control {
            let raw = RawFlowControl {
                bs: fc.block_size,
                stmin: fc.st_min,
                wftmax: fc.wft_max,
            };
            socket.set_option(sys::SOL_CAN_ISOTP, sys::CAN_ISOTP_RECV_FC, &raw)?;
        }

        Self::bind(socket, if_index, rx_id, tx_id, ifname)
    }

    fn bind(socket: Socket, if_index: u32, rx_id: u32, tx_id: u32, ifname: &str) -> Result<Self> {
        let addr = SockAddrCan::with_transport(
            if_index,
            with_format_flag(rx_id),
            with_format_flag(tx_id),
        );
        socket.bind(&addr)?;
        log::debug!(
            "Opened CAN_ISOTP socket on {} (rx {:#x}, tx {:#x})",
            ifname,
            rx_id,
            tx_id
        );
        Ok(CanIsoTpSocket { socket })
    }

    pub fn send(&self, payload: &[u8]) -> Result<()> {
        log::trace!("ISO-TP TX {} bytes", payload.len());
        self.socket.send_all(payload)
    }

    /// Blocks until a complete PDU has been reassembled.
    pub fn recv(&self) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; RECV_BUF_LEN];
        let len = self.socket.recv(&mut buf)?;
        buf.truncate(len);
        log::trace!("ISO-TP RX {} bytes", len);
        Ok(buf)
    }

    pub(crate) fn send_raw(&self, buf: &[u8]) -> io::Result<usize> {
        self.socket.send(buf)
    }

    pub(crate) fn recv_raw(&self, buf: &mut [u8]) -> io::Result<usize> {
        self.socket.recv(buf)
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

impl AsRawFd for CanIsoTpSocket {
    fn as_raw_fd(&self) -> RawFd {
        self.socket.as_raw_fd()
    }
}

impl AsFd for CanIsoTpSocket {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.socket.as_fd()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::mem::size_of;

    #[test]
    fn option_structs_match_kernel_layout() {
        assert_eq!(size_of::<RawIsoTpOptions>(), 12);
        assert_eq!(size_of::<RawFlowControl>(), 3);
    }

    #[test]
    fn default_options_match_kernel_defaults() {
        let raw = IsoTpOptions::default().to_raw();
        assert_eq!(raw.flags, 0);
        assert_eq!(raw.frame_txtime, 50_000);
        assert_eq!(raw.txpad_content, 0xcc);
        assert_eq!(raw.rxpad_content, 0xcc);
    }

    #[test]
    fn set_fields_imply_flags() {
        let options = IsoTpOptions {
            flags: HALF_DUPLEX,
            ext_address: Some(0xf1),
            tx_padding: Some(0x55),
            frame_txtime: Some(Duration::from_micros(10)),
            ..Default::default()
        };
        let raw = options.to_raw();
        assert_eq!(raw.flags, HALF_DUPLEX | EXTEND_ADDR | TX_PADDING);
        assert_eq!(raw.ext_address, 0xf1);
        assert_eq!(raw.txpad_content, 0x55);
        assert_eq!(raw.rxpad_content, 0xcc);
        assert_eq!(raw.frame_txtime, 10_000);
    }

    #[test]
    #[ignore = "needs a vcan0 interface with the can-isotp module"]
    fn transfers_multi_frame_pdu_on_vcan() {
        let a = CanIsoTpSocket::open("vcan0", 0x7e8, 0x7e0).unwrap();
        let b = CanIsoTpSocket::open("vcan0", 0x7e0, 0x7e8).unwrap();
        b.set_read_timeout(Some(Duration::from_secs(1))).unwrap();

        let payload: Vec<u8> = (0..100).collect();
        a.send(&payload).unwrap();
        assert_eq!(b.recv().unwrap(), payload);
    }
}
