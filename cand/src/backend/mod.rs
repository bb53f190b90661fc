//! Async access to a CAN interface.

pub mod socketcan;

use std::io;
use std::os::fd::AsRawFd;

use byteorder::NativeEndian;
use socketcan_proto::frame::CAN_FRAME_LEN;
use socketcan_proto::CanFrame;
use tokio::io::unix::AsyncFd;

use crate::socket::isotp::RECV_BUF_LEN;
use crate::socket::{CanIsoTpSocket, CanRawSocket};
use crate::{Error, Result};

/// A non-blocking [`CanRawSocket`] driven by the tokio reactor.
pub struct AsyncCanSocket {
    inner: AsyncFd<CanRawSocket>,
}

impl AsyncCanSocket {
    pub fn open(ifname: &str) -> Result<Self> {
        Self::new(CanRawSocket::open(ifname)?)
    }

    pub fn new(socket: CanRawSocket) -> Result<Self> {
        socket.set_nonblocking(true)?;
        Ok(AsyncCanSocket {
            inner: AsyncFd::new(socket)?,
        })
    }

    pub fn get_ref(&self) -> &CanRawSocket {
        self.inner.get_ref()
    }

    pub async fn recv(&self) -> Result<CanFrame> {
        let mut buf = [0u8; CAN_FRAME_LEN];
        let len = read_io(&self.inner, |socket| socket.recv_raw(&mut buf)).await?;
        let frame = CanFrame::decode::<NativeEndian>(&buf[..len])?;
        log::trace!("RX {}", frame);
        Ok(frame)
    }

    pub async fn send(&self, frame: &CanFrame) -> Result<()> {
        let buf = frame.encode::<NativeEndian>();
        let written = write_io(&self.inner, |socket| socket.send_raw(&buf)).await?;
        check_written(buf.len(), written)?;
        log::trace!("TX {}", frame);
        Ok(())
    }
}

/// A non-blocking [`CanIsoTpSocket`]. Unlike a blocking read on a worker
/// thread, a pending `recv` can simply be dropped.
pub struct AsyncIsoTpSocket {
    inner: AsyncFd<CanIsoTpSocket>,
}

impl AsyncIsoTpSocket {
    pub fn open(ifname: &str, rx_id: u32, tx_id: u32) -> Result<Self> {
        Self::new(CanIsoTpSocket::open(ifname, rx_id, tx_id)?)
    }

    pub fn new(socket: CanIsoTpSocket) -> Result<Self> {
        socket.set_nonblocking(true)?;
        Ok(AsyncIsoTpSocket {
            inner: AsyncFd::new(socket)?,
        })
    }

    pub fn get_ref(&self) -> &CanIsoTpSocket {
        self.inner.get_ref()
    }

    pub async fn recv(&self) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; RECV_BUF_LEN];
        let len = read_io(&self.inner, |socket| socket.recv_raw(&mut buf)).await?;
        buf.truncate(len);
        log::trace!("ISO-TP RX {} bytes", len);
        Ok(buf)
    }

    pub async fn send(&self, payload: &[u8]) -> Result<()> {
        let written = write_io(&self.inner, |socket| socket.send_raw(payload)).await?;
        check_written(payload.len(), written)?;
        log::trace!("ISO-TP TX {} bytes", payload.len());
        Ok(())
    }
}

async fn read_io<T, F>(fd: &AsyncFd<T>, mut op: F) -> io::Result<usize>
where
    T: AsRawFd,
    F: FnMut(&T) -> io::Result<usize>,
{
    loop {
        let mut guard = fd.readable().await?;
        match guard.try_io(|inner| op(inner.get_ref())) {
            Ok(result) => return result,
            Err(_would_block) => continue,
        }
    }
}

async fn write_io<T, F>(fd: &AsyncFd<T>, mut op: F) -> io::Result<usize>
where
    T: AsRawFd,
    F: FnMut(&T) -> io::Result<usize>,
{
    loop {
        let mut guard = fd.writable().await?;
        match guard.try_io(|inner| op(inner.get_ref())) {
            Ok(result) => return result,
            Err(_would_block) => continue,
        }
    }
}

fn check_written(expected: usize, written: usize) -> Result<()> {
    if written != expected {
        return Err(Error::ShortWrite { expected, written });
    }
    Ok(())
}

/// Whether a failed send is worth retrying later, e.g. a full tx queue.
pub fn is_transient(err: &Error) -> bool {
    match err {
        Error::Io(e) => matches!(
            e.kind(),
            io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
        ) || e.raw_os_error() == Some(libc::ENOBUFS),
        _ => false,
    }
}
