//! Thin layer over the `AF_CAN` socket calls shared by all wrappers.

use std::io;
use std::mem::size_of;
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, FromRawFd, OwnedFd, RawFd};
use std::time::Duration;

use libc::{c_int, c_uint, c_void, sa_family_t, socklen_t};

use crate::{Error, Result};

// constants from linux/can.h, linux/can/raw.h and linux/can/isotp.h
pub const AF_CAN: c_int = 29;
pub const PF_CAN: c_int = AF_CAN;

pub const CAN_RAW: c_int = 1;
pub const CAN_BCM: c_int = 2;
pub const CAN_ISOTP: c_int = 6;

pub const SOL_CAN_BASE: c_int = 100;
pub const SOL_CAN_RAW: c_int = SOL_CAN_BASE + CAN_RAW;
pub const SOL_CAN_ISOTP: c_int = SOL_CAN_BASE + CAN_ISOTP;

pub const CAN_RAW_FILTER: c_int = 1;
pub const CAN_RAW_ERR_FILTER: c_int = 2;
pub const CAN_RAW_LOOPBACK: c_int = 3;
pub const CAN_RAW_RECV_OWN_MSGS: c_int = 4;
pub const CAN_RAW_JOIN_FILTERS: c_int = 6;

pub const CAN_ISOTP_OPTS: c_int = 1;
pub const CAN_ISOTP_RECV_FC: c_int = 2;

/// `struct sockaddr_can`. `rx_id`/`tx_id` are only read by ISO-TP sockets.
#[derive(Debug, Default)]
#[repr(C)]
pub struct SockAddrCan {
    can_family: sa_family_t,
    can_ifindex: c_int,
    rx_id: u32,
    tx_id: u32,
    _j1939: u64,
}

impl SockAddrCan {
    pub fn new(if_index: c_uint) -> Self {
        SockAddrCan {
            can_family: AF_CAN as sa_family_t,
            can_ifindex: if_index as c_int,
            ..Default::default()
        }
    }

    pub fn with_transport(if_index: c_uint, rx_id: u32, tx_id: u32) -> Self {
        SockAddrCan {
            rx_id,
            tx_id,
            ..Self::new(if_index)
        }
    }
}

/// Resolves an interface name such as `can0` to its kernel index.
pub fn if_index(ifname: &str) -> Result<c_uint> {
    nix::net::if_::if_nametoindex(ifname).map_err(|_| Error::InterfaceNotFound(ifname.to_owned()))
}

/// An open `PF_CAN` socket. Closed when dropped.
#[derive(Debug)]
pub struct Socket {
    fd: OwnedFd,
}

impl Socket {
    pub fn new(ty: c_int, protocol: c_int) -> io::Result<Self> {
        let fd = unsafe { libc::socket(PF_CAN, ty | libc::SOCK_CLOEXEC, protocol) };
        if fd == -1 {
            return Err(io::Error::last_os_error());
        }
        Ok(Socket {
            fd: unsafe { OwnedFd::from_raw_fd(fd) },
        })
    }

    pub fn bind(&self, addr: &SockAddrCan) -> io::Result<()> {
        let rv = unsafe {
            libc::bind(
                self.as_raw_fd(),
                addr as *const SockAddrCan as *const libc::sockaddr,
                size_of::<SockAddrCan>() as socklen_t,
            )
        };
        check(rv)
    }

    pub fn connect(&self, addr: &SockAddrCan) -> io::Result<()> {
        let rv = unsafe {
            libc::connect(
                self.as_raw_fd(),
                addr as *const SockAddrCan as *const libc::sockaddr,
                size_of::<SockAddrCan>() as socklen_t,
            )
        };
        check(rv)
    }

    pub fn send(&self, buf: &[u8]) -> io::Result<usize> {
        let rv = unsafe {
            libc::send(
                self.as_raw_fd(),
                buf.as_ptr() as *const c_void,
                buf.len(),
                0,
            )
        };
        if rv < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(rv as usize)
    }

    /// Sends `buf` as one datagram, treating a partial write as an error.
    pub fn send_all(&self, buf: &[u8]) -> Result<()> {
        let written = self.send(buf)?;
        if written != buf.len() {
            return Err(Error::ShortWrite {
                expected: buf.len(),
                written,
            });
        }
        Ok(())
    }

    pub fn recv(&self, buf: &mut [u8]) -> io::Result<usize> {
        let rv = unsafe {
            libc::recv(
                self.as_raw_fd(),
                buf.as_mut_ptr() as *mut c_void,
                buf.len(),
                0,
            )
        };
        if rv < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(rv as usize)
    }

    pub fn set_option<T>(&self, level: c_int, name: c_int, value: &T) -> io::Result<()> {
        let rv = unsafe {
            libc::setsockopt(
                self.as_raw_fd(),
                level,
                name,
                value as *const T as *const c_void,
                size_of::<T>() as socklen_t,
            )
        };
        check(rv)
    }

    pub fn set_option_slice<T>(&self, level: c_int, name: c_int, values: &[T]) -> io::Result<()> {
        let ptr = if values.is_empty() {
            std::ptr::null()
        } else {
            values.as_ptr() as *const c_void
        };
        let rv = unsafe {
            libc::setsockopt(
                self.as_raw_fd(),
                level,
                name,
                ptr,
                (size_of::<T>() * values.len()) as socklen_t,
            )
        };
        check(rv)
    }

    pub fn set_bool_option(&self, level: c_int, name: c_int, enabled: bool) -> io::Result<()> {
        let value: c_int = enabled.into();
        self.set_option(level, name, &value)
    }

    pub fn set_nonblocking(&self, nonblocking: bool) -> io::Result<()> {
        let flags = unsafe { libc::fcntl(self.as_raw_fd(), libc::F_GETFL) };
        if flags == -1 {
            return Err(io::Error::last_os_error());
        }

        let flags = if nonblocking {
            flags | libc::O_NONBLOCK
        } else {
            flags & !libc::O_NONBLOCK
        };
        check(unsafe { libc::fcntl(self.as_raw_fd(), libc::F_SETFL, flags) })
    }

    /// `None` blocks forever. A zero timeout is rejected.
    pub fn set_read_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        self.set_option(libc::SOL_SOCKET, libc::SO_RCVTIMEO, &timeval(timeout)?)
    }

    pub fn set_write_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        self.set_option(libc::SOL_SOCKET, libc::SO_SNDTIMEO, &timeval(timeout)?)
    }
}

impl AsRawFd for Socket {
    fn as_raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }
}

impl AsFd for Socket {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.fd.as_fd()
    }
}

fn check(rv: c_int) -> io::Result<()> {
    if rv == -1 {
        Err(io::Error::last_os_error())
    } else {
        Ok(())
    }
}

// {0, 0} means "no timeout" to the kernel, so it is reserved for `None`.
fn timeval(timeout: Option<Duration>) -> io::Result<libc::timeval> {
    let timeout = match timeout {
        None => Duration::ZERO,
        Some(t) if t.is_zero() => {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "cannot set a zero duration timeout",
            ))
        }
        Some(t) => t.max(Duration::from_micros(1)),
    };
    Ok(libc::timeval {
        tv_sec: libc::time_t::try_from(timeout.as_secs()).unwrap_or(libc::time_t::MAX),
        tv_usec: timeout.subsec_micros() as libc::suseconds_t,
    })
}
