//! Broadcast manager (`CAN_BCM`) control messages.
//!
//! A message is the kernel's `struct bcm_msg_head` followed by `nframes`
//! classic frames. The header contains two `struct bcm_timeval`s made of C
//! `long`s, so its size depends on the target's pointer width.

use std::ops::{BitOr, BitOrAssign};
use std::time::Duration;

use byteorder::{ByteOrder, NativeEndian};
use num_derive::FromPrimitive;

use crate::frame::{with_format_flag, CanFrame, CAN_FRAME_LEN};
use crate::{Error, Result};

#[cfg(target_pointer_width = "64")]
const LONG_LEN: usize = 8;
#[cfg(not(target_pointer_width = "64"))]
const LONG_LEN: usize = 4;

// `long` members are naturally aligned; `frames[]` is aligned to 8.
#[cfg(target_pointer_width = "64")]
const PAD_AFTER_COUNT: usize = 4;
#[cfg(not(target_pointer_width = "64"))]
const PAD_AFTER_COUNT: usize = 0;

const IVAL1_OFFSET: usize = 12 + PAD_AFTER_COUNT;
const IVAL2_OFFSET: usize = IVAL1_OFFSET + 2 * LONG_LEN;
const CAN_ID_OFFSET: usize = IVAL2_OFFSET + 2 * LONG_LEN;
const NFRAMES_OFFSET: usize = CAN_ID_OFFSET + 4;

/// Size of `struct bcm_msg_head`, `"IIIllllII0q"`.
pub const BCM_HEADER_LEN: usize = (NFRAMES_OFFSET + 4 + 7) & !7;

/// The kernel refuses messages carrying more frames than this.
pub const BCM_MAX_NFRAMES: usize = 256;

/// Largest message the kernel can hand back in one read.
pub const BCM_MAX_MSG_LEN: usize = BCM_HEADER_LEN + BCM_MAX_NFRAMES * CAN_FRAME_LEN;

const USEC_PER_SEC: i64 = 1_000_000;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, FromPrimitive)]
pub enum BcmOpcode {
    /// Create or update a cyclic transmission task.
    TxSetup = 1,
    TxDelete = 2,
    TxRead = 3,
    /// Send one frame without creating a task.
    TxSend = 4,
    /// Create or update a receive filter subscription.
    RxSetup = 5,
    RxDelete = 6,
    RxRead = 7,
    /// Reply to `TxRead`.
    TxStatus = 8,
    /// Cyclic transmission finished its `count` phase.
    TxExpired = 9,
    /// Reply to `RxRead`.
    RxStatus = 10,
    /// Cyclic message was not received within `ival1`.
    RxTimeout = 11,
    /// Received frame differs from the last one.
    RxChanged = 12,
}

impl BcmOpcode {
    pub fn from_u32(value: u32) -> Result<Self> {
        num::FromPrimitive::from_u32(value).ok_or(Error::UnknownOpcode(value))
    }
}

/// `flags` word of a broadcast manager message.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct BcmFlags(u32);

impl BcmFlags {
    pub const SETTIMER: BcmFlags = BcmFlags(0x0001);
    pub const STARTTIMER: BcmFlags = BcmFlags(0x0002);
    pub const TX_COUNTEVT: BcmFlags = BcmFlags(0x0004);
    pub const TX_ANNOUNCE: BcmFlags = BcmFlags(0x0008);
    pub const TX_CP_CAN_ID: BcmFlags = BcmFlags(0x0010);
    pub const RX_FILTER_ID: BcmFlags = BcmFlags(0x0020);
    pub const RX_CHECK_DLC: BcmFlags = BcmFlags(0x0040);
    pub const RX_NO_AUTOTIMER: BcmFlags = BcmFlags(0x0080);
    pub const RX_ANNOUNCE_RESUME: BcmFlags = BcmFlags(0x0100);
    pub const TX_RESET_MULTI_IDX: BcmFlags = BcmFlags(0x0200);
    pub const RX_RTR_FRAME: BcmFlags = BcmFlags(0x0400);

    pub const fn empty() -> Self {
        BcmFlags(0)
    }

    pub const fn from_bits(bits: u32) -> Self {
        BcmFlags(bits)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn contains(self, other: BcmFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for BcmFlags {
    type Output = BcmFlags;

    fn bitor(self, rhs: BcmFlags) -> BcmFlags {
        BcmFlags(self.0 | rhs.0)
    }
}

impl BitOrAssign for BcmFlags {
    fn bitor_assign(&mut self, rhs: BcmFlags) {
        self.0 |= rhs.0
    }
}

/// A broadcast manager command or notification.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BcmMsg {
    pub opcode: BcmOpcode,
    pub flags: BcmFlags,
    /// Number of `ival1` transmissions before switching to `ival2`.
    pub count: u32,
    pub ival1: Duration,
    pub ival2: Duration,
    /// Identifier word including the extended format flag.
    pub can_id: u32,
    pub frames: Vec<CanFrame>,
}

impl BcmMsg {
    pub fn new(opcode: BcmOpcode, can_id: u32) -> Self {
        BcmMsg {
            opcode,
            flags: BcmFlags::empty(),
            count: 0,
            ival1: Duration::ZERO,
            ival2: Duration::ZERO,
            can_id: with_format_flag(can_id),
            frames: Vec::new(),
        }
    }

    pub fn with_flags(mut self, flags: BcmFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn with_count(mut self, count: u32) -> Self {
        self.count = count;
        self
    }

    pub fn with_ival1(mut self, ival1: Duration) -> Self {
        self.ival1 = ival1;
        self
    }

    pub fn with_ival2(mut self, ival2: Duration) -> Self {
        self.ival2 = ival2;
        self
    }

    pub fn with_frames(mut self, frames: Vec<CanFrame>) -> Self {
        self.frames = frames;
        self
    }

    pub fn nframes(&self) -> usize {
        self.frames.len()
    }

    /// Size of the serialized message.
    pub fn encoded_len(&self) -> usize {
        BCM_HEADER_LEN + self.frames.len() * CAN_FRAME_LEN
    }

    pub fn encode<B: ByteOrder>(&self) -> Vec<u8> {
        let mut buf = vec![0u8; self.encoded_len()];

        B::write_u32(&mut buf[0..4], self.opcode as u32);
        B::write_u32(&mut buf[4..8], self.flags.bits());
        B::write_u32(&mut buf[8..12], self.count);
        write_timeval::<B>(&mut buf[IVAL1_OFFSET..IVAL2_OFFSET], self.ival1);
        write_timeval::<B>(&mut buf[IVAL2_OFFSET..CAN_ID_OFFSET], self.ival2);
        B::write_u32(&mut buf[CAN_ID_OFFSET..NFRAMES_OFFSET], self.can_id);
        B::write_u32(
            &mut buf[NFRAMES_OFFSET..NFRAMES_OFFSET + 4],
            self.frames.len() as u32,
        );

        for (frame, chunk) in self
            .frames
            .iter()
            .zip(buf[BCM_HEADER_LEN..].chunks_exact_mut(CAN_FRAME_LEN))
        {
            chunk.copy_from_slice(&frame.encode::<B>());
        }
        buf
    }

    /// Parses a complete message. The bytes after the header must hold
    /// exactly the number of frames the header declares.
    pub fn decode<B: ByteOrder>(buf: &[u8]) -> Result<Self> {
        if buf.len() < BCM_HEADER_LEN {
            return Err(Error::ShortBuffer {
                expected: BCM_HEADER_LEN,
                actual: buf.len(),
            });
        }

        let opcode = BcmOpcode::from_u32(B::read_u32(&buf[0..4]))?;
        let flags = BcmFlags::from_bits(B::read_u32(&buf[4..8]));
        let count = B::read_u32(&buf[8..12]);
        let ival1 = read_timeval::<B>(&buf[IVAL1_OFFSET..IVAL2_OFFSET])?;
        let ival2 = read_timeval::<B>(&buf[IVAL2_OFFSET..CAN_ID_OFFSET])?;
        let can_id = B::read_u32(&buf[CAN_ID_OFFSET..NFRAMES_OFFSET]);
        let nframes = B::read_u32(&buf[NFRAMES_OFFSET..NFRAMES_OFFSET + 4]);

        let body = &buf[BCM_HEADER_LEN..];
        if body.len() % CAN_FRAME_LEN != 0 || body.len() / CAN_FRAME_LEN != nframes as usize {
            return Err(Error::FrameCountMismatch {
                declared: nframes,
                actual: body.len() / CAN_FRAME_LEN,
            });
        }

        let frames = body
            .chunks_exact(CAN_FRAME_LEN)
            .map(CanFrame::decode::<B>)
            .collect::<Result<Vec<_>>>()?;

        Ok(BcmMsg {
            opcode,
            flags,
            count,
            ival1,
            ival2,
            can_id,
            frames,
        })
    }

    /// Host order serialization, ready for a `CAN_BCM` socket.
    pub fn to_bytes(&self) -> Vec<u8> {
        self.encode::<NativeEndian>()
    }

    pub fn from_bytes(buf: &[u8]) -> Result<Self> {
        Self::decode::<NativeEndian>(buf)
    }
}

fn write_long<B: ByteOrder>(buf: &mut [u8], value: i64) {
    if LONG_LEN == 8 {
        B::write_i64(buf, value)
    } else {
        B::write_i32(buf, i32::try_from(value).unwrap_or(i32::MAX))
    }
}

fn read_long<B: ByteOrder>(buf: &[u8]) -> i64 {
    if LONG_LEN == 8 {
        B::read_i64(buf)
    } else {
        B::read_i32(buf) as i64
    }
}

fn write_timeval<B: ByteOrder>(buf: &mut [u8], ival: Duration) {
    // saturates, a wrapped value would read back negative
    let secs = i64::try_from(ival.as_secs()).unwrap_or(i64::MAX);
    write_long::<B>(&mut buf[..LONG_LEN], secs);
    write_long::<B>(&mut buf[LONG_LEN..], ival.subsec_micros() as i64);
}

fn read_timeval<B: ByteOrder>(buf: &[u8]) -> Result<Duration> {
    let sec = read_long::<B>(&buf[..LONG_LEN]);
    let usec = read_long::<B>(&buf[LONG_LEN..]);
    if sec < 0 || !(0..USEC_PER_SEC).contains(&usec) {
        return Err(Error::InvalidInterval { sec, usec });
    }
    Ok(Duration::from_secs(sec as u64) + Duration::from_micros(usec as u64))
}
