//! Classic CAN data frames and their fixed 16 byte wire layout.

use std::fmt;
use std::ops::{BitOr, BitOrAssign};
use std::str::FromStr;

use byteorder::{BigEndian, ByteOrder};

use crate::{Error, Result};

/// Set on the identifier word of frames using the 29 bit format.
pub const EFF_FLAG: u32 = 0x8000_0000;
/// Remote transmission request.
pub const RTR_FLAG: u32 = 0x4000_0000;
/// Error message frame.
pub const ERR_FLAG: u32 = 0x2000_0000;

/// Valid bits of a standard (11 bit) identifier.
pub const SFF_MASK: u32 = 0x0000_07ff;
/// Valid bits of an extended (29 bit) identifier.
pub const EFF_MASK: u32 = 0x1fff_ffff;
/// Valid bits of an error frame's class field.
pub const ERR_MASK: u32 = 0x1fff_ffff;

const FLAG_MASK: u32 = EFF_FLAG | RTR_FLAG | ERR_FLAG;

/// Maximum payload of a classic CAN frame.
pub const CAN_MAX_DLEN: usize = 8;
/// Size of `struct can_frame` on the wire.
pub const CAN_FRAME_LEN: usize = 16;

/// Adds the extended format flag to identifiers above the 11 bit range, the
/// form sockets expect when an id is passed without a frame.
pub fn with_format_flag(can_id: u32) -> u32 {
    if can_id & EFF_MASK > SFF_MASK {
        can_id | EFF_FLAG
    } else {
        can_id
    }
}

/// Flag bits stored in the upper three bits of the identifier word.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct CanFlags(u32);

impl CanFlags {
    pub const EXTENDED: CanFlags = CanFlags(EFF_FLAG);
    pub const REMOTE: CanFlags = CanFlags(RTR_FLAG);
    pub const ERROR: CanFlags = CanFlags(ERR_FLAG);

    pub const fn empty() -> Self {
        CanFlags(0)
    }

    /// Keeps only the flag bits of `bits`, identifier bits are dropped.
    pub const fn from_bits_truncate(bits: u32) -> Self {
        CanFlags(bits & FLAG_MASK)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn contains(self, other: CanFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: CanFlags) {
        self.0 |= other.0;
    }
}

impl BitOr for CanFlags {
    type Output = CanFlags;

    fn bitor(self, rhs: CanFlags) -> CanFlags {
        CanFlags(self.0 | rhs.0)
    }
}

impl BitOrAssign for CanFlags {
    fn bitor_assign(&mut self, rhs: CanFlags) {
        self.insert(rhs)
    }
}

/// A classic CAN frame.
///
/// Built per message or produced by decoding; there is no identity beyond the
/// value. Identifiers above `0x7FF` always carry [`CanFlags::EXTENDED`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct CanFrame {
    can_id: u32,
    flags: CanFlags,
    len: u8,
    data: [u8; CAN_MAX_DLEN],
}

impl CanFrame {
    /// Creates a data frame. Fails if `data` is longer than eight bytes or
    /// `can_id` does not fit in 29 bits.
    pub fn new(can_id: u32, data: &[u8]) -> Result<Self> {
        Self::with_flags(can_id, data, CanFlags::empty())
    }

    pub fn with_flags(can_id: u32, data: &[u8], flags: CanFlags) -> Result<Self> {
        if data.len() > CAN_MAX_DLEN {
            return Err(Error::PayloadTooLong(data.len()));
        }
        if can_id > EFF_MASK {
            return Err(Error::InvalidId(can_id));
        }

        let mut payload = [0u8; CAN_MAX_DLEN];
        payload[..data.len()].copy_from_slice(data);
        Ok(Self::from_parts(can_id, flags, data.len() as u8, payload))
    }

    /// Creates a remote transmission request for `dlc` bytes.
    pub fn remote(can_id: u32, dlc: usize) -> Result<Self> {
        if dlc > CAN_MAX_DLEN {
            return Err(Error::PayloadTooLong(dlc));
        }
        if can_id > EFF_MASK {
            return Err(Error::InvalidId(can_id));
        }
        Ok(Self::from_parts(
            can_id,
            CanFlags::REMOTE,
            dlc as u8,
            [0u8; CAN_MAX_DLEN],
        ))
    }

    fn from_parts(can_id: u32, mut flags: CanFlags, len: u8, data: [u8; CAN_MAX_DLEN]) -> Self {
        if can_id > SFF_MASK {
            flags.insert(CanFlags::EXTENDED);
        }
        CanFrame {
            can_id,
            flags,
            len,
            data,
        }
    }

    /// Identifier without flag bits.
    pub fn id(&self) -> u32 {
        self.can_id
    }

    pub fn flags(&self) -> CanFlags {
        self.flags
    }

    /// Identifier word as the kernel sees it: `can_id | flags`.
    pub fn raw_id(&self) -> u32 {
        self.can_id | self.flags.bits()
    }

    /// Payload. For remote frames this is `dlc` zero bytes.
    pub fn data(&self) -> &[u8] {
        &self.data[..self.len as usize]
    }

    pub fn len(&self) -> usize {
        self.len as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_extended(&self) -> bool {
        self.flags.contains(CanFlags::EXTENDED)
    }

    pub fn is_remote(&self) -> bool {
        self.flags.contains(CanFlags::REMOTE)
    }

    pub fn is_error(&self) -> bool {
        self.flags.contains(CanFlags::ERROR)
    }

    /// Serializes into `struct can_frame` using byte order `B` for the
    /// identifier word.
    ///
    /// ```text
    /// +-------------------+--------+-------------+--------------+
    /// | u32 can_id|flags  | u8 len | 3 reserved  | 8 data bytes |
    /// +-------------------+--------+-------------+--------------+
    /// ```
    pub fn encode<B: ByteOrder>(&self) -> [u8; CAN_FRAME_LEN] {
        let mut buf = [0u8; CAN_FRAME_LEN];
        B::write_u32(&mut buf[0..4], self.raw_id());
        buf[4] = self.len;
        buf[8..].copy_from_slice(&self.data);
        buf
    }

    /// Parses the first [`CAN_FRAME_LEN`] bytes of `buf`. Payload bytes past
    /// the length field are ignored.
    pub fn decode<B: ByteOrder>(buf: &[u8]) -> Result<Self> {
        if buf.len() < CAN_FRAME_LEN {
            return Err(Error::ShortBuffer {
                expected: CAN_FRAME_LEN,
                actual: buf.len(),
            });
        }

        let word = B::read_u32(&buf[0..4]);
        let len = buf[4];
        if len as usize > CAN_MAX_DLEN {
            return Err(Error::InvalidDlc(len));
        }

        let mut data = [0u8; CAN_MAX_DLEN];
        let flags = CanFlags::from_bits_truncate(word);
        if !flags.contains(CanFlags::REMOTE) {
            data[..len as usize].copy_from_slice(&buf[8..8 + len as usize]);
        }

        Ok(Self::from_parts(word & EFF_MASK, flags, len, data))
    }

    /// Big endian form of [`CanFrame::encode`].
    pub fn to_bytes(&self) -> [u8; CAN_FRAME_LEN] {
        self.encode::<BigEndian>()
    }

    /// Big endian form of [`CanFrame::decode`].
    pub fn from_bytes(buf: &[u8]) -> Result<Self> {
        Self::decode::<BigEndian>(buf)
    }
}

/// `can-utils` notation: `123#DEADBEEF`, `1ABCDEF0#00`, `123#R`, `123#R4`.
impl fmt::Display for CanFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_error() {
            write!(f, "{:08X}#", self.can_id | ERR_FLAG)?;
        } else if self.is_extended() {
            write!(f, "{:08X}#", self.can_id)?;
        } else {
            write!(f, "{:03X}#", self.can_id)?;
        }

        if self.is_remote() {
            write!(f, "R")?;
            if self.len > 0 {
                write!(f, "{}", self.len)?;
            }
            return Ok(());
        }

        for byte in self.data() {
            write!(f, "{:02X}", byte)?;
        }
        Ok(())
    }
}

impl FromStr for CanFrame {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || Error::InvalidFrameString(s.to_owned());

        let (id, payload) = s.split_once('#').ok_or_else(invalid)?;
        let word = u32::from_str_radix(id, 16).map_err(|_| invalid())?;

        let (can_id, mut flags) = match id.len() {
            3 if word <= SFF_MASK => (word, CanFlags::empty()),
            8 if word & ERR_FLAG != 0 => (word & ERR_MASK, CanFlags::ERROR),
            8 if word <= EFF_MASK => (word, CanFlags::EXTENDED),
            _ => return Err(invalid()),
        };

        if let Some(dlc) = payload.strip_prefix('R') {
            let dlc = if dlc.is_empty() {
                0
            } else {
                dlc.parse::<usize>().map_err(|_| invalid())?
            };
            let frame = CanFrame::remote(can_id, dlc)?;
            flags |= frame.flags;
            return Ok(CanFrame { flags, ..frame });
        }

        let data = parse_hex(payload).ok_or_else(invalid)?;
        CanFrame::with_flags(can_id, &data, flags)
    }
}

/// Parses hex pairs, tolerating `.` separators between bytes.
pub fn parse_hex(s: &str) -> Option<Vec<u8>> {
    let digits: Vec<u8> = s.bytes().filter(|b| *b != b'.').collect();
    if digits.len() % 2 != 0 {
        return None;
    }

    digits
        .chunks(2)
        .map(|pair| {
            let pair = std::str::from_utf8(pair).ok()?;
            u8::from_str_radix(pair, 16).ok()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use byteorder::{LittleEndian, NativeEndian};

    #[test]
    fn packs_like_struct_ib3x8s() {
        let frame = CanFrame::new(0x123, &[0x01, 0x02]).unwrap();
        assert_eq!(
            frame.to_bytes(),
            [0x00, 0x00, 0x01, 0x23, 2, 0, 0, 0, 0x01, 0x02, 0, 0, 0, 0, 0, 0]
        );
    }

    #[test]
    fn sets_extended_flag_above_standard_range() {
        let frame = CanFrame::new(0x800, &[]).unwrap();
        assert!(frame.is_extended());
        assert_eq!(frame.raw_id(), 0x800 | EFF_FLAG);
        assert_eq!(frame.to_bytes()[0] & 0x80, 0x80);

        let frame = CanFrame::new(0x7ff, &[]).unwrap();
        assert!(!frame.is_extended());
    }

    #[test]
    fn keeps_explicit_extended_flag_for_low_ids() {
        let frame = CanFrame::with_flags(0x10, &[0xaa], CanFlags::EXTENDED).unwrap();
        assert_eq!(frame.raw_id(), 0x10 | EFF_FLAG);
        assert_eq!(CanFrame::from_bytes(&frame.to_bytes()).unwrap(), frame);
    }

    #[test]
    fn rejects_oversized_payload() {
        let err = CanFrame::new(0x1, &[0u8; 9]).unwrap_err();
        assert!(matches!(err, Error::PayloadTooLong(9)));
    }

    #[test]
    fn rejects_identifier_wider_than_29_bits() {
        let err = CanFrame::new(0x2000_0000, &[]).unwrap_err();
        assert!(matches!(err, Error::InvalidId(0x2000_0000)));
    }

    #[test]
    fn decode_rejects_short_buffer() {
        let err = CanFrame::from_bytes(&[0u8; 15]).unwrap_err();
        assert!(matches!(
            err,
            Error::ShortBuffer {
                expected: 16,
                actual: 15
            }
        ));
    }

    #[test]
    fn decode_rejects_dlc_above_eight() {
        let mut buf = [0u8; CAN_FRAME_LEN];
        buf[4] = 9;
        assert!(matches!(
            CanFrame::from_bytes(&buf),
            Err(Error::InvalidDlc(9))
        ));
    }

    #[test]
    fn decode_ignores_bytes_past_dlc() {
        let mut buf = CanFrame::new(0x42, &[1, 2, 3]).unwrap().to_bytes();
        buf[12] = 0xff;
        buf[15] = 0xee;
        let frame = CanFrame::from_bytes(&buf).unwrap();
        assert_eq!(frame, CanFrame::new(0x42, &[1, 2, 3]).unwrap());
    }

    #[test]
    fn byte_order_only_affects_identifier_word() {
        let frame = CanFrame::new(0x1234_5678, &[9, 8, 7]).unwrap();
        let le = frame.encode::<LittleEndian>();
        let be = frame.encode::<BigEndian>();
        assert_eq!(le[0..4], [0x78, 0x56, 0x34, 0x92]);
        assert_eq!(be[0..4], [0x92, 0x34, 0x56, 0x78]);
        assert_eq!(le[4..], be[4..]);
        assert_eq!(
            CanFrame::decode::<NativeEndian>(&frame.encode::<NativeEndian>()).unwrap(),
            frame
        );
    }

    #[test]
    fn remote_frame_carries_dlc_without_data() {
        let frame = CanFrame::remote(0x321, 4).unwrap();
        assert!(frame.is_remote());
        assert_eq!(frame.len(), 4);
        assert_eq!(frame.data(), &[0, 0, 0, 0]);
        assert_eq!(CanFrame::from_bytes(&frame.to_bytes()).unwrap(), frame);
    }

    #[test]
    fn display_matches_can_utils() {
        let std = CanFrame::new(0x1a, &[0xde, 0xad]).unwrap();
        assert_eq!(std.to_string(), "01A#DEAD");

        let ext = CanFrame::new(0x1abc_def0, &[0]).unwrap();
        assert_eq!(ext.to_string(), "1ABCDEF0#00");

        let rtr = CanFrame::remote(0x7ff, 0).unwrap();
        assert_eq!(rtr.to_string(), "7FF#R");
    }

    #[test]
    fn parses_can_utils_notation() {
        let frame: CanFrame = "123#11.22.33".parse().unwrap();
        assert_eq!(frame, CanFrame::new(0x123, &[0x11, 0x22, 0x33]).unwrap());

        let frame: CanFrame = "00000010#".parse().unwrap();
        assert!(frame.is_extended());
        assert_eq!(frame.id(), 0x10);
        assert!(frame.is_empty());

        let frame: CanFrame = "123#R3".parse().unwrap();
        assert!(frame.is_remote());
        assert_eq!(frame.len(), 3);

        let frame: CanFrame = "20000004#0004000000000000".parse().unwrap();
        assert!(frame.is_error());
        assert_eq!(frame.id(), 0x4);
        assert_eq!(frame.to_string(), "20000004#0004000000000000");
    }

    #[test]
    fn rejects_malformed_notation() {
        for input in ["123", "1234#00", "800#00", "123#0", "123#zz", "123#001122334455667788"] {
            assert!(input.parse::<CanFrame>().is_err(), "{input} parsed");
        }
    }

    #[test]
    fn format_flag_only_for_wide_ids() {
        assert_eq!(with_format_flag(0x7ff), 0x7ff);
        assert_eq!(with_format_flag(0x800), 0x800 | EFF_FLAG);
        assert_eq!(with_format_flag(0x18ff_0001 | EFF_FLAG), 0x18ff_0001 | EFF_FLAG);
    }
}
