use std::marker::PhantomData;

use byteorder::{BigEndian, ByteOrder};
use bytes::{BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::frame::{CanFrame, CAN_FRAME_LEN};
use crate::Error;

/// Back-to-back `struct can_frame`s.
///
/// With the default big endian order this is the stream format spoken by the
/// TCP bridge; `CanFrameCodec<NativeEndian>` matches what a raw socket reads.
pub struct CanFrameCodec<B = BigEndian> {
    order: PhantomData<fn() -> B>,
}

impl<B> CanFrameCodec<B> {
    pub fn new() -> Self {
        CanFrameCodec { order: PhantomData }
    }
}

impl<B> Default for CanFrameCodec<B> {
    fn default() -> Self {
        Self::new()
    }
}

impl<B: ByteOrder> Decoder for CanFrameCodec<B> {
    type Item = CanFrame;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < CAN_FRAME_LEN {
            src.reserve(CAN_FRAME_LEN - src.len());
            return Ok(None);
        }

        let packet = src.split_to(CAN_FRAME_LEN);
        CanFrame::decode::<B>(&packet).map(Some)
    }
}

impl<B: ByteOrder> Encoder<CanFrame> for CanFrameCodec<B> {
    type Error = Error;

    fn encode(&mut self, item: CanFrame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        dst.reserve(CAN_FRAME_LEN);
        dst.put_slice(&item.encode::<B>());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_codec_waits_for_complete_frame() {
        let frame = CanFrame::new(0x321, &[1, 2, 3, 4]).unwrap();
        let bytes = frame.to_bytes();

        let mut codec = CanFrameCodec::<BigEndian>::new();
        let mut buf = BytesMut::from(&bytes[..10]);
        assert!(codec.decode(&mut buf).unwrap().is_none());

        buf.extend_from_slice(&bytes[10..]);
        buf.extend_from_slice(&bytes[..3]);
        assert_eq!(codec.decode(&mut buf).unwrap(), Some(frame));
        assert_eq!(buf.len(), 3);
    }

    #[test]
    fn frame_codec_encodes_big_endian_by_default() {
        let frame = CanFrame::new(0x1abcde, &[0xff]).unwrap();
        let mut codec: CanFrameCodec = CanFrameCodec::new();
        let mut buf = BytesMut::new();
        codec.encode(frame, &mut buf).unwrap();
        assert_eq!(&buf[..], &frame.to_bytes()[..]);
    }
}
