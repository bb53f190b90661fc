use std::time::Duration;

use futures::StreamExt;
use socketcan_proto::bcm::BCM_HEADER_LEN;
use socketcan_proto::frame::{CAN_FRAME_LEN, EFF_FLAG, EFF_MASK};
use socketcan_proto::{BcmFlags, BcmMsg, BcmOpcode, CanFrame, CanFrameCodec, Error};
use tokio_util::codec::FramedRead;

const SAMPLE_IDS: [u32; 8] = [0, 0x1, 0x123, 0x7ff, 0x800, 0x1_0000, 0x1abc_def0, EFF_MASK];

#[test]
fn frames_round_trip_for_every_length() {
    let payload = [0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77, 0x88];
    for id in SAMPLE_IDS {
        for len in 0..=8 {
            let frame = CanFrame::new(id, &payload[..len]).unwrap();
            let decoded = CanFrame::from_bytes(&frame.to_bytes()).unwrap();
            assert_eq!(decoded, frame);
            assert_eq!(decoded.data(), &payload[..len]);
            assert_eq!(decoded.id(), id);
        }
    }
}

#[test]
fn extended_flag_is_serialized_for_wide_ids() {
    for id in SAMPLE_IDS.iter().copied().filter(|id| *id > 0x7ff) {
        let bytes = CanFrame::new(id, &[]).unwrap().to_bytes();
        let word = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        assert_ne!(word & EFF_FLAG, 0, "id {id:#x}");
    }
}

#[test]
fn bcm_message_keeps_its_frames() {
    for n in [0usize, 1, 5, 64] {
        let frames: Vec<CanFrame> = (0..n)
            .map(|i| CanFrame::new(0x100 + i as u32, &[i as u8; 3]).unwrap())
            .collect();
        let msg = BcmMsg::new(BcmOpcode::TxSetup, 0x100).with_frames(frames.clone());

        let bytes = msg.to_bytes();
        assert_eq!(bytes.len(), BCM_HEADER_LEN + n * CAN_FRAME_LEN);

        let decoded = BcmMsg::from_bytes(&bytes).unwrap();
        assert_eq!(decoded.nframes(), n);
        assert_eq!(decoded.frames, frames);
    }
}

#[test]
fn cyclic_setup_example() {
    let f = CanFrame::new(0x100, &[0xca, 0xfe]).unwrap();
    let msg = BcmMsg::new(BcmOpcode::TxSetup, 0x100)
        .with_flags(BcmFlags::SETTIMER | BcmFlags::STARTTIMER)
        .with_ival2(Duration::from_secs_f64(0.5))
        .with_frames(vec![f]);

    let decoded = BcmMsg::from_bytes(&msg.to_bytes()).unwrap();
    assert_eq!(decoded.opcode, BcmOpcode::TxSetup);
    assert_eq!(decoded.flags.bits(), 3);
    assert_eq!(decoded.nframes(), 1);
    assert!((decoded.ival2.as_secs_f64() - 0.5).abs() < 1e-6);
}

#[test]
fn short_buffers_are_rejected() {
    assert!(matches!(
        CanFrame::from_bytes(&[]),
        Err(Error::ShortBuffer { .. })
    ));
    assert!(matches!(
        BcmMsg::from_bytes(&[0u8; 8]),
        Err(Error::ShortBuffer { .. })
    ));
}

#[tokio::test]
async fn frame_stream_decodes_from_reader() {
    let frames = [
        CanFrame::new(0x1, &[1]).unwrap(),
        CanFrame::new(0x1234, &[2, 3]).unwrap(),
        CanFrame::remote(0x55, 2).unwrap(),
    ];
    let bytes: Vec<u8> = frames.iter().flat_map(|f| f.to_bytes()).collect();

    let codec: CanFrameCodec = CanFrameCodec::new();
    let mut reader = FramedRead::new(&bytes[..], codec);
    let mut decoded = Vec::new();
    while let Some(frame) = reader.next().await {
        decoded.push(frame.unwrap());
    }
    assert_eq!(decoded, frames);
}
