//! Property-based tests for the report codec.
//!
//! Decoding a fixed-layout report and re-encoding the extracted fields must
//! reproduce the frame byte-for-byte, for every supported report tag.

use bytes::BytesMut;
use motelink_frame::report::{self, report_name};
use motelink_frame::{
    decode_report, encode_command, encode_report, AddressSpace, CommandFrame, FrameError,
    ReadRequest, WriteRequest, HEADER_SIZE, MAX_COMMAND_PAYLOAD, MAX_OFFSET,
};
use proptest::prelude::*;

/// Data report tags and their frame lengths.
const DATA_REPORTS: &[(u8, usize)] = &[
    (report::BTN, 4),
    (report::BTN_ACC, 7),
    (report::BTN_EXT8, 12),
    (report::BTN_ACC_IR12, 19),
    (report::BTN_EXT19, 23),
    (report::BTN_ACC_EXT16, 23),
    (report::BTN_IR10_EXT9, 23),
    (report::BTN_ACC_IR10_EXT6, 23),
    (report::EXT21, 23),
];

/// Strategy: a well-formed frame for `tag` whose button bytes only use
/// defined button bits.
fn arb_frame(tag: u8, len: usize) -> impl Strategy<Value = Vec<u8>> {
    proptest::collection::vec(any::<u8>(), len - HEADER_SIZE).prop_map(move |body| {
        let mut frame = Vec::with_capacity(len);
        frame.push(0xA1);
        frame.push(tag);
        frame.extend_from_slice(&body);
        if tag != report::EXT21 {
            frame[2] &= 0x1F;
            frame[3] &= 0x9F;
        }
        frame
    })
}

fn arb_data_frame() -> impl Strategy<Value = Vec<u8>> {
    proptest::sample::select(DATA_REPORTS).prop_flat_map(|(tag, len)| arb_frame(tag, len))
}

fn roundtrip(frame: &[u8]) -> Result<Vec<u8>, TestCaseError> {
    let decoded = decode_report(frame)
        .map_err(|e| TestCaseError::fail(format!("decode {}: {e}", report_name(frame[1]))))?;
    let encoded = encode_report(&decoded)
        .map_err(|e| TestCaseError::fail(format!("encode {}: {e}", report_name(frame[1]))))?;
    Ok(encoded.to_vec())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(500))]

    /// Every data report survives decode then encode unchanged.
    #[test]
    fn prop_data_report_roundtrip(frame in arb_data_frame()) {
        let encoded = roundtrip(&frame)?;
        prop_assert_eq!(encoded, frame);
    }

    /// Status reports round-trip when the reserved bytes are zero.
    #[test]
    fn prop_status_roundtrip(mut frame in arb_frame(report::STATUS, 8)) {
        frame[5] = 0;
        frame[6] = 0;
        let encoded = roundtrip(&frame)?;
        prop_assert_eq!(encoded, frame);
    }

    /// Read replies round-trip for every error and size nibble.
    #[test]
    fn prop_read_reply_roundtrip(frame in arb_frame(report::READ_DATA, 23)) {
        let encoded = roundtrip(&frame)?;
        prop_assert_eq!(encoded, frame);
    }

    /// Write acks round-trip.
    #[test]
    fn prop_write_ack_roundtrip(frame in arb_frame(report::WRITE_ACK, 6)) {
        let encoded = roundtrip(&frame)?;
        prop_assert_eq!(encoded, frame);
    }

    /// Any frame shorter than its layout is rejected as truncated.
    #[test]
    fn prop_short_frame_truncated(
        (tag, len) in proptest::sample::select(DATA_REPORTS),
        cut in 1usize..10,
    ) {
        let short = len.saturating_sub(cut).max(HEADER_SIZE);
        let mut frame = vec![0u8; short];
        frame[0] = 0xA1;
        frame[1] = tag;
        let is_truncated = matches!(decode_report(&frame), Err(FrameError::Truncated { .. }));
        prop_assert!(is_truncated, "tag 0x{:02X} len {}", tag, short);
    }

    /// Tags outside the protocol never decode.
    #[test]
    fn prop_unknown_tags_rejected(tag in any::<u8>(), body in proptest::collection::vec(any::<u8>(), 21)) {
        prop_assume!(!report::is_input(tag));
        let mut frame = vec![0xA1, tag];
        frame.extend_from_slice(&body);
        let is_unknown = matches!(decode_report(&frame), Err(FrameError::UnknownReport(t)) if t == tag);
        prop_assert!(is_unknown);
    }

    /// Commands encode within the cap and decode back to the same payload.
    #[test]
    fn prop_command_roundtrip(
        tag in 0x11u8..=0x1A,
        payload in proptest::collection::vec(any::<u8>(), 0..=MAX_COMMAND_PAYLOAD),
    ) {
        let mut buf = BytesMut::new();
        encode_command(tag, &payload, &mut buf).map_err(|e| TestCaseError::fail(e.to_string()))?;
        let decoded = CommandFrame::decode(&buf).map_err(|e| TestCaseError::fail(e.to_string()))?;
        prop_assert_eq!(decoded.report, tag);
        prop_assert_eq!(decoded.payload.as_ref(), payload.as_slice());
    }

    /// Oversized command payloads are always rejected.
    #[test]
    fn prop_command_overflow_rejected(extra in 1usize..64) {
        let payload = vec![0u8; MAX_COMMAND_PAYLOAD + extra];
        let result = encode_command(report::SPEAKER_DATA, &payload, &mut BytesMut::new());
        let is_too_large = matches!(result, Err(FrameError::PayloadTooLarge { .. }));
        prop_assert!(is_too_large);
    }

    /// Memory request payloads decode back to the request they came from.
    #[test]
    fn prop_memory_request_roundtrip(
        register in any::<bool>(),
        offset in 0u32..=MAX_OFFSET,
        len in 1u16..=u16::MAX,
        data in proptest::collection::vec(any::<u8>(), 1..=16),
    ) {
        let space = if register { AddressSpace::Register } else { AddressSpace::Eeprom };

        let read = ReadRequest::new(space, offset, len).map_err(|e| TestCaseError::fail(e.to_string()))?;
        prop_assert_eq!(ReadRequest::decode(&read.encode()).ok(), Some(read));

        let write = WriteRequest::new(space, offset, data).map_err(|e| TestCaseError::fail(e.to_string()))?;
        prop_assert_eq!(WriteRequest::decode(&write.encode()).ok(), Some(write));
    }
}
