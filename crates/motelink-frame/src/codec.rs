use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{FrameError, Result};
use crate::fields::{Accel, Buttons, IrDot, IrFormat, StatusFlags, IR_DOTS};
use crate::report;
use crate::request::READ_REPLY_MAX;

/// Frame header: transaction byte (1) + report tag (1).
pub const HEADER_SIZE: usize = 2;

/// Transaction byte for host-to-controller reports (`SET_REPORT | OUTPUT`).
pub const OUTPUT_HEADER: u8 = 0x52;

/// Transaction byte for controller-to-host reports (`DATA | INPUT`).
pub const INPUT_HEADER: u8 = 0xA1;

/// Largest frame the controller sends or accepts.
pub const MAX_FRAME_LEN: usize = 32;

/// Largest command payload that fits in one frame.
pub const MAX_COMMAND_PAYLOAD: usize = MAX_FRAME_LEN - HEADER_SIZE;

/// An outbound command: report tag plus payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandFrame {
    /// The output report tag.
    pub report: u8,
    /// The report payload, without header.
    pub payload: Bytes,
}

impl CommandFrame {
    /// Create a command frame, rejecting payloads over the frame cap.
    pub fn new(report: u8, payload: impl Into<Bytes>) -> Result<Self> {
        let payload = payload.into();
        check_command_payload(payload.len())?;
        Ok(Self { report, payload })
    }

    /// The total wire size of this frame (header + payload).
    pub fn wire_size(&self) -> usize {
        HEADER_SIZE + self.payload.len()
    }

    /// Parse a command as received by the controller side of a link.
    pub fn decode(packet: &[u8]) -> Result<Self> {
        match packet {
            [OUTPUT_HEADER, tag, payload @ ..] => Self::new(*tag, Bytes::copy_from_slice(payload)),
            [OUTPUT_HEADER] | [] => Err(FrameError::Truncated {
                report: report::NONE,
                len: packet.len(),
                expected: HEADER_SIZE,
            }),
            [other, ..] => Err(FrameError::InvalidHeader(*other)),
        }
    }
}

/// Encode a command into the wire format.
///
/// Wire format:
/// ```text
/// ┌──────────────┬──────────────┬──────────────────────┐
/// │ Header (1B)  │ Report (1B)  │ Payload (0..=30 B)   │
/// │ 0x52         │ 0x11..0x1A   │                      │
/// └──────────────┴──────────────┴──────────────────────┘
/// ```
pub fn encode_command(report: u8, payload: &[u8], dst: &mut BytesMut) -> Result<()> {
    check_command_payload(payload.len())?;
    dst.reserve(HEADER_SIZE + payload.len());
    dst.put_u8(OUTPUT_HEADER);
    dst.put_u8(report);
    dst.put_slice(payload);
    Ok(())
}

fn check_command_payload(size: usize) -> Result<()> {
    if size > MAX_COMMAND_PAYLOAD {
        return Err(FrameError::PayloadTooLarge {
            size,
            max: MAX_COMMAND_PAYLOAD,
        });
    }
    Ok(())
}

/// One raw inbound frame with a validated header.
///
/// The payload is not interpreted; see [`decode_report`] for that.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundFrame {
    bytes: Bytes,
}

impl InboundFrame {
    /// Wrap a received packet, validating the transaction header and size.
    pub fn new(bytes: impl Into<Bytes>) -> Result<Self> {
        let bytes = bytes.into();
        Self::validate(&bytes)?;
        Ok(Self { bytes })
    }

    /// Check that `packet` looks like an inbound frame.
    pub fn validate(packet: &[u8]) -> Result<()> {
        match packet.first() {
            Some(&INPUT_HEADER) => {}
            Some(&other) => return Err(FrameError::InvalidHeader(other)),
            None => {
                return Err(FrameError::Truncated {
                    report: report::NONE,
                    len: 0,
                    expected: HEADER_SIZE,
                })
            }
        }
        if packet.len() < HEADER_SIZE {
            return Err(FrameError::Truncated {
                report: report::NONE,
                len: packet.len(),
                expected: HEADER_SIZE,
            });
        }
        if packet.len() > MAX_FRAME_LEN {
            return Err(FrameError::PayloadTooLarge {
                size: packet.len() - HEADER_SIZE,
                max: MAX_COMMAND_PAYLOAD,
            });
        }
        Ok(())
    }

    /// The transaction header byte.
    pub fn header(&self) -> u8 {
        self.bytes[0]
    }

    /// The report tag.
    pub fn report(&self) -> u8 {
        self.bytes[1]
    }

    /// Everything after the header.
    pub fn payload(&self) -> &[u8] {
        &self.bytes[HEADER_SIZE..]
    }

    /// The whole frame, header included.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Consume the frame and return the underlying buffer.
    pub fn into_bytes(self) -> Bytes {
        self.bytes
    }

    /// Decode this frame by its report tag.
    pub fn decode(&self) -> Result<Report> {
        decode_report(&self.bytes)
    }
}

/// A decoded inbound report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Report {
    /// 0x20: status.
    Status(StatusReport),
    /// 0x21: memory read reply.
    ReadData(ReadReply),
    /// 0x22: memory write acknowledgement.
    WriteAck(WriteAck),
    /// 0x30-0x37, 0x3D: data reports.
    Input(InputReport),
}

impl Report {
    /// The report tag this variant was decoded from.
    pub fn report(&self) -> u8 {
        match self {
            Report::Status(_) => report::STATUS,
            Report::ReadData(_) => report::READ_DATA,
            Report::WriteAck(_) => report::WRITE_ACK,
            Report::Input(input) => input.report,
        }
    }

    /// The core buttons, if this report carries them.
    pub fn buttons(&self) -> Option<Buttons> {
        match self {
            Report::Status(status) => Some(status.buttons),
            Report::ReadData(reply) => Some(reply.buttons),
            Report::WriteAck(ack) => Some(ack.buttons),
            Report::Input(input) => input.buttons,
        }
    }
}

/// Status report layout: `[btn:2][flags:1][reserved:2][battery:1]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusReport {
    pub buttons: Buttons,
    pub flags: StatusFlags,
    pub battery: u8,
}

/// Read reply layout: `[btn:2][size-1:4 | err:4][offset:2 BE][data:16]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadReply {
    pub buttons: Buttons,
    /// Device error code (low nibble). Zero means success.
    pub error: u8,
    /// Number of valid data bytes, 1..=16.
    pub size: u8,
    /// Low 16 bits of the address this chunk was read from.
    pub offset: u16,
    pub data: [u8; READ_REPLY_MAX],
}

impl ReadReply {
    /// The valid part of `data`.
    pub fn data(&self) -> &[u8] {
        &self.data[..usize::from(self.size).min(READ_REPLY_MAX)]
    }
}

/// Write acknowledgement layout: `[btn:2][report:1][err:1]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteAck {
    pub buttons: Buttons,
    /// The output report being acknowledged.
    pub report: u8,
    /// Device error code. Zero means success.
    pub error: u8,
}

/// A data report. Which fields are present depends on the report tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputReport {
    pub report: u8,
    pub buttons: Option<Buttons>,
    pub accel: Option<Accel>,
    pub ir: Option<[IrDot; IR_DOTS]>,
    /// Raw extension bytes; their meaning depends on the attached extension.
    pub ext: Option<Bytes>,
}

impl InputReport {
    /// An empty report of the given tag; fill in the fields its layout carries.
    pub fn new(report: u8) -> Self {
        Self {
            report,
            buttons: None,
            accel: None,
            ir: None,
            ext: None,
        }
    }

    /// IR format carried by this report's layout, if any.
    pub fn ir_format(&self) -> Option<IrFormat> {
        input_layout(self.report).and_then(|layout| layout.ir.map(|(format, _)| format))
    }

    /// Number of extension bytes this report's layout carries, if any.
    pub fn ext_len(&self) -> Option<usize> {
        input_layout(self.report).and_then(|layout| layout.ext.map(|(_, len)| len))
    }

    /// Whether `tag` names a data report with a known layout.
    pub fn is_data_report(tag: u8) -> bool {
        input_layout(tag).is_some()
    }
}

/// Byte positions of each field within a data report frame.
#[derive(Debug, Clone, Copy)]
struct Layout {
    buttons: bool,
    accel: Option<usize>,
    ir: Option<(IrFormat, usize)>,
    ext: Option<(usize, usize)>,
    len: usize,
}

const BUTTONS_AT: usize = HEADER_SIZE;

fn input_layout(tag: u8) -> Option<Layout> {
    let base = Layout {
        buttons: true,
        accel: None,
        ir: None,
        ext: None,
        len: 4,
    };
    let layout = match tag {
        report::BTN => base,
        report::BTN_ACC => Layout {
            accel: Some(4),
            len: 7,
            ..base
        },
        report::BTN_EXT8 => Layout {
            ext: Some((4, 8)),
            len: 12,
            ..base
        },
        report::BTN_ACC_IR12 => Layout {
            accel: Some(4),
            ir: Some((IrFormat::Extended, 7)),
            len: 19,
            ..base
        },
        report::BTN_EXT19 => Layout {
            ext: Some((4, 19)),
            len: 23,
            ..base
        },
        report::BTN_ACC_EXT16 => Layout {
            accel: Some(4),
            ext: Some((7, 16)),
            len: 23,
            ..base
        },
        report::BTN_IR10_EXT9 => Layout {
            ir: Some((IrFormat::Basic, 4)),
            ext: Some((14, 9)),
            len: 23,
            ..base
        },
        report::BTN_ACC_IR10_EXT6 => Layout {
            accel: Some(4),
            ir: Some((IrFormat::Basic, 7)),
            ext: Some((17, 6)),
            len: 23,
            ..base
        },
        report::EXT21 => Layout {
            buttons: false,
            ext: Some((2, 21)),
            len: 23,
            ..base
        },
        _ => return None,
    };
    Some(layout)
}

const STATUS_LEN: usize = 8;
const READ_DATA_LEN: usize = 7 + READ_REPLY_MAX;
const WRITE_ACK_LEN: usize = 6;

/// Decode an inbound frame by its report tag.
///
/// Every field is length-checked before it is read. Unknown tags are
/// `UnknownReport`; interleaved IR reports are `UnsupportedReport`.
pub fn decode_report(frame: &[u8]) -> Result<Report> {
    InboundFrame::validate(frame)?;
    let tag = frame[1];
    match tag {
        report::STATUS => {
            let f = expect_len(frame, tag, STATUS_LEN)?;
            Ok(Report::Status(StatusReport {
                buttons: buttons_at(f),
                flags: StatusFlags::from_bits_truncate(f[4]),
                battery: f[7],
            }))
        }
        report::READ_DATA => {
            let f = expect_len(frame, tag, READ_DATA_LEN)?;
            let mut data = [0u8; READ_REPLY_MAX];
            data.copy_from_slice(&f[7..READ_DATA_LEN]);
            Ok(Report::ReadData(ReadReply {
                buttons: buttons_at(f),
                error: f[4] & 0x0F,
                size: (f[4] >> 4) + 1,
                offset: u16::from_be_bytes([f[5], f[6]]),
                data,
            }))
        }
        report::WRITE_ACK => {
            let f = expect_len(frame, tag, WRITE_ACK_LEN)?;
            Ok(Report::WriteAck(WriteAck {
                buttons: buttons_at(f),
                report: f[4],
                error: f[5],
            }))
        }
        report::BTN_ACC_IR36_1 | report::BTN_ACC_IR36_2 => Err(FrameError::UnsupportedReport(tag)),
        _ => {
            let layout = input_layout(tag).ok_or(FrameError::UnknownReport(tag))?;
            decode_input(frame, tag, layout).map(Report::Input)
        }
    }
}

fn decode_input(frame: &[u8], tag: u8, layout: Layout) -> Result<InputReport> {
    let f = expect_len(frame, tag, layout.len)?;
    Ok(InputReport {
        report: tag,
        buttons: layout.buttons.then(|| buttons_at(f)),
        accel: layout
            .accel
            .map(|at| Accel::from_bytes([f[at], f[at + 1], f[at + 2]])),
        ir: layout
            .ir
            .map(|(format, at)| IrDot::decode_all(format, &f[at..at + format.len()])),
        ext: layout
            .ext
            .map(|(at, len)| Bytes::copy_from_slice(&f[at..at + len])),
    })
}

fn expect_len(frame: &[u8], report: u8, expected: usize) -> Result<&[u8]> {
    if frame.len() < expected {
        return Err(FrameError::Truncated {
            report,
            len: frame.len(),
            expected,
        });
    }
    Ok(&frame[..expected])
}

fn buttons_at(frame: &[u8]) -> Buttons {
    Buttons::from_bytes([frame[BUTTONS_AT], frame[BUTTONS_AT + 1]])
}

/// Encode a report into an inbound frame, header included.
///
/// This is the inverse of [`decode_report`] for every fixed-layout field.
/// Reserved bytes are written as zero. Fields the tag's layout does not
/// carry are ignored; fields it does carry must be present.
pub fn encode_report(report: &Report) -> Result<Bytes> {
    match report {
        Report::Status(status) => {
            let mut frame = new_frame(report::STATUS, STATUS_LEN);
            put_buttons(&mut frame, status.buttons);
            frame[4] = status.flags.bits();
            frame[7] = status.battery;
            Ok(Bytes::from(frame))
        }
        Report::ReadData(reply) => {
            if reply.size == 0 || usize::from(reply.size) > READ_REPLY_MAX {
                return Err(FrameError::InvalidField(format!(
                    "read reply size {} outside 1..={READ_REPLY_MAX}",
                    reply.size
                )));
            }
            if reply.error > 0x0F {
                return Err(FrameError::InvalidField(format!(
                    "read reply error 0x{:02X} does not fit in a nibble",
                    reply.error
                )));
            }
            let mut frame = new_frame(report::READ_DATA, READ_DATA_LEN);
            put_buttons(&mut frame, reply.buttons);
            frame[4] = ((reply.size - 1) << 4) | reply.error;
            frame[5..7].copy_from_slice(&reply.offset.to_be_bytes());
            frame[7..].copy_from_slice(&reply.data);
            Ok(Bytes::from(frame))
        }
        Report::WriteAck(ack) => {
            let mut frame = new_frame(report::WRITE_ACK, WRITE_ACK_LEN);
            put_buttons(&mut frame, ack.buttons);
            frame[4] = ack.report;
            frame[5] = ack.error;
            Ok(Bytes::from(frame))
        }
        Report::Input(input) => encode_input(input),
    }
}

fn encode_input(input: &InputReport) -> Result<Bytes> {
    let tag = input.report;
    let layout = input_layout(tag).ok_or(FrameError::UnknownReport(tag))?;
    let mut frame = new_frame(tag, layout.len);

    if layout.buttons {
        let buttons = input.buttons.ok_or_else(|| missing_field(tag, "buttons"))?;
        put_buttons(&mut frame, buttons);
    }
    if let Some(at) = layout.accel {
        let accel = input.accel.ok_or_else(|| missing_field(tag, "accel"))?;
        frame[at..at + 3].copy_from_slice(&accel.to_bytes());
    }
    if let Some((format, at)) = layout.ir {
        let dots = input.ir.as_ref().ok_or_else(|| missing_field(tag, "ir"))?;
        IrDot::encode_all(format, dots, &mut frame[at..at + format.len()]);
    }
    if let Some((at, len)) = layout.ext {
        let ext = input.ext.as_ref().ok_or_else(|| missing_field(tag, "ext"))?;
        if ext.len() != len {
            return Err(FrameError::InvalidField(format!(
                "report 0x{tag:02X} carries {len} extension bytes, got {}",
                ext.len()
            )));
        }
        frame[at..at + len].copy_from_slice(ext);
    }
    Ok(Bytes::from(frame))
}

fn new_frame(tag: u8, len: usize) -> Vec<u8> {
    let mut frame = vec![0u8; len];
    frame[0] = INPUT_HEADER;
    frame[1] = tag;
    frame
}

fn put_buttons(frame: &mut [u8], buttons: Buttons) {
    frame[BUTTONS_AT..BUTTONS_AT + 2].copy_from_slice(&buttons.to_bytes());
}

fn missing_field(tag: u8, field: &str) -> FrameError {
    FrameError::InvalidField(format!("report 0x{tag:02X} requires {field}"))
}
