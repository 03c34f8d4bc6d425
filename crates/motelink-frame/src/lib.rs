//! Report codec for the motion controller wire protocol.
//!
//! Every report on the wire is one packet:
//! - A 1-byte transaction header (`0x52` outbound, `0xA1` inbound)
//! - A 1-byte report tag selecting the layout
//! - A fixed-layout payload, at most 30 bytes
//!
//! Decoding switches on the report tag and length-checks every field before
//! extracting it. Encoding is the exact inverse for every fixed-layout field.

pub mod codec;
pub mod error;
pub mod fields;
pub mod reader;
pub mod report;
pub mod request;
pub mod writer;

pub use codec::{
    decode_report, encode_command, encode_report, CommandFrame, InboundFrame, InputReport,
    ReadReply, Report, StatusReport, WriteAck, HEADER_SIZE, INPUT_HEADER, MAX_COMMAND_PAYLOAD,
    MAX_FRAME_LEN, OUTPUT_HEADER,
};
pub use error::{FrameError, Result};
pub use fields::{Accel, Buttons, IrDot, IrFormat, StatusFlags, IR_DOTS};
pub use reader::ReportReader;
pub use report::report_name;
pub use request::{
    AddressSpace, ReadRequest, WriteRequest, MAX_OFFSET, READ_REPLY_MAX, WRITE_CHUNK_MAX,
};
pub use writer::ReportWriter;
