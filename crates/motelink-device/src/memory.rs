//! Memory access: reads, chunked writes, and request/reply commands.
//!
//! Every operation takes the write lock first and holds it across compose,
//! send and await, then opens one exclusive wait. The reply registration is
//! armed before the request goes out, so a fast reply cannot be missed.

use std::sync::Arc;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use motelink_frame::report::{self, report_name};
use motelink_frame::{
    AddressSpace, InboundFrame, ReadRequest, Report, ReportWriter, WriteRequest, MAX_OFFSET,
    READ_REPLY_MAX, WRITE_CHUNK_MAX,
};
use motelink_transport::PacketChannel;
use tracing::{debug, warn};

use crate::correlator::WaitGuard;
use crate::device::Device;
use crate::error::{DeviceError, Result};

/// One step of a write sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteStep {
    /// Send a command report as-is.
    Report { report: u8, payload: Bytes },
    /// Write a block of memory.
    Memory {
        space: AddressSpace,
        offset: u32,
        data: Bytes,
    },
}

impl WriteStep {
    pub fn report(report: u8, payload: &[u8]) -> Self {
        WriteStep::Report {
            report,
            payload: Bytes::copy_from_slice(payload),
        }
    }

    pub fn memory(space: AddressSpace, offset: u32, data: &[u8]) -> Self {
        WriteStep::Memory {
            space,
            offset,
            data: Bytes::copy_from_slice(data),
        }
    }
}

impl Device {
    /// Read `len` bytes starting at `offset`.
    ///
    /// The controller answers in chunks of up to 16 bytes. Gathering stops
    /// once `len` bytes have arrived or a chunk comes back short, so the
    /// result may be shorter than requested. A chunk carrying an error code
    /// fails the read with [`DeviceError::DeviceNack`].
    pub fn read(&self, space: AddressSpace, offset: u32, len: usize) -> Result<Bytes> {
        let wire_len = u16::try_from(len)
            .map_err(|_| DeviceError::InvalidArgument(format!("read length {len} exceeds 65535")))?;
        check_range(offset, len)?;
        let request = ReadRequest::new(space, offset, wire_len)?;

        let mut writer = self.shared.writer.lock();
        let wait = self.shared.correlator.begin_exclusive_wait()?;
        wait.expect(report::READ_DATA, true, false)?;
        writer.send(report::READ_MEMORY, &request.encode())?;
        debug!(%space, offset = format_args!("0x{offset:06X}"), len, "memory read");

        let mut data = BytesMut::with_capacity(len);
        while data.len() < len {
            let frame = self.next_reply(&wait)?;
            let Report::ReadData(reply) = frame.decode()? else {
                continue;
            };
            // Replies carry the low 16 bits of their address. Anything else
            // is left over from an earlier read that gave up waiting.
            let expected = offset.wrapping_add(data.len() as u32) as u16;
            if reply.offset != expected {
                warn!(
                    offset = format_args!("0x{:04X}", reply.offset),
                    expected = format_args!("0x{expected:04X}"),
                    "ignoring stale read reply"
                );
                continue;
            }
            if reply.error != 0 {
                warn!(
                    offset = format_args!("0x{offset:06X}"),
                    code = reply.error,
                    "read rejected"
                );
                return Err(DeviceError::DeviceNack { code: reply.error });
            }
            let chunk = reply.data();
            let take = chunk.len().min(len - data.len());
            data.extend_from_slice(&chunk[..take]);
            if chunk.len() < READ_REPLY_MAX {
                break;
            }
        }
        Ok(data.freeze())
    }

    /// Write `data` starting at `offset`, in chunks of up to 16 bytes.
    ///
    /// Each chunk waits for its acknowledgement before the next is sent.
    /// A rejected chunk stops the transfer with
    /// [`DeviceError::WriteFailed`], carrying the bytes acknowledged so far.
    /// Any other failure after the first acknowledged chunk is wrapped in
    /// [`DeviceError::PartialWrite`] with the same count.
    pub fn write(&self, space: AddressSpace, offset: u32, data: &[u8]) -> Result<usize> {
        if data.is_empty() {
            return Err(DeviceError::InvalidArgument("write of zero bytes".into()));
        }
        check_range(offset, data.len())?;

        let mut writer = self.shared.writer.lock();
        let wait = self.shared.correlator.begin_exclusive_wait()?;
        wait.expect(report::WRITE_ACK, true, false)?;
        debug!(%space, offset = format_args!("0x{offset:06X}"), len = data.len(), "memory write");

        let mut written = 0usize;
        for chunk in data.chunks(WRITE_CHUNK_MAX) {
            // Range was checked above, so the chunk offset cannot exceed 24 bits.
            let chunk_offset = offset + written as u32;
            let code = match self.write_chunk(&mut writer, &wait, space, chunk_offset, chunk) {
                Ok(code) => code,
                Err(err) if written > 0 => {
                    warn!(
                        offset = format_args!("0x{chunk_offset:06X}"),
                        written,
                        error = %err,
                        "write interrupted"
                    );
                    return Err(DeviceError::PartialWrite {
                        written,
                        source: Box::new(err),
                    });
                }
                Err(err) => return Err(err),
            };
            if code != 0 {
                warn!(
                    offset = format_args!("0x{chunk_offset:06X}"),
                    written,
                    code,
                    "write rejected"
                );
                return Err(DeviceError::WriteFailed { written, code });
            }
            written += chunk.len();
        }
        Ok(written)
    }

    /// Send a command and wait for a reply tagged `reply_tag`.
    ///
    /// Makes up to `retries` attempts, each waiting `timeout`. The reply is
    /// also processed as an ordinary report, so the state snapshot already
    /// reflects it on return.
    pub fn request_command(
        &self,
        report: u8,
        payload: &[u8],
        reply_tag: u8,
        timeout: Duration,
        retries: u32,
    ) -> Result<InboundFrame> {
        if reply_tag == report::NONE {
            return Err(DeviceError::InvalidArgument("reply tag must not be NONE".into()));
        }
        let attempts = retries.max(1);

        let mut writer = self.shared.writer.lock();
        let wait = self.shared.correlator.begin_exclusive_wait()?;
        wait.expect(reply_tag, true, true)?;
        for attempt in 1..=attempts {
            writer.send(report, payload)?;
            match wait.wait(Some(timeout)) {
                Ok(Some(frame)) => return Ok(frame),
                Ok(None) => return Err(DeviceError::Disconnected),
                Err(DeviceError::Timeout(_)) => {
                    debug!(
                        report = report_name(report),
                        attempt,
                        attempts,
                        "no reply; retrying"
                    );
                }
                Err(err) => return Err(err),
            }
        }
        warn!(report = report_name(report), attempts, "request timed out");
        Err(DeviceError::Timeout(timeout.saturating_mul(attempts)))
    }

    /// Run steps in order, stopping at the first failure.
    pub fn exec_write_seq(&self, steps: &[WriteStep]) -> Result<()> {
        for step in steps {
            match step {
                WriteStep::Report { report, payload } => self.send_report(*report, payload)?,
                WriteStep::Memory {
                    space,
                    offset,
                    data,
                } => {
                    self.write(*space, *offset, data)?;
                }
            }
        }
        Ok(())
    }

    /// Send one chunk and return the acknowledgement's error code.
    fn write_chunk(
        &self,
        writer: &mut ReportWriter<Arc<dyn PacketChannel>>,
        wait: &WaitGuard<'_>,
        space: AddressSpace,
        offset: u32,
        chunk: &[u8],
    ) -> Result<u8> {
        let request = WriteRequest::new(space, offset, Bytes::copy_from_slice(chunk))?;
        writer.send(report::WRITE_MEMORY, &request.encode())?;
        self.next_write_ack(wait)
    }

    fn next_reply(&self, wait: &WaitGuard<'_>) -> Result<InboundFrame> {
        wait.wait(self.shared.config.transfer_timeout)?
            .ok_or(DeviceError::Disconnected)
    }

    /// Wait for the acknowledgement of a memory write, skipping acks for
    /// other output reports.
    fn next_write_ack(&self, wait: &WaitGuard<'_>) -> Result<u8> {
        loop {
            let frame = self.next_reply(wait)?;
            match frame.decode()? {
                Report::WriteAck(ack) if ack.report == report::WRITE_MEMORY => return Ok(ack.error),
                Report::WriteAck(ack) => {
                    debug!(acked = report_name(ack.report), "ignoring unrelated ack");
                }
                _ => {}
            }
        }
    }
}

fn check_range(offset: u32, len: usize) -> Result<()> {
    if len == 0 {
        return Err(DeviceError::InvalidArgument("empty range".into()));
    }
    let last = u64::from(offset) + len as u64 - 1;
    if last > u64::from(MAX_OFFSET) {
        return Err(DeviceError::InvalidArgument(format!(
            "range 0x{offset:06X}+{len} exceeds the 24-bit address space"
        )));
    }
    Ok(())
}
