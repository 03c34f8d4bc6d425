use std::io::ErrorKind;

use bytes::BytesMut;
use motelink_transport::PacketChannel;
use tracing::trace;

use crate::codec::{encode_command, CommandFrame, MAX_COMMAND_PAYLOAD, MAX_FRAME_LEN};
use crate::error::{FrameError, Result};
use crate::report::report_name;

/// Writes one report per packet to a [`PacketChannel`].
///
/// The controller reads bit 0 of the first payload byte of every command as
/// the rumble motor state, so the writer carries that bit and ORs it in.
pub struct ReportWriter<T> {
    inner: T,
    buf: BytesMut,
    rumble: bool,
}

impl<T: PacketChannel> ReportWriter<T> {
    /// Create a new report writer with rumble off.
    pub fn new(inner: T) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(MAX_FRAME_LEN),
            rumble: false,
        }
    }

    /// Encode and send a command.
    pub fn send(&mut self, report: u8, payload: &[u8]) -> Result<()> {
        if payload.len() > MAX_COMMAND_PAYLOAD {
            return Err(FrameError::PayloadTooLarge {
                size: payload.len(),
                max: MAX_COMMAND_PAYLOAD,
            });
        }

        let mut body = [0u8; MAX_COMMAND_PAYLOAD];
        let body = &mut body[..payload.len()];
        body.copy_from_slice(payload);
        if self.rumble {
            if let Some(first) = body.first_mut() {
                *first |= 0x01;
            }
        }

        self.buf.clear();
        encode_command(report, body, &mut self.buf)?;
        trace!(report = report_name(report), len = self.buf.len(), "sending command");
        send_all(&self.inner, &self.buf)
    }

    /// Send a prepared command frame.
    pub fn write_command(&mut self, frame: &CommandFrame) -> Result<()> {
        self.send(frame.report, frame.payload.as_ref())
    }

    /// Send an already-framed packet verbatim.
    ///
    /// Used by the controller end of a link to emit inbound reports.
    pub fn send_raw(&mut self, packet: &[u8]) -> Result<()> {
        if packet.len() > MAX_FRAME_LEN {
            return Err(FrameError::PayloadTooLarge {
                size: packet.len(),
                max: MAX_FRAME_LEN,
            });
        }
        send_all(&self.inner, packet)
    }

    /// Set the rumble bit applied to subsequent commands.
    pub fn set_rumble(&mut self, on: bool) {
        self.rumble = on;
    }

    /// Current rumble bit.
    pub fn rumble(&self) -> bool {
        self.rumble
    }

    /// Borrow the underlying channel.
    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    /// Consume the writer and return the inner channel.
    pub fn into_inner(self) -> T {
        self.inner
    }
}

fn send_all<T: PacketChannel>(inner: &T, packet: &[u8]) -> Result<()> {
    loop {
        match inner.send_packet(packet) {
            Ok(n) if n == packet.len() => return Ok(()),
            Ok(0) => return Err(FrameError::ConnectionClosed),
            Ok(n) => {
                return Err(FrameError::Io(std::io::Error::new(
                    ErrorKind::WriteZero,
                    format!("short send: {n} of {} bytes", packet.len()),
                )))
            }
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => return Err(FrameError::Io(err)),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io;
    use std::sync::Mutex;

    use super::*;
    use crate::report;

    #[derive(Default)]
    struct RecordingChannel {
        sent: Mutex<Vec<Vec<u8>>>,
    }

    impl PacketChannel for RecordingChannel {
        fn send_packet(&self, packet: &[u8]) -> io::Result<usize> {
            self.sent.lock().unwrap().push(packet.to_vec());
            Ok(packet.len())
        }

        fn recv_packet(&self, _buf: &mut [u8]) -> io::Result<usize> {
            Ok(0)
        }

        fn shutdown(&self) -> io::Result<()> {
            Ok(())
        }
    }

    struct ClosedChannel;

    impl PacketChannel for ClosedChannel {
        fn send_packet(&self, _packet: &[u8]) -> io::Result<usize> {
            Err(io::Error::from(ErrorKind::BrokenPipe))
        }

        fn recv_packet(&self, _buf: &mut [u8]) -> io::Result<usize> {
            Ok(0)
        }

        fn shutdown(&self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn write_single_command() {
        let mut writer = ReportWriter::new(RecordingChannel::default());
        writer.send(report::LED_RUMBLE, &[0x10]).unwrap();
        let sent = writer.into_inner().sent.into_inner().unwrap();
        assert_eq!(sent, vec![vec![0x52, 0x11, 0x10]]);
    }

    #[test]
    fn rumble_bit_applied_to_first_byte() {
        let mut writer = ReportWriter::new(RecordingChannel::default());
        writer.set_rumble(true);
        writer.send(report::REPORT_MODE, &[0x00, 0x31]).unwrap();
        writer.send(report::STATUS_REQUEST, &[]).unwrap();
        writer.set_rumble(false);
        writer.send(report::REPORT_MODE, &[0x00, 0x31]).unwrap();
        let sent = writer.into_inner().sent.into_inner().unwrap();
        assert_eq!(sent[0], vec![0x52, 0x12, 0x01, 0x31]);
        assert_eq!(sent[1], vec![0x52, 0x15]);
        assert_eq!(sent[2], vec![0x52, 0x12, 0x00, 0x31]);
    }

    #[test]
    fn payload_too_large_rejected() {
        let mut writer = ReportWriter::new(RecordingChannel::default());
        let err = writer.send(report::SPEAKER_DATA, &[0u8; 31]).unwrap_err();
        assert!(matches!(err, FrameError::PayloadTooLarge { .. }));
        assert!(writer.get_ref().sent.lock().unwrap().is_empty());
    }

    #[test]
    fn send_raw_is_verbatim() {
        let mut writer = ReportWriter::new(RecordingChannel::default());
        writer.set_rumble(true);
        writer.send_raw(&[0xA1, 0x30, 0x00, 0x00]).unwrap();
        let sent = writer.into_inner().sent.into_inner().unwrap();
        assert_eq!(sent[0], vec![0xA1, 0x30, 0x00, 0x00]);
    }

    #[test]
    fn broken_channel_surfaces_io() {
        let mut writer = ReportWriter::new(ClosedChannel);
        let err = writer.send(report::STATUS_REQUEST, &[0]).unwrap_err();
        assert!(matches!(err, FrameError::Io(_)));
    }
}
