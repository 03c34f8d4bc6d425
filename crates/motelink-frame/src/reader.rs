use std::io::ErrorKind;

use bytes::Bytes;
use motelink_transport::PacketChannel;

use crate::codec::{CommandFrame, InboundFrame};
use crate::error::{FrameError, Result};

/// Receive buffer size. Larger than any valid frame so oversized packets are
/// seen whole and rejected instead of silently truncated.
const RECV_BUFFER_SIZE: usize = 64;

/// Reads one report per packet from a [`PacketChannel`].
pub struct ReportReader<T> {
    inner: T,
    buf: [u8; RECV_BUFFER_SIZE],
}

impl<T: PacketChannel> ReportReader<T> {
    /// Create a new report reader.
    pub fn new(inner: T) -> Self {
        Self {
            inner,
            buf: [0u8; RECV_BUFFER_SIZE],
        }
    }

    /// Read the next packet without interpreting it (blocking).
    ///
    /// Returns `Err(FrameError::ConnectionClosed)` when the peer closed the
    /// channel.
    pub fn read_packet(&mut self) -> Result<Bytes> {
        loop {
            match self.inner.recv_packet(&mut self.buf) {
                Ok(0) => return Err(FrameError::ConnectionClosed),
                Ok(n) => return Ok(Bytes::copy_from_slice(&self.buf[..n])),
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(FrameError::Io(err)),
            }
        }
    }

    /// Read the next inbound frame (blocking).
    ///
    /// A packet with a bad header is a protocol error
    /// ([`FrameError::is_protocol`]); the reader stays usable.
    pub fn read_frame(&mut self) -> Result<InboundFrame> {
        let packet = self.read_packet()?;
        InboundFrame::new(packet)
    }

    /// Read the next outbound command, as seen by the controller end.
    pub fn read_command(&mut self) -> Result<CommandFrame> {
        let packet = self.read_packet()?;
        CommandFrame::decode(&packet)
    }

    /// Borrow the underlying channel.
    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    /// Consume the reader and return the inner channel.
    pub fn into_inner(self) -> T {
        self.inner
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::io;
    use std::sync::Mutex;

    use super::*;
    use crate::report;

    /// Replays a fixed script of receive results.
    struct ScriptedChannel {
        script: Mutex<VecDeque<io::Result<Vec<u8>>>>,
    }

    impl ScriptedChannel {
        fn new(script: Vec<io::Result<Vec<u8>>>) -> Self {
            Self {
                script: Mutex::new(script.into()),
            }
        }
    }

    impl PacketChannel for ScriptedChannel {
        fn send_packet(&self, packet: &[u8]) -> io::Result<usize> {
            Ok(packet.len())
        }

        fn recv_packet(&self, buf: &mut [u8]) -> io::Result<usize> {
            match self.script.lock().unwrap().pop_front() {
                Some(Ok(packet)) => {
                    let n = packet.len().min(buf.len());
                    buf[..n].copy_from_slice(&packet[..n]);
                    Ok(n)
                }
                Some(Err(err)) => Err(err),
                None => Ok(0),
            }
        }

        fn shutdown(&self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn read_single_frame() {
        let chan = ScriptedChannel::new(vec![Ok(vec![0xA1, 0x30, 0x00, 0x08])]);
        let mut reader = ReportReader::new(chan);
        let frame = reader.read_frame().unwrap();
        assert_eq!(frame.report(), report::BTN);
        assert_eq!(frame.payload(), &[0x00, 0x08]);
    }

    #[test]
    fn interrupted_is_retried() {
        let chan = ScriptedChannel::new(vec![
            Err(io::Error::from(ErrorKind::Interrupted)),
            Ok(vec![0xA1, 0x22, 0x00, 0x00, 0x16, 0x00]),
        ]);
        let mut reader = ReportReader::new(chan);
        assert_eq!(reader.read_frame().unwrap().report(), report::WRITE_ACK);
    }

    #[test]
    fn connection_closed_cleanly() {
        let mut reader = ReportReader::new(ScriptedChannel::new(Vec::new()));
        let err = reader.read_frame().unwrap_err();
        assert!(matches!(err, FrameError::ConnectionClosed));
        assert!(!err.is_protocol());
    }

    #[test]
    fn io_error_is_not_protocol() {
        let chan = ScriptedChannel::new(vec![Err(io::Error::from(ErrorKind::ConnectionReset))]);
        let err = ReportReader::new(chan).read_frame().unwrap_err();
        assert!(matches!(err, FrameError::Io(_)));
        assert!(!err.is_protocol());
    }

    #[test]
    fn bad_header_keeps_reader_usable() {
        let chan = ScriptedChannel::new(vec![
            Ok(vec![0x00, 0x30, 0x00, 0x00]),
            Ok(vec![0xA1, 0x30, 0x00, 0x00]),
        ]);
        let mut reader = ReportReader::new(chan);
        let err = reader.read_frame().unwrap_err();
        assert!(err.is_protocol());
        assert!(reader.read_frame().is_ok());
    }

    #[test]
    fn oversized_packet_rejected() {
        let chan = ScriptedChannel::new(vec![Ok(vec![0xA1; 40])]);
        let err = ReportReader::new(chan).read_frame().unwrap_err();
        assert!(matches!(err, FrameError::PayloadTooLarge { .. }));
    }

    #[test]
    fn read_command_from_host() {
        let chan = ScriptedChannel::new(vec![Ok(vec![0x52, 0x15, 0x00])]);
        let cmd = ReportReader::new(chan).read_command().unwrap();
        assert_eq!(cmd.report, report::STATUS_REQUEST);
    }

    #[test]
    fn roundtrip_over_socketpair() {
        let (left, right) = motelink_transport::ReportStream::pair().unwrap();
        let mut writer = crate::writer::ReportWriter::new(left);
        let mut reader = ReportReader::new(right);

        writer.send(report::STATUS_REQUEST, &[0x00]).unwrap();
        let cmd = reader.read_command().unwrap();
        assert_eq!(cmd.report, report::STATUS_REQUEST);
        assert_eq!(cmd.payload.as_ref(), &[0x00]);
    }
}
