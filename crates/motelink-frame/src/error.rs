/// Errors that can occur while encoding, decoding or moving reports.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The inbound transaction header is not `DATA | INPUT`.
    #[error("invalid transaction header 0x{0:02X} (expected 0xA1)")]
    InvalidHeader(u8),

    /// The payload exceeds the 32-byte frame cap.
    #[error("payload too large ({size} bytes, max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// The frame is shorter than its report layout requires.
    #[error("report 0x{report:02X} truncated ({len} bytes, layout needs {expected})")]
    Truncated {
        report: u8,
        len: usize,
        expected: usize,
    },

    /// The report tag is not part of the protocol.
    #[error("unknown report type 0x{0:02X}")]
    UnknownReport(u8),

    /// The report tag is known but its layout is not supported.
    #[error("unsupported report type 0x{0:02X} (interleaved IR data)")]
    UnsupportedReport(u8),

    /// A request field is outside the range the wire format can carry.
    #[error("invalid field: {0}")]
    InvalidField(String),

    /// An I/O error occurred while reading or writing reports.
    #[error("frame I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The channel was closed by the peer.
    #[error("connection closed")]
    ConnectionClosed,
}

impl FrameError {
    /// Whether this error describes a malformed or unexpected frame rather
    /// than a failed channel. Protocol errors are recoverable by dropping the
    /// frame.
    pub fn is_protocol(&self) -> bool {
        !matches!(self, FrameError::Io(_) | FrameError::ConnectionClosed)
    }
}

pub type Result<T> = std::result::Result<T, FrameError>;
