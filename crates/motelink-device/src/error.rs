use std::time::Duration;

use crate::extension::ExtensionType;

/// Errors that can occur in device operations.
#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(#[from] motelink_transport::TransportError),

    /// Frame-level error: a failed channel, or a malformed frame.
    #[error("frame error: {0}")]
    Frame(#[from] motelink_frame::FrameError),

    /// The controller answered with a non-zero error code.
    #[error("device rejected request (error code {code})")]
    DeviceNack { code: u8 },

    /// A chunked write stopped at a rejected chunk.
    #[error("write failed after {written} bytes (device error code {code})")]
    WriteFailed { written: usize, code: u8 },

    /// A chunked write failed for a reason other than a device rejection
    /// after some chunks were acknowledged.
    #[error("write stopped after {written} bytes: {source}")]
    PartialWrite {
        written: usize,
        #[source]
        source: Box<DeviceError>,
    },

    /// No matching reply arrived in time.
    #[error("no reply after {0:?}")]
    Timeout(Duration),

    /// A second exclusive wait or registration was attempted while one is
    /// active.
    #[error("another synchronous wait is already in progress")]
    ConcurrencyViolation,

    /// Non-blocking poll found no pending event batch.
    #[error("no event batch pending")]
    WouldBlock,

    /// The router has stopped; no further replies or events will arrive.
    #[error("device disconnected")]
    Disconnected,

    /// A caller-supplied argument is out of range.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A router or callback thread could not be started.
    #[error("failed to start thread: {0}")]
    Thread(#[source] std::io::Error),

    /// The extension found is not the one the operation needs.
    #[error("extension mismatch: expected {expected}, found {found}")]
    ExtensionMismatch {
        expected: ExtensionType,
        found: ExtensionType,
    },
}

impl DeviceError {
    /// The device error code as a negative number, for errors the controller
    /// itself reported.
    pub fn device_code(&self) -> Option<i32> {
        match self {
            DeviceError::DeviceNack { code } | DeviceError::WriteFailed { code, .. } => {
                Some(-i32::from(*code))
            }
            DeviceError::PartialWrite { source, .. } => source.device_code(),
            _ => None,
        }
    }

    /// Bytes acknowledged before a write failed, if this is a write failure.
    pub fn bytes_written(&self) -> Option<usize> {
        match self {
            DeviceError::WriteFailed { written, .. } | DeviceError::PartialWrite { written, .. } => {
                Some(*written)
            }
            _ => None,
        }
    }

    /// Whether this error means the connection itself is gone.
    pub fn is_fatal(&self) -> bool {
        match self {
            DeviceError::Transport(_) | DeviceError::Disconnected => true,
            DeviceError::Frame(err) => !err.is_protocol(),
            DeviceError::PartialWrite { source, .. } => source.is_fatal(),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, DeviceError>;
