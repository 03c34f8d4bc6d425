//! User-space driver for Wii Remote motion controllers.
//!
//! motelink talks to a controller over a pair of packet channels (the HID
//! control and interrupt channels), decodes its reports, and exposes a
//! device handle with synchronous commands, chunked memory access and an
//! event queue.
//!
//! # Crate Structure
//!
//! - [`transport`]: packet channel abstraction and Unix seqpacket sockets
//! - [`frame`]: report codec, reader and writer
//! - [`device`]: device handle, router, correlator and emulator

/// Re-export transport types.
pub mod transport {
    pub use motelink_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use motelink_frame::*;
}

/// Re-export device types.
pub mod device {
    pub use motelink_device::*;
}

pub use motelink_device::{Device, DeviceConfig, DeviceError, Event, EventBatch, ReportMode};
