//! Device handle for motelink.
//!
//! A [`Device`] wraps one controller session: a router thread that reads
//! every inbound report, a correlator that hands replies to the caller that
//! asked for them, a memory engine for chunked reads and writes, and an
//! event queue fed with one [`EventBatch`] per report.
//!
//! ```no_run
//! use motelink_device::{Device, DeviceConfig, ReportMode};
//!
//! let device = Device::connect_path("/run/motelink", DeviceConfig::default())?;
//! device.set_report_mode(ReportMode::STATUS | ReportMode::BTN | ReportMode::ACC)?;
//! let batch = device.poll_events(true)?;
//! println!("{} events", batch.len());
//! # Ok::<(), motelink_device::DeviceError>(())
//! ```

pub mod command;
pub mod config;
pub mod correlator;
pub mod delivery;
pub mod device;
pub mod emulator;
pub mod error;
pub mod event;
pub mod extension;
pub mod flags;
pub mod memory;
mod router;
pub mod state;

pub use command::report_tag_for;
pub use config::DeviceConfig;
pub use correlator::{Correlator, WaitGuard};
pub use delivery::EventCallback;
pub use device::{Device, CONTROL_SOCKET, INTERRUPT_SOCKET};
pub use emulator::{Emulator, EmulatorServer};
pub use error::{DeviceError, Result};
pub use event::{ErrorKind, Event, EventBatch};
pub use extension::{
    BalanceState, ClassicButtons, ClassicState, ExtensionState, ExtensionType, MotionPlusState,
    NunchukButtons, NunchukState,
};
pub use flags::DeviceFlags;
pub use memory::WriteStep;
pub use state::{DeviceState, ReportMode};
