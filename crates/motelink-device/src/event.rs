use std::time::SystemTime;

use motelink_frame::{Accel, Buttons, IrDot, IR_DOTS};
use serde::Serialize;

use crate::extension::{BalanceState, ClassicState, ExtensionType, MotionPlusState, NunchukState};
use crate::state::ReportMode;

/// Why the connection reported an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The inbound channel closed or failed.
    Disconnect,
    /// The inbound channel failed with an I/O error instead of closing.
    Comm,
}

/// One piece of news extracted from an inbound report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    Status {
        battery: u8,
        extension: ExtensionType,
    },
    Buttons {
        buttons: Buttons,
    },
    Accel {
        accel: Accel,
    },
    Ir {
        dots: [IrDot; IR_DOTS],
    },
    Nunchuk(NunchukState),
    Classic(ClassicState),
    Balance(BalanceState),
    #[serde(rename = "motionplus")]
    MotionPlus(MotionPlusState),
    Error {
        error: ErrorKind,
    },
}

impl Event {
    /// The report-mode bit that enables delivery of this event. Errors are
    /// always delivered.
    pub fn mode_flag(&self) -> ReportMode {
        match self {
            Event::Status { .. } => ReportMode::STATUS,
            Event::Buttons { .. } => ReportMode::BTN,
            Event::Accel { .. } => ReportMode::ACC,
            Event::Ir { .. } => ReportMode::IR,
            Event::Nunchuk(_) => ReportMode::NUNCHUK,
            Event::Classic(_) => ReportMode::CLASSIC,
            Event::Balance(_) => ReportMode::BALANCE,
            Event::MotionPlus(_) => ReportMode::MOTIONPLUS,
            Event::Error { .. } => ReportMode::empty(),
        }
    }

    /// Whether `mode` selects this event for delivery.
    pub fn enabled_by(&self, mode: ReportMode) -> bool {
        let flag = self.mode_flag();
        flag.is_empty() || mode.contains(flag)
    }
}

/// Events extracted from one inbound report, in report order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EventBatch {
    pub events: Vec<Event>,
    /// When the report was received.
    #[serde(serialize_with = "serialize_timestamp")]
    pub timestamp: SystemTime,
}

impl EventBatch {
    /// Stamp a batch with the current time.
    pub fn new(events: Vec<Event>) -> Self {
        Self {
            events,
            timestamp: SystemTime::now(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Whether this is the final batch of a connection.
    pub fn is_disconnect(&self) -> bool {
        self.events.iter().any(|event| {
            matches!(
                event,
                Event::Error {
                    error: ErrorKind::Disconnect
                }
            )
        })
    }

    /// The batch as a single-event disconnect notice.
    pub(crate) fn disconnect() -> Self {
        Self::new(vec![Event::Error {
            error: ErrorKind::Disconnect,
        }])
    }
}

/// Seconds since the Unix epoch, as a float.
fn serialize_timestamp<S: serde::Serializer>(
    timestamp: &SystemTime,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    let secs = timestamp
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0);
    serializer.serialize_f64(secs)
}
