use std::time::Duration;

use crate::flags::DeviceFlags;
use crate::state::ReportMode;

/// Configuration for a device connection.
#[derive(Debug, Clone)]
pub struct DeviceConfig {
    /// How long one `request_command` attempt waits for its reply.
    pub reply_timeout: Duration,
    /// Attempts made by `request_command` before giving up.
    pub request_retries: u32,
    /// Maximum event batches buffered for consumers.
    pub event_queue_capacity: usize,
    /// Per-reply timeout for memory transfers. `None` waits until the reply
    /// arrives or the device disconnects.
    pub transfer_timeout: Option<Duration>,
    /// Flags in effect right after connecting.
    pub flags: DeviceFlags,
    /// Report mode assumed right after connecting (controllers power up
    /// sending buttons only). Not sent to the device.
    pub report_mode: ReportMode,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            reply_timeout: Duration::from_secs(1),
            request_retries: 3,
            event_queue_capacity: 64,
            transfer_timeout: None,
            flags: DeviceFlags::EVENTS,
            report_mode: ReportMode::STATUS | ReportMode::BTN,
        }
    }
}

impl DeviceConfig {
    /// Set the per-attempt reply timeout.
    pub fn with_reply_timeout(mut self, timeout: Duration) -> Self {
        self.reply_timeout = timeout;
        self
    }

    /// Set the number of attempts made by `request_command`.
    pub fn with_request_retries(mut self, retries: u32) -> Self {
        self.request_retries = retries;
        self
    }

    /// Set the event queue capacity.
    pub fn with_event_queue_capacity(mut self, capacity: usize) -> Self {
        self.event_queue_capacity = capacity;
        self
    }

    /// Bound each memory-transfer reply wait.
    pub fn with_transfer_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.transfer_timeout = timeout;
        self
    }

    /// Set the initial flags.
    pub fn with_flags(mut self, flags: DeviceFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Set the report mode assumed at connect time.
    pub fn with_report_mode(mut self, mode: ReportMode) -> Self {
        self.report_mode = mode;
        self
    }
}
