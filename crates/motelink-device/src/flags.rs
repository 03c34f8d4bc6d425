use std::sync::atomic::{AtomicU32, Ordering};

use serde::Serialize;

bitflags::bitflags! {
    /// Per-device feature toggles.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
    pub struct DeviceFlags: u32 {
        /// Forward event batches to the event queue.
        const EVENTS = 0x01;
        /// [`Device::poll`](crate::Device::poll) never blocks.
        const NONBLOCK = 0x02;
        /// The MotionPlus gyro is active and owns the extension port.
        const MOTIONPLUS = 0x04;
        /// Ask the controller to report continuously rather than on change.
        const CONTINUOUS = 0x08;
    }
}

impl Default for DeviceFlags {
    fn default() -> Self {
        DeviceFlags::EVENTS
    }
}

/// Lock-free holder for [`DeviceFlags`], shared with the router thread.
#[derive(Debug)]
pub(crate) struct AtomicFlags(AtomicU32);

impl AtomicFlags {
    pub(crate) fn new(flags: DeviceFlags) -> Self {
        Self(AtomicU32::new(flags.bits()))
    }

    pub(crate) fn load(&self) -> DeviceFlags {
        DeviceFlags::from_bits_truncate(self.0.load(Ordering::Acquire))
    }

    pub(crate) fn insert(&self, flags: DeviceFlags) {
        self.0.fetch_or(flags.bits(), Ordering::AcqRel);
    }

    pub(crate) fn remove(&self, flags: DeviceFlags) {
        self.0.fetch_and(!flags.bits(), Ordering::AcqRel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_and_remove() {
        let flags = AtomicFlags::new(DeviceFlags::default());
        flags.insert(DeviceFlags::NONBLOCK | DeviceFlags::CONTINUOUS);
        assert_eq!(
            flags.load(),
            DeviceFlags::EVENTS | DeviceFlags::NONBLOCK | DeviceFlags::CONTINUOUS
        );
        flags.remove(DeviceFlags::EVENTS);
        assert!(!flags.load().contains(DeviceFlags::EVENTS));
    }
}
