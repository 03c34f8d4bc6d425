use motelink_frame::{Accel, Buttons, IrDot, IR_DOTS};
use serde::Serialize;

use crate::event::{ErrorKind, Event};
use crate::extension::{ExtensionState, ExtensionType};

bitflags::bitflags! {
    /// Which data the controller reports and which events are delivered.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
    pub struct ReportMode: u8 {
        const STATUS = 0x01;
        const BTN = 0x02;
        const ACC = 0x04;
        const IR = 0x08;
        const NUNCHUK = 0x10;
        const CLASSIC = 0x20;
        const BALANCE = 0x40;
        const MOTIONPLUS = 0x80;
        /// Any extension.
        const EXT = Self::NUNCHUK.bits()
            | Self::CLASSIC.bits()
            | Self::BALANCE.bits()
            | Self::MOTIONPLUS.bits();
    }
}

impl Default for ReportMode {
    fn default() -> Self {
        ReportMode::STATUS | ReportMode::BTN
    }
}

/// Snapshot of everything known about the controller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceState {
    pub report_mode: ReportMode,
    /// LED mask, bit 0 is LED 1.
    pub led: u8,
    pub rumble: bool,
    pub battery: u8,
    pub buttons: Buttons,
    pub accel: Accel,
    pub ir: [IrDot; IR_DOTS],
    pub extension: ExtensionType,
    pub ext: ExtensionState,
    pub error: Option<ErrorKind>,
}

impl Default for DeviceState {
    fn default() -> Self {
        Self::new(ReportMode::default())
    }
}

impl DeviceState {
    pub fn new(report_mode: ReportMode) -> Self {
        Self {
            report_mode,
            led: 0,
            rumble: false,
            battery: 0,
            buttons: Buttons::empty(),
            accel: Accel::default(),
            ir: [IrDot::EMPTY; IR_DOTS],
            extension: ExtensionType::None,
            ext: ExtensionState::None,
            error: None,
        }
    }

    /// Merge one event. Fields the event does not carry are untouched.
    pub fn apply(&mut self, event: &Event) {
        match event {
            Event::Status { battery, extension } => {
                self.battery = *battery;
                self.set_extension(*extension);
            }
            Event::Buttons { buttons } => self.buttons = *buttons,
            Event::Accel { accel } => self.accel = *accel,
            Event::Ir { dots } => self.ir = *dots,
            Event::Nunchuk(state) => self.ext = ExtensionState::Nunchuk(*state),
            Event::Classic(state) => self.ext = ExtensionState::Classic(*state),
            Event::Balance(state) => self.ext = ExtensionState::Balance(*state),
            Event::MotionPlus(state) => self.ext = ExtensionState::MotionPlus(*state),
            Event::Error { error } => self.error = Some(*error),
        }
    }

    /// Record a new extension identity. A change discards the stale payload.
    pub(crate) fn set_extension(&mut self, extension: ExtensionType) {
        if self.extension != extension {
            self.ext = ExtensionState::None;
        }
        self.extension = extension;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extension::NunchukState;

    #[test]
    fn apply_leaves_other_fields() {
        let mut state = DeviceState {
            led: 0x05,
            ..DeviceState::default()
        };
        state.apply(&Event::Buttons {
            buttons: Buttons::A | Buttons::HOME,
        });
        state.apply(&Event::Accel {
            accel: Accel { x: 1, y: 2, z: 3 },
        });
        assert_eq!(state.buttons, Buttons::A | Buttons::HOME);
        assert_eq!(state.accel, Accel { x: 1, y: 2, z: 3 });
        assert_eq!(state.led, 0x05);
        assert_eq!(state.ir, [IrDot::EMPTY; IR_DOTS]);
    }

    #[test]
    fn extension_change_drops_payload() {
        let mut state = DeviceState::default();
        state.set_extension(ExtensionType::Nunchuk);
        state.apply(&Event::Nunchuk(NunchukState::default()));
        assert!(matches!(state.ext, ExtensionState::Nunchuk(_)));

        state.apply(&Event::Status {
            battery: 0x60,
            extension: ExtensionType::Nunchuk,
        });
        assert!(matches!(state.ext, ExtensionState::Nunchuk(_)));

        state.apply(&Event::Status {
            battery: 0x60,
            extension: ExtensionType::None,
        });
        assert_eq!(state.ext, ExtensionState::None);
        assert_eq!(state.battery, 0x60);
    }

    #[test]
    fn ext_mode_covers_all_extensions() {
        for flag in [
            ReportMode::NUNCHUK,
            ReportMode::CLASSIC,
            ReportMode::BALANCE,
            ReportMode::MOTIONPLUS,
        ] {
            assert!(ReportMode::EXT.contains(flag));
        }
        assert!(!ReportMode::EXT.intersects(ReportMode::IR | ReportMode::ACC));
    }
}
