//! Extension controllers: identification, payload decoding, and the
//! detection and MotionPlus activation sequences.

use std::fmt;

use motelink_frame::{Accel, AddressSpace, StatusFlags};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::device::Device;
use crate::error::{DeviceError, Result};
use crate::flags::DeviceFlags;
use crate::state::ReportMode;

/// Register holding the 6-byte extension identifier.
pub const EXT_ID_ADDR: u32 = 0xA4_00FA;
/// Length of the extension identifier.
pub const EXT_ID_LEN: usize = 6;
/// First init register; writing 0x55 disables payload encryption.
pub const EXT_INIT_ADDR_1: u32 = 0xA4_00F0;
/// Second init register; written with 0x00 after the first.
pub const EXT_INIT_ADDR_2: u32 = 0xA4_00FB;
/// Writing 0x04 here switches the MotionPlus onto the extension port.
pub const MOTIONPLUS_ACTIVATE_ADDR: u32 = 0xA6_00FE;

const NUNCHUK_ID: &[u8] = &[0x00, 0x00, 0xA4, 0x20, 0x00, 0x00];
const CLASSIC_ID: &[u8] = &[0x00, 0x00, 0xA4, 0x20, 0x01, 0x01];
const BALANCE_ID: &[u8] = &[0x2A, 0x2C];
const MOTIONPLUS_ID: &[u8] = &[0x00, 0x00, 0xA4, 0x20, 0x04, 0x05];
const MOTIONPLUS_NUNCHUK_ID: &[u8] = &[0x00, 0x00, 0xA4, 0x20, 0x05, 0x05];
const MOTIONPLUS_CLASSIC_ID: &[u8] = &[0x00, 0x00, 0xA4, 0x20, 0x07, 0x05];

/// Identifier prefixes, matched in order.
const ID_TABLE: &[(&[u8], ExtensionType)] = &[
    (NUNCHUK_ID, ExtensionType::Nunchuk),
    (CLASSIC_ID, ExtensionType::Classic),
    (BALANCE_ID, ExtensionType::Balance),
    (MOTIONPLUS_ID, ExtensionType::MotionPlus),
    (MOTIONPLUS_NUNCHUK_ID, ExtensionType::MotionPlus),
    (MOTIONPLUS_CLASSIC_ID, ExtensionType::MotionPlus),
];

/// Kind of controller attached to the extension port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ExtensionType {
    #[default]
    None,
    /// Something is plugged in but has not been identified yet.
    Unknown,
    Nunchuk,
    Classic,
    Balance,
    MotionPlus,
}

impl ExtensionType {
    /// Identify an extension from the bytes read at [`EXT_ID_ADDR`].
    pub fn identify(id: &[u8]) -> Self {
        ID_TABLE
            .iter()
            .find(|(prefix, _)| id.starts_with(prefix))
            .map(|(_, kind)| *kind)
            .unwrap_or(ExtensionType::Unknown)
    }

    /// The identifier this extension reports, padded to [`EXT_ID_LEN`].
    pub fn id(self) -> Option<[u8; EXT_ID_LEN]> {
        let prefix = ID_TABLE
            .iter()
            .find(|(_, kind)| *kind == self)
            .map(|(prefix, _)| *prefix)?;
        let mut id = [0u8; EXT_ID_LEN];
        id[..prefix.len()].copy_from_slice(prefix);
        Some(id)
    }

    /// Report-mode bit that enables events for this extension.
    pub fn report_flag(self) -> ReportMode {
        match self {
            ExtensionType::Nunchuk => ReportMode::NUNCHUK,
            ExtensionType::Classic => ReportMode::CLASSIC,
            ExtensionType::Balance => ReportMode::BALANCE,
            ExtensionType::MotionPlus => ReportMode::MOTIONPLUS,
            ExtensionType::None | ExtensionType::Unknown => ReportMode::empty(),
        }
    }

    /// Minimum extension bytes needed to decode this extension.
    pub fn payload_len(self) -> usize {
        match self {
            ExtensionType::Balance => 8,
            ExtensionType::None | ExtensionType::Unknown => 0,
            _ => 6,
        }
    }

    /// Decode raw extension bytes. `None` if the type carries no payload or
    /// too few bytes were supplied.
    pub fn decode(self, bytes: &[u8]) -> Option<ExtensionState> {
        if self.payload_len() == 0 || bytes.len() < self.payload_len() {
            return None;
        }
        let b = bytes;
        let state = match self {
            ExtensionType::Nunchuk => ExtensionState::Nunchuk(NunchukState {
                stick: [b[0], b[1]],
                accel: Accel::from_bytes([b[2], b[3], b[4]]),
                buttons: NunchukButtons::from_bits_truncate(!b[5]),
            }),
            ExtensionType::Classic => ExtensionState::Classic(ClassicState {
                l_stick: [b[0] & 0x3F, b[1] & 0x3F],
                r_stick: [
                    ((b[0] & 0xC0) >> 3) | ((b[1] & 0xC0) >> 5) | ((b[2] & 0x80) >> 7),
                    b[2] & 0x1F,
                ],
                l: ((b[2] & 0x60) >> 2) | ((b[3] & 0xE0) >> 5),
                r: b[3] & 0x1F,
                buttons: ClassicButtons::from_bits_truncate(!u16::from_be_bytes([b[4], b[5]])),
            }),
            ExtensionType::Balance => ExtensionState::Balance(BalanceState {
                right_top: u16::from_be_bytes([b[0], b[1]]),
                right_bottom: u16::from_be_bytes([b[2], b[3]]),
                left_top: u16::from_be_bytes([b[4], b[5]]),
                left_bottom: u16::from_be_bytes([b[6], b[7]]),
            }),
            ExtensionType::MotionPlus => ExtensionState::MotionPlus(MotionPlusState {
                angle_rate: [
                    (u16::from(b[5] >> 2) << 8) | u16::from(b[2]),
                    (u16::from(b[4] >> 2) << 8) | u16::from(b[1]),
                    (u16::from(b[3] >> 2) << 8) | u16::from(b[0]),
                ],
                low_speed: [b[3] & 0x01 != 0, b[4] & 0x02 != 0, b[3] & 0x02 != 0],
            }),
            ExtensionType::None | ExtensionType::Unknown => return None,
        };
        Some(state)
    }
}

impl fmt::Display for ExtensionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ExtensionType::None => "none",
            ExtensionType::Unknown => "unknown",
            ExtensionType::Nunchuk => "nunchuk",
            ExtensionType::Classic => "classic",
            ExtensionType::Balance => "balance",
            ExtensionType::MotionPlus => "motionplus",
        };
        f.write_str(name)
    }
}

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
    pub struct NunchukButtons: u8 {
        const Z = 0x01;
        const C = 0x02;
    }
}

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
    pub struct ClassicButtons: u16 {
        const UP = 0x0001;
        const LEFT = 0x0002;
        const ZR = 0x0004;
        const X = 0x0008;
        const A = 0x0010;
        const Y = 0x0020;
        const B = 0x0040;
        const ZL = 0x0080;
        const R = 0x0200;
        const PLUS = 0x0400;
        const HOME = 0x0800;
        const MINUS = 0x1000;
        const L = 0x2000;
        const DOWN = 0x4000;
        const RIGHT = 0x8000;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct NunchukState {
    pub stick: [u8; 2],
    pub accel: Accel,
    pub buttons: NunchukButtons,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct ClassicState {
    /// 6-bit left stick.
    pub l_stick: [u8; 2],
    /// 5-bit right stick.
    pub r_stick: [u8; 2],
    /// 5-bit analog triggers.
    pub l: u8,
    pub r: u8,
    pub buttons: ClassicButtons,
}

/// Raw load-cell readings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct BalanceState {
    pub right_top: u16,
    pub right_bottom: u16,
    pub left_top: u16,
    pub left_bottom: u16,
}

/// Raw 14-bit gyro rates in phi, theta, psi order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct MotionPlusState {
    pub angle_rate: [u16; 3],
    pub low_speed: [bool; 3],
}

/// Last decoded extension payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ExtensionState {
    #[default]
    None,
    Nunchuk(NunchukState),
    Classic(ClassicState),
    Balance(BalanceState),
    MotionPlus(MotionPlusState),
}

impl ExtensionState {
    /// Encode back to the raw bytes the extension sends.
    pub fn encode(&self) -> Vec<u8> {
        match self {
            ExtensionState::None => Vec::new(),
            ExtensionState::Nunchuk(n) => {
                let acc = n.accel.to_bytes();
                vec![
                    n.stick[0],
                    n.stick[1],
                    acc[0],
                    acc[1],
                    acc[2],
                    !n.buttons.bits() & 0x03,
                ]
            }
            ExtensionState::Classic(c) => {
                let (lx, ly) = (c.l_stick[0], c.l_stick[1]);
                let (rx, ry) = (c.r_stick[0], c.r_stick[1]);
                let buttons = (!c.buttons.bits()).to_be_bytes();
                vec![
                    (lx & 0x3F) | ((rx << 3) & 0xC0),
                    (ly & 0x3F) | ((rx << 5) & 0xC0),
                    ((rx << 7) & 0x80) | ((c.l << 2) & 0x60) | (ry & 0x1F),
                    ((c.l << 5) & 0xE0) | (c.r & 0x1F),
                    buttons[0],
                    buttons[1],
                ]
            }
            ExtensionState::Balance(b) => [b.right_top, b.right_bottom, b.left_top, b.left_bottom]
                .iter()
                .flat_map(|v| v.to_be_bytes())
                .collect(),
            ExtensionState::MotionPlus(m) => {
                let [phi, theta, psi] = m.angle_rate;
                let [phi_low, theta_low, psi_low] = m.low_speed.map(u8::from);
                vec![
                    psi as u8,
                    theta as u8,
                    phi as u8,
                    (((psi >> 8) as u8) << 2) | (psi_low << 1) | phi_low,
                    (((theta >> 8) as u8) << 2) | (theta_low << 1),
                    ((phi >> 8) as u8) << 2,
                ]
            }
        }
    }
}

impl Device {
    /// Identify whatever is plugged into the extension port.
    ///
    /// Requests status; if the extension bit is set, disables payload
    /// encryption and reads the identifier. The result replaces the
    /// extension recorded in the state snapshot.
    pub fn detect_extension(&self) -> Result<ExtensionType> {
        let status = self.request_status()?;
        let found = if status.flags.contains(StatusFlags::EXTENSION) {
            self.write(AddressSpace::Register, EXT_INIT_ADDR_1, &[0x55])?;
            self.write(AddressSpace::Register, EXT_INIT_ADDR_2, &[0x00])?;
            let id = self.read(AddressSpace::Register, EXT_ID_ADDR, EXT_ID_LEN)?;
            let found = ExtensionType::identify(&id);
            debug!(id = ?id.as_ref(), extension = %found, "read extension identifier");
            found
        } else {
            ExtensionType::None
        };
        if found != ExtensionType::MotionPlus {
            self.shared.flags.remove(DeviceFlags::MOTIONPLUS);
        }
        self.shared.set_extension(found);
        info!(extension = %found, "extension detected");
        Ok(found)
    }

    /// Switch the MotionPlus onto the extension port.
    ///
    /// Activates it, confirms via status that an extension appeared, then
    /// checks the identifier. On any mismatch the regular extension is
    /// re-detected and [`DeviceError::ExtensionMismatch`] is returned.
    pub fn enable_motionplus(&self) -> Result<()> {
        self.write(AddressSpace::Register, MOTIONPLUS_ACTIVATE_ADDR, &[0x04])?;

        let attempts = self.shared.config.request_retries.max(1);
        let mut present = false;
        for attempt in 1..=attempts {
            let status = self.request_status()?;
            if status.flags.contains(StatusFlags::EXTENSION) {
                present = true;
                break;
            }
            debug!(attempt, "motionplus not reported yet");
        }

        let found = if present {
            let id = self.read(AddressSpace::Register, EXT_ID_ADDR, EXT_ID_LEN)?;
            ExtensionType::identify(&id)
        } else {
            ExtensionType::None
        };

        if found != ExtensionType::MotionPlus {
            warn!(found = %found, "motionplus activation failed; re-detecting extension");
            let fallback = self.detect_extension()?;
            return Err(DeviceError::ExtensionMismatch {
                expected: ExtensionType::MotionPlus,
                found: fallback,
            });
        }

        self.shared.flags.insert(DeviceFlags::MOTIONPLUS);
        self.shared.set_extension(ExtensionType::MotionPlus);
        info!("motionplus enabled");
        Ok(())
    }

    /// Release the MotionPlus and re-detect the regular extension.
    pub fn disable_motionplus(&self) -> Result<ExtensionType> {
        self.write(AddressSpace::Register, EXT_INIT_ADDR_1, &[0x55])?;
        self.write(AddressSpace::Register, EXT_INIT_ADDR_2, &[0x00])?;
        self.request_status()?;
        self.shared.flags.remove(DeviceFlags::MOTIONPLUS);
        info!("motionplus disabled");
        self.detect_extension()
    }
}
