//! Fixed-layout fields shared by several report types.

use serde::Serialize;

bitflags::bitflags! {
    /// Core button mask as carried in the first two payload bytes.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
    pub struct Buttons: u16 {
        const TWO = 0x0001;
        const ONE = 0x0002;
        const B = 0x0004;
        const A = 0x0008;
        const MINUS = 0x0010;
        const HOME = 0x0080;
        const LEFT = 0x0100;
        const RIGHT = 0x0200;
        const DOWN = 0x0400;
        const UP = 0x0800;
        const PLUS = 0x1000;
    }
}

impl Buttons {
    /// Decode from the two button bytes. Bits outside the mask carry
    /// accelerometer LSBs on some reports and are discarded.
    pub fn from_bytes(bytes: [u8; 2]) -> Self {
        Self::from_bits_truncate(u16::from_be_bytes(bytes))
    }

    /// Encode to the two button bytes.
    pub fn to_bytes(self) -> [u8; 2] {
        self.bits().to_be_bytes()
    }
}

bitflags::bitflags! {
    /// Flags byte of a status report.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
    pub struct StatusFlags: u8 {
        const BATTERY_LOW = 0x01;
        const EXTENSION = 0x02;
        const SPEAKER = 0x04;
        const IR = 0x08;
        const LED_1 = 0x10;
        const LED_2 = 0x20;
        const LED_3 = 0x40;
        const LED_4 = 0x80;
    }
}

impl StatusFlags {
    /// LED mask in the low nibble (LED 1 = bit 0).
    pub fn leds(self) -> u8 {
        self.bits() >> 4
    }
}

/// Raw accelerometer sample, one byte per axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
pub struct Accel {
    pub x: u8,
    pub y: u8,
    pub z: u8,
}

impl Accel {
    pub fn from_bytes(bytes: [u8; 3]) -> Self {
        Self {
            x: bytes[0],
            y: bytes[1],
            z: bytes[2],
        }
    }

    pub fn to_bytes(self) -> [u8; 3] {
        [self.x, self.y, self.z]
    }
}

/// Number of IR dots tracked by the camera.
pub const IR_DOTS: usize = 4;

/// IR blob layout carried by a report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum IrFormat {
    /// 10 bytes: two 5-byte groups of two dots, position only.
    Basic,
    /// 12 bytes: four 3-byte dots, position and size.
    Extended,
}

impl IrFormat {
    /// Size of the IR blob in bytes.
    pub const fn len(self) -> usize {
        match self {
            IrFormat::Basic => 10,
            IrFormat::Extended => 12,
        }
    }
}

/// One IR dot as reported by the camera (10-bit coordinates).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
pub struct IrDot {
    pub x: u16,
    pub y: u16,
    /// Blob size, present only in the extended format.
    pub size: Option<u8>,
}

impl IrDot {
    /// A slot the camera reports as empty.
    pub const EMPTY: IrDot = IrDot {
        x: 0x3FF,
        y: 0x3FF,
        size: None,
    };

    /// The camera marks empty slots with 0xFF in both low coordinate bytes.
    pub fn is_valid(&self) -> bool {
        !((self.x & 0xFF) == 0xFF && (self.y & 0xFF) == 0xFF)
    }

    /// Decode four dots from an IR blob. `blob` must be exactly `format.len()`.
    pub fn decode_all(format: IrFormat, blob: &[u8]) -> [IrDot; IR_DOTS] {
        let mut dots = [IrDot::default(); IR_DOTS];
        match format {
            IrFormat::Basic => {
                for (pair, group) in dots.chunks_exact_mut(2).zip(blob.chunks_exact(5)) {
                    let hi = group[2];
                    pair[0] = IrDot {
                        x: u16::from(group[0]) | (u16::from((hi >> 4) & 0x03) << 8),
                        y: u16::from(group[1]) | (u16::from((hi >> 6) & 0x03) << 8),
                        size: None,
                    };
                    pair[1] = IrDot {
                        x: u16::from(group[3]) | (u16::from(hi & 0x03) << 8),
                        y: u16::from(group[4]) | (u16::from((hi >> 2) & 0x03) << 8),
                        size: None,
                    };
                }
            }
            IrFormat::Extended => {
                for (dot, raw) in dots.iter_mut().zip(blob.chunks_exact(3)) {
                    *dot = IrDot {
                        x: u16::from(raw[0]) | (u16::from((raw[2] >> 4) & 0x03) << 8),
                        y: u16::from(raw[1]) | (u16::from((raw[2] >> 6) & 0x03) << 8),
                        size: Some(raw[2] & 0x0F),
                    };
                }
            }
        }
        dots
    }

    /// Encode four dots into an IR blob. `blob` must be exactly `format.len()`.
    pub fn encode_all(format: IrFormat, dots: &[IrDot; IR_DOTS], blob: &mut [u8]) {
        match format {
            IrFormat::Basic => {
                for (pair, group) in dots.chunks_exact(2).zip(blob.chunks_exact_mut(5)) {
                    let (a, b) = (pair[0], pair[1]);
                    group[0] = a.x as u8;
                    group[1] = a.y as u8;
                    group[2] = (((a.y >> 8) & 0x03) as u8) << 6
                        | (((a.x >> 8) & 0x03) as u8) << 4
                        | (((b.y >> 8) & 0x03) as u8) << 2
                        | ((b.x >> 8) & 0x03) as u8;
                    group[3] = b.x as u8;
                    group[4] = b.y as u8;
                }
            }
            IrFormat::Extended => {
                for (dot, raw) in dots.iter().zip(blob.chunks_exact_mut(3)) {
                    raw[0] = dot.x as u8;
                    raw[1] = dot.y as u8;
                    raw[2] = (((dot.y >> 8) & 0x03) as u8) << 6
                        | (((dot.x >> 8) & 0x03) as u8) << 4
                        | (dot.size.unwrap_or(0x0F) & 0x0F);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buttons_mask_drops_accel_bits() {
        let buttons = Buttons::from_bytes([0x60 | 0x08, 0x60 | 0x08]);
        assert_eq!(buttons, Buttons::UP | Buttons::A);
    }

    #[test]
    fn status_led_nibble() {
        let flags = StatusFlags::LED_1 | StatusFlags::LED_4 | StatusFlags::EXTENSION;
        assert_eq!(flags.leds(), 0b1001);
    }

    #[test]
    fn basic_ir_decodes_high_bits() {
        // Dot 0 at (0x1F0, 0x2AB), dot 1 at (0x305, 0x010); second group empty.
        let blob = [
            0xF0, 0xAB, 0b10_01_00_11, 0x05, 0x10, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF,
        ];
        let dots = IrDot::decode_all(IrFormat::Basic, &blob);
        assert_eq!((dots[0].x, dots[0].y), (0x1F0, 0x2AB));
        assert_eq!((dots[1].x, dots[1].y), (0x305, 0x010));
        assert!(dots[0].is_valid());
        assert!(!dots[2].is_valid());
        assert!(!dots[3].is_valid());
    }

    #[test]
    fn extended_ir_carries_size() {
        let blob = [
            0x10, 0x20, 0b01_10_0101, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF,
        ];
        let dots = IrDot::decode_all(IrFormat::Extended, &blob);
        assert_eq!(dots[0], IrDot { x: 0x210, y: 0x120, size: Some(5) });
        assert!(!dots[1].is_valid());
    }

    #[test]
    fn empty_dot_encodes_as_all_ones() {
        let mut blob = [0u8; 12];
        IrDot::encode_all(IrFormat::Extended, &[IrDot::EMPTY; IR_DOTS], &mut blob);
        assert!(blob.iter().all(|b| *b == 0xFF));
    }
}
