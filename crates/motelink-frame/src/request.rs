//! Memory read and write request payloads.

use std::fmt;
use std::str::FromStr;

use bytes::Bytes;
use serde::Serialize;

use crate::error::{FrameError, Result};

/// Largest offset addressable by a 3-byte address.
pub const MAX_OFFSET: u32 = 0x00FF_FFFF;

/// Data bytes carried by one read reply.
pub const READ_REPLY_MAX: usize = 16;

/// Data bytes carried by one write request.
pub const WRITE_CHUNK_MAX: usize = 16;

/// Bit 0 of the first payload byte of every command is the rumble motor.
const RUMBLE_BIT: u8 = 0x01;

/// Addressable memory region, selected by the first request byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AddressSpace {
    /// Persistent storage.
    Eeprom,
    /// Volatile control registers (camera, speaker, extension).
    Register,
}

impl AddressSpace {
    /// The request flag byte for this space.
    pub const fn flag(self) -> u8 {
        match self {
            AddressSpace::Eeprom => 0x00,
            AddressSpace::Register => 0x04,
        }
    }

    /// Parse the request flag byte. The rumble bit is ignored.
    pub fn from_flag(flag: u8) -> Result<Self> {
        match flag & !RUMBLE_BIT {
            0x00 => Ok(AddressSpace::Eeprom),
            0x04 => Ok(AddressSpace::Register),
            other => Err(FrameError::InvalidField(format!(
                "unknown address space flag 0x{other:02X}"
            ))),
        }
    }
}

impl fmt::Display for AddressSpace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AddressSpace::Eeprom => f.write_str("eeprom"),
            AddressSpace::Register => f.write_str("register"),
        }
    }
}

impl FromStr for AddressSpace {
    type Err = FrameError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "eeprom" | "mem" => Ok(AddressSpace::Eeprom),
            "register" | "reg" => Ok(AddressSpace::Register),
            other => Err(FrameError::InvalidField(format!(
                "unknown address space '{other}' (expected eeprom or register)"
            ))),
        }
    }
}

fn check_offset(offset: u32) -> Result<()> {
    if offset > MAX_OFFSET {
        return Err(FrameError::InvalidField(format!(
            "offset 0x{offset:X} exceeds 24 bits"
        )));
    }
    Ok(())
}

/// A memory read request.
///
/// Payload: `[space][off_hi][off_mid][off_lo][len_hi][len_lo]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadRequest {
    pub space: AddressSpace,
    pub offset: u32,
    pub len: u16,
}

impl ReadRequest {
    pub const PAYLOAD_LEN: usize = 6;

    pub fn new(space: AddressSpace, offset: u32, len: u16) -> Result<Self> {
        check_offset(offset)?;
        if len == 0 {
            return Err(FrameError::InvalidField("read length must be non-zero".into()));
        }
        Ok(Self { space, offset, len })
    }

    pub fn encode(&self) -> [u8; Self::PAYLOAD_LEN] {
        let off = self.offset.to_be_bytes();
        let len = self.len.to_be_bytes();
        [self.space.flag(), off[1], off[2], off[3], len[0], len[1]]
    }

    pub fn decode(payload: &[u8]) -> Result<Self> {
        let Some(p) = payload.get(..Self::PAYLOAD_LEN) else {
            return Err(FrameError::InvalidField(format!(
                "read request needs {} bytes, got {}",
                Self::PAYLOAD_LEN,
                payload.len()
            )));
        };
        Self::new(
            AddressSpace::from_flag(p[0])?,
            u32::from_be_bytes([0, p[1], p[2], p[3]]),
            u16::from_be_bytes([p[4], p[5]]),
        )
    }
}

/// One write chunk.
///
/// Payload: `[space][off_hi][off_mid][off_lo][len][data, zero-padded to 16]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteRequest {
    pub space: AddressSpace,
    pub offset: u32,
    pub data: Bytes,
}

impl WriteRequest {
    pub const PAYLOAD_LEN: usize = 5 + WRITE_CHUNK_MAX;

    pub fn new(space: AddressSpace, offset: u32, data: impl Into<Bytes>) -> Result<Self> {
        let data = data.into();
        check_offset(offset)?;
        if data.is_empty() || data.len() > WRITE_CHUNK_MAX {
            return Err(FrameError::InvalidField(format!(
                "write chunk of {} bytes outside 1..={WRITE_CHUNK_MAX}",
                data.len()
            )));
        }
        Ok(Self {
            space,
            offset,
            data,
        })
    }

    pub fn encode(&self) -> [u8; Self::PAYLOAD_LEN] {
        let off = self.offset.to_be_bytes();
        let mut payload = [0u8; Self::PAYLOAD_LEN];
        payload[0] = self.space.flag();
        payload[1..4].copy_from_slice(&off[1..]);
        payload[4] = self.data.len() as u8;
        payload[5..5 + self.data.len()].copy_from_slice(&self.data);
        payload
    }

    pub fn decode(payload: &[u8]) -> Result<Self> {
        let Some(p) = payload.get(..Self::PAYLOAD_LEN) else {
            return Err(FrameError::InvalidField(format!(
                "write request needs {} bytes, got {}",
                Self::PAYLOAD_LEN,
                payload.len()
            )));
        };
        let len = usize::from(p[4]).min(WRITE_CHUNK_MAX);
        Self::new(
            AddressSpace::from_flag(p[0])?,
            u32::from_be_bytes([0, p[1], p[2], p[3]]),
            Bytes::copy_from_slice(&p[5..5 + len]),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_request_layout() {
        let req = ReadRequest::new(AddressSpace::Register, 0xA4_00FA, 6).unwrap();
        assert_eq!(req.encode(), [0x04, 0xA4, 0x00, 0xFA, 0x00, 0x06]);
    }

    #[test]
    fn read_request_decode_ignores_rumble_bit() {
        let req = ReadRequest::decode(&[0x05, 0xA4, 0x00, 0xFA, 0x00, 0x06]).unwrap();
        assert_eq!(req.space, AddressSpace::Register);
        assert_eq!(req.offset, 0xA4_00FA);
        assert_eq!(req.len, 6);
    }

    #[test]
    fn write_request_layout() {
        let req = WriteRequest::new(AddressSpace::Register, 0xB0_0033, vec![0x03]).unwrap();
        let payload = req.encode();
        assert_eq!(&payload[..6], &[0x04, 0xB0, 0x00, 0x33, 0x01, 0x03]);
        assert!(payload[6..].iter().all(|b| *b == 0));
    }

    #[test]
    fn write_request_bounds() {
        assert!(WriteRequest::new(AddressSpace::Eeprom, 0, vec![0u8; 17]).is_err());
        assert!(WriteRequest::new(AddressSpace::Eeprom, 0, Vec::new()).is_err());
        assert!(WriteRequest::new(AddressSpace::Eeprom, MAX_OFFSET + 1, vec![1]).is_err());
        assert!(ReadRequest::new(AddressSpace::Eeprom, 0, 0).is_err());
    }

    #[test]
    fn address_space_parse() {
        assert_eq!("reg".parse::<AddressSpace>().unwrap(), AddressSpace::Register);
        assert_eq!("EEPROM".parse::<AddressSpace>().unwrap(), AddressSpace::Eeprom);
        assert!("flash".parse::<AddressSpace>().is_err());
        assert!(AddressSpace::from_flag(0x08).is_err());
    }
}
