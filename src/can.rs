///
/// can.rs
///
/// Provides the immutable CanFrame value type exchanged with SLCAN adapters.
///
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::FrameError;

/// Highest identifier representable in an 11-bit standard frame.
pub const MAX_STANDARD_ID: u32 = 0x7FF;
/// Highest identifier representable in a 29-bit extended frame.
pub const MAX_EXTENDED_ID: u32 = 0x1FFF_FFFF;
/// Classic CAN payload limit.
pub const MAX_DATA_LEN: usize = 8;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CanFrame {
    id: u32,
    data: [u8; MAX_DATA_LEN],
    dlc: usize,
    is_extended: bool,
    is_rtr: bool,
}

impl CanFrame {
    /// Builds a data frame, picking the standard format when the identifier fits in 11 bits.
    pub fn new(id: u32, data: &[u8]) -> Result<Self, FrameError> {
        Self::with_format(id, data, id > MAX_STANDARD_ID)
    }

    pub fn new_std(id: u32, data: &[u8]) -> Result<Self, FrameError> {
        Self::with_format(id, data, false)
    }

    pub fn new_eff(id: u32, data: &[u8]) -> Result<Self, FrameError> {
        Self::with_format(id, data, true)
    }

    pub fn new_remote(id: u32, dlc: usize, is_extended: bool) -> Result<Self, FrameError> {
        if dlc > MAX_DATA_LEN {
            return Err(FrameError::InvalidFrame("RTR frame DLC must be <= 8"));
        }
        Self::validate_id(id, is_extended)?;
        Ok(Self {
            id,
            data: [0u8; MAX_DATA_LEN],
            dlc,
            is_extended,
            is_rtr: true,
        })
    }

    fn with_format(id: u32, data: &[u8], is_extended: bool) -> Result<Self, FrameError> {
        Self::validate_id(id, is_extended)?;
        Self::validate_data(data)?;
        let mut buf = [0u8; MAX_DATA_LEN];
        buf[..data.len()].copy_from_slice(data);
        Ok(Self {
            id,
            data: buf,
            dlc: data.len(),
            is_extended,
            is_rtr: false,
        })
    }

    fn validate_id(id: u32, extended: bool) -> Result<(), FrameError> {
        if extended {
            if id > MAX_EXTENDED_ID {
                return Err(FrameError::InvalidFrame(
                    "Extended ID must be <= 29 bits (0x1FFFFFFF)",
                ));
            }
        } else if id > MAX_STANDARD_ID {
            return Err(FrameError::InvalidFrame(
                "Standard ID must be <= 11 bits (0x7FF)",
            ));
        }
        Ok(())
    }

    fn validate_data(data: &[u8]) -> Result<(), FrameError> {
        if data.len() > MAX_DATA_LEN {
            Err(FrameError::InvalidFrame("CAN data must be <= 8 bytes"))
        } else {
            Ok(())
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }
    /// Payload bytes. Remote frames carry a length but no data, so this is empty for them.
    pub fn data(&self) -> &[u8] {
        if self.is_rtr {
            &[]
        } else {
            &self.data[..self.dlc]
        }
    }
    pub fn len(&self) -> usize {
        self.dlc
    }
    pub fn is_empty(&self) -> bool {
        self.dlc == 0
    }
    pub fn is_extended(&self) -> bool {
        self.is_extended
    }
    pub fn is_rtr(&self) -> bool {
        self.is_rtr
    }
}

/// Raw hex mirror of the frame: `IIIIIIII#DDDD...` with the identifier right-aligned to
/// eight columns and the payload left-aligned to sixteen, so it lines up in a log.
impl fmt::Display for CanFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_extended {
            write!(f, "{:08X}", self.id)?;
        } else {
            write!(f, "{:5}{:03X}", "", self.id)?;
        }
        let payload: String = self.data().iter().map(|b| format!("{:02X}", b)).collect();
        write!(f, "#{:<16}", payload)
    }
}
