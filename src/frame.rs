//! CAN message representation
//!
//! A single message type covers Classical CAN and CAN FD. The payload
//! buffer is sized for the largest FD frame; `dlc` selects how much of
//! it is meaningful. DLC-to-length mapping is non-linear above 8 for FD.

use std::fmt;

use crate::constants::{
    CANFD_DLC_TO_LEN, CANFD_MAX_DLC, CANFD_MAX_DLEN, CAN_MAX_DLC, CAN_MAX_DLEN,
};

// ============================================================================
// CAN message
// ============================================================================

/// A CAN or CAN FD message with metadata flags and a reception timestamp
#[derive(Clone, Copy)]
pub struct CanMessage {
    /// CAN identifier (11-bit or 29-bit)
    pub id: u32,
    /// Extended (29-bit) identifier
    pub xtd: bool,
    /// Remote transmission request
    pub rtr: bool,
    /// CAN FD frame format
    pub fdf: bool,
    /// Bit-rate switching (FD only)
    pub brs: bool,
    /// Error state indicator (FD only)
    pub esi: bool,
    /// Status message, not a data frame
    pub sts: bool,
    /// Data length code (0..=8 classical, 0..=15 FD)
    pub dlc: u8,
    /// Payload, `dlc_to_len(dlc)` bytes meaningful
    pub data: [u8; CANFD_MAX_DLEN],
    /// Reception timestamp in microseconds since channel start
    pub timestamp_us: u64,
}

impl Default for CanMessage {
    fn default() -> Self {
        CanMessage {
            id: 0,
            xtd: false,
            rtr: false,
            fdf: false,
            brs: false,
            esi: false,
            sts: false,
            dlc: 0,
            data: [0u8; CANFD_MAX_DLEN],
            timestamp_us: 0,
        }
    }
}

impl CanMessage {
    /// Create a classical data frame from an identifier and payload slice
    ///
    /// Slices longer than 8 bytes are truncated.
    pub fn new(id: u32, data: &[u8]) -> Self {
        let len = data.len().min(CAN_MAX_DLEN);
        let mut msg = CanMessage {
            id,
            dlc: len as u8,
            ..Default::default()
        };
        msg.data[..len].copy_from_slice(&data[..len]);
        msg
    }

    /// Payload length in bytes for this message's DLC
    pub fn len(&self) -> usize {
        dlc_to_len(self.dlc, self.fdf)
    }

    /// True if the message carries no payload
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Meaningful payload bytes
    pub fn payload(&self) -> &[u8] {
        &self.data[..self.len()]
    }
}

/// Convert a data length code to a payload length in bytes
///
/// Classical frames clamp at 8 bytes for DLC values 9..=15.
pub fn dlc_to_len(dlc: u8, fdf: bool) -> usize {
    if fdf {
        CANFD_DLC_TO_LEN[(dlc & 0x0F) as usize]
    } else {
        (dlc.min(CAN_MAX_DLC) as usize).min(CAN_MAX_DLEN)
    }
}

/// Convert a payload length in bytes to the smallest DLC that holds it
///
/// Returns `None` if the length does not fit the frame format.
pub fn len_to_dlc(len: usize, fdf: bool) -> Option<u8> {
    if fdf {
        if len > CANFD_MAX_DLEN {
            return None;
        }
        for dlc in 0..=CANFD_MAX_DLC {
            if CANFD_DLC_TO_LEN[dlc as usize] >= len {
                return Some(dlc);
            }
        }
        None
    } else {
        if len > CAN_MAX_DLEN {
            return None;
        }
        Some(len as u8)
    }
}

impl fmt::Debug for CanMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CanMessage")
            .field("id", &format_args!("{:#x}", self.id))
            .field("xtd", &self.xtd)
            .field("rtr", &self.rtr)
            .field("fdf", &self.fdf)
            .field("brs", &self.brs)
            .field("sts", &self.sts)
            .field("dlc", &self.dlc)
            .field("data", &self.payload())
            .field("timestamp_us", &self.timestamp_us)
            .finish()
    }
}

impl fmt::Display for CanMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.xtd {
            write!(f, "{:08X}", self.id)?;
        } else {
            write!(f, "{:03X}", self.id)?;
        }
        write!(f, " [{}]", self.len())?;
        if self.rtr {
            write!(f, " remote request")?;
        } else {
            for byte in self.payload() {
                write!(f, " {:02X}", byte)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_truncates_payload() {
        let msg = CanMessage::new(0x123, &[0u8; 12]);
        assert_eq!(msg.dlc, 8);
        assert_eq!(msg.len(), 8);
    }

    #[test]
    fn test_dlc_to_len_classical() {
        assert_eq!(dlc_to_len(0, false), 0);
        assert_eq!(dlc_to_len(8, false), 8);
        // classical frames clamp DLC 9..=15 to 8 bytes
        assert_eq!(dlc_to_len(12, false), 8);
        assert_eq!(dlc_to_len(15, false), 8);
    }

    #[test]
    fn test_dlc_to_len_fd() {
        assert_eq!(dlc_to_len(8, true), 8);
        assert_eq!(dlc_to_len(9, true), 12);
        assert_eq!(dlc_to_len(10, true), 16);
        assert_eq!(dlc_to_len(11, true), 20);
        assert_eq!(dlc_to_len(12, true), 24);
        assert_eq!(dlc_to_len(13, true), 32);
        assert_eq!(dlc_to_len(14, true), 48);
        assert_eq!(dlc_to_len(15, true), 64);
    }

    #[test]
    fn test_len_to_dlc() {
        assert_eq!(len_to_dlc(8, false), Some(8));
        assert_eq!(len_to_dlc(9, false), None);
        assert_eq!(len_to_dlc(9, true), Some(9));
        assert_eq!(len_to_dlc(13, true), Some(10));
        assert_eq!(len_to_dlc(64, true), Some(15));
        assert_eq!(len_to_dlc(65, true), None);
    }

    #[test]
    fn test_display_standard() {
        let msg = CanMessage::new(0x123, &[0xDE, 0xAD]);
        assert_eq!(format!("{}", msg), "123 [2] DE AD");
    }

    #[test]
    fn test_display_remote() {
        let mut msg = CanMessage::new(0x7FF, &[]);
        msg.rtr = true;
        msg.dlc = 4;
        assert_eq!(format!("{}", msg), "7FF [4] remote request");
    }
}
