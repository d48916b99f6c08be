//! Driver-wide constants
//!
//! This module contains the constants of the vendor-neutral driver contract:
//! handle limits, operation-mode flags, status-register bits, property ids,
//! and the CAN payload definitions shared by every vendor backend.

// ============================================================================
// Handle Table Limits
// ============================================================================

/// Maximum number of channel handles managed by the driver
pub const MAX_HANDLES: usize = 8;
/// Maximum number of USB devices tracked by the session manager
pub const MAX_DEVICES: usize = 42;

/// Sentinel handle addressing every open channel (exit/kill)
pub const CAN_ALL_HANDLES: i32 = -1;
/// Invalid handle / invalid device index sentinel
pub const INVALID_HANDLE: i32 = -1;

// ============================================================================
// Timeouts
// ============================================================================

/// Timeout value for unbounded blocking operations (milliseconds)
pub const TIMEOUT_INFINITE: u16 = 0xFFFF;

// ============================================================================
// Operation Mode Flags (8-bit mode byte)
// ============================================================================

/// CAN FD operation enabled
pub const MODE_FDOE: u8 = 0x80;
/// Bit-rate switching enabled (only with FDOE)
pub const MODE_BRSE: u8 = 0x40;
/// Non-ISO CAN FD frames (only with FDOE)
pub const MODE_NISO: u8 = 0x20;
/// Shared access to the channel
pub const MODE_SHRD: u8 = 0x10;
/// Suppress extended (29-bit) frames
pub const MODE_NXTD: u8 = 0x08;
/// Suppress remote frames
pub const MODE_NRTR: u8 = 0x04;
/// Report error frames to the receiver
pub const MODE_ERR: u8 = 0x02;
/// Listen-only (monitor) mode, no ACKs sent
pub const MODE_MON: u8 = 0x01;
/// Default operation mode (CAN 2.0)
pub const MODE_DEFAULT: u8 = 0x00;

// ============================================================================
// Status Register Bits (8-bit status byte)
// ============================================================================

/// Controller stopped (default after init)
pub const STAT_RESET: u8 = 0x80;
/// Bus-off state reached
pub const STAT_BOFF: u8 = 0x40;
/// Error warning level reached
pub const STAT_EWRN: u8 = 0x20;
/// Bus error (error passive)
pub const STAT_BERR: u8 = 0x10;
/// Transmitter busy
pub const STAT_TX_BUSY: u8 = 0x08;
/// Receiver empty
pub const STAT_RX_EMPTY: u8 = 0x04;
/// Message lost by the controller
pub const STAT_MSG_LST: u8 = 0x02;
/// Receive queue overrun
pub const STAT_QUE_OVR: u8 = 0x01;

// ============================================================================
// Bit-Timing Clock
// ============================================================================

/// Default timing clock frequency of the bit-rate converter (8 MHz)
pub const TIMING_CLOCK_HZ: u32 = 8_000_000;

// ============================================================================
// CAN Identifier Limits
// ============================================================================

/// Highest standard (11-bit) identifier
pub const CAN_MAX_STD_ID: u32 = 0x7FF;
/// Highest extended (29-bit) identifier
pub const CAN_MAX_XTD_ID: u32 = 0x1FFF_FFFF;

// ============================================================================
// CAN Payload Definitions
// ============================================================================

/// Maximum DLC for classic CAN
pub const CAN_MAX_DLC: u8 = 8;
/// Maximum data length for classic CAN
pub const CAN_MAX_DLEN: usize = 8;

/// Maximum DLC for CAN FD
pub const CANFD_MAX_DLC: u8 = 15;
/// Maximum data length for CAN FD
pub const CANFD_MAX_DLEN: usize = 64;

/// DLC to data length conversion table for CAN FD
pub const CANFD_DLC_TO_LEN: [usize; 16] = [0, 1, 2, 3, 4, 5, 6, 7, 8, 12, 16, 20, 24, 32, 48, 64];

// ============================================================================
// Property Ids (16-bit)
// ============================================================================

/// Version of the driver contract specification (u16)
pub const PROP_GET_SPEC: u16 = 0;
/// Version number of the library (u16, major << 8 | minor)
pub const PROP_GET_VERSION: u16 = 1;
/// Patch number of the library (u8)
pub const PROP_GET_PATCH_NO: u16 = 2;
/// Build number of the library (u32)
pub const PROP_GET_BUILD_NO: u16 = 3;
/// Library id (i32)
pub const PROP_GET_LIBRARY_ID: u16 = 4;
/// Vendor name of the library (string)
pub const PROP_GET_LIBRARY_VENDOR: u16 = 5;
/// Device type of the CAN interface (i32)
pub const PROP_GET_DEVICE_TYPE: u16 = 10;
/// Device name of the CAN interface (string)
pub const PROP_GET_DEVICE_NAME: u16 = 11;
/// Vendor name of the CAN interface (string)
pub const PROP_GET_DEVICE_VENDOR: u16 = 12;
/// Supported operation modes of the CAN controller (u8)
pub const PROP_GET_OP_CAPABILITY: u16 = 14;
/// Active operation mode of the CAN controller (u8)
pub const PROP_GET_OP_MODE: u16 = 15;
/// Active bit-rate settings of the CAN controller
pub const PROP_GET_BITRATE: u16 = 16;
/// Active bus speed of the CAN controller
pub const PROP_GET_SPEED: u16 = 17;
/// Current status register of the CAN controller (u8)
pub const PROP_GET_STATUS: u16 = 18;
/// Current bus load of the CAN controller (u8, percent)
pub const PROP_GET_BUSLOAD: u16 = 19;
/// Total number of transmitted frames (u64)
pub const PROP_GET_TX_COUNTER: u16 = 24;
/// Total number of received frames (u64)
pub const PROP_GET_RX_COUNTER: u16 = 25;
/// Total number of received error frames (u64)
pub const PROP_GET_ERR_COUNTER: u16 = 26;
/// Set the channel enumeration cursor to the first present device
pub const PROP_SET_FIRST_CHANNEL: u16 = 224;
/// Advance the channel enumeration cursor
pub const PROP_SET_NEXT_CHANNEL: u16 = 225;
/// Channel number at the cursor (i32)
pub const PROP_GET_CHANNEL_NO: u16 = 226;
/// Channel name at the cursor (string)
pub const PROP_GET_CHANNEL_NAME: u16 = 227;
/// Vendor id of the device at the cursor (i32)
pub const PROP_GET_CHANNEL_VENDOR_ID: u16 = 229;
/// Vendor name of the device at the cursor (string)
pub const PROP_GET_CHANNEL_VENDOR_NAME: u16 = 230;

/// Version of the driver contract implemented by this crate
pub const DRIVER_SPEC: u16 = 0x0300;
/// Library id of this driver
pub const LIBRARY_ID: i32 = 0x455;
/// Vendor name reported for library-level properties
pub const LIBRARY_VENDOR: &str = "usbcan project";
