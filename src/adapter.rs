//! Vendor backend abstraction
//!
//! A `CanAdapter` wraps one CAN controller of one USB device behind a
//! vendor-neutral contract. The channel layer drives the adapter through
//! this trait only, so its state machine and queueing are testable
//! without hardware and new vendor backends plug in without touching the
//! rest of the stack.

use crate::bitrate::Bitrate;
use crate::error::Result;
use crate::frame::CanMessage;

/// Controller capability flags reported by a backend
#[derive(Debug, Clone, Copy, Default)]
pub struct Capability {
    /// CAN FD frame format
    pub fdoe: bool,
    /// Bit-rate switching
    pub brse: bool,
    /// Listen-only (bus monitoring) mode
    pub mon: bool,
    /// Error frame reporting
    pub err: bool,
    /// One-shot (no retransmission) operation
    pub one_shot: bool,
}

/// Bus status snapshot of a running controller
#[derive(Debug, Clone, Copy, Default)]
pub struct BusStatus {
    /// Controller is bus-off
    pub bus_off: bool,
    /// Error warning level reached
    pub warning_level: bool,
    /// Controller is error passive
    pub error_passive: bool,
    /// Receive error counter
    pub rx_errors: u8,
    /// Transmit error counter
    pub tx_errors: u8,
}

/// Decoder for one vendor's bulk-in wire format
///
/// The pipe engine hands completed transfers to the decoder in
/// `frame_size` chunks; each chunk yields at most one message. Echo
/// frames and other protocol traffic yield `None`.
pub trait FrameDecoder: Send {
    /// Size in bytes of one wire frame
    fn frame_size(&self) -> usize;

    /// Decode one wire frame into a received message
    fn decode(&mut self, chunk: &[u8]) -> Option<CanMessage>;
}

/// One CAN controller of one USB device
pub trait CanAdapter: Send {
    /// Capabilities of this controller
    fn capability(&self) -> Capability;

    /// Program the bit-timing registers
    ///
    /// Called with the controller stopped. The data phase is programmed
    /// only when `fd` is set.
    fn set_bitrate(&mut self, bitrate: &Bitrate, fd: bool) -> Result<()>;

    /// Read back the active bit-timing settings
    fn bitrate(&self) -> Result<Bitrate>;

    /// Start the controller in normal or listen-only operation
    fn bus_on(&mut self, mode: u8) -> Result<()>;

    /// Stop the controller
    fn bus_off(&mut self) -> Result<()>;

    /// Queue one message for transmission
    ///
    /// Returns `TransmitterBusy` when the controller cannot accept the
    /// message within `timeout` milliseconds.
    fn transmit(&mut self, msg: &CanMessage, timeout: u16) -> Result<()>;

    /// Current bus status
    fn bus_status(&self) -> Result<BusStatus>;

    /// Bus load in percent, if the controller measures it
    fn bus_load(&self) -> Result<Option<f64>> {
        Ok(None)
    }

    /// Decoder for this backend's receive wire format
    ///
    /// `fd` selects the FD frame layout. The decoder is built when the
    /// channel is initialized, before the controller ever starts, so the
    /// layout follows the requested operation mode rather than the
    /// controller state.
    fn decoder(&self, fd: bool) -> Box<dyn FrameDecoder>;

    /// Short device type name for introspection
    fn device_name(&self) -> String;

    /// Device vendor name for introspection
    fn vendor_name(&self) -> String;
}
