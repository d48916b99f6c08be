//! # usbcan
//!
//! A vendor-neutral user-space driver stack for USB CAN adapters,
//! built on [rusb](https://crates.io/crates/rusb).
//!
//! The stack has three layers:
//!
//! - **USB session**: a libusb context with hotplug tracking and a
//!   stable device table, so channel numbers survive a replug.
//! - **Channel**: one CAN controller behind a vendor-neutral adapter
//!   trait, with a double-buffered reception pipe draining the bulk
//!   endpoint into a bounded blocking queue.
//! - **Driver facade**: handle-based init/start/write/read/reset/exit
//!   plus channel discovery and property queries.
//!
//! A backend for the open gs_usb protocol (candleLight, CANable,
//! CANtact and compatibles) is built in; other vendors plug in through
//! the [`CanAdapter`] trait.
//!
//! ## Example
//!
//! ```no_run
//! use usbcan::{BitrateSelect, CanDriver, CanMessage, MODE_DEFAULT};
//!
//! fn main() -> usbcan::Result<()> {
//!     let driver = CanDriver::new()?;
//!     let handle = driver.init(0, MODE_DEFAULT)?;
//!     driver.start(handle, BitrateSelect::Index(-3))?; // 250 kbit/s
//!
//!     driver.write(handle, &CanMessage::new(0x123, &[0xDE, 0xAD]), 100)?;
//!     let msg = driver.read(handle, 1000)?;
//!     println!("{}", msg);
//!
//!     driver.exit(handle)?;
//!     Ok(())
//! }
//! ```

pub mod adapter;
pub mod bitrate;
pub mod channel;
pub mod constants;
pub mod driver;
pub mod error;
pub mod frame;
pub mod gs;
pub mod pipe;
pub mod queue;
pub mod usb;

pub use adapter::{BusStatus, CanAdapter, Capability, FrameDecoder};
pub use bitrate::{
    bitrate_to_btr0btr1, bitrate_to_speed, bitrate_to_string, btr0btr1_to_bitrate,
    index_to_bitrate, string_to_bitrate, BitTiming, Bitrate, BusSpeed, PhaseSpeed,
};
pub use channel::{CanChannel, Counters};
pub use constants::*;
pub use driver::{BitrateSelect, CanDriver, ChannelAvailability, ChannelInfo, PropertyValue};
pub use error::{CanError, Result};
pub use frame::{dlc_to_len, len_to_dlc, CanMessage};
pub use queue::MessageQueue;
pub use usb::{DeviceIo, DeviceRecord, EndpointInfo, InterfaceInfo, UsbDeviceId, UsbSession};
