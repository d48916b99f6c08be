//! Driver facade
//!
//! `CanDriver` is the application-facing surface: a handle table over
//! the channel state machines plus channel discovery, the property
//! query interface and session life cycle. Handles are the channel
//! numbers themselves, one slot per channel, so a second init of the
//! same channel fails instead of aliasing it.

use log::{debug, info};
use parking_lot::Mutex;

use crate::bitrate::{index_to_bitrate, Bitrate, BusSpeed};
use crate::channel::{CanChannel, Counters};
use crate::constants::{
    CAN_ALL_HANDLES, DRIVER_SPEC, LIBRARY_ID, LIBRARY_VENDOR, MAX_HANDLES, MODE_BRSE, MODE_FDOE,
    PROP_GET_BITRATE,
    PROP_GET_BUILD_NO, PROP_GET_BUSLOAD, PROP_GET_CHANNEL_NAME, PROP_GET_CHANNEL_NO,
    PROP_GET_CHANNEL_VENDOR_ID, PROP_GET_CHANNEL_VENDOR_NAME, PROP_GET_DEVICE_NAME,
    PROP_GET_DEVICE_TYPE, PROP_GET_DEVICE_VENDOR, PROP_GET_ERR_COUNTER, PROP_GET_LIBRARY_ID,
    PROP_GET_LIBRARY_VENDOR, PROP_GET_OP_CAPABILITY, PROP_GET_OP_MODE, PROP_GET_PATCH_NO,
    PROP_GET_RX_COUNTER, PROP_GET_SPEC, PROP_GET_SPEED, PROP_GET_STATUS, PROP_GET_TX_COUNTER,
    PROP_GET_VERSION, PROP_SET_FIRST_CHANNEL, PROP_SET_NEXT_CHANNEL,
};
use crate::error::{CanError, Result};
use crate::frame::CanMessage;
use crate::gs::{self, GsAdapter};
use crate::pipe::AsyncPipe;
use crate::usb::UsbSession;

/// Bit-rate selection accepted by `start`
#[derive(Debug, Clone, Copy)]
pub enum BitrateSelect {
    /// Predefined index (0 or a negative CiA index)
    Index(i32),
    /// Explicit timing settings
    Settings(Bitrate),
}

/// Result of probing a channel number
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelAvailability {
    /// Channel exists and can be initialized
    Available,
    /// Channel exists but is already initialized in this session
    Occupied,
    /// No attached device provides this channel
    NotAvailable,
    /// Channel exists but the requested mode is inconsistent
    NotTestable,
}

/// Value returned by a property query
#[derive(Debug, Clone)]
pub enum PropertyValue {
    /// Unsigned byte value
    U8(u8),
    /// Unsigned word value
    U16(u16),
    /// Signed value
    I32(i32),
    /// Counter value
    U64(u64),
    /// Percentage or ratio
    F64(f64),
    /// Text value
    Str(String),
    /// Bit-rate settings
    Bitrate(Bitrate),
    /// Derived transmission speed
    Speed(BusSpeed),
}

/// One CAN channel reachable in this session
#[derive(Debug, Clone)]
pub struct ChannelInfo {
    /// Channel number, also the init handle
    pub channel: i32,
    /// Device table slot backing the channel
    pub device_slot: usize,
    /// Controller index on its device
    pub local_index: u8,
    /// USB vendor id of the device
    pub vendor_id: u16,
    /// USB product id of the device
    pub product_id: u16,
}

struct OpenSlot {
    channel: CanChannel,
    device_slot: usize,
    io: crate::usb::DeviceIo,
}

/// Application-facing driver: session, handle table and discovery
pub struct CanDriver {
    usb: UsbSession,
    slots: Vec<Mutex<Option<OpenSlot>>>,
    cursor: Mutex<Option<usize>>,
}

impl CanDriver {
    /// Start a driver session for all supported adapter models
    pub fn new() -> Result<Self> {
        let usb = UsbSession::new(gs::SUPPORTED_DEVICES)?;
        let mut slots = Vec::with_capacity(MAX_HANDLES);
        slots.resize_with(MAX_HANDLES, || Mutex::new(None));
        info!("driver session started");
        Ok(CanDriver {
            usb,
            slots,
            cursor: Mutex::new(None),
        })
    }

    // ------------------------------------------------------------------------
    // Discovery
    // ------------------------------------------------------------------------

    /// Channels currently reachable, in stable channel-number order
    pub fn channels(&self) -> Vec<ChannelInfo> {
        let mut infos = Vec::new();
        let mut channel = 0i32;
        let mut device = self.usb.first_device();
        while let Some((slot, record)) = device {
            for local in 0..record.id.num_channels {
                infos.push(ChannelInfo {
                    channel,
                    device_slot: slot,
                    local_index: local,
                    vendor_id: record.id.vid,
                    product_id: record.id.pid,
                });
                channel += 1;
            }
            device = self.usb.next_device();
        }
        infos
    }

    fn channel_info(&self, channel: i32) -> Result<ChannelInfo> {
        self.channels()
            .into_iter()
            .find(|info| info.channel == channel)
            .ok_or(CanError::InvalidHandle)
    }

    /// Check whether a channel exists, is free and could run in `mode`
    ///
    /// Does not allocate a handle or touch the channel state.
    pub fn probe(&self, channel: i32, mode: u8) -> Result<ChannelAvailability> {
        let index = check_handle(channel)?;
        if self.channel_info(channel).is_err() {
            return Ok(ChannelAvailability::NotAvailable);
        }
        if mode & MODE_BRSE != 0 && mode & MODE_FDOE == 0 {
            return Ok(ChannelAvailability::NotTestable);
        }
        if self.slots[index].lock().is_some() {
            return Ok(ChannelAvailability::Occupied);
        }
        Ok(ChannelAvailability::Available)
    }

    // ------------------------------------------------------------------------
    // Life cycle
    // ------------------------------------------------------------------------

    /// Initialize a channel in the given operation mode
    ///
    /// Returns the handle, which equals the channel number.
    pub fn init(&self, channel: i32, mode: u8) -> Result<i32> {
        let index = check_handle(channel)?;
        let info = self.channel_info(channel)?;

        let mut slot = self.slots[index].lock();
        if slot.is_some() {
            return Err(CanError::AlreadyInitialized);
        }

        let io = self.usb.open_device(info.device_slot)?;
        let adapter = match GsAdapter::new(io.clone(), info.local_index) {
            Ok(adapter) => adapter,
            Err(err) => {
                self.usb.close_device(info.device_slot, io);
                return Err(err);
            }
        };
        let mut can_channel = match CanChannel::new(Box::new(adapter), mode) {
            Ok(can_channel) => can_channel,
            Err(err) => {
                self.usb.close_device(info.device_slot, io);
                return Err(err);
            }
        };

        let mut sink = can_channel.sink();
        let pipe = AsyncPipe::start(io.clone(), Box::new(move |data| sink.ingest(data)))?;
        can_channel.attach_pipe(pipe);

        *slot = Some(OpenSlot {
            channel: can_channel,
            device_slot: info.device_slot,
            io,
        });
        debug!("channel {} initialized in mode {:#04x}", channel, mode);
        Ok(channel)
    }

    /// Tear down one channel, or every open channel with `CAN_ALL_HANDLES`
    ///
    /// Tearing down all channels ignores individual failures so one
    /// stuck device cannot keep the rest open.
    pub fn exit(&self, handle: i32) -> Result<()> {
        if handle == CAN_ALL_HANDLES {
            for slot in &self.slots {
                if let Some(open) = slot.lock().take() {
                    open.channel.teardown();
                    self.usb.close_device(open.device_slot, open.io);
                }
            }
            return Ok(());
        }
        let index = check_handle(handle)?;
        let open = self.slots[index]
            .lock()
            .take()
            .ok_or(CanError::NotInitialized)?;
        open.channel.teardown();
        self.usb.close_device(open.device_slot, open.io);
        Ok(())
    }

    /// Wake readers blocked on a channel, or on all channels
    pub fn kill(&self, handle: i32) -> Result<()> {
        if handle == CAN_ALL_HANDLES {
            for slot in &self.slots {
                if let Some(open) = slot.lock().as_ref() {
                    open.channel.signal();
                }
            }
            return Ok(());
        }
        self.with_channel(handle, |channel| {
            channel.signal();
            Ok(())
        })
    }

    // ------------------------------------------------------------------------
    // Operation
    // ------------------------------------------------------------------------

    fn with_channel<R>(&self, handle: i32, f: impl FnOnce(&mut CanChannel) -> Result<R>) -> Result<R> {
        let index = check_handle(handle)?;
        let mut slot = self.slots[index].lock();
        let open = slot.as_mut().ok_or(CanError::NotInitialized)?;
        f(&mut open.channel)
    }

    /// Program the bit rate and start a channel
    pub fn start(&self, handle: i32, select: BitrateSelect) -> Result<()> {
        let bitrate = match select {
            BitrateSelect::Index(index) => index_to_bitrate(index)?,
            BitrateSelect::Settings(bitrate) => bitrate,
        };
        self.with_channel(handle, |channel| channel.start(&bitrate))
    }

    /// Stop a channel
    pub fn reset(&self, handle: i32) -> Result<()> {
        self.with_channel(handle, |channel| channel.reset())
    }

    /// Send one message on a channel
    pub fn write(&self, handle: i32, msg: &CanMessage, timeout: u16) -> Result<()> {
        self.with_channel(handle, |channel| channel.write(msg, timeout))
    }

    /// Receive one message from a channel, blocking up to `timeout` ms
    pub fn read(&self, handle: i32, timeout: u16) -> Result<CanMessage> {
        self.with_channel(handle, |channel| channel.read(timeout))
    }

    /// Status byte of a channel
    pub fn status(&self, handle: i32) -> Result<u8> {
        self.with_channel(handle, |channel| channel.status())
    }

    /// Bus load of a channel in percent, if measured
    pub fn bus_load(&self, handle: i32) -> Result<Option<f64>> {
        self.with_channel(handle, |channel| channel.bus_load())
    }

    /// Active bit-rate settings of a channel
    pub fn bitrate(&self, handle: i32) -> Result<Bitrate> {
        self.with_channel(handle, |channel| channel.bitrate())
    }

    /// Derived transmission speed of a channel
    pub fn speed(&self, handle: i32) -> Result<BusSpeed> {
        self.with_channel(handle, |channel| channel.speed())
    }

    /// Message counters of a channel since its last start
    pub fn counters(&self, handle: i32) -> Result<Counters> {
        self.with_channel(handle, |channel| Ok(channel.counters()))
    }

    // ------------------------------------------------------------------------
    // Introspection
    // ------------------------------------------------------------------------

    /// Query a driver or channel property
    ///
    /// Library-level properties answer for any handle, channel-level
    /// ones need an initialized handle.
    pub fn property(&self, handle: i32, id: u16) -> Result<PropertyValue> {
        match id {
            PROP_GET_SPEC => return Ok(PropertyValue::U16(DRIVER_SPEC)),
            PROP_GET_VERSION => {
                let major: u16 = parse_version(env!("CARGO_PKG_VERSION_MAJOR"));
                let minor: u16 = parse_version(env!("CARGO_PKG_VERSION_MINOR"));
                return Ok(PropertyValue::U16(major << 8 | minor));
            }
            PROP_GET_PATCH_NO => {
                return Ok(PropertyValue::U8(
                    parse_version(env!("CARGO_PKG_VERSION_PATCH")) as u8,
                ));
            }
            PROP_GET_BUILD_NO => return Ok(PropertyValue::I32(0)),
            PROP_GET_LIBRARY_ID => return Ok(PropertyValue::I32(LIBRARY_ID)),
            PROP_GET_LIBRARY_VENDOR => {
                return Ok(PropertyValue::Str(LIBRARY_VENDOR.into()));
            }
            PROP_SET_FIRST_CHANNEL => return self.cursor_first(),
            PROP_SET_NEXT_CHANNEL => return self.cursor_next(),
            PROP_GET_CHANNEL_NO
            | PROP_GET_CHANNEL_NAME
            | PROP_GET_CHANNEL_VENDOR_ID
            | PROP_GET_CHANNEL_VENDOR_NAME => return self.cursor_get(id),
            _ => {}
        }
        self.with_channel(handle, |channel| match id {
            PROP_GET_DEVICE_TYPE | PROP_GET_DEVICE_NAME => {
                Ok(PropertyValue::Str(channel.device_name()))
            }
            PROP_GET_DEVICE_VENDOR => Ok(PropertyValue::Str(channel.vendor_name())),
            PROP_GET_OP_CAPABILITY => Ok(PropertyValue::U8(channel.op_capability())),
            PROP_GET_OP_MODE => Ok(PropertyValue::U8(channel.mode())),
            PROP_GET_BITRATE => Ok(PropertyValue::Bitrate(channel.bitrate()?)),
            PROP_GET_SPEED => Ok(PropertyValue::Speed(channel.speed()?)),
            PROP_GET_STATUS => Ok(PropertyValue::U8(channel.status()?)),
            PROP_GET_BUSLOAD => Ok(PropertyValue::F64(channel.bus_load()?.unwrap_or(0.0))),
            PROP_GET_TX_COUNTER => Ok(PropertyValue::U64(channel.counters().tx)),
            PROP_GET_RX_COUNTER => Ok(PropertyValue::U64(channel.counters().rx)),
            PROP_GET_ERR_COUNTER => Ok(PropertyValue::U64(channel.counters().err)),
            _ => Err(CanError::NotSupported),
        })
    }

    fn cursor_first(&self) -> Result<PropertyValue> {
        let infos = self.channels();
        let mut cursor = self.cursor.lock();
        if infos.is_empty() {
            *cursor = None;
            return Err(CanError::ResourceError(rusb::Error::NotFound));
        }
        *cursor = Some(0);
        Ok(PropertyValue::I32(infos[0].channel))
    }

    fn cursor_next(&self) -> Result<PropertyValue> {
        let infos = self.channels();
        let mut cursor = self.cursor.lock();
        let next = cursor.map(|c| c + 1).unwrap_or(0);
        if next >= infos.len() {
            *cursor = None;
            return Err(CanError::ResourceError(rusb::Error::NotFound));
        }
        *cursor = Some(next);
        Ok(PropertyValue::I32(infos[next].channel))
    }

    fn cursor_get(&self, id: u16) -> Result<PropertyValue> {
        let infos = self.channels();
        let cursor = self.cursor.lock();
        let info = cursor
            .and_then(|c| infos.get(c))
            .ok_or(CanError::ResourceError(rusb::Error::NotFound))?;
        match id {
            PROP_GET_CHANNEL_NO => Ok(PropertyValue::I32(info.channel)),
            PROP_GET_CHANNEL_NAME => Ok(PropertyValue::Str(format!(
                "channel {} on {:04x}:{:04x}",
                info.local_index, info.vendor_id, info.product_id
            ))),
            PROP_GET_CHANNEL_VENDOR_ID => Ok(PropertyValue::I32(info.vendor_id as i32)),
            PROP_GET_CHANNEL_VENDOR_NAME => Ok(PropertyValue::Str(format!(
                "{:04x}",
                info.vendor_id
            ))),
            _ => Err(CanError::NotSupported),
        }
    }

    /// Device type name of the channel behind a handle
    pub fn hardware(&self, handle: i32) -> Result<String> {
        self.with_channel(handle, |channel| {
            Ok(format!(
                "{} ({})",
                channel.device_name(),
                channel.vendor_name()
            ))
        })
    }

    /// Name and version of this driver
    pub fn software(&self) -> String {
        format!("{} {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"))
    }

    /// Version of this driver
    pub fn version() -> &'static str {
        env!("CARGO_PKG_VERSION")
    }
}

impl Drop for CanDriver {
    fn drop(&mut self) {
        let _ = self.exit(CAN_ALL_HANDLES);
    }
}

fn check_handle(handle: i32) -> Result<usize> {
    if handle < 0 || handle as usize >= MAX_HANDLES {
        return Err(CanError::InvalidHandle);
    }
    Ok(handle as usize)
}

fn parse_version(s: &str) -> u16 {
    s.parse().unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::MODE_DEFAULT;

    fn driver() -> Option<CanDriver> {
        // the USB subsystem may be absent in a build sandbox
        CanDriver::new().ok()
    }

    #[test]
    fn test_handle_out_of_range() {
        let driver = match driver() {
            Some(driver) => driver,
            None => return,
        };
        assert!(matches!(
            driver.read(MAX_HANDLES as i32, 0),
            Err(CanError::InvalidHandle)
        ));
        assert!(matches!(driver.read(-2, 0), Err(CanError::InvalidHandle)));
        assert!(matches!(
            driver.probe(99, MODE_DEFAULT),
            Err(CanError::InvalidHandle)
        ));
    }

    #[test]
    fn test_unopened_handle_is_not_initialized() {
        let driver = match driver() {
            Some(driver) => driver,
            None => return,
        };
        assert!(matches!(driver.read(0, 0), Err(CanError::NotInitialized)));
        assert!(matches!(
            driver.write(0, &CanMessage::new(1, &[]), 0),
            Err(CanError::NotInitialized)
        ));
        assert!(matches!(driver.status(0), Err(CanError::NotInitialized)));
        assert!(matches!(driver.exit(0), Err(CanError::NotInitialized)));
    }

    #[test]
    fn test_exit_all_without_channels() {
        let driver = match driver() {
            Some(driver) => driver,
            None => return,
        };
        assert!(driver.exit(CAN_ALL_HANDLES).is_ok());
        assert!(driver.kill(CAN_ALL_HANDLES).is_ok());
    }

    #[test]
    fn test_library_properties_need_no_handle() {
        let driver = match driver() {
            Some(driver) => driver,
            None => return,
        };
        assert!(matches!(
            driver.property(-1, PROP_GET_SPEC),
            Ok(PropertyValue::U16(DRIVER_SPEC))
        ));
        assert!(matches!(
            driver.property(-1, PROP_GET_LIBRARY_ID),
            Ok(PropertyValue::I32(LIBRARY_ID))
        ));
        assert!(driver.property(-1, PROP_GET_VERSION).is_ok());
        assert!(matches!(
            driver.property(-1, PROP_GET_LIBRARY_VENDOR),
            Ok(PropertyValue::Str(_))
        ));
    }

    #[test]
    fn test_channel_property_needs_handle() {
        let driver = match driver() {
            Some(driver) => driver,
            None => return,
        };
        assert!(matches!(
            driver.property(0, PROP_GET_OP_MODE),
            Err(CanError::NotInitialized)
        ));
        assert!(matches!(
            driver.property(-1, PROP_GET_OP_MODE),
            Err(CanError::InvalidHandle)
        ));
    }

    #[test]
    fn test_init_without_device_fails() {
        let driver = match driver() {
            Some(driver) => driver,
            None => return,
        };
        if driver.channels().is_empty() {
            assert_eq!(
                driver.probe(0, MODE_DEFAULT).unwrap(),
                ChannelAvailability::NotAvailable
            );
            assert!(matches!(
                driver.init(0, MODE_DEFAULT),
                Err(CanError::InvalidHandle)
            ));
        }
    }

    #[test]
    fn test_software_version_string() {
        let driver = match driver() {
            Some(driver) => driver,
            None => return,
        };
        assert!(driver.software().contains(env!("CARGO_PKG_VERSION")));
    }
}
