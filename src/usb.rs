//! USB session management
//!
//! One `UsbSession` owns the libusb context, a fixed table of known
//! devices and the event thread that pumps libusb and tracks hotplug
//! arrivals and removals. Devices keep their table slot for the lifetime
//! of the session, so a channel number stays valid across a replug.
//! Platforms without hotplug support fall back to a one-shot scan at
//! session start.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::{bounded, Sender};
use log::{debug, info, warn};
use parking_lot::Mutex;
use rusb::{
    Context, Device, DeviceHandle, Direction, Hotplug, HotplugBuilder, Recipient, RequestType,
    TransferType, UsbContext,
};

use crate::constants::MAX_DEVICES;
use crate::error::{CanError, Result};

/// How long session start waits for the event thread to come up
const STARTUP_TIMEOUT: Duration = Duration::from_secs(5);

/// Poll interval of the libusb event loop
const EVENT_INTERVAL: Duration = Duration::from_millis(100);

/// Vendor and product id of a supported adapter model
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UsbDeviceId {
    /// USB vendor id
    pub vid: u16,
    /// USB product id
    pub pid: u16,
    /// Number of CAN controllers on this model
    pub num_channels: u8,
}

// ============================================================================
// Device table
// ============================================================================

/// One known device, keyed by its bus location
#[derive(Debug, Clone)]
pub struct DeviceRecord {
    /// Adapter model
    pub id: UsbDeviceId,
    /// Device release number (BCD encoded)
    pub release: u16,
    /// USB bus number at last sighting
    pub bus_number: u8,
    /// Device address at last sighting
    pub address: u8,
    /// Device currently attached
    pub present: bool,
    /// Channels currently open on this device
    pub channels_open: u32,
}

/// Fixed-size table of devices seen during this session
///
/// A slot, once assigned to a bus location, is reused when the same
/// location reappears. Slots of removed devices are only marked absent.
pub struct DeviceTable {
    slots: Vec<Mutex<Option<DeviceRecord>>>,
}

impl DeviceTable {
    fn new() -> Self {
        let mut slots = Vec::with_capacity(MAX_DEVICES);
        slots.resize_with(MAX_DEVICES, || Mutex::new(None));
        DeviceTable { slots }
    }

    /// Record an arrival, reusing the slot of the same bus location
    fn attach(&self, id: UsbDeviceId, release: u16, bus_number: u8, address: u8) -> Option<usize> {
        let mut free = None;
        for (index, slot) in self.slots.iter().enumerate() {
            let mut record = slot.lock();
            match record.as_mut() {
                Some(rec) if rec.bus_number == bus_number && rec.address == address => {
                    rec.id = id;
                    rec.release = release;
                    rec.present = true;
                    return Some(index);
                }
                Some(_) => {}
                None => {
                    if free.is_none() {
                        free = Some(index);
                    }
                }
            }
        }
        let index = free?;
        *self.slots[index].lock() = Some(DeviceRecord {
            id,
            release,
            bus_number,
            address,
            present: true,
            channels_open: 0,
        });
        Some(index)
    }

    /// Mark the device at a bus location absent
    fn detach(&self, bus_number: u8, address: u8) -> Option<usize> {
        for (index, slot) in self.slots.iter().enumerate() {
            let mut record = slot.lock();
            if let Some(rec) = record.as_mut() {
                if rec.bus_number == bus_number && rec.address == address && rec.present {
                    rec.present = false;
                    return Some(index);
                }
            }
        }
        None
    }

    /// Snapshot of the record at `index`
    pub fn get(&self, index: usize) -> Option<DeviceRecord> {
        self.slots.get(index)?.lock().clone()
    }

    /// Number of devices currently attached
    pub fn present_count(&self) -> usize {
        self.slots
            .iter()
            .filter(|slot| slot.lock().as_ref().map(|r| r.present).unwrap_or(false))
            .count()
    }

    fn update<R>(&self, index: usize, f: impl FnOnce(&mut DeviceRecord) -> R) -> Option<R> {
        let mut record = self.slots.get(index)?.lock();
        record.as_mut().map(f)
    }
}

// ============================================================================
// Hotplug listener
// ============================================================================

struct TableListener {
    table: Arc<DeviceTable>,
    supported: Vec<UsbDeviceId>,
}

impl TableListener {
    fn lookup(&self, device: &Device<Context>) -> Option<(UsbDeviceId, u16)> {
        let descriptor = device.device_descriptor().ok()?;
        let id = self
            .supported
            .iter()
            .find(|id| id.vid == descriptor.vendor_id() && id.pid == descriptor.product_id())
            .copied()?;
        let version = descriptor.device_version();
        let release = (version.major() as u16) << 8
            | (version.minor() as u16) << 4
            | version.sub_minor() as u16;
        Some((id, release))
    }
}

impl Hotplug<Context> for TableListener {
    fn device_arrived(&mut self, device: Device<Context>) {
        if let Some((id, release)) = self.lookup(&device) {
            match self
                .table
                .attach(id, release, device.bus_number(), device.address())
            {
                Some(index) => info!(
                    "device {:04x}:{:04x} attached at bus {:03} address {:03}, slot {}",
                    id.vid,
                    id.pid,
                    device.bus_number(),
                    device.address(),
                    index
                ),
                None => warn!(
                    "device {:04x}:{:04x} attached but the device table is full",
                    id.vid, id.pid
                ),
            }
        }
    }

    fn device_left(&mut self, device: Device<Context>) {
        if self.lookup(&device).is_some() {
            if let Some(index) = self.table.detach(device.bus_number(), device.address()) {
                info!("device in slot {} detached", index);
            }
        }
    }
}

// ============================================================================
// Session
// ============================================================================

/// USB session: libusb context, device table and event thread
pub struct UsbSession {
    context: Context,
    table: Arc<DeviceTable>,
    // physically open devices, one cached facade per table slot
    opens: Vec<Mutex<Option<DeviceIo>>>,
    shutdown: Arc<AtomicBool>,
    event_thread: Option<thread::JoinHandle<()>>,
    cursor: Mutex<usize>,
}

impl UsbSession {
    /// Start a session tracking the given adapter models
    pub fn new(supported: &[UsbDeviceId]) -> Result<Self> {
        let context = Context::new()?;
        let table = Arc::new(DeviceTable::new());
        let shutdown = Arc::new(AtomicBool::new(false));

        let event_thread = if rusb::has_hotplug() {
            Some(Self::spawn_event_thread(
                context.clone(),
                Arc::clone(&table),
                Arc::clone(&shutdown),
                supported.to_vec(),
            )?)
        } else {
            debug!("hotplug not supported, falling back to a one-shot scan");
            Self::scan_once(&context, &table, supported)?;
            None
        };

        let mut opens = Vec::with_capacity(MAX_DEVICES);
        opens.resize_with(MAX_DEVICES, || Mutex::new(None));

        Ok(UsbSession {
            context,
            table,
            opens,
            shutdown,
            event_thread,
            cursor: Mutex::new(0),
        })
    }

    fn spawn_event_thread(
        context: Context,
        table: Arc<DeviceTable>,
        shutdown: Arc<AtomicBool>,
        supported: Vec<UsbDeviceId>,
    ) -> Result<thread::JoinHandle<()>> {
        let (ready_tx, ready_rx) = bounded::<std::result::Result<(), rusb::Error>>(1);
        let handle = thread::Builder::new()
            .name("usb-events".into())
            .spawn(move || Self::event_loop(context, table, shutdown, supported, ready_tx))
            .map_err(|_| CanError::Fatal)?;

        match ready_rx.recv_timeout(STARTUP_TIMEOUT) {
            Ok(Ok(())) => Ok(handle),
            Ok(Err(err)) => Err(err.into()),
            Err(_) => Err(CanError::Timeout),
        }
    }

    fn event_loop(
        context: Context,
        table: Arc<DeviceTable>,
        shutdown: Arc<AtomicBool>,
        supported: Vec<UsbDeviceId>,
        ready_tx: Sender<std::result::Result<(), rusb::Error>>,
    ) {
        let listener = TableListener { table, supported };
        // enumerate(true) replays already attached devices as arrivals
        let registration = HotplugBuilder::new()
            .enumerate(true)
            .register(&context, Box::new(listener));
        let _registration = match registration {
            Ok(reg) => {
                let _ = ready_tx.send(Ok(()));
                reg
            }
            Err(err) => {
                let _ = ready_tx.send(Err(err));
                return;
            }
        };
        while !shutdown.load(Ordering::Acquire) {
            if let Err(err) = context.handle_events(Some(EVENT_INTERVAL)) {
                warn!("usb event loop error: {}", err);
                break;
            }
        }
    }

    fn scan_once(
        context: &Context,
        table: &DeviceTable,
        supported: &[UsbDeviceId],
    ) -> Result<()> {
        for device in context.devices()?.iter() {
            let descriptor = match device.device_descriptor() {
                Ok(descriptor) => descriptor,
                Err(_) => continue,
            };
            let id = supported
                .iter()
                .find(|id| id.vid == descriptor.vendor_id() && id.pid == descriptor.product_id());
            if let Some(&id) = id {
                let version = descriptor.device_version();
                let release = (version.major() as u16) << 8
                    | (version.minor() as u16) << 4
                    | version.sub_minor() as u16;
                table.attach(id, release, device.bus_number(), device.address());
            }
        }
        Ok(())
    }

    /// Device table of this session
    pub fn table(&self) -> &DeviceTable {
        &self.table
    }

    /// Rewind the enumeration cursor and return the first attached device
    pub fn first_device(&self) -> Option<(usize, DeviceRecord)> {
        *self.cursor.lock() = 0;
        self.next_device()
    }

    /// Return the next attached device, advancing the cursor
    pub fn next_device(&self) -> Option<(usize, DeviceRecord)> {
        let mut cursor = self.cursor.lock();
        while *cursor < MAX_DEVICES {
            let index = *cursor;
            *cursor += 1;
            if let Some(record) = self.table.get(index) {
                if record.present {
                    return Some((index, record));
                }
            }
        }
        None
    }

    /// Open the device in table slot `index` for channel I/O
    ///
    /// The first open of a device claims its interface; further opens on
    /// the same device share that claim through a reference count and a
    /// cached facade, so a multi-channel device is opened physically
    /// only once.
    pub fn open_device(&self, index: usize) -> Result<DeviceIo> {
        let record = self.table.get(index).ok_or(CanError::InvalidHandle)?;
        if !record.present {
            return Err(CanError::ResourceError(rusb::Error::NoDevice));
        }

        let mut open = self
            .opens
            .get(index)
            .ok_or(CanError::InvalidHandle)?
            .lock();
        if let Some(io) = open.as_ref() {
            self.table.update(index, |rec| rec.channels_open += 1);
            return Ok(io.clone());
        }

        let device = self
            .context
            .devices()?
            .iter()
            .find(|dev| {
                dev.bus_number() == record.bus_number && dev.address() == record.address
            })
            .ok_or(CanError::ResourceError(rusb::Error::NoDevice))?;

        let handle = device.open()?;
        let (interface, endpoint_in, endpoint_out) = inspect_interface(&device)?;

        #[cfg(not(target_os = "windows"))]
        if handle.kernel_driver_active(0).unwrap_or(false) {
            handle.detach_kernel_driver(0)?;
        }
        handle.claim_interface(0)?;

        self.table.update(index, |rec| rec.channels_open += 1);
        debug!(
            "opened device {:04x}:{:04x}, endpoints in {:#04x} out {:#04x}",
            record.id.vid, record.id.pid, endpoint_in.address, endpoint_out.address
        );

        let io = DeviceIo {
            handle: Arc::new(handle),
            vendor_id: record.id.vid,
            product_id: record.id.pid,
            interface,
            endpoint_in,
            endpoint_out,
        };
        *open = Some(io.clone());
        Ok(io)
    }

    /// Release one channel's claim on the device in slot `index`
    ///
    /// The interface is released physically only when the last channel
    /// closes.
    pub fn close_device(&self, index: usize, io: DeviceIo) {
        drop(io);
        let remaining = self.table.update(index, |rec| {
            rec.channels_open = rec.channels_open.saturating_sub(1);
            rec.channels_open
        });
        if remaining != Some(0) {
            return;
        }
        if let Some(slot) = self.opens.get(index) {
            if let Some(cached) = slot.lock().take() {
                if let Ok(handle) = Arc::try_unwrap(cached.handle) {
                    let _ = handle.release_interface(0);
                }
            }
        }
    }
}

impl Drop for UsbSession {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Release);
        if let Some(handle) = self.event_thread.take() {
            let _ = handle.join();
        }
    }
}

/// Bulk endpoint address and maximum packet size
#[derive(Debug, Clone, Copy)]
pub struct EndpointInfo {
    /// Endpoint address including the direction bit
    pub address: u8,
    /// Maximum packet size in bytes
    pub max_packet_size: u16,
}

impl EndpointInfo {
    /// Transfer direction encoded in the address
    pub fn direction(&self) -> Direction {
        if self.address & 0x80 != 0 {
            Direction::In
        } else {
            Direction::Out
        }
    }
}

/// Class triple and endpoint count of the claimed interface
#[derive(Debug, Clone, Copy)]
pub struct InterfaceInfo {
    /// Interface class code
    pub class_code: u8,
    /// Interface subclass code
    pub sub_class_code: u8,
    /// Interface protocol code
    pub protocol_code: u8,
    /// Number of endpoints on the interface
    pub num_endpoints: u8,
}

/// Locate the interface carrying a bulk IN and a bulk OUT endpoint
fn inspect_interface(
    device: &Device<Context>,
) -> Result<(InterfaceInfo, EndpointInfo, EndpointInfo)> {
    let config = device.active_config_descriptor()?;
    for interface in config.interfaces() {
        for descriptor in interface.descriptors() {
            let mut endpoint_in = None;
            let mut endpoint_out = None;
            for endpoint in descriptor.endpoint_descriptors() {
                if endpoint.transfer_type() != TransferType::Bulk {
                    continue;
                }
                let info = EndpointInfo {
                    address: endpoint.address(),
                    max_packet_size: endpoint.max_packet_size(),
                };
                match endpoint.direction() {
                    Direction::In if endpoint_in.is_none() => endpoint_in = Some(info),
                    Direction::Out if endpoint_out.is_none() => endpoint_out = Some(info),
                    _ => {}
                }
            }
            if let (Some(ep_in), Some(ep_out)) = (endpoint_in, endpoint_out) {
                let interface = InterfaceInfo {
                    class_code: descriptor.class_code(),
                    sub_class_code: descriptor.sub_class_code(),
                    protocol_code: descriptor.protocol_code(),
                    num_endpoints: descriptor.num_endpoints(),
                };
                return Ok((interface, ep_in, ep_out));
            }
        }
    }
    Err(CanError::ResourceError(rusb::Error::NotFound))
}

// ============================================================================
// Device I/O facade
// ============================================================================

/// Cloneable transfer facade over one open device
///
/// `DeviceHandle` is thread safe, so clones may issue transfers from
/// different threads concurrently.
#[derive(Clone)]
pub struct DeviceIo {
    handle: Arc<DeviceHandle<Context>>,
    /// USB vendor id of the open device
    pub vendor_id: u16,
    /// USB product id of the open device
    pub product_id: u16,
    /// Claimed interface descriptor summary
    pub interface: InterfaceInfo,
    /// Bulk IN endpoint
    pub endpoint_in: EndpointInfo,
    /// Bulk OUT endpoint
    pub endpoint_out: EndpointInfo,
}

impl DeviceIo {
    /// Issue a vendor control request carrying data to the device
    pub fn control_out(
        &self,
        request: u8,
        value: u16,
        index: u16,
        data: &[u8],
        timeout: Duration,
    ) -> Result<()> {
        let request_type =
            rusb::request_type(Direction::Out, RequestType::Vendor, Recipient::Interface);
        self.handle
            .write_control(request_type, request, value, index, data, timeout)?;
        Ok(())
    }

    /// Issue a vendor control request reading data from the device
    pub fn control_in(
        &self,
        request: u8,
        value: u16,
        index: u16,
        data: &mut [u8],
        timeout: Duration,
    ) -> Result<usize> {
        let request_type =
            rusb::request_type(Direction::In, RequestType::Vendor, Recipient::Interface);
        let n = self
            .handle
            .read_control(request_type, request, value, index, data, timeout)?;
        Ok(n)
    }

    /// Write to the bulk OUT endpoint
    pub fn bulk_write(&self, data: &[u8], timeout: Duration) -> Result<usize> {
        let n = self.handle.write_bulk(self.endpoint_out.address, data, timeout)?;
        Ok(n)
    }

    /// Read from the bulk IN endpoint
    pub fn bulk_read(&self, data: &mut [u8], timeout: Duration) -> Result<usize> {
        let n = self.handle.read_bulk(self.endpoint_in.address, data, timeout)?;
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ID: UsbDeviceId = UsbDeviceId {
        vid: 0x1D50,
        pid: 0x606F,
        num_channels: 1,
    };

    #[test]
    fn test_table_attach_assigns_slots() {
        let table = DeviceTable::new();
        assert_eq!(table.attach(ID, 0, 1, 4), Some(0));
        assert_eq!(table.attach(ID, 0, 1, 5), Some(1));
        assert_eq!(table.present_count(), 2);
    }

    #[test]
    fn test_table_replug_keeps_slot() {
        let table = DeviceTable::new();
        assert_eq!(table.attach(ID, 0, 1, 4), Some(0));
        assert_eq!(table.attach(ID, 0, 1, 5), Some(1));
        assert_eq!(table.detach(1, 4), Some(0));
        assert_eq!(table.present_count(), 1);
        // the same bus location comes back into its old slot
        assert_eq!(table.attach(ID, 0, 1, 4), Some(0));
        assert!(table.get(0).map(|r| r.present).unwrap_or(false));
    }

    #[test]
    fn test_table_detach_unknown_location() {
        let table = DeviceTable::new();
        assert_eq!(table.detach(2, 9), None);
    }

    #[test]
    fn test_table_full() {
        let table = DeviceTable::new();
        for address in 0..MAX_DEVICES as u8 {
            assert!(table.attach(ID, 0, 1, address).is_some());
        }
        assert_eq!(table.attach(ID, 0, 2, 1), None);
    }

    #[test]
    fn test_endpoint_direction_from_address() {
        let ep_in = EndpointInfo {
            address: 0x81,
            max_packet_size: 64,
        };
        let ep_out = EndpointInfo {
            address: 0x02,
            max_packet_size: 64,
        };
        assert_eq!(ep_in.direction(), Direction::In);
        assert_eq!(ep_out.direction(), Direction::Out);
    }

    // needs an attached adapter, otherwise skipped
    #[test]
    fn test_open_device_shares_the_claim() {
        let session = match UsbSession::new(crate::gs::SUPPORTED_DEVICES) {
            Ok(session) => session,
            Err(_) => return,
        };
        let (slot, _) = match session.first_device() {
            Some(device) => device,
            None => return,
        };
        // the second open must reuse the claim instead of failing busy
        let first = session.open_device(slot).unwrap();
        let second = session.open_device(slot).unwrap();
        assert_eq!(session.table().get(slot).unwrap().channels_open, 2);
        session.close_device(slot, second);
        assert_eq!(session.table().get(slot).unwrap().channels_open, 1);
        session.close_device(slot, first);
        assert_eq!(session.table().get(slot).unwrap().channels_open, 0);
    }
}
