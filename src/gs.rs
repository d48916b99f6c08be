//! gs_usb (candleLight) vendor backend
//!
//! Implements the vendor-neutral adapter contract for adapters speaking
//! the open gs_usb protocol: candleLight, CANable with candleLight
//! firmware, CANtact and compatibles. Configuration goes over vendor
//! control requests, frames over the bulk endpoints in fixed-size host
//! frames.

use std::time::Duration;

use log::{debug, warn};

use crate::adapter::{BusStatus, CanAdapter, Capability, FrameDecoder};
use crate::bitrate::{BitTiming, Bitrate};
use crate::constants::{MODE_FDOE, MODE_MON, MODE_NISO};
use crate::error::{CanError, Result};
use crate::frame::{dlc_to_len, CanMessage};
use crate::usb::{DeviceIo, UsbDeviceId};

// ============================================================================
// Protocol constants
// ============================================================================

/// Control request: set host byte order
const BREQ_HOST_FORMAT: u8 = 0;
/// Control request: set nominal bit timing
const BREQ_BITTIMING: u8 = 1;
/// Control request: start or reset a channel
const BREQ_MODE: u8 = 2;
/// Control request: read device configuration
const BREQ_DEVICE_CONFIG: u8 = 5;
/// Control request: set data phase bit timing
const BREQ_DATA_BITTIMING: u8 = 10;
/// Control request: read extended bit timing limits and features
const BREQ_BT_CONST_EXT: u8 = 11;
/// Control request: read channel state and error counters
const BREQ_GET_STATE: u8 = 14;

/// Little-endian host byte order magic
const HOST_FORMAT_MAGIC: u32 = 0x0000_BEEF;

/// MODE request: stop the channel
const CAN_MODE_RESET: u32 = 0;
/// MODE request: start the channel
const CAN_MODE_START: u32 = 1;

/// Mode flag: listen-only operation
const GS_CAN_MODE_LISTEN_ONLY: u32 = 1 << 0;
/// Mode flag: hardware timestamps on received frames
const GS_CAN_MODE_HW_TIMESTAMP: u32 = 1 << 4;
/// Mode flag: CAN FD operation
const GS_CAN_MODE_FD: u32 = 1 << 8;

/// Feature flag: listen-only supported
const GS_CAN_FEATURE_LISTEN_ONLY: u32 = 1 << 0;
/// Feature flag: one-shot transmission supported
const GS_CAN_FEATURE_ONE_SHOT: u32 = 1 << 3;
/// Feature flag: hardware timestamps supported
const GS_CAN_FEATURE_HW_TIMESTAMP: u32 = 1 << 4;
/// Feature flag: CAN FD supported
const GS_CAN_FEATURE_FD: u32 = 1 << 8;
/// Feature flag: channel state readback supported
const GS_CAN_FEATURE_GET_STATE: u32 = 1 << 14;

/// Extended (29-bit) identifier flag in the wire identifier
const CAN_EFF_FLAG: u32 = 0x8000_0000;
/// Remote request flag in the wire identifier
const CAN_RTR_FLAG: u32 = 0x4000_0000;
/// Error frame flag in the wire identifier
const CAN_ERR_FLAG: u32 = 0x2000_0000;
/// Mask of the identifier bits
const CAN_EFF_MASK: u32 = 0x1FFF_FFFF;

/// Host frame flag: receive queue overflowed in the device
const GS_CAN_FLAG_OVERFLOW: u8 = 1 << 0;
/// Host frame flag: CAN FD frame
const GS_CAN_FLAG_FD: u8 = 1 << 1;
/// Host frame flag: bit-rate switched
const GS_CAN_FLAG_BRS: u8 = 1 << 2;
/// Host frame flag: transmitter was error passive
const GS_CAN_FLAG_ESI: u8 = 1 << 3;

/// Echo id marking a received frame rather than a transmit echo
const RX_ECHO_ID: u32 = 0xFFFF_FFFF;

/// Classic host frame: echo_id, can_id, dlc, channel, flags, reserved, 8 data
const FRAME_SIZE_CLASSIC: usize = 20;
/// CAN FD host frame carries 64 data bytes
const FRAME_SIZE_FD: usize = 76;
/// Trailing hardware timestamp in microseconds
const TIMESTAMP_SIZE: usize = 4;

/// Channel state values of the GET_STATE reply
const STATE_ERROR_WARNING: u32 = 1;
const STATE_ERROR_PASSIVE: u32 = 2;
const STATE_BUS_OFF: u32 = 3;

const CONTROL_TIMEOUT: Duration = Duration::from_millis(1000);

/// Adapter models speaking the gs_usb protocol
pub const SUPPORTED_DEVICES: &[UsbDeviceId] = &[
    // candleLight
    UsbDeviceId {
        vid: 0x1D50,
        pid: 0x606F,
        num_channels: 1,
    },
    // CANable (candleLight firmware)
    UsbDeviceId {
        vid: 0x1209,
        pid: 0x2323,
        num_channels: 1,
    },
    // CANtact Pro
    UsbDeviceId {
        vid: 0x1CD2,
        pid: 0x606F,
        num_channels: 2,
    },
    // CANnectivity
    UsbDeviceId {
        vid: 0x16D0,
        pid: 0x10B8,
        num_channels: 1,
    },
];

/// Carry a timing quadruple from one controller clock to another
///
/// Only integer clock ratios are representable: the prescaler absorbs
/// the ratio while the segment lengths keep the speed and sample point.
fn rescale_timing(timing: &BitTiming, from: u32, to: u32) -> Result<BitTiming> {
    if from == to {
        return Ok(*timing);
    }
    if from == 0 || to % from != 0 {
        return Err(CanError::InvalidBaudrate);
    }
    let brp = timing.brp as u32 * (to / from);
    if brp > u16::MAX as u32 {
        return Err(CanError::InvalidBaudrate);
    }
    Ok(BitTiming {
        brp: brp as u16,
        ..*timing
    })
}

fn model_name(vid: u16, pid: u16) -> (&'static str, &'static str) {
    match (vid, pid) {
        (0x1D50, 0x606F) => ("candleLight", "Linux Automation GmbH"),
        (0x1209, 0x2323) => ("CANable", "Openlight Labs"),
        (0x1CD2, 0x606F) => ("CANtact Pro", "Linklayer Labs"),
        (0x16D0, 0x10B8) => ("CANnectivity", "CANnectivity project"),
        _ => ("gs_usb device", "unknown"),
    }
}

// ============================================================================
// Adapter
// ============================================================================

/// One gs_usb channel bound to an open device
pub struct GsAdapter {
    io: DeviceIo,
    channel: u8,
    features: u32,
    fclock: u32,
    fd_active: bool,
    timestamps: bool,
    bitrate: Option<Bitrate>,
}

impl GsAdapter {
    /// Probe the device and bind to one of its channels
    pub fn new(io: DeviceIo, channel: u8) -> Result<Self> {
        // the device echoes frames in the byte order announced here
        io.control_out(
            BREQ_HOST_FORMAT,
            1,
            0,
            &HOST_FORMAT_MAGIC.to_le_bytes(),
            CONTROL_TIMEOUT,
        )?;

        let mut config = [0u8; 12];
        io.control_in(BREQ_DEVICE_CONFIG, 1, 0, &mut config, CONTROL_TIMEOUT)?;
        let icount = config[3];
        if channel as u32 > icount as u32 {
            return Err(CanError::IllegalParameter("channel not on this device"));
        }
        let sw_version = u32::from_le_bytes([config[4], config[5], config[6], config[7]]);
        debug!(
            "gs_usb device: {} channels, firmware {}",
            icount + 1,
            sw_version
        );

        // feature word and core clock from the timing limits block
        let mut bt_const = [0u8; 40];
        let (features, fclock) =
            match io.control_in(BREQ_BT_CONST_EXT, channel as u16, 0, &mut bt_const, CONTROL_TIMEOUT)
            {
                Ok(n) if n >= 8 => (
                    u32::from_le_bytes([bt_const[0], bt_const[1], bt_const[2], bt_const[3]]),
                    u32::from_le_bytes([bt_const[4], bt_const[5], bt_const[6], bt_const[7]]),
                ),
                _ => {
                    warn!("timing limits not readable, assuming a classic controller");
                    (0, crate::constants::TIMING_CLOCK_HZ)
                }
            };

        Ok(GsAdapter {
            io,
            channel,
            features,
            fclock,
            fd_active: false,
            timestamps: features & GS_CAN_FEATURE_HW_TIMESTAMP != 0,
            bitrate: None,
        })
    }

    /// Controller core clock in hertz
    pub fn clock_frequency(&self) -> u32 {
        self.fclock
    }

    fn send_timing(&self, request: u8, timing: &BitTiming) -> Result<()> {
        // the wire format splits tseg1 into prop_seg and phase_seg1
        let prop_seg: u32 = 1;
        let phase_seg1 = (timing.tseg1 as u32).saturating_sub(prop_seg);
        let mut buf = [0u8; 20];
        buf[0..4].copy_from_slice(&prop_seg.to_le_bytes());
        buf[4..8].copy_from_slice(&phase_seg1.to_le_bytes());
        buf[8..12].copy_from_slice(&(timing.tseg2 as u32).to_le_bytes());
        buf[12..16].copy_from_slice(&(timing.sjw as u32).to_le_bytes());
        buf[16..20].copy_from_slice(&(timing.brp as u32).to_le_bytes());
        self.io
            .control_out(request, self.channel as u16, 0, &buf, CONTROL_TIMEOUT)
    }

    fn send_mode(&self, mode: u32, flags: u32) -> Result<()> {
        let mut buf = [0u8; 8];
        buf[0..4].copy_from_slice(&mode.to_le_bytes());
        buf[4..8].copy_from_slice(&flags.to_le_bytes());
        self.io
            .control_out(BREQ_MODE, self.channel as u16, 0, &buf, CONTROL_TIMEOUT)
    }
}

impl CanAdapter for GsAdapter {
    fn capability(&self) -> Capability {
        Capability {
            fdoe: self.features & GS_CAN_FEATURE_FD != 0,
            brse: self.features & GS_CAN_FEATURE_FD != 0,
            mon: self.features & GS_CAN_FEATURE_LISTEN_ONLY != 0,
            err: true,
            one_shot: self.features & GS_CAN_FEATURE_ONE_SHOT != 0,
        }
    }

    fn set_bitrate(&mut self, bitrate: &Bitrate, fd: bool) -> Result<()> {
        // settings arrive on the converter's clock, the controller runs
        // on its own
        let nominal = rescale_timing(&bitrate.nominal, bitrate.frequency, self.fclock)?;
        self.send_timing(BREQ_BITTIMING, &nominal)?;
        if fd {
            let data = rescale_timing(&bitrate.data, bitrate.frequency, self.fclock)?;
            self.send_timing(BREQ_DATA_BITTIMING, &data)?;
        }
        self.bitrate = Some(*bitrate);
        Ok(())
    }

    fn bitrate(&self) -> Result<Bitrate> {
        self.bitrate.ok_or(CanError::InvalidBaudrate)
    }

    fn bus_on(&mut self, mode: u8) -> Result<()> {
        let mut flags = 0u32;
        if mode & MODE_MON != 0 {
            flags |= GS_CAN_MODE_LISTEN_ONLY;
        }
        if mode & MODE_FDOE != 0 {
            flags |= GS_CAN_MODE_FD;
        }
        if mode & MODE_NISO != 0 {
            // non-ISO frame format is not selectable on this protocol
            return Err(CanError::NotSupported);
        }
        if self.timestamps {
            flags |= GS_CAN_MODE_HW_TIMESTAMP;
        }
        self.fd_active = mode & MODE_FDOE != 0;
        self.send_mode(CAN_MODE_START, flags)
    }

    fn bus_off(&mut self) -> Result<()> {
        self.send_mode(CAN_MODE_RESET, 0)
    }

    fn transmit(&mut self, msg: &CanMessage, timeout: u16) -> Result<()> {
        let size = if self.fd_active {
            FRAME_SIZE_FD
        } else {
            FRAME_SIZE_CLASSIC
        };
        let mut buf = [0u8; FRAME_SIZE_FD];

        let mut can_id = msg.id & CAN_EFF_MASK;
        if msg.xtd {
            can_id |= CAN_EFF_FLAG;
        }
        if msg.rtr {
            can_id |= CAN_RTR_FLAG;
        }
        // echo id 0: the device echoes the frame back once it is on the bus
        buf[0..4].copy_from_slice(&0u32.to_le_bytes());
        buf[4..8].copy_from_slice(&can_id.to_le_bytes());
        buf[8] = msg.dlc;
        buf[9] = self.channel;
        if msg.fdf {
            buf[10] |= GS_CAN_FLAG_FD;
        }
        if msg.brs {
            buf[10] |= GS_CAN_FLAG_BRS;
        }
        let len = msg.len();
        buf[12..12 + len].copy_from_slice(&msg.data[..len]);

        let timeout = if timeout == crate::constants::TIMEOUT_INFINITE {
            Duration::ZERO
        } else {
            Duration::from_millis(timeout as u64)
        };
        match self.io.bulk_write(&buf[..size], timeout) {
            Ok(_) => Ok(()),
            Err(CanError::Timeout) => Err(CanError::TransmitterBusy),
            Err(err) => Err(err),
        }
    }

    fn bus_status(&self) -> Result<BusStatus> {
        if self.features & GS_CAN_FEATURE_GET_STATE == 0 {
            return Ok(BusStatus::default());
        }
        let mut buf = [0u8; 12];
        let n = self
            .io
            .control_in(BREQ_GET_STATE, self.channel as u16, 0, &mut buf, CONTROL_TIMEOUT)?;
        if n < 12 {
            return Ok(BusStatus::default());
        }
        let state = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]);
        let rx_errors = u32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]);
        let tx_errors = u32::from_le_bytes([buf[8], buf[9], buf[10], buf[11]]);
        Ok(BusStatus {
            bus_off: state == STATE_BUS_OFF,
            warning_level: state >= STATE_ERROR_WARNING,
            error_passive: state >= STATE_ERROR_PASSIVE,
            rx_errors: rx_errors.min(255) as u8,
            tx_errors: tx_errors.min(255) as u8,
        })
    }

    fn decoder(&self, fd: bool) -> Box<dyn FrameDecoder> {
        Box::new(GsDecoder {
            channel: self.channel,
            fd,
            timestamps: self.timestamps,
        })
    }

    fn device_name(&self) -> String {
        model_name(self.io.vendor_id, self.io.product_id).0.into()
    }

    fn vendor_name(&self) -> String {
        model_name(self.io.vendor_id, self.io.product_id).1.into()
    }
}

// ============================================================================
// Wire format decoder
// ============================================================================

/// Decoder for gs_usb host frames on the bulk IN endpoint
pub struct GsDecoder {
    channel: u8,
    fd: bool,
    timestamps: bool,
}

impl FrameDecoder for GsDecoder {
    fn frame_size(&self) -> usize {
        let base = if self.fd {
            FRAME_SIZE_FD
        } else {
            FRAME_SIZE_CLASSIC
        };
        if self.timestamps {
            base + TIMESTAMP_SIZE
        } else {
            base
        }
    }

    fn decode(&mut self, chunk: &[u8]) -> Option<CanMessage> {
        if chunk.len() < FRAME_SIZE_CLASSIC {
            return None;
        }
        let echo_id = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        if echo_id != RX_ECHO_ID {
            // transmit echo, already accounted for
            return None;
        }
        if chunk[9] != self.channel {
            return None;
        }
        let can_id = u32::from_le_bytes([chunk[4], chunk[5], chunk[6], chunk[7]]);
        let dlc = chunk[8] & 0x0F;
        let flags = chunk[10];

        let mut msg = CanMessage {
            id: can_id & CAN_EFF_MASK,
            xtd: can_id & CAN_EFF_FLAG != 0,
            rtr: can_id & CAN_RTR_FLAG != 0,
            fdf: flags & GS_CAN_FLAG_FD != 0,
            brs: flags & GS_CAN_FLAG_BRS != 0,
            esi: flags & GS_CAN_FLAG_ESI != 0,
            sts: can_id & CAN_ERR_FLAG != 0 || flags & GS_CAN_FLAG_OVERFLOW != 0,
            dlc,
            ..Default::default()
        };
        if !msg.xtd {
            msg.id &= crate::constants::CAN_MAX_STD_ID;
        }
        let len = dlc_to_len(dlc, msg.fdf).min(chunk.len().saturating_sub(12));
        msg.data[..len].copy_from_slice(&chunk[12..12 + len]);

        let base = if self.fd {
            FRAME_SIZE_FD
        } else {
            FRAME_SIZE_CLASSIC
        };
        if self.timestamps && chunk.len() >= base + TIMESTAMP_SIZE {
            msg.timestamp_us = u32::from_le_bytes([
                chunk[base],
                chunk[base + 1],
                chunk[base + 2],
                chunk[base + 3],
            ]) as u64;
        }
        Some(msg)
    }
}
