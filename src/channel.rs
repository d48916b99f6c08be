//! Channel state machine
//!
//! A `CanChannel` binds one adapter to a receive queue and drives it
//! through the stopped/started life cycle: bit-rate programming and
//! validation at start, the transmit validation ladder, blocking reads
//! from the queue and the composed status byte. The channel sees its
//! controller only through the adapter trait, so everything here runs
//! against a mock in tests.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::debug;

use crate::adapter::{CanAdapter, FrameDecoder};
use crate::bitrate::{bitrate_to_speed, validate_bitrate, Bitrate, BusSpeed};
use crate::constants::{
    CANFD_MAX_DLC, CAN_MAX_DLC, CAN_MAX_STD_ID, CAN_MAX_XTD_ID, MODE_BRSE, MODE_ERR, MODE_FDOE,
    MODE_MON, MODE_NRTR, MODE_NXTD, STAT_BERR, STAT_BOFF, STAT_EWRN, STAT_MSG_LST, STAT_QUE_OVR,
    STAT_RESET, STAT_RX_EMPTY, STAT_TX_BUSY,
};
use crate::error::{CanError, Result};
use crate::frame::CanMessage;
use crate::pipe::AsyncPipe;
use crate::queue::MessageQueue;

/// Capacity of the per-channel receive queue
const RECEIVE_QUEUE_SIZE: usize = 65536;

/// Message counters of one channel
#[derive(Debug, Clone, Copy, Default)]
pub struct Counters {
    /// Messages accepted for transmission
    pub tx: u64,
    /// Messages delivered into the receive queue
    pub rx: u64,
    /// Error frames seen on the bus
    pub err: u64,
}

/// One initialized CAN channel
pub struct CanChannel {
    adapter: Box<dyn CanAdapter>,
    mode: u8,
    running: bool,
    queue: Arc<MessageQueue<CanMessage>>,
    pipe: Option<AsyncPipe>,
    bitrate: Option<Bitrate>,
    tx_count: u64,
    rx_count: u64,
    err_count: u64,
    msg_lost: Arc<AtomicBool>,
    tx_busy: bool,
    rx_empty: bool,
}

impl CanChannel {
    /// Initialize a channel in the given operation mode
    ///
    /// Mode flags the controller cannot provide are rejected here, the
    /// controller stays stopped.
    pub fn new(adapter: Box<dyn CanAdapter>, mode: u8) -> Result<Self> {
        let cap = adapter.capability();
        if mode & MODE_FDOE != 0 && !cap.fdoe {
            return Err(CanError::NotSupported);
        }
        if mode & MODE_BRSE != 0 && !cap.brse {
            return Err(CanError::NotSupported);
        }
        if mode & MODE_MON != 0 && !cap.mon {
            return Err(CanError::NotSupported);
        }
        if mode & MODE_ERR != 0 && !cap.err {
            return Err(CanError::NotSupported);
        }
        Ok(CanChannel {
            adapter,
            mode,
            running: false,
            queue: Arc::new(MessageQueue::new(RECEIVE_QUEUE_SIZE)),
            pipe: None,
            bitrate: None,
            tx_count: 0,
            rx_count: 0,
            err_count: 0,
            msg_lost: Arc::new(AtomicBool::new(false)),
            tx_busy: false,
            rx_empty: false,
        })
    }

    /// Operation mode this channel was initialized with
    pub fn mode(&self) -> u8 {
        self.mode
    }

    /// Capabilities of the controller as an operation-mode byte
    pub fn op_capability(&self) -> u8 {
        let cap = self.adapter.capability();
        let mut bits = 0u8;
        if cap.fdoe {
            bits |= MODE_FDOE;
        }
        if cap.brse {
            bits |= MODE_BRSE;
        }
        if cap.mon {
            bits |= MODE_MON;
        }
        if cap.err {
            bits |= MODE_ERR;
        }
        bits
    }

    /// Build the reception sink wired into the pipe handler
    ///
    /// The decoder's frame layout follows the requested mode, so a sink
    /// built at initialization time already parses FD frames correctly.
    pub fn sink(&self) -> ChannelSink {
        ChannelSink {
            queue: Arc::clone(&self.queue),
            decoder: self.adapter.decoder(self.mode & MODE_FDOE != 0),
            mode: self.mode,
            msg_lost: Arc::clone(&self.msg_lost),
        }
    }

    /// Attach the started reception pipe
    pub fn attach_pipe(&mut self, pipe: AsyncPipe) {
        self.pipe = Some(pipe);
    }

    /// Program the bit rate and start the controller
    ///
    /// A second start without a reset in between fails with the
    /// controller untouched.
    pub fn start(&mut self, bitrate: &Bitrate) -> Result<()> {
        if self.running {
            return Err(CanError::ControllerOnline);
        }
        if self.mode & MODE_BRSE != 0 && self.mode & MODE_FDOE == 0 {
            return Err(CanError::IllegalParameter(
                "bit-rate switching requires FD operation",
            ));
        }
        let fd = self.mode & MODE_FDOE != 0;
        validate_bitrate(bitrate, fd)?;
        self.adapter.set_bitrate(bitrate, fd)?;
        self.adapter.bus_on(self.mode)?;

        self.queue.reset();
        self.tx_count = 0;
        self.rx_count = 0;
        self.err_count = 0;
        self.msg_lost.store(false, Ordering::Release);
        self.tx_busy = false;
        self.rx_empty = false;
        self.bitrate = Some(*bitrate);
        self.running = true;
        debug!("channel started in mode {:#04x}", self.mode);
        Ok(())
    }

    /// Stop the controller
    ///
    /// Resetting a stopped controller is a no-op.
    pub fn reset(&mut self) -> Result<()> {
        if !self.running {
            return Ok(());
        }
        self.adapter.bus_off()?;
        self.running = false;
        Ok(())
    }

    /// Queue one message for transmission
    pub fn write(&mut self, msg: &CanMessage, timeout: u16) -> Result<()> {
        if !self.running {
            return Err(CanError::ControllerOffline);
        }
        self.validate_outgoing(msg)?;
        match self.adapter.transmit(msg, timeout) {
            Ok(()) => {
                self.tx_busy = false;
                self.tx_count += 1;
                Ok(())
            }
            Err(CanError::TransmitterBusy) => {
                self.tx_busy = true;
                Err(CanError::TransmitterBusy)
            }
            Err(err) => Err(err),
        }
    }

    fn validate_outgoing(&self, msg: &CanMessage) -> Result<()> {
        let max_id = if msg.xtd {
            CAN_MAX_XTD_ID
        } else {
            CAN_MAX_STD_ID
        };
        if msg.id > max_id {
            return Err(CanError::IllegalParameter("identifier out of range"));
        }
        if msg.xtd && self.mode & MODE_NXTD != 0 {
            return Err(CanError::IllegalParameter(
                "extended frames suppressed in this mode",
            ));
        }
        if msg.rtr && self.mode & MODE_NRTR != 0 {
            return Err(CanError::IllegalParameter(
                "remote frames suppressed in this mode",
            ));
        }
        if msg.fdf && self.mode & MODE_FDOE == 0 {
            return Err(CanError::IllegalParameter("FD frame in classic operation"));
        }
        if msg.brs && self.mode & MODE_BRSE == 0 {
            return Err(CanError::IllegalParameter("bit-rate switching not enabled"));
        }
        if msg.brs && !msg.fdf {
            return Err(CanError::IllegalParameter(
                "bit-rate switching on a classic frame",
            ));
        }
        if msg.sts {
            return Err(CanError::IllegalParameter("status frames cannot be sent"));
        }
        let max_dlc = if msg.fdf { CANFD_MAX_DLC } else { CAN_MAX_DLC };
        if msg.dlc > max_dlc {
            return Err(CanError::IllegalParameter("data length code out of range"));
        }
        Ok(())
    }

    /// Take the oldest received message, blocking up to `timeout` ms
    pub fn read(&mut self, timeout: u16) -> Result<CanMessage> {
        if !self.running {
            return Err(CanError::ControllerOffline);
        }
        match self.queue.dequeue(timeout) {
            Ok(msg) => {
                self.rx_empty = false;
                if msg.sts {
                    self.err_count += 1;
                } else {
                    self.rx_count += 1;
                }
                Ok(msg)
            }
            Err(CanError::ReceiverEmpty) => {
                self.rx_empty = true;
                Err(CanError::ReceiverEmpty)
            }
            Err(err) => Err(err),
        }
    }

    /// Wake a reader blocked in `read` without delivering a message
    pub fn signal(&self) {
        self.queue.signal();
    }

    /// Composed status byte of this channel
    pub fn status(&mut self) -> Result<u8> {
        let mut status = 0u8;
        if !self.running {
            status |= STAT_RESET;
        } else {
            let bus = self.adapter.bus_status()?;
            if bus.bus_off {
                status |= STAT_BOFF;
            }
            if bus.warning_level {
                status |= STAT_EWRN;
            }
            if bus.error_passive {
                status |= STAT_BERR;
            }
        }
        if self.tx_busy {
            status |= STAT_TX_BUSY;
        }
        if self.rx_empty && self.queue.is_empty() {
            status |= STAT_RX_EMPTY;
        }
        if self.msg_lost.swap(false, Ordering::AcqRel) {
            status |= STAT_MSG_LST;
        }
        if self.queue.take_overflow() {
            status |= STAT_QUE_OVR;
        }
        Ok(status)
    }

    /// Bus load in percent, if the controller measures it
    pub fn bus_load(&self) -> Result<Option<f64>> {
        if !self.running {
            return Ok(Some(0.0));
        }
        self.adapter.bus_load()
    }

    /// Bit-rate settings the controller was last started with
    pub fn bitrate(&self) -> Result<Bitrate> {
        self.bitrate.ok_or(CanError::ControllerOffline)
    }

    /// Transmission speed derived from the active bit rate
    pub fn speed(&self) -> Result<BusSpeed> {
        let fdoe = self.mode & MODE_FDOE != 0;
        let brse = self.mode & MODE_BRSE != 0;
        Ok(bitrate_to_speed(&self.bitrate()?, fdoe, brse))
    }

    /// Message counters since the last start
    pub fn counters(&self) -> Counters {
        Counters {
            tx: self.tx_count,
            rx: self.rx_count,
            err: self.err_count,
        }
    }

    /// True while the controller is started
    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Short device type name of the underlying adapter
    pub fn device_name(&self) -> String {
        self.adapter.device_name()
    }

    /// Vendor name of the underlying adapter
    pub fn vendor_name(&self) -> String {
        self.adapter.vendor_name()
    }

    /// Stop the controller, drain the pipe and release the adapter
    pub fn teardown(mut self) {
        let _ = self.reset();
        if let Some(mut pipe) = self.pipe.take() {
            pipe.abort();
        }
        self.queue.signal();
    }
}

// ============================================================================
// Reception sink
// ============================================================================

/// Decodes completed bulk transfers into the receive queue
///
/// Runs inside the pipe handler on the pipe thread.
pub struct ChannelSink {
    queue: Arc<MessageQueue<CanMessage>>,
    decoder: Box<dyn FrameDecoder>,
    mode: u8,
    msg_lost: Arc<AtomicBool>,
}

impl ChannelSink {
    /// Split a completed transfer into wire frames and queue the messages
    pub fn ingest(&mut self, data: &[u8]) {
        let frame_size = self.decoder.frame_size();
        for chunk in data.chunks_exact(frame_size) {
            let msg = match self.decoder.decode(chunk) {
                Some(msg) => msg,
                None => continue,
            };
            // status frames reach the application only on request
            if msg.sts && self.mode & MODE_ERR == 0 {
                continue;
            }
            if msg.xtd && self.mode & MODE_NXTD != 0 {
                continue;
            }
            if msg.rtr && self.mode & MODE_NRTR != 0 {
                continue;
            }
            if self.queue.enqueue(msg).is_err() {
                self.msg_lost.store(true, Ordering::Release);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::{BusStatus, Capability};
    use crate::bitrate::{index_to_bitrate, BitTiming};
    use crate::constants::MODE_DEFAULT;
    use crossbeam_channel::{unbounded, Receiver, Sender};

    // test wire format: id, flags, dlc, pad, then 8 or 64 data bytes
    const MOCK_FRAME_SIZE: usize = 16;
    const MOCK_FRAME_SIZE_FD: usize = 72;

    fn encode_mock(msg: &CanMessage) -> Vec<u8> {
        let size = if msg.fdf {
            MOCK_FRAME_SIZE_FD
        } else {
            MOCK_FRAME_SIZE
        };
        let mut buf = vec![0u8; size];
        buf[0..4].copy_from_slice(&msg.id.to_le_bytes());
        buf[4] = (msg.xtd as u8)
            | (msg.rtr as u8) << 1
            | (msg.sts as u8) << 2
            | (msg.fdf as u8) << 3;
        buf[5] = msg.dlc;
        buf[8..8 + msg.len()].copy_from_slice(msg.payload());
        buf
    }

    struct MockDecoder {
        fd: bool,
    }

    impl FrameDecoder for MockDecoder {
        fn frame_size(&self) -> usize {
            if self.fd {
                MOCK_FRAME_SIZE_FD
            } else {
                MOCK_FRAME_SIZE
            }
        }

        fn decode(&mut self, chunk: &[u8]) -> Option<CanMessage> {
            let mut msg = CanMessage {
                id: u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]),
                xtd: chunk[4] & 1 != 0,
                rtr: chunk[4] & 2 != 0,
                sts: chunk[4] & 4 != 0,
                fdf: chunk[4] & 8 != 0,
                dlc: chunk[5],
                ..Default::default()
            };
            let len = msg.len();
            msg.data[..len].copy_from_slice(&chunk[8..8 + len]);
            Some(msg)
        }
    }

    struct MockAdapter {
        cap: Capability,
        on_bus: bool,
        bitrate_set: Option<Bitrate>,
        busy: bool,
        wire: Option<Sender<Vec<u8>>>,
    }

    impl MockAdapter {
        fn classic() -> Self {
            MockAdapter {
                cap: Capability {
                    fdoe: false,
                    brse: false,
                    mon: true,
                    err: true,
                    one_shot: false,
                },
                on_bus: false,
                bitrate_set: None,
                busy: false,
                wire: None,
            }
        }

        fn fd() -> Self {
            MockAdapter {
                cap: Capability {
                    fdoe: true,
                    brse: true,
                    mon: true,
                    err: true,
                    one_shot: false,
                },
                ..Self::classic()
            }
        }
    }

    impl CanAdapter for MockAdapter {
        fn capability(&self) -> Capability {
            self.cap
        }

        fn set_bitrate(&mut self, bitrate: &Bitrate, _fd: bool) -> Result<()> {
            self.bitrate_set = Some(*bitrate);
            Ok(())
        }

        fn bitrate(&self) -> Result<Bitrate> {
            self.bitrate_set.ok_or(CanError::InvalidBaudrate)
        }

        fn bus_on(&mut self, _mode: u8) -> Result<()> {
            self.on_bus = true;
            Ok(())
        }

        fn bus_off(&mut self) -> Result<()> {
            self.on_bus = false;
            Ok(())
        }

        fn transmit(&mut self, msg: &CanMessage, _timeout: u16) -> Result<()> {
            if self.busy {
                return Err(CanError::TransmitterBusy);
            }
            if let Some(wire) = &self.wire {
                wire.send(encode_mock(msg)).map_err(|_| CanError::Fatal)?;
            }
            Ok(())
        }

        fn bus_status(&self) -> Result<BusStatus> {
            Ok(BusStatus::default())
        }

        fn decoder(&self, fd: bool) -> Box<dyn FrameDecoder> {
            Box::new(MockDecoder { fd })
        }

        fn device_name(&self) -> String {
            "mock".into()
        }

        fn vendor_name(&self) -> String {
            "mock vendor".into()
        }
    }

    fn started_channel(adapter: MockAdapter, mode: u8) -> CanChannel {
        let mut channel = CanChannel::new(Box::new(adapter), mode).unwrap();
        channel.start(&index_to_bitrate(-2).unwrap()).unwrap();
        channel
    }

    #[test]
    fn test_unsupported_mode_rejected_at_init() {
        assert!(matches!(
            CanChannel::new(Box::new(MockAdapter::classic()), MODE_FDOE),
            Err(CanError::NotSupported)
        ));
    }

    #[test]
    fn test_start_twice_fails_without_side_effects() {
        let mut channel = started_channel(MockAdapter::classic(), MODE_DEFAULT);
        assert!(matches!(
            channel.start(&index_to_bitrate(0).unwrap()),
            Err(CanError::ControllerOnline)
        ));
        // the active bit rate is still the first one
        assert_eq!(channel.bitrate().unwrap(), index_to_bitrate(-2).unwrap());
    }

    #[test]
    fn test_reset_when_stopped_is_noop() {
        let mut channel = CanChannel::new(Box::new(MockAdapter::classic()), MODE_DEFAULT).unwrap();
        assert!(channel.reset().is_ok());
        assert!(!channel.is_running());
    }

    #[test]
    fn test_start_after_reset() {
        let mut channel = started_channel(MockAdapter::classic(), MODE_DEFAULT);
        channel.reset().unwrap();
        assert!(channel.start(&index_to_bitrate(0).unwrap()).is_ok());
    }

    #[test]
    fn test_io_before_start_is_offline() {
        let mut channel = CanChannel::new(Box::new(MockAdapter::classic()), MODE_DEFAULT).unwrap();
        let msg = CanMessage::new(0x100, &[1, 2]);
        assert!(matches!(
            channel.write(&msg, 0),
            Err(CanError::ControllerOffline)
        ));
        assert!(matches!(channel.read(0), Err(CanError::ControllerOffline)));
    }

    #[test]
    fn test_invalid_bitrate_leaves_channel_stopped() {
        let mut channel = CanChannel::new(Box::new(MockAdapter::classic()), MODE_DEFAULT).unwrap();
        let mut bitrate = index_to_bitrate(0).unwrap();
        bitrate.nominal.brp = 0;
        assert!(matches!(
            channel.start(&bitrate),
            Err(CanError::InvalidBaudrate)
        ));
        assert!(!channel.is_running());
    }

    #[test]
    fn test_brse_without_fdoe_rejected_at_start() {
        let mut channel = CanChannel::new(Box::new(MockAdapter::fd()), MODE_BRSE).unwrap();
        assert!(matches!(
            channel.start(&index_to_bitrate(0).unwrap()),
            Err(CanError::IllegalParameter(_))
        ));
        assert!(!channel.is_running());
    }

    #[test]
    fn test_fd_start_validates_data_phase() {
        let mut channel =
            CanChannel::new(Box::new(MockAdapter::fd()), MODE_FDOE | MODE_BRSE).unwrap();
        // nominal only, data phase all zeros
        assert!(matches!(
            channel.start(&index_to_bitrate(0).unwrap()),
            Err(CanError::InvalidBaudrate)
        ));
        let mut bitrate = index_to_bitrate(0).unwrap();
        bitrate.data = BitTiming {
            brp: 1,
            tseg1: 15,
            tseg2: 4,
            sjw: 4,
            sam: 0,
        };
        assert!(channel.start(&bitrate).is_ok());
    }

    #[test]
    fn test_write_validation_ladder() {
        let mut channel = started_channel(MockAdapter::classic(), MODE_DEFAULT);

        let mut msg = CanMessage::new(0x800, &[]);
        assert!(matches!(
            channel.write(&msg, 0),
            Err(CanError::IllegalParameter(_))
        ));

        msg = CanMessage::new(0x100, &[]);
        msg.fdf = true;
        assert!(matches!(
            channel.write(&msg, 0),
            Err(CanError::IllegalParameter(_))
        ));

        msg.fdf = false;
        msg.sts = true;
        assert!(matches!(
            channel.write(&msg, 0),
            Err(CanError::IllegalParameter(_))
        ));

        msg.sts = false;
        msg.dlc = 9;
        assert!(matches!(
            channel.write(&msg, 0),
            Err(CanError::IllegalParameter(_))
        ));
    }

    #[test]
    fn test_write_suppressed_formats() {
        let mut channel = started_channel(MockAdapter::classic(), MODE_NXTD | MODE_NRTR);
        let mut msg = CanMessage::new(0x1000, &[]);
        msg.xtd = true;
        assert!(matches!(
            channel.write(&msg, 0),
            Err(CanError::IllegalParameter(_))
        ));
        msg.xtd = false;
        msg.id = 0x100;
        msg.rtr = true;
        assert!(matches!(
            channel.write(&msg, 0),
            Err(CanError::IllegalParameter(_))
        ));
    }

    #[test]
    fn test_brs_requires_fdf() {
        let mut channel =
            CanChannel::new(Box::new(MockAdapter::fd()), MODE_FDOE | MODE_BRSE).unwrap();
        let mut bitrate = index_to_bitrate(0).unwrap();
        bitrate.data = BitTiming {
            brp: 1,
            tseg1: 15,
            tseg2: 4,
            sjw: 4,
            sam: 0,
        };
        channel.start(&bitrate).unwrap();
        let mut msg = CanMessage::new(0x100, &[]);
        msg.brs = true;
        assert!(matches!(
            channel.write(&msg, 0),
            Err(CanError::IllegalParameter(_))
        ));
    }

    #[test]
    fn test_transmitter_busy_sets_status_bit() {
        let mut adapter = MockAdapter::classic();
        adapter.busy = true;
        let mut channel = started_channel(adapter, MODE_DEFAULT);
        let msg = CanMessage::new(0x100, &[1]);
        assert!(matches!(
            channel.write(&msg, 0),
            Err(CanError::TransmitterBusy)
        ));
        assert_ne!(channel.status().unwrap() & STAT_TX_BUSY, 0);
    }

    #[test]
    fn test_status_reset_bit_follows_state() {
        let mut channel = CanChannel::new(Box::new(MockAdapter::classic()), MODE_DEFAULT).unwrap();
        assert_ne!(channel.status().unwrap() & STAT_RESET, 0);
        channel.start(&index_to_bitrate(0).unwrap()).unwrap();
        assert_eq!(channel.status().unwrap() & STAT_RESET, 0);
    }

    #[test]
    fn test_read_empty_sets_status_bit() {
        let mut channel = started_channel(MockAdapter::classic(), MODE_DEFAULT);
        assert!(matches!(channel.read(0), Err(CanError::ReceiverEmpty)));
        assert_ne!(channel.status().unwrap() & STAT_RX_EMPTY, 0);
    }

    // the sink is built at channel initialization, before the first
    // start; an FD channel must already parse full-length frames then
    #[test]
    fn test_fd_payload_survives_init_time_sink() {
        let mut channel = CanChannel::new(Box::new(MockAdapter::fd()), MODE_FDOE).unwrap();
        let mut sink = channel.sink();
        let mut bitrate = index_to_bitrate(0).unwrap();
        bitrate.data = BitTiming {
            brp: 1,
            tseg1: 15,
            tseg2: 4,
            sjw: 4,
            sam: 0,
        };
        channel.start(&bitrate).unwrap();

        let mut msg = CanMessage {
            id: 0x222,
            fdf: true,
            dlc: 15,
            ..Default::default()
        };
        for (i, byte) in msg.data.iter_mut().enumerate() {
            *byte = i as u8;
        }
        sink.ingest(&encode_mock(&msg));

        let read = channel.read(0).unwrap();
        assert!(read.fdf);
        assert_eq!(read.len(), 64);
        assert_eq!(&read.data[..], &msg.data[..]);
    }

    #[test]
    fn test_sink_filters_error_frames() {
        let mut channel = started_channel(MockAdapter::classic(), MODE_DEFAULT);
        let mut sink = channel.sink();
        let mut msg = CanMessage::new(0x20, &[0; 8]);
        msg.sts = true;
        sink.ingest(&encode_mock(&msg));
        // not delivered in the default mode
        assert!(matches!(channel.read(0), Err(CanError::ReceiverEmpty)));
        assert_eq!(channel.counters().err, 0);
    }

    #[test]
    fn test_sink_delivers_error_frames_on_request() {
        let mut channel = started_channel(MockAdapter::classic(), MODE_ERR);
        let mut sink = channel.sink();
        let mut msg = CanMessage::new(0x20, &[0; 8]);
        msg.sts = true;
        sink.ingest(&encode_mock(&msg));
        let read = channel.read(0).unwrap();
        assert!(read.sts);
        // status frames go to the error counter, not the receive counter
        assert_eq!(channel.counters().err, 1);
        assert_eq!(channel.counters().rx, 0);
    }

    // two channels wired back to back: everything one transmits arrives
    // at the other in order
    #[test]
    fn test_loopback_in_order() {
        let (tx_wire, rx_wire): (Sender<Vec<u8>>, Receiver<Vec<u8>>) = unbounded();
        let mut sender = MockAdapter::classic();
        sender.wire = Some(tx_wire);
        let mut sender = started_channel(sender, MODE_DEFAULT);
        let mut receiver = started_channel(MockAdapter::classic(), MODE_DEFAULT);
        let mut sink = receiver.sink();

        for seq in 0..8u8 {
            let msg = CanMessage::new(0x100 + seq as u32, &[seq, 0xAA]);
            sender.write(&msg, 0).unwrap();
        }
        for bytes in rx_wire.try_iter() {
            sink.ingest(&bytes);
        }

        for seq in 0..8u8 {
            let msg = receiver.read(0).unwrap();
            assert_eq!(msg.id, 0x100 + seq as u32);
            assert_eq!(msg.payload(), &[seq, 0xAA]);
        }
        assert_eq!(sender.counters().tx, 8);
        assert_eq!(receiver.counters().rx, 8);
    }

    #[test]
    fn test_counters_reset_on_start() {
        let mut channel = started_channel(MockAdapter::classic(), MODE_DEFAULT);
        channel.write(&CanMessage::new(0x1, &[]), 0).unwrap();
        assert_eq!(channel.counters().tx, 1);
        channel.reset().unwrap();
        channel.start(&index_to_bitrate(0).unwrap()).unwrap();
        assert_eq!(channel.counters().tx, 0);
    }
}
