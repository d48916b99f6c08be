//! Bit-rate and bit-timing conversions
//!
//! The driver speaks bit-rate in four interchangeable representations:
//! predefined CiA index, timing quadruple, key=value string and SJA1000
//! BTR0/BTR1 register pair. This module converts between them and
//! derives the transmission speed and sample point. Range validation
//! happens only when a controller is started, not during conversion.

use crate::constants::TIMING_CLOCK_HZ;
use crate::error::{CanError, Result};

// ============================================================================
// Timing types
// ============================================================================

/// Bit-timing quadruple of one phase (nominal or data)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BitTiming {
    /// Bit-rate prescaler
    pub brp: u16,
    /// Time segment 1 (before the sample point)
    pub tseg1: u16,
    /// Time segment 2 (after the sample point)
    pub tseg2: u16,
    /// Synchronization jump width
    pub sjw: u16,
    /// Number of samples (0 = one sample, 1 = three samples)
    pub sam: u8,
}

impl Default for BitTiming {
    fn default() -> Self {
        BitTiming {
            brp: 0,
            tseg1: 0,
            tseg2: 0,
            sjw: 0,
            sam: 0,
        }
    }
}

/// Complete bit-rate settings: clock frequency plus nominal and data phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bitrate {
    /// Controller clock frequency in hertz
    pub frequency: u32,
    /// Nominal phase timing (arbitration)
    pub nominal: BitTiming,
    /// Data phase timing (FD bit-rate switching)
    pub data: BitTiming,
}

impl Default for Bitrate {
    fn default() -> Self {
        Bitrate {
            frequency: 0,
            nominal: BitTiming::default(),
            data: BitTiming::default(),
        }
    }
}

/// Transmission speed of one phase, derived from the timing settings
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PhaseSpeed {
    /// Bit rate in bits per second
    pub speed_bps: f64,
    /// Sample point as a fraction of the bit time
    pub sample_point: f64,
}

/// Transmission speed of both phases
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BusSpeed {
    /// Nominal phase speed
    pub nominal: PhaseSpeed,
    /// Data phase speed (meaningful with bit-rate switching)
    pub data: PhaseSpeed,
}

// ============================================================================
// Timing limits
// ============================================================================

/// Nominal phase limits of a CAN FD capable controller
const NOM_BRP_MAX: u16 = 1024;
const NOM_TSEG1_MAX: u16 = 256;
const NOM_TSEG2_MAX: u16 = 128;
const NOM_SJW_MAX: u16 = 128;

/// Data phase limits of a CAN FD capable controller
const DATA_BRP_MAX: u16 = 1024;
const DATA_TSEG1_MAX: u16 = 32;
const DATA_TSEG2_MAX: u16 = 16;
const DATA_SJW_MAX: u16 = 16;

// ============================================================================
// Predefined index table
// ============================================================================

/// Map a predefined bit-rate index (0 or a negative CiA index) to its
/// timing settings at the default 8 MHz timing clock
///
/// Index 0 selects 1 Mbit/s, each step down halves roughly to 10 kbit/s
/// at index -8 and 5 kbit/s at index -9.
pub fn index_to_bitrate(index: i32) -> Result<Bitrate> {
    let (brp, tseg1, tseg2, sjw) = match index {
        0 => (1, 5, 2, 1),    // 1000 kbit/s
        -1 => (1, 7, 2, 1),   // 800 kbit/s
        -2 => (2, 5, 2, 1),   // 500 kbit/s
        -3 => (4, 5, 2, 1),   // 250 kbit/s
        -4 => (4, 11, 4, 1),  // 125 kbit/s
        -5 => (5, 11, 4, 1),  // 100 kbit/s
        -6 => (10, 11, 4, 1), // 50 kbit/s
        -7 => (25, 11, 4, 1), // 20 kbit/s
        -8 => (50, 11, 4, 1), // 10 kbit/s
        -9 => (100, 11, 4, 1), // 5 kbit/s
        _ => return Err(CanError::InvalidBaudrate),
    };
    Ok(Bitrate {
        frequency: TIMING_CLOCK_HZ,
        nominal: BitTiming {
            brp,
            tseg1,
            tseg2,
            sjw,
            sam: 0,
        },
        data: BitTiming::default(),
    })
}

// ============================================================================
// String representation
// ============================================================================

/// Parse a comma-separated `key=value` bit-rate string
///
/// Recognized keys: `f_clock`, `f_clock_mhz`, `nom_brp`, `nom_tseg1`,
/// `nom_tseg2`, `nom_sjw`, `nom_sam`, `data_brp`, `data_tseg1`,
/// `data_tseg2`, `data_sjw`. No range checks happen here. Returns the
/// settings plus whether any data-phase key or the `nom_sam` key was
/// present, so callers can tell defaults from explicit zeros.
pub fn string_to_bitrate(s: &str) -> Result<(Bitrate, bool, bool)> {
    let mut bitrate = Bitrate::default();
    let mut data_given = false;
    let mut sam_given = false;

    for field in s.split(',') {
        let field = field.trim();
        if field.is_empty() {
            continue;
        }
        let (key, value) = field
            .split_once('=')
            .ok_or(CanError::IllegalParameter("malformed bit-rate string"))?;
        let key = key.trim();
        let value: u32 = value
            .trim()
            .parse()
            .map_err(|_| CanError::IllegalParameter("malformed bit-rate value"))?;

        match key {
            "f_clock" => bitrate.frequency = value,
            "f_clock_mhz" => bitrate.frequency = value.saturating_mul(1_000_000),
            "nom_brp" => bitrate.nominal.brp = value as u16,
            "nom_tseg1" => bitrate.nominal.tseg1 = value as u16,
            "nom_tseg2" => bitrate.nominal.tseg2 = value as u16,
            "nom_sjw" => bitrate.nominal.sjw = value as u16,
            "nom_sam" => {
                bitrate.nominal.sam = value as u8;
                sam_given = true;
            }
            "data_brp" => {
                bitrate.data.brp = value as u16;
                data_given = true;
            }
            "data_tseg1" => {
                bitrate.data.tseg1 = value as u16;
                data_given = true;
            }
            "data_tseg2" => {
                bitrate.data.tseg2 = value as u16;
                data_given = true;
            }
            "data_sjw" => {
                bitrate.data.sjw = value as u16;
                data_given = true;
            }
            _ => return Err(CanError::IllegalParameter("unknown bit-rate key")),
        }
    }
    Ok((bitrate, data_given, sam_given))
}

/// Render bit-rate settings as a `key=value` string
///
/// Data-phase keys are emitted only when requested, `nom_sam` only when
/// it was explicitly set.
pub fn bitrate_to_string(bitrate: &Bitrate, with_data: bool, with_sam: bool) -> String {
    let mut s = format!(
        "f_clock={},nom_brp={},nom_tseg1={},nom_tseg2={},nom_sjw={}",
        bitrate.frequency,
        bitrate.nominal.brp,
        bitrate.nominal.tseg1,
        bitrate.nominal.tseg2,
        bitrate.nominal.sjw
    );
    if with_sam {
        s.push_str(&format!(",nom_sam={}", bitrate.nominal.sam));
    }
    if with_data {
        s.push_str(&format!(
            ",data_brp={},data_tseg1={},data_tseg2={},data_sjw={}",
            bitrate.data.brp, bitrate.data.tseg1, bitrate.data.tseg2, bitrate.data.sjw
        ));
    }
    s
}

// ============================================================================
// Speed calculation
// ============================================================================

fn phase_speed(frequency: u32, timing: &BitTiming) -> PhaseSpeed {
    // a zero prescaler yields an infinite speed rather than an error,
    // callers see the nonsensical settings instead of a failed query
    let tq = 1 + timing.tseg1 as u64 + timing.tseg2 as u64;
    let divisor = timing.brp as u64 * tq;
    let speed_bps = if divisor == 0 {
        f64::INFINITY
    } else {
        frequency as f64 / divisor as f64
    };
    let sample_point = if tq == 0 {
        0.0
    } else {
        (1 + timing.tseg1 as u64) as f64 / tq as f64
    };
    PhaseSpeed {
        speed_bps,
        sample_point,
    }
}

/// Derive the transmission speed and sample point of both phases
///
/// The data phase rate is meaningful only with FD operation and
/// bit-rate switching both enabled; otherwise it mirrors the nominal
/// phase.
pub fn bitrate_to_speed(bitrate: &Bitrate, fdoe: bool, brse: bool) -> BusSpeed {
    let nominal = phase_speed(bitrate.frequency, &bitrate.nominal);
    let data = if fdoe && brse {
        phase_speed(bitrate.frequency, &bitrate.data)
    } else {
        nominal
    };
    BusSpeed { nominal, data }
}

// ============================================================================
// SJA1000 register pair
// ============================================================================

/// Pack nominal timing into the SJA1000 BTR0/BTR1 register pair
///
/// The register layout fixes the timing clock at 8 MHz and narrows the
/// ranges to brp 1..=64, tseg1 1..=16, tseg2 1..=8 and sjw 1..=4.
pub fn bitrate_to_btr0btr1(bitrate: &Bitrate) -> Result<u16> {
    let t = &bitrate.nominal;
    if bitrate.frequency != TIMING_CLOCK_HZ {
        return Err(CanError::InvalidBaudrate);
    }
    if t.brp < 1 || t.brp > 64 || t.tseg1 < 1 || t.tseg1 > 16 {
        return Err(CanError::InvalidBaudrate);
    }
    if t.tseg2 < 1 || t.tseg2 > 8 || t.sjw < 1 || t.sjw > 4 || t.sam > 1 {
        return Err(CanError::InvalidBaudrate);
    }
    let btr0 = ((t.sjw - 1) as u16) << 6 | (t.brp - 1) as u16;
    let btr1 = (t.sam as u16) << 7 | ((t.tseg2 - 1) as u16) << 4 | (t.tseg1 - 1) as u16;
    Ok(btr0 << 8 | btr1)
}

/// Unpack an SJA1000 BTR0/BTR1 register pair into bit-rate settings
pub fn btr0btr1_to_bitrate(btr0btr1: u16) -> Bitrate {
    let btr0 = (btr0btr1 >> 8) as u8;
    let btr1 = (btr0btr1 & 0xFF) as u8;
    Bitrate {
        frequency: TIMING_CLOCK_HZ,
        nominal: BitTiming {
            brp: (btr0 & 0x3F) as u16 + 1,
            tseg1: (btr1 & 0x0F) as u16 + 1,
            tseg2: ((btr1 >> 4) & 0x07) as u16 + 1,
            sjw: ((btr0 >> 6) & 0x03) as u16 + 1,
            sam: (btr1 >> 7) & 0x01,
        },
        data: BitTiming::default(),
    }
}

// ============================================================================
// Validation
// ============================================================================

fn check_range(value: u16, max: u16) -> Result<()> {
    if value < 1 || value > max {
        return Err(CanError::InvalidBaudrate);
    }
    Ok(())
}

/// Validate bit-rate settings against the controller limits
///
/// The data phase is checked only when FD operation is requested.
pub fn validate_bitrate(bitrate: &Bitrate, fd: bool) -> Result<()> {
    if bitrate.frequency == 0 {
        return Err(CanError::InvalidBaudrate);
    }
    check_range(bitrate.nominal.brp, NOM_BRP_MAX)?;
    check_range(bitrate.nominal.tseg1, NOM_TSEG1_MAX)?;
    check_range(bitrate.nominal.tseg2, NOM_TSEG2_MAX)?;
    check_range(bitrate.nominal.sjw, NOM_SJW_MAX)?;
    if bitrate.nominal.sam > 1 {
        return Err(CanError::InvalidBaudrate);
    }
    if fd {
        check_range(bitrate.data.brp, DATA_BRP_MAX)?;
        check_range(bitrate.data.tseg1, DATA_TSEG1_MAX)?;
        check_range(bitrate.data.tseg2, DATA_TSEG2_MAX)?;
        check_range(bitrate.data.sjw, DATA_SJW_MAX)?;
    }
    Ok(())
}
