//! Register map, commands and field encodings for the ADS131M0x family.

use serde::{Deserialize, Serialize};

use crate::types::DriverError;

// Register Addresses
pub const REG_ID          : u8 = 0x00;
pub const REG_STATUS      : u8 = 0x01;
pub const REG_MODE        : u8 = 0x02;
pub const REG_CLOCK       : u8 = 0x03;
pub const REG_GAIN        : u8 = 0x04;
pub const REG_CFG         : u8 = 0x06;
pub const REG_THRSHLD_MSB : u8 = 0x07;
pub const REG_THRSHLD_LSB : u8 = 0x08;
pub const REG_MAP_CRC     : u8 = 0x3E;

/// Highest address that fits the 6-bit address field of a command word.
pub const MAX_REGISTER_ADDR: u8 = 0x3F;

// Per-channel blocks start at 0x09 and are five registers apart.
const CH_BASE: u8 = 0x09;
const CH_STRIDE: u8 = 5;

pub const fn reg_ch_cfg(channel: u8) -> u8 { CH_BASE + CH_STRIDE * channel }
pub const fn reg_ch_ocal_msb(channel: u8) -> u8 { CH_BASE + CH_STRIDE * channel + 1 }
pub const fn reg_ch_ocal_lsb(channel: u8) -> u8 { CH_BASE + CH_STRIDE * channel + 2 }
pub const fn reg_ch_gcal_msb(channel: u8) -> u8 { CH_BASE + CH_STRIDE * channel + 3 }
pub const fn reg_ch_gcal_lsb(channel: u8) -> u8 { CH_BASE + CH_STRIDE * channel + 4 }

// Commands (16-bit words, sent MSB first in the first word of a frame)
pub const CMD_NULL     : u16 = 0x0000;
pub const CMD_RESET    : u16 = 0x0011;
pub const CMD_STANDBY  : u16 = 0x0022;
pub const CMD_WAKEUP   : u16 = 0x0033;
pub const CMD_LOCK     : u16 = 0x0555;
pub const CMD_UNLOCK   : u16 = 0x0655;
pub const CMD_READ_REG : u16 = 0xA000; // 101a aaaa annn nnnn
pub const CMD_WRITE_REG: u16 = 0x6000; // 011a aaaa annn nnnn

/// Address field of a command or WREG acknowledgment word.
pub const ADDR_FIELD_MASK: u16 = 0x1F80;
pub const ADDR_FIELD_SHIFT: u16 = 7;

/// Upper bits of the acknowledgment word the device returns for WREG.
pub const WREG_ACK: u16 = 0x4000;

// MODE register fields
pub const MODE_REG_CRC_EN : u16 = 0x2000;
pub const MODE_RX_CRC_EN  : u16 = 0x1000;
pub const MODE_CRC_TYPE   : u16 = 0x0800;
pub const MODE_RESET      : u16 = 0x0400;
pub const MODE_WLENGTH    : u16 = 0x0300;
pub const MODE_TIMEOUT    : u16 = 0x0010;
pub const MODE_DRDY_SEL   : u16 = 0x000C;
pub const MODE_DRDY_HIZ   : u16 = 0x0002;
pub const MODE_DRDY_FMT   : u16 = 0x0001;

/// 24-bit words, SPI timeout on, DRDY pulses low when data is ready.
pub const MODE_INIT: u16 = 0x0511;

// CLOCK register fields
pub const CLOCK_OSR : u16 = 0x001C;
pub const CLOCK_PWR : u16 = 0x0003;
pub const fn clock_ch_en(channel: u8) -> u16 { 0x0100 << channel }

// GAIN register fields
pub const fn gain_pga_mask(channel: u8) -> u16 { 0x0007 << (4 * channel) }

// CFG register fields
pub const CFG_GC_DLY : u16 = 0x1E00;
pub const CFG_GC_EN  : u16 = 0x0100;

// CHn_CFG register fields
pub const CH_CFG_MUX : u16 = 0x0003;

// Calibration LSB registers keep their byte in the upper half.
pub const CAL_LSB_MASK: u16 = 0xFF00;

/// Modulator clock with the usual 8.192 MHz CLKIN.
pub const F_MOD_HZ: u32 = 4_096_000;

/// Input multiplexer setting of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum InputMux {
    /// AINxP and AINxN
    #[default]
    Normal = 0,
    /// Inputs shorted together
    Shorted = 1,
    PositiveDcTest = 2,
    NegativeDcTest = 3,
}

/// Power mode field of the CLOCK register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum PowerMode {
    VeryLowPower = 0,
    LowPower = 1,
    HighResolution = 2,
    #[default]
    HighResolutionMax = 3,
}

/// DRDY pin behaviour when data is ready.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum DrdyFormat {
    /// Held low until the frame is read
    Level = 0,
    /// Short low pulse
    Pulse = 1,
}

/// DRDY pin state when no conversion is available.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum DrdyIdleState {
    LogicHigh = 0,
    HighImpedance = 1,
}

/// Convert a PGA gain to its 3-bit register code.
pub fn pga_code(gain: u8) -> Result<u16, DriverError> {
    match gain {
        1 => Ok(0),
        2 => Ok(1),
        4 => Ok(2),
        8 => Ok(3),
        16 => Ok(4),
        32 => Ok(5),
        64 => Ok(6),
        128 => Ok(7),
        _ => Err(DriverError::ConfigurationError(format!(
            "Unsupported gain: {}. Supported gains: 1, 2, 4, 8, 16, 32, 64, 128",
            gain
        ))),
    }
}

/// Convert an output data rate to the OSR register code.
pub fn osr_for_rate(sps: u32) -> Result<u8, DriverError> {
    match sps {
        32000 => Ok(0),
        16000 => Ok(1),
        8000 => Ok(2),
        4000 => Ok(3),
        2000 => Ok(4),
        1000 => Ok(5),
        500 => Ok(6),
        250 => Ok(7),
        _ => Err(DriverError::ConfigurationError(format!(
            "Unsupported sample rate: {}. Supported rates: 250, 500, 1000, 2000, 4000, 8000, 16000, 32000",
            sps
        ))),
    }
}

/// Output data rate selected by an OSR code.
pub fn rate_for_osr(osr: u8) -> u32 {
    F_MOD_HZ / (128u32 << (osr & 0x07))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_blocks_are_five_apart() {
        assert_eq!(reg_ch_cfg(0), 0x09);
        assert_eq!(reg_ch_gcal_lsb(0), 0x0D);
        assert_eq!(reg_ch_cfg(1), 0x0E);
        assert_eq!(reg_ch_cfg(3), 0x18);
        assert_eq!(reg_ch_gcal_lsb(3), 0x1C);
    }

    #[test]
    fn osr_codes_round_trip_through_rates() {
        for osr in 0..8u8 {
            assert_eq!(osr_for_rate(rate_for_osr(osr)).unwrap(), osr);
        }
        assert_eq!(rate_for_osr(2), 8000);
    }

    #[test]
    fn per_channel_field_masks() {
        assert_eq!(clock_ch_en(0), 0x0100);
        assert_eq!(clock_ch_en(3), 0x0800);
        assert_eq!(gain_pga_mask(0), 0x0007);
        assert_eq!(gain_pga_mask(3), 0x7000);
    }
}
