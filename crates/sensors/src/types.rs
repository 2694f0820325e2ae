//! Common types for the ADS131M0x driver

use node_types::{DeviceVariant, MAX_CHANNELS};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ads131m0x::registers::{self, InputMux, PowerMode};

/// Configuration for the ADC and the pins it is wired to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdcConfig {
    /// Which member of the family is fitted
    pub variant: DeviceVariant,
    /// Output data rate in Hz. Must be one of the rates the OSR field can select.
    pub sample_rate: u32,
    /// Channels switched on in the CLOCK register
    pub enabled_channels: Vec<u8>,
    /// Input multiplexer setting per channel, indexed by channel
    pub input_mux: Vec<InputMux>,
    /// PGA gain per channel, indexed by channel (1, 2, 4 ... 128)
    pub gains: Vec<u8>,
    pub power_mode: PowerMode,
    /// SPI bus number
    pub spi_bus: u8,
    /// Hardware slave-select line on the SPI bus
    pub cs_pin: u8,
    /// SPI clock in Hz
    pub spi_clock_hz: u32,
    /// BCM number of the data-ready (DRDY) input
    pub drdy_pin: u8,
    /// BCM number of the SYNC/RESET output
    pub reset_pin: u8,
}

impl Default for AdcConfig {
    fn default() -> Self {
        Self {
            variant: DeviceVariant::M02,
            sample_rate: 8000,
            enabled_channels: vec![0, 1],
            input_mux: vec![InputMux::Normal; MAX_CHANNELS],
            gains: vec![1; MAX_CHANNELS],
            power_mode: PowerMode::HighResolutionMax,
            spi_bus: 0,
            cs_pin: 0,
            spi_clock_hz: 10_000_000,
            drdy_pin: 25,
            reset_pin: 22,
        }
    }
}

impl AdcConfig {
    /// Checks the configuration against what the selected variant supports.
    pub fn validate(&self) -> Result<(), DriverError> {
        let channels = self.variant.channel_count();
        registers::osr_for_rate(self.sample_rate)?;
        if self.enabled_channels.is_empty() {
            return Err(DriverError::ConfigurationError(
                "at least one channel must be enabled".to_string(),
            ));
        }
        for &ch in &self.enabled_channels {
            if ch as usize >= channels {
                return Err(DriverError::ConfigurationError(format!(
                    "channel {} does not exist on {:?} ({} channels)",
                    ch, self.variant, channels
                )));
            }
        }
        if self.input_mux.len() < channels || self.gains.len() < channels {
            return Err(DriverError::ConfigurationError(format!(
                "input_mux and gains need one entry per channel ({} required)",
                channels
            )));
        }
        for &gain in &self.gains[..channels] {
            registers::pga_code(gain)?;
        }
        if self.spi_clock_hz == 0 {
            return Err(DriverError::ConfigurationError(
                "spi_clock_hz must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Status of the driver
#[derive(Debug, Clone, PartialEq)]
pub enum DriverStatus {
    /// Created, reset sequence not run yet
    NotInitialized,
    /// Reset and configured, ready for conversions
    Ok,
    /// Initialization failed
    Error(String),
}

/// Errors that can occur in the driver
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DriverError {
    /// Invalid configuration or argument
    #[error("Configuration error: {0}")]
    ConfigurationError(String),
    /// SPI communication error
    #[error("SPI error: {0}")]
    SpiError(String),
    /// GPIO error
    #[error("GPIO error: {0}")]
    GpioError(String),
    /// The device acknowledged a register write with a different address
    #[error("Register write to 0x{address:02X} echoed address 0x{echoed:02X}")]
    RegisterEcho { address: u8, echoed: u8 },
    /// I/O error
    #[error("I/O error: {0}")]
    IoError(String),
    /// Driver not initialized
    #[error("Driver not initialized")]
    NotInitialized,
}

// rppal error types do not implement PartialEq, so the conversions go
// through their string form like the I/O conversion does.
#[cfg(feature = "pi-hardware")]
impl From<rppal::spi::Error> for DriverError {
    fn from(err: rppal::spi::Error) -> Self {
        DriverError::SpiError(err.to_string())
    }
}

#[cfg(feature = "pi-hardware")]
impl From<rppal::gpio::Error> for DriverError {
    fn from(err: rppal::gpio::Error) -> Self {
        DriverError::GpioError(err.to_string())
    }
}

impl From<std::io::Error> for DriverError {
    fn from(err: std::io::Error) -> Self {
        DriverError::IoError(err.to_string())
    }
}
