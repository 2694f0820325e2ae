//! Driver for the TI ADS131M0x family of simultaneous-sampling delta-sigma
//! ADCs.
//!
//! The driver is written against the traits in [`hal`]. A Raspberry Pi
//! backend is available behind the `pi-hardware` feature and a simulated
//! device in [`ads131m0x::sim`] is always built.

pub mod types;
pub mod hal;
pub mod ads131m0x;

#[cfg(feature = "pi-hardware")]
pub mod rppal_hal;

// Re-export the main types that users need
pub use types::{AdcConfig, DriverStatus, DriverError};
pub use ads131m0x::{Ads131m0xDriver, SimHandle, SimulatedAdc, Waveform};
pub use hal::{EdgeCallback, InputLine, OutputLine, SpiPort, SyncLine};

/// Opens the driver on real hardware.
#[cfg(feature = "pi-hardware")]
pub fn open_hardware(config: AdcConfig) -> Result<Ads131m0xDriver, DriverError> {
    rppal_hal::open_driver(config)
}

/// Without the `pi-hardware` feature there is no hardware backend.
#[cfg(not(feature = "pi-hardware"))]
pub fn open_hardware(_config: AdcConfig) -> Result<Ads131m0xDriver, DriverError> {
    Err(DriverError::GpioError(
        "built without the pi-hardware feature; use the simulated device".to_string(),
    ))
}
