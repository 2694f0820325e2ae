//! Raspberry Pi backend built on rppal.

use std::io;

use log::info;
use rppal::gpio::{Gpio, InputPin, OutputPin, Trigger};
use rppal::spi::{Bus, Mode, SlaveSelect, Spi};

use crate::ads131m0x::Ads131m0xDriver;
use crate::hal::{EdgeCallback, InputLine, OutputLine, SpiPort, SyncLine};
use crate::types::{AdcConfig, DriverError};

pub struct RppalSpi {
    spi: Spi,
}

impl SpiPort for RppalSpi {
    fn transfer(&mut self, read_buffer: &mut [u8], write_buffer: &[u8]) -> Result<(), io::Error> {
        self.spi
            .transfer(read_buffer, write_buffer)
            .map(|_| ())
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))
    }
}

pub struct RppalOutput {
    pin: OutputPin,
}

impl OutputLine for RppalOutput {
    fn set_high(&mut self) {
        self.pin.set_high();
    }

    fn set_low(&mut self) {
        self.pin.set_low();
    }
}

pub struct RppalInput {
    pin: InputPin,
}

impl InputLine for RppalInput {
    fn is_low(&self) -> bool {
        self.pin.is_low()
    }

    fn set_falling_edge_callback(&mut self, mut callback: EdgeCallback) -> Result<(), io::Error> {
        self.pin
            .set_async_interrupt(Trigger::FallingEdge, None, move |_| callback())
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))
    }

    fn clear_edge_callback(&mut self) -> Result<(), io::Error> {
        self.pin
            .clear_async_interrupt()
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))
    }
}

/// Opens SPI and the DRDY/RESET pins named in `config` and wraps them in a
/// driver. The device is not touched until `initialize`.
pub fn open_driver(config: AdcConfig) -> Result<Ads131m0xDriver, DriverError> {
    let bus = match config.spi_bus {
        0 => Bus::Spi0,
        1 => Bus::Spi1,
        _ => return Err(DriverError::ConfigurationError("Invalid SPI bus".to_string())),
    };
    let slave_select = match config.cs_pin {
        0 => SlaveSelect::Ss0,
        1 => SlaveSelect::Ss1,
        2 => SlaveSelect::Ss2,
        _ => return Err(DriverError::ConfigurationError("Invalid CS pin".to_string())),
    };

    let gpio = Gpio::new()?;
    // Reset idles high; drive it before anything else so the device does not
    // sit in reset while SPI comes up.
    let reset = gpio.get(config.reset_pin)?.into_output_high();
    let drdy = gpio.get(config.drdy_pin)?.into_input_pullup();
    // ADS131M0x samples on the falling edge with an idle-low clock: mode 1.
    let spi = Spi::new(bus, slave_select, config.spi_clock_hz, Mode::Mode1)?;

    info!(
        "Opened SPI{} CS{} at {} Hz, DRDY GPIO{}, RESET GPIO{}",
        config.spi_bus, config.cs_pin, config.spi_clock_hz, config.drdy_pin, config.reset_pin
    );

    Ads131m0xDriver::new(
        config,
        Box::new(RppalSpi { spi }),
        Box::new(RppalInput { pin: drdy }),
        SyncLine::new(Box::new(RppalOutput { pin: reset })),
    )
}
