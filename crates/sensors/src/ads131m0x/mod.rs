//! ADS131M0x delta-sigma ADC driver.

pub mod driver;
pub mod frame;
pub mod helpers;
pub mod registers;
pub mod sim;

#[cfg(test)]
mod tests;

pub use driver::Ads131m0xDriver;
pub use sim::{SimHandle, SimulatedAdc, Waveform};
