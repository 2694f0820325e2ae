//! Hardware abstraction traits
//!
//! The driver talks to the converter only through these traits, so the same
//! code runs against the Raspberry Pi backend (`pi-hardware` feature) and
//! against [`SimulatedAdc`](crate::ads131m0x::sim::SimulatedAdc).

use std::io;
use std::sync::{Arc, Mutex};

/// Callback fired on a falling edge of the data-ready line.
pub type EdgeCallback = Box<dyn FnMut() + Send + 'static>;

/// Full-duplex SPI transfer.
pub trait SpiPort: Send + 'static {
    /// Clocks `write_buffer` out while filling `read_buffer`. Both buffers
    /// have the same length.
    fn transfer(&mut self, read_buffer: &mut [u8], write_buffer: &[u8]) -> Result<(), io::Error>;
}

/// A push-pull output line.
pub trait OutputLine: Send + 'static {
    fn set_high(&mut self);
    fn set_low(&mut self);
}

/// An input line that can also deliver falling-edge notifications.
pub trait InputLine: Send + 'static {
    fn is_low(&self) -> bool;

    /// Installs `callback` to run on every falling edge, replacing any
    /// previous one.
    fn set_falling_edge_callback(&mut self, callback: EdgeCallback) -> Result<(), io::Error>;

    /// Removes the edge callback. Does nothing if none is installed.
    fn clear_edge_callback(&mut self) -> Result<(), io::Error>;
}

/// The SYNC/RESET line, shared between the driver (which pulses it long to
/// reset the device) and the session controller (which pulses it short to
/// resynchronise conversions at the start of a recording).
#[derive(Clone)]
pub struct SyncLine {
    line: Arc<Mutex<Box<dyn OutputLine>>>,
}

impl SyncLine {
    pub fn new(line: Box<dyn OutputLine>) -> Self {
        Self {
            line: Arc::new(Mutex::new(line)),
        }
    }

    /// Runs `f` with exclusive access to the line.
    pub fn with<R>(&self, f: impl FnOnce(&mut dyn OutputLine) -> R) -> R {
        // A panic while holding the lock leaves a plain GPIO, nothing to repair.
        let mut guard = match self.line.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(guard.as_mut())
    }

    pub fn set_high(&self) {
        self.with(|line| line.set_high());
    }

    /// Short low pulse. The device answers it by restarting the digital
    /// filters so the next DRDY edge starts a fresh conversion.
    pub fn pulse_sync(&self) {
        self.with(|line| {
            line.set_low();
            line.set_high();
        });
    }

    /// Holds the line low for `low_for` before releasing it. Anything longer
    /// than 2048 CLKIN periods resets the device.
    pub fn pulse_reset(&self, low_for: std::time::Duration) {
        self.with(|line| {
            line.set_low();
            std::thread::sleep(low_for);
            line.set_high();
        });
    }
}

impl std::fmt::Debug for SyncLine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncLine").finish_non_exhaustive()
    }
}
