//! Simulated ADS131M0x.
//!
//! Speaks the same SPI frame protocol as the real device, keeps a register
//! file, generates conversions on a clock derived from the OSR field and can
//! inject faults. Used by the `--mock` daemon mode and by the tests of every
//! crate above this one.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::debug;
use node_types::DeviceVariant;
use rand::Rng;

use super::driver::Ads131m0xDriver;
use super::helpers::raw_to_ch_sample;
use super::registers::{
    self, clock_ch_en, reg_ch_cfg, reg_ch_gcal_msb, InputMux, ADDR_FIELD_MASK, ADDR_FIELD_SHIFT,
    CLOCK_OSR, CMD_LOCK, CMD_NULL, CMD_RESET, CMD_STANDBY, CMD_UNLOCK, CMD_WAKEUP, REG_CFG,
    REG_CLOCK, REG_ID, REG_MODE, REG_STATUS, WREG_ACK,
};
use crate::hal::{EdgeCallback, InputLine, OutputLine, SpiPort, SyncLine};
use crate::types::{AdcConfig, DriverError};

/// A low phase at least this long on the reset line resets the device;
/// anything shorter is a sync pulse.
const RESET_THRESHOLD: Duration = Duration::from_millis(1);

/// Code produced by the internal DC test signal.
pub const DC_TEST_CODE: i32 = 0x11_1111;

/// Signal fed to the simulated converter.
#[derive(Debug, Clone, PartialEq)]
pub enum Waveform {
    /// Channel `n` reads `n * 1000 + index * step`, wrapped to 24 bits.
    Ramp { step: i32 },
    /// Sine with the given amplitude (codes) and period (samples).
    Sine { amplitude: i32, period: u32 },
    Constant(i32),
    /// Values replayed in order on every channel, repeating.
    Sequence(Vec<i32>),
    /// Uniform noise in `-amplitude..=amplitude`.
    Noise { amplitude: i32 },
}

impl Default for Waveform {
    fn default() -> Self {
        Waveform::Sine {
            amplitude: 1_000_000,
            period: 80,
        }
    }
}

impl Waveform {
    fn value(&self, index: u64, channel: usize) -> i32 {
        match self {
            Waveform::Ramp { step } => {
                (channel as i32 * 1000).wrapping_add((index as i32).wrapping_mul(*step))
            }
            Waveform::Sine { amplitude, period } => {
                let phase = (index % (*period).max(1) as u64) as f64 / (*period).max(1) as f64;
                (*amplitude as f64 * (2.0 * std::f64::consts::PI * phase).sin()) as i32
            }
            Waveform::Constant(v) => *v,
            Waveform::Sequence(values) if values.is_empty() => 0,
            Waveform::Sequence(values) => values[(index % values.len() as u64) as usize],
            Waveform::Noise { amplitude } => {
                let a = amplitude.abs();
                rand::thread_rng().gen_range(-a..=a)
            }
        }
    }
}

#[derive(Debug, Default)]
struct Faults {
    corrupt_echo: bool,
    fail_transfers: u32,
    latency: Duration,
    fail_edge_subscribe: bool,
    fail_edge_release: bool,
}

struct SimState {
    variant: DeviceVariant,
    registers: [u16; 64],
    /// Response word for the next frame.
    pending: u16,
    waveform: Waveform,
    sample_index: u64,
    drdy_low: bool,
    faults: Faults,
    transfers: u64,
    sample_reads: u64,
    sync_pulses: u64,
    resets: u64,
    reset_low_since: Option<Instant>,
    edge_callback: Option<EdgeCallback>,
    free_running: bool,
    rate_override: Option<u32>,
}

impl SimState {
    fn new(variant: DeviceVariant) -> Self {
        let mut state = Self {
            variant,
            registers: [0; 64],
            pending: 0,
            waveform: Waveform::default(),
            sample_index: 0,
            drdy_low: false,
            faults: Faults::default(),
            transfers: 0,
            sample_reads: 0,
            sync_pulses: 0,
            resets: 0,
            reset_low_since: None,
            edge_callback: None,
            free_running: true,
            rate_override: None,
        };
        state.power_on_reset();
        state
    }

    fn power_on_reset(&mut self) {
        let channels = self.variant.channel_count() as u8;
        self.registers = [0; 64];
        self.registers[REG_ID as usize] = 0x2000 | ((channels as u16) << 8);
        self.registers[REG_STATUS as usize] = 0x0500;
        self.registers[REG_MODE as usize] = 0x0510;
        let enabled = (0..channels).fold(0u16, |bits, ch| bits | clock_ch_en(ch));
        self.registers[REG_CLOCK as usize] = enabled | 0x000E;
        self.registers[REG_CFG as usize] = 0x0600;
        for ch in 0..channels {
            self.registers[reg_ch_gcal_msb(ch) as usize] = 0x8000;
        }
        self.pending = 0xFF20 | channels as u16;
        self.sample_index = 0;
        self.drdy_low = false;
    }

    fn status_word(&self) -> u16 {
        let drdy_bits = if self.drdy_low {
            (1u16 << self.variant.channel_count()) - 1
        } else {
            0
        };
        self.registers[REG_STATUS as usize] | drdy_bits
    }

    fn conversion_rate(&self) -> u32 {
        self.rate_override.unwrap_or_else(|| {
            let osr = (self.registers[REG_CLOCK as usize] & CLOCK_OSR) >> 2;
            registers::rate_for_osr(osr as u8)
        })
    }

    fn channel_value(&self, channel: u8) -> i32 {
        if self.registers[REG_CLOCK as usize] & clock_ch_en(channel) == 0 {
            return 0;
        }
        match self.registers[reg_ch_cfg(channel) as usize] & 0x0003 {
            m if m == InputMux::Shorted as u16 => 0,
            m if m == InputMux::PositiveDcTest as u16 => DC_TEST_CODE,
            m if m == InputMux::NegativeDcTest as u16 => -DC_TEST_CODE,
            _ => self.waveform.value(self.sample_index, channel as usize),
        }
    }

    fn signal_conversion(&mut self) {
        if self.reset_low_since.is_some() {
            return;
        }
        self.drdy_low = true;
        if let Some(callback) = self.edge_callback.as_mut() {
            callback();
        }
    }

    /// Clocks one frame: emits the pending response and the current
    /// conversion, then executes the command found in `tx`.
    fn clock_frame(&mut self, rx: &mut [u8], tx: &[u8], data_read: bool) {
        rx[0] = (self.pending >> 8) as u8;
        rx[1] = self.pending as u8;
        for ch in 0..self.variant.channel_count() {
            let at = 3 * (ch + 1);
            rx[at..at + 3].copy_from_slice(&raw_to_ch_sample(self.channel_value(ch as u8)));
        }
        if data_read {
            self.sample_index += 1;
            self.sample_reads += 1;
            self.drdy_low = false;
        }

        let word = ((tx[0] as u16) << 8) | tx[1] as u16;
        self.pending = self.execute(word, tx);
    }

    fn execute(&mut self, word: u16, tx: &[u8]) -> u16 {
        let address = ((word & ADDR_FIELD_MASK) >> ADDR_FIELD_SHIFT) as usize;
        match word {
            CMD_NULL => self.status_word(),
            CMD_RESET => {
                self.power_on_reset();
                self.pending
            }
            CMD_STANDBY | CMD_WAKEUP | CMD_LOCK | CMD_UNLOCK => word,
            w if w & 0xE000 == registers::CMD_WRITE_REG => {
                let count = (w & 0x007F) as usize + 1;
                for i in 0..count {
                    let at = 3 * (i + 1);
                    if at + 1 >= tx.len() || address + i >= self.registers.len() {
                        break;
                    }
                    let reg = address + i;
                    if reg != REG_ID as usize && reg != REG_STATUS as usize {
                        self.registers[reg] = ((tx[at] as u16) << 8) | tx[at + 1] as u16;
                    }
                }
                let echoed = if self.faults.corrupt_echo {
                    (address as u16) ^ 0x01
                } else {
                    address as u16
                };
                WREG_ACK | (echoed << ADDR_FIELD_SHIFT) | (count as u16 - 1)
            }
            w if w & 0xE000 == registers::CMD_READ_REG => self.registers[address],
            _ => self.status_word(),
        }
    }
}

fn lock(state: &Mutex<SimState>) -> MutexGuard<'_, SimState> {
    match state.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// The simulated device. Split it into driver-facing parts with
/// [`into_driver`](Self::into_driver); keep a [`SimHandle`] to steer it.
pub struct SimulatedAdc {
    state: Arc<Mutex<SimState>>,
}

impl SimulatedAdc {
    pub fn new(variant: DeviceVariant) -> Self {
        Self {
            state: Arc::new(Mutex::new(SimState::new(variant))),
        }
    }

    pub fn handle(&self) -> SimHandle {
        SimHandle {
            state: self.state.clone(),
        }
    }

    /// Builds a driver wired to this device.
    pub fn into_driver(self, config: AdcConfig) -> Result<Ads131m0xDriver, DriverError> {
        if config.variant != lock(&self.state).variant {
            return Err(DriverError::ConfigurationError(format!(
                "configured variant {:?} does not match the simulated device",
                config.variant
            )));
        }
        let spi = SimSpi {
            state: self.state.clone(),
        };
        let drdy = SimDrdy {
            state: self.state.clone(),
            clock: None,
        };
        let reset = SimResetLine {
            state: self.state.clone(),
        };
        Ads131m0xDriver::new(
            config,
            Box::new(spi),
            Box::new(drdy),
            SyncLine::new(Box::new(reset)),
        )
    }
}

/// Test and control access to a [`SimulatedAdc`].
#[derive(Clone)]
pub struct SimHandle {
    state: Arc<Mutex<SimState>>,
}

impl SimHandle {
    pub fn register(&self, address: u8) -> u16 {
        lock(&self.state).registers[address as usize & 0x3F]
    }

    pub fn set_waveform(&self, waveform: Waveform) {
        lock(&self.state).waveform = waveform;
    }

    /// Makes every WREG acknowledgment carry the wrong address.
    pub fn corrupt_register_echo(&self, corrupt: bool) {
        lock(&self.state).faults.corrupt_echo = corrupt;
    }

    /// The next `count` SPI transfers fail with an I/O error.
    pub fn fail_next_transfers(&self, count: u32) {
        lock(&self.state).faults.fail_transfers = count;
    }

    /// Adds a delay to every SPI transfer.
    pub fn set_transfer_latency(&self, latency: Duration) {
        lock(&self.state).faults.latency = latency;
    }

    /// Makes subscribing to data-ready edges fail, as a GPIO line that is
    /// already claimed would.
    pub fn fail_edge_subscription(&self, fail: bool) {
        lock(&self.state).faults.fail_edge_subscribe = fail;
    }

    /// Makes removing the data-ready callback fail. The callback and the
    /// conversion clock stay in place.
    pub fn fail_edge_release(&self, fail: bool) {
        lock(&self.state).faults.fail_edge_release = fail;
    }

    /// Overrides the conversion rate derived from the OSR register.
    pub fn set_conversion_rate(&self, rate_hz: Option<u32>) {
        lock(&self.state).rate_override = rate_hz;
    }

    /// When false, no conversion clock is started on edge subscription and
    /// conversions only happen through [`trigger_conversion`](Self::trigger_conversion).
    /// Takes effect at the next subscription.
    pub fn set_free_running(&self, free_running: bool) {
        lock(&self.state).free_running = free_running;
    }

    /// Completes one conversion: DRDY goes low and the edge callback runs.
    pub fn trigger_conversion(&self) {
        lock(&self.state).signal_conversion();
    }

    pub fn is_data_ready(&self) -> bool {
        lock(&self.state).drdy_low
    }

    pub fn transfer_count(&self) -> u64 {
        lock(&self.state).transfers
    }

    /// Number of single-frame data reads served.
    pub fn sample_reads(&self) -> u64 {
        lock(&self.state).sample_reads
    }

    pub fn sync_pulses(&self) -> u64 {
        lock(&self.state).sync_pulses
    }

    pub fn reset_count(&self) -> u64 {
        lock(&self.state).resets
    }

    /// Index of the next conversion the device will emit.
    pub fn sample_index(&self) -> u64 {
        lock(&self.state).sample_index
    }
}

struct SimSpi {
    state: Arc<Mutex<SimState>>,
}

impl SpiPort for SimSpi {
    fn transfer(&mut self, read_buffer: &mut [u8], write_buffer: &[u8]) -> Result<(), io::Error> {
        let latency = {
            let mut state = lock(&self.state);
            state.transfers += 1;
            if state.faults.fail_transfers > 0 {
                state.faults.fail_transfers -= 1;
                return Err(io::Error::new(
                    io::ErrorKind::Other,
                    "injected SPI transfer failure",
                ));
            }

            read_buffer.fill(0);
            let frame_len = state.variant.frame_len();
            let data_read = write_buffer.len() == frame_len;
            let mut offset = 0;
            while offset + frame_len <= write_buffer.len().min(read_buffer.len()) {
                state.clock_frame(
                    &mut read_buffer[offset..offset + frame_len],
                    &write_buffer[offset..offset + frame_len],
                    data_read,
                );
                offset += frame_len;
            }
            state.faults.latency
        };
        if !latency.is_zero() {
            thread::sleep(latency);
        }
        Ok(())
    }
}

struct SimResetLine {
    state: Arc<Mutex<SimState>>,
}

impl OutputLine for SimResetLine {
    fn set_high(&mut self) {
        let mut state = lock(&self.state);
        if let Some(since) = state.reset_low_since.take() {
            if since.elapsed() >= RESET_THRESHOLD {
                state.resets += 1;
                state.power_on_reset();
            } else {
                state.sync_pulses += 1;
            }
        }
    }

    fn set_low(&mut self) {
        let mut state = lock(&self.state);
        if state.reset_low_since.is_none() {
            state.reset_low_since = Some(Instant::now());
        }
    }
}

struct ConversionClock {
    stop: Arc<AtomicBool>,
    thread: JoinHandle<()>,
}

struct SimDrdy {
    state: Arc<Mutex<SimState>>,
    clock: Option<ConversionClock>,
}

impl SimDrdy {
    fn stop_clock(&mut self) {
        if let Some(clock) = self.clock.take() {
            clock.stop.store(true, Ordering::Release);
            if clock.thread.join().is_err() {
                log::warn!("Simulated conversion clock panicked");
            }
        }
    }
}

impl InputLine for SimDrdy {
    fn is_low(&self) -> bool {
        lock(&self.state).drdy_low
    }

    fn set_falling_edge_callback(&mut self, callback: EdgeCallback) -> Result<(), io::Error> {
        if lock(&self.state).faults.fail_edge_subscribe {
            return Err(io::Error::new(
                io::ErrorKind::Other,
                "injected edge subscription failure",
            ));
        }
        self.stop_clock();
        let free_running = {
            let mut state = lock(&self.state);
            state.edge_callback = Some(callback);
            state.free_running
        };
        if !free_running {
            return Ok(());
        }

        let stop = Arc::new(AtomicBool::new(false));
        let thread_stop = stop.clone();
        let state = self.state.clone();
        let thread = thread::Builder::new()
            .name("sim-adc-clock".to_string())
            .spawn(move || {
                let mut next = Instant::now();
                while !thread_stop.load(Ordering::Acquire) {
                    let rate = lock(&state).conversion_rate().max(1);
                    next += Duration::from_nanos(1_000_000_000 / rate as u64);
                    let now = Instant::now();
                    if next > now {
                        thread::sleep(next - now);
                    }
                    if thread_stop.load(Ordering::Acquire) {
                        break;
                    }
                    lock(&state).signal_conversion();
                }
            })?;
        debug!("Simulated conversion clock started");
        self.clock = Some(ConversionClock { stop, thread });
        Ok(())
    }

    fn clear_edge_callback(&mut self) -> Result<(), io::Error> {
        if lock(&self.state).faults.fail_edge_release {
            return Err(io::Error::new(
                io::ErrorKind::Other,
                "injected edge release failure",
            ));
        }
        self.stop_clock();
        lock(&self.state).edge_callback = None;
        Ok(())
    }
}

impl Drop for SimDrdy {
    fn drop(&mut self) {
        self.stop_clock();
    }
}
