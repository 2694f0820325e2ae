//! Main driver implementation for the ADS131M0x family.

use std::time::Duration;

use log::{debug, info, warn};
use node_types::{AdcSample, DeviceVariant};

use super::frame::{echoed_address, FrameLayout, MAX_EXCHANGE_LEN};
use super::helpers::apply_mask;
use super::registers::{
    self, clock_ch_en, gain_pga_mask, pga_code, reg_ch_cfg, reg_ch_gcal_lsb, reg_ch_gcal_msb,
    reg_ch_ocal_lsb, reg_ch_ocal_msb, DrdyFormat, DrdyIdleState, InputMux, PowerMode,
    CAL_LSB_MASK, CFG_GC_DLY, CFG_GC_EN, CH_CFG_MUX, CLOCK_OSR, CLOCK_PWR, MAX_REGISTER_ADDR,
    MODE_DRDY_FMT, MODE_DRDY_HIZ, MODE_INIT, REG_CFG, REG_CLOCK, REG_GAIN, REG_MODE,
};
use crate::hal::{EdgeCallback, InputLine, SpiPort, SyncLine};
use crate::types::{AdcConfig, DriverError, DriverStatus};

/// How long each phase of the power-up reset pulse lasts.
pub const RESET_PHASE: Duration = Duration::from_millis(100);

/// Low nibble written to CLOCK at power-up: OSR 1024, high-resolution mode.
/// The configured OSR is applied on top of it afterwards.
const CLOCK_INIT_LOW: u16 = 0x000F;

/// Registers dumped after configuration.
const DUMP_REGISTERS: [u8; 6] = [
    registers::REG_ID,
    registers::REG_STATUS,
    REG_MODE,
    REG_CLOCK,
    REG_GAIN,
    REG_CFG,
];

/// ADS131M0x driver.
///
/// The driver owns the SPI port and the data-ready input. Once initialised it
/// is handed to the sample producer, which calls [`read_adc`](Self::read_adc)
/// on every data-ready edge, so nothing on that path allocates.
pub struct Ads131m0xDriver {
    config: AdcConfig,
    layout: FrameLayout,
    status: DriverStatus,
    spi: Box<dyn SpiPort>,
    drdy: Box<dyn InputLine>,
    sync: SyncLine,
    tx: [u8; MAX_EXCHANGE_LEN],
    rx: [u8; MAX_EXCHANGE_LEN],
}

impl Ads131m0xDriver {
    /// Wraps already configured bus and pin handles.
    ///
    /// Nothing is sent to the device until [`initialize`](Self::initialize).
    pub fn new(
        config: AdcConfig,
        spi: Box<dyn SpiPort>,
        drdy: Box<dyn InputLine>,
        sync: SyncLine,
    ) -> Result<Self, DriverError> {
        config.validate()?;
        Ok(Self {
            layout: FrameLayout::new(config.variant),
            config,
            status: DriverStatus::NotInitialized,
            spi,
            drdy,
            sync,
            tx: [0; MAX_EXCHANGE_LEN],
            rx: [0; MAX_EXCHANGE_LEN],
        })
    }

    /// Resets the device and applies the configuration.
    ///
    /// Order matters: reset pulse, MODE, CLOCK with the enabled channels,
    /// input multiplexers, OSR, then PGA gains.
    pub fn initialize(&mut self) -> Result<(), DriverError> {
        info!(
            "Initializing {:?}: {} Hz, channels {:?}",
            self.config.variant, self.config.sample_rate, self.config.enabled_channels
        );

        let result = self.configure();
        match &result {
            Ok(()) => {
                self.status = DriverStatus::Ok;
                self.log_register_dump();
            }
            Err(e) => {
                warn!("ADC initialization failed: {}", e);
                self.status = DriverStatus::Error(e.to_string());
            }
        }
        result
    }

    fn configure(&mut self) -> Result<(), DriverError> {
        self.hardware_reset();

        self.write_register(REG_MODE, MODE_INIT)?;

        let enable_bits = self
            .config
            .enabled_channels
            .iter()
            .fold(0u16, |bits, &ch| bits | clock_ch_en(ch));
        self.write_register(REG_CLOCK, enable_bits | CLOCK_INIT_LOW)?;

        for ch in 0..self.channel_count() as u8 {
            let mux = if self.config.enabled_channels.contains(&ch) {
                self.config.input_mux[ch as usize]
            } else {
                InputMux::Shorted
            };
            self.set_input_channel_selection(ch, mux)?;
        }

        let osr = registers::osr_for_rate(self.config.sample_rate)?;
        self.set_osr(osr)?;
        self.set_power_mode(self.config.power_mode)?;

        for ch in 0..self.channel_count() as u8 {
            let gain = self.config.gains[ch as usize];
            self.set_channel_pga(ch, gain)?;
        }
        Ok(())
    }

    /// Drives the reset line high, low, high with [`RESET_PHASE`] between
    /// transitions.
    pub fn hardware_reset(&mut self) {
        debug!("Pulsing ADC reset line");
        self.sync.set_high();
        std::thread::sleep(RESET_PHASE);
        self.sync.pulse_reset(RESET_PHASE);
    }

    /// Writes one register and checks the address the device echoes back.
    pub fn write_register(&mut self, address: u8, value: u16) -> Result<(), DriverError> {
        check_address(address)?;
        self.layout.encode_write(&mut self.tx, address, value);
        self.exchange()?;

        let echoed = echoed_address(self.layout.response_word(&self.rx));
        if echoed != address {
            return Err(DriverError::RegisterEcho { address, echoed });
        }
        Ok(())
    }

    /// Reads one register.
    pub fn read_register(&mut self, address: u8) -> Result<u16, DriverError> {
        check_address(address)?;
        self.layout.encode_read(&mut self.tx, address);
        self.exchange()?;
        Ok(self.layout.response_word(&self.rx))
    }

    /// Read-modify-write: bits under `mask` are replaced by `value`.
    ///
    /// `value` is expected to be shifted into place already.
    pub fn write_register_masked(
        &mut self,
        address: u8,
        value: u16,
        mask: u16,
    ) -> Result<(), DriverError> {
        let current = self.read_register(address)?;
        self.write_register(address, apply_mask(current, value, mask))
    }

    /// Sends a one-word command and returns the device's response word.
    pub fn send_command(&mut self, command: u16) -> Result<u16, DriverError> {
        self.layout.encode_command(&mut self.tx, command);
        self.exchange()?;
        Ok(self.layout.response_word(&self.rx))
    }

    /// Clocks one null frame and decodes the conversion result.
    pub fn read_adc(&mut self) -> Result<AdcSample, DriverError> {
        if self.status != DriverStatus::Ok {
            return Err(DriverError::NotInitialized);
        }
        let len = self.layout.frame_len();
        self.tx[..len].fill(0);
        self.spi
            .transfer(&mut self.rx[..len], &self.tx[..len])
            .map_err(|e| DriverError::SpiError(e.to_string()))?;
        Ok(self.layout.decode_sample(&self.rx[..len]))
    }

    /// True while the data-ready line is asserted (low).
    pub fn is_data_ready(&self) -> bool {
        self.drdy.is_low()
    }

    fn exchange(&mut self) -> Result<(), DriverError> {
        let len = self.layout.exchange_len();
        self.spi
            .transfer(&mut self.rx[..len], &self.tx[..len])
            .map_err(|e| DriverError::SpiError(e.to_string()))
    }

    // ---- register field setters ----

    pub fn set_drdy_format(&mut self, format: DrdyFormat) -> Result<(), DriverError> {
        self.write_register_masked(REG_MODE, format as u16, MODE_DRDY_FMT)
    }

    pub fn set_drdy_state_when_unavailable(
        &mut self,
        state: DrdyIdleState,
    ) -> Result<(), DriverError> {
        self.write_register_masked(REG_MODE, (state as u16) << 1, MODE_DRDY_HIZ)
    }

    pub fn set_power_mode(&mut self, mode: PowerMode) -> Result<(), DriverError> {
        self.write_register_masked(REG_CLOCK, mode as u16, CLOCK_PWR)?;
        self.config.power_mode = mode;
        Ok(())
    }

    /// Sets the oversampling ratio code (0..=7) and with it the data rate.
    pub fn set_osr(&mut self, osr: u8) -> Result<(), DriverError> {
        if osr > 7 {
            return Err(DriverError::ConfigurationError(format!(
                "OSR code {} out of range 0-7",
                osr
            )));
        }
        self.write_register_masked(REG_CLOCK, (osr as u16) << 2, CLOCK_OSR)?;
        self.config.sample_rate = registers::rate_for_osr(osr);
        Ok(())
    }

    pub fn set_channel_enable(&mut self, channel: u8, enable: bool) -> Result<(), DriverError> {
        self.check_channel(channel)?;
        let value = if enable { clock_ch_en(channel) } else { 0 };
        self.write_register_masked(REG_CLOCK, value, clock_ch_en(channel))?;
        self.config.enabled_channels.retain(|&ch| ch != channel);
        if enable {
            self.config.enabled_channels.push(channel);
            self.config.enabled_channels.sort_unstable();
        }
        Ok(())
    }

    /// Sets the PGA gain (1, 2, 4 ... 128) of `channel`.
    pub fn set_channel_pga(&mut self, channel: u8, gain: u8) -> Result<(), DriverError> {
        self.check_channel(channel)?;
        let code = pga_code(gain)?;
        self.write_register_masked(REG_GAIN, code << (4 * channel), gain_pga_mask(channel))?;
        self.config.gains[channel as usize] = gain;
        Ok(())
    }

    pub fn set_global_chop(&mut self, enabled: bool) -> Result<(), DriverError> {
        self.write_register_masked(REG_CFG, (enabled as u16) << 8, CFG_GC_EN)
    }

    /// Sets the global-chop delay code (0..=15).
    pub fn set_global_chop_delay(&mut self, delay: u8) -> Result<(), DriverError> {
        if delay > 15 {
            return Err(DriverError::ConfigurationError(format!(
                "Global chop delay code {} out of range 0-15",
                delay
            )));
        }
        self.write_register_masked(REG_CFG, (delay as u16) << 9, CFG_GC_DLY)
    }

    pub fn set_input_channel_selection(
        &mut self,
        channel: u8,
        mux: InputMux,
    ) -> Result<(), DriverError> {
        self.check_channel(channel)?;
        self.write_register_masked(reg_ch_cfg(channel), mux as u16, CH_CFG_MUX)?;
        self.config.input_mux[channel as usize] = mux;
        Ok(())
    }

    /// Writes a signed 24-bit offset calibration value.
    pub fn set_channel_offset_calibration(
        &mut self,
        channel: u8,
        offset: i32,
    ) -> Result<(), DriverError> {
        self.check_channel(channel)?;
        if !(-0x80_0000..=0x7F_FFFF).contains(&offset) {
            return Err(DriverError::ConfigurationError(format!(
                "Offset calibration {} does not fit 24 bits",
                offset
            )));
        }
        let raw = (offset as u32) & 0x00FF_FFFF;
        self.write_calibration(reg_ch_ocal_msb(channel), reg_ch_ocal_lsb(channel), raw)
    }

    /// Writes an unsigned 24-bit gain calibration value (0x800000 is unity).
    pub fn set_channel_gain_calibration(
        &mut self,
        channel: u8,
        gain: u32,
    ) -> Result<(), DriverError> {
        self.check_channel(channel)?;
        if gain > 0x00FF_FFFF {
            return Err(DriverError::ConfigurationError(format!(
                "Gain calibration 0x{:X} does not fit 24 bits",
                gain
            )));
        }
        self.write_calibration(reg_ch_gcal_msb(channel), reg_ch_gcal_lsb(channel), gain)
    }

    fn write_calibration(&mut self, msb_reg: u8, lsb_reg: u8, raw: u32) -> Result<(), DriverError> {
        self.write_register_masked(msb_reg, (raw >> 8) as u16, 0xFFFF)?;
        self.write_register_masked(lsb_reg, ((raw & 0xFF) as u16) << 8, CAL_LSB_MASK)
    }

    // ---- data-ready and sync plumbing ----

    /// Runs `callback` on every falling edge of the data-ready line.
    pub fn attach_data_ready(&mut self, callback: EdgeCallback) -> Result<(), DriverError> {
        self.drdy
            .set_falling_edge_callback(callback)
            .map_err(|e| DriverError::GpioError(e.to_string()))
    }

    pub fn detach_data_ready(&mut self) -> Result<(), DriverError> {
        self.drdy
            .clear_edge_callback()
            .map_err(|e| DriverError::GpioError(e.to_string()))
    }

    /// Handle to the SYNC/RESET line, usable while the driver itself is
    /// owned by the acquisition thread.
    pub fn sync_line(&self) -> SyncLine {
        self.sync.clone()
    }

    // ---- accessors ----

    pub fn status(&self) -> &DriverStatus {
        &self.status
    }

    pub fn config(&self) -> &AdcConfig {
        &self.config
    }

    pub fn variant(&self) -> DeviceVariant {
        self.config.variant
    }

    pub fn channel_count(&self) -> usize {
        self.config.variant.channel_count()
    }

    /// Reads the configuration registers for diagnostics.
    pub fn dump_registers(&mut self) -> Result<Vec<(u8, u16)>, DriverError> {
        let mut dump = Vec::with_capacity(DUMP_REGISTERS.len() + self.channel_count());
        for address in DUMP_REGISTERS {
            dump.push((address, self.read_register(address)?));
        }
        for ch in 0..self.channel_count() as u8 {
            dump.push((reg_ch_cfg(ch), self.read_register(reg_ch_cfg(ch))?));
        }
        Ok(dump)
    }

    fn log_register_dump(&mut self) {
        match self.dump_registers() {
            Ok(dump) => {
                info!("----Register Dump After Configuration----");
                for (address, value) in dump {
                    info!("Register 0x{:02X}: 0x{:04X}", address, value);
                }
                info!("----------------------------------------");
            }
            Err(e) => warn!("Register dump failed: {}", e),
        }
    }

    fn check_channel(&self, channel: u8) -> Result<(), DriverError> {
        if (channel as usize) < self.channel_count() {
            Ok(())
        } else {
            Err(DriverError::ConfigurationError(format!(
                "Channel {} does not exist on {:?}",
                channel, self.config.variant
            )))
        }
    }
}

fn check_address(address: u8) -> Result<(), DriverError> {
    if address > MAX_REGISTER_ADDR {
        return Err(DriverError::ConfigurationError(format!(
            "Register address 0x{:02X} out of range",
            address
        )));
    }
    Ok(())
}

impl std::fmt::Debug for Ads131m0xDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ads131m0xDriver")
            .field("config", &self.config)
            .field("status", &self.status)
            .finish_non_exhaustive()
    }
}
