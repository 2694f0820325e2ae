use node_types::DeviceVariant;

use super::registers::*;
use super::sim::{SimHandle, SimulatedAdc, Waveform};
use super::Ads131m0xDriver;
use crate::types::{AdcConfig, DriverError, DriverStatus};

fn sim_driver(config: AdcConfig) -> (Ads131m0xDriver, SimHandle) {
    let sim = SimulatedAdc::new(config.variant);
    let handle = sim.handle();
    let driver = sim.into_driver(config).unwrap();
    (driver, handle)
}

fn m04_config() -> AdcConfig {
    AdcConfig {
        variant: DeviceVariant::M04,
        enabled_channels: vec![0, 1, 2, 3],
        ..AdcConfig::default()
    }
}

#[test]
fn initialization_writes_power_up_sequence() {
    let (mut driver, sim) = sim_driver(AdcConfig::default());
    driver.initialize().unwrap();

    assert_eq!(driver.status(), &DriverStatus::Ok);
    assert_eq!(sim.reset_count(), 1);
    assert_eq!(sim.register(REG_MODE), MODE_INIT);
    // CH0/CH1 enabled, OSR code 2, high resolution.
    assert_eq!(sim.register(REG_CLOCK), 0x030B);
    assert_eq!(sim.register(reg_ch_cfg(0)) & CH_CFG_MUX, InputMux::Normal as u16);
    assert_eq!(sim.register(REG_GAIN), 0);
}

#[test]
fn unused_channels_are_shorted() {
    let config = AdcConfig {
        enabled_channels: vec![0, 2],
        ..m04_config()
    };
    let (mut driver, sim) = sim_driver(config);
    driver.initialize().unwrap();

    assert_eq!(sim.register(REG_CLOCK) & 0x0F00, 0x0500);
    assert_eq!(sim.register(reg_ch_cfg(1)), InputMux::Shorted as u16);
    assert_eq!(sim.register(reg_ch_cfg(3)), InputMux::Shorted as u16);
    assert_eq!(sim.register(reg_ch_cfg(2)), InputMux::Normal as u16);
}

#[test]
fn write_then_read_register() {
    let (mut driver, _sim) = sim_driver(AdcConfig::default());
    driver.write_register(REG_THRSHLD_MSB, 0x1234).unwrap();
    assert_eq!(driver.read_register(REG_THRSHLD_MSB).unwrap(), 0x1234);
}

#[test]
fn read_only_registers_ignore_writes() {
    let (mut driver, _sim) = sim_driver(m04_config());
    let id = driver.read_register(REG_ID).unwrap();
    assert_eq!(id & 0xFF00, 0x2400);
    driver.write_register(REG_ID, 0).unwrap();
    assert_eq!(driver.read_register(REG_ID).unwrap(), id);
}

#[test]
fn wrong_echo_is_reported() {
    let (mut driver, sim) = sim_driver(AdcConfig::default());
    sim.corrupt_register_echo(true);
    let err = driver.write_register(REG_CLOCK, 0x030F).unwrap_err();
    assert_eq!(
        err,
        DriverError::RegisterEcho {
            address: REG_CLOCK,
            echoed: REG_CLOCK ^ 0x01
        }
    );
}

#[test]
fn corrupted_echo_fails_initialization() {
    let (mut driver, sim) = sim_driver(AdcConfig::default());
    sim.corrupt_register_echo(true);
    assert!(driver.initialize().is_err());
    assert!(matches!(driver.status(), DriverStatus::Error(_)));
    assert_eq!(driver.read_adc().unwrap_err(), DriverError::NotInitialized);
}

#[test]
fn register_address_out_of_range() {
    let (mut driver, sim) = sim_driver(AdcConfig::default());
    assert!(matches!(
        driver.write_register(0x40, 0),
        Err(DriverError::ConfigurationError(_))
    ));
    assert_eq!(sim.transfer_count(), 0);
}

#[test]
fn masked_write_keeps_other_bits() {
    let (mut driver, _sim) = sim_driver(AdcConfig::default());
    driver.write_register(REG_CLOCK, 0x030F).unwrap();
    driver.write_register_masked(REG_CLOCK, 5 << 2, CLOCK_OSR).unwrap();
    assert_eq!(driver.read_register(REG_CLOCK).unwrap(), 0x0317);
}

#[test]
fn read_adc_decodes_channel_words() {
    let (mut driver, sim) = sim_driver(AdcConfig::default());
    driver.initialize().unwrap();
    sim.set_waveform(Waveform::Sequence(vec![8_388_607, -8_388_608, -1, 0]));

    let values: Vec<i32> = (0..4)
        .map(|_| driver.read_adc().unwrap().channel(0).unwrap())
        .collect();
    assert_eq!(values, vec![8_388_607, -8_388_608, -1, 0]);
}

#[test]
fn read_adc_reports_status_and_clears_data_ready() {
    let (mut driver, sim) = sim_driver(AdcConfig::default());
    driver.initialize().unwrap();
    sim.set_waveform(Waveform::Constant(42));

    sim.trigger_conversion();
    assert!(driver.is_data_ready());
    // The status word of this frame answers the previous command.
    driver.read_adc().unwrap();
    assert!(!driver.is_data_ready());

    let sample = driver.read_adc().unwrap();
    assert_eq!(sample.status & 0xFF00, 0x0500);
    assert_eq!(sample.channels(), &[42, 42]);
}

#[test]
fn m04_frame_carries_four_channels() {
    let (mut driver, sim) = sim_driver(m04_config());
    driver.initialize().unwrap();
    sim.set_waveform(Waveform::Ramp { step: 1 });

    let first = driver.read_adc().unwrap();
    assert_eq!(first.channel_count(), 4);
    assert_eq!(first.channels(), &[0, 1000, 2000, 3000]);
    let second = driver.read_adc().unwrap();
    assert_eq!(second.channels(), &[1, 1001, 2001, 3001]);
}

#[test]
fn spi_failure_surfaces_as_error() {
    let (mut driver, sim) = sim_driver(AdcConfig::default());
    driver.initialize().unwrap();
    sim.fail_next_transfers(1);
    assert!(matches!(driver.read_adc(), Err(DriverError::SpiError(_))));
    assert!(driver.read_adc().is_ok());
}

#[test]
fn field_setters_touch_only_their_bits() {
    let (mut driver, sim) = sim_driver(m04_config());
    driver.initialize().unwrap();
    let clock = sim.register(REG_CLOCK);

    driver.set_osr(5).unwrap();
    assert_eq!(sim.register(REG_CLOCK), (clock & !CLOCK_OSR) | (5 << 2));
    assert_eq!(driver.config().sample_rate, 1000);

    driver.set_power_mode(PowerMode::LowPower).unwrap();
    assert_eq!(sim.register(REG_CLOCK) & CLOCK_PWR, 1);

    driver.set_channel_enable(2, false).unwrap();
    assert_eq!(sim.register(REG_CLOCK) & clock_ch_en(2), 0);
    assert_eq!(driver.config().enabled_channels, vec![0, 1, 3]);

    driver.set_channel_pga(3, 32).unwrap();
    assert_eq!(sim.register(REG_GAIN), 5 << 12);

    driver.set_global_chop(true).unwrap();
    driver.set_global_chop_delay(9).unwrap();
    assert_eq!(sim.register(REG_CFG) & (CFG_GC_EN | CFG_GC_DLY), CFG_GC_EN | (9 << 9));

    driver.set_drdy_format(DrdyFormat::Pulse).unwrap();
    driver
        .set_drdy_state_when_unavailable(DrdyIdleState::HighImpedance)
        .unwrap();
    assert_eq!(sim.register(REG_MODE) & 0x0003, 0x0003);

    driver
        .set_input_channel_selection(1, InputMux::PositiveDcTest)
        .unwrap();
    assert_eq!(sim.register(reg_ch_cfg(1)), 2);
}

#[test]
fn calibration_splits_across_msb_and_lsb() {
    let (mut driver, sim) = sim_driver(AdcConfig::default());
    driver.initialize().unwrap();

    driver.set_channel_offset_calibration(1, -2).unwrap();
    assert_eq!(sim.register(reg_ch_ocal_msb(1)), 0xFFFF);
    assert_eq!(sim.register(reg_ch_ocal_lsb(1)), 0xFE00);

    driver.set_channel_gain_calibration(0, 0x80_1234).unwrap();
    assert_eq!(sim.register(reg_ch_gcal_msb(0)), 0x8012);
    assert_eq!(sim.register(reg_ch_gcal_lsb(0)), 0x3400);

    assert!(driver.set_channel_gain_calibration(0, 0x100_0000).is_err());
    assert!(driver.set_channel_offset_calibration(0, 0x80_0000).is_err());
}

#[test]
fn m02_rejects_channel_two_and_three() {
    let (mut driver, _sim) = sim_driver(AdcConfig::default());
    driver.initialize().unwrap();
    for ch in [2u8, 3] {
        assert!(driver.set_channel_pga(ch, 2).is_err());
        assert!(driver.set_input_channel_selection(ch, InputMux::Shorted).is_err());
        assert!(driver.set_channel_offset_calibration(ch, 0).is_err());
        assert!(driver.set_channel_enable(ch, true).is_err());
    }
}

#[test]
fn sync_pulse_is_not_a_reset() {
    let (mut driver, sim) = sim_driver(AdcConfig::default());
    driver.initialize().unwrap();
    driver.sync_line().pulse_sync();
    assert_eq!(sim.sync_pulses(), 1);
    assert_eq!(sim.reset_count(), 1);
    assert_eq!(sim.register(REG_MODE), MODE_INIT);
}

#[test]
fn reset_command_restores_defaults() {
    let (mut driver, sim) = sim_driver(AdcConfig::default());
    driver.initialize().unwrap();
    driver.send_command(CMD_RESET).unwrap();
    assert_eq!(sim.register(REG_MODE), 0x0510);
}

#[test]
fn variant_mismatch_is_rejected() {
    let sim = SimulatedAdc::new(DeviceVariant::M02);
    assert!(sim.into_driver(m04_config()).is_err());
}

#[test]
fn free_running_clock_fires_edges() {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    let (mut driver, sim) = sim_driver(AdcConfig::default());
    driver.initialize().unwrap();
    sim.set_conversion_rate(Some(2000));

    let edges = Arc::new(AtomicU32::new(0));
    let counter = edges.clone();
    driver
        .attach_data_ready(Box::new(move || {
            counter.fetch_add(1, Ordering::Relaxed);
        }))
        .unwrap();
    std::thread::sleep(std::time::Duration::from_millis(50));
    driver.detach_data_ready().unwrap();

    let seen = edges.load(Ordering::Relaxed);
    assert!(seen > 10, "only {} edges in 50 ms", seen);
    std::thread::sleep(std::time::Duration::from_millis(10));
    assert_eq!(edges.load(Ordering::Relaxed), seen);
}
