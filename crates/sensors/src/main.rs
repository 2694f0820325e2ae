use std::error::Error;
use std::time::{Duration, Instant};

use adc_sensor::{AdcConfig, Ads131m0xDriver, SimulatedAdc};
use clap::{Parser, ValueEnum};
use log::info;
use node_types::DeviceVariant;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Variant {
    M02,
    M04,
}

/// Bring-up tool: resets the ADC, dumps its registers and polls a few samples.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Use the simulated device instead of SPI hardware
    #[arg(long)]
    mock: bool,

    #[arg(long, value_enum, default_value_t = Variant::M02)]
    variant: Variant,

    /// Output data rate in Hz
    #[arg(long, default_value_t = 8000)]
    sample_rate: u32,

    /// Number of samples to read
    #[arg(long, default_value_t = 16)]
    samples: usize,
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let variant = match args.variant {
        Variant::M02 => DeviceVariant::M02,
        Variant::M04 => DeviceVariant::M04,
    };
    let config = AdcConfig {
        variant,
        sample_rate: args.sample_rate,
        enabled_channels: (0..variant.channel_count() as u8).collect(),
        ..AdcConfig::default()
    };

    let mut sim = None;
    let mut driver: Ads131m0xDriver = if args.mock {
        let adc = SimulatedAdc::new(variant);
        sim = Some(adc.handle());
        adc.into_driver(config)?
    } else {
        adc_sensor::open_hardware(config)?
    };

    driver.initialize()?;
    for (address, value) in driver.dump_registers()? {
        println!("0x{:02X} = 0x{:04X}", address, value);
    }

    let timeout = Duration::from_millis(100);
    for n in 0..args.samples {
        if let Some(sim) = &sim {
            sim.trigger_conversion();
        }
        let started = Instant::now();
        while !driver.is_data_ready() {
            if started.elapsed() > timeout {
                return Err(format!("DRDY did not assert within {:?}", timeout).into());
            }
            std::hint::spin_loop();
        }
        let sample = driver.read_adc()?;
        println!("{:4} status=0x{:04X} {:?}", n, sample.status, sample.channels());
    }

    info!("Read {} samples", args.samples);
    Ok(())
}
