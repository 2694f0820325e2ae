use std::path::PathBuf;

use acq_daemon::config::load_config;
use acq_daemon::server::Server;
use adc_sensor::Waveform;
use boards::AdcBackend;
use clap::{Arg, ArgAction, Command};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "acq_daemon=debug,pipeline=debug,boards=info,adc_sensor=info".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // --- Argument Parsing ---
    let matches = Command::new("acq_daemon")
        .about("ADS131M0x acquisition node")
        .arg(
            Arg::new("config")
                .long("config")
                .value_name("FILE")
                .value_parser(clap::value_parser!(PathBuf))
                .help("TOML configuration file (default: ./daemon.toml if present)"),
        )
        .arg(
            Arg::new("mock")
                .long("mock")
                .action(ArgAction::SetTrue)
                .help("Use the simulated ADC instead of SPI hardware"),
        )
        .arg(
            Arg::new("port")
                .long("port")
                .value_parser(clap::value_parser!(u16))
                .help("Override the TCP port"),
        )
        .get_matches();

    let mut config = load_config(matches.get_one::<PathBuf>("config").map(PathBuf::as_path))?;
    if let Some(&port) = matches.get_one::<u16>("port") {
        config.network.port = port;
    }

    let backend = if matches.get_flag("mock") {
        tracing::info!("Using simulated ADC");
        AdcBackend::Simulated {
            waveform: Waveform::default(),
            rate_hz: None,
        }
    } else {
        tracing::info!("Using {:?} on SPI{}", config.adc.variant, config.adc.spi_bus);
        AdcBackend::Hardware
    };

    tracing::info!("Acquisition daemon starting...");
    let session = acq_daemon::assemble(&config, backend)?;
    let server = Server::bind(&config.network, session).await?;

    // --- Graceful Shutdown ---
    server
        .run(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for shutdown signal: {}", e);
                std::future::pending::<()>().await;
            }
            tracing::info!("Shutdown signal received. Stopping services...");
        })
        .await?;

    tracing::info!("Acquisition daemon stopped gracefully.");
    Ok(())
}
