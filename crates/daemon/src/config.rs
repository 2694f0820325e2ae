use std::net::IpAddr;
use std::path::Path;

use adc_sensor::AdcConfig;
use anyhow::{bail, Context};
use pipeline::{ProducerConfig, RecordingConfig};
use serde::{Deserialize, Serialize};

/// TCP listener settings
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub bind_address: IpAddr,
    pub port: u16,
    /// Size of the receive buffer for one client read. Longer messages are
    /// split across reads.
    pub rx_buffer_size: usize,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind_address: IpAddr::from([0, 0, 0, 0]),
            port: 1234,
            rx_buffer_size: 128,
        }
    }
}

/// Configuration for the daemon
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    pub network: NetworkConfig,
    /// Converter and wiring
    pub adc: AdcConfig,
    /// Data-ready handler
    pub producer: ProducerConfig,
    /// Recording file and stop behaviour
    pub recording: RecordingConfig,
}

impl DaemonConfig {
    pub fn from_toml(contents: &str) -> anyhow::Result<Self> {
        let config: DaemonConfig = toml::from_str(contents).context("invalid configuration")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        self.adc.validate()?;

        let channel = self.producer.channel_of_interest;
        if !self.adc.enabled_channels.contains(&channel) {
            bail!(
                "producer.channel_of_interest {} is not in adc.enabled_channels {:?}",
                channel,
                self.adc.enabled_channels
            );
        }
        if self.network.rx_buffer_size == 0 {
            bail!("network.rx_buffer_size must be non-zero");
        }
        let name = &self.recording.file_name;
        if name.is_empty() || name.contains(['/', '\\']) {
            bail!("recording.file_name must be a plain file name, got {:?}", name);
        }
        if self.recording.marker_interval_ms == 0 {
            bail!("recording.marker_interval_ms must be non-zero");
        }
        if self.recording.stop_timeout_ms == 0 {
            bail!("recording.stop_timeout_ms must be non-zero");
        }
        Ok(())
    }
}

/// Loads the configuration from `path`. Without a path, `./daemon.toml` is
/// used if it exists and built-in defaults otherwise.
pub fn load_config(path: Option<&Path>) -> anyhow::Result<DaemonConfig> {
    let default_path = Path::new("./daemon.toml");
    let path = match path {
        Some(p) => p,
        None if default_path.exists() => default_path,
        None => {
            tracing::info!("No configuration file, using defaults");
            let config = DaemonConfig::default();
            config.validate()?;
            return Ok(config);
        }
    };

    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("could not read configuration file {}", path.display()))?;
    let config = DaemonConfig::from_toml(&contents)
        .with_context(|| format!("in configuration file {}", path.display()))?;
    tracing::info!("Loaded configuration from {}", path.display());
    Ok(config)
}
