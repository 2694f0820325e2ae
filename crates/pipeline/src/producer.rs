//! Data-ready handler: reads one conversion and pushes the channel of
//! interest into the ring.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use adc_sensor::{Ads131m0xDriver, DriverError, SyncLine};
use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, PipelineResult};
use crate::ring::{ChunkRing, PushOutcome};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProducerConfig {
    /// Channel whose value is recorded
    pub channel_of_interest: u8,
    /// Edges handled slower than this are counted as over budget
    pub latency_budget_us: u64,
}

impl Default for ProducerConfig {
    fn default() -> Self {
        Self {
            channel_of_interest: 0,
            latency_budget_us: 100,
        }
    }
}

/// What one data-ready edge resulted in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeOutcome {
    /// Producer disabled, nothing read
    Idle,
    Pushed(PushOutcome),
    ReadFailed,
}

/// Counter snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProducerStats {
    pub edges: u64,
    pub read_errors: u64,
    pub over_budget: u64,
}

#[derive(Debug, Default)]
struct Shared {
    enabled: AtomicBool,
    busy: AtomicBool,
    edges: AtomicU64,
    read_errors: AtomicU64,
    over_budget: AtomicU64,
    last_error_logged: AtomicBool,
}

/// Owns the driver once acquisition is wired up. Runs on the data-ready
/// thread.
pub struct SampleProducer {
    driver: Ads131m0xDriver,
    ring: Arc<ChunkRing>,
    shared: Arc<Shared>,
    channel: usize,
    budget: Duration,
}

/// Cloneable control surface for the producer, used by the session.
#[derive(Debug, Clone)]
pub struct ProducerControl {
    shared: Arc<Shared>,
    sync: SyncLine,
}

impl SampleProducer {
    pub fn new(
        driver: Ads131m0xDriver,
        ring: Arc<ChunkRing>,
        config: &ProducerConfig,
    ) -> PipelineResult<(Self, ProducerControl)> {
        let channel = config.channel_of_interest as usize;
        if channel >= driver.channel_count() {
            return Err(PipelineError::InvalidConfiguration {
                message: format!(
                    "channel_of_interest {} does not exist on {:?}",
                    channel,
                    driver.variant()
                ),
            });
        }
        let shared = Arc::new(Shared::default());
        let control = ProducerControl {
            shared: shared.clone(),
            sync: driver.sync_line(),
        };
        Ok((
            Self {
                driver,
                ring,
                shared,
                channel,
                budget: Duration::from_micros(config.latency_budget_us),
            },
            control,
        ))
    }

    /// Handles one data-ready edge. Does not allocate or block beyond the
    /// SPI transfer itself.
    pub fn on_data_ready(&mut self) -> EdgeOutcome {
        let started = Instant::now();
        self.shared.edges.fetch_add(1, Ordering::Relaxed);
        self.shared.busy.store(true, Ordering::SeqCst);
        if !self.shared.enabled.load(Ordering::SeqCst) {
            self.shared.busy.store(false, Ordering::Release);
            return EdgeOutcome::Idle;
        }

        let outcome = match self.driver.read_adc() {
            Ok(sample) => {
                let value = sample.channel(self.channel).unwrap_or_default();
                EdgeOutcome::Pushed(self.ring.push(value))
            }
            Err(e) => {
                self.shared.read_errors.fetch_add(1, Ordering::Relaxed);
                if !self.shared.last_error_logged.swap(true, Ordering::Relaxed) {
                    tracing::warn!("ADC read failed in data-ready handler: {}", e);
                }
                EdgeOutcome::ReadFailed
            }
        };

        self.shared.busy.store(false, Ordering::Release);
        if started.elapsed() > self.budget {
            self.shared.over_budget.fetch_add(1, Ordering::Relaxed);
        }
        outcome
    }

    pub fn driver_mut(&mut self) -> &mut Ads131m0xDriver {
        &mut self.driver
    }

    pub fn into_driver(self) -> Ads131m0xDriver {
        self.driver
    }

    /// Detaches the data-ready callback, for callers that are tearing down.
    pub fn detach(&mut self) -> Result<(), DriverError> {
        self.driver.detach_data_ready()
    }
}

impl ProducerControl {
    pub fn enable(&self) {
        self.shared.enabled.store(true, Ordering::SeqCst);
    }

    pub fn disable(&self) {
        self.shared.enabled.store(false, Ordering::SeqCst);
    }

    /// After [`disable`](Self::disable): waits until an edge that was already
    /// being handled has finished pushing. Returns false on timeout.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while self.shared.busy.load(Ordering::SeqCst) {
            if Instant::now() >= deadline {
                return false;
            }
            std::thread::yield_now();
        }
        true
    }

    pub fn is_enabled(&self) -> bool {
        self.shared.enabled.load(Ordering::SeqCst)
    }

    /// Restarts the converter's digital filters so the first recorded sample
    /// is a fresh conversion.
    pub fn pulse_sync(&self) {
        self.sync.pulse_sync();
    }

    pub fn stats(&self) -> ProducerStats {
        ProducerStats {
            edges: self.shared.edges.load(Ordering::Relaxed),
            read_errors: self.shared.read_errors.load(Ordering::Relaxed),
            over_budget: self.shared.over_budget.load(Ordering::Relaxed),
        }
    }

    pub fn reset_stats(&self) {
        self.shared.edges.store(0, Ordering::Relaxed);
        self.shared.read_errors.store(0, Ordering::Relaxed);
        self.shared.over_budget.store(0, Ordering::Relaxed);
        self.shared.last_error_logged.store(false, Ordering::Relaxed);
    }
}
