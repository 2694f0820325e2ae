//! Board bring-up for the ADS131M0x acquisition node.

use std::sync::Arc;

use adc_sensor::ads131m0x::registers::CMD_STANDBY;
use adc_sensor::{AdcConfig, Ads131m0xDriver, SimHandle, SimulatedAdc, Waveform};
use log::{info, warn};
use node_types::OverrunPolicy;
use pipeline::{ChunkRing, ProducerConfig, ProducerControl, SampleProducer};

use crate::drdy::{BindingError, InterruptBinding};
use crate::error::BoardError;

/// Where the converter lives.
#[derive(Debug, Clone)]
pub enum AdcBackend {
    /// SPI and GPIO on the Raspberry Pi (`pi-hardware` feature)
    Hardware,
    /// In-process simulated converter
    Simulated {
        waveform: Waveform,
        /// Conversion rate override; `None` follows the configured OSR
        rate_hz: Option<u32>,
    },
}

/// Who holds the producer right now.
enum Binding {
    /// Producer parked, no data-ready handler installed
    Detached(SampleProducer),
    /// Producer running on the data-ready thread
    Attached(InterruptBinding),
    /// Shut down
    Closed,
}

/// The acquisition front end: initialised ADC, the producer that reads it and
/// the ring it fills. Data-ready edges are only handled while
/// [`attach`](Self::attach)ed.
pub struct AcquisitionNode {
    binding: Binding,
    control: ProducerControl,
    ring: Arc<ChunkRing>,
    sim: Option<SimHandle>,
    missed_edges: u64,
}

impl AcquisitionNode {
    /// Opens and initialises the ADC. The producer starts detached and
    /// disabled.
    pub fn bring_up(
        adc: AdcConfig,
        producer: &ProducerConfig,
        policy: OverrunPolicy,
        backend: AdcBackend,
    ) -> Result<Self, BoardError> {
        let (mut driver, sim) = open(adc, backend)?;
        driver.initialize()?;

        let ring = Arc::new(ChunkRing::new(policy));
        let (producer, control) = SampleProducer::new(driver, ring.clone(), producer)?;
        info!("Acquisition node up ({:?} overrun policy)", policy);

        Ok(Self {
            binding: Binding::Detached(producer),
            control,
            ring,
            sim,
            missed_edges: 0,
        })
    }

    /// Starts handling data-ready edges. Does nothing if already attached.
    pub fn attach(&mut self) -> Result<(), BoardError> {
        match std::mem::replace(&mut self.binding, Binding::Closed) {
            Binding::Detached(producer) => match InterruptBinding::attach(producer) {
                Ok(binding) => {
                    self.binding = Binding::Attached(binding);
                    Ok(())
                }
                Err(failed) => Err(self.park(failed)),
            },
            Binding::Attached(binding) => {
                self.binding = Binding::Attached(binding);
                Ok(())
            }
            Binding::Closed => Err(BoardError::Closed),
        }
    }

    /// Stops handling data-ready edges and parks the producer. Does nothing if
    /// not attached.
    pub fn detach(&mut self) -> Result<(), BoardError> {
        self.control.disable();
        match std::mem::replace(&mut self.binding, Binding::Closed) {
            Binding::Attached(binding) => {
                let missed = binding.missed_edges();
                if missed > 0 {
                    warn!("{} data-ready edges missed while attached", missed);
                }
                self.missed_edges += missed;
                match binding.detach() {
                    Ok(producer) => {
                        self.binding = Binding::Detached(producer);
                        Ok(())
                    }
                    Err(failed) => Err(self.park(failed)),
                }
            }
            other => {
                self.binding = other;
                Ok(())
            }
        }
    }

    /// Keeps whatever producer survived a failed attach or detach so the
    /// next session can try again.
    fn park(&mut self, failed: BindingError) -> BoardError {
        match failed.producer {
            Some(producer) => self.binding = Binding::Detached(producer),
            None => warn!("Producer lost with the data-ready thread; node closed"),
        }
        failed.error
    }

    pub fn is_attached(&self) -> bool {
        matches!(self.binding, Binding::Attached(_))
    }

    pub fn ring(&self) -> Arc<ChunkRing> {
        self.ring.clone()
    }

    pub fn producer_control(&self) -> ProducerControl {
        self.control.clone()
    }

    /// Handle to the simulated converter, when running without hardware.
    pub fn sim(&self) -> Option<&SimHandle> {
        self.sim.as_ref()
    }

    /// Edges dropped by every binding so far, including the current one.
    pub fn missed_edges(&self) -> u64 {
        let current = match &self.binding {
            Binding::Attached(binding) => binding.missed_edges(),
            _ => 0,
        };
        self.missed_edges + current
    }

    /// Detaches and puts the converter in standby. The node cannot be
    /// attached again afterwards.
    pub fn shutdown(&mut self) -> Result<(), BoardError> {
        let detached = self.detach();
        if let Binding::Detached(producer) = std::mem::replace(&mut self.binding, Binding::Closed) {
            let mut driver = producer.into_driver();
            if let Err(e) = driver.send_command(CMD_STANDBY) {
                warn!("Failed to put ADC in standby: {}", e);
            }
            info!("Acquisition node shut down");
        }
        detached
    }
}

impl Drop for AcquisitionNode {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            warn!("Acquisition node shutdown failed: {}", e);
        }
    }
}

fn open(
    adc: AdcConfig,
    backend: AdcBackend,
) -> Result<(Ads131m0xDriver, Option<SimHandle>), BoardError> {
    match backend {
        AdcBackend::Hardware => Ok((adc_sensor::open_hardware(adc)?, None)),
        AdcBackend::Simulated { waveform, rate_hz } => {
            let device = SimulatedAdc::new(adc.variant);
            let handle = device.handle();
            handle.set_waveform(waveform);
            handle.set_conversion_rate(rate_hz);
            Ok((device.into_driver(adc)?, Some(handle)))
        }
    }
}
