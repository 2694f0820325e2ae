use adc_sensor::DriverError;
use pipeline::PipelineError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BoardError {
    #[error("Driver error: {0}")]
    Driver(#[from] DriverError),

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    #[error("Failed to spawn data-ready thread: {0}")]
    ThreadSpawn(#[source] std::io::Error),

    #[error("Data-ready thread panicked")]
    ThreadPanicked,

    #[error("Acquisition node is shut down")]
    Closed,
}
