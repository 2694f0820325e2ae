//! Board-level integration: brings up the ADC and binds its data-ready
//! edges to the acquisition pipeline.

pub mod drdy;
pub mod error;
pub mod node;

pub use drdy::{BindingError, InterruptBinding};
pub use error::BoardError;
pub use node::{AcquisitionNode, AdcBackend};
