//! Shared types for the acquisition node
//!
//! This crate contains the small set of types passed between the ADC driver,
//! the acquisition pipeline and the session daemon: decoded samples, the
//! device variant and the client command set.

pub mod config;
pub mod data;
pub mod comms;

// Re-export commonly used types
pub use config::*;
pub use data::*;
pub use comms::*;
