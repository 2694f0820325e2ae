//! Acquisition pipeline for the ADC node
//!
//! Samples flow from the data-ready handler ([`producer`]) through a fixed
//! ring of chunks ([`ring`]) to a background thread ([`writer`]) that appends
//! them to the recording file ([`storage`]). [`recorder`] sequences starting
//! and stopping a recording across all of them.

pub mod error;
pub mod producer;
pub mod recorder;
pub mod ring;
pub mod storage;
pub mod writer;

#[cfg(test)]
mod tests;

// Re-export commonly used types
pub use error::*;
pub use producer::{EdgeOutcome, ProducerConfig, ProducerControl, ProducerStats, SampleProducer};
pub use recorder::{Recorder, RecordingSummary};
pub use ring::{ChunkRing, PushOutcome, ReadyChunk, RingStats};
pub use storage::{FinishedRecording, RecordingConfig, RecordingFile, RecordingStore, SharedSink};
pub use writer::{RecordingWriter, WriterStats};
