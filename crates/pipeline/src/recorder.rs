//! Start/stop sequencing of a recording across the producer, the ring, the
//! writer thread and the recording file.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Local};
use tracing::{debug, error, info, warn};

use node_types::REC_ADC_CHUNK;

use crate::error::{PipelineError, PipelineResult, StorageError};
use crate::producer::ProducerControl;
use crate::ring::ChunkRing;
use crate::storage::{RecordingConfig, RecordingStore, SharedSink};
use crate::writer::RecordingWriter;

/// End-of-recording report. Logged by the session; never written into the
/// recording itself.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordingSummary {
    pub path: PathBuf,
    pub started_at: DateTime<Local>,
    pub duration: Duration,
    pub samples: u64,
    /// Samples refused because the writer had not freed a chunk in time
    pub dropped_samples: u64,
    /// Undrained chunks reused by the producer
    pub overwritten_chunks: u64,
    pub read_errors: u64,
    /// Data-ready edges that took longer than the latency budget
    pub over_budget_edges: u64,
    pub write_errors: u64,
    /// Chunks the producer reused while the writer was reading them
    pub torn_chunks: u64,
    /// Whether the writer drained every sealed chunk before the stop timeout
    pub writer_caught_up: bool,
}

impl RecordingSummary {
    /// Average samples per second over the recording.
    pub fn rate_hz(&self) -> f64 {
        let secs = self.duration.as_secs_f64();
        if secs > 0.0 {
            self.samples as f64 / secs
        } else {
            0.0
        }
    }

    /// True if any sample was lost or corrupted on the way to the file.
    pub fn lost_data(&self) -> bool {
        self.dropped_samples > 0
            || self.overwritten_chunks > 0
            || self.read_errors > 0
            || self.write_errors > 0
            || self.torn_chunks > 0
    }
}

impl fmt::Display for RecordingSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} samples in {:.3} s ({:.1} Hz), dropped {}, overwritten chunks {}, read errors {}",
            self.samples,
            self.duration.as_secs_f64(),
            self.rate_hz(),
            self.dropped_samples,
            self.overwritten_chunks,
            self.read_errors
        )
    }
}

/// Drives one recording at a time.
pub struct Recorder {
    ring: Arc<ChunkRing>,
    sink: SharedSink,
    store: RecordingStore,
    writer: RecordingWriter,
    producer: ProducerControl,
    stop_timeout: Duration,
    partial: Vec<i32>,
    recording: bool,
}

impl Recorder {
    pub fn new(config: &RecordingConfig, ring: Arc<ChunkRing>, producer: ProducerControl) -> Self {
        let sink = SharedSink::new();
        Self {
            writer: RecordingWriter::new(ring.clone(), sink.clone()),
            ring,
            sink,
            store: RecordingStore::new(config),
            producer,
            stop_timeout: Duration::from_millis(config.stop_timeout_ms),
            partial: Vec::with_capacity(REC_ADC_CHUNK),
            recording: false,
        }
    }

    pub fn is_recording(&self) -> bool {
        self.recording
    }

    pub fn store(&self) -> &RecordingStore {
        &self.store
    }

    #[cfg(test)]
    pub(crate) fn sink(&self) -> &SharedSink {
        &self.sink
    }

    /// Begins a new recording: clears the ring, resyncs the converter, opens
    /// the file and enables the producer and the writer.
    pub fn start(&mut self) -> PipelineResult<()> {
        if self.recording {
            return Err(PipelineError::AlreadyRecording);
        }

        self.producer.disable();
        self.producer.wait_idle(self.stop_timeout);
        self.writer.disarm();
        self.ring.reset();
        self.writer.reset();
        self.producer.reset_stats();

        self.producer.pulse_sync();
        let file = self.store.create()?;
        *self.sink.lock() = Some(file);

        self.producer.enable();
        if let Err(e) = self.writer.arm() {
            self.producer.disable();
            self.sink.lock().take();
            return Err(e);
        }

        self.recording = true;
        info!("Recording started into {}", self.store.part_path().display());
        Ok(())
    }

    /// Ends the recording: stops the producer, lets the writer catch up,
    /// writes whatever it did not get to plus the partial chunk, appends the
    /// end marker and publishes the file.
    pub async fn stop(&mut self) -> PipelineResult<RecordingSummary> {
        if !self.recording {
            return Err(PipelineError::NotRecording);
        }

        // A stop cancelled at the await below can be issued again.
        self.producer.disable();
        if !self.producer.wait_idle(self.stop_timeout) {
            warn!("Data-ready handler still busy after {:?}", self.stop_timeout);
        }

        let sealed = self.ring.sealed_count();
        let caught_up = self.writer.wait_drained(sealed, self.stop_timeout).await;
        self.writer.disarm();
        if !caught_up {
            warn!(
                "Writer drained {} of {} chunks before the stop timeout",
                self.writer.drained(),
                sealed
            );
        }

        self.recording = false;
        let mut file = self
            .sink
            .lock()
            .take()
            .ok_or(PipelineError::NotRecording)?;

        // Every sealed chunk is released even when the file stops taking
        // writes, so the next start finds an empty ring.
        let mut failure: Option<StorageError> = None;
        let mut stop_write_errors = 0;
        let mut chunk = [0i32; REC_ADC_CHUNK];
        let mut leftover = 0;
        while let Some(ready) = self.ring.peek_ready() {
            self.ring.read_chunk(ready, &mut chunk);
            if let Err(e) = file.write_samples(&chunk) {
                stop_write_errors += 1;
                failure.get_or_insert(e);
            }
            self.ring.release(ready);
            leftover += 1;
        }
        if leftover > 0 {
            debug!("Stop wrote {} chunks the writer had not reached", leftover);
        }

        self.ring.read_partial(&mut self.partial);
        if let Err(e) = file.write_samples(&self.partial) {
            stop_write_errors += 1;
            failure.get_or_insert(e);
        }
        let finished = match file.finish() {
            Ok(finished) => finished,
            Err(e) => {
                error!(
                    "Recording could not be published ({} write errors during stop): {}",
                    stop_write_errors, e
                );
                return Err(failure.unwrap_or(e).into());
            }
        };
        if let Some(e) = failure {
            warn!("{} writes failed during stop, first: {}", stop_write_errors, e);
        }

        let ring = self.ring.stats();
        let producer = self.producer.stats();
        let writer = self.writer.stats();
        let summary = RecordingSummary {
            path: finished.path,
            started_at: finished.started_at,
            duration: finished.duration,
            samples: finished.samples,
            dropped_samples: ring.samples_dropped,
            overwritten_chunks: ring.chunks_overwritten,
            read_errors: producer.read_errors,
            over_budget_edges: producer.over_budget,
            write_errors: writer.write_errors + stop_write_errors,
            torn_chunks: writer.torn_chunks,
            writer_caught_up: caught_up,
        };
        info!("Recording stopped: {}", summary);
        if summary.lost_data() {
            warn!("Recording {} lost data", summary.path.display());
        }
        Ok(summary)
    }

    /// Stops the writer thread. An active recording is left unpublished.
    pub fn shutdown(&mut self) -> PipelineResult<()> {
        self.producer.disable();
        self.writer.shutdown()
    }
}
