//! Background recording writer.
//!
//! A dedicated thread drains sealed chunks from the ring into the shared
//! recording file while the writer is armed. After each chunk it publishes
//! the sequence number of the last drained chunk on a watch channel, which is
//! what a stop waits on before it takes over the file.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use node_types::REC_ADC_CHUNK;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::error::{PipelineError, PipelineResult};
use crate::ring::{ChunkRing, ReadyChunk};
use crate::storage::SharedSink;

/// How long the writer sleeps when armed and no chunk is ready.
const POLL_INTERVAL: Duration = Duration::from_millis(1);

enum WriterCommand {
    Arm,
    Shutdown,
}

/// Counter snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriterStats {
    pub chunks_drained: u64,
    pub samples_written: u64,
    pub write_errors: u64,
    /// Chunks reused by the producer while they were being written
    pub torn_chunks: u64,
}

#[derive(Debug)]
struct Shared {
    armed: AtomicBool,
    chunks_drained: AtomicU64,
    samples_written: AtomicU64,
    write_errors: AtomicU64,
    torn_chunks: AtomicU64,
    drained_tx: watch::Sender<u64>,
}

pub struct RecordingWriter {
    ring: Arc<ChunkRing>,
    sink: SharedSink,
    shared: Arc<Shared>,
    drained_rx: watch::Receiver<u64>,
    cmd_tx: Option<flume::Sender<WriterCommand>>,
    thread: Option<JoinHandle<()>>,
}

impl RecordingWriter {
    /// The thread is not started until the first [`arm`](Self::arm).
    pub fn new(ring: Arc<ChunkRing>, sink: SharedSink) -> Self {
        let (drained_tx, drained_rx) = watch::channel(0);
        Self {
            ring,
            sink,
            shared: Arc::new(Shared {
                armed: AtomicBool::new(false),
                chunks_drained: AtomicU64::new(0),
                samples_written: AtomicU64::new(0),
                write_errors: AtomicU64::new(0),
                torn_chunks: AtomicU64::new(0),
                drained_tx,
            }),
            drained_rx,
            cmd_tx: None,
            thread: None,
        }
    }

    /// Starts draining, spawning the thread on first use.
    pub fn arm(&mut self) -> PipelineResult<()> {
        self.shared.armed.store(true, Ordering::Release);
        if self.thread.is_none() {
            self.spawn()?;
        }
        if let Some(tx) = &self.cmd_tx {
            // A full or closed channel only means the thread is already awake
            // or gone; the armed flag carries the state.
            let _ = tx.try_send(WriterCommand::Arm);
        }
        Ok(())
    }

    /// Stops draining. Once this returns, the writer will not start another
    /// chunk; one already in progress finishes under the sink lock.
    pub fn disarm(&self) {
        self.shared.armed.store(false, Ordering::Release);
    }

    pub fn is_armed(&self) -> bool {
        self.shared.armed.load(Ordering::Acquire)
    }

    pub fn is_spawned(&self) -> bool {
        self.thread.is_some()
    }

    /// Waits until every chunk up to sequence number `sealed` has been
    /// drained, or `timeout` passes. Returns whether the writer caught up.
    pub async fn wait_drained(&self, sealed: u64, timeout: Duration) -> bool {
        let mut rx = self.drained_rx.clone();
        let caught_up = matches!(
            tokio::time::timeout(timeout, rx.wait_for(|&drained| drained >= sealed)).await,
            Ok(Ok(_))
        );
        caught_up
    }

    /// Sequence number of the last chunk the writer drained.
    pub fn drained(&self) -> u64 {
        *self.drained_rx.borrow()
    }

    /// Zeroes counters and the drained sequence, for a new recording.
    pub fn reset(&self) {
        self.shared.chunks_drained.store(0, Ordering::Relaxed);
        self.shared.samples_written.store(0, Ordering::Relaxed);
        self.shared.write_errors.store(0, Ordering::Relaxed);
        self.shared.torn_chunks.store(0, Ordering::Relaxed);
        self.shared.drained_tx.send_replace(0);
    }

    pub fn stats(&self) -> WriterStats {
        WriterStats {
            chunks_drained: self.shared.chunks_drained.load(Ordering::Relaxed),
            samples_written: self.shared.samples_written.load(Ordering::Relaxed),
            write_errors: self.shared.write_errors.load(Ordering::Relaxed),
            torn_chunks: self.shared.torn_chunks.load(Ordering::Relaxed),
        }
    }

    /// Stops the thread and waits for it.
    pub fn shutdown(&mut self) -> PipelineResult<()> {
        self.disarm();
        if let Some(tx) = self.cmd_tx.take() {
            let _ = tx.send(WriterCommand::Shutdown);
        }
        if let Some(handle) = self.thread.take() {
            handle
                .join()
                .map_err(|_| PipelineError::ThreadPanicked("rec_writer"))?;
            debug!("Recording writer thread stopped");
        }
        Ok(())
    }

    fn spawn(&mut self) -> PipelineResult<()> {
        let (cmd_tx, cmd_rx) = flume::bounded(4);
        let worker = Worker {
            ring: self.ring.clone(),
            sink: self.sink.clone(),
            shared: self.shared.clone(),
            buffer: [0; REC_ADC_CHUNK],
        };
        let handle = thread::Builder::new()
            .name("rec_writer".into())
            .spawn(move || worker.run(cmd_rx))
            .map_err(|source| PipelineError::ThreadSpawn {
                name: "rec_writer",
                source,
            })?;
        info!("Recording writer thread started");
        self.cmd_tx = Some(cmd_tx);
        self.thread = Some(handle);
        Ok(())
    }
}

impl Drop for RecordingWriter {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            warn!("Recording writer shutdown failed: {}", e);
        }
    }
}

struct Worker {
    ring: Arc<ChunkRing>,
    sink: SharedSink,
    shared: Arc<Shared>,
    buffer: [i32; REC_ADC_CHUNK],
}

impl Worker {
    fn run(mut self, commands: flume::Receiver<WriterCommand>) {
        loop {
            if !self.shared.armed.load(Ordering::Acquire) {
                match commands.recv() {
                    Ok(WriterCommand::Arm) => continue,
                    Ok(WriterCommand::Shutdown) | Err(_) => break,
                }
            }

            match self.ring.peek_ready() {
                Some(ready) => self.drain(ready),
                None => match commands.recv_timeout(POLL_INTERVAL) {
                    Ok(WriterCommand::Shutdown) | Err(flume::RecvTimeoutError::Disconnected) => {
                        break
                    }
                    Ok(WriterCommand::Arm) | Err(flume::RecvTimeoutError::Timeout) => {}
                },
            }
        }
    }

    fn drain(&mut self, ready: ReadyChunk) {
        let mut sink = self.sink.lock();
        if !self.shared.armed.load(Ordering::Acquire) {
            return;
        }

        self.ring.read_chunk(ready, &mut self.buffer);
        if let Some(file) = sink.as_mut() {
            let result = file
                .write_samples(&self.buffer)
                .and_then(|_| file.flush());
            match result {
                Ok(()) => {
                    self.shared
                        .samples_written
                        .fetch_add(REC_ADC_CHUNK as u64, Ordering::Relaxed);
                }
                Err(e) => {
                    self.shared.write_errors.fetch_add(1, Ordering::Relaxed);
                    error!("Failed to write chunk {}: {}", ready.seq, e);
                }
            }
        }

        if !self.ring.release(ready) {
            self.shared.torn_chunks.fetch_add(1, Ordering::Relaxed);
        }
        self.shared.chunks_drained.fetch_add(1, Ordering::Relaxed);
        self.shared
            .drained_tx
            .send_modify(|drained| *drained = (*drained).max(ready.seq));
    }
}
