//! Binds the ADC's data-ready edges to a [`SampleProducer`].
//!
//! The edge callback only pushes a token into a bounded flume channel. A
//! dedicated thread at maximum priority receives the tokens and runs the
//! producer, so the SPI read never happens in the GPIO callback context.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{debug, error, info, warn};
use pipeline::SampleProducer;
use thread_priority::ThreadPriority;

use crate::error::BoardError;

/// Pending edges the acquisition thread may lag behind by.
const EDGE_QUEUE_DEPTH: usize = 16;

/// How often the acquisition thread checks its stop flag when no edge comes.
const EDGE_TIMEOUT: Duration = Duration::from_millis(100);

/// A failed [`InterruptBinding::attach`] or [`InterruptBinding::detach`].
/// Carries the producer back unless the acquisition thread took it down
/// with a panic.
pub struct BindingError {
    pub error: BoardError,
    pub producer: Option<SampleProducer>,
}

impl BindingError {
    fn new(error: impl Into<BoardError>, producer: SampleProducer) -> Self {
        Self {
            error: error.into(),
            producer: Some(producer),
        }
    }

    fn lost(error: BoardError) -> Self {
        Self {
            error,
            producer: None,
        }
    }
}

/// A producer wired to data-ready edges. Dropping the binding without
/// calling [`detach`](Self::detach) stops the thread and loses the producer.
pub struct InterruptBinding {
    stop: Arc<AtomicBool>,
    missed_edges: Arc<AtomicU64>,
    thread: Option<JoinHandle<Option<SampleProducer>>>,
}

impl InterruptBinding {
    /// Installs the edge callback on the producer's driver and starts the
    /// acquisition thread.
    pub fn attach(mut producer: SampleProducer) -> Result<Self, BindingError> {
        let (edge_tx, edge_rx) = flume::bounded::<()>(EDGE_QUEUE_DEPTH);
        let missed_edges = Arc::new(AtomicU64::new(0));

        let missed = missed_edges.clone();
        let registered = producer
            .driver_mut()
            .attach_data_ready(Box::new(move || {
                if edge_tx.try_send(()).is_err() {
                    missed.fetch_add(1, Ordering::Relaxed);
                }
            }));
        if let Err(e) = registered {
            return Err(BindingError::new(e, producer));
        }
        info!("Data-ready interrupt handler registered");

        // The producer only moves to the thread once it exists.
        let (handoff_tx, handoff_rx) = flume::bounded::<SampleProducer>(1);
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = stop.clone();
        let spawned = thread::Builder::new()
            .name("adc_drdy".into())
            .spawn(move || {
                let mut producer = handoff_rx.recv().ok()?;
                if let Err(e) = thread_priority::set_current_thread_priority(ThreadPriority::Max) {
                    warn!("Failed to set data-ready thread priority: {:?}", e);
                }
                debug!("Data-ready thread started");

                while !stop_flag.load(Ordering::Acquire) {
                    match edge_rx.recv_timeout(EDGE_TIMEOUT) {
                        Ok(()) => {
                            producer.on_data_ready();
                        }
                        Err(flume::RecvTimeoutError::Timeout) => continue,
                        Err(flume::RecvTimeoutError::Disconnected) => {
                            error!("Data-ready channel disconnected. Stopping data-ready thread.");
                            break;
                        }
                    }
                }
                debug!("Data-ready thread shutting down");
                Some(producer)
            });

        let thread = match spawned {
            Ok(thread) => thread,
            Err(e) => {
                release_edges(&mut producer);
                return Err(BindingError::new(BoardError::ThreadSpawn(e), producer));
            }
        };
        if let Err(flume::SendError(mut producer)) = handoff_tx.send(producer) {
            stop.store(true, Ordering::Release);
            let _ = thread.join();
            release_edges(&mut producer);
            return Err(BindingError::new(BoardError::ThreadPanicked, producer));
        }

        Ok(Self {
            stop,
            missed_edges,
            thread: Some(thread),
        })
    }

    /// Edges dropped because the acquisition thread fell more than
    /// `EDGE_QUEUE_DEPTH` edges behind.
    pub fn missed_edges(&self) -> u64 {
        self.missed_edges.load(Ordering::Relaxed)
    }

    /// Stops the thread, removes the edge callback and hands the producer
    /// back. A callback that cannot be removed still returns the producer
    /// inside the error.
    pub fn detach(mut self) -> Result<SampleProducer, BindingError> {
        self.stop.store(true, Ordering::Release);
        let thread = self
            .thread
            .take()
            .ok_or(BindingError::lost(BoardError::ThreadPanicked))?;
        let mut producer = match thread.join() {
            Ok(Some(producer)) => producer,
            _ => return Err(BindingError::lost(BoardError::ThreadPanicked)),
        };
        if let Err(e) = producer.detach() {
            return Err(BindingError::new(e, producer));
        }
        info!("Data-ready interrupt handler removed");
        Ok(producer)
    }
}

fn release_edges(producer: &mut SampleProducer) {
    if let Err(e) = producer.detach() {
        warn!("Failed to remove data-ready handler: {}", e);
    }
}

impl Drop for InterruptBinding {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(thread) = self.thread.take() {
            match thread.join() {
                Ok(Some(mut producer)) => release_edges(&mut producer),
                Ok(None) => {}
                Err(_) => error!("Data-ready thread panicked"),
            }
        }
    }
}
