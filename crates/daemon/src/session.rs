//! Command handling for the remote controller.
//!
//! One client is served at a time. Commands arrive as single-letter tokens:
//! `s` starts a recording, `n` stops it, `r` streams the last completed
//! recording back and `x` ends the session. Start and stop are fire and
//! forget: the client gets no reply, misuse is only logged.
//!
//! Binding the data-ready handler, starting a recording and tearing the node
//! down block the calling thread, so they run under
//! [`block_in_place`](tokio::task::block_in_place). The session must be driven
//! from a multi-threaded tokio runtime.

use boards::{AcquisitionNode, BoardError};
use node_types::Command;
use pipeline::{PipelineError, Recorder, RecordingSummary};
use thiserror::Error;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::task::block_in_place;
use tracing::{info, warn};

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("A recording is already in progress")]
    AlreadyRecording,

    #[error("No recording in progress")]
    NotRecording,

    #[error("Recording pipeline error: {0}")]
    Pipeline(PipelineError),

    #[error("Acquisition node error: {0}")]
    Board(#[from] BoardError),

    #[error("Client I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<PipelineError> for SessionError {
    fn from(err: PipelineError) -> Self {
        match err {
            PipelineError::AlreadyRecording => SessionError::AlreadyRecording,
            PipelineError::NotRecording => SessionError::NotRecording,
            other => SessionError::Pipeline(other),
        }
    }
}

/// What the connection loop should do after a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Disconnect,
}

/// Session state machine. Owns the acquisition node and the recorder; the
/// recording state is the recorder's. Data-ready edges are handled only while
/// a client is connected.
pub struct SessionController {
    node: AcquisitionNode,
    recorder: Recorder,
    last_summary: Option<RecordingSummary>,
}

impl SessionController {
    pub fn new(node: AcquisitionNode, recorder: Recorder) -> Self {
        Self {
            node,
            recorder,
            last_summary: None,
        }
    }

    /// Called when a client connects: binds the data-ready handler.
    pub fn begin_session(&mut self) -> Result<(), SessionError> {
        block_in_place(|| self.node.attach())?;
        Ok(())
    }

    pub fn is_attached(&self) -> bool {
        self.node.is_attached()
    }

    pub fn is_recording(&self) -> bool {
        self.recorder.is_recording()
    }

    /// Summary of the most recent completed recording.
    pub fn last_summary(&self) -> Option<&RecordingSummary> {
        self.last_summary.as_ref()
    }

    /// Executes one command. Replies, if any, go to `client`.
    pub async fn handle<W>(&mut self, command: Command, client: &mut W) -> Result<Flow, SessionError>
    where
        W: AsyncWrite + Unpin,
    {
        match command {
            Command::Start => {
                block_in_place(|| self.recorder.start())?;
                Ok(Flow::Continue)
            }
            Command::Stop => {
                self.stop().await?;
                Ok(Flow::Continue)
            }
            Command::Retrieve => {
                self.retrieve(client).await?;
                Ok(Flow::Continue)
            }
            Command::Disconnect => {
                self.end_session().await;
                Ok(Flow::Disconnect)
            }
        }
    }

    async fn stop(&mut self) -> Result<(), SessionError> {
        let summary = self.recorder.stop().await?;
        self.last_summary = Some(summary);
        Ok(())
    }

    /// Streams the completed recording, or a one-line error if there is none.
    async fn retrieve<W>(&mut self, client: &mut W) -> Result<(), SessionError>
    where
        W: AsyncWrite + Unpin,
    {
        let store = self.recorder.store();
        match store.open_completed() {
            Ok(file) => {
                let mut file = tokio::fs::File::from_std(file);
                let sent = tokio::io::copy(&mut file, client).await?;
                info!("Sent {} bytes of {}", sent, store.completed_path().display());
            }
            Err(e) => {
                warn!("Retrieve failed: {}", e);
                client.write_all(format!("ERROR: {}\n", e).as_bytes()).await?;
            }
        }
        client.flush().await?;
        Ok(())
    }

    /// Called when the client leaves, by `x` or by closing the connection.
    /// A recording in progress is finished as if `n` had been sent, then the
    /// data-ready handler is unbound.
    pub async fn end_session(&mut self) {
        if self.recorder.is_recording() {
            info!("Client left while recording; stopping");
            if let Err(e) = self.stop().await {
                warn!("Implicit stop failed: {}", e);
            }
        }
        if let Err(e) = block_in_place(|| self.node.detach()) {
            warn!("Failed to unbind data-ready handler: {}", e);
        }
    }

    /// Stops any recording, the writer thread and the acquisition node.
    pub async fn shutdown(&mut self) -> Result<(), SessionError> {
        self.end_session().await;
        block_in_place(|| self.recorder.shutdown())?;
        let missed = self.node.missed_edges();
        if missed > 0 {
            warn!("{} data-ready edges were missed in total", missed);
        }
        block_in_place(|| self.node.shutdown())?;
        Ok(())
    }
}
