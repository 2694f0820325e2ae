//! Acquisition node daemon: ADC bring-up, recording session and the TCP
//! command server.

pub mod config;
pub mod server;
pub mod session;

use boards::{AcquisitionNode, AdcBackend};
use pipeline::Recorder;

use crate::config::DaemonConfig;
use crate::session::SessionController;

/// Brings up the acquisition node and hands it, together with a recorder
/// over its ring, to a new session controller.
pub fn assemble(config: &DaemonConfig, backend: AdcBackend) -> anyhow::Result<SessionController> {
    let node = AcquisitionNode::bring_up(
        config.adc.clone(),
        &config.producer,
        config.recording.overrun_policy,
        backend,
    )?;
    let recorder = Recorder::new(&config.recording, node.ring(), node.producer_control());
    Ok(SessionController::new(node, recorder))
}
