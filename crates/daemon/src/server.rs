//! Single-client TCP command server.

use std::future::Future;
use std::net::SocketAddr;

use node_types::Command;
use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tracing::{debug, error, info, warn};

use crate::config::NetworkConfig;
use crate::session::{Flow, SessionController, SessionError};

/// Pending connections the kernel queues while a client is being served.
const LISTEN_BACKLOG: u32 = 1;

pub struct Server {
    listener: TcpListener,
    session: SessionController,
    rx_buffer_size: usize,
}

impl Server {
    pub async fn bind(config: &NetworkConfig, session: SessionController) -> std::io::Result<Self> {
        let addr = SocketAddr::new(config.bind_address, config.port);
        let socket = if addr.is_ipv4() {
            TcpSocket::new_v4()?
        } else {
            TcpSocket::new_v6()?
        };
        socket.set_reuseaddr(true)?;
        socket.bind(addr)?;
        let listener = socket.listen(LISTEN_BACKLOG)?;
        info!("Listening on {}", listener.local_addr()?);
        Ok(Self {
            listener,
            session,
            rx_buffer_size: config.rx_buffer_size,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Serves clients one after another until `shutdown` completes, then
    /// finishes any recording in progress.
    ///
    /// Must run on the multi-threaded tokio runtime.
    pub async fn run(mut self, shutdown: impl Future<Output = ()>) -> Result<(), SessionError> {
        tokio::pin!(shutdown);
        let mut buffer = vec![0u8; self.rx_buffer_size];

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        info!("Client connected: {}", peer);
                        if let Err(e) = self.session.begin_session() {
                            error!("Cannot serve {}: {}", peer, e);
                            continue;
                        }
                        tokio::select! {
                            _ = &mut shutdown => {
                                info!("Shutdown while {} was connected", peer);
                                break;
                            }
                            result = serve_client(&mut self.session, stream, &mut buffer) => {
                                if let Err(e) = result {
                                    warn!("Client {} dropped: {}", peer, e);
                                }
                                self.session.end_session().await;
                                info!("Client disconnected: {}", peer);
                            }
                        }
                    }
                    Err(e) => error!("Accept failed: {}", e),
                },
            }
        }

        self.session.shutdown().await
    }
}

async fn serve_client(
    session: &mut SessionController,
    mut stream: TcpStream,
    buffer: &mut [u8],
) -> Result<(), SessionError> {
    loop {
        let n = stream.read(buffer).await?;
        if n == 0 {
            return Ok(());
        }

        for token in Command::parse_message(&buffer[..n]) {
            let Some(command) = token else {
                debug!("Ignoring unknown command {:?}", String::from_utf8_lossy(&buffer[..n]));
                continue;
            };
            debug!("Command '{}'", command.token());
            match session.handle(command, &mut stream).await {
                Ok(Flow::Continue) => {}
                Ok(Flow::Disconnect) => return Ok(()),
                Err(SessionError::Io(e)) => return Err(SessionError::Io(e)),
                Err(e) => warn!("Command '{}' rejected: {}", command.token(), e),
            }
        }
    }
}
