//! TCP accept loop feeding connections into the manager.

use std::net::SocketAddr;
use std::sync::Arc;

use http::header::HeaderMap;
use parking_lot::Mutex;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::manager::Manager;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// TCP port to listen on (0 = OS-assigned).
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { port: 0 }
    }
}

/// Listens for device connections and hands each to the [`Manager`].
pub struct Server {
    manager: Arc<Manager>,
    port: u16,
    cancel: CancellationToken,
    local_addr: Mutex<Option<SocketAddr>>,
}

impl Server {
    pub fn new(config: ServerConfig, manager: Arc<Manager>) -> Arc<Self> {
        Arc::new(Self {
            manager,
            port: config.port,
            cancel: CancellationToken::new(),
            local_addr: Mutex::new(None),
        })
    }

    pub fn manager(&self) -> &Arc<Manager> {
        &self.manager
    }

    /// The bound address; available once [`run`](Self::run) has bound the
    /// socket.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock()
    }

    /// The listening port (0 if not yet bound).
    pub fn port(&self) -> u16 {
        self.local_addr().map(|addr| addr.port()).unwrap_or(0)
    }

    /// Stops the accept loop and requests closure of every live session.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// Runs the accept loop until [`shutdown`](Self::shutdown).
    pub async fn run(self: &Arc<Self>) -> Result<(), std::io::Error> {
        let addr: SocketAddr = ([0, 0, 0, 0], self.port).into();
        let listener = TcpListener::bind(addr).await?;

        let local_addr = listener.local_addr()?;
        *self.local_addr.lock() = Some(local_addr);
        info!("device hub listening on {local_addr}");

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    info!("device hub shutting down");
                    self.manager.disconnect_if(|_| true);
                    break Ok(());
                }

                accepted = listener.accept() => match accepted {
                    Ok((stream, peer_addr)) => {
                        let manager = Arc::clone(&self.manager);
                        tokio::spawn(async move {
                            if let Err(err) = manager.connect(stream, HeaderMap::new()).await {
                                warn!(%peer_addr, error = %err, "device connection failed");
                            }
                        });
                    }
                    Err(err) => {
                        error!("accept error: {err}");
                    }
                }
            }
        }
    }
}
