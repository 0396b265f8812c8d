//! TCP accept loop.
//!
//! The listener accepts inbound connections, registers each as a new
//! session and starts its disconnect monitor. Accept errors are logged and
//! the loop keeps going; only a bind failure is fatal.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::session::{monitor, SessionRegistry};

/// Pause after a failed accept before trying again.
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// Errors raised by the listener.
#[derive(Debug, Error)]
pub enum ListenerError {
    /// The listening endpoint could not be bound.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// A bound TCP listener that feeds a session registry.
pub struct Listener {
    listener: TcpListener,
    registry: Arc<SessionRegistry>,
}

impl Listener {
    /// Binds to `addr` (`host:port`).
    pub async fn bind(addr: &str, registry: Arc<SessionRegistry>) -> Result<Self, ListenerError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| ListenerError::Bind {
                addr: addr.to_string(),
                source,
            })?;

        tracing::info!(addr = %addr, "TCP listener bound");

        Ok(Self { listener, registry })
    }

    /// Returns the address the listener is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr, ListenerError> {
        Ok(self.listener.local_addr()?)
    }

    /// Accepts connections until `shutdown` is cancelled.
    ///
    /// Connections are registered in accept order, so IDs follow the order
    /// in which connections were accepted.
    pub async fn run(self, shutdown: CancellationToken) {
        loop {
            let accepted = tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::debug!("Accept loop stopping");
                    break;
                }
                accepted = self.listener.accept() => accepted,
            };

            match accepted {
                Ok((stream, peer)) => {
                    match self.registry.add(stream) {
                        Ok(session) => {
                            tracing::info!(
                                session_id = session.id(),
                                remote_addr = %peer,
                                "New connection"
                            );
                            monitor::spawn(Arc::clone(&self.registry), session);
                        }
                        Err(e) => {
                            tracing::error!(remote_addr = %peer, error = %e, "Failed to register connection");
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to accept connection");
                    tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
                }
            }
        }
    }
}
