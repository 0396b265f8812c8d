//! Disconnect monitor.
//!
//! Every registered session gets one monitor task. The monitor is the only
//! reader of its connection: it reads to detect end-of-stream, forwards the
//! payload to an attached bridge if there is one and discards it otherwise.
//! When the connection ends or fails it removes its own session from the
//! registry.

use std::sync::Arc;

use bytes::Bytes;
use tokio::io::AsyncReadExt;
use tokio::task::JoinHandle;

use super::registry::{SessionReader, SessionRegistry};

/// Buffer size for reading from the connection.
const READ_BUFFER_SIZE: usize = 4096;

/// Why a monitor stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorExit {
    /// The remote end closed the connection.
    EndOfStream,
    /// Reading from the connection failed.
    ReadError,
    /// The session was closed through the registry.
    Closed,
}

/// Spawns the disconnect monitor for a freshly registered session.
pub fn spawn(registry: Arc<SessionRegistry>, session: SessionReader) -> JoinHandle<MonitorExit> {
    tokio::spawn(run(registry, session))
}

/// Runs the monitor to completion.
pub async fn run(registry: Arc<SessionRegistry>, session: SessionReader) -> MonitorExit {
    let SessionReader {
        id,
        remote_addr,
        mut reader,
        tap,
        closed,
    } = session;

    let mut buffer = vec![0u8; READ_BUFFER_SIZE];

    let exit = loop {
        let read = tokio::select! {
            biased;
            _ = closed.cancelled() => break MonitorExit::Closed,
            read = reader.read(&mut buffer) => read,
        };

        match read {
            Ok(0) => {
                tracing::info!(session_id = id, remote_addr = %remote_addr, "Client disconnected");
                break MonitorExit::EndOfStream;
            }
            Ok(n) => {
                let Some(tx) = tap.sender() else {
                    continue;
                };
                let chunk = Bytes::copy_from_slice(&buffer[..n]);
                tokio::select! {
                    biased;
                    _ = closed.cancelled() => break MonitorExit::Closed,
                    sent = tx.send(chunk) => {
                        if sent.is_err() {
                            tracing::trace!(session_id = id, "Bridge detached, dropping output");
                        }
                    }
                }
            }
            Err(e) => {
                if !closed.is_cancelled() {
                    tracing::warn!(
                        session_id = id,
                        remote_addr = %remote_addr,
                        error = %e,
                        "Error reading from client"
                    );
                }
                break MonitorExit::ReadError;
            }
        }
    };

    drop(reader);

    if exit != MonitorExit::Closed {
        match registry.remove(id).await {
            Ok(Some(_)) => {}
            Ok(None) => {
                tracing::debug!(session_id = id, "Session already removed");
            }
            Err(e) => {
                tracing::warn!(session_id = id, error = %e, "Failed to close disconnected session");
            }
        }
    }

    tracing::debug!(session_id = id, exit = ?exit, "Disconnect monitor stopped");
    exit
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::MemoryConnection;
    use std::time::Duration;
    use tokio::io::AsyncWriteExt;
    use tokio::time::timeout;

    #[tokio::test]
    async fn test_monitor_removes_session_on_eof() {
        let registry = Arc::new(SessionRegistry::new());
        let (conn, peer) = MemoryConnection::pair("a:1");
        let session = registry.add(conn).unwrap();
        let id = session.id();
        let monitor = spawn(Arc::clone(&registry), session);

        drop(peer);

        let exit = timeout(Duration::from_secs(2), monitor).await.unwrap().unwrap();
        assert_eq!(exit, MonitorExit::EndOfStream);
        assert!(!registry.contains(id));
    }

    #[tokio::test]
    async fn test_monitor_removes_only_its_own_session() {
        let registry = Arc::new(SessionRegistry::new());

        let (conn1, peer1) = MemoryConnection::pair("a:1");
        let session1 = registry.add(conn1).unwrap();
        let monitor1 = spawn(Arc::clone(&registry), session1);

        let (conn2, _peer2) = MemoryConnection::pair("b:2");
        let session2 = registry.add(conn2).unwrap();
        let id2 = session2.id();
        let _monitor2 = spawn(Arc::clone(&registry), session2);

        drop(peer1);
        timeout(Duration::from_secs(2), monitor1).await.unwrap().unwrap();

        assert_eq!(registry.count(), 1);
        assert!(registry.contains(id2));
    }

    #[tokio::test]
    async fn test_monitor_discards_output_when_detached() {
        let registry = Arc::new(SessionRegistry::new());
        let (conn, mut peer) = MemoryConnection::pair("a:1");
        let session = registry.add(conn).unwrap();
        let id = session.id();
        let _monitor = spawn(Arc::clone(&registry), session);

        peer.write_all(b"noise before attach").await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let mut attachment = registry.get(id).unwrap().attach().unwrap();
        peer.write_all(b"hello").await.unwrap();

        let chunk = timeout(Duration::from_secs(1), attachment.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(&chunk[..], b"hello");
        assert!(registry.contains(id));
    }

    #[tokio::test]
    async fn test_monitor_stops_after_kill() {
        let registry = Arc::new(SessionRegistry::new());
        let (conn, _peer) = MemoryConnection::pair("a:1");
        let session = registry.add(conn).unwrap();
        let id = session.id();
        let monitor = spawn(Arc::clone(&registry), session);

        registry.remove(id).await.unwrap();

        let exit = timeout(Duration::from_secs(2), monitor).await.unwrap().unwrap();
        assert_eq!(exit, MonitorExit::Closed);
        assert_eq!(registry.count(), 0);
    }
}
