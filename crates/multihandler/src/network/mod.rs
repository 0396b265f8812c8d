//! Network module for inbound connections.
//!
//! This module provides:
//! - The [`Connection`] capability trait that sessions are built on
//! - A TCP implementation backed by `tokio::net::TcpStream`
//! - An in-memory implementation for tests and embedding
//! - The accept loop that registers new connections as sessions

pub mod listener;
pub mod memory;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;

/// Read half of a connection.
pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;

/// Write half of a connection.
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// A trait representing a raw bidirectional byte stream.
///
/// A connection is split once when it is registered: the read half goes to
/// the session's disconnect monitor, the write half stays with the registry
/// entry. Closing is done through the write half (`shutdown`) together with
/// cancelling the monitor.
pub trait Connection: Send + 'static {
    /// Returns a printable description of the remote endpoint.
    fn remote_addr(&self) -> String;

    /// Splits the connection into independently owned read and write halves.
    fn into_split(self: Box<Self>) -> (BoxedReader, BoxedWriter);
}

impl Connection for TcpStream {
    fn remote_addr(&self) -> String {
        self.peer_addr()
            .map(|addr| addr.to_string())
            .unwrap_or_else(|_| "unknown".to_string())
    }

    fn into_split(self: Box<Self>) -> (BoxedReader, BoxedWriter) {
        let (read_half, write_half) = TcpStream::into_split(*self);
        (Box::new(read_half), Box::new(write_half))
    }
}

// Re-export key types
pub use listener::{Listener, ListenerError};
pub use memory::MemoryConnection;
