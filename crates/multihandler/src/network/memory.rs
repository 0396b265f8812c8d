//! In-memory connections.

use tokio::io::{self, DuplexStream};

use super::{BoxedReader, BoxedWriter, Connection};

/// Buffer size of each direction of the in-memory pipe.
const DUPLEX_BUFFER_SIZE: usize = 64 * 1024;

/// A connection backed by a `tokio::io::duplex` pipe.
///
/// The other end of the pipe plays the role of the remote peer: bytes
/// written to it arrive on the session and bytes the session writes can be
/// read from it. Dropping the peer end is observed as end-of-stream.
pub struct MemoryConnection {
    stream: DuplexStream,
    remote_addr: String,
}

impl MemoryConnection {
    /// Creates a connection labelled with `remote_addr` and returns it with
    /// the peer end of the pipe.
    pub fn pair(remote_addr: impl Into<String>) -> (Self, DuplexStream) {
        let (local, peer) = io::duplex(DUPLEX_BUFFER_SIZE);
        let connection = Self {
            stream: local,
            remote_addr: remote_addr.into(),
        };
        (connection, peer)
    }
}

impl Connection for MemoryConnection {
    fn remote_addr(&self) -> String {
        self.remote_addr.clone()
    }

    fn into_split(self: Box<Self>) -> (BoxedReader, BoxedWriter) {
        let (read_half, write_half) = io::split(self.stream);
        (Box::new(read_half), Box::new(write_half))
    }
}

/// Write-half operation that a [`FaultyConnection`] refuses.
#[cfg(test)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Fault {
    Write,
    Shutdown,
}

/// A connection whose read half is an in-memory pipe and whose write half
/// fails on demand.
#[cfg(test)]
pub(crate) struct FaultyConnection {
    stream: DuplexStream,
    fault: Fault,
}

#[cfg(test)]
impl FaultyConnection {
    pub(crate) fn pair(fault: Fault) -> (Self, DuplexStream) {
        let (local, peer) = io::duplex(DUPLEX_BUFFER_SIZE);
        (
            Self {
                stream: local,
                fault,
            },
            peer,
        )
    }
}

#[cfg(test)]
impl Connection for FaultyConnection {
    fn remote_addr(&self) -> String {
        "faulty:0".to_string()
    }

    fn into_split(self: Box<Self>) -> (BoxedReader, BoxedWriter) {
        (
            Box::new(self.stream),
            Box::new(FaultyWriter { fault: self.fault }),
        )
    }
}

#[cfg(test)]
struct FaultyWriter {
    fault: Fault,
}

#[cfg(test)]
impl tokio::io::AsyncWrite for FaultyWriter {
    fn poll_write(
        self: std::pin::Pin<&mut Self>,
        _cx: &mut std::task::Context<'_>,
        buf: &[u8],
    ) -> std::task::Poll<io::Result<usize>> {
        std::task::Poll::Ready(match self.fault {
            Fault::Write => Err(io::Error::new(io::ErrorKind::BrokenPipe, "write refused")),
            Fault::Shutdown => Ok(buf.len()),
        })
    }

    fn poll_flush(
        self: std::pin::Pin<&mut Self>,
        _cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<io::Result<()>> {
        std::task::Poll::Ready(Ok(()))
    }

    fn poll_shutdown(
        self: std::pin::Pin<&mut Self>,
        _cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<io::Result<()>> {
        std::task::Poll::Ready(match self.fault {
            Fault::Shutdown => Err(io::Error::other("shutdown refused")),
            Fault::Write => Ok(()),
        })
    }
}
