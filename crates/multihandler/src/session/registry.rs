//! Session registry for managing live connections.
//!
//! The registry is the authoritative mapping from session ID to connection.
//! The accept loop, every disconnect monitor and the operator console share
//! one registry; all of them go through a single mutex that covers both the
//! map and the ID counter. The mutex is never held across an `.await`:
//! operations copy out what they need and do their I/O after releasing it.

use std::collections::BTreeMap;
use std::io;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::SystemTime;

use bytes::Bytes;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::network::{BoxedReader, BoxedWriter, Connection};

/// Unique identifier for a session.
pub type SessionId = u64;

/// The first ID handed out by a fresh registry.
pub const FIRST_SESSION_ID: SessionId = 1;

/// Channel capacity for output forwarded to an attached bridge.
const OUTPUT_TAP_CAPACITY: usize = 256;

/// Errors that can occur during session operations.
#[derive(Error, Debug)]
pub enum SessionError {
    /// The session was not found.
    #[error("session {0} doesn't exist")]
    NotFound(SessionId),

    /// The session has already been closed.
    #[error("session {0} is closed")]
    Closed(SessionId),

    /// Another bridge is attached to the session.
    #[error("session {0} is already attached")]
    AlreadyAttached(SessionId),

    /// Every session ID has been handed out.
    #[error("session ID space exhausted")]
    IdSpaceExhausted,

    /// Failed to write to the connection.
    #[error("failed to write to session {id}: {source}")]
    WriteFailed {
        id: SessionId,
        #[source]
        source: io::Error,
    },

    /// Failed to shut the connection down.
    #[error("failed to close session {id}: {source}")]
    CloseFailed {
        id: SessionId,
        #[source]
        source: io::Error,
    },
}

/// A point-in-time description of a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    /// Unique session identifier.
    pub id: SessionId,
    /// Remote endpoint of the connection.
    pub remote_addr: String,
    /// When the connection was registered.
    pub connected_at: SystemTime,
}

type SharedWriter = Arc<tokio::sync::Mutex<BoxedWriter>>;

/// Slot through which the disconnect monitor forwards output to an
/// attached bridge. Empty while nobody is attached.
#[derive(Clone, Default)]
pub(crate) struct OutputTap {
    slot: Arc<Mutex<Option<mpsc::Sender<Bytes>>>>,
}

impl OutputTap {
    fn lock(&self) -> MutexGuard<'_, Option<mpsc::Sender<Bytes>>> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns the sender of the current attachment, if any.
    pub(crate) fn sender(&self) -> Option<mpsc::Sender<Bytes>> {
        self.lock().clone()
    }

    fn install(
        &self,
        id: SessionId,
        closed: &CancellationToken,
    ) -> Result<mpsc::Receiver<Bytes>, SessionError> {
        let mut slot = self.lock();

        // Checked under the slot lock; `Session::close` cancels before it
        // clears the slot, so a closed session can never gain a tap.
        if closed.is_cancelled() {
            return Err(SessionError::Closed(id));
        }
        if slot.as_ref().is_some_and(|tx| !tx.is_closed()) {
            return Err(SessionError::AlreadyAttached(id));
        }

        let (tx, rx) = mpsc::channel(OUTPUT_TAP_CAPACITY);
        *slot = Some(tx);
        Ok(rx)
    }

    fn clear(&self) {
        self.lock().take();
    }

    fn clear_if_closed(&self) {
        let mut slot = self.lock();
        if slot.as_ref().is_some_and(|tx| tx.is_closed()) {
            slot.take();
        }
    }
}

/// A registry entry. Owns the write half of its connection.
struct Session {
    info: SessionInfo,
    writer: SharedWriter,
    tap: OutputTap,
    closed: CancellationToken,
}

impl Session {
    fn handle(&self) -> SessionHandle {
        SessionHandle {
            info: self.info.clone(),
            writer: Arc::clone(&self.writer),
            tap: self.tap.clone(),
            closed: self.closed.clone(),
        }
    }

    /// Stops the monitor, releases any attached bridge and shuts the
    /// connection down.
    async fn close(self) -> Result<(), io::Error> {
        self.closed.cancel();
        self.tap.clear();

        let mut writer = self.writer.lock().await;
        writer.shutdown().await
    }
}

/// The read side of a freshly registered session.
///
/// Handed to the disconnect monitor, which becomes the only reader of the
/// connection.
pub struct SessionReader {
    pub(crate) id: SessionId,
    pub(crate) remote_addr: String,
    pub(crate) reader: BoxedReader,
    pub(crate) tap: OutputTap,
    pub(crate) closed: CancellationToken,
}

impl SessionReader {
    /// Returns the ID assigned to the session.
    pub fn id(&self) -> SessionId {
        self.id
    }
}

/// A short-lived reference to a registered session.
///
/// Handles are copies: holding one does not keep the session registered.
/// Once the session is removed, writes fail and
/// [`SessionHandle::is_closed`] reports `true`.
#[derive(Clone)]
pub struct SessionHandle {
    info: SessionInfo,
    writer: SharedWriter,
    tap: OutputTap,
    closed: CancellationToken,
}

impl SessionHandle {
    /// Returns the session ID.
    pub fn id(&self) -> SessionId {
        self.info.id
    }

    /// Returns the remote endpoint of the session.
    pub fn remote_addr(&self) -> &str {
        &self.info.remote_addr
    }

    /// Returns whether the session has been closed.
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Writes raw bytes to the connection.
    pub async fn write(&self, data: &[u8]) -> Result<(), SessionError> {
        let id = self.id();
        if self.is_closed() {
            return Err(SessionError::Closed(id));
        }

        let mut writer = self.writer.lock().await;
        writer
            .write_all(data)
            .await
            .map_err(|source| SessionError::WriteFailed { id, source })?;
        writer
            .flush()
            .await
            .map_err(|source| SessionError::WriteFailed { id, source })?;

        Ok(())
    }

    /// Writes `line` followed by a newline.
    pub async fn write_line(&self, line: &str) -> Result<(), SessionError> {
        let mut data = Vec::with_capacity(line.len() + 1);
        data.extend_from_slice(line.as_bytes());
        data.push(b'\n');
        self.write(&data).await
    }

    /// Starts receiving the session's output.
    ///
    /// Output keeps flowing until the returned [`Attachment`] is dropped or
    /// the session is closed.
    pub fn attach(&self) -> Result<Attachment, SessionError> {
        let rx = self.tap.install(self.id(), &self.closed)?;

        tracing::debug!(session_id = self.id(), "Attached to session");

        Ok(Attachment {
            id: self.id(),
            rx,
            tap: self.tap.clone(),
        })
    }
}

/// An active subscription to a session's output. Detaches on drop.
pub struct Attachment {
    id: SessionId,
    rx: mpsc::Receiver<Bytes>,
    tap: OutputTap,
}

impl Attachment {
    /// Receives the next chunk of output.
    ///
    /// Returns `None` once the session has been closed and all buffered
    /// output has been delivered. Cancel-safe.
    pub async fn recv(&mut self) -> Option<Bytes> {
        self.rx.recv().await
    }
}

impl Drop for Attachment {
    fn drop(&mut self) {
        self.rx.close();
        self.tap.clear_if_closed();
        tracing::debug!(session_id = self.id, "Detached from session");
    }
}

struct RegistryInner {
    next_id: SessionId,
    sessions: BTreeMap<SessionId, Session>,
}

/// Thread-safe registry of live sessions.
pub struct SessionRegistry {
    inner: Mutex<RegistryInner>,
}

impl SessionRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(RegistryInner {
                next_id: FIRST_SESSION_ID,
                sessions: BTreeMap::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, RegistryInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers a connection under the next free ID.
    ///
    /// The returned [`SessionReader`] carries the ID and the read half of
    /// the connection; it should be handed to a disconnect monitor.
    pub fn add<C: Connection>(&self, connection: C) -> Result<SessionReader, SessionError> {
        let remote_addr = connection.remote_addr();
        let (reader, writer) = Connection::into_split(Box::new(connection));

        let tap = OutputTap::default();
        let closed = CancellationToken::new();

        let id = {
            let mut inner = self.lock();
            let id = inner.next_id;
            inner.next_id = id.checked_add(1).ok_or(SessionError::IdSpaceExhausted)?;

            inner.sessions.insert(
                id,
                Session {
                    info: SessionInfo {
                        id,
                        remote_addr: remote_addr.clone(),
                        connected_at: SystemTime::now(),
                    },
                    writer: Arc::new(tokio::sync::Mutex::new(writer)),
                    tap: tap.clone(),
                    closed: closed.clone(),
                },
            );
            id
        };

        tracing::info!(session_id = id, remote_addr = %remote_addr, "Registered new session");

        Ok(SessionReader {
            id,
            remote_addr,
            reader,
            tap,
            closed,
        })
    }

    /// Removes a session and closes its connection.
    ///
    /// Returns the removed session's metadata, or `None` if no session is
    /// registered under `id`. The entry is removed even when closing the
    /// connection fails.
    pub async fn remove(&self, id: SessionId) -> Result<Option<SessionInfo>, SessionError> {
        let removed = self.lock().sessions.remove(&id);

        let Some(session) = removed else {
            tracing::debug!(session_id = id, "Remove requested for unknown session");
            return Ok(None);
        };

        let info = session.info.clone();
        session
            .close()
            .await
            .map_err(|source| SessionError::CloseFailed { id, source })?;

        tracing::info!(
            session_id = id,
            remote_addr = %info.remote_addr,
            "Session closed and removed"
        );

        Ok(Some(info))
    }

    /// Returns a handle to the session, if it is registered.
    pub fn get(&self, id: SessionId) -> Option<SessionHandle> {
        self.lock().sessions.get(&id).map(Session::handle)
    }

    /// Returns a snapshot of all sessions, ordered by ID.
    pub fn list(&self) -> Vec<SessionInfo> {
        self.lock()
            .sessions
            .values()
            .map(|session| session.info.clone())
            .collect()
    }

    /// Checks if a session is registered.
    pub fn contains(&self, id: SessionId) -> bool {
        self.lock().sessions.contains_key(&id)
    }

    /// Returns the number of registered sessions.
    pub fn count(&self) -> usize {
        self.lock().sessions.len()
    }

    /// Removes and closes every session. Returns how many were removed.
    pub async fn close_all(&self) -> usize {
        let sessions = std::mem::take(&mut self.lock().sessions);
        let count = sessions.len();

        for (id, session) in sessions {
            if let Err(e) = session.close().await {
                tracing::warn!(session_id = id, error = %e, "Failed to close session");
            }
        }

        if count > 0 {
            tracing::info!(count, "Closed all sessions");
        }
        count
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
