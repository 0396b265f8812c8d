//! Shell bridge between the operator and one session.
//!
//! While attached, an output pump copies the session's output to the local
//! output and an input relay sends every local input line to the session
//! with a trailing newline. The two run as separate futures polled side by
//! side, so a stalled write in one direction never holds up the other.
//! Whichever finishes first drops the other.

use tokio::io::{AsyncBufRead, AsyncWrite, AsyncWriteExt, Lines};

use crate::session::{Attachment, SessionHandle, SessionId};

/// Input line that detaches the bridge.
pub const EXIT_SENTINEL: &str = "exit";

/// Why the bridge detached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Detach {
    /// The operator typed the exit sentinel.
    OperatorExit,
    /// The session was closed or the remote end disconnected.
    RemoteClosed,
    /// Writing to the session failed.
    WriteFailed,
    /// Local input reached end-of-file.
    InputClosed,
    /// Writing to the local output failed.
    LocalOutputFailed,
}

/// Relays between the operator and `session` until one side finishes.
///
/// `attachment` must come from [`SessionHandle::attach`] on the same
/// session. Detaching never removes the session; only an explicit kill or
/// the disconnect monitor does that.
pub async fn run<R, W>(
    session: &SessionHandle,
    mut attachment: Attachment,
    input: &mut Lines<R>,
    output: &mut W,
) -> Detach
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let id = session.id();

    tracing::info!(session_id = id, remote_addr = %session.remote_addr(), "Opened shell");

    // Both futures are polled by this select; the first to complete wins
    // and the other is dropped at its current await point.
    let detach = tokio::select! {
        detach = pump_output(id, &mut attachment, output) => detach,
        detach = relay_input(session, input) => detach,
    };

    tracing::info!(session_id = id, detach = ?detach, "Closing shell");
    detach
}

/// Copies session output to `output` until the session closes.
async fn pump_output<W>(id: SessionId, attachment: &mut Attachment, output: &mut W) -> Detach
where
    W: AsyncWrite + Unpin,
{
    while let Some(chunk) = attachment.recv().await {
        if let Err(e) = write_local(output, &chunk).await {
            tracing::warn!(session_id = id, error = %e, "Failed to write shell output");
            return Detach::LocalOutputFailed;
        }
    }
    Detach::RemoteClosed
}

/// Sends operator lines to the session until `exit`, end of input or a
/// failed write.
async fn relay_input<R>(session: &SessionHandle, input: &mut Lines<R>) -> Detach
where
    R: AsyncBufRead + Unpin,
{
    let id = session.id();
    loop {
        match input.next_line().await {
            Ok(Some(line)) if line == EXIT_SENTINEL => return Detach::OperatorExit,
            Ok(Some(line)) => {
                if let Err(e) = session.write_line(&line).await {
                    tracing::warn!(session_id = id, error = %e, "Error writing to connection");
                    return Detach::WriteFailed;
                }
            }
            Ok(None) => return Detach::InputClosed,
            Err(e) => {
                tracing::warn!(session_id = id, error = %e, "Failed to read operator input");
                return Detach::InputClosed;
            }
        }
    }
}

async fn write_local<W: AsyncWrite + Unpin>(output: &mut W, data: &[u8]) -> std::io::Result<()> {
    output.write_all(data).await?;
    output.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::memory::{Fault, FaultyConnection};
    use crate::network::MemoryConnection;
    use crate::session::{monitor, SessionError, SessionRegistry};
    use std::io::Cursor;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader, DuplexStream};
    use tokio::time::timeout;

    struct Fixture {
        registry: Arc<SessionRegistry>,
        session: SessionHandle,
        peer: DuplexStream,
    }

    fn fixture() -> Fixture {
        let registry = Arc::new(SessionRegistry::new());
        let (conn, peer) = MemoryConnection::pair("10.0.0.2:5000");
        let reader = registry.add(conn).unwrap();
        let session = registry.get(reader.id()).unwrap();
        monitor::spawn(Arc::clone(&registry), reader);
        Fixture {
            registry,
            session,
            peer,
        }
    }

    #[tokio::test]
    async fn test_bridge_relays_both_directions_and_detaches_on_exit() {
        let Fixture {
            registry,
            session,
            mut peer,
        } = fixture();

        let (mut operator, console_in) = tokio::io::duplex(1024);
        let mut input = BufReader::new(console_in).lines();
        let (mut output, mut screen) = tokio::io::duplex(1024);

        let attachment = session.attach().unwrap();
        let bridge = tokio::spawn(async move {
            let detach = run(&session, attachment, &mut input, &mut output).await;
            (detach, session)
        });

        peer.write_all(b"uid=0(root)\n").await.unwrap();
        let mut seen = [0u8; 12];
        timeout(Duration::from_secs(1), screen.read_exact(&mut seen))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(&seen, b"uid=0(root)\n");

        operator.write_all(b"ls -la\n").await.unwrap();
        let mut sent = [0u8; 7];
        timeout(Duration::from_secs(1), peer.read_exact(&mut sent))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(&sent, b"ls -la\n");

        operator.write_all(b"exit\n").await.unwrap();
        let (detach, session) = timeout(Duration::from_secs(1), bridge)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(detach, Detach::OperatorExit);
        assert!(registry.contains(session.id()));
        assert!(!session.is_closed());
    }

    #[tokio::test]
    async fn test_bridge_detaches_when_remote_closes() {
        let Fixture {
            registry,
            session,
            peer,
        } = fixture();

        let (_operator, console_in) = tokio::io::duplex(1024);
        let mut input = BufReader::new(console_in).lines();
        let mut output = Vec::new();

        let id = session.id();
        drop(peer);

        // Either the bridge attaches before the monitor reaps the session,
        // or the session is already closed when it tries to attach.
        match session.attach() {
            Ok(attachment) => {
                let detach = timeout(
                    Duration::from_secs(2),
                    run(&session, attachment, &mut input, &mut output),
                )
                .await
                .unwrap();
                assert_eq!(detach, Detach::RemoteClosed);
            }
            Err(e) => assert!(matches!(e, SessionError::Closed(_))),
        }

        timeout(Duration::from_secs(2), async {
            while registry.contains(id) {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_bridge_stops_on_input_eof() {
        let Fixture {
            registry,
            session,
            peer: _peer,
        } = fixture();

        let mut input = BufReader::new(&b""[..]).lines();
        let mut output = Vec::new();

        let attachment = session.attach().unwrap();
        let detach = run(&session, attachment, &mut input, &mut output).await;

        assert_eq!(detach, Detach::InputClosed);
        assert!(registry.contains(session.id()));
    }

    #[tokio::test]
    async fn test_bridge_can_reattach_after_detach() {
        let Fixture {
            registry: _registry,
            session,
            peer: _peer,
        } = fixture();

        let mut input = BufReader::new(&b"exit\n"[..]).lines();
        let mut output = Vec::new();
        let attachment = session.attach().unwrap();
        assert_eq!(
            run(&session, attachment, &mut input, &mut output).await,
            Detach::OperatorExit
        );

        let mut input = BufReader::new(&b"exit\n"[..]).lines();
        let attachment = session.attach().unwrap();
        assert_eq!(
            run(&session, attachment, &mut input, &mut output).await,
            Detach::OperatorExit
        );
    }

    #[tokio::test]
    async fn test_bridge_delivers_output_while_session_write_is_stalled() {
        let Fixture {
            registry: _registry,
            session,
            mut peer,
        } = fixture();

        // One line larger than the connection buffer; the peer never reads,
        // so the write of this line never completes.
        let script = format!("{}\n", "A".repeat(100 * 1024)).into_bytes();
        let mut input = BufReader::new(Cursor::new(script)).lines();
        let (mut output, mut screen) = tokio::io::duplex(1024);

        let attachment = session.attach().unwrap();
        let bridge = tokio::spawn(async move {
            run(&session, attachment, &mut input, &mut output).await
        });

        peer.write_all(b"remote-output\n").await.unwrap();
        let mut seen = [0u8; 14];
        timeout(Duration::from_secs(2), screen.read_exact(&mut seen))
            .await
            .expect("output stalled behind the pending write")
            .unwrap();
        assert_eq!(&seen, b"remote-output\n");

        bridge.abort();
    }

    #[tokio::test]
    async fn test_bridge_relays_input_while_local_output_is_stalled() {
        let Fixture {
            registry: _registry,
            session,
            mut peer,
        } = fixture();

        let (mut operator, console_in) = tokio::io::duplex(1024);
        let mut input = BufReader::new(console_in).lines();
        // Tiny local output that nobody reads.
        let (mut output, _screen) = tokio::io::duplex(8);

        let attachment = session.attach().unwrap();
        let bridge = tokio::spawn(async move {
            run(&session, attachment, &mut input, &mut output).await
        });

        peer.write_all(&[b'x'; 256]).await.unwrap();
        operator.write_all(b"whoami\n").await.unwrap();

        let mut sent = [0u8; 7];
        timeout(Duration::from_secs(2), peer.read_exact(&mut sent))
            .await
            .expect("input stalled behind the pending output")
            .unwrap();
        assert_eq!(&sent, b"whoami\n");

        bridge.abort();
    }

    #[tokio::test]
    async fn test_bridge_write_failure_detaches_and_leaves_session_to_monitor() {
        let registry = Arc::new(SessionRegistry::new());
        let (conn, peer) = FaultyConnection::pair(Fault::Write);
        let reader = registry.add(conn).unwrap();
        let id = reader.id();
        let session = registry.get(id).unwrap();
        monitor::spawn(Arc::clone(&registry), reader);

        let (mut operator, console_in) = tokio::io::duplex(1024);
        let mut input = BufReader::new(console_in).lines();
        let mut output = Vec::new();

        let attachment = session.attach().unwrap();
        operator.write_all(b"id\n").await.unwrap();

        let detach = timeout(
            Duration::from_secs(2),
            run(&session, attachment, &mut input, &mut output),
        )
        .await
        .unwrap();

        assert_eq!(detach, Detach::WriteFailed);
        assert!(registry.contains(id));
        assert!(!session.is_closed());

        // The monitor reaps the session once the remote end goes away.
        drop(peer);
        timeout(Duration::from_secs(2), async {
            while registry.contains(id) {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_bridge_detaches_when_local_output_fails() {
        let Fixture {
            registry,
            session,
            mut peer,
        } = fixture();

        let (_operator, console_in) = tokio::io::duplex(1024);
        let mut input = BufReader::new(console_in).lines();
        let (mut output, screen) = tokio::io::duplex(64);
        drop(screen);

        let attachment = session.attach().unwrap();
        peer.write_all(b"output nobody sees\n").await.unwrap();

        let detach = timeout(
            Duration::from_secs(2),
            run(&session, attachment, &mut input, &mut output),
        )
        .await
        .unwrap();

        assert_eq!(detach, Detach::LocalOutputFailed);
        assert!(registry.contains(session.id()));
    }
}
