//! Per-session I/O loops.
//!
//! Each session runs one local task owning its socket. The task loop gives
//! queued commands priority over reads, emits frame events in byte-stream
//! order, and drives the double-buffered write path: at most one write in
//! flight, the idle buffer taking appends in the meantime.
//!
//! Outbound sessions wrap the same loop in a dial-retry cycle: connect
//! failures back off [`RECONNECT_DELAY`] with no cap, and an established
//! connection that drops is re-dialed immediately unless the session was
//! killed.

use std::net::SocketAddr;
use std::time::Duration;

use bytes::Bytes;
use protomux_wire::{peek_frame, RollingBuffer, WireError, MAX_FRAME_LEN};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::sleep;
use tracing::{debug, error};

use crate::arena::SlotId;
use crate::event::{SessionEvent, SessionKind};
use crate::pool::{SessionCmd, Sessions};

/// Delay between outbound connect attempts.
pub const RECONNECT_DELAY: Duration = Duration::from_millis(500);

const READ_BUF_INITIAL: usize = 2 * 1024;

enum EndReason {
    /// Notify the owner once, reconnect if outbound.
    Orderly,
    /// Killed or protocol error: no notification.
    Silent,
}

/// Start an inbound session for an accepted socket.
///
/// Must be called from within a `LocalSet`.
pub fn spawn_inbound(
    pool: &Sessions,
    stream: TcpStream,
    events: mpsc::UnboundedSender<SessionEvent>,
) -> SlotId {
    let peer = stream.peer_addr().ok();
    let (id, cmd_rx) = pool.register(peer);
    let pool = pool.clone();
    tokio::task::spawn_local(async move {
        run_inbound(pool, id, stream, events, cmd_rx).await;
    });
    id
}

/// Start an outbound session toward `addr`.
///
/// When `initial` carries an already-connected socket the first dial is
/// skipped. Must be called from within a `LocalSet`.
pub fn spawn_outbound(
    pool: &Sessions,
    addr: SocketAddr,
    events: mpsc::UnboundedSender<SessionEvent>,
    initial: Option<TcpStream>,
) -> SlotId {
    let (id, cmd_rx) = pool.register(Some(addr));
    let pool = pool.clone();
    tokio::task::spawn_local(async move {
        run_outbound(pool, id, addr, events, cmd_rx, initial).await;
    });
    id
}

async fn run_inbound(
    pool: Sessions,
    id: SlotId,
    stream: TcpStream,
    events: mpsc::UnboundedSender<SessionEvent>,
    mut cmd_rx: mpsc::UnboundedReceiver<SessionCmd>,
) {
    let kind = pool.kind();
    pool.mark_connected(id);
    let _ = events.send(SessionEvent::Connected { id, kind });

    let reason = run_io(&pool, id, stream, &events, &mut cmd_rx).await;

    pool.mark_disconnected(id);
    if matches!(reason, EndReason::Orderly) && !pool.is_killed(id) {
        let _ = events.send(SessionEvent::Disconnected { id, kind });
    }
    pool.task_finished(id);
}

async fn run_outbound(
    pool: Sessions,
    id: SlotId,
    addr: SocketAddr,
    events: mpsc::UnboundedSender<SessionEvent>,
    mut cmd_rx: mpsc::UnboundedReceiver<SessionCmd>,
    mut initial: Option<TcpStream>,
) {
    let kind = pool.kind();
    'dial: loop {
        let stream = match initial.take() {
            Some(stream) => stream,
            None => match TcpStream::connect(addr).await {
                Ok(stream) => stream,
                Err(err) => {
                    debug!(
                        "connect to {} failed: {}; retrying in {:?}",
                        addr, err, RECONNECT_DELAY
                    );
                    // kill must break the retry cycle; everything else
                    // waits for a connection
                    tokio::select! {
                        _ = sleep(RECONNECT_DELAY) => continue 'dial,
                        cmd = cmd_rx.recv() => match cmd {
                            Some(SessionCmd::Kill) | None => break 'dial,
                            _ => continue 'dial,
                        },
                    }
                }
            },
        };

        pool.mark_connected(id);
        let _ = events.send(SessionEvent::Connected { id, kind });

        let reason = run_io(&pool, id, stream, &events, &mut cmd_rx).await;
        pool.mark_disconnected(id);

        match reason {
            EndReason::Silent => break 'dial,
            EndReason::Orderly => {
                if pool.is_killed(id) {
                    break 'dial;
                }
                let _ = events.send(SessionEvent::Disconnected { id, kind });
                // dropped connections re-dial immediately; only connect
                // failures back off
            }
        }
    }
    pool.task_finished(id);
}

async fn run_io(
    pool: &Sessions,
    id: SlotId,
    stream: TcpStream,
    events: &mpsc::UnboundedSender<SessionEvent>,
    cmd_rx: &mut mpsc::UnboundedReceiver<SessionCmd>,
) -> EndReason {
    let kind = pool.kind();
    let (mut rd, mut wr) = stream.into_split();
    let mut rbuf = RollingBuffer::with_capacity(READ_BUF_INITIAL);

    // flush anything queued before or between connections
    if drain_writes(pool, id, &mut wr).await.is_err() {
        return EndReason::Orderly;
    }

    loop {
        rbuf.ensure_writable();
        tokio::select! {
            biased;

            cmd = cmd_rx.recv() => match cmd {
                Some(SessionCmd::Flush) => {
                    if let Err(err) = drain_writes(pool, id, &mut wr).await {
                        debug!("write error on session {:?}: {}", id, err);
                        return EndReason::Orderly;
                    }
                }
                Some(SessionCmd::Shutdown) => {
                    let _ = wr.shutdown().await;
                }
                Some(SessionCmd::Close) | None => return EndReason::Orderly,
                Some(SessionCmd::Kill) => return EndReason::Silent,
            },

            res = rd.read(rbuf.writable_tail()) => match res {
                Ok(0) => return EndReason::Orderly,
                Ok(n) => {
                    rbuf.commit(n);
                    pool.touch(id);
                    if let Err(err) = emit_frames(&mut rbuf, id, kind, events) {
                        error!("protocol error on session {:?}: {}", id, err);
                        return EndReason::Silent;
                    }
                }
                Err(err) => {
                    debug!("read error on session {:?}: {}", id, err);
                    return EndReason::Orderly;
                }
            },
        }
    }
}

fn emit_frames(
    rbuf: &mut RollingBuffer,
    id: SlotId,
    kind: SessionKind,
    events: &mpsc::UnboundedSender<SessionEvent>,
) -> Result<(), WireError> {
    loop {
        let frame = peek_frame(rbuf.readable(), MAX_FRAME_LEN)?
            .map(|view| (view.tag, Bytes::copy_from_slice(view.payload), view.total_len));
        let Some((tag, payload, total_len)) = frame else {
            return Ok(());
        };
        rbuf.consume(total_len);
        let _ = events.send(SessionEvent::Frame {
            id,
            kind,
            tag,
            payload,
        });
    }
}

async fn drain_writes(
    pool: &Sessions,
    id: SlotId,
    wr: &mut OwnedWriteHalf,
) -> std::io::Result<()> {
    while let Some(buf) = pool.begin_write(id) {
        let mut result = Ok(());
        for chunk in buf.chunks() {
            if let Err(err) = wr.write_all(chunk.filled()).await {
                result = Err(err);
                break;
            }
        }
        pool.finish_write(id, buf);
        result?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use protomux_wire::encode_header;
    use std::time::Duration;
    use tokio::net::TcpListener;
    use tokio::task::LocalSet;
    use tokio::time::timeout;

    async fn recv(events: &mut mpsc::UnboundedReceiver<SessionEvent>) -> SessionEvent {
        timeout(Duration::from_secs(2), events.recv())
            .await
            .expect("event timed out")
            .expect("event channel closed")
    }

    #[tokio::test]
    async fn test_inbound_lifecycle_and_frames() {
        let local = LocalSet::new();
        local
            .run_until(async {
                let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
                let addr = listener.local_addr().unwrap();

                let mut peer = TcpStream::connect(addr).await.unwrap();
                let (accepted, _) = listener.accept().await.unwrap();

                let pool = Sessions::new(SessionKind::Client);
                let (events_tx, mut events_rx) = mpsc::unbounded_channel();
                let id = spawn_inbound(&pool, accepted, events_tx);

                assert!(matches!(
                    recv(&mut events_rx).await,
                    SessionEvent::Connected { .. }
                ));

                // two frames in one burst arrive as two events, in order
                let mut wire = encode_header(7, 3).unwrap().to_vec();
                wire.extend_from_slice(b"abc");
                wire.extend_from_slice(&encode_header(9, 0).unwrap());
                peer.write_all(&wire).await.unwrap();

                match recv(&mut events_rx).await {
                    SessionEvent::Frame { tag, payload, .. } => {
                        assert_eq!(tag, 7);
                        assert_eq!(&payload[..], b"abc");
                    }
                    other => panic!("unexpected event {other:?}"),
                }
                match recv(&mut events_rx).await {
                    SessionEvent::Frame { tag, payload, .. } => {
                        assert_eq!(tag, 9);
                        assert!(payload.is_empty());
                    }
                    other => panic!("unexpected event {other:?}"),
                }

                drop(peer);
                assert!(matches!(
                    recv(&mut events_rx).await,
                    SessionEvent::Disconnected { .. }
                ));
                assert!(!pool.connected(id));
            })
            .await;
    }

    #[tokio::test]
    async fn test_send_path_reaches_the_wire() {
        let local = LocalSet::new();
        local
            .run_until(async {
                let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
                let addr = listener.local_addr().unwrap();

                let mut peer = TcpStream::connect(addr).await.unwrap();
                let (accepted, _) = listener.accept().await.unwrap();

                let pool = Sessions::new(SessionKind::Client);
                let (events_tx, mut events_rx) = mpsc::unbounded_channel();
                let id = spawn_inbound(&pool, accepted, events_tx);
                assert!(matches!(
                    recv(&mut events_rx).await,
                    SessionEvent::Connected { .. }
                ));

                pool.send_frame(id, 3, b"ping").unwrap();

                let mut got = [0u8; 8];
                timeout(Duration::from_secs(2), peer.read_exact(&mut got))
                    .await
                    .unwrap()
                    .unwrap();
                assert_eq!(&got[..4], &encode_header(3, 4).unwrap());
                assert_eq!(&got[4..], b"ping");
            })
            .await;
    }

    #[tokio::test]
    async fn test_kill_is_silent() {
        let local = LocalSet::new();
        local
            .run_until(async {
                let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
                let addr = listener.local_addr().unwrap();

                let _peer = TcpStream::connect(addr).await.unwrap();
                let (accepted, _) = listener.accept().await.unwrap();

                let pool = Sessions::new(SessionKind::Client);
                let (events_tx, mut events_rx) = mpsc::unbounded_channel();
                let id = spawn_inbound(&pool, accepted, events_tx);
                assert!(matches!(
                    recv(&mut events_rx).await,
                    SessionEvent::Connected { .. }
                ));

                pool.kill(id);
                // the channel closes without a Disconnected event once the
                // task finishes and the slot is reaped
                assert!(timeout(Duration::from_secs(2), events_rx.recv())
                    .await
                    .unwrap()
                    .is_none());
                assert!(!pool.contains(id));
            })
            .await;
    }

    #[tokio::test]
    async fn test_outbound_retries_until_peer_appears() {
        let local = LocalSet::new();
        local
            .run_until(async {
                // reserve a port, then release it so the first dials fail
                let placeholder = TcpListener::bind("127.0.0.1:0").await.unwrap();
                let addr = placeholder.local_addr().unwrap();
                drop(placeholder);

                let pool = Sessions::new(SessionKind::Server);
                let (events_tx, mut events_rx) = mpsc::unbounded_channel();
                let _id = spawn_outbound(&pool, addr, events_tx, None);

                sleep(RECONNECT_DELAY * 2).await;
                let listener = TcpListener::bind(addr).await.unwrap();
                let accept = tokio::spawn(async move { listener.accept().await });

                assert!(matches!(
                    recv(&mut events_rx).await,
                    SessionEvent::Connected { .. }
                ));
                accept.await.unwrap().unwrap();
            })
            .await;
    }
}
