//! TCP connection handler
//!
//! Turns an accepted socket into a `Session` and runs its two halves:
//! a read loop feeding decoded messages to the `Router`, and a write loop
//! draining the session's outbound queue into length-prefixed frames.

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use futures_util::SinkExt;
use tokio::io::AsyncReadExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::codec::FramedWrite;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::ServerConfig;
use crate::error::AppError;
use crate::framer::Framer;
use crate::router::Router;
use crate::session::{format_peer_addr, Inbound, Session};
use crate::types::SessionId;

/// Set up a session for an accepted socket and start its read and write loops
pub fn open(
    stream: TcpStream,
    addr: SocketAddr,
    router: &Arc<Router>,
    config: &ServerConfig,
) -> Result<Arc<Session>, AppError> {
    stream.set_nodelay(true)?;
    let (reader, writer) = stream.into_split();

    let (msg_tx, msg_rx) = mpsc::channel::<Bytes>(config.outbound_capacity.max(1));
    let peer = format_peer_addr(addr);
    let session = Arc::new(Session::new(SessionId::new(), peer, msg_tx));
    info!(
        "Session {} connected from {}",
        session.id(),
        session.peer_address()
    );

    router.attach(session.clone());

    tokio::spawn(write_loop(
        writer,
        msg_rx,
        session.closing_token(),
        Framer::new(config.max_frame_len),
    ));
    tokio::spawn(read_loop(
        session.clone(),
        reader,
        router.clone(),
        config.max_frame_len,
        config.read_chunk_size,
    ));

    Ok(session)
}

/// Read bytes until EOF, error or close, handing each message to the router
pub async fn read_loop(
    session: Arc<Session>,
    mut reader: OwnedReadHalf,
    router: Arc<Router>,
    max_frame_len: usize,
    chunk_size: usize,
) {
    let mut inbound = Inbound::new(max_frame_len);
    let mut chunk = vec![0u8; chunk_size.max(1)];

    loop {
        let n = tokio::select! {
            _ = session.closed() => break,
            res = reader.read(&mut chunk) => match res {
                Ok(0) => {
                    debug!("Session {} reached EOF", session.id());
                    break;
                }
                Ok(n) => n,
                Err(e) => {
                    debug!("Read error for {}: {}", session.id(), e);
                    break;
                }
            },
        };

        match inbound.on_bytes(&chunk[..n]) {
            Ok(messages) => {
                for msg in messages {
                    router.handle(&session, msg);
                }
            }
            Err(e) => {
                warn!("Dropping session {}: {}", session.id(), e);
                break;
            }
        }
    }

    router.disconnect(&session);
    debug!("Read loop ended for {}", session.id());
}

/// Write queued payloads as frames; on close, flush what is queued and shut down
pub async fn write_loop(
    writer: OwnedWriteHalf,
    mut msg_rx: mpsc::Receiver<Bytes>,
    closing: CancellationToken,
    framer: Framer,
) {
    let mut sink = FramedWrite::new(writer, framer);

    loop {
        tokio::select! {
            biased;
            msg = msg_rx.recv() => match msg {
                Some(payload) => {
                    if let Err(e) = sink.send(payload).await {
                        debug!("Write failed, ending write loop: {}", e);
                        break;
                    }
                }
                None => break,
            },
            _ = closing.cancelled() => {
                while let Ok(payload) = msg_rx.try_recv() {
                    if sink.send(payload).await.is_err() {
                        break;
                    }
                }
                break;
            }
        }
    }

    // Shuts down the write half once buffered frames are out
    let _ = sink.close().await;

    // A dead writer means a dead session; wake the read loop
    closing.cancel();
    debug!("Write loop ended");
}
