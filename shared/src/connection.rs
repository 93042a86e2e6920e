use crate::error::{FrameError, TransportError};
use crate::events::InboundHandler;
use crate::logger;
use crate::message::{FileTransfer, Message};
use crate::network::{self, Frame, FrameRef};
use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadBuf, ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{Mutex, Notify};
use tokio::time;
use tokio_rustls::{client, server};

/// Upper bound on flushing a TLS close_notify to a peer that stopped reading.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(1);

pub enum ConnectionStream {
    Plain(TcpStream),
    ServerTls(Box<server::TlsStream<TcpStream>>),
    ClientTls(Box<client::TlsStream<TcpStream>>),
}

impl AsyncRead for ConnectionStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            ConnectionStream::Plain(stream) => Pin::new(stream).poll_read(cx, buf),
            ConnectionStream::ServerTls(stream) => Pin::new(stream).poll_read(cx, buf),
            ConnectionStream::ClientTls(stream) => Pin::new(stream).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for ConnectionStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            ConnectionStream::Plain(stream) => Pin::new(stream).poll_write(cx, buf),
            ConnectionStream::ServerTls(stream) => Pin::new(stream).poll_write(cx, buf),
            ConnectionStream::ClientTls(stream) => Pin::new(stream).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            ConnectionStream::Plain(stream) => Pin::new(stream).poll_flush(cx),
            ConnectionStream::ServerTls(stream) => Pin::new(stream).poll_flush(cx),
            ConnectionStream::ClientTls(stream) => Pin::new(stream).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            ConnectionStream::Plain(stream) => Pin::new(stream).poll_shutdown(cx),
            ConnectionStream::ServerTls(stream) => Pin::new(stream).poll_shutdown(cx),
            ConnectionStream::ClientTls(stream) => Pin::new(stream).poll_shutdown(cx),
        }
    }
}

/// Read side of a connection, consumed by [`Connection::receive_loop`].
pub type FrameReader = ReadHalf<ConnectionStream>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// One duplex stream to exactly one remote peer.
///
/// Writes are serialized behind an async mutex so concurrent senders never interleave
/// frames. A write that blocks on a peer that stopped reading is abandoned as soon as
/// the connection closes. The read half is owned by a single receive loop. State only
/// ever moves from open to closed.
pub struct Connection {
    id: ConnectionId,
    peer_addr: SocketAddr,
    writer: Mutex<Option<WriteHalf<ConnectionStream>>>,
    open: AtomicBool,
    close_signal: Notify,
    write_cancel: Notify,
    disconnect_reported: AtomicBool,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("peer_addr", &self.peer_addr)
            .field("open", &self.is_open())
            .finish()
    }
}

impl Connection {
    /// Splits the stream and returns the shared handle plus the read half. The write
    /// half is ready before anything is read, so neither end waits on the other.
    pub fn open(stream: ConnectionStream, peer_addr: SocketAddr) -> (Arc<Self>, FrameReader) {
        let (reader, writer) = tokio::io::split(stream);
        let connection = Connection {
            id: ConnectionId(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed)),
            peer_addr,
            writer: Mutex::new(Some(writer)),
            open: AtomicBool::new(true),
            close_signal: Notify::new(),
            write_cancel: Notify::new(),
            disconnect_reported: AtomicBool::new(false),
        };
        (Arc::new(connection), reader)
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    pub async fn send_message(&self, message: &Message) -> Result<(), TransportError> {
        self.send(FrameRef::Message(message)).await
    }

    pub async fn send_file(&self, transfer: &FileTransfer) -> Result<(), TransportError> {
        self.send(FrameRef::File(transfer)).await
    }

    /// Encodes outside the lock, then writes the whole frame under it. A failed write
    /// closes the connection; a write still pending when the connection closes is
    /// dropped and reported as [`TransportError::Closed`].
    pub async fn send(&self, frame: FrameRef<'_>) -> Result<(), TransportError> {
        if !self.is_open() {
            return Err(TransportError::Closed);
        }
        let encoded = network::encode_frame(frame)?;

        let result = {
            let mut guard = self.writer.lock().await;
            let cancelled = self.write_cancel.notified();
            tokio::pin!(cancelled);
            // Registered before the open check so a close in between still wakes us.
            cancelled.as_mut().enable();
            if !self.is_open() {
                return Err(TransportError::Closed);
            }
            let writer = guard.as_mut().ok_or(TransportError::Closed)?;
            tokio::select! {
                biased;
                _ = &mut cancelled => return Err(TransportError::Closed),
                result = network::write_encoded(writer, &encoded) => result,
            }
        };

        if let Err(e) = result {
            logger::log_warning(&format!("Send to {} failed: {}", self.peer_addr, e));
            self.close().await;
            return Err(TransportError::Io(e));
        }
        Ok(())
    }

    /// Idempotent and safe to call while a send is blocked. Stops the receive loop,
    /// abandons any pending write and shuts the write half down.
    pub async fn close(&self) {
        if !self.open.swap(false, Ordering::AcqRel) {
            return;
        }
        self.close_signal.notify_one();
        self.write_cancel.notify_waiters();

        let writer = self.writer.lock().await.take();
        if let Some(mut writer) = writer
            && time::timeout(SHUTDOWN_GRACE, writer.shutdown()).await.is_err()
        {
            logger::log_warning(&format!(
                "Shutdown of {} {} timed out",
                self.peer_addr, self.id
            ));
        }
    }

    /// Reads frames until end-of-stream, an error, or [`Connection::close`]. Always
    /// closes the connection on exit and reports the disconnect exactly once.
    pub async fn receive_loop<H: InboundHandler>(
        self: Arc<Self>,
        mut reader: FrameReader,
        handler: Arc<H>,
    ) {
        loop {
            let result = tokio::select! {
                _ = self.close_signal.notified() => break,
                result = network::read_frame(&mut reader) => result,
            };

            match result {
                Ok(Frame::Message(message)) => handler.on_message(message, &self).await,
                Ok(Frame::File(transfer)) => handler.on_file(transfer, &self).await,
                Err(FrameError::Disconnected) => break,
                Err(e) => {
                    if self.is_open() {
                        logger::log_error(&format!(
                            "Error reading from {} {}: {}",
                            self.peer_addr, self.id, e
                        ));
                    }
                    break;
                }
            }
        }

        drop(reader);
        self.close().await;
        if !self.disconnect_reported.swap(true, Ordering::AcqRel) {
            handler.on_disconnected(&self).await;
        }
    }
}
