//! Loopback helpers for server tests.

use shared::connection::{Connection, ConnectionStream};
use shared::error::FrameError;
use shared::message::Message;
use shared::network::{self, Frame, FrameRef};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(2);
const QUIET: Duration = Duration::from_millis(150);

async fn loopback() -> (TcpStream, TcpStream, SocketAddr) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (near, far) = tokio::join!(TcpStream::connect(addr), listener.accept());
    let (far, far_addr) = far.unwrap();
    (near.unwrap(), far, far_addr)
}

/// A server-side connection with no receive loop, plus the raw remote end.
pub(crate) async fn detached_connection() -> (Arc<Connection>, TcpStream) {
    let (near, far, far_addr) = loopback().await;
    let (connection, _reader) = Connection::open(ConnectionStream::Plain(far), far_addr);
    (connection, near)
}

/// A server-side connection whose outbound frames are observed by a [`TestPeer`].
pub(crate) async fn linked_connection() -> (Arc<Connection>, TestPeer) {
    let (near, far, far_addr) = loopback().await;
    let (connection, _reader) = Connection::open(ConnectionStream::Plain(far), far_addr);
    (connection, TestPeer { stream: near })
}

/// The remote end of a connection, driven frame by frame.
pub(crate) struct TestPeer {
    stream: TcpStream,
}

impl TestPeer {
    pub(crate) async fn connect(addr: SocketAddr) -> Self {
        TestPeer {
            stream: TcpStream::connect(addr).await.unwrap(),
        }
    }

    pub(crate) async fn send(&mut self, message: &Message) {
        network::write_frame(&mut self.stream, FrameRef::Message(message))
            .await
            .unwrap();
    }

    pub(crate) async fn next_frame(&mut self) -> Frame {
        timeout(WAIT, network::read_frame(&mut self.stream))
            .await
            .expect("no frame arrived")
            .expect("stream failed")
    }

    pub(crate) async fn next(&mut self) -> Message {
        match self.next_frame().await {
            Frame::Message(message) => message,
            Frame::File(transfer) => panic!("expected a message, got file {}", transfer.file_name()),
        }
    }

    /// Skips heartbeats and peer lists until a message of another type shows up.
    pub(crate) async fn next_significant(&mut self) -> Message {
        use shared::message::MessageType;
        loop {
            let message = self.next().await;
            if !matches!(message.msg_type(), MessageType::Heartbeat | MessageType::PeerList) {
                return message;
            }
        }
    }

    pub(crate) async fn assert_silent(&mut self) {
        if let Ok(result) = timeout(QUIET, network::read_frame(&mut self.stream)).await {
            panic!("expected silence, got {:?}", result);
        }
    }

    pub(crate) async fn assert_closed(&mut self) {
        match timeout(WAIT, network::read_frame(&mut self.stream)).await {
            Ok(Err(FrameError::Disconnected)) => {}
            other => panic!("expected end of stream, got {:?}", other),
        }
    }
}
