//! Callbacks the core invokes on the application layer, and the receive-loop seam.

use crate::connection::Connection;
use crate::message::{FileTransfer, Message};
use std::future::Future;
use std::sync::Arc;

/// Application-facing callbacks. The core calls these and never waits on a response,
/// so implementations should hand work off rather than block.
pub trait PeerEvents: Send + Sync {
    fn on_message_received(&self, _message: &Message, _connection: &Connection) {}

    fn on_file_received(&self, _transfer: &FileTransfer, _connection: &Connection) {}

    fn on_status(&self, _status: &str) {}

    fn on_connection_lost(&self, _connection: &Connection) {}
}

/// Events that silently discard everything.
pub struct NoEvents;

impl PeerEvents for NoEvents {}

/// What a receive loop does with each decoded frame.
pub trait InboundHandler: Send + Sync + 'static {
    fn on_message(
        &self,
        message: Message,
        connection: &Arc<Connection>,
    ) -> impl Future<Output = ()> + Send;

    fn on_file(
        &self,
        transfer: FileTransfer,
        connection: &Arc<Connection>,
    ) -> impl Future<Output = ()> + Send;

    /// Called exactly once, after the loop has ended and the connection is closed.
    fn on_disconnected(&self, connection: &Arc<Connection>) -> impl Future<Output = ()> + Send;
}

/// Hands every inbound event straight to a [`PeerEvents`] implementation.
pub struct EventRelay {
    events: Arc<dyn PeerEvents>,
}

impl EventRelay {
    pub fn new(events: Arc<dyn PeerEvents>) -> Self {
        EventRelay { events }
    }
}

impl InboundHandler for EventRelay {
    async fn on_message(&self, message: Message, connection: &Arc<Connection>) {
        self.events.on_message_received(&message, connection);
    }

    async fn on_file(&self, transfer: FileTransfer, connection: &Arc<Connection>) {
        self.events.on_file_received(&transfer, connection);
    }

    async fn on_disconnected(&self, connection: &Arc<Connection>) {
        self.events
            .on_status(&format!("Peer disconnected: {}", connection.peer_addr()));
        self.events.on_connection_lost(connection);
    }
}
