use crate::state::ServerState;
use shared::connection::Connection;
use shared::error::RoutingError;
use shared::events::InboundHandler;
use shared::logger;
use shared::message::{FileTransfer, Message, MessageType, SERVER_IDENTITY};
use std::sync::Arc;

/// What the server does with an inbound message after the pass-through callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// Record the username, rebroadcast the join, refresh the peer list.
    Join,
    /// Forward to the connection registered under the receiver, unless it is us.
    Direct,
    Broadcast,
    /// Refresh liveness and answer with a heartbeat.
    Heartbeat,
    /// The callback has it; nothing else to do.
    PassThrough,
    /// Forget the username, rebroadcast the leave, refresh the peer list.
    Leave,
}

pub fn route_for(msg_type: MessageType) -> Route {
    match msg_type {
        MessageType::UserJoin => Route::Join,
        MessageType::PeerToPeer | MessageType::File => Route::Direct,
        MessageType::Text
        | MessageType::Broadcast
        | MessageType::QuizStart
        | MessageType::QuizAnswer => Route::Broadcast,
        MessageType::Heartbeat => Route::Heartbeat,
        MessageType::ClassJoin | MessageType::ClassLeave => Route::PassThrough,
        MessageType::UserLeave => Route::Leave,
        MessageType::PeerList | MessageType::QuizResult | MessageType::ServerShutdown => {
            Route::Broadcast
        }
    }
}

/// Receive-loop handler for every accepted connection: hands each message to the
/// application callbacks first, then applies the routing table.
pub struct Router {
    state: Arc<ServerState>,
}

impl Router {
    pub fn new(state: Arc<ServerState>) -> Self {
        Router { state }
    }

    pub async fn route(&self, message: Message, connection: &Arc<Connection>) {
        match route_for(message.msg_type()) {
            Route::Join => {
                let registered = self
                    .state
                    .registry
                    .set_username(connection.id(), message.sender())
                    .await;
                if !registered {
                    logger::log_warning(&format!(
                        "Ignoring join from {}: connection is gone",
                        message.sender()
                    ));
                    return;
                }
                logger::log_route(&format!(
                    "{} joined from {}",
                    message.sender(),
                    connection.peer_addr()
                ));
                self.state.broadcast(&message).await;
                self.state.broadcast_peer_list().await;
            }
            Route::Direct => {
                if let Err(e) = self.forward(&message).await {
                    logger::log_warning(&format!(
                        "Dropping {} from {}: {}",
                        message.msg_type(),
                        message.sender(),
                        e
                    ));
                }
            }
            Route::Broadcast => self.state.broadcast(&message).await,
            Route::Heartbeat => {
                self.state.registry.touch(connection.id()).await;
                let reply = Message::heartbeat(SERVER_IDENTITY, message.sender(), "pong");
                if let Err(e) = connection.send_message(&reply).await {
                    logger::log_warning(&format!(
                        "Heartbeat reply to {} failed: {}",
                        connection.peer_addr(),
                        e
                    ));
                }
            }
            Route::PassThrough => {}
            Route::Leave => {
                self.state.registry.clear_username(connection.id()).await;
                self.state.broadcast(&message).await;
                self.state.broadcast_peer_list().await;
            }
        }
    }

    async fn forward(&self, message: &Message) -> Result<(), RoutingError> {
        let target = message.receiver();
        let kind = if message.msg_type() == MessageType::File {
            "file"
        } else {
            "P2P message"
        };

        if self.state.is_local_identity(target) {
            logger::log_route(&format!(
                "Received {} from {} to {}",
                kind,
                message.sender(),
                self.state.identity()
            ));
            return Ok(());
        }

        let connection = self
            .state
            .registry
            .find_by_username(target)
            .await
            .ok_or_else(|| RoutingError::UnknownRecipient(target.to_string()))?;

        match connection.send_message(message).await {
            Ok(()) => logger::log_route(&format!(
                "Forwarded {} from {} to {}",
                kind,
                message.sender(),
                target
            )),
            Err(e) => logger::log_warning(&format!(
                "Forwarding {} from {} to {} failed: {}",
                kind,
                message.sender(),
                target,
                e
            )),
        }
        Ok(())
    }
}

impl InboundHandler for Router {
    async fn on_message(&self, message: Message, connection: &Arc<Connection>) {
        self.state.events.on_message_received(&message, connection);
        self.route(message, connection).await;
    }

    async fn on_file(&self, transfer: FileTransfer, connection: &Arc<Connection>) {
        self.state.events.on_file_received(&transfer, connection);
    }

    async fn on_disconnected(&self, connection: &Arc<Connection>) {
        self.state.remove_connection(connection.id()).await;
        self.state
            .events
            .on_status(&format!("Peer disconnected: {}", connection.peer_addr()));
        self.state.events.on_connection_lost(connection);
    }
}
