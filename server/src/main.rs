use shared::commands::server as commands;
use shared::config::{NetworkConfig, PORT_ENV_VAR};
use shared::connection::Connection;
use shared::error::UserInputError;
use shared::events::PeerEvents;
use shared::message::{BROADCAST_TARGET, FileTransfer, Message, MessageType, SERVER_IDENTITY};
use shared::transfer::FileTransferManager;
use shared::{files, logger, readline, tls};
use std::io;
use std::path::Path;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use studylink_server::Server;

mod completer;
mod input;
use completer::ServerCompleter;
use input::ServerUserInput;

const USER_REFRESH_INTERVAL: Duration = Duration::from_secs(2);

/// Prints what arrives at the server.
struct ConsoleEvents;

impl PeerEvents for ConsoleEvents {
    fn on_message_received(&self, message: &Message, _connection: &Connection) {
        let sender = message.sender();
        match message.msg_type() {
            MessageType::Text | MessageType::Broadcast => {
                logger::log_chat(&format!("{}: {}", sender, message.content()));
            }
            MessageType::PeerToPeer => {
                logger::log_chat(&format!(
                    "{} → {}: {}",
                    sender,
                    message.receiver(),
                    message.content()
                ));
            }
            MessageType::File => {
                if let Some(transfer) = message.file_transfer() {
                    logger::log_info(&format!(
                        "{} is sending '{}' ({}) to {}",
                        sender,
                        transfer.file_name(),
                        transfer.size_label(),
                        message.receiver()
                    ));
                }
            }
            MessageType::UserJoin => logger::log_system(&format!("{} joined", sender)),
            MessageType::UserLeave => logger::log_system(&format!("{} left", sender)),
            MessageType::ClassJoin => {
                logger::log_system(&format!("{} joined class {}", sender, message.content()));
            }
            MessageType::ClassLeave => {
                logger::log_system(&format!("{} left class {}", sender, message.content()));
            }
            MessageType::QuizAnswer => {
                logger::log_info(&format!("{} submitted answers for {}", sender, message.content()));
            }
            MessageType::Heartbeat => {}
            other => logger::log_info(&format!("{} from {}: {}", other, sender, message.content())),
        }
    }

    fn on_file_received(&self, transfer: &FileTransfer, connection: &Connection) {
        logger::log_info(&format!(
            "Received file '{}' ({}) from {} at {}",
            transfer.file_name(),
            transfer.size_label(),
            transfer.sender(),
            connection.peer_addr()
        ));
    }

    fn on_status(&self, status: &str) {
        logger::log_info(status);
    }

    fn on_connection_lost(&self, connection: &Connection) {
        logger::log_info(&format!("Connection {} closed", connection.id()));
    }
}

async fn handle_input(server: &Server, transfers: &FileTransferManager, input: ServerUserInput) {
    match input {
        ServerUserInput::ListUsers => {
            let users = server.usernames().await;
            if users.is_empty() {
                logger::log_info("No users currently connected.");
            } else {
                logger::log_info(&format!("Connected users ({}):", users.len()));
                for user in users {
                    logger::log_info(&format!("  - {}", user));
                }
            }
        }
        ServerUserInput::Say(text) => {
            let message = Message::new(
                MessageType::Broadcast,
                SERVER_IDENTITY,
                BROADCAST_TARGET,
                text,
            );
            server.broadcast(&message).await;
            logger::log_chat(&format!("{}: {}", SERVER_IDENTITY, message.content()));
        }
        ServerUserInput::SendFile {
            recipient,
            file_path,
        } => send_file(server, transfers, &recipient, &file_path).await,
        ServerUserInput::Help => {
            for line in commands::help_text() {
                logger::log_info(&line);
            }
        }
        ServerUserInput::Quit => {}
    }
}

/// Mirrors the server's named connections into the transfer manager.
async fn sync_transfer_peers(server: &Server, transfers: &FileTransferManager) {
    let connected = server.named_connections().await;
    for name in transfers.peer_names() {
        if !connected.iter().any(|(username, _)| *username == name) {
            transfers.unregister_peer_connection(&name);
        }
    }
    for (username, connection) in connected {
        transfers.register_peer_connection(&username, connection);
    }
}

async fn send_file(server: &Server, transfers: &FileTransferManager, recipient: &str, file_path: &str) {
    let transfer = match files::read_transfer(Path::new(file_path), SERVER_IDENTITY, recipient).await {
        Ok(transfer) => transfer,
        Err(e) => {
            logger::log_error(&format!("Cannot send {}: {}", file_path, e));
            return;
        }
    };

    sync_transfer_peers(server, transfers).await;
    let file_name = transfer.file_name().to_string();
    logger::log_info(&format!(
        "Sending '{}' ({}) to {}...",
        file_name,
        transfer.size_label(),
        recipient
    ));
    if transfers.send_file(transfer, recipient).await {
        logger::log_success(&format!("File '{}' sent to {}", file_name, recipient));
    } else {
        logger::log_error(&format!("File '{}' was not delivered to every recipient", file_name));
    }
}

#[tokio::main]
async fn main() -> io::Result<()> {
    let config = NetworkConfig::from_env();
    let server = Server::new(SERVER_IDENTITY, Arc::new(ConsoleEvents), config.clone())
        .with_tls(tls::acceptor_from_env());

    let addr = server.start(config.port).await.map_err(|e| {
        logger::log_error(&format!("Failed to start server: {}", e));
        io::Error::other(e.to_string())
    })?;
    logger::log_success(&format!("StudyLink server listening on {}", addr));
    logger::log_info(&format!("To change port, set {} environment variable", PORT_ENV_VAR));
    logger::log_info("Server commands: /help, /list, /say, /sendfile, /quit");

    let transfers = FileTransferManager::default();
    let users = Arc::new(RwLock::new(Vec::new()));
    let mut readline_rx = readline::spawn_readline_handler(ServerCompleter::new(users.clone()), "server> ");
    if readline_rx.is_none() {
        logger::log_info("Running in non-interactive mode (no TTY)");
        logger::log_info("Server commands disabled, stop with Ctrl+C");
    }
    let mut refresh = tokio::time::interval(USER_REFRESH_INTERVAL);

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                logger::log_info("Server shutting down...");
                break;
            }
            _ = refresh.tick() => {
                let names = server.usernames().await;
                *users.write().unwrap_or_else(PoisonError::into_inner) = names;
            }
            Some(line) = async {
                match &mut readline_rx {
                    Some(rx) => rx.recv().await,
                    None => std::future::pending().await,
                }
            } => {
                match line {
                    Some(input_line) => match ServerUserInput::try_from(input_line.as_str()) {
                        Ok(ServerUserInput::Quit) => {
                            logger::log_info("Server shutting down...");
                            break;
                        }
                        Ok(input) => handle_input(&server, &transfers, input).await,
                        Err(UserInputError::Empty) => {}
                        Err(e) => {
                            logger::log_error(&format!("{}. Type /help for available commands.", e));
                        }
                    },
                    None => {
                        logger::log_info("Server shutting down...");
                        break;
                    }
                }
            }
        }
    }

    transfers.shutdown().await;
    server.stop().await;
    Ok(())
}
