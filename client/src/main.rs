mod completer;
mod input;

use completer::ClientCompleter;
use input::ClientUserInput;
use shared::commands::client as commands;
use shared::config::{DEFAULT_PORT, NetworkConfig, SERVER_ENV_VAR, USERNAME_ENV_VAR};
use shared::connection::Connection;
use shared::error::{TransportError, UserInputError};
use shared::events::PeerEvents;
use shared::message::{BROADCAST_TARGET, FileTransfer, Message, MessageType, Quiz, QuizAnswer, QuizResult};
use shared::transfer::FileTransferManager;
use shared::{files, logger, readline};
use std::collections::HashSet;
use std::env;
use std::io::{self, Write};
use std::path::Path;
use std::sync::{Arc, PoisonError, RwLock};
use studylink_client::dispatch::DispatchRegistry;
use studylink_client::processors::{self, ClientView};
use studylink_client::Client;
use tokio::sync::Notify;

const DEFAULT_NAME: &str = "Guest";

fn save_in_background(transfer: FileTransfer) {
    tokio::spawn(async move {
        match files::save_transfer(Path::new(files::DOWNLOADS_DIR), &transfer).await {
            Ok(path) => logger::log_success(&format!(
                "Saved '{}' ({}) from {} to {}",
                transfer.file_name(),
                transfer.size_label(),
                transfer.sender(),
                path.display()
            )),
            Err(e) => logger::log_error(&format!(
                "Could not save '{}' from {}: {}",
                transfer.file_name(),
                transfer.sender(),
                e
            )),
        }
    });
}

/// Renders processor output on the terminal and keeps the completer's user list fresh.
struct ConsoleView {
    users: Arc<RwLock<HashSet<String>>>,
}

impl ClientView for ConsoleView {
    fn chat_line(&self, line: &str) {
        logger::log_chat(line);
    }

    fn status_line(&self, line: &str) {
        logger::log_system(line);
    }

    fn peer_list(&self, usernames: Vec<String>) {
        *self.users.write().unwrap_or_else(PoisonError::into_inner) = usernames.into_iter().collect();
    }

    fn file_received(&self, transfer: &FileTransfer) {
        save_in_background(transfer.clone());
    }

    fn quiz_started(&self, quiz: &Quiz) {
        logger::log_system(&processors::quiz_started_line(quiz));
    }

    fn quiz_answer(&self, answer: &QuizAnswer, sender: &str) {
        logger::log_info(&format!(
            "{} answered {} question(s) of {}",
            sender,
            answer.answers.len(),
            answer.quiz_id
        ));
    }

    fn quiz_result(&self, result: &QuizResult) {
        logger::log_system(&processors::quiz_result_line(result));
    }

    fn server_shutdown(&self, notice: &str) {
        logger::log_warning(notice);
    }
}

struct ConsoleEvents {
    lost: Arc<Notify>,
}

impl PeerEvents for ConsoleEvents {
    fn on_file_received(&self, transfer: &FileTransfer, _connection: &Connection) {
        save_in_background(transfer.clone());
    }

    fn on_status(&self, status: &str) {
        logger::log_info(status);
    }

    fn on_connection_lost(&self, _connection: &Connection) {
        self.lost.notify_one();
    }
}

async fn send_or_log(client: &Client, message: &Message) {
    match client.send(message).await {
        // Already reported through the status callback.
        Ok(()) | Err(TransportError::NotConnected) => {}
        Err(e) => logger::log_error(&format!("Failed to send {}: {}", message.msg_type(), e)),
    }
}

async fn handle_input(
    client: &Client,
    transfers: &FileTransferManager,
    users: &RwLock<HashSet<String>>,
    input: ClientUserInput,
) {
    let username = client.username();
    match input {
        ClientUserInput::Message(text) => {
            let message = Message::new(MessageType::Text, username, BROADCAST_TARGET, text);
            send_or_log(client, &message).await;
        }
        ClientUserInput::Broadcast(text) => {
            let message = Message::new(MessageType::Broadcast, username, BROADCAST_TARGET, text);
            send_or_log(client, &message).await;
        }
        ClientUserInput::DirectMessage { recipient, message } => {
            let dm = Message::new(MessageType::PeerToPeer, username, recipient.as_str(), message);
            send_or_log(client, &dm).await;
            logger::log_chat(&format!("You → {}: {}", recipient, dm.content()));
        }
        ClientUserInput::SendFile {
            recipient,
            file_path,
        } => {
            let transfer = match files::read_transfer(Path::new(&file_path), username, &recipient).await {
                Ok(transfer) => transfer,
                Err(e) => {
                    logger::log_error(&format!("Cannot send {}: {}", file_path, e));
                    return;
                }
            };
            let file_name = transfer.file_name().to_string();
            logger::log_info(&format!(
                "Sending '{}' ({}) to {}...",
                file_name,
                transfer.size_label(),
                recipient
            ));
            if transfers.send_file(transfer, &recipient).await {
                logger::log_success(&format!("File '{}' sent to {}", file_name, recipient));
            } else {
                logger::log_error(&format!("File '{}' could not be sent to {}", file_name, recipient));
            }
        }
        ClientUserInput::ListUsers => {
            let mut names: Vec<String> = users
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .iter()
                .cloned()
                .collect();
            names.sort();
            if names.is_empty() {
                logger::log_info("No peer list received yet.");
            } else {
                logger::log_info(&format!("Online ({}): {}", names.len(), names.join(", ")));
            }
        }
        ClientUserInput::Help => {
            for line in commands::help_text() {
                logger::log_info(&line);
            }
        }
        ClientUserInput::Quit => {}
    }
}

async fn leave(client: &Client) {
    let username = client.username();
    let message = Message::new(
        MessageType::UserLeave,
        username,
        BROADCAST_TARGET,
        format!("{} left", username),
    );
    send_or_log(client, &message).await;
}

#[tokio::main]
async fn main() -> io::Result<()> {
    let (server_addr, username) = get_server_info()?;
    let users = Arc::new(RwLock::new(HashSet::new()));
    let lost = Arc::new(Notify::new());

    let registry = Arc::new(DispatchRegistry::new());
    processors::register_defaults(&registry, Arc::new(ConsoleView { users: users.clone() }));
    let client = Arc::new(Client::new(
        username.clone(),
        registry,
        Arc::new(ConsoleEvents { lost: lost.clone() }),
        NetworkConfig::from_env(),
    ));

    logger::log_info(&format!("Connecting to {}...", server_addr));
    client.connect_to(&server_addr).await.map_err(|e| {
        logger::log_error(&format!("Failed to connect: {}", e));
        io::Error::other(e.to_string())
    })?;

    let join = Message::new(
        MessageType::UserJoin,
        username.as_str(),
        BROADCAST_TARGET,
        format!("{} joined", username),
    );
    send_or_log(&client, &join).await;
    logger::log_info("Type /help for available commands.");

    let transfers = FileTransferManager::default();
    transfers.register_peer(client.clone());

    let mut readline_rx = readline::spawn_readline_handler(
        ClientCompleter::new(users.clone()),
        format!("{}> ", username),
    );
    if readline_rx.is_none() {
        logger::log_info("Running in non-interactive mode (no TTY), stop with Ctrl+C");
    }

    loop {
        tokio::select! {
            _ = lost.notified() => {
                logger::log_warning("Connection to server lost");
                break;
            }
            _ = tokio::signal::ctrl_c() => {
                leave(&client).await;
                break;
            }
            Some(line) = async {
                match &mut readline_rx {
                    Some(rx) => rx.recv().await,
                    None => std::future::pending().await,
                }
            } => {
                match line {
                    Some(input_line) => match ClientUserInput::try_from(input_line) {
                        Ok(ClientUserInput::Quit) => {
                            leave(&client).await;
                            break;
                        }
                        Ok(input) => handle_input(&client, &transfers, &users, input).await,
                        Err(UserInputError::Empty) => {}
                        Err(e) => {
                            logger::log_error(&format!("{}. Type /help for available commands.", e));
                        }
                    },
                    None => {
                        leave(&client).await;
                        break;
                    }
                }
            }
        }
    }

    transfers.shutdown().await;
    client.disconnect().await;
    Ok(())
}

fn prompt_input(prompt: &str, default: &str) -> io::Result<String> {
    logger::log_info(&format!("{} (default: {}):", prompt, default));
    io::stdout().flush()?;
    let mut input = String::new();
    io::stdin().read_line(&mut input)?;
    let trimmed = input.trim();
    Ok(if trimmed.is_empty() {
        default.to_string()
    } else {
        trimmed.to_string()
    })
}

fn get_server_info() -> io::Result<(String, String)> {
    let server = match env::var(SERVER_ENV_VAR) {
        Ok(val) if !val.is_empty() => {
            logger::log_info(&format!("Using server from {}: {}", SERVER_ENV_VAR, val));
            val
        }
        _ => prompt_input("Enter server address", &format!("127.0.0.1:{}", DEFAULT_PORT))?,
    };

    let name = match env::var(USERNAME_ENV_VAR) {
        Ok(val) if !val.trim().is_empty() => {
            logger::log_info(&format!("Using username from {}: {}", USERNAME_ENV_VAR, val));
            val.trim().to_string()
        }
        _ => prompt_input("Enter your name", DEFAULT_NAME)?,
    };

    Ok((server, name))
}
