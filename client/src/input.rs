use shared::commands::client as commands;
use shared::error::UserInputError;
use shared::message::BROADCAST_TARGET;

#[derive(Debug, PartialEq)]
pub enum ClientUserInput {
    Help,
    ListUsers,
    Message(String),
    Broadcast(String),
    DirectMessage { recipient: String, message: String },
    SendFile { recipient: String, file_path: String },
    Quit,
}

impl TryFrom<&str> for ClientUserInput {
    type Error = UserInputError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Err(UserInputError::Empty);
        }
        let parts: Vec<&str> = trimmed.split_whitespace().collect();
        let cmd = parts[0];

        if commands::QUIT.matches(cmd) {
            Ok(ClientUserInput::Quit)
        } else if commands::LIST.matches(cmd) {
            Ok(ClientUserInput::ListUsers)
        } else if commands::HELP.matches(cmd) {
            Ok(ClientUserInput::Help)
        } else if commands::ALL.matches(cmd) {
            if parts.len() < 2 {
                Err(UserInputError::Usage(commands::ALL.help_line()))
            } else {
                Ok(ClientUserInput::Broadcast(parts[1..].join(" ")))
            }
        } else if commands::DM.matches(cmd) {
            if parts.len() < 3 {
                Err(UserInputError::Usage(commands::DM.help_line()))
            } else {
                Ok(ClientUserInput::DirectMessage {
                    recipient: parts[1].to_string(),
                    message: parts[2..].join(" "),
                })
            }
        } else if commands::SEND.matches(cmd) {
            // Files are relayed to a single user; the path keeps its inner spaces.
            let args = trimmed[cmd.len()..].trim_start();
            match args.split_once(char::is_whitespace) {
                Some((recipient, file_path))
                    if recipient != BROADCAST_TARGET && !file_path.trim().is_empty() =>
                {
                    Ok(ClientUserInput::SendFile {
                        recipient: recipient.to_string(),
                        file_path: file_path.trim().to_string(),
                    })
                }
                _ => Err(UserInputError::Usage(commands::SEND.help_line())),
            }
        } else if trimmed.starts_with('/') {
            Err(UserInputError::UnknownCommand(cmd.to_string()))
        } else {
            Ok(ClientUserInput::Message(trimmed.to_string()))
        }
    }
}

impl TryFrom<String> for ClientUserInput {
    type Error = UserInputError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::try_from(value.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quit_command() {
        assert_eq!(ClientUserInput::try_from("/quit"), Ok(ClientUserInput::Quit));
        assert_eq!(ClientUserInput::try_from("/q"), Ok(ClientUserInput::Quit));
    }

    #[test]
    fn test_help_and_list() {
        assert_eq!(ClientUserInput::try_from("  /help  "), Ok(ClientUserInput::Help));
        assert_eq!(ClientUserInput::try_from("/list"), Ok(ClientUserInput::ListUsers));
    }

    #[test]
    fn test_dm_command_valid() {
        let input = ClientUserInput::try_from("/dm Alice Hello there!");
        assert_eq!(
            input,
            Ok(ClientUserInput::DirectMessage {
                recipient: "Alice".to_string(),
                message: "Hello there!".to_string(),
            })
        );
    }

    #[test]
    fn test_dm_with_extra_whitespace() {
        let input = ClientUserInput::try_from("/dm   Alice   Hello   World");
        if let Ok(ClientUserInput::DirectMessage { recipient, message }) = input {
            assert_eq!(recipient, "Alice");
            assert_eq!(message, "Hello World"); // Extra whitespace is normalized
        } else {
            panic!("Expected DirectMessage variant");
        }
    }

    #[test]
    fn test_dm_command_missing_parts() {
        assert!(matches!(
            ClientUserInput::try_from("/dm Alice"),
            Err(UserInputError::Usage(_))
        ));
        assert!(matches!(
            ClientUserInput::try_from("/dm"),
            Err(UserInputError::Usage(_))
        ));
    }

    #[test]
    fn test_broadcast_command() {
        assert_eq!(
            ClientUserInput::try_from("/all quiz starts now"),
            Ok(ClientUserInput::Broadcast("quiz starts now".to_string()))
        );
        assert!(matches!(
            ClientUserInput::try_from("/all"),
            Err(UserInputError::Usage(_))
        ));
    }

    #[test]
    fn test_send_file_keeps_path_spaces() {
        assert_eq!(
            ClientUserInput::try_from("/send bob ./week 3/notes.pdf"),
            Ok(ClientUserInput::SendFile {
                recipient: "bob".to_string(),
                file_path: "./week 3/notes.pdf".to_string(),
            })
        );
    }

    #[test]
    fn test_send_file_needs_a_single_recipient() {
        assert!(matches!(
            ClientUserInput::try_from("/send all notes.pdf"),
            Err(UserInputError::Usage(_))
        ));
        assert!(matches!(
            ClientUserInput::try_from("/send bob"),
            Err(UserInputError::Usage(_))
        ));
    }

    #[test]
    fn test_regular_message() {
        assert_eq!(
            ClientUserInput::try_from("  Hello everyone!  "),
            Ok(ClientUserInput::Message("Hello everyone!".to_string()))
        );
    }

    #[test]
    fn test_invalid_and_empty() {
        assert_eq!(
            ClientUserInput::try_from("/rename bob"),
            Err(UserInputError::UnknownCommand("/rename".to_string()))
        );
        assert_eq!(ClientUserInput::try_from("   "), Err(UserInputError::Empty));
    }
}
