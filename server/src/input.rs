use shared::commands::server as commands;
use shared::error::UserInputError;

#[derive(Debug, PartialEq)]
pub enum ServerUserInput {
    Help,
    ListUsers,
    Say(String),
    SendFile { recipient: String, file_path: String },
    Quit,
}

impl TryFrom<&str> for ServerUserInput {
    type Error = UserInputError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Err(UserInputError::Empty);
        }
        let (cmd, args) = match trimmed.split_once(char::is_whitespace) {
            Some((cmd, args)) => (cmd, args.trim()),
            None => (trimmed, ""),
        };

        if commands::QUIT.matches(cmd) {
            Ok(ServerUserInput::Quit)
        } else if commands::LIST.matches(cmd) {
            Ok(ServerUserInput::ListUsers)
        } else if commands::HELP.matches(cmd) {
            Ok(ServerUserInput::Help)
        } else if commands::SAY.matches(cmd) {
            if args.is_empty() {
                Err(UserInputError::Usage(commands::SAY.help_line()))
            } else {
                Ok(ServerUserInput::Say(args.to_string()))
            }
        } else if commands::SEND_FILE.matches(cmd) {
            match args.split_once(char::is_whitespace) {
                Some((recipient, file_path)) if !file_path.trim().is_empty() => {
                    Ok(ServerUserInput::SendFile {
                        recipient: recipient.to_string(),
                        file_path: file_path.trim().to_string(),
                    })
                }
                _ => Err(UserInputError::Usage(commands::SEND_FILE.help_line())),
            }
        } else {
            // Plain text is not a server command either.
            Err(UserInputError::UnknownCommand(cmd.to_string()))
        }
    }
}
