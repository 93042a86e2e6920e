//! Console command definitions shared by the client and server binaries.

#[derive(Debug, Clone)]
pub struct Command {
    /// Primary command name (e.g., "/help")
    pub name: &'static str,
    pub alias: Option<&'static str>,
    pub description: &'static str,
    /// Argument hint (e.g., "<username> <message>")
    pub usage: Option<&'static str>,
}

impl Command {
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            alias: None,
            description: "",
            usage: None,
        }
    }

    pub const fn with_alias(mut self, alias: &'static str) -> Self {
        self.alias = Some(alias);
        self
    }

    pub const fn with_description(mut self, description: &'static str) -> Self {
        self.description = description;
        self
    }

    pub const fn with_usage(mut self, usage: &'static str) -> Self {
        self.usage = Some(usage);
        self
    }

    pub fn all_names(&self) -> Vec<&'static str> {
        let mut names = vec![self.name];
        if let Some(alias) = self.alias {
            names.push(alias);
        }
        names
    }

    pub fn matches(&self, cmd: &str) -> bool {
        cmd == self.name || self.alias == Some(cmd)
    }

    pub fn help_line(&self) -> String {
        let mut line = self.name.to_string();
        if let Some(alias) = self.alias {
            line.push_str(&format!(" ({})", alias));
        }
        if let Some(usage) = self.usage {
            line.push_str(&format!(" {}", usage));
        }
        line.push_str(&format!(" - {}", self.description));
        line
    }
}

fn help_lines(title: &str, commands: &[Command]) -> Vec<String> {
    let mut lines = vec![title.to_string()];
    lines.extend(commands.iter().map(|cmd| format!("  {}", cmd.help_line())));
    lines
}

pub mod client {
    use super::Command;

    pub const HELP: Command = Command::new("/help")
        .with_alias("/h")
        .with_description("Show this help message");

    pub const QUIT: Command = Command::new("/quit")
        .with_alias("/q")
        .with_description("Disconnect and exit");

    pub const LIST: Command = Command::new("/list").with_description("Show the last known peer list");

    pub const DM: Command = Command::new("/dm")
        .with_usage("<username> <message>")
        .with_description("Send a direct message");

    pub const ALL: Command = Command::new("/all")
        .with_usage("<message>")
        .with_description("Broadcast to everyone");

    pub const SEND: Command = Command::new("/send")
        .with_usage("<username> <filepath>")
        .with_description("Send a file to one user (max 50MB)");

    pub const COMMANDS: &[Command] = &[HELP, LIST, DM, ALL, SEND, QUIT];

    pub fn completion_names() -> Vec<&'static str> {
        COMMANDS.iter().flat_map(|cmd| cmd.all_names()).collect()
    }

    pub fn help_text() -> Vec<String> {
        super::help_lines("Available commands:", COMMANDS)
    }
}

pub mod server {
    use super::Command;

    pub const HELP: Command = Command::new("/help")
        .with_alias("/h")
        .with_description("Show this help message");

    pub const QUIT: Command = Command::new("/quit")
        .with_alias("/q")
        .with_description("Shut down the server");

    pub const LIST: Command = Command::new("/list").with_description("List connected users");

    pub const SAY: Command = Command::new("/say")
        .with_usage("<message>")
        .with_description("Broadcast a message as the server");

    pub const SEND_FILE: Command = Command::new("/sendfile")
        .with_usage("<username|all> <filepath>")
        .with_description("Push a file to one user or everyone");

    pub const COMMANDS: &[Command] = &[LIST, SAY, SEND_FILE, HELP, QUIT];

    pub fn completion_names() -> Vec<&'static str> {
        COMMANDS.iter().flat_map(|cmd| cmd.all_names()).collect()
    }

    pub fn help_text() -> Vec<String> {
        super::help_lines("Available server commands:", COMMANDS)
    }
}
