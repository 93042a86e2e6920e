use chrono::Local;
use colored::{ColoredString, Colorize};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

fn timestamp() -> ColoredString {
    format!("[{}]", Local::now().format("%H:%M:%S")).dimmed()
}

pub fn log_info(message: &str) {
    println!("{} {} {}", timestamp(), "[INFO]".cyan().bold(), message);
}

pub fn log_success(message: &str) {
    println!("{} {} {}", timestamp(), "[OK]".green().bold(), message);
}

pub fn log_error(message: &str) {
    eprintln!("{} {} {}", timestamp(), "[ERROR]".red().bold(), message);
}

pub fn log_warning(message: &str) {
    println!("{} {} {}", timestamp(), "[WARN]".yellow().bold(), message);
}

pub fn log_system(message: &str) {
    println!("{} {} {}", timestamp(), "[SYSTEM]".magenta().bold(), message);
}

/// Server-side routing decisions (forwarded, dropped, evicted).
pub fn log_route(message: &str) {
    println!("{} {} {}", timestamp(), "[ROUTE]".blue().bold(), message);
}

/// Prints a chat line, coloring the `sender:` prefix when present.
pub fn log_chat(message: &str) {
    match message.split_once(": ") {
        Some((sender, text)) => println!(
            "{} {} {}: {}",
            timestamp(),
            "[CHAT]".white().bold(),
            colorize_username(sender),
            text
        ),
        None => println!("{} {} {}", timestamp(), "[CHAT]".white().bold(), message),
    }
}

fn colorize_username(username: &str) -> ColoredString {
    const PALETTE: [colored::Color; 8] = [
        colored::Color::Red,
        colored::Color::Green,
        colored::Color::Yellow,
        colored::Color::Blue,
        colored::Color::Magenta,
        colored::Color::Cyan,
        colored::Color::BrightGreen,
        colored::Color::BrightBlue,
    ];

    let mut hasher = DefaultHasher::new();
    username.hash(&mut hasher);
    let index = (hasher.finish() as usize) % PALETTE.len();
    username.color(PALETTE[index]).bold()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_username_color_is_stable() {
        let first = colorize_username("alice");
        let second = colorize_username("alice");
        assert_eq!(first.fgcolor(), second.fgcolor());
    }
}
