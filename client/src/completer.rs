use rustyline::completion::{Completer, Pair};
use rustyline::highlight::Highlighter;
use rustyline::hint::Hinter;
use rustyline::validate::Validator;
use rustyline::{Context, Helper};
use shared::commands::client as commands;
use std::collections::HashSet;
use std::sync::{Arc, PoisonError, RwLock};

/// Client command and username completer
pub struct ClientCompleter {
    commands: Vec<&'static str>,
    users: Arc<RwLock<HashSet<String>>>,
}

impl ClientCompleter {
    pub fn new(users: Arc<RwLock<HashSet<String>>>) -> Self {
        Self {
            commands: commands::completion_names(),
            users,
        }
    }

    fn get_candidates(&self, line: &str) -> Vec<String> {
        let trimmed = line.trim_start();

        // Username right after /dm or /send
        if trimmed.starts_with("/dm ") || trimmed.starts_with("/send ") {
            let parts: Vec<&str> = trimmed.splitn(3, ' ').collect();
            if let [cmd, prefix] = parts.as_slice() {
                let users = self.users.read().unwrap_or_else(PoisonError::into_inner);
                let mut candidates: Vec<String> = users
                    .iter()
                    .filter(|u| u.starts_with(prefix))
                    .map(|u| format!("{} {}", cmd, u))
                    .collect();
                candidates.sort();
                return candidates;
            }
        }

        if trimmed.starts_with('/') {
            self.commands
                .iter()
                .filter(|cmd| cmd.starts_with(trimmed))
                .map(|s| s.to_string())
                .collect()
        } else {
            vec![]
        }
    }
}

impl Completer for ClientCompleter {
    type Candidate = Pair;

    fn complete(
        &self,
        line: &str,
        pos: usize,
        _ctx: &Context<'_>,
    ) -> rustyline::Result<(usize, Vec<Pair>)> {
        let pairs: Vec<Pair> = self
            .get_candidates(&line[..pos])
            .into_iter()
            .map(|c| Pair {
                display: c.clone(),
                replacement: c,
            })
            .collect();

        Ok((0, pairs))
    }
}

impl Hinter for ClientCompleter {
    type Hint = String;

    fn hint(&self, line: &str, _pos: usize, _ctx: &Context<'_>) -> Option<String> {
        let candidates = self.get_candidates(line);
        if candidates.len() == 1 {
            let candidate = &candidates[0];
            if candidate.starts_with(line) && candidate.len() > line.len() {
                return Some(candidate[line.len()..].to_string());
            }
        }
        None
    }
}

impl Highlighter for ClientCompleter {}

impl Validator for ClientCompleter {}

impl Helper for ClientCompleter {}

#[cfg(test)]
mod tests {
    use super::*;

    fn completer(users: &[&str]) -> ClientCompleter {
        ClientCompleter::new(Arc::new(RwLock::new(
            users.iter().map(|u| u.to_string()).collect(),
        )))
    }

    #[test]
    fn test_completes_commands() {
        let completer = completer(&[]);
        assert_eq!(completer.get_candidates("/d"), vec!["/dm"]);
        assert_eq!(completer.get_candidates("/al"), vec!["/all"]);
        assert!(completer.get_candidates("hello").is_empty());
    }

    #[test]
    fn test_completes_usernames() {
        let completer = completer(&["alice", "albert", "bob"]);
        assert_eq!(
            completer.get_candidates("/dm al"),
            vec!["/dm albert", "/dm alice"]
        );
        assert_eq!(completer.get_candidates("/send b"), vec!["/send bob"]);
        assert!(completer.get_candidates("/dm bob hi").is_empty());
    }
}
