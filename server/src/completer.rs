use rustyline::completion::{Completer, Pair};
use rustyline::highlight::Highlighter;
use rustyline::hint::Hinter;
use rustyline::validate::Validator;
use rustyline::{Context, Helper};
use shared::commands::server as commands;
use shared::message::BROADCAST_TARGET;
use std::sync::{Arc, PoisonError, RwLock};

/// Completes server console commands, and connected usernames after `/sendfile`.
pub struct ServerCompleter {
    commands: Vec<&'static str>,
    users: Arc<RwLock<Vec<String>>>,
}

impl ServerCompleter {
    pub fn new(users: Arc<RwLock<Vec<String>>>) -> Self {
        Self {
            commands: commands::completion_names(),
            users,
        }
    }

    fn get_candidates(&self, line: &str) -> Vec<String> {
        let trimmed = line.trim_start();

        if let Some(prefix) = trimmed.strip_prefix("/sendfile ")
            && !prefix.contains(' ')
        {
            let users = self.users.read().unwrap_or_else(PoisonError::into_inner);
            return std::iter::once(BROADCAST_TARGET)
                .chain(users.iter().map(String::as_str))
                .filter(|name| name.starts_with(prefix))
                .map(|name| format!("/sendfile {} ", name))
                .collect();
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

impl Completer for ServerCompleter {
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

impl Hinter for ServerCompleter {
    type Hint = String;

    fn hint(&self, line: &str, _pos: usize, _ctx: &Context<'_>) -> Option<String> {
        let candidates = self.get_candidates(line);
        match candidates.as_slice() {
            [candidate] if candidate.starts_with(line) && candidate.len() > line.len() => {
                Some(candidate[line.len()..].to_string())
            }
            _ => None,
        }
    }
}

impl Highlighter for ServerCompleter {}

impl Validator for ServerCompleter {}

impl Helper for ServerCompleter {}
