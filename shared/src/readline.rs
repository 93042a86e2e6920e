use rustyline::error::ReadlineError;
use rustyline::history::DefaultHistory;
use rustyline::{Editor, Helper};
use crate::logger;
use std::io::IsTerminal;
use tokio::sync::mpsc;

/// Runs a rustyline editor on a blocking thread and forwards each line. `None` on the
/// channel means end of input (Ctrl+C, Ctrl+D, or a terminal error). Returns `None`
/// when stdin is not a terminal.
pub fn spawn_readline_handler<H>(
    helper: H,
    prompt: impl Into<String>,
) -> Option<mpsc::UnboundedReceiver<Option<String>>>
where
    H: Helper + Send + 'static,
{
    if !std::io::stdin().is_terminal() {
        return None;
    }

    let prompt = prompt.into();
    let (tx, rx) = mpsc::unbounded_channel();
    std::thread::spawn(move || {
        let mut editor = match Editor::<H, DefaultHistory>::new() {
            Ok(editor) => editor,
            Err(e) => {
                logger::log_error(&format!("Failed to start line editor: {}", e));
                let _ = tx.send(None);
                return;
            }
        };
        editor.set_helper(Some(helper));

        loop {
            match editor.readline(&prompt) {
                Ok(line) => {
                    if !line.trim().is_empty() {
                        let _ = editor.add_history_entry(line.as_str());
                    }
                    if tx.send(Some(line)).is_err() {
                        break;
                    }
                }
                Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => {
                    let _ = tx.send(None);
                    break;
                }
                Err(e) => {
                    logger::log_error(&format!("Input error: {}", e));
                    let _ = tx.send(None);
                    break;
                }
            }
        }
    });
    Some(rx)
}
