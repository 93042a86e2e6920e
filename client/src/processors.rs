//! Default processors: each one turns a message of its type into exactly one call on
//! the [`ClientView`].

use crate::dispatch::DispatchRegistry;
use shared::connection::Connection;
use shared::logger;
use shared::message::{FileTransfer, Message, MessageType, Quiz, QuizAnswer, QuizResult, parse_peer_list};
use std::sync::Arc;

/// Whatever presents inbound traffic to the user.
pub trait ClientView: Send + Sync {
    fn chat_line(&self, _line: &str) {}

    fn status_line(&self, _line: &str) {}

    fn peer_list(&self, _usernames: Vec<String>) {}

    fn file_received(&self, _transfer: &FileTransfer) {}

    fn quiz_started(&self, _quiz: &Quiz) {}

    fn quiz_answer(&self, _answer: &QuizAnswer, _sender: &str) {}

    fn quiz_result(&self, _result: &QuizResult) {}

    fn server_shutdown(&self, _notice: &str) {}
}

pub fn text_line(message: &Message) -> String {
    format!("{}: {}", message.sender(), message.content())
}

pub fn broadcast_line(message: &Message) -> String {
    format!("[BROADCAST] {}: {}", message.sender(), message.content())
}

pub fn direct_line(message: &Message) -> String {
    format!("{} → You: {}", message.sender(), message.content())
}

pub fn join_line(message: &Message) -> String {
    format!("[STATUS] {} joined the network", message.sender())
}

pub fn leave_line(message: &Message) -> String {
    format!("[STATUS] {} left the network", message.sender())
}

pub fn quiz_started_line(quiz: &Quiz) -> String {
    format!("[QUIZ] Started: {} ({} questions)", quiz.title, quiz.questions.len())
}

pub fn quiz_result_line(result: &QuizResult) -> String {
    format!(
        "[QUIZ] Result: {}/{} ({:.1}%)",
        result.correct_answers, result.total_questions, result.percentage
    )
}

fn missing_payload(message: &Message) {
    logger::log_warning(&format!(
        "{} from {} arrived without its payload",
        message.msg_type(),
        message.sender()
    ));
}

/// Installs a processor for every type a client displays. CLASS_JOIN and CLASS_LEAVE
/// stay unregistered and are dropped by the registry.
pub fn register_defaults<V>(registry: &DispatchRegistry, view: Arc<V>)
where
    V: ClientView + 'static,
{
    let v = view.clone();
    registry.register(MessageType::Text, move |m: &Message, _: &Connection| {
        v.chat_line(&text_line(m))
    });

    let v = view.clone();
    registry.register(MessageType::Broadcast, move |m: &Message, _: &Connection| {
        v.chat_line(&broadcast_line(m))
    });

    let v = view.clone();
    registry.register(MessageType::PeerToPeer, move |m: &Message, _: &Connection| {
        v.chat_line(&direct_line(m))
    });

    let v = view.clone();
    registry.register(MessageType::UserJoin, move |m: &Message, _: &Connection| {
        v.status_line(&join_line(m))
    });

    let v = view.clone();
    registry.register(MessageType::UserLeave, move |m: &Message, _: &Connection| {
        v.status_line(&leave_line(m))
    });

    let v = view.clone();
    registry.register(MessageType::PeerList, move |m: &Message, _: &Connection| {
        if !m.content().is_empty() {
            v.peer_list(parse_peer_list(m.content()));
        }
    });

    let v = view.clone();
    registry.register(MessageType::File, move |m: &Message, _: &Connection| {
        match m.file_transfer() {
            Some(transfer) => v.file_received(transfer),
            None => missing_payload(m),
        }
    });

    let v = view.clone();
    registry.register(MessageType::QuizStart, move |m: &Message, _: &Connection| {
        match m.quiz() {
            Some(quiz) => v.quiz_started(quiz),
            None => missing_payload(m),
        }
    });

    let v = view.clone();
    registry.register(MessageType::QuizAnswer, move |m: &Message, _: &Connection| {
        match m.quiz_answer_payload() {
            Some(answer) => v.quiz_answer(answer, m.sender()),
            None => missing_payload(m),
        }
    });

    let v = view.clone();
    registry.register(MessageType::QuizResult, move |m: &Message, _: &Connection| {
        match m.quiz_result_payload() {
            Some(result) => v.quiz_result(result),
            None => missing_payload(m),
        }
    });

    registry.register(MessageType::ServerShutdown, move |m: &Message, _: &Connection| {
        view.server_shutdown(m.content())
    });

    // Server replies keep the link warm; nothing to show.
    registry.register(MessageType::Heartbeat, |_: &Message, _: &Connection| {});
}
