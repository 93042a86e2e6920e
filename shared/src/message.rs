use crate::error::MessageError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Receiver value that addresses every registered connection.
pub const BROADCAST_TARGET: &str = "all";

/// Identity the server uses when it speaks for itself.
pub const SERVER_IDENTITY: &str = "Server";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageType {
    Text,
    Broadcast,
    PeerToPeer,
    File,
    UserJoin,
    UserLeave,
    PeerList,
    Heartbeat,
    QuizStart,
    QuizAnswer,
    QuizResult,
    ClassJoin,
    ClassLeave,
    ServerShutdown,
}

impl MessageType {
    pub const ALL: [MessageType; 14] = [
        MessageType::Text,
        MessageType::Broadcast,
        MessageType::PeerToPeer,
        MessageType::File,
        MessageType::UserJoin,
        MessageType::UserLeave,
        MessageType::PeerList,
        MessageType::Heartbeat,
        MessageType::QuizStart,
        MessageType::QuizAnswer,
        MessageType::QuizResult,
        MessageType::ClassJoin,
        MessageType::ClassLeave,
        MessageType::ServerShutdown,
    ];

    /// Name of the payload kind this type carries, if any.
    fn payload_kind(self) -> Option<&'static str> {
        match self {
            MessageType::File => Some(Payload::FILE),
            MessageType::QuizStart => Some(Payload::QUIZ),
            MessageType::QuizAnswer => Some(Payload::QUIZ_ANSWER),
            MessageType::QuizResult => Some(Payload::QUIZ_RESULT),
            _ => None,
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MessageType::Text => "TEXT",
            MessageType::Broadcast => "BROADCAST",
            MessageType::PeerToPeer => "PEER_TO_PEER",
            MessageType::File => "FILE",
            MessageType::UserJoin => "USER_JOIN",
            MessageType::UserLeave => "USER_LEAVE",
            MessageType::PeerList => "PEER_LIST",
            MessageType::Heartbeat => "HEARTBEAT",
            MessageType::QuizStart => "QUIZ_START",
            MessageType::QuizAnswer => "QUIZ_ANSWER",
            MessageType::QuizResult => "QUIZ_RESULT",
            MessageType::ClassJoin => "CLASS_JOIN",
            MessageType::ClassLeave => "CLASS_LEAVE",
            MessageType::ServerShutdown => "SERVER_SHUTDOWN",
        };
        f.write_str(name)
    }
}

/// A whole file held in memory, sent as one blob.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileTransfer {
    file_name: String,
    file_size: u64,
    data: Vec<u8>,
    sender: String,
    recipient: String,
}

impl FileTransfer {
    pub fn new(
        file_name: impl Into<String>,
        data: Vec<u8>,
        sender: impl Into<String>,
        recipient: impl Into<String>,
    ) -> Self {
        FileTransfer {
            file_name: file_name.into(),
            file_size: data.len() as u64,
            data,
            sender: sender.into(),
            recipient: recipient.into(),
        }
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn sender(&self) -> &str {
        &self.sender
    }

    pub fn recipient(&self) -> &str {
        &self.recipient
    }

    pub fn into_data(self) -> Vec<u8> {
        self.data
    }

    pub fn validate(&self) -> Result<(), MessageError> {
        let actual = self.data.len() as u64;
        if self.file_size != actual {
            return Err(MessageError::SizeMismatch {
                declared: self.file_size,
                actual,
            });
        }
        Ok(())
    }

    pub fn size_label(&self) -> String {
        format_size(self.file_size)
    }
}

pub fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = 1024 * 1024;
    if bytes < KB {
        format!("{} B", bytes)
    } else if bytes < MB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuizQuestion {
    pub question: String,
    pub options: Vec<String>,
    /// Zero-based index into `options`.
    pub correct_answer: usize,
    pub points: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quiz {
    pub quiz_id: String,
    pub title: String,
    pub questions: Vec<QuizQuestion>,
    pub duration_secs: u32,
    pub start_time_millis: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuizAnswer {
    pub quiz_id: String,
    pub username: String,
    /// Question index to chosen option index.
    pub answers: HashMap<u32, u32>,
    pub submission_time_millis: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuizResult {
    pub quiz_id: String,
    pub username: String,
    pub total_questions: u32,
    pub correct_answers: u32,
    pub total_points: u32,
    pub earned_points: u32,
    pub percentage: f64,
    pub completion_time_millis: i64,
}

/// The one optional rich attachment a message may carry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Payload {
    File(FileTransfer),
    Quiz(Quiz),
    QuizAnswer(QuizAnswer),
    QuizResult(QuizResult),
}

impl Payload {
    const FILE: &'static str = "file";
    const QUIZ: &'static str = "quiz";
    const QUIZ_ANSWER: &'static str = "quiz answer";
    const QUIZ_RESULT: &'static str = "quiz result";

    pub fn kind(&self) -> &'static str {
        match self {
            Payload::File(_) => Self::FILE,
            Payload::Quiz(_) => Self::QUIZ,
            Payload::QuizAnswer(_) => Self::QUIZ_ANSWER,
            Payload::QuizResult(_) => Self::QUIZ_RESULT,
        }
    }
}

/// Typed envelope exchanged between peers. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    sender: String,
    receiver: String,
    msg_type: MessageType,
    content: String,
    payload: Option<Payload>,
}

impl Message {
    /// Builds a message without a payload. Use the payload constructors for
    /// FILE and QUIZ_* messages.
    pub fn new(
        msg_type: MessageType,
        sender: impl Into<String>,
        receiver: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Message {
            sender: sender.into(),
            receiver: receiver.into(),
            msg_type,
            content: content.into(),
            payload: None,
        }
    }

    pub fn with_payload(
        msg_type: MessageType,
        sender: impl Into<String>,
        receiver: impl Into<String>,
        content: impl Into<String>,
        payload: Payload,
    ) -> Result<Self, MessageError> {
        let message = Message {
            sender: sender.into(),
            receiver: receiver.into(),
            msg_type,
            content: content.into(),
            payload: Some(payload),
        };
        message.validate()?;
        Ok(message)
    }

    pub fn file(transfer: FileTransfer) -> Self {
        Message {
            sender: transfer.sender().to_string(),
            receiver: transfer.recipient().to_string(),
            msg_type: MessageType::File,
            content: transfer.file_name().to_string(),
            payload: Some(Payload::File(transfer)),
        }
    }

    pub fn quiz_start(sender: impl Into<String>, quiz: Quiz) -> Self {
        Message {
            sender: sender.into(),
            receiver: BROADCAST_TARGET.to_string(),
            msg_type: MessageType::QuizStart,
            content: quiz.title.clone(),
            payload: Some(Payload::Quiz(quiz)),
        }
    }

    pub fn quiz_answer(receiver: impl Into<String>, answer: QuizAnswer) -> Self {
        Message {
            sender: answer.username.clone(),
            receiver: receiver.into(),
            msg_type: MessageType::QuizAnswer,
            content: answer.quiz_id.clone(),
            payload: Some(Payload::QuizAnswer(answer)),
        }
    }

    pub fn quiz_result(sender: impl Into<String>, result: QuizResult) -> Self {
        Message {
            sender: sender.into(),
            receiver: result.username.clone(),
            msg_type: MessageType::QuizResult,
            content: result.quiz_id.clone(),
            payload: Some(Payload::QuizResult(result)),
        }
    }

    pub fn heartbeat(sender: impl Into<String>, receiver: impl Into<String>, content: &str) -> Self {
        Message::new(MessageType::Heartbeat, sender, receiver, content)
    }

    pub fn peer_list<'a>(sender: &str, usernames: impl IntoIterator<Item = &'a str>) -> Self {
        let content = usernames.into_iter().collect::<Vec<_>>().join(",");
        Message::new(MessageType::PeerList, sender, BROADCAST_TARGET, content)
    }

    pub fn sender(&self) -> &str {
        &self.sender
    }

    pub fn receiver(&self) -> &str {
        &self.receiver
    }

    pub fn msg_type(&self) -> MessageType {
        self.msg_type
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn payload(&self) -> Option<&Payload> {
        self.payload.as_ref()
    }

    pub fn is_broadcast(&self) -> bool {
        self.receiver == BROADCAST_TARGET
    }

    pub fn file_transfer(&self) -> Option<&FileTransfer> {
        match &self.payload {
            Some(Payload::File(transfer)) => Some(transfer),
            _ => None,
        }
    }

    pub fn quiz(&self) -> Option<&Quiz> {
        match &self.payload {
            Some(Payload::Quiz(quiz)) => Some(quiz),
            _ => None,
        }
    }

    pub fn quiz_answer_payload(&self) -> Option<&QuizAnswer> {
        match &self.payload {
            Some(Payload::QuizAnswer(answer)) => Some(answer),
            _ => None,
        }
    }

    pub fn quiz_result_payload(&self) -> Option<&QuizResult> {
        match &self.payload {
            Some(Payload::QuizResult(result)) => Some(result),
            _ => None,
        }
    }

    /// Checks that the payload, if any, matches the type tag and that payload-bearing
    /// types actually carry one.
    pub fn validate(&self) -> Result<(), MessageError> {
        match (&self.payload, self.msg_type.payload_kind()) {
            (None, None) => Ok(()),
            (None, Some(expected)) => Err(MessageError::MissingPayload {
                msg_type: self.msg_type,
                expected,
            }),
            (Some(payload), expected) if Some(payload.kind()) != expected => {
                Err(MessageError::PayloadMismatch {
                    msg_type: self.msg_type,
                    payload: payload.kind(),
                })
            }
            (Some(Payload::File(transfer)), _) => transfer.validate(),
            (Some(_), _) => Ok(()),
        }
    }
}

/// Splits a PEER_LIST body into usernames, skipping blanks and trailing separators.
pub fn parse_peer_list(content: &str) -> Vec<String> {
    content
        .split(',')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .collect()
}
