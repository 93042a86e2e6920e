use crate::config::MAX_FRAME_SIZE;
use crate::error::FrameError;
use crate::message::{FileTransfer, Message};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

const LEN_SIZE: usize = 4;

/// One object on the stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Frame {
    Message(Message),
    File(FileTransfer),
}

impl Frame {
    fn validate(&self) -> Result<(), FrameError> {
        match self {
            Frame::Message(message) => message.validate()?,
            Frame::File(transfer) => transfer.validate()?,
        }
        Ok(())
    }

    pub fn as_frame_ref(&self) -> FrameRef<'_> {
        match self {
            Frame::Message(message) => FrameRef::Message(message),
            Frame::File(transfer) => FrameRef::File(transfer),
        }
    }
}

/// Borrowed view of a [`Frame`]; encodes to the same bytes without cloning payloads.
#[derive(Debug, Clone, Copy, Serialize)]
pub enum FrameRef<'a> {
    Message(&'a Message),
    File(&'a FileTransfer),
}

impl From<Message> for Frame {
    fn from(message: Message) -> Self {
        Frame::Message(message)
    }
}

impl From<FileTransfer> for Frame {
    fn from(transfer: FileTransfer) -> Self {
        Frame::File(transfer)
    }
}

// Protocol: [payload_len (4 bytes BE)][bincode(Frame) (payload_len bytes)]
pub fn encode_frame(frame: FrameRef<'_>) -> Result<Vec<u8>, FrameError> {
    let payload = bincode::serialize(&frame)?;
    if payload.len() > MAX_FRAME_SIZE {
        return Err(FrameError::TooLarge(payload.len()));
    }
    let len = u32::try_from(payload.len()).map_err(|_| FrameError::TooLarge(payload.len()))?;

    let mut buffer = Vec::with_capacity(LEN_SIZE + payload.len());
    buffer.extend_from_slice(&len.to_be_bytes());
    buffer.extend_from_slice(&payload);
    Ok(buffer)
}

pub fn decode_payload(payload: &[u8]) -> Result<Frame, FrameError> {
    let frame: Frame = bincode::deserialize(payload)?;
    frame.validate()?;
    Ok(frame)
}

/// Writes bytes produced by [`encode_frame`] and flushes.
pub async fn write_encoded<W>(writer: &mut W, encoded: &[u8]) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(encoded).await?;
    writer.flush().await
}

pub async fn write_frame<W>(writer: &mut W, frame: FrameRef<'_>) -> Result<(), FrameError>
where
    W: AsyncWrite + Unpin,
{
    let encoded = encode_frame(frame)?;
    write_encoded(writer, &encoded).await?;
    Ok(())
}

/// Reads exactly one frame. End-of-stream before or inside a frame is a
/// [`FrameError::Disconnected`].
pub async fn read_frame<R>(reader: &mut R) -> Result<Frame, FrameError>
where
    R: AsyncRead + Unpin,
{
    let mut len_bytes = [0u8; LEN_SIZE];
    reader.read_exact(&mut len_bytes).await?;

    let len = u32::from_be_bytes(len_bytes) as usize;
    if len > MAX_FRAME_SIZE {
        return Err(FrameError::TooLarge(len));
    }

    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;
    decode_payload(&payload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{MessageType, Payload, Quiz, QuizAnswer, QuizQuestion, QuizResult};
    use std::collections::HashMap;
    use tokio::io::duplex;

    #[tokio::test]
    async fn test_frames_survive_the_stream_in_order() {
        let (mut a, mut b) = duplex(64 * 1024);

        let mut answers = HashMap::new();
        answers.insert(0, 2);
        let answer = QuizAnswer {
            quiz_id: "QUIZ_9".to_string(),
            username: "bob".to_string(),
            answers,
            submission_time_millis: 1_700_000_000_000,
        };
        let frames = vec![
            Frame::from(Message::new(MessageType::Text, "alice", "all", "hello")),
            Frame::from(Message::quiz_answer("Server", answer)),
            Frame::from(FileTransfer::new("x.bin", vec![7; 300], "alice", "bob")),
        ];

        for frame in &frames {
            write_frame(&mut a, frame.as_frame_ref()).await.unwrap();
        }
        for expected in &frames {
            let got = read_frame(&mut b).await.unwrap();
            assert_eq!(&got, expected);
        }
    }

    fn well_formed(msg_type: MessageType) -> Message {
        match msg_type {
            MessageType::File => Message::file(FileTransfer::new(
                "slides.pdf",
                vec![3; 64],
                "teacher",
                "bob",
            )),
            MessageType::QuizStart => Message::quiz_start(
                "teacher",
                Quiz {
                    quiz_id: "QUIZ_1".to_string(),
                    title: "Fractions".to_string(),
                    questions: vec![QuizQuestion {
                        question: "1/2 + 1/4?".to_string(),
                        options: vec!["3/4".to_string(), "2/6".to_string()],
                        correct_answer: 0,
                        points: 5,
                    }],
                    duration_secs: 300,
                    start_time_millis: 1_700_000_000_000,
                },
            ),
            MessageType::QuizAnswer => {
                let mut answers = HashMap::new();
                answers.insert(0, 0);
                Message::quiz_answer(
                    "teacher",
                    QuizAnswer {
                        quiz_id: "QUIZ_1".to_string(),
                        username: "bob".to_string(),
                        answers,
                        submission_time_millis: 1_700_000_060_000,
                    },
                )
            }
            MessageType::QuizResult => Message::quiz_result(
                "teacher",
                QuizResult {
                    quiz_id: "QUIZ_1".to_string(),
                    username: "bob".to_string(),
                    total_questions: 1,
                    correct_answers: 1,
                    total_points: 5,
                    earned_points: 5,
                    percentage: 100.0,
                    completion_time_millis: 60_000,
                },
            ),
            MessageType::PeerList => Message::peer_list("Server", ["alice", "bob"]),
            other => Message::new(other, "alice", "bob", format!("{} body", other)),
        }
    }

    #[tokio::test]
    async fn test_every_message_type_survives_the_stream() {
        let (mut a, mut b) = duplex(64 * 1024);

        for msg_type in MessageType::ALL {
            let message = well_formed(msg_type);
            assert!(message.validate().is_ok(), "{} should be well formed", msg_type);
            write_frame(&mut a, FrameRef::Message(&message)).await.unwrap();

            match read_frame(&mut b).await.unwrap() {
                Frame::Message(got) => {
                    assert_eq!(got.msg_type(), msg_type);
                    assert_eq!(got, message);
                }
                Frame::File(_) => panic!("{} came back as a raw file", msg_type),
            }
        }
    }

    #[test]
    fn test_length_prefix_is_big_endian_payload_len() {
        let frame = Frame::from(Message::new(MessageType::Heartbeat, "a", "Server", "ping"));
        let encoded = encode_frame(frame.as_frame_ref()).unwrap();
        let len = u32::from_be_bytes([encoded[0], encoded[1], encoded[2], encoded[3]]) as usize;
        assert_eq!(len, encoded.len() - LEN_SIZE);
        assert_eq!(decode_payload(&encoded[LEN_SIZE..]).unwrap(), frame);
    }

    #[tokio::test]
    async fn test_eof_is_disconnect() {
        let (a, mut b) = duplex(1024);
        drop(a);
        assert!(matches!(
            read_frame(&mut b).await,
            Err(FrameError::Disconnected)
        ));
    }

    #[tokio::test]
    async fn test_truncated_frame_is_disconnect() {
        let (mut a, mut b) = duplex(1024);
        let msg = Message::new(MessageType::Text, "a", "all", "hi");
        let encoded = encode_frame(FrameRef::Message(&msg)).unwrap();
        a.write_all(&encoded[..encoded.len() - 2]).await.unwrap();
        drop(a);
        assert!(matches!(
            read_frame(&mut b).await,
            Err(FrameError::Disconnected)
        ));
    }

    #[tokio::test]
    async fn test_oversized_length_is_rejected() {
        let (mut a, mut b) = duplex(1024);
        a.write_all(&u32::MAX.to_be_bytes()).await.unwrap();
        assert!(matches!(
            read_frame(&mut b).await,
            Err(FrameError::TooLarge(_))
        ));
    }

    #[tokio::test]
    async fn test_garbage_payload_is_codec_error() {
        let (mut a, mut b) = duplex(1024);
        a.write_all(&3u32.to_be_bytes()).await.unwrap();
        a.write_all(&[0xFF, 0xFF, 0xFF]).await.unwrap();
        assert!(matches!(read_frame(&mut b).await, Err(FrameError::Codec(_))));
    }

    #[test]
    fn test_mismatched_payload_is_rejected_on_decode() {
        // Hand-build a TEXT message carrying a file payload, bypassing the constructors.
        #[derive(Serialize)]
        struct RawMessage {
            sender: String,
            receiver: String,
            msg_type: MessageType,
            content: String,
            payload: Option<Payload>,
        }
        #[derive(Serialize)]
        enum RawFrame {
            Message(RawMessage),
        }
        let raw = RawFrame::Message(RawMessage {
            sender: "a".to_string(),
            receiver: "b".to_string(),
            msg_type: MessageType::Text,
            content: String::new(),
            payload: Some(Payload::File(FileTransfer::new("f", vec![1], "a", "b"))),
        });
        let bytes = bincode::serialize(&raw).unwrap();
        assert!(matches!(
            decode_payload(&bytes),
            Err(FrameError::Invalid(_))
        ));
    }
}
