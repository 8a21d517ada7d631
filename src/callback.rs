use std::fmt;

use uuid::Uuid;

/// Telegram rejects callback payloads longer than this many bytes.
pub const MAX_CALLBACK_LEN: usize = 64;

/// Payload of an inline keyboard button. Subjects and topics are addressed by their
/// position in the sorted lists of the question store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackData {
    Menu,
    Subject(usize),
    Topic { subject: usize, topic: usize },
    Restart { subject: usize, topic: usize },
    Answer { question_id: Uuid, choice: usize },
}

impl fmt::Display for CallbackData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Menu => write!(f, "m"),
            Self::Subject(subject) => write!(f, "s:{subject}"),
            Self::Topic { subject, topic } => write!(f, "t:{subject}:{topic}"),
            Self::Restart { subject, topic } => write!(f, "r:{subject}:{topic}"),
            Self::Answer {
                question_id,
                choice,
            } => write!(f, "a:{}:{choice}", question_id.simple()),
        }
    }
}

impl CallbackData {
    pub fn parse(data: &str) -> Option<Self> {
        if data.len() > MAX_CALLBACK_LEN {
            return None;
        }

        let mut parts = data.split(':');
        let kind = parts.next()?;
        let rest: Vec<&str> = parts.collect();

        fn index(s: &str) -> Option<usize> {
            s.parse().ok()
        }

        match (kind, rest.as_slice()) {
            ("m", []) => Some(Self::Menu),
            ("s", [subject]) => Some(Self::Subject(index(subject)?)),
            ("t", [subject, topic]) => Some(Self::Topic {
                subject: index(subject)?,
                topic: index(topic)?,
            }),
            ("r", [subject, topic]) => Some(Self::Restart {
                subject: index(subject)?,
                topic: index(topic)?,
            }),
            ("a", [question_id, choice]) => Some(Self::Answer {
                question_id: Uuid::parse_str(question_id).ok()?,
                choice: index(choice)?,
            }),
            _ => None,
        }
    }
}
