use serde::{Deserialize, Serialize};

/// A failure reported by the backend inside the stream.
///
/// This is not a session crash: the session ends cleanly and the consumer
/// decides how to surface it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("backend error: {message}")]
pub struct BackendError {
    pub message: String,
}

impl BackendError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// The response body could not be turned into events.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("malformed JSON frame: {0}")]
    Malformed(String),
    #[error("frame is not a JSON object")]
    NotAnObject,
    #[error("frame exceeded {limit} bytes without completing (buffered {len})")]
    FrameTooLarge { len: usize, limit: usize },
    #[error("stream ended inside a frame ({0} bytes left over)")]
    Truncated(usize),
}

/// Caller-side problems found before a session starts.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("prompt must not be empty")]
    EmptyPrompt,
    #[error("select at least one channel")]
    NoChannels,
    #[error("cannot regenerate channel {0:?}: it is not part of the request")]
    UnknownRegeneration(String),
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("request rejected: {status} - {body}")]
    Status { status: u16, body: String },
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("a stream is already active on this session")]
    Busy,
}

impl From<reqwest::Error> for SessionError {
    fn from(err: reqwest::Error) -> Self {
        SessionError::Transport(err.to_string())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("store file is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("store lock poisoned by a panicking writer")]
    Poisoned,
}
