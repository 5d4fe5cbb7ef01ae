use thiserror::Error;

use crate::messages::{MessageId, UserId};

pub type Result<T> = std::result::Result<T, RelayError>;

#[derive(Error, Debug)]
pub enum RelayError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
    #[error("Room id must not be empty")]
    InvalidRoomId,
    #[error("Message {0} is not in the room history")]
    UnknownMessage(MessageId),
    #[error("No connection registered for user {0}")]
    UnknownTarget(UserId),
    #[error("Transport failure: {0}")]
    Transport(#[from] warp::Error),
}

impl RelayError {
    /// Machine-readable code sent in `error` frames.
    pub fn code(&self) -> &'static str {
        match self {
            RelayError::InvalidRequest(_) => "invalid_request",
            RelayError::InvalidRoomId => "invalid_room_id",
            RelayError::UnknownMessage(_) => "unknown_message",
            RelayError::UnknownTarget(_) => "unknown_target",
            RelayError::Transport(_) => "transport_failure",
        }
    }

    /// Whether the requesting client should be told about this error.
    /// Signaling is best-effort, so a missing target stays silent.
    pub fn is_client_visible(&self) -> bool {
        matches!(
            self,
            RelayError::InvalidRequest(_) | RelayError::InvalidRoomId | RelayError::UnknownMessage(_)
        )
    }
}

impl From<serde_json::Error> for RelayError {
    fn from(e: serde_json::Error) -> Self {
        RelayError::InvalidRequest(e.to_string())
    }
}
