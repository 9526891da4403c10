//! Error taxonomy for the device hub.

use std::sync::Arc;

use tokio_tungstenite::tungstenite;
use wrphub_protocol::CodecError;

/// Errors produced by the hub.
///
/// `Clone` so a single failure can fan out to every waiter it affects
/// (envelope completions, transaction cancellations); non-cloneable
/// sources are shared behind `Arc`.
#[derive(Debug, Clone, thiserror::Error)]
pub enum DeviceError {
    #[error("no device ID present in the upgrade request")]
    MissingId,

    #[error("the registry is at its maximum of {limit} devices")]
    CapacityExceeded { limit: usize },

    #[error("device not found")]
    NotFound,

    #[error("device has been closed")]
    Closed,

    #[error("device outbound queue is full")]
    QueueFull,

    #[error("request cancelled")]
    Cancelled,

    #[error("request deadline exceeded")]
    DeadlineExceeded,

    #[error("request destination does not name a device")]
    InvalidDestination,

    #[error("transaction already registered: {0}")]
    DuplicateTransaction(String),

    #[error("no such transaction: {0}")]
    UnknownTransaction(String),

    #[error("no pong within the idle period")]
    IdleTimeout,

    #[error("write timed out")]
    WriteTimeout,

    #[error("codec error: {0}")]
    Codec(Arc<CodecError>),

    #[error("websocket error: {0}")]
    Transport(Arc<tungstenite::Error>),
}

impl From<CodecError> for DeviceError {
    fn from(err: CodecError) -> Self {
        Self::Codec(Arc::new(err))
    }
}

impl From<tungstenite::Error> for DeviceError {
    fn from(err: tungstenite::Error) -> Self {
        Self::Transport(Arc::new(err))
    }
}
