//! Error types for the chat engine.

use thiserror::Error;

use recetas_realtime::RealtimeError;

/// Content rejected locally, before any network call.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("message is empty")]
    Empty,

    #[error("message is {len} characters long, the limit is {max}")]
    TooLong { len: usize, max: usize },
}

/// Failure of [`crate::ChatSyncEngine::send`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SendError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// No signed-in identity at send time
    #[error("user is not authenticated")]
    Unauthenticated,

    /// The insert reached the backend and failed. Carries the upstream message.
    #[error("message was not persisted: {0}")]
    Transport(String),
}

/// Failure of [`crate::ChatSyncEngine::delete`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeleteError {
    #[error("message was not deleted: {0}")]
    Transport(String),
}

/// Errors returned by the persistence and realtime collaborators.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("backend unavailable: {0}")]
    Unavailable(String),

    #[error("channel closed: {0}")]
    Closed(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<RealtimeError> for BackendError {
    fn from(err: RealtimeError) -> Self {
        match err {
            RealtimeError::Closed(name) => BackendError::Closed(name),
        }
    }
}

/// Invalid chat configuration.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value '{value}' for {key}")]
    Invalid { key: &'static str, value: String },
}
