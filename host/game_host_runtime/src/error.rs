use thiserror::Error;

use crate::resilience::ErrorKind;

/// Failures raised while building or interpreting protocol messages.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("malformed payload for '{tag}': {reason}")]
    MalformedPayload { tag: String, reason: String },

    #[error("unknown message type: {tag}")]
    UnknownMessageType { tag: String },
}

impl ProtocolError {
    pub fn malformed(tag: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MalformedPayload {
            tag: tag.into(),
            reason: reason.into(),
        }
    }

    pub fn unknown(tag: impl Into<String>) -> Self {
        Self::UnknownMessageType { tag: tag.into() }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::MalformedPayload { .. } => ErrorKind::MalformedPayload,
            Self::UnknownMessageType { .. } => ErrorKind::UnknownMessageType,
        }
    }
}

/// Failures reported by host primitives.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HostError {
    #[error("view channel failure: {0}")]
    View(String),

    #[error("command '{name}' failed: {reason}")]
    Command { name: String, reason: String },

    #[error("command '{0}' is not registered")]
    UnknownCommand(String),

    #[error("'{target}' could not be registered: {reason}")]
    Registration { target: String, reason: String },

    #[error("storage failure: {0}")]
    Storage(String),
}

impl HostError {
    pub fn view(reason: impl Into<String>) -> Self {
        Self::View(reason.into())
    }

    pub fn storage(reason: impl Into<String>) -> Self {
        Self::Storage(reason.into())
    }

    pub fn command(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Command {
            name: name.into(),
            reason: reason.into(),
        }
    }
}

/// Failure reported by the external game engine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct EngineError(pub String);

#[derive(Debug, Error)]
pub enum ControllerError {
    #[error("game engine failure: {0}")]
    Engine(#[from] EngineError),

    #[error("persisted state is unavailable: {0}")]
    Storage(#[from] HostError),

    #[error("game state could not be encoded: {0}")]
    Encoding(#[from] serde_json::Error),
}

impl ControllerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Engine(_) => ErrorKind::GameControllerError,
            Self::Storage(_) | Self::Encoding(_) => ErrorKind::StorageError,
        }
    }
}

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("game controller is no longer available")]
    ControllerUnavailable,

    #[error(transparent)]
    Host(#[from] HostError),
}

#[derive(Debug, Error)]
pub enum RecoveryError {
    #[error("game controller is no longer available")]
    ControllerUnavailable,

    #[error("resilience engine is shutting down")]
    EngineUnavailable,

    #[error(transparent)]
    Controller(#[from] ControllerError),

    #[error(transparent)]
    Host(#[from] HostError),
}

/// Raised to the host when activation cannot complete.
#[derive(Debug, Error)]
pub enum ActivationError {
    #[error("failed to create game controller: {0}")]
    ControllerCreation(#[source] ControllerError),

    #[error("failed to register view provider: {0}")]
    ViewProviderRegistration(#[source] HostError),

    #[error("activation aborted: {0}")]
    Aborted(String),
}
