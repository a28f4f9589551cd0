use crate::foundation::ids::ClientId;

/// Convenience result type used across glmux.
pub type GlmuxResult<T> = Result<T, GlmuxError>;

/// Top-level error taxonomy used by multiplexer APIs.
#[derive(thiserror::Error, Debug)]
pub enum GlmuxError {
    /// Invalid options or configuration data.
    #[error("validation error: {0}")]
    Validation(String),

    /// The requested operation is not in the capability table.
    #[error("unsupported operation: '{name}'")]
    UnsupportedOperation {
        /// Operation name as requested by the client.
        name: String,
    },

    /// The requested operation is reserved for the scheduler.
    #[error("forbidden operation: '{name}'")]
    ForbiddenOperation {
        /// Operation name as requested by the client.
        name: String,
    },

    /// An argument referenced a handle key the client's table never issued.
    #[error("unknown handle: {key}")]
    UnknownHandle {
        /// Key carried by the handle reference.
        key: u64,
    },

    /// A participant did not finish its frame before the cycle deadline.
    #[error("participant timeout: client {client}")]
    ParticipantTimeout {
        /// Client that missed the deadline.
        client: ClientId,
    },

    /// A frame was requested from a proxy that still has one outstanding.
    #[error("frame already requested from client {client}")]
    FrameAlreadyRequested {
        /// Client with the outstanding request.
        client: ClientId,
    },

    /// The shared context failed while executing an operation.
    #[error("context error: {0}")]
    Context(String),

    /// A channel endpoint is closed or unusable.
    #[error("transport error: {0}")]
    Transport(String),

    /// Errors when serializing or deserializing wire messages.
    #[error("serialization error: {0}")]
    Serde(String),

    /// Wrapped lower-level error from dependencies or IO.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl GlmuxError {
    /// Build a [`GlmuxError::Validation`] value.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Build a [`GlmuxError::UnsupportedOperation`] value.
    pub fn unsupported(name: impl Into<String>) -> Self {
        Self::UnsupportedOperation { name: name.into() }
    }

    /// Build a [`GlmuxError::ForbiddenOperation`] value.
    pub fn forbidden(name: impl Into<String>) -> Self {
        Self::ForbiddenOperation { name: name.into() }
    }

    /// Build a [`GlmuxError::Context`] value.
    pub fn context(msg: impl Into<String>) -> Self {
        Self::Context(msg.into())
    }

    /// Build a [`GlmuxError::Transport`] value.
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    /// Build a [`GlmuxError::Serde`] value.
    pub fn serde(msg: impl Into<String>) -> Self {
        Self::Serde(msg.into())
    }
}

impl From<serde_json::Error> for GlmuxError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serde(e.to_string())
    }
}

#[cfg(test)]
#[path = "../../tests/unit/foundation/error.rs"]
mod tests;
