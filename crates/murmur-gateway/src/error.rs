use thiserror::Error;

/// Failure taxonomy of the delivery core.
///
/// A duplicate-pair conversation insert is not listed: it resolves to the
/// existing conversation and never surfaces as an error.
#[derive(Debug, Error)]
pub enum ChatError {
    #[error("Authentication required")]
    Unauthenticated,

    #[error("Not a participant in this conversation")]
    NotAParticipant,

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("Invalid request: {0}")]
    Invalid(String),

    /// Storage unavailable or failed. The caller decides whether to retry.
    #[error("Storage error: {0}")]
    Transient(#[from] anyhow::Error),
}

impl ChatError {
    /// Terminal errors must not be retried by the caller.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ChatError::Transient(_))
    }
}

pub type Result<T> = std::result::Result<T, ChatError>;
