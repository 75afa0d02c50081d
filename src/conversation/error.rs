//! Conversation error types

use std::time::Duration;
use thiserror::Error;

/// Error type returned by handler callbacks
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Errors surfaced by `ConversationHandler::check` and `commit`
#[derive(Debug, Error)]
pub enum ConversationError {
    /// Commit without a matching selection; an integration bug
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),
    #[error("Failed to resolve pending state: {0}")]
    Resolution(#[from] ResolutionError),
    #[error("Handler failed: {0}")]
    Handler(#[source] HandlerError),
}

/// Why a pending state never produced a value.
///
/// Clone because one pending result is shared by every waiter.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolutionError {
    #[error("{0}")]
    Failed(String),
    #[error("pending task was cancelled")]
    Cancelled,
    #[error("pending task panicked")]
    Panicked,
    #[error("timed out after {0:?}")]
    TimedOut(Duration),
}

impl ResolutionError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}

/// Configuration errors, reported at build time
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("conversation needs at least one entry point")]
    NoEntryPoints,
    #[error("invalid value for {var}: {value:?}")]
    InvalidValue { var: String, value: String },
}
