//! Conversation state types

use super::error::ResolutionError;
use futures::future::{BoxFuture, FutureExt, Shared};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;

// ============================================================================
// State identifiers
// ============================================================================

/// Name of a step in a conversation
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StateId(String);

impl StateId {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for StateId {
    fn from(name: &str) -> Self {
        Self(name.to_string())
    }
}

impl From<String> for StateId {
    fn from(name: String) -> Self {
        Self(name)
    }
}

impl fmt::Display for StateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ============================================================================
// Handler outcomes
// ============================================================================

/// What a handler reports after processing an update
#[derive(Debug, Clone)]
pub enum Outcome {
    /// Move the conversation to this state
    Next(StateId),
    /// Finish the conversation and forget its state
    End,
    /// Keep the current state
    Unchanged,
    /// The next state is still being computed
    Pending(PendingState),
}

impl Outcome {
    pub fn next(state: impl Into<StateId>) -> Self {
        Outcome::Next(state.into())
    }

    /// Run `future` on the tokio runtime and report its result as the
    /// conversation's next state once it completes.
    pub fn spawn<F, E>(future: F) -> Self
    where
        F: Future<Output = Result<Settled, E>> + Send + 'static,
        E: fmt::Display + Send + 'static,
    {
        Outcome::Pending(PendingState::spawn(future))
    }
}

impl From<Settled> for Outcome {
    fn from(settled: Settled) -> Self {
        match settled {
            Settled::Next(state) => Outcome::Next(state),
            Settled::End => Outcome::End,
            Settled::Unchanged => Outcome::Unchanged,
        }
    }
}

/// Final value of a pending outcome
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Settled {
    Next(StateId),
    End,
    Unchanged,
}

impl Settled {
    pub fn next(state: impl Into<StateId>) -> Self {
        Settled::Next(state.into())
    }
}

// ============================================================================
// Pending state
// ============================================================================

type Resolution = Shared<BoxFuture<'static, Result<Settled, ResolutionError>>>;

/// Handle to a state that has not been computed yet.
///
/// Cloning is cheap; every clone observes the same result.
#[derive(Clone)]
pub struct PendingState {
    inner: Resolution,
}

impl PendingState {
    /// Wrap a future that is driven by whoever resolves the handle
    pub fn from_future<F>(future: F) -> Self
    where
        F: Future<Output = Result<Settled, ResolutionError>> + Send + 'static,
    {
        Self {
            inner: future.boxed().shared(),
        }
    }

    /// Run `future` as a tokio task. Task errors, panics and aborts all
    /// become a `ResolutionError` for the waiter.
    pub fn spawn<F, E>(future: F) -> Self
    where
        F: Future<Output = Result<Settled, E>> + Send + 'static,
        E: fmt::Display + Send + 'static,
    {
        let task = tokio::spawn(future);
        Self::from_future(async move {
            match task.await {
                Ok(Ok(settled)) => Ok(settled),
                Ok(Err(e)) => Err(ResolutionError::failed(e.to_string())),
                Err(e) if e.is_panic() => Err(ResolutionError::Panicked),
                Err(_) => Err(ResolutionError::Cancelled),
            }
        })
    }

    /// Already-settled handle, mostly useful in tests
    pub fn ready(result: Result<Settled, ResolutionError>) -> Self {
        Self::from_future(futures::future::ready(result))
    }

    /// Wait for the result
    pub async fn resolve(&self) -> Result<Settled, ResolutionError> {
        self.inner.clone().await
    }

    /// The result if it is already available
    pub fn peek(&self) -> Option<Result<Settled, ResolutionError>> {
        self.inner.peek().cloned()
    }
}

impl fmt::Debug for PendingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingState")
            .field("settled", &self.peek())
            .finish()
    }
}

// ============================================================================
// Stored state
// ============================================================================

/// Value held by the store for an active conversation
#[derive(Debug, Clone)]
pub enum StoredState {
    Active(StateId),
    Pending {
        pending: PendingState,
        /// State that was current when the pending outcome was committed
        previous: Option<StateId>,
    },
}

impl StoredState {
    pub fn active(&self) -> Option<&StateId> {
        match self {
            StoredState::Active(state) => Some(state),
            StoredState::Pending { .. } => None,
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, StoredState::Pending { .. })
    }
}
