//! Conversation handler: routes updates through entry points, state
//! handlers and fallbacks, and records each conversation's state.
//!
//! Routing is two-phase. `check` resolves the conversation's current state
//! and picks a handler, returning a [`Selection`]. `commit` runs that
//! handler and stores the outcome. The selection holds the conversation's
//! key lock, so one conversation never has two updates between the phases.

use super::config::ConversationConfig;
use super::error::{ConfigError, ConversationError, ResolutionError};
use super::handler::Handler;
use super::key::ConversationKey;
use super::state::{Outcome, Settled, StateId, StoredState};
use super::store::{ConversationStore, KeyGuard};
use crate::update::Update;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

type HandlerRef<C> = Arc<dyn Handler<C>>;

/// Which handler group produced a selection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Stage {
    EntryPoint,
    State(StateId),
    Fallback,
}

/// A handler chosen by `check`, consumed by `commit`
pub struct Selection<C> {
    owner: Uuid,
    key: ConversationKey,
    stage: Stage,
    index: usize,
    current: Option<StateId>,
    handler: HandlerRef<C>,
    guard: KeyGuard,
}

impl<C> Selection<C> {
    pub fn key(&self) -> ConversationKey {
        self.key
    }

    pub fn stage(&self) -> &Stage {
        &self.stage
    }

    /// Position of the handler within its group
    pub fn index(&self) -> usize {
        self.index
    }

    /// State the conversation was in when the handler was selected
    pub fn current_state(&self) -> Option<&StateId> {
        self.current.as_ref()
    }
}

impl<C> std::fmt::Debug for Selection<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Selection")
            .field("key", &self.key)
            .field("stage", &self.stage)
            .field("index", &self.index)
            .field("current", &self.current)
            .finish_non_exhaustive()
    }
}

pub(crate) struct Choice<C> {
    pub stage: Stage,
    pub index: usize,
    pub handler: HandlerRef<C>,
}

/// Per-user conversation state machine
pub struct ConversationHandler<C> {
    id: Uuid,
    config: ConversationConfig,
    entry_points: Vec<HandlerRef<C>>,
    states: HashMap<StateId, Vec<HandlerRef<C>>>,
    fallbacks: Vec<HandlerRef<C>>,
    store: ConversationStore,
}

impl<C: Send + Sync + 'static> ConversationHandler<C> {
    pub fn builder() -> ConversationBuilder<C> {
        ConversationBuilder::new()
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &ConversationConfig {
        &self.config
    }

    pub fn store(&self) -> &ConversationStore {
        &self.store
    }

    /// Stored state for `key`, without resolving pending values
    pub fn state_of(&self, key: &ConversationKey) -> Option<StoredState> {
        self.store.get(key)
    }

    /// Pick a handler for `update`.
    ///
    /// Returns `Ok(None)` when the update has no conversation identity or no
    /// handler accepts it. Waits for the conversation's previous update to
    /// commit and for any pending state to resolve.
    pub async fn check(&self, update: &Update) -> Result<Option<Selection<C>>, ConversationError> {
        let Some(key) = update.conversation_key() else {
            return Ok(None);
        };

        let guard = self.store.lock(key).await;
        let current = self.resolve_state(&key).await?;

        tracing::debug!(
            conversation = %self.config.name,
            key = %key,
            state = current.as_ref().map_or("none", StateId::as_str),
            "Selecting conversation handler"
        );

        let Some(choice) = self.select(update, current.as_ref()) else {
            return Ok(None);
        };

        tracing::debug!(
            conversation = %self.config.name,
            key = %key,
            stage = ?choice.stage,
            index = choice.index,
            "Handler selected"
        );

        Ok(Some(Selection {
            owner: self.id,
            key,
            stage: choice.stage,
            index: choice.index,
            current,
            handler: choice.handler,
            guard,
        }))
    }

    /// Run the selected handler and record its outcome.
    ///
    /// `selection` must come from `check` on this handler for this update.
    pub async fn commit(
        &self,
        update: &Update,
        selection: Selection<C>,
        context: &C,
    ) -> Result<(), ConversationError> {
        if selection.owner != self.id {
            return Err(ConversationError::InvalidOperation(format!(
                "selection for {} was made by a different conversation handler",
                selection.key
            )));
        }
        if update.conversation_key() != Some(selection.key) {
            return Err(ConversationError::InvalidOperation(format!(
                "selection for {} does not belong to update {}",
                selection.key, update.update_id
            )));
        }

        let Selection {
            key,
            current,
            handler,
            guard,
            ..
        } = selection;

        let outcome = handler
            .handle_update(update, context)
            .await
            .map_err(ConversationError::Handler)?;
        self.apply(key, current, outcome);

        drop(guard);
        Ok(())
    }

    /// `check` followed by `commit`. Returns whether a handler ran.
    pub async fn handle(&self, update: &Update, context: &C) -> Result<bool, ConversationError> {
        match self.check(update).await? {
            Some(selection) => {
                self.commit(update, selection, context).await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// First-match selection over entry points, state handlers, fallbacks
    pub(crate) fn select(&self, update: &Update, state: Option<&StateId>) -> Option<Choice<C>> {
        if state.is_none() || self.config.allow_reentry {
            if let Some((index, handler)) = first_match(&self.entry_points, update) {
                return Some(Choice {
                    stage: Stage::EntryPoint,
                    index,
                    handler,
                });
            }
        }

        let state = state?;

        let candidates = self.states.get(state).map_or(&[][..], Vec::as_slice);
        if let Some((index, handler)) = first_match(candidates, update) {
            return Some(Choice {
                stage: Stage::State(state.clone()),
                index,
                handler,
            });
        }

        first_match(&self.fallbacks, update).map(|(index, handler)| Choice {
            stage: Stage::Fallback,
            index,
            handler,
        })
    }

    async fn resolve_state(
        &self,
        key: &ConversationKey,
    ) -> Result<Option<StateId>, ConversationError> {
        let (pending, previous) = match self.store.get(key) {
            None => return Ok(None),
            Some(StoredState::Active(state)) => return Ok(Some(state)),
            Some(StoredState::Pending { pending, previous }) => (pending, previous),
        };

        tracing::debug!(conversation = %self.config.name, key = %key, "Waiting for pending state");

        let result = match self.config.pending_timeout {
            Some(limit) => tokio::time::timeout(limit, pending.resolve())
                .await
                .unwrap_or(Err(ResolutionError::TimedOut(limit))),
            None => pending.resolve().await,
        };

        match result {
            Ok(Settled::Next(state)) => {
                self.store.set(*key, StoredState::Active(state.clone()));
                Ok(Some(state))
            }
            Ok(Settled::End) => {
                self.store.delete(key);
                tracing::info!(conversation = %self.config.name, key = %key, "Conversation ended");
                Ok(None)
            }
            Ok(Settled::Unchanged) => {
                self.restore(key, previous.clone());
                Ok(previous)
            }
            Err(e) => {
                tracing::warn!(
                    conversation = %self.config.name,
                    key = %key,
                    error = %e,
                    "Pending state failed, restoring previous state"
                );
                self.restore(key, previous);
                Err(e.into())
            }
        }
    }

    fn restore(&self, key: &ConversationKey, previous: Option<StateId>) {
        match previous {
            Some(state) => self.store.set(*key, StoredState::Active(state)),
            None => {
                self.store.delete(key);
            }
        }
    }

    fn apply(&self, key: ConversationKey, current: Option<StateId>, outcome: Outcome) {
        match outcome {
            Outcome::End => {
                if self.store.delete(&key).is_some() {
                    tracing::info!(conversation = %self.config.name, key = %key, "Conversation ended");
                }
            }
            Outcome::Unchanged => {}
            Outcome::Next(state) => {
                if current.is_none() {
                    tracing::info!(
                        conversation = %self.config.name,
                        key = %key,
                        state = %state,
                        "Conversation started"
                    );
                } else {
                    tracing::debug!(
                        conversation = %self.config.name,
                        key = %key,
                        state = %state,
                        "Conversation state changed"
                    );
                }
                self.store.set(key, StoredState::Active(state));
            }
            Outcome::Pending(pending) => {
                tracing::debug!(conversation = %self.config.name, key = %key, "Storing pending state");
                self.store.set(
                    key,
                    StoredState::Pending {
                        pending,
                        previous: current,
                    },
                );
            }
        }
    }
}

fn first_match<C>(handlers: &[HandlerRef<C>], update: &Update) -> Option<(usize, HandlerRef<C>)> {
    handlers
        .iter()
        .enumerate()
        .find(|(_, handler)| handler.check_update(update))
        .map(|(index, handler)| (index, Arc::clone(handler)))
}

// ============================================================================
// Builder
// ============================================================================

/// Builder for [`ConversationHandler`]
pub struct ConversationBuilder<C> {
    config: ConversationConfig,
    entry_points: Vec<HandlerRef<C>>,
    states: HashMap<StateId, Vec<HandlerRef<C>>>,
    fallbacks: Vec<HandlerRef<C>>,
}

impl<C: Send + Sync + 'static> ConversationBuilder<C> {
    pub fn new() -> Self {
        Self {
            config: ConversationConfig::default(),
            entry_points: Vec::new(),
            states: HashMap::new(),
            fallbacks: Vec::new(),
        }
    }

    #[must_use]
    pub fn config(mut self, config: ConversationConfig) -> Self {
        self.config = config;
        self
    }

    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.config.name = name.into();
        self
    }

    #[must_use]
    pub fn allow_reentry(mut self, allow: bool) -> Self {
        self.config.allow_reentry = allow;
        self
    }

    #[must_use]
    pub fn pending_timeout(mut self, timeout: Duration) -> Self {
        self.config.pending_timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn entry_point(mut self, handler: impl Handler<C> + 'static) -> Self {
        self.entry_points.push(Arc::new(handler));
        self
    }

    /// Append `handlers` to the entry points, keeping their order
    #[must_use]
    pub fn entry_points<H>(mut self, handlers: impl IntoIterator<Item = H>) -> Self
    where
        H: Handler<C> + 'static,
    {
        self.entry_points
            .extend(handlers.into_iter().map(|h| Arc::new(h) as HandlerRef<C>));
        self
    }

    /// Append a handler for `state`; handlers are tried in insertion order
    #[must_use]
    pub fn state(mut self, state: impl Into<StateId>, handler: impl Handler<C> + 'static) -> Self {
        self.states
            .entry(state.into())
            .or_default()
            .push(Arc::new(handler));
        self
    }

    #[must_use]
    pub fn fallback(mut self, handler: impl Handler<C> + 'static) -> Self {
        self.fallbacks.push(Arc::new(handler));
        self
    }

    /// Append `handlers` to the fallbacks, keeping their order
    #[must_use]
    pub fn fallbacks<H>(mut self, handlers: impl IntoIterator<Item = H>) -> Self
    where
        H: Handler<C> + 'static,
    {
        self.fallbacks
            .extend(handlers.into_iter().map(|h| Arc::new(h) as HandlerRef<C>));
        self
    }

    pub fn build(self) -> Result<ConversationHandler<C>, ConfigError> {
        if self.entry_points.is_empty() {
            return Err(ConfigError::NoEntryPoints);
        }
        Ok(ConversationHandler {
            id: Uuid::new_v4(),
            config: self.config,
            entry_points: self.entry_points,
            states: self.states,
            fallbacks: self.fallbacks,
            store: ConversationStore::new(),
        })
    }
}

impl<C: Send + Sync + 'static> Default for ConversationBuilder<C> {
    fn default() -> Self {
        Self::new()
    }
}
