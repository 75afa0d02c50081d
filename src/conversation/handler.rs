//! Handler abstraction used inside conversations
//!
//! A handler decides whether it wants an update (`check_update`, no side
//! effects) and then processes it, reporting how the conversation state
//! should change.

use super::error::HandlerError;
use super::state::Outcome;
use crate::update::{Message, Update};
use async_trait::async_trait;
use std::sync::Arc;

/// Result of processing one update
pub type HandlerResult = Result<Outcome, HandlerError>;

/// A conversation step
#[async_trait]
pub trait Handler<C>: Send + Sync {
    /// Whether this handler accepts the update
    fn check_update(&self, update: &Update) -> bool;

    /// Process the update and report the next state
    async fn handle_update(&self, update: &Update, context: &C) -> HandlerResult;
}

#[async_trait]
impl<C, T> Handler<C> for Arc<T>
where
    C: Send + Sync,
    T: Handler<C> + ?Sized,
{
    fn check_update(&self, update: &Update) -> bool {
        (**self).check_update(update)
    }

    async fn handle_update(&self, update: &Update, context: &C) -> HandlerResult {
        (**self).handle_update(update, context).await
    }
}

/// Synchronous callback shared by the concrete handlers below
pub type Callback<C> = Arc<dyn Fn(&Update, &C) -> HandlerResult + Send + Sync>;

// ============================================================================
// Command handler
// ============================================================================

/// Accepts messages carrying `/command` (optionally `/command@bot`)
pub struct CommandHandler<C> {
    command: String,
    callback: Callback<C>,
}

impl<C> CommandHandler<C> {
    pub fn new<F>(command: impl Into<String>, callback: F) -> Self
    where
        F: Fn(&Update, &C) -> HandlerResult + Send + Sync + 'static,
    {
        Self {
            command: command.into(),
            callback: Arc::new(callback),
        }
    }
}

#[async_trait]
impl<C: Send + Sync> Handler<C> for CommandHandler<C> {
    fn check_update(&self, update: &Update) -> bool {
        update
            .message
            .as_ref()
            .and_then(Message::command)
            .is_some_and(|command| command == self.command)
    }

    async fn handle_update(&self, update: &Update, context: &C) -> HandlerResult {
        (self.callback)(update, context)
    }
}

// ============================================================================
// Message handler
// ============================================================================

type MessageFilter = Arc<dyn Fn(&Message) -> bool + Send + Sync>;

/// Accepts messages matching a filter
pub struct MessageHandler<C> {
    filter: MessageFilter,
    allow_edited: bool,
    callback: Callback<C>,
}

impl<C> MessageHandler<C> {
    pub fn new<P, F>(filter: P, callback: F) -> Self
    where
        P: Fn(&Message) -> bool + Send + Sync + 'static,
        F: Fn(&Update, &C) -> HandlerResult + Send + Sync + 'static,
    {
        Self {
            filter: Arc::new(filter),
            allow_edited: false,
            callback: Arc::new(callback),
        }
    }

    /// Any text that is not a bot command
    pub fn text<F>(callback: F) -> Self
    where
        F: Fn(&Update, &C) -> HandlerResult + Send + Sync + 'static,
    {
        Self::new(|message| message.plain_text().is_some(), callback)
    }

    /// Also accept edited messages
    #[must_use]
    pub fn with_edited(mut self) -> Self {
        self.allow_edited = true;
        self
    }
}

#[async_trait]
impl<C: Send + Sync> Handler<C> for MessageHandler<C> {
    fn check_update(&self, update: &Update) -> bool {
        let message = match (&update.message, &update.edited_message) {
            (Some(message), _) => message,
            (None, Some(edited)) if self.allow_edited => edited,
            _ => return false,
        };
        (self.filter)(message)
    }

    async fn handle_update(&self, update: &Update, context: &C) -> HandlerResult {
        (self.callback)(update, context)
    }
}

// ============================================================================
// Callback query handler
// ============================================================================

/// Accepts callback queries, optionally only those whose data starts with
/// a prefix
pub struct CallbackQueryHandler<C> {
    prefix: Option<String>,
    callback: Callback<C>,
}

impl<C> CallbackQueryHandler<C> {
    pub fn new<F>(callback: F) -> Self
    where
        F: Fn(&Update, &C) -> HandlerResult + Send + Sync + 'static,
    {
        Self {
            prefix: None,
            callback: Arc::new(callback),
        }
    }

    #[must_use]
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }
}

#[async_trait]
impl<C: Send + Sync> Handler<C> for CallbackQueryHandler<C> {
    fn check_update(&self, update: &Update) -> bool {
        let Some(query) = &update.callback_query else {
            return false;
        };
        match &self.prefix {
            None => true,
            Some(prefix) => query
                .data
                .as_deref()
                .is_some_and(|data| data.starts_with(prefix.as_str())),
        }
    }

    async fn handle_update(&self, update: &Update, context: &C) -> HandlerResult {
        (self.callback)(update, context)
    }
}
