//! Per-user conversation state machine
//!
//! A [`ConversationHandler`] owns three groups of handlers (entry points,
//! per-state handlers, fallbacks) and a store mapping each
//! [`ConversationKey`] to its current state.

mod config;
mod error;
pub mod handler;
mod key;
mod router;
pub mod state;
mod store;

#[cfg(test)]
mod proptests;
#[cfg(test)]
pub(crate) mod testing;

pub use config::ConversationConfig;
pub use error::{ConfigError, ConversationError, HandlerError, ResolutionError};
pub use handler::{CallbackQueryHandler, CommandHandler, Handler, HandlerResult, MessageHandler};
pub use key::ConversationKey;
pub use router::{ConversationBuilder, ConversationHandler, Selection, Stage};
pub use state::{Outcome, PendingState, Settled, StateId, StoredState};
pub use store::{ConversationStore, KeyGuard};
