//! Conversation routing for chat bots
//!
//! Tracks a state per (chat, user) pair and routes each incoming update to
//! an entry point, a handler registered for the current state, or a
//! fallback. Handlers report the next state, end the conversation, leave
//! the state alone, or hand back a pending result that the next update for
//! the same conversation waits on.

pub mod conversation;
pub mod runtime;
pub mod update;

pub use conversation::{
    ConversationConfig, ConversationError, ConversationHandler, ConversationKey, Handler, Outcome,
    Settled, StateId,
};
pub use runtime::Dispatcher;
pub use update::Update;
