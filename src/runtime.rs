//! Runtime for dispatching updates to conversations
//!
//! Updates for the same conversation are processed one at a time and in
//! arrival order; different conversations proceed concurrently.

mod dispatcher;

pub use dispatcher::Dispatcher;
