//! Mock handlers for testing
//!
//! These mocks record how the router uses them so tests can assert which
//! handler was consulted and which one ran.

use super::handler::{Handler, HandlerResult};
use super::state::Outcome;
use crate::update::Update;
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

type Predicate = Arc<dyn Fn(&Update) -> bool + Send + Sync>;
type Responder = Arc<dyn Fn(&Update) -> HandlerResult + Send + Sync>;

/// Handler with a configurable predicate and response
pub struct MockHandler {
    pub name: String,
    predicate: Predicate,
    responder: Responder,
    checks: AtomicUsize,
    /// Update ids this handler processed, in order
    pub handled: Mutex<Vec<i64>>,
}

#[allow(dead_code)]
impl MockHandler {
    pub fn new(name: impl Into<String>, predicate: impl Fn(&Update) -> bool + Send + Sync + 'static) -> Self {
        Self {
            name: name.into(),
            predicate: Arc::new(predicate),
            responder: Arc::new(|_| Ok(Outcome::Unchanged)),
            checks: AtomicUsize::new(0),
            handled: Mutex::new(Vec::new()),
        }
    }

    pub fn always(name: impl Into<String>) -> Self {
        Self::new(name, |_| true)
    }

    pub fn never(name: impl Into<String>) -> Self {
        Self::new(name, |_| false)
    }

    /// Accepts messages whose text equals `text`
    pub fn on_text(name: impl Into<String>, text: &'static str) -> Self {
        Self::new(name, move |update| {
            update
                .message
                .as_ref()
                .and_then(|m| m.text.as_deref())
                .is_some_and(|t| t == text)
        })
    }

    /// Always report `outcome`
    pub fn returning(self, outcome: Outcome) -> Self {
        self.responding(move |_| Ok(outcome.clone()))
    }

    pub fn responding(
        mut self,
        responder: impl Fn(&Update) -> HandlerResult + Send + Sync + 'static,
    ) -> Self {
        self.responder = Arc::new(responder);
        self
    }

    pub fn into_arc(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub fn check_count(&self) -> usize {
        self.checks.load(Ordering::SeqCst)
    }

    pub fn handled(&self) -> Vec<i64> {
        self.handled.lock().unwrap().clone()
    }
}

#[async_trait]
impl<C: Send + Sync> Handler<C> for MockHandler {
    fn check_update(&self, update: &Update) -> bool {
        self.checks.fetch_add(1, Ordering::SeqCst);
        (self.predicate)(update)
    }

    async fn handle_update(&self, update: &Update, _context: &C) -> HandlerResult {
        self.handled.lock().unwrap().push(update.update_id);
        (self.responder)(update)
    }
}

/// Text message from user 1 in chat 1
pub fn text(update_id: i64, text: &str) -> Update {
    Update::text_message(update_id, 1, 1, text)
}
