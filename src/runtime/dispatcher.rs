//! Dispatch engine for conversation handlers

use crate::conversation::{ConversationError, ConversationHandler, ConversationKey};
use crate::update::Update;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

type WorkerTable = HashMap<ConversationKey, mpsc::UnboundedSender<Update>>;

/// Routes updates through a list of conversation handlers.
///
/// The first conversation whose `check` selects a handler gets the update.
pub struct Dispatcher<C> {
    conversations: Vec<Arc<ConversationHandler<C>>>,
    context: Arc<C>,
    workers: Mutex<WorkerTable>,
}

impl<C: Send + Sync + 'static> Dispatcher<C> {
    pub fn new(context: C) -> Self {
        Self {
            conversations: Vec::new(),
            context: Arc::new(context),
            workers: Mutex::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn with_conversation(mut self, conversation: ConversationHandler<C>) -> Self {
        self.conversations.push(Arc::new(conversation));
        self
    }

    pub fn conversations(&self) -> &[Arc<ConversationHandler<C>>] {
        &self.conversations
    }

    /// Context passed to every handler
    pub fn context(&self) -> &C {
        &self.context
    }

    /// Number of conversation keys with a running worker
    pub fn active_workers(&self) -> usize {
        self.workers().len()
    }

    /// Route one update. Returns whether any conversation handled it.
    pub async fn process_update(&self, update: &Update) -> Result<bool, ConversationError> {
        for conversation in &self.conversations {
            if let Some(selection) = conversation.check(update).await? {
                conversation
                    .commit(update, selection, &self.context)
                    .await?;
                return Ok(true);
            }
        }
        tracing::debug!(
            update_id = update.update_id,
            kind = update.kind(),
            "No conversation accepted update"
        );
        Ok(false)
    }

    /// Consume updates until the channel closes or `cancel` fires.
    ///
    /// Each conversation key gets its own worker with a FIFO queue, so an
    /// update is only checked after the previous update for the same key
    /// has committed. Queues are unbounded: a conversation stuck on a
    /// pending state backs up its own queue and nobody else's. A worker
    /// exits once its queue is empty. Queued updates are drained before
    /// returning.
    pub async fn run(
        self: Arc<Self>,
        mut updates: mpsc::Receiver<Update>,
        cancel: CancellationToken,
    ) {
        let mut tasks = JoinSet::new();

        loop {
            let update = tokio::select! {
                () = cancel.cancelled() => break,
                Some(result) = tasks.join_next(), if !tasks.is_empty() => {
                    log_task_result(result);
                    continue;
                }
                update = updates.recv() => match update {
                    Some(update) => update,
                    None => break,
                },
            };

            match update.conversation_key() {
                Some(key) => self.enqueue(key, update, &mut tasks),
                None => {
                    let dispatcher = Arc::clone(&self);
                    tasks.spawn(async move { dispatcher.dispatch(&update).await });
                }
            }
        }

        while let Some(result) = tasks.join_next().await {
            log_task_result(result);
        }
        tracing::info!("Dispatcher stopped");
    }

    fn enqueue(self: &Arc<Self>, key: ConversationKey, update: Update, tasks: &mut JoinSet<()>) {
        let mut workers = self.workers();
        let mut update = update;
        if let Some(queue) = workers.get(&key) {
            match queue.send(update) {
                Ok(()) => return,
                Err(mpsc::error::SendError(returned)) => {
                    tracing::warn!(key = %key, "Conversation worker gone, restarting");
                    update = returned;
                }
            }
        }

        let (tx, rx) = mpsc::unbounded_channel();
        workers.insert(key, tx);
        let dispatcher = Arc::clone(self);
        tasks.spawn(dispatcher.work(key, update, rx));
    }

    async fn work(
        self: Arc<Self>,
        key: ConversationKey,
        first: Update,
        mut queue: mpsc::UnboundedReceiver<Update>,
    ) {
        let mut next = Some(first);
        while let Some(update) = next {
            self.dispatch(&update).await;
            next = self.next_queued(key, &mut queue);
        }
        tracing::debug!(key = %key, "Conversation worker idle, exiting");
    }

    /// Next update for `key`, or `None` after unregistering the worker
    fn next_queued(
        &self,
        key: ConversationKey,
        queue: &mut mpsc::UnboundedReceiver<Update>,
    ) -> Option<Update> {
        if let Ok(update) = queue.try_recv() {
            return Some(update);
        }
        // Senders only push while holding the table, so an empty queue
        // seen under it stays empty once the entry is gone.
        let mut workers = self.workers();
        match queue.try_recv() {
            Ok(update) => Some(update),
            Err(_) => {
                workers.remove(&key);
                None
            }
        }
    }

    async fn dispatch(&self, update: &Update) {
        if let Err(e) = self.process_update(update).await {
            tracing::warn!(
                update_id = update.update_id,
                kind = update.kind(),
                error = %e,
                "Failed to process update"
            );
        }
    }

    fn workers(&self) -> MutexGuard<'_, WorkerTable> {
        self.workers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn log_task_result(result: Result<(), tokio::task::JoinError>) {
    if let Err(e) = result {
        tracing::error!(error = %e, "Dispatcher task failed");
    }
}
