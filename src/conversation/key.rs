//! Conversation identity

use std::fmt;

/// Identifies one running conversation: the chat it happens in (if any)
/// and the user driving it.
///
/// `chat_id` is `None` for updates without a chat (inline queries, chosen
/// inline results, callback queries on unavailable messages). `None` never
/// compares equal to a real chat id, so chat-less and chat-bound
/// conversations of the same user are tracked separately.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConversationKey {
    pub chat_id: Option<i64>,
    pub user_id: i64,
}

impl ConversationKey {
    pub fn new(chat_id: Option<i64>, user_id: i64) -> Self {
        Self { chat_id, user_id }
    }
}

impl fmt::Display for ConversationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.chat_id {
            Some(chat_id) => write!(f, "{chat_id}:{}", self.user_id),
            None => write!(f, "-:{}", self.user_id),
        }
    }
}
