//! Incoming update model
//!
//! Mirrors the subset of the Bot API update shape that conversations care
//! about. Exactly one of the optional payloads is expected to be set.

use crate::conversation::ConversationKey;
use serde::{Deserialize, Serialize};

/// The party that produced an update
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub username: Option<String>,
}

/// Grouping context for messages (private chat, group, channel)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chat {
    pub id: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub message_id: i64,
    /// Absent for anonymous channel posts
    #[serde(default)]
    pub from: Option<User>,
    pub chat: Chat,
    #[serde(default)]
    pub text: Option<String>,
}

impl Message {
    /// Bot command carried by the message text, without the leading slash
    /// and without any `@botname` suffix.
    pub fn command(&self) -> Option<&str> {
        let text = self.text.as_deref()?;
        let token = text.strip_prefix('/')?.split(char::is_whitespace).next()?;
        let command = token.split('@').next().unwrap_or(token);
        if command.is_empty() {
            None
        } else {
            Some(command)
        }
    }

    /// Text that is not a bot command
    pub fn plain_text(&self) -> Option<&str> {
        self.text.as_deref().filter(|text| !text.starts_with('/'))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InlineQuery {
    pub id: String,
    pub from: User,
    #[serde(default)]
    pub query: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChosenInlineResult {
    pub result_id: String,
    pub from: User,
    #[serde(default)]
    pub query: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallbackQuery {
    pub id: String,
    pub from: User,
    /// Missing when the originating message is too old to be delivered
    #[serde(default)]
    pub message: Option<Message>,
    #[serde(default)]
    pub data: Option<String>,
}

/// A single incoming update
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Update {
    pub update_id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<Message>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edited_message: Option<Message>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inline_query: Option<InlineQuery>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chosen_inline_result: Option<ChosenInlineResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub callback_query: Option<CallbackQuery>,
}

impl Update {
    /// Identify the conversation this update belongs to.
    ///
    /// Payloads are inspected in a fixed order: message, edited message,
    /// inline query, chosen inline result, callback query. Returns `None`
    /// when no recognized payload is present or the payload has no sender.
    pub fn conversation_key(&self) -> Option<ConversationKey> {
        if let Some(message) = &self.message {
            let user = message.from.as_ref()?;
            return Some(ConversationKey::new(Some(message.chat.id), user.id));
        }
        if let Some(message) = &self.edited_message {
            let user = message.from.as_ref()?;
            return Some(ConversationKey::new(Some(message.chat.id), user.id));
        }
        if let Some(query) = &self.inline_query {
            return Some(ConversationKey::new(None, query.from.id));
        }
        if let Some(chosen) = &self.chosen_inline_result {
            return Some(ConversationKey::new(None, chosen.from.id));
        }
        if let Some(query) = &self.callback_query {
            let chat_id = query.message.as_ref().map(|m| m.chat.id);
            return Some(ConversationKey::new(chat_id, query.from.id));
        }
        None
    }

    /// Short payload label for log fields
    pub fn kind(&self) -> &'static str {
        if self.message.is_some() {
            "message"
        } else if self.edited_message.is_some() {
            "edited_message"
        } else if self.inline_query.is_some() {
            "inline_query"
        } else if self.chosen_inline_result.is_some() {
            "chosen_inline_result"
        } else if self.callback_query.is_some() {
            "callback_query"
        } else {
            "unknown"
        }
    }

    /// Convenience constructor for a plain chat message
    pub fn text_message(update_id: i64, chat_id: i64, user_id: i64, text: &str) -> Self {
        Self {
            update_id,
            message: Some(Message {
                message_id: update_id,
                from: Some(User {
                    id: user_id,
                    first_name: String::new(),
                    username: None,
                }),
                chat: Chat { id: chat_id },
                text: Some(text.to_string()),
            }),
            ..Self::default()
        }
    }
}
