//! conversation-replay - feed recorded updates through a sample conversation
//!
//! Reads newline-delimited Bot API update JSON from the file given as the
//! first argument (or stdin) and routes it through a small registration
//! flow, printing the bot's replies.

use conversation_router::conversation::{CommandHandler, MessageHandler};
use conversation_router::{
    ConversationConfig, ConversationHandler, ConversationKey, Dispatcher, Outcome, Settled, Update,
};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const AWAITING_NAME: &str = "AWAITING_NAME";
const AWAITING_AGE: &str = "AWAITING_AGE";

/// Replies produced by handlers, in the order they were sent
#[derive(Default)]
struct Outbox(Mutex<Vec<(ConversationKey, String)>>);

impl Outbox {
    fn reply(&self, update: &Update, text: impl Into<String>) {
        let Some(key) = update.conversation_key() else {
            return;
        };
        let text = text.into();
        println!("[{key}] {text}");
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((key, text));
    }

    fn len(&self) -> usize {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

fn message_text(update: &Update) -> &str {
    update
        .message
        .as_ref()
        .and_then(|m| m.text.as_deref())
        .unwrap_or_default()
}

fn registration(
    config: ConversationConfig,
) -> Result<ConversationHandler<Outbox>, Box<dyn std::error::Error>> {
    let conversation = ConversationHandler::builder()
        .config(config)
        .entry_point(CommandHandler::new("start", |update: &Update, outbox: &Outbox| {
            outbox.reply(update, "Hi! What is your name?");
            Ok(Outcome::next(AWAITING_NAME))
        }))
        .state(
            AWAITING_NAME,
            MessageHandler::text(|update: &Update, outbox: &Outbox| {
                let name = message_text(update);
                outbox.reply(update, format!("Nice to meet you, {name}. How old are you?"));
                Ok(Outcome::next(AWAITING_AGE))
            }),
        )
        .state(
            AWAITING_AGE,
            MessageHandler::text(|update: &Update, outbox: &Outbox| {
                let Ok(age) = message_text(update).trim().parse::<u32>() else {
                    outbox.reply(update, "Please send your age as a number.");
                    return Ok(Outcome::Unchanged);
                };
                outbox.reply(update, format!("Saving profile (age {age})..."));
                // Stand-in for a slow profile write
                Ok(Outcome::spawn(async move {
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    tracing::info!(age, "Profile saved");
                    Ok::<_, String>(Settled::End)
                }))
            }),
        )
        .fallback(CommandHandler::new("cancel", |update: &Update, outbox: &Outbox| {
            outbox.reply(update, "Registration cancelled.");
            Ok(Outcome::End)
        }))
        .fallback(MessageHandler::new(
            |_| true,
            |update: &Update, outbox: &Outbox| {
                outbox.reply(update, "Sorry, I didn't get that. Send /cancel to stop.");
                Ok(Outcome::Unchanged)
            },
        ))
        .build()?;
    Ok(conversation)
}

async fn feed(
    reader: impl AsyncBufRead + Unpin,
    tx: mpsc::Sender<Update>,
) -> Result<usize, Box<dyn std::error::Error>> {
    let mut lines = reader.lines();
    let mut count = 0;
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<Update>(&line) {
            Ok(update) => {
                tx.send(update).await?;
                count += 1;
            }
            Err(e) => tracing::warn!(error = %e, "Skipping malformed update"),
        }
    }
    Ok(count)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "conversation_router=info,conversation_replay=info".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(false)
                .with_span_list(false)
                .with_writer(std::io::stderr),
        )
        .init();

    let config = ConversationConfig::from_env_over(ConversationConfig {
        name: "registration".to_string(),
        ..ConversationConfig::default()
    })?;
    tracing::info!(
        name = %config.name,
        allow_reentry = config.allow_reentry,
        pending_timeout = ?config.pending_timeout,
        "Conversation configured"
    );

    let dispatcher =
        Arc::new(Dispatcher::new(Outbox::default()).with_conversation(registration(config)?));
    let (tx, rx) = mpsc::channel(64);
    let runner = tokio::spawn(Arc::clone(&dispatcher).run(rx, CancellationToken::new()));

    let count = match std::env::args().nth(1) {
        Some(path) => {
            tracing::info!(path = %path, "Replaying updates from file");
            let file = tokio::fs::File::open(&path).await?;
            feed(BufReader::new(file), tx).await?
        }
        None => feed(BufReader::new(tokio::io::stdin()), tx).await?,
    };

    runner.await?;

    let active = dispatcher.conversations()[0].store().active_states();
    tracing::info!(
        updates = count,
        replies = dispatcher.context().len(),
        active_conversations = active.len(),
        "Replay finished"
    );
    Ok(())
}
