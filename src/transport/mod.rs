//! Update transports.
//!
//! Updates arrive either through a `getUpdates` long-poll loop or through
//! a webhook served by axum. Both hand updates to the same [`Dispatcher`]
//! one at a time.

mod polling;
mod webhook;

use std::sync::Arc;

use tracing::{debug, warn};

pub use polling::{PollingMessage, PollingRunner};
pub use webhook::{WebhookState, router, serve, spawn_update_worker};

use crate::commands::{Reply, UpdateHandler};
use crate::telegram::{TelegramBot, TelegramError, Update};

/// Runs the handler for an update and delivers its replies.
#[derive(Debug)]
pub struct Dispatcher {
    handler: UpdateHandler,
    bot: Arc<TelegramBot>,
}

impl Dispatcher {
    #[must_use]
    pub const fn new(handler: UpdateHandler, bot: Arc<TelegramBot>) -> Self {
        Self { handler, bot }
    }

    #[must_use]
    pub fn bot(&self) -> &TelegramBot {
        &self.bot
    }

    /// Handles one update; delivery failures are logged, never returned.
    pub async fn process(&self, update: &Update) {
        let replies = self.handler.handle(update).await;
        debug!("Update {} produced {} replies", update.update_id, replies.len());

        for reply in &replies {
            if let Err(e) = self.deliver(reply).await {
                warn!("Failed to deliver reply for update {}: {}", update.update_id, e);
            }
        }
    }

    async fn deliver(&self, reply: &Reply) -> Result<(), TelegramError> {
        match reply {
            Reply::Text {
                chat_id,
                text,
                keyboard,
            } => self.bot.send_message(*chat_id, text, keyboard.as_ref()).await,
            Reply::Photo {
                chat_id,
                file_id,
                caption,
            } => self.bot.send_photo(*chat_id, file_id, caption).await,
            Reply::CallbackAnswer {
                callback_id,
                text,
                show_alert,
            } => {
                self.bot
                    .answer_callback_query(callback_id, text.as_deref(), *show_alert)
                    .await
            }
            Reply::ClearKeyboard { chat_id, message_id } => {
                self.bot.clear_reply_markup(*chat_id, *message_id).await
            }
        }
    }
}
