//! Long-polling runner.
//!
//! The loop is:
//! 1. Drop any webhook so `getUpdates` is allowed
//! 2. Long-poll from the current offset
//! 3. Dispatch each update in order and advance the offset past it
//! 4. On errors back off (flood wait or a fixed delay) and retry

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use super::Dispatcher;
use crate::telegram::{TelegramError, Update};

/// Long-poll timeout passed to `getUpdates`.
const POLL_TIMEOUT_SECS: u64 = 30;

/// Delay before retrying after a failed poll.
const RETRY_DELAY: Duration = Duration::from_secs(5);

/// Messages that can be sent to the polling runner.
#[derive(Debug, Clone)]
pub enum PollingMessage {
    /// Stop polling once the current batch is dispatched.
    Shutdown,
}

/// Polls the Bot API for updates and feeds them to a dispatcher.
#[derive(Debug)]
pub struct PollingRunner {
    dispatcher: Arc<Dispatcher>,

    /// Next `update_id` to request.
    offset: i64,

    poll_timeout_secs: u64,
    retry_delay: Duration,
}

impl PollingRunner {
    #[must_use]
    pub const fn new(dispatcher: Arc<Dispatcher>) -> Self {
        Self {
            dispatcher,
            offset: 0,
            poll_timeout_secs: POLL_TIMEOUT_SECS,
            retry_delay: RETRY_DELAY,
        }
    }

    /// Sets the delay used after a failed poll.
    #[must_use]
    pub const fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Runs the polling loop until a shutdown message arrives.
    ///
    /// Shutdown can interrupt a pending `getUpdates` call or a retry
    /// delay; a fetched batch is always dispatched in full first.
    pub async fn run(&mut self, mut rx: mpsc::Receiver<PollingMessage>) {
        if let Err(e) = self.dispatcher.bot().delete_webhook().await {
            warn!("Failed to delete webhook before polling: {}", e);
        }
        info!("Polling for updates (timeout {}s)", self.poll_timeout_secs);

        let retry_delay = self.retry_delay;
        loop {
            let polled = tokio::select! {
                msg = rx.recv() => {
                    match msg {
                        Some(PollingMessage::Shutdown) | None => {
                            info!("Polling runner shutting down");
                            break;
                        }
                    }
                }
                result = self.dispatcher.bot().get_updates(self.offset, self.poll_timeout_secs) => result,
            };

            let delay = match polled {
                Ok(updates) => {
                    self.dispatch_batch(&updates).await;
                    None
                }
                Err(TelegramError::FloodWait(seconds)) => Some(Duration::from_secs(u64::from(seconds))),
                Err(e) => {
                    error!("getUpdates failed: {}", e);
                    Some(retry_delay)
                }
            };

            if let Some(delay) = delay {
                debug!("Retrying getUpdates in {:?}", delay);
                tokio::select! {
                    () = sleep(delay) => {}
                    msg = rx.recv() => {
                        match msg {
                            Some(PollingMessage::Shutdown) | None => {
                                info!("Polling runner shutting down");
                                break;
                            }
                        }
                    }
                }
            }
        }
    }

    /// Dispatches a batch in order, advancing the offset past each update.
    async fn dispatch_batch(&mut self, updates: &[Update]) {
        if !updates.is_empty() {
            debug!("Dispatching {} updates", updates.len());
        }
        for update in updates {
            self.dispatcher.process(update).await;
            self.advance(update.update_id);
        }
    }

    fn advance(&mut self, update_id: i64) {
        self.offset = self.offset.max(update_id + 1);
    }
}
