//! Telegram Bot API client.

use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::json;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::RateLimiter;
use super::types::{ApiResponse, File, InlineKeyboardMarkup, Update, User};

/// Minimum spacing between outgoing calls (Telegram allows ~30 messages per second).
const MIN_CALL_INTERVAL_MS: u64 = 35;

/// Extra time on top of the long-poll timeout before the HTTP request gives up.
const HTTP_TIMEOUT_SLACK: Duration = Duration::from_secs(15);

/// Errors that can occur during Telegram operations.
#[derive(Debug, Error)]
pub enum TelegramError {
    #[error("Bot token rejected by Telegram")]
    Unauthorized,

    #[error("Flood wait required: {0} seconds")]
    FloodWait(u32),

    #[error("Telegram API error {code}: {description}")]
    Api { code: u16, description: String },

    #[error("Connection error: {0}")]
    Connection(#[from] reqwest::Error),

    #[error("Unexpected response from Telegram: {0}")]
    Decode(String),
}

impl TelegramError {
    /// Builds an error from a failed Bot API response.
    fn from_response<T>(resp: ApiResponse<T>) -> Self {
        let code = resp.error_code.unwrap_or_default();
        let description = resp.description.unwrap_or_else(|| "no description".to_owned());

        let retry_after = resp
            .parameters
            .and_then(|p| p.retry_after)
            .or_else(|| extract_flood_wait_seconds(&description));

        match (code, retry_after) {
            (429, Some(seconds)) => Self::FloodWait(seconds),
            (401, _) => Self::Unauthorized,
            _ => Self::Api { code, description },
        }
    }
}

/// Extracts flood wait seconds from an error description.
fn extract_flood_wait_seconds(err_msg: &str) -> Option<u32> {
    let patterns = ["retry after ", "FLOOD_WAIT_"];
    let lower = err_msg.to_lowercase();

    for pattern in patterns {
        if let Some(idx) = lower.find(&pattern.to_lowercase()) {
            let start = idx + pattern.len();
            let num_str: String = lower[start..]
                .chars()
                .take_while(char::is_ascii_digit)
                .collect();
            if let Ok(seconds) = num_str.parse() {
                return Some(seconds);
            }
        }
    }
    None
}

/// High-level Bot API client.
pub struct TelegramBot {
    /// HTTP client shared by all calls.
    http: reqwest::Client,

    /// `https://api.telegram.org/bot<token>`.
    method_base: String,

    /// `https://api.telegram.org/file/bot<token>`.
    file_base: String,

    /// Token with the secret part hidden, for logs.
    masked_token: String,

    /// Rate limiter for outgoing calls.
    rate_limiter: RateLimiter,
}

impl TelegramBot {
    /// Creates a client for the given API base URL and bot token.
    pub fn new(api_url: &str, token: &str) -> Result<Self, TelegramError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()?;

        let api_url = api_url.trim_end_matches('/');

        Ok(Self {
            http,
            method_base: format!("{api_url}/bot{token}"),
            file_base: format!("{api_url}/file/bot{token}"),
            masked_token: mask_token(token),
            rate_limiter: RateLimiter::from_millis(MIN_CALL_INTERVAL_MS),
        })
    }

    /// Invokes a Bot API method with JSON parameters.
    async fn call<P, R>(&self, method: &str, params: &P) -> Result<R, TelegramError>
    where
        P: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        self.call_with_timeout(method, params, None).await
    }

    async fn call_with_timeout<P, R>(
        &self,
        method: &str,
        params: &P,
        timeout: Option<Duration>,
    ) -> Result<R, TelegramError>
    where
        P: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let waited = self.rate_limiter.wait_and_acquire().await;
        if !waited.is_zero() {
            debug!("Waited {:?} for rate limit before {}", waited, method);
        }

        let mut request = self
            .http
            .post(format!("{}/{method}", self.method_base))
            .json(params);
        if let Some(timeout) = timeout {
            request = request.timeout(timeout);
        }

        let body = request.send().await?.bytes().await?;
        let resp: ApiResponse<R> = serde_json::from_slice(&body)
            .map_err(|e| TelegramError::Decode(format!("{method}: {e}")))?;

        if resp.ok {
            return resp
                .result
                .ok_or_else(|| TelegramError::Decode(format!("{method}: missing result")));
        }

        let err = TelegramError::from_response(resp);
        if let TelegramError::FloodWait(seconds) = &err {
            warn!("Flood wait triggered by {}: {} seconds", method, seconds);
            self.rate_limiter.handle_flood_wait(*seconds).await;
        }
        Err(err)
    }

    /// Returns the bot's own account; doubles as a token check.
    pub async fn get_me(&self) -> Result<User, TelegramError> {
        info!("Checking bot token {}...", self.masked_token);
        self.call("getMe", &json!({})).await
    }

    /// Long-polls for new updates starting at `offset`.
    pub async fn get_updates(&self, offset: i64, timeout_secs: u64) -> Result<Vec<Update>, TelegramError> {
        let params = json!({
            "offset": offset,
            "timeout": timeout_secs,
            "allowed_updates": ["message", "callback_query"],
        });
        let timeout = Duration::from_secs(timeout_secs) + HTTP_TIMEOUT_SLACK;
        self.call_with_timeout("getUpdates", &params, Some(timeout)).await
    }

    /// Sends an HTML-formatted text message.
    pub async fn send_message(
        &self,
        chat_id: i64,
        text: &str,
        keyboard: Option<&InlineKeyboardMarkup>,
    ) -> Result<(), TelegramError> {
        let mut params = json!({
            "chat_id": chat_id,
            "text": text,
            "parse_mode": "HTML",
        });
        if let Some(keyboard) = keyboard {
            params["reply_markup"] = serde_json::to_value(keyboard)
                .map_err(|e| TelegramError::Decode(e.to_string()))?;
        }

        debug!("Sending message to {}: \"{}\"", chat_id, truncate_for_log(text, 40));
        let _: serde_json::Value = self.call("sendMessage", &params).await?;
        Ok(())
    }

    /// Sends a previously uploaded photo by file id.
    pub async fn send_photo(&self, chat_id: i64, file_id: &str, caption: &str) -> Result<(), TelegramError> {
        let params = json!({
            "chat_id": chat_id,
            "photo": file_id,
            "caption": caption,
            "parse_mode": "HTML",
        });
        let _: serde_json::Value = self.call("sendPhoto", &params).await?;
        Ok(())
    }

    /// Acknowledges a callback query, optionally with a toast or alert.
    pub async fn answer_callback_query(
        &self,
        callback_id: &str,
        text: Option<&str>,
        show_alert: bool,
    ) -> Result<(), TelegramError> {
        let mut params = json!({
            "callback_query_id": callback_id,
            "show_alert": show_alert,
        });
        if let Some(text) = text {
            params["text"] = json!(text);
        }
        let _: bool = self.call("answerCallbackQuery", &params).await?;
        Ok(())
    }

    /// Removes the inline keyboard from a message.
    pub async fn clear_reply_markup(&self, chat_id: i64, message_id: i64) -> Result<(), TelegramError> {
        let params = json!({
            "chat_id": chat_id,
            "message_id": message_id,
            "reply_markup": InlineKeyboardMarkup::default(),
        });
        let _: serde_json::Value = self.call("editMessageReplyMarkup", &params).await?;
        Ok(())
    }

    /// Resolves a file id to a downloadable path.
    pub async fn get_file(&self, file_id: &str) -> Result<File, TelegramError> {
        self.call("getFile", &json!({ "file_id": file_id })).await
    }

    /// Downloads a file previously resolved with [`Self::get_file`].
    pub async fn download_file(&self, file_path: &str) -> Result<Vec<u8>, TelegramError> {
        let resp = self
            .http
            .get(format!("{}/{file_path}", self.file_base))
            .send()
            .await?
            .error_for_status()?;
        Ok(resp.bytes().await?.to_vec())
    }

    /// Downloads a photo by file id.
    pub async fn download_by_id(&self, file_id: &str) -> Result<Vec<u8>, TelegramError> {
        let file = self.get_file(file_id).await?;
        let path = file
            .file_path
            .ok_or_else(|| TelegramError::Decode(format!("file {} has no path", file.file_id)))?;
        self.download_file(&path).await
    }

    /// Registers the webhook URL with Telegram.
    pub async fn set_webhook(&self, url: &str, secret: Option<&str>) -> Result<(), TelegramError> {
        info!("Registering webhook: {}", url);
        let mut params = json!({
            "url": url,
            "allowed_updates": ["message", "callback_query"],
        });
        if let Some(secret) = secret {
            params["secret_token"] = json!(secret);
        }
        let _: bool = self.call("setWebhook", &params).await?;
        Ok(())
    }

    /// Removes any registered webhook so `getUpdates` works.
    pub async fn delete_webhook(&self) -> Result<(), TelegramError> {
        info!("Removing webhook (polling mode)");
        let _: bool = self.call("deleteWebhook", &json!({})).await?;
        Ok(())
    }
}

impl std::fmt::Debug for TelegramBot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelegramBot")
            .field("token", &self.masked_token)
            .field("rate_limiter", &self.rate_limiter)
            .finish_non_exhaustive()
    }
}

/// Masks a bot token for logging (keeps the numeric bot id).
fn mask_token(token: &str) -> String {
    match token.split_once(':') {
        Some((bot_id, _)) if !bot_id.is_empty() => format!("{bot_id}:****"),
        _ => "****".to_owned(),
    }
}

/// Truncates a string for logging purposes.
fn truncate_for_log(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_owned()
    } else {
        format!("{}...", s.chars().take(max_len).collect::<String>())
    }
}
