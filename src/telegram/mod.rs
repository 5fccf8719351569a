//! Telegram client wrapper module.
//!
//! Provides the Bot API client, its wire types and the rate limiter
//! that keeps outgoing calls under Telegram's flood limits.

mod client;
mod rate_limiter;
pub mod types;

pub use client::{TelegramBot, TelegramError};
pub use rate_limiter::RateLimiter;
pub use types::{CallbackQuery, InlineKeyboardButton, InlineKeyboardMarkup, Message, Update, User};
