//! Command handling module.
//!
//! Turns Telegram messages and button presses into ledger operations and
//! the replies that go back to the users.

mod handler;
mod keyboards;
mod types;

pub use handler::UpdateHandler;
pub use types::{BotCommand, CallbackAction, IT_RESOURCES, Reply, escape_html};
