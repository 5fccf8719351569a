//! Command, callback and reply types.

use std::fmt;

use crate::ledger::RecordId;
use crate::telegram::InlineKeyboardMarkup;

/// Advertising resources IT can spend on.
pub const IT_RESOURCES: [&str; 5] = ["Работа юа", "Джубл", "Телеграм", "Таргет", "Другое"];

/// Slash commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BotCommand {
    /// Log in and show the role menu.
    Start,

    /// Show usage help.
    Help,

    /// Abort the current dialogue.
    Cancel,
}

impl BotCommand {
    /// Parses a command from a message text.
    ///
    /// Accepts the `/cmd@BotName args` form Telegram uses in groups.
    #[must_use]
    pub fn parse(text: &str) -> Option<Self> {
        let text = text.trim();
        let after_slash = text.strip_prefix('/')?;

        let word = after_slash
            .split(char::is_whitespace)
            .next()
            .unwrap_or_default();
        let cmd = word.split('@').next().unwrap_or_default().to_lowercase();

        match cmd.as_str() {
            "start" => Some(Self::Start),
            "help" | "h" => Some(Self::Help),
            "cancel" | "stop" => Some(Self::Cancel),
            _ => None,
        }
    }

    /// Returns the command name as it appears in help.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Help => "help",
            Self::Cancel => "cancel",
        }
    }

    /// Returns the command description for help.
    #[must_use]
    pub const fn description(self) -> &'static str {
        match self {
            Self::Start => "Войти и открыть меню",
            Self::Help => "Подсказка",
            Self::Cancel => "Отменить текущую операцию",
        }
    }

    /// All commands in help order.
    #[must_use]
    pub const fn all() -> [Self; 3] {
        [Self::Start, Self::Help, Self::Cancel]
    }
}

impl fmt::Display for BotCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/{}", self.name())
    }
}

/// Inline keyboard actions, encoded in `callback_data`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackAction {
    Balance,
    HrSpent,
    ItReceived,
    ItSpent,
    ItResource(String),
    AdminGive,
    AdminStats,
    AdminOwed,
    AdminPaid(RecordId),
    AdminDue(RecordId),
}

impl CallbackAction {
    /// Parses callback data such as `admin:paid:17`.
    #[must_use]
    pub fn parse(data: &str) -> Option<Self> {
        match data {
            "balance" => return Some(Self::Balance),
            "hr:spent" => return Some(Self::HrSpent),
            "it:received" => return Some(Self::ItReceived),
            "it:spent" => return Some(Self::ItSpent),
            "admin:give" => return Some(Self::AdminGive),
            "admin:stats" => return Some(Self::AdminStats),
            "admin:owed" => return Some(Self::AdminOwed),
            _ => {}
        }

        if let Some(resource) = data.strip_prefix("res:") {
            return (!resource.is_empty()).then(|| Self::ItResource(resource.to_owned()));
        }
        if let Some(id) = data.strip_prefix("admin:paid:") {
            return (!id.is_empty()).then(|| Self::AdminPaid(RecordId::new(id)));
        }
        if let Some(id) = data.strip_prefix("admin:due:") {
            return (!id.is_empty()).then(|| Self::AdminDue(RecordId::new(id)));
        }
        None
    }

    /// Encodes the action as callback data.
    #[must_use]
    pub fn data(&self) -> String {
        match self {
            Self::Balance => "balance".to_owned(),
            Self::HrSpent => "hr:spent".to_owned(),
            Self::ItReceived => "it:received".to_owned(),
            Self::ItSpent => "it:spent".to_owned(),
            Self::ItResource(resource) => format!("res:{resource}"),
            Self::AdminGive => "admin:give".to_owned(),
            Self::AdminStats => "admin:stats".to_owned(),
            Self::AdminOwed => "admin:owed".to_owned(),
            Self::AdminPaid(id) => format!("admin:paid:{id}"),
            Self::AdminDue(id) => format!("admin:due:{id}"),
        }
    }
}

/// Something the bot should do in Telegram in response to an update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// HTML text message, optionally with an inline keyboard.
    Text {
        chat_id: i64,
        text: String,
        keyboard: Option<InlineKeyboardMarkup>,
    },

    /// Forward a photo by Telegram file id.
    Photo {
        chat_id: i64,
        file_id: String,
        caption: String,
    },

    /// Acknowledge a button press.
    CallbackAnswer {
        callback_id: String,
        text: Option<String>,
        show_alert: bool,
    },

    /// Remove the keyboard from an already handled message.
    ClearKeyboard { chat_id: i64, message_id: i64 },
}

impl Reply {
    #[must_use]
    pub fn text(chat_id: i64, text: impl Into<String>) -> Self {
        Self::Text {
            chat_id,
            text: text.into(),
            keyboard: None,
        }
    }

    #[must_use]
    pub fn with_keyboard(chat_id: i64, text: impl Into<String>, keyboard: InlineKeyboardMarkup) -> Self {
        Self::Text {
            chat_id,
            text: text.into(),
            keyboard: Some(keyboard),
        }
    }

    /// Silent acknowledgement.
    #[must_use]
    pub fn ack(callback_id: &str) -> Self {
        Self::CallbackAnswer {
            callback_id: callback_id.to_owned(),
            text: None,
            show_alert: false,
        }
    }

    /// Short toast on top of the chat.
    #[must_use]
    pub fn toast(callback_id: &str, text: impl Into<String>) -> Self {
        Self::CallbackAnswer {
            callback_id: callback_id.to_owned(),
            text: Some(text.into()),
            show_alert: false,
        }
    }

    /// Modal alert.
    #[must_use]
    pub fn alert(callback_id: &str, text: impl Into<String>) -> Self {
        Self::CallbackAnswer {
            callback_id: callback_id.to_owned(),
            text: Some(text.into()),
            show_alert: true,
        }
    }
}

/// Escapes text for Telegram's HTML parse mode.
#[must_use]
pub fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            _ => out.push(c),
        }
    }
    out
}
