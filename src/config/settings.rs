//! Application settings loaded from the environment.

use std::fmt;
use std::path::PathBuf;

use super::{ConfigError, Roster};

/// Default Telegram Bot API endpoint.
pub const DEFAULT_TELEGRAM_API_URL: &str = "https://api.telegram.org";

/// How updates reach the bot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum RunMode {
    /// Long-poll `getUpdates`.
    Polling,
    /// Serve `POST /webhook` and `GET /health`.
    Webhook,
}

impl fmt::Display for RunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Polling => f.write_str("polling"),
            Self::Webhook => f.write_str("webhook"),
        }
    }
}

/// Supabase project credentials.
#[derive(Clone)]
pub struct SupabaseConfig {
    /// Project URL, e.g. `https://xyz.supabase.co`.
    pub url: String,

    /// API key sent as `apikey` and bearer token.
    pub key: String,

    /// Storage bucket for receipt photos.
    pub bucket: String,
}

impl fmt::Debug for SupabaseConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SupabaseConfig")
            .field("url", &self.url)
            .field("bucket", &self.bucket)
            .finish_non_exhaustive()
    }
}

/// Complete runtime configuration.
#[derive(Clone)]
pub struct Settings {
    /// Bot API token.
    pub bot_token: String,

    /// Bot API base URL.
    pub api_url: String,

    /// Allowed users and their roles.
    pub roster: Roster,

    /// Supabase backend; `None` means the in-memory ledger.
    pub supabase: Option<SupabaseConfig>,

    /// Snapshot file for the in-memory ledger.
    pub ledger_state_path: Option<PathBuf>,

    /// Public webhook URL registered with Telegram.
    pub webhook_url: Option<String>,

    /// Secret token Telegram echoes in `X-Telegram-Bot-Api-Secret-Token`.
    pub webhook_secret: Option<String>,

    /// Host name or IP the HTTP server binds to, without IPv6 brackets.
    pub listen_host: String,

    /// Port the HTTP server binds to.
    pub listen_port: u16,

    /// Transport mode.
    pub mode: RunMode,
}

impl fmt::Debug for Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Settings")
            .field("api_url", &self.api_url)
            .field("roster", &self.roster.len())
            .field("supabase", &self.supabase)
            .field("ledger_state_path", &self.ledger_state_path)
            .field("webhook_url", &self.webhook_url)
            .field("listen_addr", &self.listen_addr())
            .field("mode", &self.mode)
            .finish_non_exhaustive()
    }
}

fn default_admin() -> String {
    "denisHr55".to_owned()
}

fn default_bucket() -> String {
    "receipts".to_owned()
}

const fn default_port() -> u16 {
    8080
}

impl Settings {
    /// Creates settings from process environment variables.
    ///
    /// Expects `TELEGRAM_BOT_TOKEN` to be set; everything else has defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Creates settings from an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).map(|v| v.trim().to_owned()).filter(|v| !v.is_empty());

        let bot_token =
            var("TELEGRAM_BOT_TOKEN").ok_or(ConfigError::MissingEnvVar("TELEGRAM_BOT_TOKEN"))?;

        let api_url = var("TELEGRAM_API_URL")
            .unwrap_or_else(|| DEFAULT_TELEGRAM_API_URL.to_owned())
            .trim_end_matches('/')
            .to_owned();

        let admin = var("ADMIN_USERNAME").unwrap_or_else(default_admin);
        let roster = Roster::parse(&var("ALLOWED_USERS").unwrap_or_default(), &admin)?;

        let supabase_url = var("SUPABASE_URL").or_else(|| var("NEXT_PUBLIC_SUPABASE_URL"));
        let supabase_key = var("SUPABASE_KEY").or_else(|| var("NEXT_PUBLIC_SUPABASE_ANON_KEY"));
        let supabase = match (supabase_url, supabase_key) {
            (Some(url), Some(key)) => Some(SupabaseConfig {
                url: url.trim_end_matches('/').to_owned(),
                key,
                bucket: var("SUPABASE_STORAGE_BUCKET").unwrap_or_else(default_bucket),
            }),
            _ => None,
        };

        let listen_host = var("HOST").map_or_else(
            || "0.0.0.0".to_owned(),
            |host| host.trim_start_matches('[').trim_end_matches(']').to_owned(),
        );
        let listen_port = match var("PORT") {
            Some(port) => port.parse().map_err(|_| ConfigError::InvalidNumber("PORT"))?,
            None => default_port(),
        };

        let webhook_url = var("WEBHOOK_URL");
        let on_render = var("RENDER").is_some_and(|v| v.eq_ignore_ascii_case("true"));
        let mode = if webhook_url.is_some() || on_render {
            RunMode::Webhook
        } else {
            RunMode::Polling
        };

        Ok(Self {
            bot_token,
            api_url,
            roster,
            supabase,
            ledger_state_path: var("LEDGER_STATE_PATH").map(PathBuf::from),
            webhook_url,
            webhook_secret: var("WEBHOOK_SECRET"),
            listen_host,
            listen_port,
            mode,
        })
    }

    /// `host:port` for logs, with IPv6 hosts in brackets.
    #[must_use]
    pub fn listen_addr(&self) -> String {
        if self.listen_host.contains(':') {
            format!("[{}]:{}", self.listen_host, self.listen_port)
        } else {
            format!("{}:{}", self.listen_host, self.listen_port)
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::config::Role;

    fn settings(vars: &[(&str, &str)]) -> Result<Settings, ConfigError> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect();
        Settings::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let s = settings(&[("TELEGRAM_BOT_TOKEN", "123:abc")]).unwrap();
        assert_eq!(s.api_url, DEFAULT_TELEGRAM_API_URL);
        assert_eq!(s.listen_host, "0.0.0.0");
        assert_eq!(s.listen_port, 8080);
        assert_eq!(s.mode, RunMode::Polling);
        assert!(s.supabase.is_none());
        assert_eq!(s.roster.role_of("denishr55"), Some(Role::Admin));
    }

    #[test]
    fn test_missing_token() {
        let err = settings(&[]).unwrap_err();
        assert!(matches!(err, ConfigError::MissingEnvVar("TELEGRAM_BOT_TOKEN")));
    }

    #[test]
    fn test_webhook_mode_from_url_or_render() {
        let s = settings(&[("TELEGRAM_BOT_TOKEN", "t"), ("WEBHOOK_URL", "https://x/webhook")]).unwrap();
        assert_eq!(s.mode, RunMode::Webhook);

        let s = settings(&[("TELEGRAM_BOT_TOKEN", "t"), ("RENDER", "TRUE")]).unwrap();
        assert_eq!(s.mode, RunMode::Webhook);

        let s = settings(&[("TELEGRAM_BOT_TOKEN", "t"), ("RENDER", "false")]).unwrap();
        assert_eq!(s.mode, RunMode::Polling);
    }

    #[test]
    fn test_supabase_fallback_names() {
        let s = settings(&[
            ("TELEGRAM_BOT_TOKEN", "t"),
            ("NEXT_PUBLIC_SUPABASE_URL", "https://db.example/"),
            ("NEXT_PUBLIC_SUPABASE_ANON_KEY", "anon"),
        ])
        .unwrap();
        let supabase = s.supabase.unwrap();
        assert_eq!(supabase.url, "https://db.example");
        assert_eq!(supabase.bucket, "receipts");
    }

    #[test]
    fn test_invalid_port() {
        let err = settings(&[("TELEGRAM_BOT_TOKEN", "t"), ("PORT", "eighty")]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidNumber("PORT")));
    }

    #[test]
    fn test_listen_host_names_and_ipv6() {
        let s = settings(&[("TELEGRAM_BOT_TOKEN", "t"), ("HOST", "localhost"), ("PORT", "10000")]).unwrap();
        assert_eq!(s.listen_host, "localhost");
        assert_eq!(s.listen_addr(), "localhost:10000");

        let s = settings(&[("TELEGRAM_BOT_TOKEN", "t"), ("HOST", "::")]).unwrap();
        assert_eq!(s.listen_host, "::");
        assert_eq!(s.listen_addr(), "[::]:8080");

        let s = settings(&[("TELEGRAM_BOT_TOKEN", "t"), ("HOST", "[::1]")]).unwrap();
        assert_eq!(s.listen_host, "::1");
    }
}
