//! Configuration module for the ledger bot.
//!
//! Handles loading and validation of runtime settings, the team roster
//! and the Supabase credentials.

mod roster;
mod settings;

pub use roster::{Role, Roster, normalize_username};
pub use settings::{DEFAULT_TELEGRAM_API_URL, RunMode, Settings, SupabaseConfig};

/// Currency all balances are kept in.
pub const CURRENCY: &str = "UAH";

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(&'static str),

    #[error("Invalid number in environment variable {0}")]
    InvalidNumber(&'static str),

    #[error("Invalid roster entry: {0}")]
    InvalidRosterEntry(String),

    #[error("Unknown role '{0}' (expected admin, hr or it)")]
    InvalidRole(String),
}
