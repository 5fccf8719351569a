//! Team roster: who may use the bot and with which role.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::ConfigError;

/// Role of a team member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Hands out money, approves expenses, sees statistics.
    Admin,
    /// Reports expenses that the admin reimburses.
    Hr,
    /// Keeps a running float of received and spent money.
    It,
}

impl Role {
    /// Wire name of the role.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::Hr => "hr",
            Self::It => "it",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "admin" => Ok(Self::Admin),
            "hr" => Ok(Self::Hr),
            "it" => Ok(Self::It),
            other => Err(ConfigError::InvalidRole(other.to_owned())),
        }
    }
}

/// Strips the leading `@` and lowercases a username for comparisons.
#[must_use]
pub fn normalize_username(name: &str) -> String {
    name.trim().trim_start_matches('@').to_lowercase()
}

/// Allowed users keyed by normalized username.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Roster {
    members: BTreeMap<String, Role>,
    admin: String,
}

impl Roster {
    /// Parses an `ALLOWED_USERS` value such as `@mkkdko:hr,@denishr55:it,@sophie_hr`.
    ///
    /// Entries without a role default to `hr`. The admin is always present
    /// and wins over any other entry with the same name.
    pub fn parse(raw: &str, admin: &str) -> Result<Self, ConfigError> {
        let mut members = BTreeMap::new();

        for entry in raw.split(',') {
            let entry = entry.trim();
            if entry.is_empty() {
                continue;
            }

            let (name, role) = match entry.split_once(':') {
                Some((name, role)) => (name, role.parse()?),
                None => (entry, Role::Hr),
            };

            let name = normalize_username(name);
            if name.is_empty() {
                return Err(ConfigError::InvalidRosterEntry(entry.to_owned()));
            }
            members.insert(name, role);
        }

        let admin = normalize_username(admin);
        if admin.is_empty() {
            return Err(ConfigError::InvalidRosterEntry(String::from("<empty admin>")));
        }
        members.insert(admin.clone(), Role::Admin);

        Ok(Self { members, admin })
    }

    /// Returns the role for a username, if the user is allowed.
    #[must_use]
    pub fn role_of(&self, username: &str) -> Option<Role> {
        self.members.get(&normalize_username(username)).copied()
    }

    /// Normalized admin username.
    #[must_use]
    pub fn admin(&self) -> &str {
        &self.admin
    }

    /// Iterates over all members in username order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, Role)> {
        self.members.iter().map(|(name, role)| (name.as_str(), *role))
    }

    /// Number of allowed users, admin included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Returns true if nobody is allowed (never the case for a parsed roster).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}
