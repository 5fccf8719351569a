//! Ledger data model: amounts, users, balances, transactions, expenses.

use std::fmt;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

use crate::config::{CURRENCY, Role};

/// Amount of money in minor units (kopecks).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Money(i64);

impl Money {
    pub const ZERO: Self = Self(0);

    /// Creates an amount from minor units.
    #[must_use]
    pub const fn from_minor(minor: i64) -> Self {
        Self(minor)
    }

    /// Creates an amount from whole units; `None` on overflow.
    #[must_use]
    pub fn from_units(units: i64) -> Option<Self> {
        units.checked_mul(100).map(Self)
    }

    #[allow(clippy::cast_possible_truncation)]
    fn from_f64(value: f64) -> Option<Self> {
        let minor = (value * 100.0).round();
        (minor.is_finite() && minor.abs() < 9.0e18).then(|| Self(minor as i64))
    }

    /// Amount in minor units.
    #[must_use]
    pub const fn minor(self) -> i64 {
        self.0
    }

    #[must_use]
    pub const fn is_positive(self) -> bool {
        self.0 > 0
    }

    #[must_use]
    pub const fn abs(self) -> Self {
        Self(self.0.saturating_abs())
    }

    #[must_use]
    pub fn checked_add(self, other: Self) -> Option<Self> {
        self.0.checked_add(other.0).map(Self)
    }

    #[must_use]
    pub fn checked_neg(self) -> Option<Self> {
        self.0.checked_neg().map(Self)
    }

    /// Parses a plain decimal such as `1500`, `-20.5` or `1500.00`.
    ///
    /// At most two significant fractional digits are accepted.
    #[must_use]
    pub fn parse_exact(s: &str) -> Option<Self> {
        let s = s.trim();
        let (negative, digits) = match s.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, s),
        };

        let (whole, frac) = digits.split_once('.').unwrap_or((digits, ""));
        if (whole.is_empty() && frac.is_empty())
            || !whole.bytes().all(|b| b.is_ascii_digit())
            || !frac.bytes().all(|b| b.is_ascii_digit())
        {
            return None;
        }

        // Only ASCII digits remain, so byte slicing is safe.
        let frac = if frac.len() > 2 && frac[2..].bytes().all(|b| b == b'0') {
            &frac[..2]
        } else {
            frac
        };
        if frac.len() > 2 {
            return None;
        }

        let whole: i64 = if whole.is_empty() { 0 } else { whole.parse().ok()? };
        let frac_minor: i64 = match frac.len() {
            0 => 0,
            1 => frac.parse::<i64>().ok()? * 10,
            _ => frac.parse().ok()?,
        };

        let minor = whole.checked_mul(100)?.checked_add(frac_minor)?;
        Some(Self(if negative { -minor } else { minor }))
    }

    /// Extracts a positive amount from free-form user input.
    ///
    /// Takes the first run of digits, dots and commas (comma counts as the
    /// decimal point), so `"1500 грн"` and `"12,5"` both work.
    #[must_use]
    pub fn parse_amount(text: &str) -> Option<Self> {
        let token: String = text
            .chars()
            .skip_while(|c| !is_amount_char(*c))
            .take_while(|c| is_amount_char(*c))
            .map(|c| if c == ',' { '.' } else { c })
            .collect();

        Self::parse_exact(&token).filter(|m| m.is_positive())
    }
}

fn is_amount_char(c: char) -> bool {
    c.is_ascii_digit() || c == '.' || c == ','
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        let (units, cents) = (abs / 100, abs % 100);
        if cents == 0 {
            write!(f, "{sign}{units}")
        } else {
            write!(f, "{sign}{units}.{cents:02}")
        }
    }
}

impl Serialize for Money {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Money {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        let parsed = match &value {
            Value::String(s) => Self::parse_exact(s),
            Value::Number(n) => n
                .as_i64()
                .and_then(Self::from_units)
                .or_else(|| n.as_f64().and_then(Self::from_f64)),
            Value::Null => Some(Self::ZERO),
            _ => None,
        };
        parsed.ok_or_else(|| D::Error::custom(format!("invalid amount: {value}")))
    }
}

/// Row id as returned by the database (integer or uuid).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RecordId(String);

impl RecordId {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Serialize for RecordId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for RecordId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match Value::deserialize(deserializer)? {
            Value::String(s) => Ok(Self(s)),
            Value::Number(n) => Ok(Self(n.to_string())),
            other => Err(D::Error::custom(format!("invalid record id: {other}"))),
        }
    }
}

/// Row of the `users` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    pub id: RecordId,
    #[serde(default)]
    pub tg_id: Option<i64>,
    pub username: String,
    pub role: Role,
    #[serde(default)]
    pub created_at: Option<String>,
}

/// Insert payload for `users`.
#[derive(Debug, Clone, Serialize)]
pub struct NewUser {
    pub tg_id: i64,
    pub username: String,
    pub role: Role,
    pub created_at: String,
}

/// Row of the `balances` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceRow {
    pub user_id: RecordId,
    pub balance: Money,
    #[serde(default)]
    pub updated_at: Option<String>,
}

/// Direction of a balance change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionKind {
    Credit,
    Debit,
}

/// Row of the `transactions` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub user_id: RecordId,
    #[serde(default)]
    pub counterpart: Option<RecordId>,
    pub amount: Money,
    #[serde(rename = "type")]
    pub kind: TransactionKind,
    pub created_at: String,
}

/// Approval status of an expense.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExpenseStatus {
    Pending,
    Paid,
}

/// Where a receipt photo ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Receipt {
    /// Uploaded to storage, publicly reachable.
    Uploaded(String),
    /// Only known by its Telegram file id.
    TelegramFile(String),
}

/// Insert payload for `expenses`.
#[derive(Debug, Clone, Serialize)]
pub struct NewExpense {
    pub user_id: RecordId,
    pub username: String,
    pub role: Role,
    pub amount: Money,
    pub currency: String,
    pub resource: Option<String>,
    pub image_url: Option<String>,
    pub photo_id: Option<String>,
    pub note: Option<String>,
    pub status: ExpenseStatus,
    pub created_at: String,
}

impl NewExpense {
    /// Builds a pending expense for `user`.
    #[must_use]
    pub fn pending(
        user: &UserRecord,
        amount: Money,
        resource: Option<String>,
        receipt: Option<Receipt>,
        note: Option<String>,
        created_at: String,
    ) -> Self {
        let (image_url, photo_id) = match receipt {
            Some(Receipt::Uploaded(url)) => (Some(url), None),
            Some(Receipt::TelegramFile(file_id)) => (None, Some(file_id)),
            None => (None, None),
        };

        Self {
            user_id: user.id.clone(),
            username: user.username.clone(),
            role: user.role,
            amount,
            currency: CURRENCY.to_owned(),
            resource,
            image_url,
            photo_id,
            note,
            status: ExpenseStatus::Pending,
            created_at,
        }
    }
}

fn default_currency() -> String {
    CURRENCY.to_owned()
}

/// Row of the `expenses` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Expense {
    pub id: RecordId,
    #[serde(default)]
    pub user_id: Option<RecordId>,
    pub username: String,
    pub role: Role,
    pub amount: Money,
    #[serde(default = "default_currency")]
    pub currency: String,
    #[serde(default)]
    pub resource: Option<String>,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub photo_id: Option<String>,
    #[serde(default)]
    pub note: Option<String>,
    pub status: ExpenseStatus,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub paid_at: Option<String>,
    #[serde(default)]
    pub paid_by: Option<RecordId>,
}

impl Expense {
    /// Materializes an insert payload with an assigned id.
    #[must_use]
    pub fn from_new(id: RecordId, new: NewExpense) -> Self {
        Self {
            id,
            user_id: Some(new.user_id),
            username: new.username,
            role: new.role,
            amount: new.amount,
            currency: new.currency,
            resource: new.resource,
            image_url: new.image_url,
            photo_id: new.photo_id,
            note: new.note,
            status: new.status,
            created_at: Some(new.created_at),
            paid_at: None,
            paid_by: None,
        }
    }

    #[must_use]
    pub fn is_paid(&self) -> bool {
        self.status == ExpenseStatus::Paid
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_amount_from_text() {
        assert_eq!(Money::parse_amount("1500"), Some(Money::from_minor(150_000)));
        assert_eq!(Money::parse_amount("потратил 1500 грн"), Some(Money::from_minor(150_000)));
        assert_eq!(Money::parse_amount("12,5"), Some(Money::from_minor(1250)));
        assert_eq!(Money::parse_amount("1 500"), Some(Money::from_minor(100)));
        assert_eq!(Money::parse_amount(".75"), Some(Money::from_minor(75)));
    }

    #[test]
    fn test_parse_amount_rejects() {
        assert_eq!(Money::parse_amount(""), None);
        assert_eq!(Money::parse_amount("нет"), None);
        assert_eq!(Money::parse_amount("0"), None);
        assert_eq!(Money::parse_amount("1.2.3"), None);
        assert_eq!(Money::parse_amount("."), None);
        assert_eq!(Money::parse_amount("10.555"), None);
        assert_eq!(Money::parse_amount("99999999999999999999"), None);
    }

    #[test]
    fn test_parse_exact_trailing_zeros_and_sign() {
        assert_eq!(Money::parse_exact("1500.000000"), Some(Money::from_minor(150_000)));
        assert_eq!(Money::parse_exact("-20.5"), Some(Money::from_minor(-2050)));
        assert_eq!(Money::parse_exact("abc"), None);
    }

    #[test]
    fn test_display() {
        assert_eq!(Money::from_minor(150_000).to_string(), "1500");
        assert_eq!(Money::from_minor(150_050).to_string(), "1500.50");
        assert_eq!(Money::from_minor(-5).to_string(), "-0.05");
        assert_eq!(Money::ZERO.to_string(), "0");
    }

    #[test]
    fn test_money_from_json_variants() {
        let from_str: Money = serde_json::from_str("\"12.30\"").unwrap();
        let from_int: Money = serde_json::from_str("12").unwrap();
        let from_float: Money = serde_json::from_str("12.3").unwrap();
        assert_eq!(from_str, Money::from_minor(1230));
        assert_eq!(from_int, Money::from_minor(1200));
        assert_eq!(from_float, Money::from_minor(1230));
        assert_eq!(serde_json::to_string(&from_str).unwrap(), "\"12.30\"");
    }

    #[test]
    fn test_record_id_from_number_or_string() {
        let num: RecordId = serde_json::from_str("17").unwrap();
        let uuid: RecordId = serde_json::from_str("\"6f1c\"").unwrap();
        assert_eq!(num.as_str(), "17");
        assert_eq!(uuid.to_string(), "6f1c");
        assert!(serde_json::from_str::<RecordId>("true").is_err());
    }

    #[test]
    fn test_expense_row_decoding() {
        let json = r#"{"id": 3, "user_id": 1, "username": "mkkdko", "role": "hr",
            "amount": 1500, "status": "pending", "resource": null}"#;
        let expense: Expense = serde_json::from_str(json).unwrap();
        assert_eq!(expense.currency, "UAH");
        assert_eq!(expense.amount, Money::from_minor(150_000));
        assert!(!expense.is_paid());
    }
}
