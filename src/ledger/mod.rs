//! Team ledger: users, balances, transactions and expenses.
//!
//! The [`Ledger`] service owns the balance rules; the [`Store`] decides
//! whether rows go to Supabase or stay in memory.

mod memory;
mod receipts;
mod store;
mod supabase;
mod types;

use std::collections::HashMap;

use chrono::{SecondsFormat, Utc};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

pub use memory::{MemoryStore, Snapshot};
pub use receipts::ReceiptArchive;
pub use store::Store;
pub use supabase::SupabaseStore;
pub use types::{
    BalanceRow, Expense, ExpenseStatus, Money, NewExpense, NewUser, Receipt, RecordId,
    Transaction, TransactionKind, UserRecord,
};

use crate::config::{Roster, Settings, normalize_username};

/// Errors from the ledger and its storage backends.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("Database request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Database returned {status}: {body}")]
    Api { status: u16, body: String },

    #[error("Failed to decode ledger data: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("Ledger snapshot I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Supabase key contains characters not allowed in HTTP headers")]
    InvalidKey,

    #[error("Insert into {0} returned no rows")]
    EmptyInsert(&'static str),

    #[error("Balance overflow")]
    Overflow,
}

/// Current UTC time in RFC 3339, as stored in timestamp columns.
pub fn now_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Result of approving an expense.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PayOutcome {
    /// No expense with that id.
    NotFound,
    /// Approved earlier; nothing changed.
    AlreadyPaid,
    /// Money moved from the admin to the submitter.
    Paid {
        expense: Expense,
        recipient: Option<UserRecord>,
        recipient_balance: Option<Money>,
    },
}

/// Ledger service enforcing the balance rules on top of a [`Store`].
#[derive(Debug)]
pub struct Ledger {
    store: Store,
    roster: Roster,

    /// Serializes balance read-modify-write cycles.
    balance_lock: Mutex<()>,
}

impl Ledger {
    #[must_use]
    pub fn new(store: Store, roster: Roster) -> Self {
        Self {
            store,
            roster,
            balance_lock: Mutex::new(()),
        }
    }

    /// Builds the ledger from settings: Supabase when configured, memory otherwise.
    pub fn open(settings: &Settings) -> Result<Self, LedgerError> {
        let store = match (&settings.supabase, &settings.ledger_state_path) {
            (Some(supabase), _) => Store::Supabase(SupabaseStore::new(supabase)?),
            (None, Some(path)) => {
                info!("Supabase not configured; using ledger snapshot {}", path.display());
                Store::Memory(MemoryStore::open(path)?)
            }
            (None, None) => {
                warn!("Supabase URL/KEY not set; balances are kept in memory only");
                Store::Memory(MemoryStore::new())
            }
        };
        Ok(Self::new(store, settings.roster.clone()))
    }

    #[must_use]
    pub const fn store(&self) -> &Store {
        &self.store
    }

    /// Finds or registers the Telegram user, if the roster allows them.
    ///
    /// Users without a username are keyed as `id<tg_id>`. The roster is
    /// authoritative for the role; stored rows are updated to match.
    pub async fn ensure_user(
        &self,
        tg_id: i64,
        username: Option<&str>,
    ) -> Result<Option<UserRecord>, LedgerError> {
        let key = username
            .map(normalize_username)
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| format!("id{tg_id}"));

        let Some(role) = self.roster.role_of(&key) else {
            debug!("User {} ({}) is not on the roster", key, tg_id);
            return Ok(None);
        };

        let existing = match self.store.find_user_by_tg_id(tg_id).await? {
            Some(user) => Some(user),
            None => match self.store.find_user_by_username(&key).await? {
                Some(mut user) => {
                    if user.tg_id.is_none() {
                        self.store.set_user_tg_id(&user.id, tg_id).await?;
                        user.tg_id = Some(tg_id);
                    }
                    Some(user)
                }
                None => None,
            },
        };

        if let Some(mut user) = existing {
            if user.role != role {
                info!("Updating role of @{}: {} -> {}", user.username, user.role, role);
                self.store.set_user_role(&user.id, role).await?;
                user.role = role;
            }
            return Ok(Some(user));
        }

        info!("Registering @{} as {}", key, role);
        let user = self
            .store
            .insert_user(NewUser {
                tg_id,
                username: key,
                role,
                created_at: now_timestamp(),
            })
            .await?;
        Ok(Some(user))
    }

    pub async fn user_by_username(&self, username: &str) -> Result<Option<UserRecord>, LedgerError> {
        self.store.find_user_by_username(username).await
    }

    /// Stored row of the roster admin, once they have pressed /start.
    pub async fn admin(&self) -> Result<Option<UserRecord>, LedgerError> {
        self.store.find_user_by_username(self.roster.admin()).await
    }

    pub async fn balance(&self, user_id: &RecordId) -> Result<Money, LedgerError> {
        self.store.get_balance(user_id).await
    }

    /// Adds `delta` to a balance and records the transaction; returns the new balance.
    pub async fn change_balance(
        &self,
        user_id: &RecordId,
        delta: Money,
        counterpart: Option<&RecordId>,
    ) -> Result<Money, LedgerError> {
        let _guard = self.balance_lock.lock().await;
        self.apply_delta(user_id, delta, counterpart).await
    }

    /// Moves `amount` from one member to another; either side may be absent.
    ///
    /// Returns the recipient's new balance.
    pub async fn transfer(
        &self,
        from: Option<&UserRecord>,
        to: Option<&UserRecord>,
        amount: Money,
    ) -> Result<Option<Money>, LedgerError> {
        let _guard = self.balance_lock.lock().await;
        self.transfer_locked(from, to, amount).await
    }

    async fn transfer_locked(
        &self,
        from: Option<&UserRecord>,
        to: Option<&UserRecord>,
        amount: Money,
    ) -> Result<Option<Money>, LedgerError> {
        let debit = amount.checked_neg().ok_or(LedgerError::Overflow)?;
        if let Some(from) = from {
            self.apply_delta(&from.id, debit, to.map(|u| &u.id)).await?;
        }
        match to {
            Some(to) => Ok(Some(self.apply_delta(&to.id, amount, from.map(|u| &u.id)).await?)),
            None => Ok(None),
        }
    }

    async fn apply_delta(
        &self,
        user_id: &RecordId,
        delta: Money,
        counterpart: Option<&RecordId>,
    ) -> Result<Money, LedgerError> {
        let current = self.store.get_balance(user_id).await?;
        let updated = current.checked_add(delta).ok_or(LedgerError::Overflow)?;
        self.store.set_balance(user_id, updated).await?;

        let kind = if delta.is_positive() {
            TransactionKind::Credit
        } else {
            TransactionKind::Debit
        };
        self.store
            .insert_transaction(Transaction {
                user_id: user_id.clone(),
                counterpart: counterpart.cloned(),
                amount: delta.abs(),
                kind,
                created_at: now_timestamp(),
            })
            .await?;

        debug!("Balance of {} changed by {}: {} -> {}", user_id, delta, current, updated);
        Ok(updated)
    }

    pub async fn record_expense(&self, expense: NewExpense) -> Result<Expense, LedgerError> {
        let stored = self.store.insert_expense(expense).await?;
        info!(
            "Expense #{} recorded: @{} {} {}",
            stored.id, stored.username, stored.amount, stored.currency
        );
        Ok(stored)
    }

    pub async fn expense(&self, id: &RecordId) -> Result<Option<Expense>, LedgerError> {
        self.store.get_expense(id).await
    }

    /// Approves an expense: the row is marked paid, then the admin pays the submitter.
    ///
    /// Marking first means a retried approval can never move the money twice.
    pub async fn pay_expense(&self, id: &RecordId, admin: &UserRecord) -> Result<PayOutcome, LedgerError> {
        let _guard = self.balance_lock.lock().await;

        let Some(expense) = self.store.get_expense(id).await? else {
            return Ok(PayOutcome::NotFound);
        };
        if expense.is_paid() {
            return Ok(PayOutcome::AlreadyPaid);
        }

        if !self.store.mark_expense_paid(id, Some(&admin.id)).await? {
            return Ok(PayOutcome::AlreadyPaid);
        }

        let recipient = self.store.find_user_by_username(&expense.username).await?;
        let recipient_balance = match self
            .transfer_locked(Some(admin), recipient.as_ref(), expense.amount)
            .await
        {
            Ok(balance) => balance,
            Err(e) => {
                error!(
                    "Expense #{} is marked paid but {} {} did not move: {}",
                    expense.id, expense.amount, expense.currency, e
                );
                return Err(e);
            }
        };

        info!("Expense #{} paid by @{}", expense.id, admin.username);
        Ok(PayOutcome::Paid {
            expense,
            recipient,
            recipient_balance,
        })
    }

    /// Every member with their current balance.
    pub async fn statistics(&self) -> Result<Vec<(UserRecord, Money)>, LedgerError> {
        let users = self.store.list_users().await?;
        let balances: HashMap<RecordId, Money> = self
            .store
            .list_balances()
            .await?
            .into_iter()
            .map(|row| (row.user_id, row.balance))
            .collect();

        Ok(users
            .into_iter()
            .map(|user| {
                let balance = balances.get(&user.id).copied().unwrap_or_default();
                (user, balance)
            })
            .collect())
    }

    /// Expenses still waiting for the admin.
    pub async fn pending_expenses(&self) -> Result<Vec<Expense>, LedgerError> {
        self.store.list_pending_expenses().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Role;

    fn ledger() -> Ledger {
        let roster = Roster::parse("@mkkdko:hr,@denishr55:it", "boss").unwrap();
        Ledger::new(Store::Memory(MemoryStore::new()), roster)
    }

    #[tokio::test]
    async fn test_ensure_user_registers_and_denies() {
        let ledger = ledger();

        let hr = ledger.ensure_user(10, Some("MkkDko")).await.unwrap().unwrap();
        assert_eq!(hr.role, Role::Hr);
        assert_eq!(hr.username, "mkkdko");

        // Same user again: no duplicate row.
        let again = ledger.ensure_user(10, Some("mkkdko")).await.unwrap().unwrap();
        assert_eq!(again.id, hr.id);
        assert_eq!(ledger.statistics().await.unwrap().len(), 1);

        assert!(ledger.ensure_user(11, Some("stranger")).await.unwrap().is_none());
        assert!(ledger.ensure_user(12, None).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_ensure_user_syncs_role_from_roster() {
        let store = MemoryStore::new();
        let pre = store
            .insert_user(NewUser {
                tg_id: 0,
                username: "denishr55".to_owned(),
                role: Role::Hr,
                created_at: now_timestamp(),
            })
            .await
            .unwrap();
        let ledger = Ledger::new(Store::Memory(store), Roster::parse("@denishr55:it", "boss").unwrap());

        let user = ledger.ensure_user(0, Some("denishr55")).await.unwrap().unwrap();
        assert_eq!(user.id, pre.id);
        assert_eq!(user.role, Role::It);
    }

    #[tokio::test]
    async fn test_user_without_username_uses_id_key() {
        let roster = Roster::parse("id777:it", "boss").unwrap();
        let ledger = Ledger::new(Store::Memory(MemoryStore::new()), roster);
        let user = ledger.ensure_user(777, None).await.unwrap().unwrap();
        assert_eq!(user.username, "id777");
        assert_eq!(user.role, Role::It);
    }

    #[tokio::test]
    async fn test_change_balance_records_transactions() {
        let ledger = ledger();
        let it = ledger.ensure_user(20, Some("denishr55")).await.unwrap().unwrap();

        let after_credit = ledger
            .change_balance(&it.id, Money::from_minor(500_000), None)
            .await
            .unwrap();
        let after_debit = ledger
            .change_balance(&it.id, Money::from_minor(-120_000), None)
            .await
            .unwrap();

        assert_eq!(after_credit, Money::from_minor(500_000));
        assert_eq!(after_debit, Money::from_minor(380_000));

        let Store::Memory(store) = ledger.store() else {
            panic!("expected memory store");
        };
        let txs = store.snapshot().await.transactions;
        assert_eq!(txs.len(), 2);
        assert_eq!(txs[0].kind, TransactionKind::Credit);
        assert_eq!(txs[1].kind, TransactionKind::Debit);
        assert_eq!(txs[1].amount, Money::from_minor(120_000));
    }

    #[tokio::test]
    async fn test_transfer_moves_money() {
        let ledger = ledger();
        let admin = ledger.ensure_user(1, Some("boss")).await.unwrap().unwrap();
        let hr = ledger.ensure_user(2, Some("mkkdko")).await.unwrap().unwrap();

        let new_balance = ledger
            .transfer(Some(&admin), Some(&hr), Money::from_minor(150_000))
            .await
            .unwrap();

        assert_eq!(new_balance, Some(Money::from_minor(150_000)));
        assert_eq!(ledger.balance(&admin.id).await.unwrap(), Money::from_minor(-150_000));
    }

    #[tokio::test]
    async fn test_pay_expense_once() {
        let ledger = ledger();
        let admin = ledger.ensure_user(1, Some("boss")).await.unwrap().unwrap();
        let hr = ledger.ensure_user(2, Some("mkkdko")).await.unwrap().unwrap();
        let expense = ledger
            .record_expense(NewExpense::pending(&hr, Money::from_minor(30_000), None, None, None, now_timestamp()))
            .await
            .unwrap();

        let outcome = ledger.pay_expense(&expense.id, &admin).await.unwrap();
        assert!(matches!(
            outcome,
            PayOutcome::Paid { recipient_balance: Some(b), .. } if b == Money::from_minor(30_000)
        ));

        let second = ledger.pay_expense(&expense.id, &admin).await.unwrap();
        assert_eq!(second, PayOutcome::AlreadyPaid);
        assert_eq!(ledger.balance(&hr.id).await.unwrap(), Money::from_minor(30_000));

        let missing = ledger.pay_expense(&RecordId::new("999"), &admin).await.unwrap();
        assert_eq!(missing, PayOutcome::NotFound);
        assert!(ledger.pending_expenses().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_change_balance_overflow_is_rejected() {
        let ledger = ledger();
        let it = ledger.ensure_user(20, Some("denishr55")).await.unwrap().unwrap();
        ledger
            .change_balance(&it.id, Money::from_minor(i64::MAX), None)
            .await
            .unwrap();

        let err = ledger
            .change_balance(&it.id, Money::from_minor(1), None)
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::Overflow));
        assert_eq!(ledger.balance(&it.id).await.unwrap(), Money::from_minor(i64::MAX));
    }

    #[tokio::test]
    async fn test_pay_expense_retry_after_storage_failure() {
        let dir = std::env::temp_dir().join(format!("ledger_pay_{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let store = MemoryStore::open(dir.join("ledger.json")).unwrap();
        let roster = Roster::parse("@mkkdko:hr", "boss").unwrap();
        let ledger = Ledger::new(Store::Memory(store), roster);

        let admin = ledger.ensure_user(1, Some("boss")).await.unwrap().unwrap();
        let hr = ledger.ensure_user(2, Some("mkkdko")).await.unwrap().unwrap();
        let expense = ledger
            .record_expense(NewExpense::pending(&hr, Money::from_minor(30_000), None, None, None, now_timestamp()))
            .await
            .unwrap();

        std::fs::remove_dir_all(&dir).unwrap();
        assert!(ledger.pay_expense(&expense.id, &admin).await.is_err());
        assert_eq!(ledger.balance(&admin.id).await.unwrap(), Money::ZERO);
        assert_eq!(ledger.pending_expenses().await.unwrap().len(), 1);

        std::fs::create_dir_all(&dir).unwrap();
        let outcome = ledger.pay_expense(&expense.id, &admin).await.unwrap();
        assert!(matches!(outcome, PayOutcome::Paid { .. }));
        assert_eq!(
            ledger.pay_expense(&expense.id, &admin).await.unwrap(),
            PayOutcome::AlreadyPaid
        );
        assert_eq!(ledger.balance(&admin.id).await.unwrap(), Money::from_minor(-30_000));
        assert_eq!(ledger.balance(&hr.id).await.unwrap(), Money::from_minor(30_000));

        let _ = std::fs::remove_dir_all(&dir);
    }
}
