//! In-memory ledger backend with optional JSON snapshot persistence.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use super::types::{
    BalanceRow, Expense, ExpenseStatus, Money, NewExpense, NewUser, RecordId, Transaction,
    UserRecord,
};
use super::{LedgerError, now_timestamp};
use crate::config::{Role, normalize_username};

/// Everything the memory backend stores; also the snapshot file format.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Snapshot {
    /// Last id handed out.
    #[serde(default)]
    pub last_id: u64,
    #[serde(default)]
    pub users: Vec<UserRecord>,
    #[serde(default)]
    pub balances: Vec<BalanceRow>,
    #[serde(default)]
    pub transactions: Vec<Transaction>,
    #[serde(default)]
    pub expenses: Vec<Expense>,
}

impl Snapshot {
    /// Loads a snapshot from a JSON file, returns empty if not found.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, LedgerError> {
        match std::fs::read_to_string(path) {
            Ok(content) => Ok(serde_json::from_str(&content)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e.into()),
        }
    }

    /// Saves the snapshot to a JSON file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), LedgerError> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    fn next_id(&mut self) -> RecordId {
        self.last_id += 1;
        RecordId::new(self.last_id.to_string())
    }
}

/// Ledger kept in process memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    data: RwLock<Snapshot>,
    path: Option<PathBuf>,
}

impl MemoryStore {
    /// Creates an empty, non-persistent store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a store backed by a snapshot file.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, LedgerError> {
        let path = path.into();
        let snapshot = Snapshot::load(&path)?;
        debug!(
            "Loaded ledger snapshot from {}: {} users, {} expenses",
            path.display(),
            snapshot.users.len(),
            snapshot.expenses.len()
        );
        Ok(Self {
            data: RwLock::new(snapshot),
            path: Some(path),
        })
    }

    /// Runs a mutation and persists the result when a snapshot file is set.
    ///
    /// With a snapshot file the change is made on a copy and only becomes
    /// visible once the file is written.
    async fn mutate<T>(&self, f: impl FnOnce(&mut Snapshot) -> T) -> Result<T, LedgerError> {
        let mut data = self.data.write().await;
        let Some(path) = &self.path else {
            return Ok(f(&mut data));
        };

        let mut draft = data.clone();
        let out = f(&mut draft);
        if let Err(e) = draft.save(path) {
            warn!("Failed to save ledger snapshot: {}", e);
            return Err(e);
        }
        *data = draft;
        Ok(out)
    }

    /// Returns a copy of the current contents.
    pub async fn snapshot(&self) -> Snapshot {
        self.data.read().await.clone()
    }

    pub async fn find_user_by_tg_id(&self, tg_id: i64) -> Result<Option<UserRecord>, LedgerError> {
        let data = self.data.read().await;
        Ok(data.users.iter().find(|u| u.tg_id == Some(tg_id)).cloned())
    }

    pub async fn find_user_by_username(&self, username: &str) -> Result<Option<UserRecord>, LedgerError> {
        let wanted = normalize_username(username);
        let data = self.data.read().await;
        Ok(data
            .users
            .iter()
            .find(|u| normalize_username(&u.username) == wanted)
            .cloned())
    }

    pub async fn insert_user(&self, user: NewUser) -> Result<UserRecord, LedgerError> {
        self.mutate(|data| {
            let id = data.next_id();
            let record = UserRecord {
                id: id.clone(),
                tg_id: Some(user.tg_id),
                username: user.username,
                role: user.role,
                created_at: Some(user.created_at),
            };
            data.users.push(record.clone());
            data.balances.push(BalanceRow {
                user_id: id,
                balance: Money::ZERO,
                updated_at: None,
            });
            record
        })
        .await
    }

    pub async fn set_user_tg_id(&self, user_id: &RecordId, tg_id: i64) -> Result<(), LedgerError> {
        self.mutate(|data| {
            if let Some(user) = data.users.iter_mut().find(|u| &u.id == user_id) {
                user.tg_id = Some(tg_id);
            }
        })
        .await
    }

    pub async fn set_user_role(&self, user_id: &RecordId, role: Role) -> Result<(), LedgerError> {
        self.mutate(|data| {
            if let Some(user) = data.users.iter_mut().find(|u| &u.id == user_id) {
                user.role = role;
            }
        })
        .await
    }

    pub async fn list_users(&self) -> Result<Vec<UserRecord>, LedgerError> {
        Ok(self.data.read().await.users.clone())
    }

    pub async fn get_balance(&self, user_id: &RecordId) -> Result<Money, LedgerError> {
        let data = self.data.read().await;
        Ok(data
            .balances
            .iter()
            .find(|b| &b.user_id == user_id)
            .map_or(Money::ZERO, |b| b.balance))
    }

    pub async fn set_balance(&self, user_id: &RecordId, balance: Money) -> Result<(), LedgerError> {
        let updated_at = Some(now_timestamp());
        self.mutate(|data| {
            if let Some(row) = data.balances.iter_mut().find(|b| &b.user_id == user_id) {
                row.balance = balance;
                row.updated_at = updated_at;
            } else {
                data.balances.push(BalanceRow {
                    user_id: user_id.clone(),
                    balance,
                    updated_at,
                });
            }
        })
        .await
    }

    pub async fn list_balances(&self) -> Result<Vec<BalanceRow>, LedgerError> {
        Ok(self.data.read().await.balances.clone())
    }

    pub async fn insert_transaction(&self, tx: Transaction) -> Result<(), LedgerError> {
        self.mutate(|data| data.transactions.push(tx)).await
    }

    pub async fn insert_expense(&self, expense: NewExpense) -> Result<Expense, LedgerError> {
        self.mutate(|data| {
            let id = data.next_id();
            let stored = Expense::from_new(id, expense);
            data.expenses.push(stored.clone());
            stored
        })
        .await
    }

    pub async fn get_expense(&self, id: &RecordId) -> Result<Option<Expense>, LedgerError> {
        let data = self.data.read().await;
        Ok(data.expenses.iter().find(|e| &e.id == id).cloned())
    }

    /// Marks a pending expense paid; `false` if it was not pending.
    pub async fn mark_expense_paid(&self, id: &RecordId, paid_by: Option<&RecordId>) -> Result<bool, LedgerError> {
        let paid_at = now_timestamp();
        self.mutate(|data| {
            let Some(expense) = data
                .expenses
                .iter_mut()
                .find(|e| &e.id == id && e.status == ExpenseStatus::Pending)
            else {
                return false;
            };
            expense.status = ExpenseStatus::Paid;
            expense.paid_at = Some(paid_at);
            expense.paid_by = paid_by.cloned();
            true
        })
        .await
    }

    pub async fn list_pending_expenses(&self) -> Result<Vec<Expense>, LedgerError> {
        let data = self.data.read().await;
        Ok(data
            .expenses
            .iter()
            .filter(|e| e.status == ExpenseStatus::Pending)
            .cloned()
            .collect())
    }
}
