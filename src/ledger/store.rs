//! Storage backend selection.

use super::LedgerError;
use super::memory::MemoryStore;
use super::supabase::SupabaseStore;
use super::types::{BalanceRow, Expense, Money, NewExpense, NewUser, RecordId, Transaction, UserRecord};
use crate::config::Role;

/// Where ledger rows live.
#[derive(Debug)]
pub enum Store {
    /// Supabase project (PostgREST).
    Supabase(SupabaseStore),
    /// Process memory, optionally snapshotted to disk.
    Memory(MemoryStore),
}

impl Store {
    /// Short backend name for logs.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Supabase(_) => "supabase",
            Self::Memory(_) => "memory",
        }
    }

    /// Supabase client, when that backend is in use.
    #[must_use]
    pub const fn supabase(&self) -> Option<&SupabaseStore> {
        match self {
            Self::Supabase(store) => Some(store),
            Self::Memory(_) => None,
        }
    }

    pub async fn find_user_by_tg_id(&self, tg_id: i64) -> Result<Option<UserRecord>, LedgerError> {
        match self {
            Self::Supabase(s) => s.find_user_by_tg_id(tg_id).await,
            Self::Memory(m) => m.find_user_by_tg_id(tg_id).await,
        }
    }

    pub async fn find_user_by_username(&self, username: &str) -> Result<Option<UserRecord>, LedgerError> {
        match self {
            Self::Supabase(s) => s.find_user_by_username(username).await,
            Self::Memory(m) => m.find_user_by_username(username).await,
        }
    }

    pub async fn insert_user(&self, user: NewUser) -> Result<UserRecord, LedgerError> {
        match self {
            Self::Supabase(s) => s.insert_user(user).await,
            Self::Memory(m) => m.insert_user(user).await,
        }
    }

    pub async fn set_user_tg_id(&self, user_id: &RecordId, tg_id: i64) -> Result<(), LedgerError> {
        match self {
            Self::Supabase(s) => s.set_user_tg_id(user_id, tg_id).await,
            Self::Memory(m) => m.set_user_tg_id(user_id, tg_id).await,
        }
    }

    pub async fn set_user_role(&self, user_id: &RecordId, role: Role) -> Result<(), LedgerError> {
        match self {
            Self::Supabase(s) => s.set_user_role(user_id, role).await,
            Self::Memory(m) => m.set_user_role(user_id, role).await,
        }
    }

    pub async fn list_users(&self) -> Result<Vec<UserRecord>, LedgerError> {
        match self {
            Self::Supabase(s) => s.list_users().await,
            Self::Memory(m) => m.list_users().await,
        }
    }

    pub async fn get_balance(&self, user_id: &RecordId) -> Result<Money, LedgerError> {
        match self {
            Self::Supabase(s) => s.get_balance(user_id).await,
            Self::Memory(m) => m.get_balance(user_id).await,
        }
    }

    pub async fn set_balance(&self, user_id: &RecordId, balance: Money) -> Result<(), LedgerError> {
        match self {
            Self::Supabase(s) => s.set_balance(user_id, balance).await,
            Self::Memory(m) => m.set_balance(user_id, balance).await,
        }
    }

    pub async fn list_balances(&self) -> Result<Vec<BalanceRow>, LedgerError> {
        match self {
            Self::Supabase(s) => s.list_balances().await,
            Self::Memory(m) => m.list_balances().await,
        }
    }

    pub async fn insert_transaction(&self, tx: Transaction) -> Result<(), LedgerError> {
        match self {
            Self::Supabase(s) => s.insert_transaction(tx).await,
            Self::Memory(m) => m.insert_transaction(tx).await,
        }
    }

    pub async fn insert_expense(&self, expense: NewExpense) -> Result<Expense, LedgerError> {
        match self {
            Self::Supabase(s) => s.insert_expense(expense).await,
            Self::Memory(m) => m.insert_expense(expense).await,
        }
    }

    pub async fn get_expense(&self, id: &RecordId) -> Result<Option<Expense>, LedgerError> {
        match self {
            Self::Supabase(s) => s.get_expense(id).await,
            Self::Memory(m) => m.get_expense(id).await,
        }
    }

    /// Marks a pending expense paid; `false` if it was not pending.
    pub async fn mark_expense_paid(&self, id: &RecordId, paid_by: Option<&RecordId>) -> Result<bool, LedgerError> {
        match self {
            Self::Supabase(s) => s.mark_expense_paid(id, paid_by).await,
            Self::Memory(m) => m.mark_expense_paid(id, paid_by).await,
        }
    }

    pub async fn list_pending_expenses(&self) -> Result<Vec<Expense>, LedgerError> {
        match self {
            Self::Supabase(s) => s.list_pending_expenses().await,
            Self::Memory(m) => m.list_pending_expenses().await,
        }
    }
}
