//! Supabase backend: PostgREST tables and Storage uploads.

use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderValue};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::json;
use tracing::{debug, info};

use super::types::{
    BalanceRow, Expense, ExpenseStatus, Money, NewExpense, NewUser, RecordId, Transaction,
    UserRecord,
};
use super::{LedgerError, now_timestamp};
use crate::config::{Role, SupabaseConfig, normalize_username};

/// Client for a Supabase project.
#[derive(Clone)]
pub struct SupabaseStore {
    http: reqwest::Client,
    rest_url: String,
    storage_url: String,
    bucket: String,
}

impl SupabaseStore {
    /// Creates a client authenticated with the project key.
    pub fn new(config: &SupabaseConfig) -> Result<Self, LedgerError> {
        let mut headers = HeaderMap::new();
        let key = HeaderValue::from_str(&config.key).map_err(|_| LedgerError::InvalidKey)?;
        let bearer =
            HeaderValue::from_str(&format!("Bearer {}", config.key)).map_err(|_| LedgerError::InvalidKey)?;
        headers.insert("apikey", key);
        headers.insert(reqwest::header::AUTHORIZATION, bearer);

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(std::time::Duration::from_secs(20))
            .build()?;

        info!("Using Supabase ledger at {}", config.url);

        Ok(Self {
            http,
            rest_url: format!("{}/rest/v1", config.url),
            storage_url: format!("{}/storage/v1", config.url),
            bucket: config.bucket.clone(),
        })
    }

    async fn check(resp: reqwest::Response) -> Result<reqwest::Response, LedgerError> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let body = resp.text().await.unwrap_or_default();
        Err(LedgerError::Api {
            status: status.as_u16(),
            body,
        })
    }

    /// `GET /rest/v1/<table>?select=*&<filters>`.
    async fn select<T: DeserializeOwned>(
        &self,
        table: &str,
        filters: &[(&str, String)],
    ) -> Result<Vec<T>, LedgerError> {
        debug!("Supabase select {} {:?}", table, filters);
        let resp = self
            .http
            .get(format!("{}/{table}", self.rest_url))
            .query(&[("select", "*")])
            .query(filters)
            .send()
            .await?;
        Ok(Self::check(resp).await?.json().await?)
    }

    /// `POST /rest/v1/<table>` returning the inserted rows.
    async fn insert<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        table: &str,
        body: &B,
    ) -> Result<Vec<T>, LedgerError> {
        debug!("Supabase insert into {}", table);
        let resp = self
            .http
            .post(format!("{}/{table}", self.rest_url))
            .header("Prefer", "return=representation")
            .json(body)
            .send()
            .await?;
        Ok(Self::check(resp).await?.json().await?)
    }

    /// `POST /rest/v1/<table>` without reading the rows back.
    async fn insert_minimal<B: Serialize + ?Sized>(
        &self,
        table: &str,
        body: &B,
        prefer: &str,
    ) -> Result<(), LedgerError> {
        let resp = self
            .http
            .post(format!("{}/{table}", self.rest_url))
            .header("Prefer", prefer)
            .json(body)
            .send()
            .await?;
        Self::check(resp).await?;
        Ok(())
    }

    /// `PATCH /rest/v1/<table>?<filters>`.
    async fn update(
        &self,
        table: &str,
        filters: &[(&str, String)],
        patch: &serde_json::Value,
    ) -> Result<(), LedgerError> {
        debug!("Supabase update {} {:?}", table, filters);
        let resp = self
            .http
            .patch(format!("{}/{table}", self.rest_url))
            .query(filters)
            .json(patch)
            .send()
            .await?;
        Self::check(resp).await?;
        Ok(())
    }

    /// `PATCH /rest/v1/<table>?<filters>` returning the rows that matched.
    async fn update_returning<T: DeserializeOwned>(
        &self,
        table: &str,
        filters: &[(&str, String)],
        patch: &serde_json::Value,
    ) -> Result<Vec<T>, LedgerError> {
        debug!("Supabase update {} {:?} (returning)", table, filters);
        let resp = self
            .http
            .patch(format!("{}/{table}", self.rest_url))
            .header("Prefer", "return=representation")
            .query(filters)
            .json(patch)
            .send()
            .await?;
        Ok(Self::check(resp).await?.json().await?)
    }

    fn eq(value: impl std::fmt::Display) -> String {
        format!("eq.{value}")
    }

    pub async fn find_user_by_tg_id(&self, tg_id: i64) -> Result<Option<UserRecord>, LedgerError> {
        let rows: Vec<UserRecord> = self.select("users", &[("tg_id", Self::eq(tg_id))]).await?;
        Ok(rows.into_iter().next())
    }

    pub async fn find_user_by_username(&self, username: &str) -> Result<Option<UserRecord>, LedgerError> {
        let wanted = normalize_username(username);
        // `ilike` treats `_` as a wildcard, so the exact match is done here.
        let rows: Vec<UserRecord> = self
            .select("users", &[("username", format!("ilike.{wanted}"))])
            .await?;
        Ok(rows
            .into_iter()
            .find(|u| normalize_username(&u.username) == wanted))
    }

    pub async fn insert_user(&self, user: NewUser) -> Result<UserRecord, LedgerError> {
        let rows: Vec<UserRecord> = self.insert("users", &user).await?;
        let record = rows
            .into_iter()
            .next()
            .ok_or(LedgerError::EmptyInsert("users"))?;

        let balance = BalanceRow {
            user_id: record.id.clone(),
            balance: Money::ZERO,
            updated_at: Some(now_timestamp()),
        };
        self.insert_minimal("balances", &balance, "resolution=merge-duplicates,return=minimal")
            .await?;

        Ok(record)
    }

    pub async fn set_user_tg_id(&self, user_id: &RecordId, tg_id: i64) -> Result<(), LedgerError> {
        self.update("users", &[("id", Self::eq(user_id))], &json!({ "tg_id": tg_id }))
            .await
    }

    pub async fn set_user_role(&self, user_id: &RecordId, role: Role) -> Result<(), LedgerError> {
        self.update("users", &[("id", Self::eq(user_id))], &json!({ "role": role }))
            .await
    }

    pub async fn list_users(&self) -> Result<Vec<UserRecord>, LedgerError> {
        self.select("users", &[("order", "username.asc".to_owned())]).await
    }

    pub async fn get_balance(&self, user_id: &RecordId) -> Result<Money, LedgerError> {
        let rows: Vec<BalanceRow> = self
            .select("balances", &[("user_id", Self::eq(user_id))])
            .await?;
        Ok(rows.first().map_or(Money::ZERO, |r| r.balance))
    }

    pub async fn set_balance(&self, user_id: &RecordId, balance: Money) -> Result<(), LedgerError> {
        let row = BalanceRow {
            user_id: user_id.clone(),
            balance,
            updated_at: Some(now_timestamp()),
        };
        let resp = self
            .http
            .post(format!("{}/balances", self.rest_url))
            .query(&[("on_conflict", "user_id")])
            .header("Prefer", "resolution=merge-duplicates,return=minimal")
            .json(&row)
            .send()
            .await?;
        Self::check(resp).await?;
        Ok(())
    }

    pub async fn list_balances(&self) -> Result<Vec<BalanceRow>, LedgerError> {
        self.select("balances", &[]).await
    }

    pub async fn insert_transaction(&self, tx: Transaction) -> Result<(), LedgerError> {
        self.insert_minimal("transactions", &tx, "return=minimal").await
    }

    pub async fn insert_expense(&self, expense: NewExpense) -> Result<Expense, LedgerError> {
        let rows: Vec<Expense> = self.insert("expenses", &expense).await?;
        rows.into_iter()
            .next()
            .ok_or(LedgerError::EmptyInsert("expenses"))
    }

    pub async fn get_expense(&self, id: &RecordId) -> Result<Option<Expense>, LedgerError> {
        let rows: Vec<Expense> = self.select("expenses", &[("id", Self::eq(id))]).await?;
        Ok(rows.into_iter().next())
    }

    /// Marks a pending expense paid; `false` if no pending row matched.
    pub async fn mark_expense_paid(&self, id: &RecordId, paid_by: Option<&RecordId>) -> Result<bool, LedgerError> {
        let patch = json!({
            "status": ExpenseStatus::Paid,
            "paid_at": now_timestamp(),
            "paid_by": paid_by,
        });
        let rows: Vec<Expense> = self
            .update_returning(
                "expenses",
                &[("id", Self::eq(id)), ("status", Self::eq("pending"))],
                &patch,
            )
            .await?;
        Ok(!rows.is_empty())
    }

    pub async fn list_pending_expenses(&self) -> Result<Vec<Expense>, LedgerError> {
        self.select(
            "expenses",
            &[
                ("status", Self::eq("pending")),
                ("order", "created_at.asc".to_owned()),
            ],
        )
        .await
    }

    /// Uploads a receipt image and returns its public URL.
    pub async fn upload_receipt(&self, key: &str, bytes: Vec<u8>) -> Result<String, LedgerError> {
        let resp = self
            .http
            .post(format!("{}/object/{}/{key}", self.storage_url, self.bucket))
            .header(CONTENT_TYPE, "image/jpeg")
            .header("x-upsert", "true")
            .body(bytes)
            .send()
            .await?;
        Self::check(resp).await?;
        Ok(self.public_url(key))
    }

    /// Public URL of an object in the receipts bucket.
    #[must_use]
    pub fn public_url(&self, key: &str) -> String {
        format!("{}/object/public/{}/{key}", self.storage_url, self.bucket)
    }
}

impl std::fmt::Debug for SupabaseStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SupabaseStore")
            .field("rest_url", &self.rest_url)
            .field("bucket", &self.bucket)
            .finish_non_exhaustive()
    }
}
