//! Receipt photo archiving.

use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};

use super::supabase::SupabaseStore;
use super::types::Receipt;
use crate::telegram::TelegramBot;
use crate::telegram::types::PhotoSize;

/// Copies receipt photos from Telegram into Supabase Storage.
#[derive(Debug, Clone)]
pub struct ReceiptArchive {
    bot: Arc<TelegramBot>,
    storage: SupabaseStore,
}

impl ReceiptArchive {
    #[must_use]
    pub fn new(bot: Arc<TelegramBot>, storage: SupabaseStore) -> Self {
        Self { bot, storage }
    }

    /// Uploads the photo; falls back to the Telegram file id on failure.
    pub async fn archive(&self, tg_id: i64, photo: &PhotoSize) -> Receipt {
        let key = receipt_key(tg_id, &photo.file_unique_id);

        let bytes = match self.bot.download_by_id(&photo.file_id).await {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("Failed to download receipt {}: {}", photo.file_id, e);
                return Receipt::TelegramFile(photo.file_id.clone());
            }
        };

        match self.storage.upload_receipt(&key, bytes).await {
            Ok(url) => {
                info!("Receipt stored at {}", key);
                Receipt::Uploaded(url)
            }
            Err(e) => {
                warn!("Supabase storage upload failed for {}: {}", key, e);
                Receipt::TelegramFile(photo.file_id.clone())
            }
        }
    }
}

/// Object key for a receipt, timestamped to avoid collisions.
fn receipt_key(tg_id: i64, file_unique_id: &str) -> String {
    format!(
        "receipts/{}_{tg_id}_{file_unique_id}.jpg",
        Utc::now().format("%Y%m%d_%H%M%S")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Uri;
    use axum::response::{IntoResponse, Response};
    use axum::{Json, Router};
    use serde_json::json;
    use tokio::net::TcpListener;

    use crate::config::SupabaseConfig;

    #[test]
    fn test_receipt_key_shape() {
        let key = receipt_key(42, "AQADx");
        assert!(key.starts_with("receipts/"));
        assert!(key.ends_with("_42_AQADx.jpg"));
        // receipts/ + yyyymmdd_HHMMSS
        assert_eq!(key.split('_').next().map(str::len), Some("receipts/20240101".len()));
    }

    fn archive_with(api_url: &str) -> ReceiptArchive {
        let bot = TelegramBot::new(api_url, "123:abc").unwrap();
        let storage = SupabaseStore::new(&SupabaseConfig {
            url: "http://127.0.0.1:9".to_owned(),
            key: "service-key".to_owned(),
            bucket: "receipts".to_owned(),
        })
        .unwrap();
        ReceiptArchive::new(Arc::new(bot), storage)
    }

    fn photo() -> PhotoSize {
        PhotoSize {
            file_id: "F".to_owned(),
            file_unique_id: "U".to_owned(),
            width: 800,
            height: 600,
        }
    }

    #[tokio::test]
    async fn test_download_failure_keeps_telegram_file() {
        let receipt = archive_with("http://127.0.0.1:9").archive(2, &photo()).await;
        assert_eq!(receipt, Receipt::TelegramFile("F".to_owned()));
    }

    #[tokio::test]
    async fn test_upload_failure_keeps_telegram_file() {
        // Telegram answers getFile and serves the bytes; Supabase is unreachable.
        async fn telegram(uri: Uri) -> Response {
            if uri.path().ends_with("/getFile") {
                Json(json!({ "ok": true, "result": { "file_id": "F", "file_path": "photos/f.jpg" } }))
                    .into_response()
            } else {
                b"jpeg".to_vec().into_response()
            }
        }
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, Router::new().fallback(telegram)).await });

        let receipt = archive_with(&format!("http://{addr}")).archive(2, &photo()).await;
        assert_eq!(receipt, Receipt::TelegramFile("F".to_owned()));
    }
}
