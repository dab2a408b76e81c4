//! SQLite-backed notification sink.
//!
//! Implements the `NotificationService` port by appending rows to the
//! `notifications` table. Delivery to outward channels is someone else's
//! job; the engine only needs a durable record.

use conductor_core::collab::{CollabError, NotificationService};
use conductor_types::collab::Notification;
use chrono::Utc;
use futures_util::future::BoxFuture;
use serde_json::{Value, json};
use uuid::Uuid;

use super::pool::DatabasePool;

/// Notification sink writing to the `notifications` table.
pub struct SqliteNotificationService {
    pool: DatabasePool,
}

impl SqliteNotificationService {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

impl NotificationService for SqliteNotificationService {
    fn create(&self, notification: Notification) -> BoxFuture<'_, Result<Value, CollabError>> {
        Box::pin(async move {
            let id = Uuid::now_v7();
            sqlx::query(
                r#"
                INSERT INTO notifications (id, user_id, kind, title, content, created_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                "#,
            )
            .bind(id.to_string())
            .bind(notification.user_id.map(|u| u.to_string()))
            .bind(&notification.kind)
            .bind(&notification.title)
            .bind(&notification.content)
            .bind(Utc::now().to_rfc3339())
            .execute(&self.pool.writer)
            .await
            .map_err(|e| CollabError::RequestFailed(e.to_string()))?;

            tracing::debug!(
                notification_id = %id,
                kind = notification.kind.as_str(),
                "notification recorded"
            );
            Ok(json!({ "notification_id": id.to_string() }))
        })
    }
}
