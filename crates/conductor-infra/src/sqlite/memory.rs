//! SQLite-backed memory manager.
//!
//! Implements the `MemoryManager` port over the `memory_items` table.
//! Supported operations: `remember`, `note`, `daily_log`, `search`,
//! `forget`. Anything else is `Unsupported` -- the engine treats the port
//! as a black box and surfaces the error through the step.

use conductor_core::collab::{CollabError, MemoryManager};
use chrono::Utc;
use futures_util::future::BoxFuture;
use serde_json::{Value, json};
use sqlx::Row;
use uuid::Uuid;

use super::pool::DatabasePool;

/// Memory manager writing to the `memory_items` table.
pub struct SqliteMemoryManager {
    pool: DatabasePool,
}

impl SqliteMemoryManager {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }

    async fn insert_item(
        &self,
        user_id: Option<Uuid>,
        kind: &str,
        key: Option<&str>,
        content: &str,
    ) -> Result<Value, CollabError> {
        let id = Uuid::now_v7();
        let now = Utc::now().to_rfc3339();
        sqlx::query(
            r#"
            INSERT INTO memory_items (id, user_id, kind, key, content, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
        )
        .bind(id.to_string())
        .bind(user_id.map(|u| u.to_string()))
        .bind(kind)
        .bind(key)
        .bind(content)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool.writer)
        .await
        .map_err(|e| CollabError::RequestFailed(e.to_string()))?;
        Ok(json!({ "item_id": id.to_string(), "kind": kind }))
    }

    async fn search_items(
        &self,
        user_id: Option<Uuid>,
        query: &str,
        limit: u32,
    ) -> Result<Value, CollabError> {
        let pattern = format!("%{query}%");
        let rows = sqlx::query(
            r#"
            SELECT id, kind, key, content FROM memory_items
            WHERE (?1 IS NULL OR user_id = ?1) AND content LIKE ?2
            ORDER BY created_at DESC
            LIMIT ?3
            "#,
        )
        .bind(user_id.map(|u| u.to_string()))
        .bind(pattern)
        .bind(limit as i64)
        .fetch_all(&self.pool.reader)
        .await
        .map_err(|e| CollabError::RequestFailed(e.to_string()))?;

        let items: Vec<Value> = rows
            .iter()
            .map(|row| {
                json!({
                    "id": row.try_get::<String, _>("id").unwrap_or_default(),
                    "kind": row.try_get::<String, _>("kind").unwrap_or_default(),
                    "key": row.try_get::<Option<String>, _>("key").unwrap_or_default(),
                    "content": row.try_get::<String, _>("content").unwrap_or_default(),
                })
            })
            .collect();
        Ok(json!({ "matches": items }))
    }

    async fn forget_items(
        &self,
        user_id: Option<Uuid>,
        key: &str,
    ) -> Result<Value, CollabError> {
        let result = sqlx::query(
            "DELETE FROM memory_items WHERE (?1 IS NULL OR user_id = ?1) AND key = ?2",
        )
        .bind(user_id.map(|u| u.to_string()))
        .bind(key)
        .execute(&self.pool.writer)
        .await
        .map_err(|e| CollabError::RequestFailed(e.to_string()))?;
        Ok(json!({ "forgotten": result.rows_affected() }))
    }
}

fn param_str<'a>(params: &'a Value, key: &str) -> Result<&'a str, CollabError> {
    params
        .get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| CollabError::RequestFailed(format!("missing '{key}' parameter")))
}

impl MemoryManager for SqliteMemoryManager {
    fn perform(
        &self,
        operation: &str,
        params: Value,
        user_id: Option<Uuid>,
    ) -> BoxFuture<'_, Result<Value, CollabError>> {
        let operation = operation.to_string();
        Box::pin(async move {
            match operation.as_str() {
                "remember" => {
                    let content = param_str(&params, "content")?;
                    let key = params.get("key").and_then(Value::as_str);
                    self.insert_item(user_id, "fact", key, content).await
                }
                "note" => {
                    let content = param_str(&params, "content")?;
                    let key = params.get("title").and_then(Value::as_str);
                    self.insert_item(user_id, "note", key, content).await
                }
                "daily_log" => {
                    let content = param_str(&params, "content")?;
                    let day = Utc::now().format("%Y-%m-%d").to_string();
                    self.insert_item(user_id, "daily_log", Some(&day), content).await
                }
                "search" => {
                    let query = param_str(&params, "query")?;
                    let limit = params
                        .get("limit")
                        .and_then(Value::as_u64)
                        .unwrap_or(20) as u32;
                    self.search_items(user_id, query, limit).await
                }
                "forget" => {
                    let key = param_str(&params, "key")?;
                    self.forget_items(user_id, key).await
                }
                other => Err(CollabError::Unsupported(format!(
                    "memory operation '{other}'"
                ))),
            }
        })
    }
}
