//! Notification audit persistence

use crate::events::NotificationAuditRecord;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use claims_common::{Error, Result};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Row, SqlitePool};
use tokio::sync::RwLock;
use tracing::info;
use uuid::Uuid;

/// Store of notification audit rows, one per webhook target per send
#[async_trait]
pub trait AuditStore: Send + Sync {
    async fn record(&self, record: &NotificationAuditRecord) -> Result<()>;

    /// Mark a notification acknowledged; returns false when absent
    async fn acknowledge(&self, id: Uuid, user: &str) -> Result<bool>;

    async fn by_correlation(&self, correlation_id: &str) -> Result<Vec<NotificationAuditRecord>>;
}

/// In-memory store for tests and single-process deployments
#[derive(Default)]
pub struct MemoryAuditStore {
    rows: RwLock<Vec<NotificationAuditRecord>>,
}

impl MemoryAuditStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.rows.read().await.len()
    }
}

#[async_trait]
impl AuditStore for MemoryAuditStore {
    async fn record(&self, record: &NotificationAuditRecord) -> Result<()> {
        self.rows.write().await.push(record.clone());
        Ok(())
    }

    async fn acknowledge(&self, id: Uuid, user: &str) -> Result<bool> {
        let mut rows = self.rows.write().await;
        match rows.iter_mut().find(|r| r.id == id) {
            Some(row) => {
                row.acknowledged_by = Some(user.to_string());
                row.acknowledged_at = Some(Utc::now());
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn by_correlation(&self, correlation_id: &str) -> Result<Vec<NotificationAuditRecord>> {
        Ok(self
            .rows
            .read()
            .await
            .iter()
            .filter(|r| r.correlation_id == correlation_id)
            .cloned()
            .collect())
    }
}

/// SQLite-backed store using a connection pool
pub struct SqliteAuditStore {
    pool: SqlitePool,
}

impl SqliteAuditStore {
    /// Connect and run the schema migration.
    ///
    /// In-memory databases are pinned to a single connection so every
    /// query sees the same schema.
    pub async fn connect(url: &str) -> Result<Self> {
        let max_connections = if url.contains(":memory:") { 1 } else { 5 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await
            .map_err(|e| Error::Persistence(format!("failed to connect audit store: {}", e)))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS notification_audit (
                id TEXT PRIMARY KEY,
                correlation_id TEXT NOT NULL,
                event_type TEXT NOT NULL,
                stakeholders TEXT NOT NULL,
                priority TEXT NOT NULL,
                webhook_url TEXT NOT NULL,
                card_payload TEXT NOT NULL,
                sent_at TEXT NOT NULL,
                status_code INTEGER,
                retry_count INTEGER NOT NULL,
                acknowledged_by TEXT,
                acknowledged_at TEXT,
                created_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&pool)
        .await
        .map_err(|e| Error::Persistence(format!("failed to create audit table: {}", e)))?;

        for index in [
            "CREATE INDEX IF NOT EXISTS idx_audit_correlation ON notification_audit (correlation_id)",
            "CREATE INDEX IF NOT EXISTS idx_audit_event_type ON notification_audit (event_type)",
        ] {
            sqlx::query(index)
                .execute(&pool)
                .await
                .map_err(|e| Error::Persistence(format!("failed to create audit index: {}", e)))?;
        }

        info!("Notification audit store ready at {}", url);
        Ok(SqliteAuditStore { pool })
    }

    fn row_to_record(row: &sqlx::sqlite::SqliteRow) -> Result<NotificationAuditRecord> {
        let parse_ts = |value: String| -> Result<DateTime<Utc>> {
            value
                .parse::<DateTime<Utc>>()
                .map_err(|e| Error::Persistence(format!("bad timestamp in audit row: {}", e)))
        };

        let id: String = row
            .try_get("id")
            .map_err(|e| Error::Persistence(e.to_string()))?;
        let stakeholders: String = row
            .try_get("stakeholders")
            .map_err(|e| Error::Persistence(e.to_string()))?;
        let card_payload: String = row
            .try_get("card_payload")
            .map_err(|e| Error::Persistence(e.to_string()))?;
        let sent_at: String = row
            .try_get("sent_at")
            .map_err(|e| Error::Persistence(e.to_string()))?;
        let created_at: String = row
            .try_get("created_at")
            .map_err(|e| Error::Persistence(e.to_string()))?;
        let acknowledged_at: Option<String> = row
            .try_get("acknowledged_at")
            .map_err(|e| Error::Persistence(e.to_string()))?;
        let status_code: Option<i64> = row
            .try_get("status_code")
            .map_err(|e| Error::Persistence(e.to_string()))?;
        let retry_count: i64 = row
            .try_get("retry_count")
            .map_err(|e| Error::Persistence(e.to_string()))?;

        Ok(NotificationAuditRecord {
            id: Uuid::parse_str(&id)
                .map_err(|e| Error::Persistence(format!("bad audit row id: {}", e)))?,
            correlation_id: row
                .try_get("correlation_id")
                .map_err(|e| Error::Persistence(e.to_string()))?,
            event_type: row
                .try_get("event_type")
                .map_err(|e| Error::Persistence(e.to_string()))?,
            stakeholders: serde_json::from_str(&stakeholders)?,
            priority: row
                .try_get("priority")
                .map_err(|e| Error::Persistence(e.to_string()))?,
            webhook_url: row
                .try_get("webhook_url")
                .map_err(|e| Error::Persistence(e.to_string()))?,
            card_payload: serde_json::from_str(&card_payload)?,
            sent_at: parse_ts(sent_at)?,
            status_code: status_code.map(|s| s as u16),
            retry_count: retry_count as u32,
            acknowledged_by: row
                .try_get("acknowledged_by")
                .map_err(|e| Error::Persistence(e.to_string()))?,
            acknowledged_at: acknowledged_at.map(parse_ts).transpose()?,
            created_at: parse_ts(created_at)?,
        })
    }
}

#[async_trait]
impl AuditStore for SqliteAuditStore {
    async fn record(&self, record: &NotificationAuditRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO notification_audit
                (id, correlation_id, event_type, stakeholders, priority, webhook_url,
                 card_payload, sent_at, status_code, retry_count,
                 acknowledged_by, acknowledged_at, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(record.id.to_string())
        .bind(&record.correlation_id)
        .bind(&record.event_type)
        .bind(serde_json::to_string(&record.stakeholders)?)
        .bind(&record.priority)
        .bind(&record.webhook_url)
        .bind(serde_json::to_string(&record.card_payload)?)
        .bind(record.sent_at.to_rfc3339())
        .bind(record.status_code.map(|s| s as i64))
        .bind(record.retry_count as i64)
        .bind(&record.acknowledged_by)
        .bind(record.acknowledged_at.map(|t| t.to_rfc3339()))
        .bind(record.created_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|e| Error::Persistence(format!("failed to insert audit row: {}", e)))?;

        Ok(())
    }

    async fn acknowledge(&self, id: Uuid, user: &str) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE notification_audit SET acknowledged_by = ?, acknowledged_at = ? WHERE id = ?",
        )
        .bind(user)
        .bind(Utc::now().to_rfc3339())
        .bind(id.to_string())
        .execute(&self.pool)
        .await
        .map_err(|e| Error::Persistence(format!("failed to acknowledge: {}", e)))?;

        Ok(result.rows_affected() > 0)
    }

    async fn by_correlation(&self, correlation_id: &str) -> Result<Vec<NotificationAuditRecord>> {
        let rows = sqlx::query("SELECT * FROM notification_audit WHERE correlation_id = ?")
            .bind(correlation_id)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| Error::Persistence(format!("failed to query audit rows: {}", e)))?;

        rows.iter().map(Self::row_to_record).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(correlation_id: &str, url: &str) -> NotificationAuditRecord {
        NotificationAuditRecord {
            id: Uuid::new_v4(),
            correlation_id: correlation_id.to_string(),
            event_type: "nphies.claim.rejected".to_string(),
            stakeholders: vec!["SRE".to_string(), "PMO".to_string()],
            priority: "high".to_string(),
            webhook_url: url.to_string(),
            card_payload: json!({"type": "message"}),
            sent_at: Utc::now(),
            status_code: Some(200),
            retry_count: 1,
            acknowledged_by: None,
            acknowledged_at: None,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn sqlite_round_trip() {
        let store = SqliteAuditStore::connect("sqlite::memory:").await.unwrap();
        let rec = record("corr-1", "https://hooks.example/a");
        store.record(&rec).await.unwrap();
        store
            .record(&record("corr-1", "https://hooks.example/b"))
            .await
            .unwrap();
        store
            .record(&record("corr-2", "https://hooks.example/a"))
            .await
            .unwrap();

        let rows = store.by_correlation("corr-1").await.unwrap();
        assert_eq!(rows.len(), 2);
        let found = rows.iter().find(|r| r.id == rec.id).unwrap();
        assert_eq!(found.event_type, "nphies.claim.rejected");
        assert_eq!(found.stakeholders, vec!["SRE", "PMO"]);
        assert_eq!(found.status_code, Some(200));
        assert_eq!(found.retry_count, 1);
    }

    #[tokio::test]
    async fn sqlite_acknowledge() {
        let store = SqliteAuditStore::connect("sqlite::memory:").await.unwrap();
        let rec = record("corr-3", "https://hooks.example/a");
        store.record(&rec).await.unwrap();

        assert!(store.acknowledge(rec.id, "ops@example.sa").await.unwrap());
        assert!(!store.acknowledge(Uuid::new_v4(), "nobody").await.unwrap());

        let rows = store.by_correlation("corr-3").await.unwrap();
        assert_eq!(rows[0].acknowledged_by.as_deref(), Some("ops@example.sa"));
        assert!(rows[0].acknowledged_at.is_some());
    }

    #[tokio::test]
    async fn memory_store_behaves_like_sqlite() {
        let store = MemoryAuditStore::new();
        let rec = record("corr-4", "https://hooks.example/a");
        store.record(&rec).await.unwrap();

        assert_eq!(store.by_correlation("corr-4").await.unwrap().len(), 1);
        assert!(store.acknowledge(rec.id, "ops").await.unwrap());
        assert_eq!(
            store.by_correlation("corr-4").await.unwrap()[0]
                .acknowledged_by
                .as_deref(),
            Some("ops")
        );
    }
}
