use sqlx::{Row, SqlitePool};

use crate::session::error::{SessionError, SessionResult};
use crate::session::types::{SessionSnapshot, UploadSession, UploadStatus};

/// SQLite persistence for session ledgers.
///
/// The manager checkpoints a session here on every ledger mutation
/// and terminal transition, so a process restart can list resumable
/// sessions and replay their confirmed parts into a fresh chunk plan
/// instead of re-sending bytes.
pub struct LedgerStore {
    pool: SqlitePool,
}

impl LedgerStore {
    /// Open (or create) the store at the given SQLite path/URL.
    pub async fn new(db_path: &str) -> SessionResult<Self> {
        let pool = SqlitePool::connect(db_path).await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS upload_sessions (
                id TEXT PRIMARY KEY,
                file_name TEXT NOT NULL,
                content_type TEXT NOT NULL,
                total_size INTEGER NOT NULL,
                source_path TEXT,
                context TEXT NOT NULL,
                status TEXT NOT NULL,
                plan TEXT,
                parts TEXT NOT NULL,
                asset TEXT,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                started_at_ms INTEGER
            )
            "#,
        )
        .execute(&pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_upload_sessions_updated ON upload_sessions(updated_at)",
        )
        .execute(&pool)
        .await?;

        Ok(Self { pool })
    }

    /// In-memory store (for testing)
    pub async fn new_in_memory() -> SessionResult<Self> {
        Self::new("sqlite::memory:").await
    }

    /// Save or update a session checkpoint
    pub async fn save(&self, session: &UploadSession) -> SessionResult<()> {
        let context_json = serde_json::to_string(&session.context)?;
        let status_json = serde_json::to_string(&session.status)?;
        let plan_json = session
            .plan()
            .map(serde_json::to_string)
            .transpose()?;
        let parts_json = serde_json::to_string(&session.parts)?;
        let asset_json = session.asset.as_ref().map(serde_json::to_string).transpose()?;

        sqlx::query(
            r#"
            INSERT OR REPLACE INTO upload_sessions
            (id, file_name, content_type, total_size, source_path, context,
             status, plan, parts, asset, created_at, updated_at, started_at_ms)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&session.id)
        .bind(&session.file_name)
        .bind(&session.content_type)
        .bind(session.total_size as i64)
        .bind(&session.source_path)
        .bind(context_json)
        .bind(status_json)
        .bind(plan_json)
        .bind(parts_json)
        .bind(asset_json)
        .bind(session.created_at)
        .bind(chrono::Utc::now().timestamp())
        .bind(session.started_at_ms)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Load a session checkpoint by ID
    pub async fn load(&self, session_id: &str) -> SessionResult<Option<UploadSession>> {
        let row = sqlx::query("SELECT * FROM upload_sessions WHERE id = ?")
            .bind(session_id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => Ok(Some(Self::row_to_session(&row)?)),
            None => Ok(None),
        }
    }

    /// Sessions worth re-admitting after a restart: everything not yet
    /// completed.
    pub async fn list_resumable(&self) -> SessionResult<Vec<UploadSession>> {
        let rows = sqlx::query("SELECT * FROM upload_sessions ORDER BY updated_at DESC")
            .fetch_all(&self.pool)
            .await?;

        let mut sessions = Vec::new();
        for row in rows {
            let session = Self::row_to_session(&row)?;
            if !session.status.is_completed() {
                sessions.push(session);
            }
        }

        Ok(sessions)
    }

    /// List all checkpoints as snapshots
    pub async fn list_all(&self) -> SessionResult<Vec<SessionSnapshot>> {
        let rows = sqlx::query("SELECT * FROM upload_sessions ORDER BY updated_at DESC")
            .fetch_all(&self.pool)
            .await?;

        let mut snapshots = Vec::new();
        for row in rows {
            snapshots.push(Self::row_to_session(&row)?.snapshot());
        }

        Ok(snapshots)
    }

    /// Delete a checkpoint
    pub async fn delete(&self, session_id: &str) -> SessionResult<bool> {
        let result = sqlx::query("DELETE FROM upload_sessions WHERE id = ?")
            .bind(session_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Clean up terminal checkpoints older than `days`
    pub async fn cleanup_old_sessions(&self, days: i64) -> SessionResult<u64> {
        let cutoff = chrono::Utc::now().timestamp() - (days * 86400);

        let rows = sqlx::query("SELECT id, status FROM upload_sessions WHERE updated_at < ?")
            .bind(cutoff)
            .fetch_all(&self.pool)
            .await?;

        let mut deleted = 0u64;
        for row in rows {
            let session_id: String = row.try_get("id")?;
            let status_str: String = row.try_get("status")?;
            let status: UploadStatus = serde_json::from_str(&status_str)?;

            // Only terminal checkpoints; a paused session is still live
            if matches!(status, UploadStatus::Completed | UploadStatus::Error(_)) {
                let result = sqlx::query("DELETE FROM upload_sessions WHERE id = ?")
                    .bind(&session_id)
                    .execute(&self.pool)
                    .await?;
                deleted += result.rows_affected();
            }
        }

        Ok(deleted)
    }

    pub async fn count(&self) -> SessionResult<i64> {
        let row = sqlx::query("SELECT COUNT(*) as count FROM upload_sessions")
            .fetch_one(&self.pool)
            .await?;

        Ok(row.try_get("count")?)
    }

    pub async fn exists(&self, session_id: &str) -> SessionResult<bool> {
        let row = sqlx::query("SELECT COUNT(*) as count FROM upload_sessions WHERE id = ?")
            .bind(session_id)
            .fetch_one(&self.pool)
            .await?;

        let count: i64 = row.try_get("count")?;
        Ok(count > 0)
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    fn row_to_session(row: &sqlx::sqlite::SqliteRow) -> SessionResult<UploadSession> {
        let plan_json: Option<String> = row.try_get("plan")?;
        let asset_json: Option<String> = row.try_get("asset")?;

        Ok(UploadSession {
            id: row.try_get("id")?,
            file_name: row.try_get("file_name")?,
            content_type: row.try_get("content_type")?,
            total_size: row.try_get::<i64, _>("total_size")? as u64,
            source_path: row.try_get("source_path")?,
            context: serde_json::from_str(&row.try_get::<String, _>("context")?)?,
            status: serde_json::from_str(&row.try_get::<String, _>("status")?)?,
            plan: plan_json.as_deref().map(serde_json::from_str).transpose()?,
            parts: serde_json::from_str(&row.try_get::<String, _>("parts")?)?,
            asset: asset_json.as_deref().map(serde_json::from_str).transpose()?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
            started_at_ms: row.try_get("started_at_ms")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{ChunkPlan, PartTarget, UploadContext};

    fn test_plan() -> ChunkPlan {
        ChunkPlan {
            upload_id: "up-1".into(),
            storage_upload_id: "r2-1".into(),
            storage_path: "projects/p1/raw/reel.mov".into(),
            chunk_size: 512,
            total_chunks: 2,
            part_targets: vec![
                PartTarget {
                    part_number: 1,
                    url: "https://r2.test/1".into(),
                },
                PartTarget {
                    part_number: 2,
                    url: "https://r2.test/2".into(),
                },
            ],
            expires_at: chrono::Utc::now() + chrono::Duration::hours(1),
        }
    }

    fn test_session(id: &str) -> UploadSession {
        UploadSession::new(
            id.to_string(),
            "reel.mov".into(),
            "video/quicktime".into(),
            1024,
            Some("/studio/raw/reel.mov".into()),
            UploadContext::default(),
        )
    }

    #[tokio::test]
    async fn test_store_creation() {
        let store = LedgerStore::new_in_memory().await.unwrap();
        assert_eq!(store.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_save_and_load_roundtrip() {
        let store = LedgerStore::new_in_memory().await.unwrap();
        let mut session = test_session("sess-1");
        session.assign_plan(test_plan()).unwrap();
        session.start().unwrap();
        session.record_part(1, "etag-1".into()).unwrap();

        store.save(&session).await.unwrap();

        let loaded = store.load("sess-1").await.unwrap().unwrap();
        assert_eq!(loaded.id, "sess-1");
        assert_eq!(loaded.status, UploadStatus::Uploading);
        assert_eq!(loaded.parts.len(), 1);
        assert_eq!(loaded.parts.etag(1), Some("etag-1"));
        assert_eq!(loaded.plan().unwrap().total_chunks, 2);
        assert_eq!(loaded.source_path.as_deref(), Some("/studio/raw/reel.mov"));
    }

    #[tokio::test]
    async fn test_load_missing_returns_none() {
        let store = LedgerStore::new_in_memory().await.unwrap();
        assert!(store.load("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_list_resumable_skips_completed() {
        let store = LedgerStore::new_in_memory().await.unwrap();

        let mut paused = test_session("paused");
        paused.assign_plan(test_plan()).unwrap();
        paused.start().unwrap();
        paused.pause().unwrap();
        store.save(&paused).await.unwrap();

        let mut done = test_session("done");
        done.assign_plan(test_plan()).unwrap();
        done.start().unwrap();
        done.record_part(1, "a".into()).unwrap();
        done.record_part(2, "b".into()).unwrap();
        done.begin_processing().unwrap();
        done.finalize(crate::protocol::CompletedAsset {
            asset_id: "asset-1".into(),
            storage_path: "p".into(),
        })
        .unwrap();
        store.save(&done).await.unwrap();

        let resumable = store.list_resumable().await.unwrap();
        assert_eq!(resumable.len(), 1);
        assert_eq!(resumable[0].id, "paused");
    }

    #[tokio::test]
    async fn test_delete() {
        let store = LedgerStore::new_in_memory().await.unwrap();
        store.save(&test_session("sess-1")).await.unwrap();
        assert_eq!(store.count().await.unwrap(), 1);

        assert!(store.delete("sess-1").await.unwrap());
        assert_eq!(store.count().await.unwrap(), 0);
        assert!(!store.delete("sess-1").await.unwrap());
    }

    #[tokio::test]
    async fn test_exists() {
        let store = LedgerStore::new_in_memory().await.unwrap();
        assert!(!store.exists("sess-1").await.unwrap());

        store.save(&test_session("sess-1")).await.unwrap();
        assert!(store.exists("sess-1").await.unwrap());
    }

    #[tokio::test]
    async fn test_cleanup_keeps_live_sessions() {
        let store = LedgerStore::new_in_memory().await.unwrap();

        // Failed session with an old timestamp, inserted directly so
        // save() doesn't refresh updated_at
        let mut failed = test_session("old-failed");
        failed.assign_plan(test_plan()).unwrap();
        failed.start().unwrap();
        failed.fail("gone").unwrap();
        store.save(&failed).await.unwrap();

        let stale = chrono::Utc::now().timestamp() - 10 * 86400;
        sqlx::query("UPDATE upload_sessions SET updated_at = ? WHERE id = ?")
            .bind(stale)
            .bind("old-failed")
            .execute(&store.pool)
            .await
            .unwrap();

        // Old but paused: must survive cleanup
        let mut paused = test_session("old-paused");
        paused.assign_plan(test_plan()).unwrap();
        paused.start().unwrap();
        paused.pause().unwrap();
        store.save(&paused).await.unwrap();
        sqlx::query("UPDATE upload_sessions SET updated_at = ? WHERE id = ?")
            .bind(stale)
            .bind("old-paused")
            .execute(&store.pool)
            .await
            .unwrap();

        let cleaned = store.cleanup_old_sessions(7).await.unwrap();
        assert_eq!(cleaned, 1);
        assert!(!store.exists("old-failed").await.unwrap());
        assert!(store.exists("old-paused").await.unwrap());
    }
}
