//! SQLite 记录存储
//!
//! 三张表：research_sessions / analysts / reports，子表随会话级联删除。
//! 时间以 RFC3339（微秒、UTC）文本存储，按字典序即可排序。

#![cfg(feature = "async-sqlite")]

use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;

use super::model::{Persona, PersonaDraft, Report, ReportDraft, Session, SessionId};
use super::{RecordStore, StoreError, StoreResult};
use crate::core::SessionStatus;

const SESSION_COLUMNS: &str =
    "id, topic, max_analysts, status, human_analyst_feedback, created_at, updated_at";

/// 基于 sqlx 连接池的持久化存储
pub struct SqliteRecordStore {
    pool: SqlitePool,
}

impl SqliteRecordStore {
    /// 打开（不存在则创建）数据库文件并建表
    pub async fn open(db_path: impl AsRef<Path>, max_connections: u32) -> StoreResult<Self> {
        let db_url = format!("sqlite:{}?mode=rwc", db_path.as_ref().display());

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect(&db_url)
            .await?;

        let store = Self { pool };
        store.init_tables().await?;
        Ok(store)
    }

    /// 初始化数据库表
    async fn init_tables(&self) -> StoreResult<()> {
        sqlx::query("PRAGMA foreign_keys = ON")
            .execute(&self.pool)
            .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS research_sessions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                topic TEXT NOT NULL,
                max_analysts INTEGER NOT NULL DEFAULT 3,
                status TEXT NOT NULL,
                human_analyst_feedback TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS analysts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                session_id INTEGER NOT NULL,
                name TEXT NOT NULL,
                role TEXT NOT NULL,
                affiliation TEXT NOT NULL,
                description TEXT NOT NULL,
                FOREIGN KEY (session_id) REFERENCES research_sessions(id) ON DELETE CASCADE
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS reports (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                session_id INTEGER NOT NULL UNIQUE,
                introduction TEXT,
                content TEXT,
                conclusion TEXT,
                final_report TEXT NOT NULL,
                created_at TEXT NOT NULL,
                FOREIGN KEY (session_id) REFERENCES research_sessions(id) ON DELETE CASCADE
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_analysts_session ON analysts(session_id)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// 关闭连接池
    pub async fn close(&self) {
        self.pool.close().await;
    }

    async fn fetch_session(&self, id: SessionId) -> StoreResult<Option<Session>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM research_sessions WHERE id = ?",
            SESSION_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(|r| session_from_row(&r)).transpose()
    }

    async fn require_session(&self, id: SessionId) -> StoreResult<Session> {
        self.fetch_session(id)
            .await?
            .ok_or(StoreError::MissingSession(id))
    }

    async fn session_exists(&self, id: SessionId) -> StoreResult<bool> {
        let row = sqlx::query("SELECT 1 FROM research_sessions WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }
}

fn now_text() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_time(raw: &str) -> StoreResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| StoreError::Corrupt(format!("bad timestamp {:?}: {}", raw, e)))
}

fn session_from_row(row: &SqliteRow) -> StoreResult<Session> {
    let status: String = row.try_get("status")?;
    let max_analysts: i64 = row.try_get("max_analysts")?;
    Ok(Session {
        id: row.try_get("id")?,
        topic: row.try_get("topic")?,
        max_analysts: u8::try_from(max_analysts)
            .map_err(|_| StoreError::Corrupt(format!("max_analysts out of range: {}", max_analysts)))?,
        status: status.parse().map_err(StoreError::Corrupt)?,
        feedback: row.try_get("human_analyst_feedback")?,
        created_at: parse_time(&row.try_get::<String, _>("created_at")?)?,
        updated_at: parse_time(&row.try_get::<String, _>("updated_at")?)?,
    })
}

fn persona_from_row(row: &SqliteRow) -> StoreResult<Persona> {
    Ok(Persona {
        id: row.try_get("id")?,
        session_id: row.try_get("session_id")?,
        name: row.try_get("name")?,
        role: row.try_get("role")?,
        affiliation: row.try_get("affiliation")?,
        description: row.try_get("description")?,
    })
}

fn report_from_row(row: &SqliteRow) -> StoreResult<Report> {
    Ok(Report {
        id: row.try_get("id")?,
        session_id: row.try_get("session_id")?,
        introduction: row.try_get("introduction")?,
        content: row.try_get("content")?,
        conclusion: row.try_get("conclusion")?,
        final_report: row.try_get("final_report")?,
        created_at: parse_time(&row.try_get::<String, _>("created_at")?)?,
    })
}

#[async_trait]
impl RecordStore for SqliteRecordStore {
    async fn create_session(&self, topic: &str, max_analysts: u8) -> StoreResult<Session> {
        let now = now_text();
        let result = sqlx::query(
            "INSERT INTO research_sessions (topic, max_analysts, status, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(topic)
        .bind(max_analysts as i64)
        .bind(SessionStatus::Pending.as_str())
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await?;

        self.require_session(result.last_insert_rowid()).await
    }

    async fn get_session(&self, id: SessionId) -> StoreResult<Option<Session>> {
        self.fetch_session(id).await
    }

    async fn list_sessions(&self, limit: usize) -> StoreResult<Vec<Session>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM research_sessions ORDER BY created_at DESC, id DESC LIMIT ?",
            SESSION_COLUMNS
        ))
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(session_from_row).collect()
    }

    async fn update_status(&self, id: SessionId, status: SessionStatus) -> StoreResult<Session> {
        let result = sqlx::query(
            "UPDATE research_sessions SET status = ?, updated_at = ? WHERE id = ?",
        )
        .bind(status.as_str())
        .bind(now_text())
        .bind(id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::MissingSession(id));
        }
        self.require_session(id).await
    }

    async fn set_feedback(&self, id: SessionId, feedback: Option<&str>) -> StoreResult<Session> {
        let result = sqlx::query(
            "UPDATE research_sessions SET human_analyst_feedback = ?, updated_at = ? WHERE id = ?",
        )
        .bind(feedback)
        .bind(now_text())
        .bind(id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::MissingSession(id));
        }
        self.require_session(id).await
    }

    async fn reset_session(&self, id: SessionId) -> StoreResult<Session> {
        let result = sqlx::query(
            "UPDATE research_sessions
             SET status = ?, human_analyst_feedback = NULL, updated_at = ?
             WHERE id = ?",
        )
        .bind(SessionStatus::Pending.as_str())
        .bind(now_text())
        .bind(id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::MissingSession(id));
        }
        self.require_session(id).await
    }

    async fn delete_session(&self, id: SessionId) -> StoreResult<bool> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM analysts WHERE session_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM reports WHERE session_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        let result = sqlx::query("DELETE FROM research_sessions WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(result.rows_affected() > 0)
    }

    async fn replace_personas(
        &self,
        id: SessionId,
        personas: &[PersonaDraft],
    ) -> StoreResult<Vec<Persona>> {
        if !self.session_exists(id).await? {
            return Err(StoreError::MissingSession(id));
        }

        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM analysts WHERE session_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        for persona in personas {
            sqlx::query(
                "INSERT INTO analysts (session_id, name, role, affiliation, description)
                 VALUES (?, ?, ?, ?, ?)",
            )
            .bind(id)
            .bind(&persona.name)
            .bind(&persona.role)
            .bind(&persona.affiliation)
            .bind(&persona.description)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        self.list_personas(id).await
    }

    async fn list_personas(&self, id: SessionId) -> StoreResult<Vec<Persona>> {
        let rows = sqlx::query(
            "SELECT id, session_id, name, role, affiliation, description
             FROM analysts WHERE session_id = ? ORDER BY id ASC",
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(persona_from_row).collect()
    }

    async fn replace_report(&self, id: SessionId, report: &ReportDraft) -> StoreResult<Report> {
        if !self.session_exists(id).await? {
            return Err(StoreError::MissingSession(id));
        }

        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM reports WHERE session_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query(
            "INSERT INTO reports (session_id, introduction, content, conclusion, final_report, created_at)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(id)
        .bind(&report.introduction)
        .bind(&report.content)
        .bind(&report.conclusion)
        .bind(&report.final_report)
        .bind(now_text())
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        self.get_report(id)
            .await?
            .ok_or(StoreError::MissingSession(id))
    }

    async fn get_report(&self, id: SessionId) -> StoreResult<Option<Report>> {
        let row = sqlx::query(
            "SELECT id, session_id, introduction, content, conclusion, final_report, created_at
             FROM reports WHERE session_id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(|r| report_from_row(&r)).transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn draft(name: &str) -> PersonaDraft {
        PersonaDraft {
            name: name.to_string(),
            role: "Economist".to_string(),
            affiliation: "Institute".to_string(),
            description: "Looks at costs".to_string(),
        }
    }

    #[tokio::test]
    async fn test_session_round_trip_across_reopen() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("sessions.db");

        let store = SqliteRecordStore::open(&db_path, 2).await.unwrap();
        let session = store.create_session("quantum computing", 3).await.unwrap();
        assert_eq!(session.status, SessionStatus::Pending);
        store.set_feedback(session.id, Some("approve")).await.unwrap();
        store
            .update_status(session.id, SessionStatus::Running)
            .await
            .unwrap();
        store.close().await;

        let store = SqliteRecordStore::open(&db_path, 2).await.unwrap();
        let loaded = store.get_session(session.id).await.unwrap().unwrap();
        assert_eq!(loaded.topic, "quantum computing");
        assert_eq!(loaded.max_analysts, 3);
        assert_eq!(loaded.status, SessionStatus::Running);
        assert_eq!(loaded.feedback.as_deref(), Some("approve"));
    }

    #[tokio::test]
    async fn test_replace_semantics() {
        let temp_dir = TempDir::new().unwrap();
        let store = SqliteRecordStore::open(temp_dir.path().join("r.db"), 1)
            .await
            .unwrap();
        let s = store.create_session("topic", 3).await.unwrap();

        store.replace_personas(s.id, &[draft("a"), draft("b")]).await.unwrap();
        let personas = store.replace_personas(s.id, &[draft("c")]).await.unwrap();
        assert_eq!(personas.len(), 1);
        assert_eq!(personas[0].name, "c");

        let first = ReportDraft { final_report: "one".into(), ..Default::default() };
        let second = ReportDraft {
            introduction: Some("intro".into()),
            final_report: "two".into(),
            ..Default::default()
        };
        store.replace_report(s.id, &first).await.unwrap();
        let report = store.replace_report(s.id, &second).await.unwrap();
        assert_eq!(report.final_report, "two");
        assert_eq!(report.introduction.as_deref(), Some("intro"));
    }

    #[tokio::test]
    async fn test_delete_and_missing_writes() {
        let temp_dir = TempDir::new().unwrap();
        let store = SqliteRecordStore::open(temp_dir.path().join("d.db"), 1)
            .await
            .unwrap();
        let s = store.create_session("topic", 2).await.unwrap();
        store.replace_personas(s.id, &[draft("a")]).await.unwrap();

        assert!(store.delete_session(s.id).await.unwrap());
        assert!(store.get_session(s.id).await.unwrap().is_none());
        assert!(store.list_personas(s.id).await.unwrap().is_empty());
        assert!(matches!(
            store.update_status(s.id, SessionStatus::Failed).await,
            Err(StoreError::MissingSession(_))
        ));
        assert!(matches!(
            store.replace_report(s.id, &ReportDraft::default()).await,
            Err(StoreError::MissingSession(_))
        ));
        assert!(!store.delete_session(s.id).await.unwrap());
    }
}
