//! 内存记录存储（测试与未配置数据库时使用）

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use super::model::{Persona, PersonaDraft, Report, ReportDraft, Session, SessionId};
use super::{RecordStore, StoreError, StoreResult};
use crate::core::SessionStatus;

#[derive(Default)]
struct Tables {
    next_session_id: SessionId,
    next_persona_id: i64,
    next_report_id: i64,
    sessions: HashMap<SessionId, Session>,
    personas: HashMap<SessionId, Vec<Persona>>,
    reports: HashMap<SessionId, Report>,
}

impl Tables {
    fn session_mut(&mut self, id: SessionId) -> StoreResult<&mut Session> {
        self.sessions.get_mut(&id).ok_or(StoreError::MissingSession(id))
    }
}

/// 内存版记录存储，语义与 SQLite 版一致
#[derive(Default)]
pub struct MemoryRecordStore {
    tables: RwLock<Tables>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn create_session(&self, topic: &str, max_analysts: u8) -> StoreResult<Session> {
        let mut tables = self.tables.write().await;
        tables.next_session_id += 1;
        let now = Utc::now();
        let session = Session {
            id: tables.next_session_id,
            topic: topic.to_string(),
            max_analysts,
            status: SessionStatus::Pending,
            feedback: None,
            created_at: now,
            updated_at: now,
        };
        tables.sessions.insert(session.id, session.clone());
        Ok(session)
    }

    async fn get_session(&self, id: SessionId) -> StoreResult<Option<Session>> {
        Ok(self.tables.read().await.sessions.get(&id).cloned())
    }

    async fn list_sessions(&self, limit: usize) -> StoreResult<Vec<Session>> {
        let tables = self.tables.read().await;
        let mut sessions: Vec<Session> = tables.sessions.values().cloned().collect();
        sessions.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        sessions.truncate(limit);
        Ok(sessions)
    }

    async fn update_status(&self, id: SessionId, status: SessionStatus) -> StoreResult<Session> {
        let mut tables = self.tables.write().await;
        let session = tables.session_mut(id)?;
        session.status = status;
        session.updated_at = Utc::now();
        Ok(session.clone())
    }

    async fn set_feedback(&self, id: SessionId, feedback: Option<&str>) -> StoreResult<Session> {
        let mut tables = self.tables.write().await;
        let session = tables.session_mut(id)?;
        session.feedback = feedback.map(str::to_string);
        session.updated_at = Utc::now();
        Ok(session.clone())
    }

    async fn reset_session(&self, id: SessionId) -> StoreResult<Session> {
        let mut tables = self.tables.write().await;
        let session = tables.session_mut(id)?;
        session.status = SessionStatus::Pending;
        session.feedback = None;
        session.updated_at = Utc::now();
        Ok(session.clone())
    }

    async fn delete_session(&self, id: SessionId) -> StoreResult<bool> {
        let mut tables = self.tables.write().await;
        tables.personas.remove(&id);
        tables.reports.remove(&id);
        Ok(tables.sessions.remove(&id).is_some())
    }

    async fn replace_personas(
        &self,
        id: SessionId,
        personas: &[PersonaDraft],
    ) -> StoreResult<Vec<Persona>> {
        let mut tables = self.tables.write().await;
        tables.session_mut(id)?;
        let mut records = Vec::with_capacity(personas.len());
        for draft in personas {
            tables.next_persona_id += 1;
            records.push(Persona {
                id: tables.next_persona_id,
                session_id: id,
                name: draft.name.clone(),
                role: draft.role.clone(),
                affiliation: draft.affiliation.clone(),
                description: draft.description.clone(),
            });
        }
        tables.personas.insert(id, records.clone());
        Ok(records)
    }

    async fn list_personas(&self, id: SessionId) -> StoreResult<Vec<Persona>> {
        Ok(self
            .tables
            .read()
            .await
            .personas
            .get(&id)
            .cloned()
            .unwrap_or_default())
    }

    async fn replace_report(&self, id: SessionId, report: &ReportDraft) -> StoreResult<Report> {
        let mut tables = self.tables.write().await;
        tables.session_mut(id)?;
        tables.next_report_id += 1;
        let record = Report {
            id: tables.next_report_id,
            session_id: id,
            introduction: report.introduction.clone(),
            content: report.content.clone(),
            conclusion: report.conclusion.clone(),
            final_report: report.final_report.clone(),
            created_at: Utc::now(),
        };
        tables.reports.insert(id, record.clone());
        Ok(record)
    }

    async fn get_report(&self, id: SessionId) -> StoreResult<Option<Report>> {
        Ok(self.tables.read().await.reports.get(&id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn draft(name: &str) -> PersonaDraft {
        PersonaDraft {
            name: name.to_string(),
            role: "Reviewer".to_string(),
            affiliation: "Lab".to_string(),
            description: "Focus".to_string(),
        }
    }

    #[tokio::test]
    async fn test_list_newest_first() {
        let store = MemoryRecordStore::new();
        let a = store.create_session("a", 1).await.unwrap();
        let b = store.create_session("b", 2).await.unwrap();
        let listed = store.list_sessions(10).await.unwrap();
        assert_eq!(listed.iter().map(|s| s.id).collect::<Vec<_>>(), vec![b.id, a.id]);
        assert_eq!(store.list_sessions(1).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_personas_are_replaced() {
        let store = MemoryRecordStore::new();
        let s = store.create_session("topic", 3).await.unwrap();
        store.replace_personas(s.id, &[draft("a"), draft("b"), draft("c")]).await.unwrap();
        store.replace_personas(s.id, &[draft("d")]).await.unwrap();
        let personas = store.list_personas(s.id).await.unwrap();
        assert_eq!(personas.len(), 1);
        assert_eq!(personas[0].name, "d");
    }

    #[tokio::test]
    async fn test_delete_cascades_and_writes_fail_afterwards() {
        let store = MemoryRecordStore::new();
        let s = store.create_session("topic", 3).await.unwrap();
        store.replace_personas(s.id, &[draft("a")]).await.unwrap();
        store
            .replace_report(s.id, &ReportDraft { final_report: "r".into(), ..Default::default() })
            .await
            .unwrap();

        assert!(store.delete_session(s.id).await.unwrap());
        assert!(!store.delete_session(s.id).await.unwrap());
        assert!(store.list_personas(s.id).await.unwrap().is_empty());
        assert!(store.get_report(s.id).await.unwrap().is_none());
        assert!(matches!(
            store.update_status(s.id, SessionStatus::Running).await,
            Err(StoreError::MissingSession(_))
        ));
        assert!(store.replace_personas(s.id, &[draft("x")]).await.is_err());
    }
}
