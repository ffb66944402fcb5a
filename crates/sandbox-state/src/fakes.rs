//! In-memory fake for the session store (testing and `SANDBOX_STORE=memory`)
//!
//! `MemorySessionStore` satisfies the [`SessionStateStore`] contract without
//! any external dependencies. Every operation runs under one mutex, which
//! gives the compare-and-set guarantees the trait requires.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::StorageError;
use crate::storage_traits::*;

#[derive(Debug, Default)]
struct Tables {
    sessions: HashMap<String, SessionRecord>,
    executions: HashMap<String, ExecutionRecord>,
}

/// In-memory session store backed by two `HashMap`s.
#[derive(Debug, Default)]
pub struct MemorySessionStore {
    tables: Mutex<Tables>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> StorageResult<MutexGuard<'_, Tables>> {
        self.tables
            .lock()
            .map_err(|_| StorageError::Backend("memory store lock poisoned".to_string()))
    }
}

#[async_trait]
impl SessionStateStore for MemorySessionStore {
    async fn create_session(&self, record: SessionRecord) -> StorageResult<()> {
        let mut tables = self.lock()?;
        if tables.sessions.contains_key(&record.session_id) {
            return Err(StorageError::Duplicate {
                kind: "session",
                id: record.session_id,
            });
        }
        tables.sessions.insert(record.session_id.clone(), record);
        Ok(())
    }

    async fn get_session(&self, session_id: &str) -> StorageResult<SessionRecord> {
        let tables = self.lock()?;
        tables
            .sessions
            .get(session_id)
            .cloned()
            .ok_or_else(|| StorageError::SessionNotFound {
                session_id: session_id.to_string(),
            })
    }

    async fn transition_session(
        &self,
        record: SessionRecord,
        expected: SessionStatus,
    ) -> StorageResult<bool> {
        let mut tables = self.lock()?;
        let current = tables
            .sessions
            .get_mut(&record.session_id)
            .ok_or_else(|| StorageError::SessionNotFound {
                session_id: record.session_id.clone(),
            })?;
        if current.status != expected {
            return Ok(false);
        }
        *current = record;
        Ok(true)
    }

    async fn list_sessions(&self, filter: &SessionFilter) -> StorageResult<Vec<SessionRecord>> {
        let tables = self.lock()?;
        let mut records: Vec<SessionRecord> = tables
            .sessions
            .values()
            .filter(|s| filter.matches(s))
            .cloned()
            .collect();
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(records)
    }

    async fn sessions_expiring_before(
        &self,
        status: SessionStatus,
        before: DateTime<Utc>,
    ) -> StorageResult<Vec<SessionRecord>> {
        let tables = self.lock()?;
        let mut records: Vec<SessionRecord> = tables
            .sessions
            .values()
            .filter(|s| s.status == status && s.expires_at < before)
            .cloned()
            .collect();
        records.sort_by(|a, b| a.expires_at.cmp(&b.expires_at));
        Ok(records)
    }

    async fn create_execution(&self, record: ExecutionRecord) -> StorageResult<()> {
        let mut tables = self.lock()?;
        if tables.executions.contains_key(&record.execution_id) {
            return Err(StorageError::Duplicate {
                kind: "execution",
                id: record.execution_id,
            });
        }
        tables
            .executions
            .insert(record.execution_id.clone(), record);
        Ok(())
    }

    async fn complete_execution(&self, record: ExecutionRecord) -> StorageResult<bool> {
        let mut tables = self.lock()?;
        let current = tables
            .executions
            .get_mut(&record.execution_id)
            .ok_or_else(|| StorageError::ExecutionNotFound {
                execution_id: record.execution_id.clone(),
            })?;
        if !current.is_in_flight() {
            return Ok(false);
        }
        *current = record;
        Ok(true)
    }

    async fn get_execution(&self, execution_id: &str) -> StorageResult<ExecutionRecord> {
        let tables = self.lock()?;
        tables
            .executions
            .get(execution_id)
            .cloned()
            .ok_or_else(|| StorageError::ExecutionNotFound {
                execution_id: execution_id.to_string(),
            })
    }

    async fn executions_for_session(
        &self,
        session_id: &str,
    ) -> StorageResult<Vec<ExecutionRecord>> {
        let tables = self.lock()?;
        let mut records: Vec<ExecutionRecord> = tables
            .executions
            .values()
            .filter(|e| e.session_id == session_id)
            .cloned()
            .collect();
        records.sort_by(|a, b| a.started_at.cmp(&b.started_at));
        Ok(records)
    }
}
