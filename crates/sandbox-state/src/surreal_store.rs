//! SurrealDB-backed SessionStateStore implementation
//!
//! Uses `schema::SessionRow` and `schema::ExecutionRow` for persistence,
//! converting to/from `storage_traits` types at the boundary. Status
//! transitions are single `UPDATE ... WHERE status = $expected` statements,
//! so competing writers cannot both win.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use surrealdb::engine::any::Any;
use surrealdb::opt::auth::Root;
use surrealdb::Surreal;
use tracing::{debug, info};

use crate::error::{StateError, StorageError};
use crate::migrations;
use crate::schema::{backend, decode_executions, decode_sessions, ExecutionRow, SessionRow};
use crate::storage_traits::{
    ExecutionRecord, SessionFilter, SessionRecord, SessionStateStore, SessionStatus,
    StorageResult,
};

const NAMESPACE: &str = "sandbox";
const DATABASE: &str = "main";
const DEFAULT_LOCAL_PATH: &str = ".sandbox/db";

/// SurrealDB-backed implementation of [`SessionStateStore`].
#[derive(Clone)]
pub struct SurrealSessionStore {
    db: Surreal<Any>,
}

impl SurrealSessionStore {
    /// Create an in-memory instance for testing.
    ///
    /// Connects to `mem://`, selects `sandbox/main`, and runs `init_schema`.
    pub async fn in_memory() -> crate::Result<Self> {
        Self::connect("mem://").await
    }

    /// Connect to any SurrealDB endpoint (`mem://`, `surrealkv://path`, `ws://host`).
    pub async fn connect(url: &str) -> crate::Result<Self> {
        let db = surrealdb::engine::any::connect(url)
            .await
            .map_err(|e| StateError::Connection(format!("Failed to connect to {}: {}", url, e)))?;

        Self::select_and_init(db).await
    }

    /// Create from environment variables.
    ///
    /// - `SURREALDB_URL` selects the endpoint; without it a local
    ///   `surrealkv://.sandbox/db` database is used.
    /// - `SURREALDB_USERNAME` / `SURREALDB_PASSWORD`, when both are set,
    ///   sign in as a root user before selecting the namespace.
    pub async fn from_env() -> crate::Result<Self> {
        let url = match std::env::var("SURREALDB_URL") {
            Ok(url) => url,
            Err(_) => {
                std::fs::create_dir_all(DEFAULT_LOCAL_PATH).map_err(|e| {
                    StateError::Connection(format!(
                        "Failed to create database directory {}: {}",
                        DEFAULT_LOCAL_PATH, e
                    ))
                })?;
                let url = format!("surrealkv://{}", DEFAULT_LOCAL_PATH);
                info!("No SURREALDB_URL found, using local persistence: {}", url);
                url
            }
        };

        let db = surrealdb::engine::any::connect(&url)
            .await
            .map_err(|e| StateError::Connection(format!("Failed to connect to {}: {}", url, e)))?;

        if let (Ok(username), Ok(password)) = (
            std::env::var("SURREALDB_USERNAME"),
            std::env::var("SURREALDB_PASSWORD"),
        ) {
            db.signin(Root {
                username: &username,
                password: &password,
            })
            .await
            .map_err(|e| StateError::Connection(format!("Root auth failed: {e}")))?;
        }

        info!("SurrealSessionStore connected ({})", url);
        Self::select_and_init(db).await
    }

    async fn select_and_init(db: Surreal<Any>) -> crate::Result<Self> {
        db.use_ns(NAMESPACE)
            .use_db(DATABASE)
            .await
            .map_err(|e| StateError::Connection(e.to_string()))?;

        migrations::init_schema(&db).await?;
        Ok(Self { db })
    }

    // -- private helpers -----------------------------------------------------

    async fn fetch_session(&self, session_id: &str) -> StorageResult<Option<SessionRow>> {
        let sid = session_id.to_string();
        let mut res = self
            .db
            .query("SELECT * FROM sessions WHERE session_id = $sid")
            .bind(("sid", sid))
            .await
            .map_err(backend)?;

        let rows: Vec<SessionRow> = res.take(0).map_err(backend)?;
        Ok(rows.into_iter().next())
    }

    async fn fetch_execution(&self, execution_id: &str) -> StorageResult<Option<ExecutionRow>> {
        let eid = execution_id.to_string();
        let mut res = self
            .db
            .query("SELECT * FROM executions WHERE execution_id = $eid")
            .bind(("eid", eid))
            .await
            .map_err(backend)?;

        let rows: Vec<ExecutionRow> = res.take(0).map_err(backend)?;
        Ok(rows.into_iter().next())
    }
}

#[async_trait]
impl SessionStateStore for SurrealSessionStore {
    async fn create_session(&self, record: SessionRecord) -> StorageResult<()> {
        if self.fetch_session(&record.session_id).await?.is_some() {
            return Err(StorageError::Duplicate {
                kind: "session",
                id: record.session_id,
            });
        }

        debug!(session_id = %record.session_id, "creating session row");
        let _created: Option<SessionRow> = self
            .db
            .create("sessions")
            .content(SessionRow::from(record))
            .await
            .map_err(backend)?;

        Ok(())
    }

    async fn get_session(&self, session_id: &str) -> StorageResult<SessionRecord> {
        self.fetch_session(session_id)
            .await?
            .ok_or_else(|| StorageError::SessionNotFound {
                session_id: session_id.to_string(),
            })?
            .into_record()
    }

    async fn transition_session(
        &self,
        record: SessionRecord,
        expected: SessionStatus,
    ) -> StorageResult<bool> {
        if self.fetch_session(&record.session_id).await?.is_none() {
            return Err(StorageError::SessionNotFound {
                session_id: record.session_id,
            });
        }

        let sid = record.session_id.clone();
        let mut res = self
            .db
            .query(
                "UPDATE sessions MERGE $row \
                 WHERE session_id = $sid AND status = $expected RETURN AFTER",
            )
            .bind(("row", SessionRow::from(record)))
            .bind(("sid", sid))
            .bind(("expected", expected.as_str().to_string()))
            .await
            .map_err(backend)?;

        let updated: Vec<SessionRow> = res.take(0).map_err(backend)?;
        Ok(!updated.is_empty())
    }

    async fn list_sessions(&self, filter: &SessionFilter) -> StorageResult<Vec<SessionRecord>> {
        let mut res = self
            .db
            .query(
                "SELECT * FROM sessions \
                 WHERE ($agent = NONE OR agent_id = $agent) \
                 AND ($status = NONE OR status = $status) \
                 ORDER BY created_at DESC",
            )
            .bind(("agent", filter.agent_id.clone()))
            .bind(("status", filter.status.map(|s| s.as_str().to_string())))
            .await
            .map_err(backend)?;

        let rows: Vec<SessionRow> = res.take(0).map_err(backend)?;
        decode_sessions(rows)
    }

    async fn sessions_expiring_before(
        &self,
        status: SessionStatus,
        before: DateTime<Utc>,
    ) -> StorageResult<Vec<SessionRecord>> {
        let mut res = self
            .db
            .query(
                "SELECT * FROM sessions \
                 WHERE status = $status AND expires_at < $before \
                 ORDER BY expires_at ASC",
            )
            .bind(("status", status.as_str().to_string()))
            .bind(("before", surrealdb::sql::Datetime::from(before)))
            .await
            .map_err(backend)?;

        let rows: Vec<SessionRow> = res.take(0).map_err(backend)?;
        decode_sessions(rows)
    }

    async fn create_execution(&self, record: ExecutionRecord) -> StorageResult<()> {
        if self.fetch_execution(&record.execution_id).await?.is_some() {
            return Err(StorageError::Duplicate {
                kind: "execution",
                id: record.execution_id,
            });
        }

        debug!(
            execution_id = %record.execution_id,
            session_id = %record.session_id,
            "creating execution row"
        );
        let _created: Option<ExecutionRow> = self
            .db
            .create("executions")
            .content(ExecutionRow::from(record))
            .await
            .map_err(backend)?;

        Ok(())
    }

    async fn complete_execution(&self, record: ExecutionRecord) -> StorageResult<bool> {
        if self.fetch_execution(&record.execution_id).await?.is_none() {
            return Err(StorageError::ExecutionNotFound {
                execution_id: record.execution_id,
            });
        }

        let eid = record.execution_id.clone();
        let mut res = self
            .db
            .query(
                "UPDATE executions MERGE $row \
                 WHERE execution_id = $eid AND outcome = 'running' RETURN AFTER",
            )
            .bind(("row", ExecutionRow::from(record)))
            .bind(("eid", eid))
            .await
            .map_err(backend)?;

        let updated: Vec<ExecutionRow> = res.take(0).map_err(backend)?;
        Ok(!updated.is_empty())
    }

    async fn get_execution(&self, execution_id: &str) -> StorageResult<ExecutionRecord> {
        self.fetch_execution(execution_id)
            .await?
            .ok_or_else(|| StorageError::ExecutionNotFound {
                execution_id: execution_id.to_string(),
            })?
            .into_record()
    }

    async fn executions_for_session(
        &self,
        session_id: &str,
    ) -> StorageResult<Vec<ExecutionRecord>> {
        let sid = session_id.to_string();
        let mut res = self
            .db
            .query("SELECT * FROM executions WHERE session_id = $sid ORDER BY started_at ASC")
            .bind(("sid", sid))
            .await
            .map_err(backend)?;

        let rows: Vec<ExecutionRow> = res.take(0).map_err(backend)?;
        decode_executions(rows)
    }
}
