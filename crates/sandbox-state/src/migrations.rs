//! SurrealDB schema initialization
//!
//! Defines the `sessions` and `executions` tables with the indexes the
//! session store queries rely on.

use crate::Result;
use surrealdb::engine::any::Any;
use surrealdb::Surreal;
use tracing::{debug, info};

/// Initialize all sandbox tables in SurrealDB
///
/// Safe to call multiple times (idempotent).
pub async fn init_schema(db: &Surreal<Any>) -> Result<()> {
    info!("Initializing sandbox SurrealDB schema");

    init_sessions_table(db).await?;
    init_executions_table(db).await?;

    info!("Sandbox schema initialization complete");
    Ok(())
}

/// Initialize `sessions` table
///
/// Schema:
/// ```text
/// TABLE sessions {
///   session_id:      STRING (unique)
///   tool_id:         STRING
///   agent_id:        STRING (indexed)
///   execution_id:    STRING?
///   sandbox_id:      STRING?  (NONE in mock mode)
///   sandbox_status:  STRING
///   image:           STRING
///   status:          STRING   (active | expired | closed | error)
///   resource_limits: OBJECT
///   error_message:   STRING?
///   created_at:      DATETIME
///   expires_at:      DATETIME
///   closed_at:       DATETIME?
/// }
/// ```
///
/// Session rows are never deleted; status changes go through
/// compare-and-set updates in the store.
async fn init_sessions_table(db: &Surreal<Any>) -> Result<()> {
    debug!("Initializing sessions table");

    let sql = r#"
        DEFINE TABLE IF NOT EXISTS sessions AS
            SCHEMALESS
            PERMISSIONS
                FOR create FULL
                FOR read FULL
                FOR update FULL
                FOR delete NONE;

        DEFINE INDEX IF NOT EXISTS idx_session_id ON TABLE sessions COLUMNS session_id UNIQUE;

        -- Expiry sweeps query by (status, expires_at)
        DEFINE INDEX IF NOT EXISTS idx_status_expires_at ON TABLE sessions COLUMNS status, expires_at;

        DEFINE INDEX IF NOT EXISTS idx_agent_id ON TABLE sessions COLUMNS agent_id;
    "#;

    db.query(sql).await?;
    debug!("sessions table initialized");
    Ok(())
}

/// Initialize `executions` table
///
/// Schema:
/// ```text
/// TABLE executions {
///   execution_id:  STRING (unique)
///   session_id:    STRING (indexed, many-to-one)
///   command:       STRING
///   outcome:       STRING (running | succeeded | failed | timed_out | cancelled)
///   started_at:    DATETIME
///   completed_at:  DATETIME?
///   ...captured output and usage fields
/// }
/// ```
async fn init_executions_table(db: &Surreal<Any>) -> Result<()> {
    debug!("Initializing executions table");

    let sql = r#"
        DEFINE TABLE IF NOT EXISTS executions AS
            SCHEMALESS
            PERMISSIONS
                FOR create FULL
                FOR read FULL
                FOR update FULL
                FOR delete NONE;

        DEFINE INDEX IF NOT EXISTS idx_execution_id ON TABLE executions COLUMNS execution_id UNIQUE;

        DEFINE INDEX IF NOT EXISTS idx_exec_session_id ON TABLE executions COLUMNS session_id;
    "#;

    db.query(sql).await?;
    debug!("executions table initialized");
    Ok(())
}
