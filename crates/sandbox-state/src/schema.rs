//! Row definitions for the SurrealDB tables
//!
//! Tables:
//! - sessions: one row per session lease
//! - executions: one row per command run
//!
//! Rows mirror the `storage_traits` records but store enums as strings and
//! timestamps as native SurrealDB datetimes.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StorageError;
use crate::storage_traits::{ExecutionRecord, ResourceLimits, SessionRecord, StorageResult};

/// Module for serializing chrono DateTime to SurrealDB datetime format
mod surreal_datetime {
    use chrono::{DateTime, Utc};
    use serde::{self, Deserialize, Deserializer, Serializer};
    use surrealdb::sql::Datetime as SurrealDatetime;

    pub fn serialize<S>(date: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let sd = SurrealDatetime::from(*date);
        serde::Serialize::serialize(&sd, serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let sd = SurrealDatetime::deserialize(deserializer)?;
        Ok(DateTime::from(sd))
    }
}

/// Module for serializing optional chrono DateTime to SurrealDB datetime format
mod surreal_datetime_opt {
    use chrono::{DateTime, Utc};
    use serde::{self, Deserialize, Deserializer, Serializer};
    use surrealdb::sql::Datetime as SurrealDatetime;

    pub fn serialize<S>(date: &Option<DateTime<Utc>>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match date {
            Some(d) => {
                let sd = SurrealDatetime::from(*d);
                serde::Serialize::serialize(&Some(sd), serializer)
            }
            None => serde::Serialize::serialize(&None::<SurrealDatetime>, serializer),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let sd = Option::<SurrealDatetime>::deserialize(deserializer)?;
        Ok(sd.map(DateTime::from))
    }
}

/// `sessions` table row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRow {
    /// SurrealDB record ID
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<surrealdb::sql::Thing>,
    pub session_id: String,
    pub tool_id: String,
    pub agent_id: String,
    pub execution_id: Option<String>,
    pub sandbox_id: Option<String>,
    pub sandbox_status: String,
    pub image: String,
    /// "active" | "expired" | "closed" | "error"
    pub status: String,
    pub resource_limits: ResourceLimits,
    pub error_message: Option<String>,
    #[serde(with = "surreal_datetime")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "surreal_datetime")]
    pub expires_at: DateTime<Utc>,
    #[serde(default, with = "surreal_datetime_opt")]
    pub closed_at: Option<DateTime<Utc>>,
}

impl From<SessionRecord> for SessionRow {
    fn from(record: SessionRecord) -> Self {
        SessionRow {
            id: None,
            session_id: record.session_id,
            tool_id: record.tool_id,
            agent_id: record.agent_id,
            execution_id: record.execution_id,
            sandbox_id: record.sandbox_id,
            sandbox_status: record.sandbox_status,
            image: record.image,
            status: record.status.as_str().to_string(),
            resource_limits: record.resource_limits,
            error_message: record.error_message,
            created_at: record.created_at,
            expires_at: record.expires_at,
            closed_at: record.closed_at,
        }
    }
}

impl SessionRow {
    pub fn into_record(self) -> StorageResult<SessionRecord> {
        Ok(SessionRecord {
            session_id: self.session_id,
            tool_id: self.tool_id,
            agent_id: self.agent_id,
            execution_id: self.execution_id,
            sandbox_id: self.sandbox_id,
            sandbox_status: self.sandbox_status,
            image: self.image,
            status: self.status.parse()?,
            resource_limits: self.resource_limits,
            error_message: self.error_message,
            created_at: self.created_at,
            expires_at: self.expires_at,
            closed_at: self.closed_at,
        })
    }
}

/// `executions` table row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRow {
    /// SurrealDB record ID
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<surrealdb::sql::Thing>,
    pub execution_id: String,
    pub session_id: String,
    pub command: String,
    pub working_directory: Option<String>,
    #[serde(default)]
    pub environment_variables: BTreeMap<String, String>,
    pub input_parameters: serde_json::Value,
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
    pub success: bool,
    pub execution_time_ms: u64,
    pub memory_usage_mb: Option<f64>,
    pub cpu_usage_percent: Option<f64>,
    /// "running" | "succeeded" | "failed" | "timed_out" | "cancelled"
    pub outcome: String,
    pub mock: bool,
    #[serde(with = "surreal_datetime")]
    pub started_at: DateTime<Utc>,
    #[serde(default, with = "surreal_datetime_opt")]
    pub completed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
}

impl From<ExecutionRecord> for ExecutionRow {
    fn from(record: ExecutionRecord) -> Self {
        ExecutionRow {
            id: None,
            execution_id: record.execution_id,
            session_id: record.session_id,
            command: record.command,
            working_directory: record.working_directory,
            environment_variables: record.environment_variables,
            input_parameters: record.input_parameters,
            stdout: record.stdout,
            stderr: record.stderr,
            exit_code: record.exit_code,
            success: record.success,
            execution_time_ms: record.execution_time_ms,
            memory_usage_mb: record.memory_usage_mb,
            cpu_usage_percent: record.cpu_usage_percent,
            outcome: record.outcome.as_str().to_string(),
            mock: record.mock,
            started_at: record.started_at,
            completed_at: record.completed_at,
            error_message: record.error_message,
        }
    }
}

impl ExecutionRow {
    pub fn into_record(self) -> StorageResult<ExecutionRecord> {
        Ok(ExecutionRecord {
            execution_id: self.execution_id,
            session_id: self.session_id,
            command: self.command,
            working_directory: self.working_directory,
            environment_variables: self.environment_variables,
            input_parameters: self.input_parameters,
            stdout: self.stdout,
            stderr: self.stderr,
            exit_code: self.exit_code,
            success: self.success,
            execution_time_ms: self.execution_time_ms,
            memory_usage_mb: self.memory_usage_mb,
            cpu_usage_percent: self.cpu_usage_percent,
            outcome: self.outcome.parse()?,
            mock: self.mock,
            started_at: self.started_at,
            completed_at: self.completed_at,
            error_message: self.error_message,
        })
    }
}

/// Decode a batch of rows, failing on the first malformed one.
pub(crate) fn decode_sessions(rows: Vec<SessionRow>) -> StorageResult<Vec<SessionRecord>> {
    rows.into_iter().map(SessionRow::into_record).collect()
}

pub(crate) fn decode_executions(rows: Vec<ExecutionRow>) -> StorageResult<Vec<ExecutionRecord>> {
    rows.into_iter().map(ExecutionRow::into_record).collect()
}

pub(crate) fn backend(err: impl std::fmt::Display) -> StorageError {
    StorageError::Backend(err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage_traits::{ExecutionOutcome, SessionStatus};

    fn limits() -> ResourceLimits {
        ResourceLimits {
            memory: "512m".into(),
            cpu_quota: 50_000,
            cpu_period: 100_000,
            network_mode: "none".into(),
            tmpfs_size: "100m".into(),
            pids_limit: 128,
        }
    }

    #[test]
    fn test_session_row_keeps_status_as_string() {
        let now = Utc::now();
        let record = SessionRecord {
            session_id: "s1".into(),
            tool_id: "t1".into(),
            agent_id: "a1".into(),
            execution_id: Some("parent".into()),
            sandbox_id: Some("sandbox-s1".into()),
            sandbox_status: "running".into(),
            image: "alpine:3.19".into(),
            status: SessionStatus::Error,
            resource_limits: limits(),
            error_message: Some("boom".into()),
            created_at: now,
            expires_at: now + chrono::Duration::seconds(5),
            closed_at: None,
        };

        let row = SessionRow::from(record.clone());
        assert_eq!(row.status, "error");
        assert!(row.id.is_none());
        assert_eq!(row.into_record().unwrap(), record);
    }

    #[test]
    fn test_execution_row_rejects_unknown_outcome() {
        let mut row = ExecutionRow::from(ExecutionRecord::started("e1", "s1", "ls", Utc::now()));
        assert_eq!(row.outcome, ExecutionOutcome::Running.as_str());
        row.outcome = "exploded".into();
        assert!(matches!(
            row.into_record(),
            Err(StorageError::Serialization(_))
        ));
    }
}
