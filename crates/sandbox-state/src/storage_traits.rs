//! Storage trait definitions for the sandbox service
//!
//! These types define the persisted data model:
//! - `SessionRecord`: a time-bounded lease on one sandbox
//! - `ExecutionRecord`: one command run against a session
//! - `SessionStateStore`: the persistence contract the core depends on
//!
//! The trait is async and backend-agnostic. An in-memory fake is provided
//! for testing via the `fakes` module.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StorageError;

/// Result type for storage operations
pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// `sandbox_status` of a session with no real sandbox behind it.
pub const MOCK_SANDBOX_STATUS: &str = "mock";

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// Lifecycle status of a session.
///
/// Transitions: `Active → Expired | Closed | Error`, `Error → Closed`.
/// `Expired` and `Closed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Active,
    Expired,
    Closed,
    Error,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Active => "active",
            SessionStatus::Expired => "expired",
            SessionStatus::Closed => "closed",
            SessionStatus::Error => "error",
        }
    }

    /// `true` for states no operation can leave.
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionStatus::Expired | SessionStatus::Closed)
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SessionStatus {
    type Err = StorageError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "active" => Ok(SessionStatus::Active),
            "expired" => Ok(SessionStatus::Expired),
            "closed" => Ok(SessionStatus::Closed),
            "error" => Ok(SessionStatus::Error),
            other => Err(StorageError::Serialization(format!(
                "unknown session status: {other}"
            ))),
        }
    }
}

/// Resolved resource limits applied to a sandbox.
///
/// Only ever built by the limit policy, so every field has been validated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceLimits {
    /// Memory ceiling with unit suffix, e.g. `512m`
    pub memory: String,
    /// CPU quota in microseconds per `cpu_period`
    pub cpu_quota: u64,
    /// CPU scheduling period in microseconds (fixed at 100000)
    pub cpu_period: u64,
    /// Network mode, `none` unless the tool requires network access
    pub network_mode: String,
    /// Size bound of the writable scratch tmpfs, e.g. `100m`
    pub tmpfs_size: String,
    /// Maximum number of processes inside the sandbox
    pub pids_limit: u32,
}

impl ResourceLimits {
    /// CPU share expressed in cores (quota / period).
    pub fn cpu_cores(&self) -> f64 {
        self.cpu_quota as f64 / self.cpu_period as f64
    }
}

/// Persisted session record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub session_id: String,
    pub tool_id: String,
    pub agent_id: String,
    /// Optional link to an owning higher-level execution context
    pub execution_id: Option<String>,
    /// Runtime handle; `None` in mock mode or when sandbox creation failed
    pub sandbox_id: Option<String>,
    /// Runtime-reported state string (`running`, `mock`, `removed`, ...)
    pub sandbox_status: String,
    /// Image the sandbox was created from (after allow-list substitution)
    pub image: String,
    pub status: SessionStatus,
    pub resource_limits: ResourceLimits,
    /// Populated when the session entered `Error`
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
}

impl SessionRecord {
    /// `true` once `now` is strictly past `expires_at`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    /// `true` when the session was created in mock mode.
    pub fn is_mock(&self) -> bool {
        self.sandbox_status == MOCK_SANDBOX_STATUS
    }
}

/// Filter for [`SessionStateStore::list_sessions`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionFilter {
    pub agent_id: Option<String>,
    pub status: Option<SessionStatus>,
}

impl SessionFilter {
    pub fn agent(mut self, agent_id: impl Into<String>) -> Self {
        self.agent_id = Some(agent_id.into());
        self
    }

    pub fn status(mut self, status: SessionStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn matches(&self, record: &SessionRecord) -> bool {
        self.agent_id
            .as_deref()
            .map(|a| record.agent_id == a)
            .unwrap_or(true)
            && self.status.map(|s| record.status == s).unwrap_or(true)
    }
}

// ---------------------------------------------------------------------------
// Execution
// ---------------------------------------------------------------------------

/// How an execution ended (or that it has not ended yet).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionOutcome {
    Running,
    Succeeded,
    Failed,
    TimedOut,
    Cancelled,
}

impl ExecutionOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionOutcome::Running => "running",
            ExecutionOutcome::Succeeded => "succeeded",
            ExecutionOutcome::Failed => "failed",
            ExecutionOutcome::TimedOut => "timed_out",
            ExecutionOutcome::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for ExecutionOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ExecutionOutcome {
    type Err = StorageError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "running" => Ok(ExecutionOutcome::Running),
            "succeeded" => Ok(ExecutionOutcome::Succeeded),
            "failed" => Ok(ExecutionOutcome::Failed),
            "timed_out" => Ok(ExecutionOutcome::TimedOut),
            "cancelled" => Ok(ExecutionOutcome::Cancelled),
            other => Err(StorageError::Serialization(format!(
                "unknown execution outcome: {other}"
            ))),
        }
    }
}

/// Persisted execution record.
///
/// Created when a command starts (`completed_at == None`) and finalized
/// exactly once; never mutated after `completed_at` is set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub execution_id: String,
    pub session_id: String,
    pub command: String,
    pub working_directory: Option<String>,
    pub environment_variables: BTreeMap<String, String>,
    /// Opaque caller parameters kept for audit
    pub input_parameters: serde_json::Value,
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
    pub success: bool,
    pub execution_time_ms: u64,
    pub memory_usage_mb: Option<f64>,
    pub cpu_usage_percent: Option<f64>,
    pub outcome: ExecutionOutcome,
    /// `true` when produced by the mock runtime
    pub mock: bool,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
}

impl ExecutionRecord {
    /// A fresh in-flight record.
    pub fn started(
        execution_id: impl Into<String>,
        session_id: impl Into<String>,
        command: impl Into<String>,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            execution_id: execution_id.into(),
            session_id: session_id.into(),
            command: command.into(),
            working_directory: None,
            environment_variables: BTreeMap::new(),
            input_parameters: serde_json::Value::Null,
            stdout: String::new(),
            stderr: String::new(),
            exit_code: None,
            success: false,
            execution_time_ms: 0,
            memory_usage_mb: None,
            cpu_usage_percent: None,
            outcome: ExecutionOutcome::Running,
            mock: false,
            started_at,
            completed_at: None,
            error_message: None,
        }
    }

    pub fn is_in_flight(&self) -> bool {
        self.completed_at.is_none()
    }
}

// ---------------------------------------------------------------------------
// SessionStateStore
// ---------------------------------------------------------------------------

/// Persistence contract for sessions and executions.
///
/// Guarantees required of implementations:
/// - `transition_session` is a compare-and-set on `status`: it writes only
///   when the stored status equals `expected`, and reports whether it wrote.
/// - `complete_execution` writes only while the stored record is still in
///   flight, so an execution is finalized at most once.
/// - Session records are never deleted.
#[async_trait]
pub trait SessionStateStore: Send + Sync {
    /// Insert a new session. Fails with `Duplicate` if the id exists.
    async fn create_session(&self, record: SessionRecord) -> StorageResult<()>;

    /// Fetch a session by id. Fails with `SessionNotFound` if absent.
    async fn get_session(&self, session_id: &str) -> StorageResult<SessionRecord>;

    /// Replace the stored session if its current status equals `expected`.
    async fn transition_session(
        &self,
        record: SessionRecord,
        expected: SessionStatus,
    ) -> StorageResult<bool>;

    /// List sessions matching `filter`, newest first.
    async fn list_sessions(&self, filter: &SessionFilter) -> StorageResult<Vec<SessionRecord>>;

    /// Sessions in `status` whose `expires_at` is strictly before `before`.
    async fn sessions_expiring_before(
        &self,
        status: SessionStatus,
        before: DateTime<Utc>,
    ) -> StorageResult<Vec<SessionRecord>>;

    /// Insert a new execution. Fails with `Duplicate` if the id exists.
    async fn create_execution(&self, record: ExecutionRecord) -> StorageResult<()>;

    /// Finalize an in-flight execution. Returns `false` if it was already final.
    async fn complete_execution(&self, record: ExecutionRecord) -> StorageResult<bool>;

    /// Fetch an execution by id. Fails with `ExecutionNotFound` if absent.
    async fn get_execution(&self, execution_id: &str) -> StorageResult<ExecutionRecord>;

    /// All executions of a session, oldest first.
    async fn executions_for_session(&self, session_id: &str)
        -> StorageResult<Vec<ExecutionRecord>>;
}
