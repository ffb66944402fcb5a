//! Execution audit sink.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use sandbox_state::{ExecutionOutcome, ExecutionRecord, SessionRecord};

/// One audit entry, written after every finalized execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageRecord {
    pub execution_id: String,
    pub session_id: String,
    pub agent_id: String,
    pub tool_id: String,
    pub command: String,
    pub outcome: ExecutionOutcome,
    pub exit_code: Option<i32>,
    pub execution_time_ms: u64,
    pub mock: bool,
    pub completed_at: Option<DateTime<Utc>>,
}

impl UsageRecord {
    pub fn from_execution(session: &SessionRecord, execution: &ExecutionRecord) -> Self {
        Self {
            execution_id: execution.execution_id.clone(),
            session_id: execution.session_id.clone(),
            agent_id: session.agent_id.clone(),
            tool_id: session.tool_id.clone(),
            command: execution.command.clone(),
            outcome: execution.outcome,
            exit_code: execution.exit_code,
            execution_time_ms: execution.execution_time_ms,
            mock: execution.mock,
            completed_at: execution.completed_at,
        }
    }
}

/// Receives audit records. Failures never affect the execution.
#[async_trait]
pub trait UsageLogger: Send + Sync {
    async fn record(&self, record: UsageRecord) -> anyhow::Result<()>;
}

/// Writes audit records as structured events on the `sandbox.audit` target.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingUsageLogger;

#[async_trait]
impl UsageLogger for TracingUsageLogger {
    async fn record(&self, record: UsageRecord) -> anyhow::Result<()> {
        tracing::info!(
            target: "sandbox.audit",
            execution_id = %record.execution_id,
            session_id = %record.session_id,
            agent_id = %record.agent_id,
            tool_id = %record.tool_id,
            outcome = %record.outcome,
            exit_code = ?record.exit_code,
            execution_time_ms = record.execution_time_ms,
            mock = record.mock,
            "execution recorded"
        );
        Ok(())
    }
}
