//! Structured observability hooks for session lifecycle events.
//!
//! This module provides:
//! - Session-scoped tracing spans via the `SessionSpan` RAII guard, and
//!   [`session_span`] for instrumenting async work
//! - Emission functions for key lifecycle events: created, rejected,
//!   expired, closed, execution finished, teardown failure
//!
//! Events are emitted at `info!` level (filter with `RUST_LOG`).

use tracing::{info, warn};

use sandbox_state::{ExecutionOutcome, SessionStatus};

/// Span tagged with the session id; attach to futures with `.instrument()`.
pub fn session_span(session_id: &str) -> tracing::Span {
    tracing::info_span!("sandbox.session", session_id = %session_id)
}

/// RAII guard that enters a session-scoped span for synchronous code.
///
/// # Example
///
/// ```ignore
/// let _span = SessionSpan::enter("sess-12345");
/// // tracing calls here carry session_id = "sess-12345"
/// ```
pub struct SessionSpan {
    _span: tracing::span::EnteredSpan,
}

impl SessionSpan {
    pub fn enter(session_id: &str) -> Self {
        Self {
            _span: session_span(session_id).entered(),
        }
    }
}

/// Emit event: session created (any resulting status, including `error`).
pub fn emit_session_created(
    session_id: &str,
    agent_id: &str,
    tool_id: &str,
    status: SessionStatus,
    mock: bool,
    timeout_secs: u64,
) {
    info!(
        event = "session.created",
        session_id = %session_id,
        agent_id = %agent_id,
        tool_id = %tool_id,
        status = %status,
        mock = mock,
        timeout_secs = timeout_secs,
    );
}

/// Emit event: session creation refused at capacity.
pub fn emit_session_rejected(agent_id: &str, tool_id: &str, limit: usize) {
    warn!(
        event = "session.rejected",
        agent_id = %agent_id,
        tool_id = %tool_id,
        limit = limit,
    );
}

pub fn emit_session_expired(session_id: &str) {
    info!(event = "session.expired", session_id = %session_id);
}

pub fn emit_session_closed(session_id: &str, cancelled_executions: usize) {
    info!(
        event = "session.closed",
        session_id = %session_id,
        cancelled_executions = cancelled_executions,
    );
}

/// Emit event: execution finalized.
pub fn emit_execution_finished(
    session_id: &str,
    execution_id: &str,
    outcome: ExecutionOutcome,
    exit_code: Option<i32>,
    duration_ms: u64,
) {
    info!(
        event = "execution.finished",
        session_id = %session_id,
        execution_id = %execution_id,
        outcome = %outcome,
        exit_code = ?exit_code,
        duration_ms = duration_ms,
    );
}

/// Emit event: best-effort sandbox teardown failed (warning level).
pub fn emit_teardown_failed(session_id: &str, handle: &str, error: &dyn std::fmt::Display) {
    warn!(
        event = "sandbox.teardown_failed",
        session_id = %session_id,
        handle = %handle,
        error = %error,
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_span_create() {
        let _span = SessionSpan::enter("test-session-id");
        emit_session_expired("test-session-id");
    }
}
