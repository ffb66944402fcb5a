//! Runs one command inside an existing sandbox.
//!
//! Every failure is folded into the returned [`ExecutionResult`] except an
//! unknown handle, which comes back as `Err(RuntimeError::HandleNotFound)`.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::time::Instant;
use tracing::debug;

use sandbox_state::{ExecutionOutcome, ExecutionRecord};

use crate::config::SandboxSettings;
use crate::metrics::METRICS;
use crate::runtime::{
    ExecOutput, ExecSpec, ExecTermination, Runtime, RuntimeError, RuntimeMode, RuntimeResult,
    SandboxStats,
};

/// Marker appended to a stream cut at `max_output_bytes`.
pub const TRUNCATION_MARKER: &str = "\n... [output truncated]";

/// Captured outcome of one command.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionResult {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
    pub success: bool,
    pub outcome: ExecutionOutcome,
    pub execution_time_ms: u64,
    pub memory_usage_mb: Option<f64>,
    pub cpu_usage_percent: Option<f64>,
    pub error_message: Option<String>,
    pub mock: bool,
}

impl ExecutionResult {
    /// Copy the captured fields onto an in-flight record.
    pub fn apply_to(self, record: &mut ExecutionRecord) {
        record.stdout = self.stdout;
        record.stderr = self.stderr;
        record.exit_code = self.exit_code;
        record.success = self.success;
        record.outcome = self.outcome;
        record.execution_time_ms = self.execution_time_ms;
        record.memory_usage_mb = self.memory_usage_mb;
        record.cpu_usage_percent = self.cpu_usage_percent;
        record.error_message = self.error_message;
        record.mock = self.mock;
    }

    fn failed(message: String, elapsed_ms: u64, mock: bool) -> Self {
        Self {
            stdout: String::new(),
            stderr: String::new(),
            exit_code: None,
            success: false,
            outcome: ExecutionOutcome::Failed,
            execution_time_ms: elapsed_ms,
            memory_usage_mb: None,
            cpu_usage_percent: None,
            error_message: Some(message),
            mock,
        }
    }
}

#[derive(Clone)]
pub struct CommandExecutor {
    runtime: Arc<dyn Runtime>,
    settings: Arc<SandboxSettings>,
}

impl CommandExecutor {
    pub fn new(runtime: Arc<dyn Runtime>, settings: Arc<SandboxSettings>) -> Self {
        Self { runtime, settings }
    }

    pub async fn execute(
        &self,
        handle: &str,
        spec: &ExecSpec,
        cancel: watch::Receiver<bool>,
    ) -> RuntimeResult<ExecutionResult> {
        let mock = self.runtime.mode() == RuntimeMode::Mock;
        let before = self.sample(handle).await;
        let started = Instant::now();

        let output = match self.runtime.exec(handle, spec, cancel).await {
            Ok(output) => output,
            Err(RuntimeError::HandleNotFound(h)) => return Err(RuntimeError::HandleNotFound(h)),
            Err(e) => {
                let elapsed = elapsed_ms(started);
                debug!(handle = %handle, error = %e, "exec failed before the command ran");
                METRICS.inc_executions_run();
                return Ok(ExecutionResult::failed(e.to_string(), elapsed, mock));
            }
        };
        let execution_time_ms = elapsed_ms(started);
        let after = self.sample(handle).await;

        METRICS.inc_executions_run();
        let mut result = self.classify(output, spec, execution_time_ms, mock);
        if let Some(after) = after {
            let baseline = before.map(|b| b.memory_mb).unwrap_or(0.0);
            result.memory_usage_mb = Some((after.memory_mb - baseline).max(0.0));
            result.cpu_usage_percent = Some(after.cpu_percent);
        }
        Ok(result)
    }

    async fn sample(&self, handle: &str) -> Option<SandboxStats> {
        match self.runtime.stats(handle).await {
            Ok(stats) => stats,
            Err(e) => {
                debug!(handle = %handle, error = %e, "stats unavailable");
                None
            }
        }
    }

    fn classify(
        &self,
        output: ExecOutput,
        spec: &ExecSpec,
        execution_time_ms: u64,
        mock: bool,
    ) -> ExecutionResult {
        let limit = self.settings.max_output_bytes;
        let stdout = truncate_output(output.stdout, limit);
        let stderr = truncate_output(output.stderr, limit);

        let (outcome, error_message) = match output.termination {
            ExecTermination::TimedOut => {
                METRICS.inc_executions_timed_out();
                (
                    ExecutionOutcome::TimedOut,
                    Some(format!(
                        "command timed out after {}s",
                        spec.timeout.as_secs_f64()
                    )),
                )
            }
            ExecTermination::Cancelled => {
                METRICS.inc_executions_cancelled();
                (
                    ExecutionOutcome::Cancelled,
                    Some("execution cancelled".to_string()),
                )
            }
            ExecTermination::Exited => match output.exit_code {
                Some(0) => (ExecutionOutcome::Succeeded, None),
                Some(code) => (
                    ExecutionOutcome::Failed,
                    Some(format!("command exited with status {code}")),
                ),
                None => (
                    ExecutionOutcome::Failed,
                    Some("command terminated by signal".to_string()),
                ),
            },
        };

        ExecutionResult {
            stdout,
            stderr,
            exit_code: output.exit_code,
            success: output.exit_code == Some(0) && outcome == ExecutionOutcome::Succeeded,
            outcome,
            execution_time_ms,
            memory_usage_mb: None,
            cpu_usage_percent: None,
            error_message,
            mock,
        }
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

/// Cut `text` to at most `limit` bytes on a char boundary, appending
/// [`TRUNCATION_MARKER`] when anything was dropped.
pub fn truncate_output(mut text: String, limit: usize) -> String {
    if text.len() <= limit {
        return text;
    }
    let mut cut = limit;
    while !text.is_char_boundary(cut) {
        cut -= 1;
    }
    text.truncate(cut);
    text.push_str(TRUNCATION_MARKER);
    text
}
