//! Deterministic stand-in used when no isolation runtime is available.
//!
//! Nothing here touches the OS. Handles are synthetic and every command
//! "succeeds" with a clearly marked output line.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;

use super::error::RuntimeResult;
use super::{ExecOutput, ExecSpec, ExecTermination, Runtime, RuntimeMode, SandboxSpec, SandboxStats};

/// Prefix of every mock stdout.
pub const MOCK_OUTPUT_PREFIX: &str = "[mock] executed: ";

/// Synthetic handle for a session running in mock mode.
pub fn mock_handle(session_id: &str) -> String {
    format!("mock-{session_id}")
}

/// The stdout a mock execution of `command` produces.
pub fn mock_stdout(command: &str) -> String {
    format!("{MOCK_OUTPUT_PREFIX}{command}\n")
}

#[derive(Debug, Clone, Copy, Default)]
pub struct MockRuntime;

impl MockRuntime {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Runtime for MockRuntime {
    fn mode(&self) -> RuntimeMode {
        RuntimeMode::Mock
    }

    async fn create(&self, spec: &SandboxSpec) -> RuntimeResult<String> {
        Ok(mock_handle(&spec.session_id))
    }

    async fn exec(
        &self,
        _handle: &str,
        spec: &ExecSpec,
        cancel: watch::Receiver<bool>,
    ) -> RuntimeResult<ExecOutput> {
        if *cancel.borrow() {
            return Ok(ExecOutput::interrupted(ExecTermination::Cancelled));
        }
        Ok(ExecOutput::exited(mock_stdout(&spec.command), "", 0))
    }

    async fn stats(&self, _handle: &str) -> RuntimeResult<Option<SandboxStats>> {
        Ok(None)
    }

    async fn stop(&self, _handle: &str, _grace: Duration) -> RuntimeResult<()> {
        Ok(())
    }

    async fn remove(&self, _handle: &str) -> RuntimeResult<()> {
        Ok(())
    }
}
