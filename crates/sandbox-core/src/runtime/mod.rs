//! Isolation runtime boundary.
//!
//! A [`Runtime`] exposes the five operations the service needs from an
//! isolation layer: create a context, exec into it, sample its stats, stop
//! it and remove it. [`select_runtime`] picks [`LiveRuntime`] or
//! [`MockRuntime`] once at startup; nothing downstream re-checks
//! availability.

pub mod error;
pub mod live;
pub mod mock;
pub mod probe;
pub mod stats;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{info, warn};

use sandbox_state::ResourceLimits;

use crate::config::{HardeningProfile, SandboxSettings};

pub use error::{RuntimeError, RuntimeResult};
pub use live::LiveRuntime;
pub use mock::MockRuntime;
pub use probe::{Capability, RuntimeProbe};

/// Which runtime implementation the service is using.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeMode {
    Live,
    Mock,
}

impl std::fmt::Display for RuntimeMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RuntimeMode::Live => f.write_str("live"),
            RuntimeMode::Mock => f.write_str("mock"),
        }
    }
}

/// Everything needed to create one sandbox.
#[derive(Debug, Clone, PartialEq)]
pub struct SandboxSpec {
    /// Runtime-level name, unique per session.
    pub name: String,
    pub session_id: String,
    pub image: String,
    pub limits: ResourceLimits,
    pub hardening: HardeningProfile,
}

/// A single command to run inside a sandbox.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecSpec {
    pub exec_id: String,
    pub command: String,
    pub working_directory: Option<String>,
    pub env: BTreeMap<String, String>,
    pub timeout: Duration,
}

/// How an exec call ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecTermination {
    Exited,
    TimedOut,
    Cancelled,
}

/// Raw output of an exec call, before truncation and bookkeeping.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecOutput {
    pub stdout: String,
    pub stderr: String,
    /// `None` when the process was killed or the status is unknown.
    pub exit_code: Option<i32>,
    pub termination: ExecTermination,
}

impl ExecOutput {
    pub fn exited(stdout: impl Into<String>, stderr: impl Into<String>, exit_code: i32) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: stderr.into(),
            exit_code: Some(exit_code),
            termination: ExecTermination::Exited,
        }
    }

    pub fn interrupted(termination: ExecTermination) -> Self {
        Self {
            stdout: String::new(),
            stderr: String::new(),
            exit_code: None,
            termination,
        }
    }
}

/// Point-in-time resource usage of a sandbox.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SandboxStats {
    pub memory_mb: f64,
    pub cpu_percent: f64,
}

/// Pluggable isolation runtime.
///
/// `stop`, `remove` and `exec` report an unknown handle as
/// [`RuntimeError::HandleNotFound`], never as a generic failure.
#[async_trait]
pub trait Runtime: Send + Sync {
    fn mode(&self) -> RuntimeMode;

    /// Create and start a sandbox, returning its handle.
    async fn create(&self, spec: &SandboxSpec) -> RuntimeResult<String>;

    /// Run a command. Must honour `spec.timeout` and the `cancel` flag by
    /// forcibly terminating the command, returning `TimedOut`/`Cancelled`.
    async fn exec(
        &self,
        handle: &str,
        spec: &ExecSpec,
        cancel: watch::Receiver<bool>,
    ) -> RuntimeResult<ExecOutput>;

    /// Resource usage, when the runtime exposes it.
    async fn stats(&self, handle: &str) -> RuntimeResult<Option<SandboxStats>>;

    async fn stop(&self, handle: &str, grace: Duration) -> RuntimeResult<()>;

    async fn remove(&self, handle: &str) -> RuntimeResult<()>;
}

/// Resolves once `cancel` reads `true`. Never resolves if the sender is
/// dropped without cancelling.
pub async fn cancelled(cancel: &mut watch::Receiver<bool>) {
    loop {
        if *cancel.borrow_and_update() {
            return;
        }
        if cancel.changed().await.is_err() {
            if *cancel.borrow() {
                return;
            }
            std::future::pending::<()>().await;
        }
    }
}

/// Probe once and pick the runtime for the lifetime of the process.
pub async fn select_runtime(
    probe: &RuntimeProbe,
    settings: Arc<SandboxSettings>,
) -> Arc<dyn Runtime> {
    let capability = probe.probe().await;
    if capability.available {
        info!(binary = %settings.runtime_binary, "isolation runtime available, using live mode");
        Arc::new(LiveRuntime::new(settings))
    } else {
        warn!(reason = %capability.reason, "isolation runtime unavailable, using mock mode");
        Arc::new(MockRuntime::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_cancelled_sees_flag_set_before_waiting() {
        let (tx, mut rx) = watch::channel(false);
        tx.send(true).unwrap();
        drop(tx);
        tokio::time::timeout(Duration::from_millis(100), cancelled(&mut rx))
            .await
            .expect("already-cancelled flag must resolve");
    }

    #[tokio::test]
    async fn test_cancelled_pends_when_sender_dropped() {
        let (tx, mut rx) = watch::channel(false);
        drop(tx);
        let res = tokio::time::timeout(Duration::from_millis(50), cancelled(&mut rx)).await;
        assert!(res.is_err());
    }

    #[tokio::test]
    async fn test_forced_mock_selects_mock_runtime() {
        let settings = Arc::new(SandboxSettings {
            force_mock: true,
            ..SandboxSettings::default()
        });
        let probe = RuntimeProbe::new(Arc::clone(&settings));
        let runtime = select_runtime(&probe, settings).await;
        assert_eq!(runtime.mode(), RuntimeMode::Mock);
    }
}
