//! Runtime capability detection.
//!
//! The probe checks that the container engine answers and that it can
//! actually run and tear down a throwaway workload. The outcome is cached;
//! only [`RuntimeProbe::reprobe`] runs the checks again.

use std::process::Stdio;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::config::SandboxSettings;

/// Outcome of a probe. Absence of a runtime is a normal result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capability {
    pub available: bool,
    pub reason: String,
}

impl Capability {
    pub fn available(reason: impl Into<String>) -> Self {
        Self {
            available: true,
            reason: reason.into(),
        }
    }

    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self {
            available: false,
            reason: reason.into(),
        }
    }
}

/// Cached capability check against the configured container engine.
pub struct RuntimeProbe {
    settings: Arc<SandboxSettings>,
    cached: RwLock<Option<Capability>>,
}

impl RuntimeProbe {
    pub fn new(settings: Arc<SandboxSettings>) -> Self {
        Self {
            settings,
            cached: RwLock::new(None),
        }
    }

    /// A probe whose answer is fixed up front.
    pub fn fixed(settings: Arc<SandboxSettings>, capability: Capability) -> Self {
        Self {
            settings,
            cached: RwLock::new(Some(capability)),
        }
    }

    /// Cached capability, probing on first use.
    pub async fn probe(&self) -> Capability {
        if let Some(cap) = self.cached.read().await.as_ref() {
            return cap.clone();
        }

        let mut slot = self.cached.write().await;
        if let Some(cap) = slot.as_ref() {
            return cap.clone();
        }
        let cap = self.run_checks().await;
        *slot = Some(cap.clone());
        cap
    }

    /// Discard the cached result and probe again.
    pub async fn reprobe(&self) -> Capability {
        let mut slot = self.cached.write().await;
        let cap = self.run_checks().await;
        *slot = Some(cap.clone());
        cap
    }

    async fn run_checks(&self) -> Capability {
        if self.settings.force_mock {
            return Capability::unavailable("mock mode forced by configuration");
        }

        let binary = &self.settings.runtime_binary;

        let version = match self
            .run(&["version", "--format", "{{.Server.Version}}"])
            .await
        {
            Ok(v) => v,
            Err(reason) => return Capability::unavailable(format!("{binary} version: {reason}")),
        };
        debug!(binary = %binary, server_version = %version, "container engine responded");

        let image = self.settings.probe_image.as_str();
        if let Err(reason) = self
            .run(&["run", "--rm", "--network", "none", image, "true"])
            .await
        {
            return Capability::unavailable(format!("smoke test with {image} failed: {reason}"));
        }

        info!(binary = %binary, server_version = %version, "runtime probe succeeded");
        Capability::available(format!("{binary} {version}"))
    }

    /// Run one engine command within the probe timeout; `Err` carries a
    /// human-readable reason.
    async fn run(&self, args: &[&str]) -> Result<String, String> {
        let child = Command::new(&self.settings.runtime_binary)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| e.to_string())?;

        let output = tokio::time::timeout(self.settings.probe_timeout(), child.wait_with_output())
            .await
            .map_err(|_| format!("timed out after {}s", self.settings.probe_timeout_secs))?
            .map_err(|e| e.to_string())?;

        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
        } else {
            Err(String::from_utf8_lossy(&output.stderr).trim().to_string())
        }
    }
}
