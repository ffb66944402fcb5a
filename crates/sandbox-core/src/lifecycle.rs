//! Sandbox creation and teardown against the allow-listed image set.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use sandbox_state::{ResourceLimits, MOCK_SANDBOX_STATUS};

use crate::config::SandboxSettings;
use crate::metrics::METRICS;
use crate::runtime::{Runtime, RuntimeMode, RuntimeResult, SandboxSpec};

/// `sandbox_status` of a live sandbox right after creation.
pub const RUNNING_STATUS: &str = "running";
/// `sandbox_status` once the sandbox has been torn down.
pub const REMOVED_STATUS: &str = "removed";
/// `sandbox_status` when creation failed.
pub const FAILED_STATUS: &str = "create_failed";

/// A created sandbox.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SandboxHandle {
    /// Runtime handle (synthetic in mock mode).
    pub id: String,
    pub status: String,
    /// Image actually used, after allow-list substitution.
    pub image: String,
    pub mock: bool,
}

/// Result of a destroy call. Both variants are success.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Teardown {
    Removed,
    AlreadyGone,
}

/// Creates hardened sandboxes and destroys them idempotently.
#[derive(Clone)]
pub struct ContainerLifecycleController {
    runtime: Arc<dyn Runtime>,
    settings: Arc<SandboxSettings>,
}

impl ContainerLifecycleController {
    pub fn new(runtime: Arc<dyn Runtime>, settings: Arc<SandboxSettings>) -> Self {
        Self { runtime, settings }
    }

    pub fn mode(&self) -> RuntimeMode {
        self.runtime.mode()
    }

    /// The image to use for `requested`: itself if allow-listed, otherwise
    /// the configured default.
    pub fn resolve_image(&self, requested: Option<&str>) -> String {
        match requested {
            Some(image) if self.settings.is_image_allowed(image) => image.to_string(),
            Some(image) => {
                warn!(
                    requested = %image,
                    substitute = %self.settings.default_image,
                    "image not in allow-list, substituting default"
                );
                self.settings.default_image.clone()
            }
            None => self.settings.default_image.clone(),
        }
    }

    pub fn sandbox_name(&self, session_id: &str) -> String {
        format!("{}{}", self.settings.container_prefix, session_id)
    }

    pub async fn create(
        &self,
        session_id: &str,
        requested_image: Option<&str>,
        limits: &ResourceLimits,
    ) -> RuntimeResult<SandboxHandle> {
        let spec = SandboxSpec {
            name: self.sandbox_name(session_id),
            session_id: session_id.to_string(),
            image: self.resolve_image(requested_image),
            limits: limits.clone(),
            hardening: self.settings.hardening.clone(),
        };

        let id = self.runtime.create(&spec).await?;
        let mock = self.runtime.mode() == RuntimeMode::Mock;
        debug!(session_id = %session_id, handle = %id, mock, "sandbox created");

        Ok(SandboxHandle {
            id,
            status: if mock {
                MOCK_SANDBOX_STATUS.to_string()
            } else {
                RUNNING_STATUS.to_string()
            },
            image: spec.image,
            mock,
        })
    }

    /// Stop and remove a sandbox. Unknown handles count as success.
    pub async fn destroy(&self, handle: &str) -> RuntimeResult<Teardown> {
        let grace = Duration::from_secs(self.settings.stop_grace_secs);
        match self.runtime.stop(handle, grace).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {
                debug!(handle = %handle, "sandbox already gone before stop");
                return Ok(Teardown::AlreadyGone);
            }
            Err(e) => warn!(handle = %handle, error = %e, "stop failed, forcing removal"),
        }

        match self.runtime.remove(handle).await {
            Ok(()) => {
                METRICS.inc_sandboxes_destroyed();
                Ok(Teardown::Removed)
            }
            Err(e) if e.is_not_found() => Ok(Teardown::AlreadyGone),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::MockRuntime;

    fn controller() -> ContainerLifecycleController {
        ContainerLifecycleController::new(
            Arc::new(MockRuntime::new()),
            Arc::new(SandboxSettings::default()),
        )
    }

    #[test]
    fn test_unlisted_image_is_substituted() {
        let c = controller();
        assert_eq!(c.resolve_image(Some("node:20-slim")), "node:20-slim");
        assert_eq!(c.resolve_image(Some("attacker/miner:latest")), "python:3.11-slim");
        assert_eq!(c.resolve_image(None), "python:3.11-slim");
    }

    #[tokio::test]
    async fn test_mock_create_returns_synthetic_handle() {
        let c = controller();
        let limits = SandboxSettings::default().default_limits;
        let handle = c.create("s-1", Some("alpine:3.19"), &limits).await.unwrap();
        assert!(handle.mock);
        assert_eq!(handle.status, "mock");
        assert_eq!(handle.id, "mock-s-1");
        assert_eq!(handle.image, "alpine:3.19");
    }
}
