//! Service configuration.
//!
//! [`SandboxSettings`] is built once at startup (defaults, then an optional
//! TOML file, then `SANDBOX_*` environment variables), validated, and shared
//! as `Arc<SandboxSettings>`. Nothing mutates it afterwards.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use sandbox_state::ResourceLimits;

use crate::error::{Result, SandboxError};
use crate::limits::{is_valid_cpu_quota, is_valid_memory, CPU_PERIOD, ISOLATED_NETWORK};

/// Upper bound accepted for `max_session_timeout_secs` (one year).
pub const SESSION_TIMEOUT_CEILING_SECS: u64 = 365 * 86_400;

/// Hardening flags applied to every live sandbox.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HardeningProfile {
    pub no_new_privileges: bool,
    /// Capabilities re-added after dropping all of them.
    pub cap_add: Vec<String>,
    /// Non-root `uid:gid` commands run as.
    pub user: String,
    /// Mount point of the size-bounded scratch tmpfs.
    pub tmpfs_mount: String,
    pub read_only_rootfs: bool,
}

impl Default for HardeningProfile {
    fn default() -> Self {
        Self {
            no_new_privileges: true,
            cap_add: vec!["CHOWN".into(), "SETUID".into(), "SETGID".into()],
            user: "1000:1000".into(),
            tmpfs_mount: "/tmp".into(),
            read_only_rootfs: false,
        }
    }
}

/// Process-wide configuration for the sandbox service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxSettings {
    pub max_concurrent_sessions: usize,
    pub default_session_timeout_secs: u64,
    /// Ceiling for explicit and tool-provided session timeouts.
    pub max_session_timeout_secs: u64,
    pub default_exec_timeout_secs: u64,
    pub allowed_images: Vec<String>,
    pub default_image: String,
    pub default_limits: ResourceLimits,
    pub hardening: HardeningProfile,
    pub runtime_binary: String,
    pub probe_image: String,
    pub probe_timeout_secs: u64,
    pub sweep_interval_secs: u64,
    pub close_grace_ms: u64,
    pub stop_grace_secs: u64,
    pub max_output_bytes: usize,
    pub container_prefix: String,
    /// Skip probing and always run in mock mode.
    pub force_mock: bool,
}

impl Default for SandboxSettings {
    fn default() -> Self {
        Self {
            max_concurrent_sessions: 10,
            default_session_timeout_secs: 3600,
            max_session_timeout_secs: 86_400,
            default_exec_timeout_secs: 30,
            allowed_images: vec![
                "python:3.11-slim".into(),
                "python:3.12-slim".into(),
                "node:20-slim".into(),
                "alpine:3.19".into(),
                "ubuntu:22.04".into(),
            ],
            default_image: "python:3.11-slim".into(),
            default_limits: ResourceLimits {
                memory: "512m".into(),
                cpu_quota: 50_000,
                cpu_period: CPU_PERIOD,
                network_mode: ISOLATED_NETWORK.into(),
                tmpfs_size: "100m".into(),
                pids_limit: 128,
            },
            hardening: HardeningProfile::default(),
            runtime_binary: "docker".into(),
            probe_image: "alpine:3.19".into(),
            probe_timeout_secs: 20,
            sweep_interval_secs: 60,
            close_grace_ms: 2_000,
            stop_grace_secs: 5,
            max_output_bytes: 1024 * 1024,
            container_prefix: "sandbox-".into(),
            force_mock: false,
        }
    }
}

impl SandboxSettings {
    /// Load settings from a TOML file; absent keys keep their defaults.
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            SandboxError::InvalidConfig(format!("failed to read {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&text)
    }

    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| SandboxError::InvalidConfig(e.to_string()))
    }

    /// Defaults overlaid with `SANDBOX_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Self::default().with_overrides_from(|key| std::env::var(key).ok())
    }

    /// Overlay values from `lookup` (an environment-like key/value source).
    ///
    /// Recognised keys: `SANDBOX_MAX_CONCURRENT_SESSIONS`,
    /// `SANDBOX_DEFAULT_SESSION_TIMEOUT_SECS`, `SANDBOX_MAX_SESSION_TIMEOUT_SECS`,
    /// `SANDBOX_DEFAULT_EXEC_TIMEOUT_SECS`, `SANDBOX_ALLOWED_IMAGES`
    /// (comma-separated), `SANDBOX_DEFAULT_IMAGE`, `SANDBOX_DEFAULT_MEMORY`,
    /// `SANDBOX_DEFAULT_CPU_QUOTA`, `SANDBOX_RUNTIME_BINARY`,
    /// `SANDBOX_PROBE_IMAGE`, `SANDBOX_SWEEP_INTERVAL_SECS`,
    /// `SANDBOX_FORCE_MOCK`.
    pub fn with_overrides_from<F>(mut self, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("SANDBOX_MAX_CONCURRENT_SESSIONS") {
            self.max_concurrent_sessions = parse_var("SANDBOX_MAX_CONCURRENT_SESSIONS", &v)?;
        }
        if let Some(v) = lookup("SANDBOX_DEFAULT_SESSION_TIMEOUT_SECS") {
            self.default_session_timeout_secs =
                parse_var("SANDBOX_DEFAULT_SESSION_TIMEOUT_SECS", &v)?;
        }
        if let Some(v) = lookup("SANDBOX_MAX_SESSION_TIMEOUT_SECS") {
            self.max_session_timeout_secs = parse_var("SANDBOX_MAX_SESSION_TIMEOUT_SECS", &v)?;
        }
        if let Some(v) = lookup("SANDBOX_DEFAULT_EXEC_TIMEOUT_SECS") {
            self.default_exec_timeout_secs = parse_var("SANDBOX_DEFAULT_EXEC_TIMEOUT_SECS", &v)?;
        }
        if let Some(v) = lookup("SANDBOX_ALLOWED_IMAGES") {
            self.allowed_images = v
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect();
        }
        if let Some(v) = lookup("SANDBOX_DEFAULT_IMAGE") {
            self.default_image = v;
        }
        if let Some(v) = lookup("SANDBOX_DEFAULT_MEMORY") {
            self.default_limits.memory = v;
        }
        if let Some(v) = lookup("SANDBOX_DEFAULT_CPU_QUOTA") {
            self.default_limits.cpu_quota = parse_var("SANDBOX_DEFAULT_CPU_QUOTA", &v)?;
        }
        if let Some(v) = lookup("SANDBOX_RUNTIME_BINARY") {
            self.runtime_binary = v;
        }
        if let Some(v) = lookup("SANDBOX_PROBE_IMAGE") {
            self.probe_image = v;
        }
        if let Some(v) = lookup("SANDBOX_SWEEP_INTERVAL_SECS") {
            self.sweep_interval_secs = parse_var("SANDBOX_SWEEP_INTERVAL_SECS", &v)?;
        }
        if let Some(v) = lookup("SANDBOX_FORCE_MOCK") {
            self.force_mock = matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes");
        }
        Ok(self)
    }

    /// Reject settings the service cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.max_concurrent_sessions == 0 {
            return Err(invalid("max_concurrent_sessions must be at least 1"));
        }
        if self.allowed_images.is_empty() {
            return Err(invalid("allowed_images must not be empty"));
        }
        if !self.is_image_allowed(&self.default_image) {
            return Err(invalid(format!(
                "default_image {} is not in allowed_images",
                self.default_image
            )));
        }
        if self.default_session_timeout_secs == 0 {
            return Err(invalid("default_session_timeout_secs must be positive"));
        }
        if self.max_session_timeout_secs < self.default_session_timeout_secs {
            return Err(invalid(
                "max_session_timeout_secs must not be below default_session_timeout_secs",
            ));
        }
        if self.max_session_timeout_secs > SESSION_TIMEOUT_CEILING_SECS {
            return Err(invalid(format!(
                "max_session_timeout_secs must not exceed {SESSION_TIMEOUT_CEILING_SECS}"
            )));
        }
        if self.default_exec_timeout_secs == 0 {
            return Err(invalid("default_exec_timeout_secs must be positive"));
        }
        if !is_valid_memory(&self.default_limits.memory) {
            return Err(invalid(format!(
                "default memory limit {:?} needs a k/m/g unit",
                self.default_limits.memory
            )));
        }
        if !is_valid_memory(&self.default_limits.tmpfs_size) {
            return Err(invalid(format!(
                "tmpfs size {:?} needs a k/m/g unit",
                self.default_limits.tmpfs_size
            )));
        }
        let quota = i64::try_from(self.default_limits.cpu_quota).unwrap_or(i64::MAX);
        if !is_valid_cpu_quota(quota) {
            return Err(invalid(format!(
                "default cpu_quota {} is out of range",
                self.default_limits.cpu_quota
            )));
        }
        if self.default_limits.cpu_period != CPU_PERIOD {
            return Err(invalid(format!("cpu_period must be {CPU_PERIOD}")));
        }
        if self.default_limits.pids_limit == 0 {
            return Err(invalid("pids_limit must be positive"));
        }
        if self.sweep_interval_secs == 0 {
            return Err(invalid("sweep_interval_secs must be positive"));
        }
        if self.runtime_binary.trim().is_empty() {
            return Err(invalid("runtime_binary must not be empty"));
        }
        Ok(())
    }

    pub fn is_image_allowed(&self, image: &str) -> bool {
        self.allowed_images.iter().any(|allowed| allowed == image)
    }

    pub fn exec_timeout(&self) -> Duration {
        Duration::from_secs(self.default_exec_timeout_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn close_grace(&self) -> Duration {
        Duration::from_millis(self.close_grace_ms)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }
}

fn parse_var<T>(key: &str, value: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| SandboxError::InvalidConfig(format!("{key}={value:?}: {e}")))
}

fn invalid(msg: impl Into<String>) -> SandboxError {
    SandboxError::InvalidConfig(msg.into())
}
