//! Sandbox Core Library
//!
//! Runs caller-supplied commands inside short-lived, resource-constrained,
//! network-isolated sandboxes, tracks them as sessions, and falls back to a
//! deterministic mock mode when no isolation runtime is available.
//!
//! ## Layer 1 - Orchestration
//!
//! - `RuntimeProbe` / `select_runtime`: pick `LiveRuntime` or `MockRuntime` once
//! - `ResourceLimitPolicy`: defaults → tool hints → caller overrides, validated
//! - `ContainerLifecycleController`: hardened create, idempotent destroy
//! - `CommandExecutor`: hard timeouts, cancellation, output capture
//! - `SessionManager`: admission control and the session state machine

pub mod clock;
pub mod collaborators;
pub mod config;
pub mod error;
pub mod executor;
pub mod lifecycle;
pub mod limits;
pub mod metrics;
pub mod obs;
pub mod runtime;
pub mod session;
pub mod telemetry;

pub use clock::{Clock, ManualClock, SystemClock};
pub use collaborators::{
    StaticToolCatalog, ToolCatalog, ToolHints, TracingUsageLogger, UsageLogger, UsageRecord,
};
pub use config::{HardeningProfile, SandboxSettings};
pub use error::{Result, SandboxError};
pub use executor::{CommandExecutor, ExecutionResult};
pub use lifecycle::{ContainerLifecycleController, SandboxHandle, Teardown};
pub use limits::{LimitOverrides, LimitRejection, LimitSource, ResolvedLimits, ResourceLimitPolicy};
pub use runtime::{
    select_runtime, Capability, ExecOutput, ExecSpec, ExecTermination, LiveRuntime, MockRuntime,
    Runtime, RuntimeError, RuntimeMode, RuntimeProbe, SandboxSpec, SandboxStats,
};
pub use session::{
    spawn_sweeper, CreateSessionRequest, ExecuteRequest, RecoveryReport, SessionDescriptor,
    SessionManager, SessionState, SweepReport, SweeperHandle,
};

pub use metrics::METRICS;
pub use obs::SessionSpan;
pub use telemetry::init_tracing;

pub use sandbox_state::{
    ExecutionOutcome, ExecutionRecord, ResourceLimits, SessionFilter, SessionRecord,
    SessionStateStore, SessionStatus,
};

/// Sandbox service version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
