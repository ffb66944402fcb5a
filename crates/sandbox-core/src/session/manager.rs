//! The session state machine.
//!
//! States: `active → expired | closed | error`, `error → closed`. `expired`
//! and `closed` are terminal. Every status change goes through the store's
//! compare-and-set, so concurrent closers, sweepers and executors agree on
//! a single winner, and only the winner tears the sandbox down.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::sync::OwnedSemaphorePermit;
use tracing::{debug, info, warn, Instrument};
use uuid::Uuid;

use sandbox_state::{
    ExecutionOutcome, ExecutionRecord, SessionFilter, SessionRecord, SessionStateStore,
    SessionStatus, StorageError,
};

use super::slots::{ExecAccess, SlotTable};
use crate::clock::{Clock, SystemClock};
use crate::collaborators::{
    StaticToolCatalog, ToolCatalog, ToolHints, TracingUsageLogger, UsageLogger, UsageRecord,
};
use crate::config::SandboxSettings;
use crate::error::{Result, SandboxError};
use crate::executor::CommandExecutor;
use crate::lifecycle::{ContainerLifecycleController, FAILED_STATUS, REMOVED_STATUS};
use crate::limits::{LimitOverrides, LimitRejection, ResourceLimitPolicy};
use crate::metrics::METRICS;
use crate::obs;
use crate::runtime::mock::mock_handle;
use crate::runtime::{ExecSpec, Runtime, RuntimeMode};

/// `sandbox_status` after the runtime stopped recognising the handle.
const LOST_STATUS: &str = "lost";

/// Parameters of `CreateSession`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateSessionRequest {
    pub agent_id: String,
    pub tool_id: String,
    /// Explicit session lifetime; `None` or `0` falls back to the tool, then
    /// the global default.
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub limits: LimitOverrides,
    pub image: Option<String>,
    /// Caller-chosen id; generated when absent.
    pub session_id: Option<String>,
    pub execution_id: Option<String>,
}

impl CreateSessionRequest {
    pub fn new(agent_id: impl Into<String>, tool_id: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            tool_id: tool_id.into(),
            ..Self::default()
        }
    }

    pub fn timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = Some(secs);
        self
    }

    pub fn limits(mut self, limits: LimitOverrides) -> Self {
        self.limits = limits;
        self
    }

    pub fn image(mut self, image: impl Into<String>) -> Self {
        self.image = Some(image.into());
        self
    }

    pub fn session_id(mut self, id: impl Into<String>) -> Self {
        self.session_id = Some(id.into());
        self
    }

    pub fn execution_id(mut self, id: impl Into<String>) -> Self {
        self.execution_id = Some(id.into());
        self
    }
}

/// Parameters of `Execute`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecuteRequest {
    pub command: String,
    pub working_directory: Option<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// Hard timeout for this command; defaults to the configured exec timeout.
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub input_parameters: serde_json::Value,
}

impl ExecuteRequest {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            ..Self::default()
        }
    }

    pub fn working_directory(mut self, dir: impl Into<String>) -> Self {
        self.working_directory = Some(dir.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = Some(secs);
        self
    }

    pub fn input_parameters(mut self, params: serde_json::Value) -> Self {
        self.input_parameters = params;
        self
    }
}

/// Returned by `CreateSession`.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionDescriptor {
    pub session: SessionRecord,
    /// Limit values that failed validation and were ignored.
    pub rejected_limits: Vec<LimitRejection>,
}

/// Read projection of one session.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionState {
    pub session: SessionRecord,
    pub in_flight_executions: usize,
}

/// Outcome of one expiry sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub examined: usize,
    pub expired: usize,
    pub failed: usize,
}

/// Outcome of startup recovery.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    pub adopted: usize,
    pub expired: usize,
    pub closed: usize,
}

enum Admission {
    Ready,
    Expired,
}

/// Orchestrates sessions over a store, a runtime and the collaborators.
pub struct SessionManager {
    settings: Arc<SandboxSettings>,
    store: Arc<dyn SessionStateStore>,
    lifecycle: ContainerLifecycleController,
    executor: CommandExecutor,
    policy: ResourceLimitPolicy,
    tools: Arc<dyn ToolCatalog>,
    usage: Arc<dyn UsageLogger>,
    clock: Arc<dyn Clock>,
    slots: SlotTable,
}

impl SessionManager {
    /// Build a manager with an empty tool catalog, the tracing usage logger
    /// and the system clock.
    pub fn new(
        settings: Arc<SandboxSettings>,
        store: Arc<dyn SessionStateStore>,
        runtime: Arc<dyn Runtime>,
    ) -> Self {
        Self {
            lifecycle: ContainerLifecycleController::new(
                Arc::clone(&runtime),
                Arc::clone(&settings),
            ),
            executor: CommandExecutor::new(runtime, Arc::clone(&settings)),
            policy: ResourceLimitPolicy::new(settings.default_limits.clone()),
            tools: Arc::new(StaticToolCatalog::default()),
            usage: Arc::new(TracingUsageLogger),
            clock: Arc::new(SystemClock),
            slots: SlotTable::new(settings.max_concurrent_sessions),
            settings,
            store,
        }
    }

    pub fn with_tool_catalog(mut self, tools: Arc<dyn ToolCatalog>) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_usage_logger(mut self, usage: Arc<dyn UsageLogger>) -> Self {
        self.usage = usage;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn settings(&self) -> &SandboxSettings {
        &self.settings
    }

    pub fn runtime_mode(&self) -> RuntimeMode {
        self.lifecycle.mode()
    }

    /// Capacity slots currently held.
    pub fn active_slots(&self) -> usize {
        self.slots.occupied()
    }

    /// Session timeout: explicit → tool maximum → global default, capped at
    /// `max_session_timeout_secs`.
    pub fn resolve_timeout(&self, explicit: Option<u64>, hints: Option<&ToolHints>) -> u64 {
        explicit
            .filter(|secs| *secs > 0)
            .or_else(|| {
                hints
                    .and_then(|h| h.max_session_duration_secs)
                    .filter(|secs| *secs > 0)
            })
            .unwrap_or(self.settings.default_session_timeout_secs)
            .min(self.settings.max_session_timeout_secs)
    }

    // -- CreateSession --------------------------------------------------------

    pub async fn create_session(&self, request: CreateSessionRequest) -> Result<SessionDescriptor> {
        let session_id = request
            .session_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let span = obs::session_span(&session_id);
        self.create_session_inner(session_id, request)
            .instrument(span)
            .await
    }

    async fn create_session_inner(
        &self,
        session_id: String,
        request: CreateSessionRequest,
    ) -> Result<SessionDescriptor> {
        match self.store.get_session(&session_id).await {
            Ok(_) => {
                return Err(StorageError::Duplicate {
                    kind: "session",
                    id: session_id,
                }
                .into())
            }
            Err(StorageError::SessionNotFound { .. }) => {}
            Err(e) => return Err(e.into()),
        }

        let Some(permit) = self.reserve_slot().await else {
            METRICS.inc_sessions_rejected();
            obs::emit_session_rejected(&request.agent_id, &request.tool_id, self.slots.limit());
            return Err(SandboxError::CapacityExceeded {
                limit: self.slots.limit(),
            });
        };

        let hints = self.lookup_tool(&request.tool_id).await;
        let timeout_secs = self.resolve_timeout(request.timeout_secs, hints.as_ref());
        let resolved = self.policy.resolve(hints.as_ref(), &request.limits);
        for rejection in &resolved.rejected {
            warn!(
                field = rejection.field,
                value = %rejection.value,
                source = ?rejection.source,
                reason = %rejection.reason,
                "ignoring invalid resource limit"
            );
        }

        let requested_image = request
            .image
            .as_deref()
            .or_else(|| hints.as_ref().and_then(|h| h.image.as_deref()));
        let image = self.lifecycle.resolve_image(requested_image);
        let created = self
            .lifecycle
            .create(&session_id, Some(&image), &resolved.limits)
            .await;

        let created_at = self.clock.now();
        let mut record = SessionRecord {
            session_id: session_id.clone(),
            tool_id: request.tool_id,
            agent_id: request.agent_id,
            execution_id: request.execution_id,
            sandbox_id: None,
            sandbox_status: FAILED_STATUS.to_string(),
            image,
            status: SessionStatus::Active,
            resource_limits: resolved.limits,
            error_message: None,
            created_at,
            expires_at: deadline(created_at, timeout_secs),
            closed_at: None,
        };

        let permit = match created {
            Ok(handle) => {
                record.sandbox_id = (!handle.mock).then(|| handle.id.clone());
                record.sandbox_status = handle.status;
                Some(permit)
            }
            Err(e) => {
                warn!(error = %e, "sandbox creation failed, recording session as error");
                record.status = SessionStatus::Error;
                record.error_message = Some(format!("sandbox creation failed: {e}"));
                METRICS.inc_sessions_failed();
                None
            }
        };

        if let Err(e) = self.store.create_session(record.clone()).await {
            if let Some(handle) = &record.sandbox_id {
                if let Err(te) = self.lifecycle.destroy(handle).await {
                    obs::emit_teardown_failed(&session_id, handle, &te);
                }
            }
            return Err(e.into());
        }

        if let Some(permit) = permit {
            self.slots.insert(&session_id, permit);
            METRICS.inc_sessions_created();
        }
        obs::emit_session_created(
            &session_id,
            &record.agent_id,
            &record.tool_id,
            record.status,
            record.is_mock(),
            timeout_secs,
        );

        Ok(SessionDescriptor {
            session: record,
            rejected_limits: resolved.rejected,
        })
    }

    /// Reserve capacity. When full, reclaim once before giving up: slots of
    /// sessions past their expiry are expired, and slots of sessions no
    /// longer active are dropped.
    async fn reserve_slot(&self) -> Option<OwnedSemaphorePermit> {
        if let Some(permit) = self.slots.try_reserve() {
            return Some(permit);
        }

        let now = self.clock.now();
        let held = self.slots.session_ids();
        debug!(count = held.len(), "capacity full, checking held slots");
        for session_id in held {
            match self.store.get_session(&session_id).await {
                Ok(session) if session.status != SessionStatus::Active => {
                    warn!(session_id = %session_id, status = %session.status, "dropping slot of inactive session");
                    if let Some(slot) = self.slots.release(&session_id) {
                        slot.cancel();
                    }
                }
                Ok(session) if session.is_expired_at(now) => {
                    if let Err(e) = self.expire_session(session).await {
                        warn!(session_id = %session_id, error = %e, "failed to expire session");
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(session_id = %session_id, error = %e, "dropping slot of unreadable session");
                    self.slots.release(&session_id);
                }
            }
        }
        self.slots.try_reserve()
    }

    async fn lookup_tool(&self, tool_id: &str) -> Option<ToolHints> {
        match self.tools.lookup(tool_id).await {
            Ok(Some(hints)) => Some(hints),
            Ok(None) => {
                debug!(tool_id = %tool_id, "unknown tool, using defaults");
                None
            }
            Err(e) => {
                warn!(tool_id = %tool_id, error = %e, "tool lookup failed, using defaults");
                None
            }
        }
    }

    // -- Execute --------------------------------------------------------------

    pub async fn execute(&self, session_id: &str, request: ExecuteRequest) -> Result<ExecutionRecord> {
        self.execute_inner(session_id, request)
            .instrument(obs::session_span(session_id))
            .await
    }

    async fn execute_inner(
        &self,
        session_id: &str,
        request: ExecuteRequest,
    ) -> Result<ExecutionRecord> {
        let session = self.load(session_id).await?;
        if let Admission::Expired = self.admit(&session)? {
            self.expire_session(session).await?;
            return Err(SandboxError::SessionExpired(session_id.to_string()));
        }

        let access = match self.slots.access(session_id) {
            Some(access) => access,
            None => self.adopt(&session)?,
        };
        let guard = Arc::clone(&access.exec_lock).lock_owned().await;

        // The session may have been closed or expired while queued. A slot
        // still attached to a session that left `active` is stale.
        let session = self.load(session_id).await?;
        let admission = match self.admit(&session) {
            Ok(admission) => admission,
            Err(e) => {
                drop(guard);
                drop(self.slots.release(session_id));
                return Err(e);
            }
        };
        if let Admission::Expired = admission {
            drop(guard);
            self.expire_session(session).await?;
            return Err(SandboxError::SessionExpired(session_id.to_string()));
        }

        let execution_id = Uuid::new_v4().to_string();
        let mut record = ExecutionRecord::started(
            &execution_id,
            session_id,
            &request.command,
            self.clock.now(),
        );
        record.working_directory = request.working_directory.clone();
        record.environment_variables = request.env.clone();
        record.input_parameters = request.input_parameters;
        record.mock = session.is_mock();
        self.store.create_execution(record.clone()).await?;

        let handle = session
            .sandbox_id
            .clone()
            .unwrap_or_else(|| mock_handle(session_id));
        let timeout_secs = request
            .timeout_secs
            .filter(|secs| *secs > 0)
            .unwrap_or(self.settings.default_exec_timeout_secs);
        let spec = ExecSpec {
            exec_id: execution_id,
            command: request.command,
            working_directory: request.working_directory,
            env: request.env,
            timeout: Duration::from_secs(timeout_secs),
        };

        match self.executor.execute(&handle, &spec, access.cancel).await {
            Ok(result) => {
                result.apply_to(&mut record);
                record.completed_at = Some(self.clock.now());
                let record = self.finalize(record).await?;
                drop(guard);
                self.report_usage(&session, &record);
                Ok(record)
            }
            Err(e) => {
                record.outcome = ExecutionOutcome::Failed;
                record.error_message = Some(format!("sandbox lost: {e}"));
                record.completed_at = Some(self.clock.now());
                let record = self.finalize(record).await?;
                drop(guard);
                self.report_usage(&session, &record);
                self.mark_lost(session, &handle).await?;
                Err(SandboxError::SandboxLost {
                    session_id: session_id.to_string(),
                    handle,
                })
            }
        }
    }

    async fn load(&self, session_id: &str) -> Result<SessionRecord> {
        self.store
            .get_session(session_id)
            .await
            .map_err(SandboxError::from_lookup)
    }

    fn admit(&self, session: &SessionRecord) -> Result<Admission> {
        if session.status != SessionStatus::Active {
            return Err(SandboxError::SessionNotActive {
                session_id: session.session_id.clone(),
                status: session.status,
            });
        }
        if session.is_expired_at(self.clock.now()) {
            return Ok(Admission::Expired);
        }
        Ok(Admission::Ready)
    }

    /// Give an active session that holds no slot (e.g. created by an earlier
    /// process) a slot of its own.
    fn adopt(&self, session: &SessionRecord) -> Result<ExecAccess> {
        let permit = self
            .slots
            .try_reserve()
            .ok_or(SandboxError::CapacityExceeded {
                limit: self.slots.limit(),
            })?;
        Ok(self.slots.adopt(&session.session_id, permit))
    }

    /// Persist a finished execution. If a concurrent close already finalized
    /// it, the stored record wins.
    async fn finalize(&self, record: ExecutionRecord) -> Result<ExecutionRecord> {
        if self.store.complete_execution(record.clone()).await? {
            obs::emit_execution_finished(
                &record.session_id,
                &record.execution_id,
                record.outcome,
                record.exit_code,
                record.execution_time_ms,
            );
            Ok(record)
        } else {
            Ok(self.store.get_execution(&record.execution_id).await?)
        }
    }

    fn report_usage(&self, session: &SessionRecord, record: &ExecutionRecord) {
        let usage = Arc::clone(&self.usage);
        let entry = UsageRecord::from_execution(session, record);
        tokio::spawn(async move {
            if let Err(e) = usage.record(entry).await {
                warn!(error = %e, "usage logger failed, audit record dropped");
            }
        });
    }

    async fn mark_lost(&self, session: SessionRecord, handle: &str) -> Result<()> {
        let mut errored = session;
        errored.status = SessionStatus::Error;
        errored.sandbox_status = LOST_STATUS.to_string();
        errored.error_message = Some(format!("sandbox {handle} no longer exists"));

        if self
            .store
            .transition_session(errored.clone(), SessionStatus::Active)
            .await?
        {
            self.slots.release(&errored.session_id);
            METRICS.inc_sessions_failed();
            warn!(handle = %handle, "sandbox lost, session moved to error");
        }
        Ok(())
    }

    // -- CloseSession ---------------------------------------------------------

    /// Close a session. `Ok(false)` when it was already terminal or another
    /// caller closed it first.
    pub async fn close_session(&self, session_id: &str) -> Result<bool> {
        self.close_session_inner(session_id)
            .instrument(obs::session_span(session_id))
            .await
    }

    async fn close_session_inner(&self, session_id: &str) -> Result<bool> {
        loop {
            let session = self.load(session_id).await?;
            if session.status.is_terminal() {
                debug!(status = %session.status, "close on terminal session is a no-op");
                return Ok(false);
            }

            let mut closed = session.clone();
            closed.status = SessionStatus::Closed;
            closed.closed_at = Some(self.clock.now());
            if closed.sandbox_id.is_some() {
                closed.sandbox_status = REMOVED_STATUS.to_string();
            }

            // Losing the race means the status moved on; re-read and retry.
            if self
                .store
                .transition_session(closed, session.status)
                .await?
            {
                let cancelled = self.teardown(&session).await;
                METRICS.inc_sessions_closed();
                obs::emit_session_closed(session_id, cancelled);
                return Ok(true);
            }
        }
    }

    /// Expire an active session. `Ok(false)` if it was no longer active.
    async fn expire_session(&self, session: SessionRecord) -> Result<bool> {
        if session.status != SessionStatus::Active {
            return Ok(false);
        }

        let mut expired = session.clone();
        expired.status = SessionStatus::Expired;
        if expired.sandbox_id.is_some() {
            expired.sandbox_status = REMOVED_STATUS.to_string();
        }

        if !self
            .store
            .transition_session(expired, SessionStatus::Active)
            .await?
        {
            return Ok(false);
        }

        self.teardown(&session).await;
        METRICS.inc_sessions_expired();
        obs::emit_session_expired(&session.session_id);
        Ok(true)
    }

    /// Runs once per session, by whoever won the terminal transition:
    /// cancel any in-flight command, wait briefly, destroy the sandbox,
    /// finalize orphaned executions, then free the slot.
    async fn teardown(&self, session: &SessionRecord) -> usize {
        let session_id = session.session_id.as_str();
        let slot = self.slots.release(session_id);

        let _exec_guard = match &slot {
            Some(slot) => {
                slot.cancel();
                let lock = Arc::clone(&slot.exec_lock);
                match tokio::time::timeout(self.settings.close_grace(), lock.lock_owned()).await {
                    Ok(guard) => Some(guard),
                    Err(_) => {
                        warn!(session_id = %session_id, "execution did not stop within grace period");
                        None
                    }
                }
            }
            None => None,
        };

        if let Some(handle) = &session.sandbox_id {
            if let Err(e) = self.lifecycle.destroy(handle).await {
                obs::emit_teardown_failed(session_id, handle, &e);
            }
        }

        let cancelled = self.cancel_in_flight(session_id).await;
        drop(slot);
        cancelled
    }

    async fn cancel_in_flight(&self, session_id: &str) -> usize {
        let executions = match self.store.executions_for_session(session_id).await {
            Ok(executions) => executions,
            Err(e) => {
                warn!(session_id = %session_id, error = %e, "could not load executions to cancel");
                return 0;
            }
        };

        let now = self.clock.now();
        let mut cancelled = 0;
        for mut execution in executions.into_iter().filter(ExecutionRecord::is_in_flight) {
            execution.outcome = ExecutionOutcome::Cancelled;
            execution.success = false;
            execution.completed_at = Some(now);
            execution.error_message = Some("session ended while the command was running".into());
            let execution_id = execution.execution_id.clone();
            match self.store.complete_execution(execution).await {
                Ok(true) => {
                    cancelled += 1;
                    METRICS.inc_executions_cancelled();
                }
                Ok(false) => {}
                Err(e) => {
                    warn!(execution_id = %execution_id, error = %e, "failed to cancel execution")
                }
            }
        }
        cancelled
    }

    // -- Read projections -----------------------------------------------------

    /// Current state of a session, applying lazy expiry.
    pub async fn get_state(&self, session_id: &str) -> Result<SessionState> {
        let mut session = self.load(session_id).await?;
        if session.status == SessionStatus::Active && session.is_expired_at(self.clock.now()) {
            self.expire_session(session).await?;
            session = self.load(session_id).await?;
        }
        Ok(SessionState {
            in_flight_executions: self.slots.in_flight(session_id),
            session,
        })
    }

    /// Sessions matching `filter`, newest first. Read-only.
    pub async fn list_sessions(&self, filter: &SessionFilter) -> Result<Vec<SessionState>> {
        let sessions = self.store.list_sessions(filter).await?;
        Ok(sessions
            .into_iter()
            .map(|session| SessionState {
                in_flight_executions: self.slots.in_flight(&session.session_id),
                session,
            })
            .collect())
    }

    /// Execution history of a session, oldest first.
    pub async fn list_executions(&self, session_id: &str) -> Result<Vec<ExecutionRecord>> {
        self.load(session_id).await?;
        Ok(self.store.executions_for_session(session_id).await?)
    }

    // -- Maintenance ----------------------------------------------------------

    /// Expire every active session past its `expires_at`.
    pub async fn sweep_expired(&self) -> Result<SweepReport> {
        let stale = self
            .store
            .sessions_expiring_before(SessionStatus::Active, self.clock.now())
            .await?;

        let mut report = SweepReport {
            examined: stale.len(),
            ..SweepReport::default()
        };
        let results = join_all(stale.into_iter().map(|s| self.expire_session(s))).await;
        for result in results {
            match result {
                Ok(true) => report.expired += 1,
                Ok(false) => {}
                Err(e) => {
                    report.failed += 1;
                    warn!(error = %e, "failed to expire session during sweep");
                }
            }
        }
        if report.expired > 0 {
            info!(expired = report.expired, "expiry sweep finished");
        }
        Ok(report)
    }

    /// Re-adopt active sessions persisted by an earlier process.
    ///
    /// Expired ones are swept. Live ones get a capacity slot back; a session
    /// that cannot get a slot, or that was created under a different runtime
    /// mode, is closed.
    pub async fn recover(&self) -> Result<RecoveryReport> {
        let active = self
            .store
            .list_sessions(&SessionFilter::default().status(SessionStatus::Active))
            .await?;
        let now = self.clock.now();
        let mock_runtime = self.runtime_mode() == RuntimeMode::Mock;
        let mut report = RecoveryReport::default();

        for session in active {
            let session_id = session.session_id.clone();
            if self.slots.contains(&session_id) {
                continue;
            }
            if session.is_expired_at(now) {
                if self.expire_session(session).await? {
                    report.expired += 1;
                }
                continue;
            }

            let same_mode = session.is_mock() == mock_runtime;
            match self.slots.try_reserve() {
                Some(permit) if same_mode => {
                    self.slots.insert(&session_id, permit);
                    report.adopted += 1;
                }
                _ => {
                    warn!(session_id = %session_id, same_mode, "closing session that cannot be re-adopted");
                    if self.close_session(&session_id).await? {
                        report.closed += 1;
                    }
                }
            }
        }

        info!(
            adopted = report.adopted,
            expired = report.expired,
            closed = report.closed,
            "session recovery finished"
        );
        Ok(report)
    }

    /// Close every non-terminal session. Returns how many were closed.
    pub async fn close_all(&self) -> Result<usize> {
        let mut targets = self
            .store
            .list_sessions(&SessionFilter::default().status(SessionStatus::Active))
            .await?;
        targets.extend(
            self.store
                .list_sessions(&SessionFilter::default().status(SessionStatus::Error))
                .await?,
        );

        let results = join_all(targets.iter().map(|s| self.close_session(&s.session_id))).await;
        let mut closed = 0;
        for result in results {
            match result {
                Ok(true) => closed += 1,
                Ok(false) => {}
                Err(e) => warn!(error = %e, "failed to close session during shutdown"),
            }
        }
        Ok(closed)
    }
}

/// `start + secs`, saturating at the latest representable instant.
fn deadline(start: DateTime<Utc>, secs: u64) -> DateTime<Utc> {
    i64::try_from(secs)
        .ok()
        .and_then(chrono::Duration::try_seconds)
        .and_then(|span| start.checked_add_signed(span))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}
