//! Session state machine, end to end over the mock runtime.

use std::sync::Arc;

use chrono::{Duration, Utc};
use sandbox_core::{
    CreateSessionRequest, ExecuteRequest, ManualClock, MockRuntime, SandboxError,
    SandboxSettings, SessionFilter, SessionManager, SessionStatus, StaticToolCatalog, ToolHints,
};
use sandbox_core::{ExecutionOutcome, RuntimeMode};
use sandbox_state::{MemorySessionStore, SessionStateStore, SurrealSessionStore};

fn manager_with(
    store: Arc<dyn SessionStateStore>,
    clock: Arc<ManualClock>,
) -> SessionManager {
    let catalog = StaticToolCatalog::new([ToolHints {
        tool_id: "t-long".into(),
        max_session_duration_secs: Some(600),
        ..ToolHints::default()
    }]);
    SessionManager::new(
        Arc::new(SandboxSettings::default()),
        store,
        Arc::new(MockRuntime::new()),
    )
    .with_tool_catalog(Arc::new(catalog))
    .with_clock(clock)
}

fn setup() -> (SessionManager, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(Utc::now()));
    let m = manager_with(Arc::new(MemorySessionStore::new()), Arc::clone(&clock));
    (m, clock)
}

#[tokio::test]
async fn create_execute_then_expire_after_61_seconds() {
    let (m, clock) = setup();
    assert_eq!(m.runtime_mode(), RuntimeMode::Mock);

    let created = m
        .create_session(CreateSessionRequest::new("a1", "t1").timeout_secs(60))
        .await
        .unwrap();
    let session = created.session;
    assert_eq!(session.status, SessionStatus::Active);
    assert_eq!(session.expires_at, session.created_at + Duration::seconds(60));

    let exec = m
        .execute(&session.session_id, ExecuteRequest::new("echo hi"))
        .await
        .unwrap();
    assert_eq!(exec.exit_code, Some(0));
    assert!(exec.success);
    assert!(exec.mock);
    assert!(exec.stdout.contains("[mock]"));
    assert!(exec.stdout.contains("echo hi"));
    assert!(exec.completed_at.is_some());

    clock.advance(Duration::seconds(61));
    let state = m.get_state(&session.session_id).await.unwrap();
    assert_eq!(state.session.status, SessionStatus::Expired);
    assert!(state.session.closed_at.is_none());
    assert_eq!(m.active_slots(), 0);
}

#[tokio::test]
async fn execute_on_expired_session_fails_and_marks_expired() {
    let (m, clock) = setup();
    let session = m
        .create_session(CreateSessionRequest::new("a1", "t1").timeout_secs(30))
        .await
        .unwrap()
        .session;

    clock.advance(Duration::seconds(31));
    let err = m
        .execute(&session.session_id, ExecuteRequest::new("echo late"))
        .await
        .unwrap_err();
    assert!(matches!(err, SandboxError::SessionExpired(_)));

    let stored = m.get_state(&session.session_id).await.unwrap().session;
    assert_eq!(stored.status, SessionStatus::Expired);
    assert!(m.list_executions(&session.session_id).await.unwrap().is_empty());

    let again = m
        .execute(&session.session_id, ExecuteRequest::new("echo later"))
        .await
        .unwrap_err();
    assert!(matches!(
        again,
        SandboxError::SessionNotActive {
            status: SessionStatus::Expired,
            ..
        }
    ));
}

#[tokio::test]
async fn expiry_boundary_is_strict() {
    let (m, clock) = setup();
    let session = m
        .create_session(CreateSessionRequest::new("a1", "t1").timeout_secs(60))
        .await
        .unwrap()
        .session;

    clock.set(session.expires_at);
    let state = m.get_state(&session.session_id).await.unwrap();
    assert_eq!(state.session.status, SessionStatus::Active);
}

#[tokio::test]
async fn expires_at_matches_every_timeout_source() {
    let (m, _clock) = setup();

    let explicit = m
        .create_session(CreateSessionRequest::new("a", "t-long").timeout_secs(90))
        .await
        .unwrap()
        .session;
    assert_eq!(explicit.expires_at - explicit.created_at, Duration::seconds(90));

    let from_tool = m
        .create_session(CreateSessionRequest::new("a", "t-long"))
        .await
        .unwrap()
        .session;
    assert_eq!(from_tool.expires_at - from_tool.created_at, Duration::seconds(600));

    let global = m
        .create_session(CreateSessionRequest::new("a", "unknown-tool"))
        .await
        .unwrap()
        .session;
    assert_eq!(global.expires_at - global.created_at, Duration::seconds(3600));
}

#[tokio::test]
async fn close_is_idempotent() {
    let (m, _clock) = setup();
    let session = m
        .create_session(CreateSessionRequest::new("a1", "t1"))
        .await
        .unwrap()
        .session;

    assert!(m.close_session(&session.session_id).await.unwrap());
    assert!(!m.close_session(&session.session_id).await.unwrap());

    let closed = m.get_state(&session.session_id).await.unwrap().session;
    assert_eq!(closed.status, SessionStatus::Closed);
    assert!(closed.closed_at.is_some());
    assert_eq!(m.active_slots(), 0);

    let err = m
        .execute(&session.session_id, ExecuteRequest::new("echo nope"))
        .await
        .unwrap_err();
    assert!(matches!(err, SandboxError::SessionNotActive { .. }));
}

#[tokio::test]
async fn closing_an_expired_session_is_a_no_op() {
    let (m, clock) = setup();
    let session = m
        .create_session(CreateSessionRequest::new("a1", "t1").timeout_secs(10))
        .await
        .unwrap()
        .session;
    clock.advance(Duration::seconds(11));
    m.get_state(&session.session_id).await.unwrap();

    assert!(!m.close_session(&session.session_id).await.unwrap());
    let stored = m.get_state(&session.session_id).await.unwrap().session;
    assert_eq!(stored.status, SessionStatus::Expired);
}

#[tokio::test]
async fn unknown_session_ids_raise() {
    let (m, _clock) = setup();
    assert!(matches!(
        m.get_state("ghost").await.unwrap_err(),
        SandboxError::SessionNotFound(_)
    ));
    assert!(matches!(
        m.execute("ghost", ExecuteRequest::new("true")).await.unwrap_err(),
        SandboxError::SessionNotFound(_)
    ));
    assert!(matches!(
        m.close_session("ghost").await.unwrap_err(),
        SandboxError::SessionNotFound(_)
    ));
    assert!(matches!(
        m.list_executions("ghost").await.unwrap_err(),
        SandboxError::SessionNotFound(_)
    ));
}

#[tokio::test]
async fn list_sessions_filters_by_agent_and_status() {
    let (m, _clock) = setup();
    let a = m
        .create_session(CreateSessionRequest::new("agent-a", "t1"))
        .await
        .unwrap()
        .session;
    m.create_session(CreateSessionRequest::new("agent-a", "t1"))
        .await
        .unwrap();
    m.create_session(CreateSessionRequest::new("agent-b", "t1"))
        .await
        .unwrap();
    m.close_session(&a.session_id).await.unwrap();

    let all = m.list_sessions(&SessionFilter::default()).await.unwrap();
    assert_eq!(all.len(), 3);

    let active_a = m
        .list_sessions(
            &SessionFilter::default()
                .agent("agent-a")
                .status(SessionStatus::Active),
        )
        .await
        .unwrap();
    assert_eq!(active_a.len(), 1);
    assert_eq!(active_a[0].in_flight_executions, 0);

    let closed = m
        .list_sessions(&SessionFilter::default().status(SessionStatus::Closed))
        .await
        .unwrap();
    assert_eq!(closed[0].session.session_id, a.session_id);
}

#[tokio::test]
async fn execution_history_is_recorded_in_order() {
    let (m, _clock) = setup();
    let session = m
        .create_session(CreateSessionRequest::new("a1", "t1"))
        .await
        .unwrap()
        .session;

    for cmd in ["echo one", "echo two", "echo three"] {
        m.execute(
            &session.session_id,
            ExecuteRequest::new(cmd)
                .working_directory("/tmp")
                .env("MODE", "test"),
        )
        .await
        .unwrap();
    }

    let history = m.list_executions(&session.session_id).await.unwrap();
    let commands: Vec<_> = history.iter().map(|e| e.command.as_str()).collect();
    assert_eq!(commands, ["echo one", "echo two", "echo three"]);
    assert!(history
        .iter()
        .all(|e| e.outcome == ExecutionOutcome::Succeeded && !e.is_in_flight()));
    assert_eq!(history[0].working_directory.as_deref(), Some("/tmp"));
    assert_eq!(history[0].environment_variables["MODE"], "test");
}

#[tokio::test]
async fn sweep_expires_untouched_sessions() {
    let (m, clock) = setup();
    let short = m
        .create_session(CreateSessionRequest::new("a1", "t1").timeout_secs(30))
        .await
        .unwrap()
        .session;
    let long = m
        .create_session(CreateSessionRequest::new("a1", "t1").timeout_secs(300))
        .await
        .unwrap()
        .session;

    clock.advance(Duration::seconds(45));
    let report = m.sweep_expired().await.unwrap();
    assert_eq!(report.examined, 1);
    assert_eq!(report.expired, 1);
    assert_eq!(m.active_slots(), 1);

    let again = m.sweep_expired().await.unwrap();
    assert_eq!(again.expired, 0);

    assert_eq!(
        m.get_state(&short.session_id).await.unwrap().session.status,
        SessionStatus::Expired
    );
    assert_eq!(
        m.get_state(&long.session_id).await.unwrap().session.status,
        SessionStatus::Active
    );
}

#[tokio::test]
async fn recover_readopts_sessions_from_a_previous_process() {
    let clock = Arc::new(ManualClock::new(Utc::now()));
    let store: Arc<dyn SessionStateStore> = Arc::new(MemorySessionStore::new());

    let first = manager_with(Arc::clone(&store), Arc::clone(&clock));
    let keep = first
        .create_session(CreateSessionRequest::new("a", "t1").timeout_secs(600))
        .await
        .unwrap()
        .session;
    let stale = first
        .create_session(CreateSessionRequest::new("a", "t1").timeout_secs(5))
        .await
        .unwrap()
        .session;
    drop(first);

    clock.advance(Duration::seconds(10));
    let second = manager_with(Arc::clone(&store), Arc::clone(&clock));
    let report = second.recover().await.unwrap();
    assert_eq!(report.adopted, 1);
    assert_eq!(report.expired, 1);
    assert_eq!(second.active_slots(), 1);

    second
        .execute(&keep.session_id, ExecuteRequest::new("echo back"))
        .await
        .unwrap();
    assert_eq!(
        store.get_session(&stale.session_id).await.unwrap().status,
        SessionStatus::Expired
    );
}

#[tokio::test]
async fn close_all_closes_every_live_session() {
    let (m, _clock) = setup();
    for _ in 0..3 {
        m.create_session(CreateSessionRequest::new("a", "t1"))
            .await
            .unwrap();
    }
    assert_eq!(m.close_all().await.unwrap(), 3);
    assert_eq!(m.active_slots(), 0);
    assert_eq!(m.close_all().await.unwrap(), 0);
}

#[tokio::test]
async fn lifecycle_over_surreal_store() {
    let clock = Arc::new(ManualClock::new(Utc::now()));
    let store = SurrealSessionStore::in_memory().await.unwrap();
    let m = manager_with(Arc::new(store), Arc::clone(&clock));

    let session = m
        .create_session(CreateSessionRequest::new("a1", "t1").timeout_secs(60))
        .await
        .unwrap()
        .session;
    let exec = m
        .execute(&session.session_id, ExecuteRequest::new("echo hi"))
        .await
        .unwrap();
    assert_eq!(exec.exit_code, Some(0));

    clock.advance(Duration::seconds(61));
    assert_eq!(
        m.get_state(&session.session_id).await.unwrap().session.status,
        SessionStatus::Expired
    );
    assert!(!m.close_session(&session.session_id).await.unwrap());
}
