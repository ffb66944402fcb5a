//! Structured events and counters emitted along the session lifecycle.

use std::io::Write;
use std::sync::{Arc, Mutex};

use sandbox_core::obs::{emit_session_rejected, emit_teardown_failed};
use sandbox_core::{
    CreateSessionRequest, ExecuteRequest, MockRuntime, SandboxSettings, SessionManager,
    SessionSpan, METRICS,
};
use sandbox_state::MemorySessionStore;
use tracing::Level;
use tracing_subscriber::fmt::MakeWriter;

/// Collects formatted log lines in memory.
#[derive(Clone, Default)]
struct Capture(Arc<Mutex<Vec<u8>>>);

impl Capture {
    fn text(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl Write for Capture {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for Capture {
    type Writer = Capture;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

fn subscriber(capture: &Capture) -> impl tracing::Subscriber + Send + Sync {
    tracing_subscriber::fmt()
        .with_writer(capture.clone())
        .with_ansi(false)
        .with_max_level(Level::DEBUG)
        .finish()
}

#[test]
fn test_emitters_carry_identifying_fields() {
    let capture = Capture::default();
    tracing::subscriber::with_default(subscriber(&capture), || {
        let _span = SessionSpan::enter("sess-obs-1");
        emit_session_rejected("agent-7", "tool-x", 10);
        emit_teardown_failed("sess-obs-1", "sandbox-sess-obs-1", &"engine timeout");
    });

    let text = capture.text();
    assert!(text.contains("session.rejected"));
    assert!(text.contains("agent-7"));
    assert!(text.contains("limit=10"));
    assert!(text.contains("sandbox.teardown_failed"));
    assert!(text.contains("engine timeout"));
    assert!(text.contains("session_id=sess-obs-1"));
}

#[tokio::test]
async fn test_session_flow_emits_lifecycle_events() {
    let capture = Capture::default();
    let _guard = tracing::subscriber::set_default(subscriber(&capture));

    let m = SessionManager::new(
        Arc::new(SandboxSettings::default()),
        Arc::new(MemorySessionStore::new()),
        Arc::new(MockRuntime::new()),
    );
    let session = m
        .create_session(CreateSessionRequest::new("agent-obs", "tool-obs").session_id("sess-obs-2"))
        .await
        .unwrap()
        .session;
    m.execute(&session.session_id, ExecuteRequest::new("echo traced"))
        .await
        .unwrap();
    m.close_session(&session.session_id).await.unwrap();

    let text = capture.text();
    for event in ["session.created", "execution.finished", "session.closed"] {
        assert!(text.contains(event), "missing {event} in:\n{text}");
    }
    assert!(text.contains("sandbox.session{session_id=sess-obs-2}"));
    assert!(text.contains("mock=true"));
}

#[tokio::test]
async fn test_counters_move_with_operations() {
    let before = METRICS.snapshot();

    let m = SessionManager::new(
        Arc::new(SandboxSettings {
            max_concurrent_sessions: 1,
            ..SandboxSettings::default()
        }),
        Arc::new(MemorySessionStore::new()),
        Arc::new(MockRuntime::new()),
    );
    let session = m
        .create_session(CreateSessionRequest::new("a", "t"))
        .await
        .unwrap()
        .session;
    m.create_session(CreateSessionRequest::new("a", "t"))
        .await
        .unwrap_err();
    m.execute(&session.session_id, ExecuteRequest::new("true"))
        .await
        .unwrap();
    m.close_session(&session.session_id).await.unwrap();

    // Counters are process-wide and other tests run concurrently.
    let after = METRICS.snapshot();
    assert!(after.sessions_created > before.sessions_created);
    assert!(after.sessions_rejected > before.sessions_rejected);
    assert!(after.executions_run > before.executions_run);
    assert!(after.sessions_closed > before.sessions_closed);
}
