//! Limit resolution as seen through session creation.

use std::sync::Arc;

use async_trait::async_trait;
use sandbox_core::{
    CreateSessionRequest, LimitOverrides, LimitSource, MockRuntime, SandboxSettings,
    SessionManager, StaticToolCatalog, ToolCatalog, ToolHints,
};
use sandbox_state::MemorySessionStore;

fn manager(catalog: Arc<dyn ToolCatalog>) -> SessionManager {
    SessionManager::new(
        Arc::new(SandboxSettings::default()),
        Arc::new(MemorySessionStore::new()),
        Arc::new(MockRuntime::new()),
    )
    .with_tool_catalog(catalog)
}

fn catalog() -> Arc<dyn ToolCatalog> {
    Arc::new(StaticToolCatalog::new([ToolHints {
        tool_id: "net-tool".into(),
        memory: Some("1g".into()),
        cpu_quota: Some(80_000),
        image: Some("node:20-slim".into()),
        network_access: true,
        ..ToolHints::default()
    }]))
}

struct BrokenCatalog;

#[async_trait]
impl ToolCatalog for BrokenCatalog {
    async fn lookup(&self, _tool_id: &str) -> anyhow::Result<Option<ToolHints>> {
        anyhow::bail!("catalog backend unreachable")
    }
}

#[tokio::test]
async fn valid_overrides_are_applied() {
    let m = manager(catalog());
    let created = m
        .create_session(
            CreateSessionRequest::new("a", "unknown")
                .limits(LimitOverrides::default().memory("256m").cpu_quota(50_000)),
        )
        .await
        .unwrap();

    let limits = &created.session.resource_limits;
    assert_eq!(limits.memory, "256m");
    assert_eq!(limits.cpu_quota, 50_000);
    assert_eq!(limits.cpu_period, 100_000);
    assert_eq!(limits.network_mode, "none");
    assert!(created.rejected_limits.is_empty());
}

#[tokio::test]
async fn invalid_overrides_are_ignored_not_fatal() {
    let m = manager(catalog());
    let created = m
        .create_session(
            CreateSessionRequest::new("a", "unknown")
                .limits(LimitOverrides::default().memory("256").cpu_quota(500)),
        )
        .await
        .unwrap();

    let limits = &created.session.resource_limits;
    assert_eq!(limits.memory, "512m");
    assert_eq!(limits.cpu_quota, 50_000);

    let fields: Vec<_> = created.rejected_limits.iter().map(|r| r.field).collect();
    assert_eq!(fields, ["memory", "cpu_quota"]);
    assert!(created
        .rejected_limits
        .iter()
        .all(|r| r.source == LimitSource::Caller));
}

#[tokio::test]
async fn tool_hints_shape_the_sandbox() {
    let m = manager(catalog());
    let session = m
        .create_session(CreateSessionRequest::new("a", "net-tool"))
        .await
        .unwrap()
        .session;

    assert_eq!(session.resource_limits.memory, "1g");
    assert_eq!(session.resource_limits.cpu_quota, 80_000);
    assert_eq!(session.resource_limits.network_mode, "bridge");
    assert_eq!(session.image, "node:20-slim");
}

#[tokio::test]
async fn image_outside_allow_list_is_substituted() {
    let m = manager(catalog());
    let session = m
        .create_session(CreateSessionRequest::new("a", "unknown").image("evil/miner:latest"))
        .await
        .unwrap()
        .session;
    assert_eq!(session.image, "python:3.11-slim");
}

#[tokio::test]
async fn catalog_failure_degrades_to_defaults() {
    let m = manager(Arc::new(BrokenCatalog));
    let session = m
        .create_session(CreateSessionRequest::new("a", "net-tool"))
        .await
        .unwrap()
        .session;

    assert_eq!(session.resource_limits, SandboxSettings::default().default_limits);
    assert_eq!(session.expires_at - session.created_at, chrono::Duration::seconds(3600));
}
