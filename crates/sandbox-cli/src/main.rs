//! Sandbox CLI
//!
//! The `sandbox` command drives an in-process [`SessionManager`] against the
//! configured store.
//!
//! ## Commands
//!
//! - `probe`: check whether the container engine can run sandboxes
//! - `config`: print the effective settings
//! - `run`: create a session, run one command, close the session
//! - `sessions`: list, inspect, execute in, close and sweep sessions

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, Level};

use sandbox_core::{
    init_tracing, select_runtime, CreateSessionRequest, ExecuteRequest, ExecutionRecord,
    LimitOverrides, LimitRejection, RuntimeProbe, SandboxSettings, SessionFilter,
    SessionManager, SessionRecord, SessionStatus, StaticToolCatalog,
};

#[derive(Parser)]
#[command(name = "sandbox")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Run commands in short-lived, isolated sandboxes", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    /// Settings file (TOML); SANDBOX_* variables are applied on top
    #[arg(short, long, global = true, env = "SANDBOX_CONFIG")]
    config: Option<PathBuf>,

    /// Tool catalog file (TOML, one `[[tools]]` table per tool)
    #[arg(long, global = true, env = "SANDBOX_TOOLS")]
    tools: Option<PathBuf>,

    /// Skip the runtime probe and use mock mode
    #[arg(long, global = true)]
    mock: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check whether the isolation runtime is usable
    Probe,

    /// Print the effective settings as TOML
    Config,

    /// Create a session, run one command in it, then close it
    Run {
        #[command(flatten)]
        session: SessionArgs,

        #[command(flatten)]
        exec: ExecArgs,

        /// Leave the session open after the command finishes
        #[arg(long)]
        keep: bool,
    },

    /// Inspect and manage persisted sessions
    Sessions {
        #[command(subcommand)]
        action: SessionsAction,
    },
}

#[derive(Subcommand)]
enum SessionsAction {
    /// List sessions, newest first
    List {
        /// Only sessions of this agent
        #[arg(long)]
        agent: Option<String>,

        /// Only sessions in this status (active, expired, closed, error)
        #[arg(long)]
        status: Option<SessionStatus>,
    },

    /// Show one session and its execution history
    Show { session_id: String },

    /// Run a command in an existing session
    Exec {
        session_id: String,

        #[command(flatten)]
        exec: ExecArgs,
    },

    /// Close a session and destroy its sandbox
    Close { session_id: String },

    /// Expire every session past its deadline
    Sweep,
}

#[derive(clap::Args)]
struct SessionArgs {
    /// Agent the session belongs to
    #[arg(long, default_value = "cli")]
    agent: String,

    /// Tool the session runs for (looked up in the tool catalog)
    #[arg(long, default_value = "shell")]
    tool: String,

    /// Container image (must be on the allow-list)
    #[arg(long)]
    image: Option<String>,

    /// Memory limit, e.g. 256m or 1g
    #[arg(long)]
    memory: Option<String>,

    /// CPU quota in microseconds per 100ms period
    #[arg(long)]
    cpu_quota: Option<i64>,

    /// Session lifetime in seconds
    #[arg(long)]
    session_timeout: Option<u64>,
}

#[derive(clap::Args)]
struct ExecArgs {
    /// Hard timeout for the command, in seconds
    #[arg(short, long)]
    timeout: Option<u64>,

    /// Working directory inside the sandbox
    #[arg(short = 'w', long)]
    workdir: Option<String>,

    /// Environment variable for the command (KEY=VALUE, repeatable)
    #[arg(short, long = "env", value_parser = parse_env_pair)]
    env: Vec<(String, String)>,

    /// Command line, passed to `sh -c`
    #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
    command: Vec<String>,
}

impl ExecArgs {
    fn into_request(self) -> ExecuteRequest {
        let mut request = ExecuteRequest::new(self.command.join(" "));
        request.working_directory = self.workdir;
        request.timeout_secs = self.timeout;
        request.env.extend(self.env);
        request
    }
}

impl SessionArgs {
    fn into_request(self) -> CreateSessionRequest {
        CreateSessionRequest {
            agent_id: self.agent,
            tool_id: self.tool,
            timeout_secs: self.session_timeout,
            limits: LimitOverrides {
                memory: self.memory,
                cpu_quota: self.cpu_quota,
            },
            image: self.image,
            ..CreateSessionRequest::default()
        }
    }
}

fn parse_env_pair(raw: &str) -> std::result::Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected KEY=VALUE, got '{raw}'")),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    init_tracing(cli.json, level);

    let settings = Arc::new(load_settings(cli.config.as_deref(), cli.mock)?);

    match cli.command {
        Commands::Probe => cmd_probe(settings).await,
        Commands::Config => cmd_config(&settings),
        Commands::Run {
            session,
            exec,
            keep,
        } => {
            let manager = build_manager(settings, cli.tools.as_deref()).await?;
            cmd_run(&manager, session, exec, keep).await
        }
        Commands::Sessions { action } => {
            let manager = build_manager(settings, cli.tools.as_deref()).await?;
            match action {
                SessionsAction::List { agent, status } => {
                    cmd_sessions_list(&manager, agent, status).await
                }
                SessionsAction::Show { session_id } => {
                    cmd_sessions_show(&manager, &session_id).await
                }
                SessionsAction::Exec { session_id, exec } => {
                    cmd_sessions_exec(&manager, &session_id, exec).await
                }
                SessionsAction::Close { session_id } => {
                    cmd_sessions_close(&manager, &session_id).await
                }
                SessionsAction::Sweep => cmd_sessions_sweep(&manager).await,
            }
        }
    }
}

/// File (if any), then `SANDBOX_*` variables, then `--mock`.
fn load_settings(path: Option<&Path>, force_mock: bool) -> Result<SandboxSettings> {
    let base = match path {
        Some(path) => SandboxSettings::from_toml_file(path)
            .with_context(|| format!("Failed to load settings from {}", path.display()))?,
        None => SandboxSettings::default(),
    };
    let mut settings = base
        .with_overrides_from(|key| std::env::var(key).ok())
        .context("Invalid SANDBOX_* environment override")?;
    if force_mock {
        settings.force_mock = true;
    }
    settings.validate().context("Invalid sandbox settings")?;
    Ok(settings)
}

async fn build_manager(
    settings: Arc<SandboxSettings>,
    tools: Option<&Path>,
) -> Result<SessionManager> {
    let store = sandbox_state::store_from_env()
        .await
        .context("Failed to open session store")?;

    let probe = RuntimeProbe::new(Arc::clone(&settings));
    let runtime = select_runtime(&probe, Arc::clone(&settings)).await;

    let mut manager = SessionManager::new(settings, store, runtime);
    if let Some(path) = tools {
        let catalog = StaticToolCatalog::from_toml_file(path)
            .with_context(|| format!("Failed to load tool catalog {}", path.display()))?;
        debug!(tools = catalog.len(), "tool catalog loaded");
        manager = manager.with_tool_catalog(Arc::new(catalog));
    }
    Ok(manager)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

// ========== Probe / Config ==========

async fn cmd_probe(settings: Arc<SandboxSettings>) -> Result<()> {
    let probe = RuntimeProbe::new(Arc::clone(&settings));
    let capability = probe.probe().await;

    println!("Runtime binary: {}", settings.runtime_binary);
    println!("Probe image:    {}", settings.probe_image);
    if capability.available {
        println!("Status:         available ({})", capability.reason);
    } else {
        println!("Status:         unavailable, sessions will run in mock mode");
        println!("Reason:         {}", capability.reason);
    }
    Ok(())
}

fn cmd_config(settings: &SandboxSettings) -> Result<()> {
    let text = toml::to_string_pretty(settings).context("Failed to render settings")?;
    print!("{text}");
    Ok(())
}

// ========== Run ==========

#[derive(Debug, Serialize)]
struct RunReport {
    session: SessionRecord,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    rejected_limits: Vec<LimitRejection>,
    execution: Option<ExecutionRecord>,
    closed: bool,
}

/// Create, execute, and (unless `keep`) close. The session is closed even
/// when the execute call fails.
async fn run_once(
    manager: &SessionManager,
    session: SessionArgs,
    exec: ExecArgs,
    keep: bool,
) -> Result<RunReport> {
    let created = manager
        .create_session(session.into_request())
        .await
        .context("Failed to create session")?;
    let session_id = created.session.session_id.clone();

    if created.session.status != SessionStatus::Active {
        return Ok(RunReport {
            session: created.session,
            rejected_limits: created.rejected_limits,
            execution: None,
            closed: false,
        });
    }

    let executed = manager.execute(&session_id, exec.into_request()).await;
    let closed = if keep {
        false
    } else {
        manager
            .close_session(&session_id)
            .await
            .with_context(|| format!("Failed to close session {session_id}"))?
    };
    let execution = executed.with_context(|| format!("Execution in {session_id} failed"))?;

    Ok(RunReport {
        session: manager.get_state(&session_id).await?.session,
        rejected_limits: created.rejected_limits,
        execution: Some(execution),
        closed,
    })
}

async fn cmd_run(manager: &SessionManager, session: SessionArgs, exec: ExecArgs, keep: bool) -> Result<()> {
    let report = run_once(manager, session, exec, keep).await?;
    print_json(&report)?;

    match &report.execution {
        None => bail!(
            "Session {} could not start: {}",
            report.session.session_id,
            report.session.error_message.as_deref().unwrap_or("unknown error")
        ),
        Some(execution) if !execution.success => {
            std::process::exit(execution.exit_code.filter(|c| *c != 0).unwrap_or(1))
        }
        Some(_) => Ok(()),
    }
}

// ========== Sessions ==========

async fn cmd_sessions_list(
    manager: &SessionManager,
    agent: Option<String>,
    status: Option<SessionStatus>,
) -> Result<()> {
    let mut filter = SessionFilter::default();
    if let Some(agent) = agent {
        filter = filter.agent(agent);
    }
    if let Some(status) = status {
        filter = filter.status(status);
    }

    let sessions = manager.list_sessions(&filter).await?;
    if sessions.is_empty() {
        println!("No sessions found.");
        return Ok(());
    }

    for state in sessions {
        let s = &state.session;
        println!(
            "{}  {:<8} {:<10} agent={} tool={} image={} expires={}",
            s.session_id,
            s.status.as_str(),
            s.sandbox_status,
            s.agent_id,
            s.tool_id,
            s.image,
            s.expires_at.format("%Y-%m-%d %H:%M:%S UTC")
        );
    }
    Ok(())
}

#[derive(Serialize)]
struct SessionDetail {
    session: SessionRecord,
    in_flight_executions: usize,
    executions: Vec<ExecutionRecord>,
}

async fn cmd_sessions_show(manager: &SessionManager, session_id: &str) -> Result<()> {
    let state = manager
        .get_state(session_id)
        .await
        .with_context(|| format!("Failed to load session {session_id}"))?;
    let executions = manager.list_executions(session_id).await?;
    print_json(&SessionDetail {
        session: state.session,
        in_flight_executions: state.in_flight_executions,
        executions,
    })
}

async fn cmd_sessions_exec(manager: &SessionManager, session_id: &str, exec: ExecArgs) -> Result<()> {
    let record = manager
        .execute(session_id, exec.into_request())
        .await
        .with_context(|| format!("Execution in {session_id} failed"))?;
    print_json(&record)
}

async fn cmd_sessions_close(manager: &SessionManager, session_id: &str) -> Result<()> {
    if manager.close_session(session_id).await? {
        println!("Closed session {session_id}");
    } else {
        println!("Session {session_id} was already closed or expired");
    }
    Ok(())
}

async fn cmd_sessions_sweep(manager: &SessionManager) -> Result<()> {
    let report = manager.sweep_expired().await?;
    println!(
        "Examined {} session(s), expired {}, failed {}",
        report.examined, report.expired, report.failed
    );
    Ok(())
}
