//! Container-engine runtime driven through its CLI (`docker` or compatible).
//!
//! Commands run via `<engine> exec` behind a small shell wrapper that starts
//! them as their own process group and records the leader's pid inside the
//! sandbox.
//! A timeout or cancellation kills that whole process group from a second
//! exec, then drops the CLI client. Captured output is bounded in memory.

use std::process::{Output, Stdio};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::sync::watch;
use tracing::{debug, warn};

use super::error::{RuntimeError, RuntimeResult};
use super::stats::{parse_stats_line, STATS_FORMAT};
use super::{cancelled, ExecOutput, ExecSpec, ExecTermination, Runtime, RuntimeMode, SandboxSpec, SandboxStats};
use crate::config::SandboxSettings;

/// Label put on every sandbox so operators can find strays.
pub const SESSION_LABEL: &str = "sandbox.session";

/// How long to wait for the CLI client to return after a kill.
const KILL_DRAIN: Duration = Duration::from_secs(2);

/// Wrapper that runs the user command (passed as `$1`) as a job with job
/// control on, so it leads a process group holding everything it forks. The
/// leader's pid goes to `$0`; the wrapper exits with the command's status.
const PID_WRAPPER: &str = r#"set -m; sh -c "$1" & echo $! > "$0"; wait $!"#;

pub struct LiveRuntime {
    settings: Arc<SandboxSettings>,
}

impl LiveRuntime {
    pub fn new(settings: Arc<SandboxSettings>) -> Self {
        Self { settings }
    }

    fn engine(&self) -> Command {
        let mut cmd = Command::new(&self.settings.runtime_binary);
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }

    /// Run an engine command to completion and return its stdout.
    async fn run(&self, op: &'static str, args: &[String]) -> RuntimeResult<String> {
        let output = self.engine().args(args).output().await?;
        if output.status.success() {
            return Ok(String::from_utf8_lossy(&output.stdout).trim().to_string());
        }

        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        Err(classify(op, args, stderr))
    }

    async fn ensure_running(&self, handle: &str) -> RuntimeResult<()> {
        let state = self
            .run(
                "inspect",
                &strings(&["inspect", "--format", "{{.State.Running}}", handle]),
            )
            .await?;
        if state == "true" {
            Ok(())
        } else {
            Err(RuntimeError::HandleNotFound(format!("{handle} is not running")))
        }
    }

    async fn kill_exec(&self, handle: &str, pid_file: &str) {
        let script = kill_script(pid_file);
        let args = strings(&["exec", handle, "sh", "-c", &script]);
        if let Err(e) = self.run("kill", &args).await {
            warn!(handle = %handle, error = %e, "failed to kill timed-out command");
        }
    }
}

/// Build the `run` arguments for a hardened, long-lived sandbox.
pub fn create_args(spec: &SandboxSpec) -> Vec<String> {
    let limits = &spec.limits;
    let hardening = &spec.hardening;

    let mut args = strings(&["run", "-d", "--name", &spec.name]);
    args.push("--label".into());
    args.push(format!("{SESSION_LABEL}={}", spec.session_id));
    args.extend(strings(&["--network", &limits.network_mode]));

    if hardening.no_new_privileges {
        args.extend(strings(&["--security-opt", "no-new-privileges"]));
    }
    args.extend(strings(&["--cap-drop", "ALL"]));
    for cap in &hardening.cap_add {
        args.extend(strings(&["--cap-add", cap]));
    }
    args.extend(strings(&["--user", &hardening.user]));
    if hardening.read_only_rootfs {
        args.push("--read-only".into());
    }
    args.push("--tmpfs".into());
    args.push(format!(
        "{}:rw,nosuid,nodev,size={}",
        hardening.tmpfs_mount, limits.tmpfs_size
    ));

    args.extend(strings(&["--memory", &limits.memory]));
    args.push("--cpu-quota".into());
    args.push(limits.cpu_quota.to_string());
    args.push("--cpu-period".into());
    args.push(limits.cpu_period.to_string());
    args.push("--pids-limit".into());
    args.push(limits.pids_limit.to_string());

    args.push(spec.image.clone());
    args.extend(strings(&["tail", "-f", "/dev/null"]));
    args
}

/// Build the `exec` arguments running `spec.command` behind the pid wrapper.
pub fn exec_args(handle: &str, spec: &ExecSpec, pid_file: &str) -> Vec<String> {
    let mut args = vec!["exec".to_string()];
    if let Some(dir) = &spec.working_directory {
        args.extend(strings(&["-w", dir]));
    }
    for (k, v) in &spec.env {
        args.push("-e".into());
        args.push(format!("{k}={v}"));
    }
    args.extend(strings(&[handle, "sh", "-c", PID_WRAPPER, pid_file, &spec.command]));
    args
}

/// Kill the process group led by the pid in `pid_file`, falling back to the
/// pid alone.
pub fn kill_script(pid_file: &str) -> String {
    format!(
        "pid=$(cat {pid_file}) && {{ kill -9 -- -$pid 2>/dev/null || kill -9 $pid 2>/dev/null; }}; rm -f {pid_file}"
    )
}

/// Read `reader` to the end, keeping at most `cap` bytes and discarding the
/// rest so the writer never blocks on a full pipe.
pub(crate) async fn read_capped<R>(mut reader: R, cap: usize) -> std::io::Result<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    let mut kept = Vec::new();
    (&mut reader)
        .take(u64::try_from(cap).unwrap_or(u64::MAX))
        .read_to_end(&mut kept)
        .await?;
    tokio::io::copy(&mut reader, &mut tokio::io::sink()).await?;
    Ok(kept)
}

async fn capture<R>(reader: Option<R>, cap: usize) -> std::io::Result<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    match reader {
        Some(reader) => read_capped(reader, cap).await,
        None => Ok(Vec::new()),
    }
}

fn pid_file_for(exec_id: &str) -> String {
    format!("/tmp/.exec-{exec_id}.pid")
}

fn strings(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|s| s.to_string()).collect()
}

fn classify(op: &'static str, args: &[String], stderr: String) -> RuntimeError {
    let lowered = stderr.to_ascii_lowercase();
    if lowered.contains("no such container") || lowered.contains("no such object") {
        let handle = args.iter().rev().find(|a| !a.starts_with('-')).cloned();
        RuntimeError::HandleNotFound(handle.unwrap_or(stderr))
    } else {
        RuntimeError::CommandFailed { op, stderr }
    }
}

#[async_trait]
impl Runtime for LiveRuntime {
    fn mode(&self) -> RuntimeMode {
        RuntimeMode::Live
    }

    async fn create(&self, spec: &SandboxSpec) -> RuntimeResult<String> {
        let args = create_args(spec);
        debug!(name = %spec.name, image = %spec.image, "creating sandbox");
        let id = self.run("run", &args).await?;
        if id.is_empty() {
            return Err(RuntimeError::Parse("engine returned no container id".into()));
        }
        Ok(spec.name.clone())
    }

    async fn exec(
        &self,
        handle: &str,
        spec: &ExecSpec,
        mut cancel: watch::Receiver<bool>,
    ) -> RuntimeResult<ExecOutput> {
        self.ensure_running(handle).await?;

        let pid_file = pid_file_for(&spec.exec_id);
        let mut child = self.engine().args(exec_args(handle, spec, &pid_file)).spawn()?;

        // One byte past the limit lets the executor see that output was cut.
        let cap = self.settings.max_output_bytes.saturating_add(1);
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let output = async move {
            let (stdout, stderr, status) =
                tokio::try_join!(capture(stdout, cap), capture(stderr, cap), child.wait())?;
            Ok::<_, std::io::Error>(Output {
                status,
                stdout,
                stderr,
            })
        };
        tokio::pin!(output);

        let termination = tokio::select! {
            res = &mut output => {
                let out = res?;
                return Ok(ExecOutput {
                    stdout: String::from_utf8_lossy(&out.stdout).into_owned(),
                    stderr: String::from_utf8_lossy(&out.stderr).into_owned(),
                    exit_code: out.status.code(),
                    termination: ExecTermination::Exited,
                });
            }
            _ = tokio::time::sleep(spec.timeout) => ExecTermination::TimedOut,
            _ = cancelled(&mut cancel) => ExecTermination::Cancelled,
        };

        debug!(handle = %handle, exec_id = %spec.exec_id, ?termination, "killing command");
        self.kill_exec(handle, &pid_file).await;

        let mut result = ExecOutput::interrupted(termination);
        if let Ok(Ok(out)) = tokio::time::timeout(KILL_DRAIN, &mut output).await {
            result.stdout = String::from_utf8_lossy(&out.stdout).into_owned();
            result.stderr = String::from_utf8_lossy(&out.stderr).into_owned();
        }
        Ok(result)
    }

    async fn stats(&self, handle: &str) -> RuntimeResult<Option<SandboxStats>> {
        let line = self
            .run(
                "stats",
                &strings(&["stats", "--no-stream", "--format", STATS_FORMAT, handle]),
            )
            .await?;
        parse_stats_line(&line).map(Some)
    }

    async fn stop(&self, handle: &str, grace: Duration) -> RuntimeResult<()> {
        let secs = grace.as_secs().to_string();
        self.run("stop", &strings(&["stop", "-t", &secs, handle]))
            .await
            .map(|_| ())
    }

    async fn remove(&self, handle: &str) -> RuntimeResult<()> {
        self.run("rm", &strings(&["rm", "-f", handle])).await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HardeningProfile;
    use sandbox_state::ResourceLimits;
    use std::collections::BTreeMap;

    fn spec() -> SandboxSpec {
        SandboxSpec {
            name: "sandbox-s1".into(),
            session_id: "s1".into(),
            image: "python:3.11-slim".into(),
            limits: ResourceLimits {
                memory: "256m".into(),
                cpu_quota: 25_000,
                cpu_period: 100_000,
                network_mode: "none".into(),
                tmpfs_size: "64m".into(),
                pids_limit: 64,
            },
            hardening: HardeningProfile::default(),
        }
    }

    fn has_pair(args: &[String], flag: &str, value: &str) -> bool {
        args.windows(2).any(|w| w[0] == flag && w[1] == value)
    }

    #[test]
    fn test_create_args_apply_hardening() {
        let args = create_args(&spec());
        assert!(has_pair(&args, "--network", "none"));
        assert!(has_pair(&args, "--security-opt", "no-new-privileges"));
        assert!(has_pair(&args, "--cap-drop", "ALL"));
        assert!(has_pair(&args, "--cap-add", "CHOWN"));
        assert!(has_pair(&args, "--user", "1000:1000"));
        assert!(has_pair(&args, "--tmpfs", "/tmp:rw,nosuid,nodev,size=64m"));
        assert!(has_pair(&args, "--memory", "256m"));
        assert!(has_pair(&args, "--cpu-quota", "25000"));
        assert!(has_pair(&args, "--cpu-period", "100000"));
        assert!(has_pair(&args, "--pids-limit", "64"));
        assert!(has_pair(&args, "--label", "sandbox.session=s1"));

        let image_pos = args.iter().position(|a| a == "python:3.11-slim").unwrap();
        assert_eq!(&args[image_pos + 1..], ["tail", "-f", "/dev/null"]);
    }

    #[test]
    fn test_exec_args_pass_command_as_positional() {
        let mut env = BTreeMap::new();
        env.insert("FOO".to_string(), "bar".to_string());
        let exec = ExecSpec {
            exec_id: "e1".into(),
            command: "echo 'hi there'; exit 3".into(),
            working_directory: Some("/tmp".into()),
            env,
            timeout: Duration::from_secs(5),
        };

        let args = exec_args("sandbox-s1", &exec, "/tmp/.exec-e1.pid");
        assert!(has_pair(&args, "-w", "/tmp"));
        assert!(has_pair(&args, "-e", "FOO=bar"));
        assert_eq!(args.last().unwrap(), "echo 'hi there'; exit 3");
        assert!(has_pair(&args, "sandbox-s1", "sh"));
        assert!(has_pair(&args, "-c", PID_WRAPPER));
        assert!(PID_WRAPPER.starts_with("set -m;"));
        assert!(PID_WRAPPER.contains(r#"sh -c "$1" &"#));
        assert!(has_pair(&args, PID_WRAPPER, "/tmp/.exec-e1.pid"));
    }

    #[test]
    fn test_kill_script_targets_the_process_group() {
        let script = kill_script("/tmp/.exec-e1.pid");
        assert!(script.starts_with("pid=$(cat /tmp/.exec-e1.pid)"));
        assert!(script.contains("kill -9 -- -$pid"));
        assert!(script.contains("|| kill -9 $pid"));
        assert!(script.ends_with("rm -f /tmp/.exec-e1.pid"));
    }

    #[tokio::test]
    async fn test_read_capped_keeps_prefix_and_drains_rest() {
        let data = vec![b'y'; 64 * 1024];
        let mut reader = std::io::Cursor::new(data.clone());
        let kept = read_capped(&mut reader, 17).await.unwrap();
        assert_eq!(kept, &data[..17]);
        assert_eq!(reader.position(), data.len() as u64);

        let kept = read_capped(&b"short"[..], 17).await.unwrap();
        assert_eq!(kept, b"short");
        assert!(read_capped(&b"abc"[..], 0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_capped_output_is_truncated_with_marker() {
        let kept = read_capped(&b"0123456789"[..], 5).await.unwrap();
        let text = crate::executor::truncate_output(String::from_utf8_lossy(&kept).into_owned(), 4);
        assert_eq!(text, format!("0123{}", crate::executor::TRUNCATION_MARKER));
    }

    #[test]
    fn test_not_found_stderr_is_classified() {
        let args = strings(&["rm", "-f", "sandbox-gone"]);
        let err = classify("rm", &args, "Error: No such container: sandbox-gone".into());
        assert!(matches!(err, RuntimeError::HandleNotFound(ref h) if h == "sandbox-gone"));

        let inspect = strings(&["inspect", "--format", "{{.State.Running}}", "sandbox-gone"]);
        let err = classify("inspect", &inspect, "Error: No such object: sandbox-gone".into());
        assert!(err.is_not_found());

        let err = classify("rm", &args, "permission denied".into());
        assert!(matches!(err, RuntimeError::CommandFailed { op: "rm", .. }));
    }
}
