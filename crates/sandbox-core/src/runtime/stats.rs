//! Parsing of `docker stats --no-stream` output.

use super::error::{RuntimeError, RuntimeResult};
use super::SandboxStats;

/// Format string passed to `docker stats --format`.
pub const STATS_FORMAT: &str = "{{.MemUsage}}|{{.CPUPerc}}";

/// Parse one `MemUsage|CPUPerc` line, e.g. `12.5MiB / 512MiB|0.25%`.
pub fn parse_stats_line(line: &str) -> RuntimeResult<SandboxStats> {
    let (mem, cpu) = line
        .trim()
        .split_once('|')
        .ok_or_else(|| RuntimeError::Parse(format!("missing separator in {line:?}")))?;

    let used = mem.split('/').next().unwrap_or(mem);
    let memory_mb = parse_size_mib(used)?;

    let cpu_percent = cpu
        .trim()
        .trim_end_matches('%')
        .trim()
        .parse::<f64>()
        .map_err(|e| RuntimeError::Parse(format!("cpu {cpu:?}: {e}")))?;

    Ok(SandboxStats {
        memory_mb,
        cpu_percent,
    })
}

/// Convert a docker size string (`512MiB`, `1.2GiB`, `800kB`, `0B`) to MiB.
fn parse_size_mib(raw: &str) -> RuntimeResult<f64> {
    let raw = raw.trim();
    let split = raw
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(raw.len());
    let (number, unit) = raw.split_at(split);

    let value: f64 = number
        .parse()
        .map_err(|e| RuntimeError::Parse(format!("size {raw:?}: {e}")))?;

    let factor = match unit.trim() {
        "B" | "" => 1.0 / (1024.0 * 1024.0),
        "KiB" => 1.0 / 1024.0,
        "kB" | "KB" => 1000.0 / (1024.0 * 1024.0),
        "MiB" => 1.0,
        "MB" => 1_000_000.0 / (1024.0 * 1024.0),
        "GiB" => 1024.0,
        "GB" => 1_000_000_000.0 / (1024.0 * 1024.0),
        other => return Err(RuntimeError::Parse(format!("unknown size unit {other:?}"))),
    };

    Ok(value * factor)
}
