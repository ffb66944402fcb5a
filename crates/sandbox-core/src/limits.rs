//! Resource limit resolution: defaults → tool hints → caller overrides.
//!
//! [`ResourceLimitPolicy::resolve`] is pure and deterministic. Each candidate
//! value is validated on its own; an invalid one is dropped (and reported in
//! [`ResolvedLimits::rejected`]) while the previous layer's value is kept, so
//! the output never carries an unvalidated value.

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use sandbox_state::ResourceLimits;

use crate::collaborators::ToolHints;

/// CPU scheduling period in microseconds. Quotas are expressed against it.
pub const CPU_PERIOD: u64 = 100_000;
/// Smallest accepted CPU quota (1% of a core).
pub const MIN_CPU_QUOTA: i64 = 1_000;
/// Largest accepted CPU quota (one full core).
pub const MAX_CPU_QUOTA: i64 = 100_000;

/// Network mode used unless a tool asks for network access.
pub const ISOLATED_NETWORK: &str = "none";
/// Network mode for tools whose hints set `network_access`.
pub const BRIDGED_NETWORK: &str = "bridge";

fn memory_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[1-9][0-9]*[kmgKMG]$").expect("static memory pattern"))
}

/// `true` for a magnitude followed by a `k`/`m`/`g` unit, e.g. `256m`.
pub fn is_valid_memory(value: &str) -> bool {
    memory_pattern().is_match(value)
}

/// `true` when `quota` lies in `[MIN_CPU_QUOTA, MAX_CPU_QUOTA]`.
pub fn is_valid_cpu_quota(quota: i64) -> bool {
    (MIN_CPU_QUOTA..=MAX_CPU_QUOTA).contains(&quota)
}

/// Caller-supplied limit overrides. Each field is validated independently.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimitOverrides {
    pub memory: Option<String>,
    pub cpu_quota: Option<i64>,
}

impl LimitOverrides {
    pub fn memory(mut self, memory: impl Into<String>) -> Self {
        self.memory = Some(memory.into());
        self
    }

    pub fn cpu_quota(mut self, quota: i64) -> Self {
        self.cpu_quota = Some(quota);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.memory.is_none() && self.cpu_quota.is_none()
    }
}

/// Which layer proposed a rejected value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LimitSource {
    Tool,
    Caller,
}

/// A candidate value that failed validation and was ignored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimitRejection {
    pub source: LimitSource,
    pub field: &'static str,
    pub value: String,
    pub reason: String,
}

/// Output of [`ResourceLimitPolicy::resolve`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedLimits {
    pub limits: ResourceLimits,
    pub rejected: Vec<LimitRejection>,
}

/// Merges the built-in default limits with tool hints and caller overrides.
#[derive(Debug, Clone)]
pub struct ResourceLimitPolicy {
    defaults: ResourceLimits,
}

impl ResourceLimitPolicy {
    /// `defaults` must already satisfy the validation rules; configuration
    /// loading checks this at startup.
    pub fn new(defaults: ResourceLimits) -> Self {
        Self { defaults }
    }

    pub fn defaults(&self) -> &ResourceLimits {
        &self.defaults
    }

    pub fn resolve(&self, hints: Option<&ToolHints>, overrides: &LimitOverrides) -> ResolvedLimits {
        let mut limits = self.defaults.clone();
        limits.cpu_period = CPU_PERIOD;
        let mut rejected = Vec::new();

        if let Some(hints) = hints {
            if let Some(memory) = &hints.memory {
                apply_memory(&mut limits, memory, LimitSource::Tool, &mut rejected);
            }
            if let Some(quota) = hints.cpu_quota {
                apply_cpu_quota(&mut limits, quota, LimitSource::Tool, &mut rejected);
            }
            limits.network_mode = if hints.network_access {
                BRIDGED_NETWORK.to_string()
            } else {
                ISOLATED_NETWORK.to_string()
            };
        }

        if let Some(memory) = &overrides.memory {
            apply_memory(&mut limits, memory, LimitSource::Caller, &mut rejected);
        }
        if let Some(quota) = overrides.cpu_quota {
            apply_cpu_quota(&mut limits, quota, LimitSource::Caller, &mut rejected);
        }

        ResolvedLimits { limits, rejected }
    }
}

fn apply_memory(
    limits: &mut ResourceLimits,
    candidate: &str,
    source: LimitSource,
    rejected: &mut Vec<LimitRejection>,
) {
    if is_valid_memory(candidate) {
        limits.memory = candidate.to_string();
    } else {
        rejected.push(LimitRejection {
            source,
            field: "memory",
            value: candidate.to_string(),
            reason: "expected a magnitude with a k/m/g unit, e.g. 256m".to_string(),
        });
    }
}

fn apply_cpu_quota(
    limits: &mut ResourceLimits,
    candidate: i64,
    source: LimitSource,
    rejected: &mut Vec<LimitRejection>,
) {
    if is_valid_cpu_quota(candidate) {
        limits.cpu_quota = candidate as u64;
    } else {
        rejected.push(LimitRejection {
            source,
            field: "cpu_quota",
            value: candidate.to_string(),
            reason: format!("must be within [{MIN_CPU_QUOTA}, {MAX_CPU_QUOTA}]"),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn defaults() -> ResourceLimits {
        ResourceLimits {
            memory: "512m".into(),
            cpu_quota: 50_000,
            cpu_period: CPU_PERIOD,
            network_mode: ISOLATED_NETWORK.into(),
            tmpfs_size: "100m".into(),
            pids_limit: 128,
        }
    }

    fn policy() -> ResourceLimitPolicy {
        ResourceLimitPolicy::new(defaults())
    }

    #[test]
    fn test_memory_pattern() {
        assert!(is_valid_memory("256m"));
        assert!(is_valid_memory("2g"));
        assert!(is_valid_memory("1024K"));
        assert!(!is_valid_memory("256"));
        assert!(!is_valid_memory("0m"));
        assert!(!is_valid_memory("256mb"));
        assert!(!is_valid_memory("-1m"));
        assert!(!is_valid_memory(""));
    }

    #[test]
    fn test_cpu_quota_bounds_are_inclusive() {
        assert!(!is_valid_cpu_quota(999));
        assert!(is_valid_cpu_quota(1_000));
        assert!(is_valid_cpu_quota(100_000));
        assert!(!is_valid_cpu_quota(100_001));
        assert!(!is_valid_cpu_quota(-5));
    }

    #[test]
    fn test_no_inputs_yields_defaults() {
        let resolved = policy().resolve(None, &LimitOverrides::default());
        assert_eq!(resolved.limits, defaults());
        assert!(resolved.rejected.is_empty());
    }

    #[test]
    fn test_valid_memory_override_accepted_as_is() {
        let resolved = policy().resolve(None, &LimitOverrides::default().memory("256m"));
        assert_eq!(resolved.limits.memory, "256m");
        assert!(resolved.rejected.is_empty());
    }

    #[test]
    fn test_unitless_memory_override_keeps_default() {
        let resolved = policy().resolve(None, &LimitOverrides::default().memory("256"));
        assert_eq!(resolved.limits.memory, "512m");
        assert_eq!(resolved.rejected.len(), 1);
        assert_eq!(resolved.rejected[0].field, "memory");
        assert_eq!(resolved.rejected[0].source, LimitSource::Caller);
    }

    #[test]
    fn test_cpu_quota_below_floor_rejected() {
        let resolved = policy().resolve(None, &LimitOverrides::default().cpu_quota(500));
        assert_eq!(resolved.limits.cpu_quota, 50_000);
        assert_eq!(resolved.rejected[0].field, "cpu_quota");
    }

    #[test]
    fn test_cpu_quota_in_range_accepted() {
        let resolved = policy().resolve(None, &LimitOverrides::default().cpu_quota(25_000));
        assert_eq!(resolved.limits.cpu_quota, 25_000);
        assert_eq!(resolved.limits.cpu_period, CPU_PERIOD);
    }

    #[test]
    fn test_tool_hints_apply_before_caller_overrides() {
        let hints = ToolHints {
            memory: Some("1g".into()),
            cpu_quota: Some(80_000),
            ..ToolHints::default()
        };

        let tool_only = policy().resolve(Some(&hints), &LimitOverrides::default());
        assert_eq!(tool_only.limits.memory, "1g");
        assert_eq!(tool_only.limits.cpu_quota, 80_000);

        let caller_wins = policy().resolve(
            Some(&hints),
            &LimitOverrides::default().memory("128m").cpu_quota(10_000),
        );
        assert_eq!(caller_wins.limits.memory, "128m");
        assert_eq!(caller_wins.limits.cpu_quota, 10_000);
    }

    #[test]
    fn test_invalid_caller_override_falls_back_to_tool_value() {
        let hints = ToolHints {
            memory: Some("1g".into()),
            ..ToolHints::default()
        };
        let resolved = policy().resolve(Some(&hints), &LimitOverrides::default().memory("lots"));
        assert_eq!(resolved.limits.memory, "1g");
    }

    #[test]
    fn test_invalid_tool_hints_are_not_trusted() {
        let hints = ToolHints {
            memory: Some("huge".into()),
            cpu_quota: Some(200_000),
            ..ToolHints::default()
        };
        let resolved = policy().resolve(Some(&hints), &LimitOverrides::default());
        assert_eq!(resolved.limits, defaults());
        assert_eq!(resolved.rejected.len(), 2);
        assert!(resolved
            .rejected
            .iter()
            .all(|r| r.source == LimitSource::Tool));
    }

    #[test]
    fn test_network_access_hint_bridges_network() {
        let hints = ToolHints {
            network_access: true,
            ..ToolHints::default()
        };
        let resolved = policy().resolve(Some(&hints), &LimitOverrides::default());
        assert_eq!(resolved.limits.network_mode, BRIDGED_NETWORK);

        let isolated = policy().resolve(Some(&ToolHints::default()), &LimitOverrides::default());
        assert_eq!(isolated.limits.network_mode, ISOLATED_NETWORK);
    }

    #[test]
    fn test_resolution_is_deterministic() {
        let overrides = LimitOverrides::default().memory("300m").cpu_quota(7);
        let a = policy().resolve(None, &overrides);
        let b = policy().resolve(None, &overrides);
        assert_eq!(a, b);
    }
}
