//! Tool metadata lookup.

use std::collections::HashMap;
use std::path::Path;

use anyhow::Context;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Security and resource hints a tool carries.
///
/// Every field is defaulted, so an unknown tool and a tool with no hints
/// resolve the same way.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolHints {
    pub tool_id: String,
    /// Upper bound on a session's lifetime for this tool.
    pub max_session_duration_secs: Option<u64>,
    pub memory: Option<String>,
    pub cpu_quota: Option<i64>,
    /// Preferred image; still subject to the allow-list.
    pub image: Option<String>,
    /// When `true` the sandbox gets a bridged network instead of none.
    pub network_access: bool,
    pub security_level: Option<String>,
}

/// Lookup of tool metadata by id.
///
/// `Ok(None)` means the tool is unknown. Callers treat `Err` the same way.
#[async_trait]
pub trait ToolCatalog: Send + Sync {
    async fn lookup(&self, tool_id: &str) -> anyhow::Result<Option<ToolHints>>;
}

#[derive(Debug, Deserialize)]
struct CatalogFile {
    #[serde(default)]
    tools: Vec<ToolHints>,
}

/// Immutable, in-process tool catalog.
#[derive(Debug, Clone, Default)]
pub struct StaticToolCatalog {
    tools: HashMap<String, ToolHints>,
}

impl StaticToolCatalog {
    pub fn new(tools: impl IntoIterator<Item = ToolHints>) -> Self {
        Self {
            tools: tools
                .into_iter()
                .map(|hints| (hints.tool_id.clone(), hints))
                .collect(),
        }
    }

    /// Parse a catalog from TOML text with a `[[tools]]` array.
    pub fn from_toml_str(text: &str) -> anyhow::Result<Self> {
        let file: CatalogFile = toml::from_str(text).context("invalid tool catalog")?;
        Ok(Self::new(file.tools))
    }

    pub fn from_toml_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read tool catalog {}", path.display()))?;
        Self::from_toml_str(&text)
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

#[async_trait]
impl ToolCatalog for StaticToolCatalog {
    async fn lookup(&self, tool_id: &str) -> anyhow::Result<Option<ToolHints>> {
        Ok(self.tools.get(tool_id).cloned())
    }
}
