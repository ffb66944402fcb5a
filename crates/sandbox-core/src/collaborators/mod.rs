//! Narrow interfaces to systems outside the sandbox service.
//!
//! - [`tools`]: `ToolCatalog`: tool id → security/resource hints
//! - [`usage`]: `UsageLogger`: fire-and-forget execution audit sink

pub mod tools;
pub mod usage;

pub use tools::{StaticToolCatalog, ToolCatalog, ToolHints};
pub use usage::{TracingUsageLogger, UsageLogger, UsageRecord};
