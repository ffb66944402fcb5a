//! Sandbox-State: session persistence for the sandboxed execution service
//!
//! This crate owns the persisted data model and the storage contract the
//! session manager depends on. Any durable store that satisfies
//! [`SessionStateStore`] can back the service.
//!
//! ## Layer 0 - Data/Persistence
//!
//! ## Key Components
//!
//! - `SessionRecord` / `ExecutionRecord`: the audit-retained records
//! - `SessionStateStore`: async persistence trait (compare-and-set transitions)
//! - `MemorySessionStore`: in-memory fake
//! - `SurrealSessionStore`: SurrealDB adapter (`mem://`, `surrealkv://`, remote)

use std::sync::Arc;

mod error;
pub mod fakes;
mod migrations;
mod schema;
pub mod storage_traits;
pub mod surreal_store;

pub use error::{StateError, StorageError};
pub use fakes::MemorySessionStore;
pub use schema::{ExecutionRow, SessionRow};
pub use storage_traits::{
    ExecutionOutcome, ExecutionRecord, ResourceLimits, SessionFilter, SessionRecord,
    SessionStateStore, SessionStatus, StorageResult, MOCK_SANDBOX_STATUS,
};
pub use surreal_store::SurrealSessionStore;

/// Result type for sandbox-state connection and schema operations
pub type Result<T> = std::result::Result<T, StateError>;

/// Open the store selected by the environment.
///
/// `SANDBOX_STORE=memory` gives a process-local [`MemorySessionStore`];
/// anything else goes through [`SurrealSessionStore::from_env`].
pub async fn store_from_env() -> Result<Arc<dyn SessionStateStore>> {
    match std::env::var("SANDBOX_STORE").as_deref() {
        Ok("memory") => {
            tracing::info!("using in-memory session store");
            Ok(Arc::new(MemorySessionStore::new()))
        }
        _ => Ok(Arc::new(SurrealSessionStore::from_env().await?)),
    }
}
