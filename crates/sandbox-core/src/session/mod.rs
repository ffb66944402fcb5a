//! Session orchestration.
//!
//! - [`manager`]: `SessionManager`: admission control, state transitions,
//!   execution serialization and teardown
//! - [`sweeper`]: background expiry sweep
//! - `slots`: capacity permits plus per-session execution locks

pub mod manager;
mod slots;
pub mod sweeper;

pub use manager::{
    CreateSessionRequest, ExecuteRequest, RecoveryReport, SessionDescriptor, SessionManager,
    SessionState, SweepReport,
};
pub use sweeper::{spawn_sweeper, SweeperHandle};
