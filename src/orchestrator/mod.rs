//! Session orchestration modules.
//!
//! Covers reconnect backoff, the per-session supervisor, stuck detection,
//! subsystem teardown and the registry of live sessions.

pub mod backoff;
pub mod registry;
pub mod session_manager;
pub mod stuck_detector;
pub mod teardown;

mod supervisor;
