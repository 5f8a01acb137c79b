//! Shared tracing setup for every process in the workspace.
//!
//! The service and projection layers emit structured events (`warn!` on lost
//! races and skipped payees, `info!` on generated settlements); this crate
//! owns how those events leave the process.

pub mod tracing;

/// Initialize process-wide logging.
///
/// Safe to call multiple times; subsequent calls are no-ops, so tests and
/// embedding hosts can both call it blindly.
pub fn init() {
    tracing::init();
}
