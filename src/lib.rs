//! # nodeflow - a minimal node/flow engine for directed graph workflows
//!
//! Each node runs a prep/exec/post lifecycle and returns an action label;
//! the flow follows the edge registered for that label. Flows are nodes
//! too, so they nest. Ordinary and suspension-capable nodes can be mixed in
//! an async flow, and batch nodes or batch flows can fan out over tokio
//! futures.
//!
//! ## Usage
//!
//! ```toml
//! [dependencies]
//! nodeflow = "0.3"
//! ```

/// Install a `tracing_subscriber::fmt` subscriber so engine diagnostics
/// (edge overwrites, dead-end actions, retries) reach stderr.
pub fn init() {
    tracing_subscriber::fmt::init();
}

pub use nodeflow_core as core;
pub use nodeflow_core::*;
