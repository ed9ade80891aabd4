//! Side-effecting operations: filesystem, configuration, process and
//! container execution.

pub mod config;
pub mod docker;
pub mod process;
pub mod sandbox;
pub mod state_store;
