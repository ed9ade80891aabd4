//! Sandbox execution and workflow coordination for multi-agent runs.
//!
//! This crate gives a crew of agents a shared, persistent Docker sandbox and
//! a durable coordination document, so independent agents can execute
//! commands, track work items, attribute artifacts, and gate on upstream
//! dependencies without stepping on each other. The architecture enforces a
//! strict separation:
//!
//! - **[`core`]**: Pure, deterministic logic (todo transitions, ledger
//!   updates, shared types). No I/O, fully testable in isolation.
//! - **[`io`]**: Side-effecting operations (state persistence, container
//!   lifecycle, process execution). Isolated behind traits to enable scripted
//!   backends in tests.
//!
//! Service modules ([`todo`], [`ledger`], [`checkpoint`], [`dispatch`])
//! combine core logic with the shared [`io::state_store::StateStore`] to
//! implement the coordination operations.

pub mod checkpoint;
pub mod core;
pub mod dispatch;
pub mod io;
pub mod ledger;
pub mod logging;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
pub mod todo;
