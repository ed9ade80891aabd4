//! Pure, deterministic coordination logic. No I/O.

pub mod ledger;
pub mod todo;
pub mod types;
