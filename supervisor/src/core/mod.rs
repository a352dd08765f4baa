//! Deterministic execution engine.
//!
//! Core modules perform no I/O of their own. Stage behaviors may, but the
//! engine only sequences them and records their outcomes.

pub mod context;
pub(crate) mod fault;
pub mod outcome;
pub mod stage;
pub mod task;
pub mod types;
