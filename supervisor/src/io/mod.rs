//! I/O helpers for supervisor configuration.

pub mod config;
