//! Stable exit codes for the supervisor binary.

/// The demonstration task completed successfully.
pub const OK: i32 = 0;
/// Invalid invocation or configuration.
pub const INVALID: i32 = 1;
/// The demonstration task returned a stage failure.
pub const FAILED: i32 = 2;
