//! Scopes layered over task execution.
//!
//! - [`state`]: accumulated history/metadata of one call.
//! - [`resolve`]: capabilities (logger, repository, configuration) resolvable
//!   by stage code.
//! - [`runner`]: both scopes composed around one task invocation.
//!
//! Scopes never hold global state. Each one swaps its context into the
//! [`EffectEnv`] passed to it and swaps the enclosing context back when the
//! call ends.

use std::panic::{self, AssertUnwindSafe};

use crate::core::context::EffectEnv;

pub mod resolve;
pub mod runner;
pub mod state;

/// Run `body`, then `restore`, re-raising any panic from `body` afterwards.
pub(crate) fn restore_on_unwind<T>(
    env: &mut EffectEnv,
    body: impl FnOnce(&mut EffectEnv) -> T,
    restore: impl FnOnce(&mut EffectEnv),
) -> T {
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| body(env)));
    restore(env);
    match outcome {
        Ok(value) => value,
        Err(payload) => panic::resume_unwind(payload),
    }
}
