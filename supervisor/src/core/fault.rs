//! Capture of panics raised by stage code.
//!
//! [`catch`] runs a closure under `catch_unwind`. A process-wide panic hook,
//! installed once, records a backtrace at the panic site while a capture is
//! active on the current thread and skips the default report. Panics outside a
//! capture go to the previously installed hook unchanged.

use std::any::Any;
use std::backtrace::Backtrace;
use std::cell::{Cell, RefCell};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Once;

thread_local! {
    static CAPTURING: Cell<bool> = const { Cell::new(false) };
    static PANIC_TRACE: RefCell<Option<String>> = const { RefCell::new(None) };
}

static INSTALL_HOOK: Once = Once::new();

/// Frames that belong to the unwinding machinery rather than to stage code.
const MACHINERY_PREFIXES: &[&str] = &[
    "std::",
    "core::",
    "alloc::",
    "<alloc::",
    "<core::",
    "<std::",
    "rust_begin_unwind",
    "__rustc::",
    "supervisor::core::fault::install_hook",
];

/// A panic caught by [`catch`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Fault {
    pub message: String,
    /// Frames from the panic site outwards, at most the requested count.
    pub backtrace: Vec<String>,
}

/// Run `body`, converting a panic into a [`Fault`] carrying the first
/// `frames` frames of the panic site.
pub(crate) fn catch<T>(frames: usize, body: impl FnOnce() -> T) -> Result<T, Fault> {
    install_hook();
    let enclosing = CAPTURING.with(|flag| flag.replace(true));
    let outcome = panic::catch_unwind(AssertUnwindSafe(body));
    CAPTURING.with(|flag| flag.set(enclosing));

    outcome.map_err(|payload| {
        let trace = PANIC_TRACE.with(|slot| slot.borrow_mut().take());
        Fault {
            message: panic_message(payload.as_ref()),
            backtrace: trace.map_or_else(Vec::new, |trace| origin_frames(&trace, frames)),
        }
    })
}

fn install_hook() {
    INSTALL_HOOK.call_once(|| {
        let previous = panic::take_hook();
        panic::set_hook(Box::new(move |info| {
            if CAPTURING.with(Cell::get) {
                let trace = Backtrace::force_capture().to_string();
                PANIC_TRACE.with(|slot| *slot.borrow_mut() = Some(trace));
            } else {
                previous(info);
            }
        }));
    });
}

/// Extract a readable message from a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        return (*message).to_string();
    }
    if let Some(message) = payload.downcast_ref::<String>() {
        return message.clone();
    }
    "stage panicked with a non-string payload".to_string()
}

/// Symbol names of a rendered backtrace, with the leading hook and unwinding
/// frames dropped, truncated to `frames`.
fn origin_frames(rendered: &str, frames: usize) -> Vec<String> {
    rendered
        .lines()
        .filter_map(frame_symbol)
        .skip_while(|symbol| is_machinery(symbol))
        .take(frames)
        .map(str::to_string)
        .collect()
}

/// `"  12: crate::module::function"` → `"crate::module::function"`.
fn frame_symbol(line: &str) -> Option<&str> {
    let (index, symbol) = line.trim().split_once(':')?;
    if index.is_empty() || !index.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    Some(symbol.trim())
}

fn is_machinery(symbol: &str) -> bool {
    MACHINERY_PREFIXES
        .iter()
        .any(|prefix| symbol.starts_with(prefix))
}
