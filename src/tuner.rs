//! Runtime tuning: heap and stack ceilings, forced collection.

use crate::error::{Error, Result};
use crate::runtime::ScriptRuntime;

/// Set the heap ceiling in bytes. Zero is forwarded unchanged.
pub fn set_memory_limit(runtime: &dyn ScriptRuntime, limit: u32) {
    tracing::debug!(limit, "setting heap ceiling");
    runtime.set_memory_limit(limit);
}

/// Set the stack ceiling in bytes. Zero is forwarded unchanged.
pub fn set_max_stack_size(runtime: &dyn ScriptRuntime, size: u32) {
    tracing::debug!(size, "setting stack ceiling");
    runtime.set_max_stack_size(size);
}

/// Run one synchronous full collection.
pub fn gc(runtime: &dyn ScriptRuntime) {
    tracing::trace!("running collection");
    runtime.run_gc();
}

/// Parse a base-10 numeric startup option such as `--memory-limit`.
pub fn parse_limit_option(text: &str, option: &str) -> Result<u32> {
    text.trim().parse::<u32>().map_err(|_| {
        Error::invalid_config(format!("Invalid number {} for option {}", text, option))
    })
}
