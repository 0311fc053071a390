//! The hosting runtime as seen from the bridge.

use crate::error::Result;
use crate::value::Value;

/// Services the bridge consumes from the script runtime that hosts it.
///
/// The bridge never reaches for the runtime through ambient state: every
/// operation receives the handle explicitly, usually through
/// [`ExecutionContext::runtime`](crate::ExecutionContext::runtime).
///
/// Evaluation methods report runtime exceptions as
/// [`Error::Evaluation`](crate::Error::Evaluation); the bridge forwards them
/// untouched.
pub trait ScriptRuntime {
    /// Runtime version string, e.g. `0.18.2`.
    fn version(&self) -> &str;

    /// Evaluate `source` as global code, labelled `label` in diagnostics.
    fn eval_script(&self, source: &str, label: &str) -> Result<Value>;

    /// Evaluate a module.
    ///
    /// With `source == None` the runtime's loader resolves `path`. With
    /// `top_level` the module's completion value is returned; otherwise the
    /// module namespace is returned for the caller to consume later.
    fn eval_module(&self, path: &str, source: Option<&str>, top_level: bool) -> Result<Value>;

    /// Set the heap ceiling in bytes for subsequent allocations.
    fn set_memory_limit(&self, limit: u32);

    /// Set the call-stack ceiling in bytes for subsequently entered frames.
    fn set_max_stack_size(&self, size: u32);

    /// Run one full, synchronous collection.
    fn run_gc(&self);
}
