//! Evaluation dispatch: module evaluation and global script evaluation.

use crate::error::Result;
use crate::runtime::ScriptRuntime;
use crate::value::Value;

/// Label attached to every global script evaluation.
pub const SCRIPT_LABEL: &str = "<evalScript>";

/// A single evaluation, built per call and consumed immediately.
#[derive(Debug, Clone, PartialEq)]
pub enum EvalRequest {
    /// Evaluate a module. With `source: None` the runtime's loader resolves
    /// `path`; `top_level` returns the completion value instead of the
    /// module namespace.
    Module {
        /// Module specifier handed to the loader.
        path: String,
        /// Inline source, bypassing the loader.
        source: Option<String>,
        /// Return the completion value rather than the namespace.
        top_level: bool,
    },
    /// Evaluate source in global scope.
    Script {
        /// Script text.
        source: String,
    },
}

impl EvalRequest {
    /// A top-level module evaluation resolved by the loader.
    pub fn file(path: impl Into<String>) -> Self {
        EvalRequest::Module {
            path: path.into(),
            source: None,
            top_level: true,
        }
    }

    /// A global script evaluation.
    pub fn script(source: impl Into<String>) -> Self {
        EvalRequest::Script {
            source: source.into(),
        }
    }
}

/// Run `request` on `runtime`.
///
/// Engine exceptions come back untouched; nothing is validated up front.
pub fn evaluate(runtime: &dyn ScriptRuntime, request: EvalRequest) -> Result<Value> {
    match request {
        EvalRequest::Module {
            path,
            source,
            top_level,
        } => {
            tracing::debug!(path = %path, top_level, "evaluating module");
            runtime.eval_module(&path, source.as_deref(), top_level)
        }
        EvalRequest::Script { source } => {
            tracing::debug!(bytes = source.len(), "evaluating script");
            runtime.eval_script(&source, SCRIPT_LABEL)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{Engine, EngineConfig};
    use crate::error::Error;
    use crate::exception::ExceptionKind;

    #[test]
    fn test_script_request() {
        let engine = Engine::new(EngineConfig::default());
        let value = evaluate(&engine, EvalRequest::script("1+1")).unwrap();
        assert_eq!(value, Value::Int(2));
    }

    #[test]
    fn test_script_errors_carry_label() {
        let engine = Engine::new(EngineConfig::default());
        let err = evaluate(&engine, EvalRequest::script("(")).unwrap_err();
        let exc = err.exception().unwrap();
        assert_eq!(exc.kind, ExceptionKind::SyntaxError);
        assert_eq!(exc.location.as_ref().unwrap().file, SCRIPT_LABEL);
    }

    #[test]
    fn test_file_request_uses_loader() {
        let engine = Engine::new(EngineConfig::default());
        engine.add_module("app.fsx", "let x = 4\nx * 10 + 2");
        let value = evaluate(&engine, EvalRequest::file("app.fsx")).unwrap();
        assert_eq!(value, Value::Int(42));
    }

    #[test]
    fn test_unknown_file() {
        let engine = Engine::new(EngineConfig::default());
        let err = evaluate(&engine, EvalRequest::file("nowhere.fsx")).unwrap_err();
        assert!(matches!(
            err,
            Error::Evaluation(ref exc) if exc.kind == ExceptionKind::ModuleNotFound
        ));
    }
}
