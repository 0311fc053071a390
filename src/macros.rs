//! Helpers for typed host function registration.
//!
//! Host functions receive raw [`Value`] arguments; the helpers here extract
//! typed arguments first and only then run the body, so a marshaling
//! failure never reaches the wrapped primitive.

use crate::convert::{FromValue, IntoValue};
use crate::engine::ExecutionContext;
use crate::error::Result;
use crate::value::Value;

/// Trait for types that can be used as host function arguments.
pub trait HostArg: Sized {
    /// Extract this argument from the argument list at the given position.
    fn extract(args: &[Value], position: usize) -> std::result::Result<Self, ArgError>;
}

/// Error extracting a host function argument.
#[derive(Debug, Clone, PartialEq)]
pub struct ArgError {
    /// Argument position (0-indexed).
    pub position: usize,
    /// Expected type.
    pub expected: &'static str,
    /// What went wrong.
    pub message: String,
}

impl std::fmt::Display for ArgError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "argument {}: expected {}, {}",
            self.position, self.expected, self.message
        )
    }
}

impl std::error::Error for ArgError {}

impl<T: FromValue> HostArg for T {
    fn extract(args: &[Value], position: usize) -> std::result::Result<Self, ArgError> {
        let value = args.get(position).cloned().ok_or_else(|| ArgError {
            position,
            expected: std::any::type_name::<T>(),
            message: "missing argument".to_string(),
        })?;

        T::from_value(value).map_err(|e| ArgError {
            position,
            expected: std::any::type_name::<T>(),
            message: e.to_string(),
        })
    }
}

/// Trait for host function return types.
pub trait HostReturn {
    /// Convert this return value to a Result<Value>.
    fn into_result(self) -> Result<Value>;
}

// Errors pass through as-is: runtime exceptions must not be re-wrapped.
impl<T: IntoValue> HostReturn for Result<T> {
    fn into_result(self) -> Result<Value> {
        self.map(IntoValue::into_value)
    }
}

/// Typed host function with context access and no arguments.
pub fn typed_host_fn_ctx_0<F, R>(
    f: F,
) -> impl Fn(&[Value], &ExecutionContext<'_>) -> Result<Value> + Send + Sync + 'static
where
    F: Fn(&ExecutionContext<'_>) -> R + Send + Sync + 'static,
    R: HostReturn,
{
    move |_args: &[Value], ctx: &ExecutionContext<'_>| f(ctx).into_result()
}

/// Typed host function with context access and one argument.
pub fn typed_host_fn_ctx_1<F, A, R>(
    f: F,
) -> impl Fn(&[Value], &ExecutionContext<'_>) -> Result<Value> + Send + Sync + 'static
where
    F: Fn(&ExecutionContext<'_>, A) -> R + Send + Sync + 'static,
    A: HostArg,
    R: HostReturn,
{
    move |args: &[Value], ctx: &ExecutionContext<'_>| {
        let a = A::extract(args, 0)?;
        f(ctx, a).into_result()
    }
}

/// Define a typed host function that captures its environment by move.
///
/// # Examples
///
/// ```ignore
/// let bridge = Arc::new(SysBridge::new(BridgeConfig::default()));
///
/// let b = Arc::clone(&bridge);
/// let gc = host_fn!(ctx => b.gc(ctx));
///
/// let b = Arc::clone(&bridge);
/// let eval = host_fn!(ctx, source: String => b.eval_script(ctx, &source));
/// ```
#[macro_export]
macro_rules! host_fn {
    ($ctx:ident => $body:expr) => {
        $crate::macros::typed_host_fn_ctx_0(move |$ctx: &$crate::ExecutionContext<'_>| $body)
    };

    ($ctx:ident, $a:ident: $at:ty => $body:expr) => {
        $crate::macros::typed_host_fn_ctx_1(
            move |$ctx: &$crate::ExecutionContext<'_>, $a: $at| $body,
        )
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::Capabilities;
    use crate::engine::{Engine, EngineConfig};
    use crate::error::Error;

    #[test]
    fn test_arg_extraction() {
        let args = vec![Value::Int(42), Value::String("hello".into())];

        let a: u32 = u32::extract(&args, 0).unwrap();
        assert_eq!(a, 42);

        let b: String = String::extract(&args, 1).unwrap();
        assert_eq!(b, "hello");
    }

    #[test]
    fn test_arg_extraction_missing() {
        let args = vec![Value::Int(42)];
        let err = String::extract(&args, 1).unwrap_err();
        assert_eq!(err.position, 1);
        assert_eq!(err.message, "missing argument");
    }

    #[test]
    fn test_typed_host_fn_runs_body_after_marshaling() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::sync::Arc;

        let engine = Engine::new(EngineConfig::default());
        let caps = Capabilities::all();
        let ctx = ExecutionContext::new(&engine, &caps);

        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&calls);
        let f = crate::host_fn!(_ctx, n: u32 => {
            seen.fetch_add(1, Ordering::SeqCst);
            Ok::<_, Error>(n * 2)
        });

        assert_eq!(f(&[Value::Int(21)], &ctx).unwrap(), Value::Int(42));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let err = f(&[Value::Int(-1)], &ctx).unwrap_err();
        assert!(matches!(err, Error::Argument(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
