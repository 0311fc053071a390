//! Reference engine, host registry, and execution context.
//!
//! [`Engine`] is a small, self-contained [`ScriptRuntime`]: enough of a
//! runtime to host the `sys` bridge, run its host functions from script
//! code, and observe the effect of the tuning calls.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::capabilities::{Capabilities, Capability};
use crate::error::{Error, Result};
use crate::exception::{Exception, ExceptionKind};
use crate::runtime::ScriptRuntime;
use crate::script::{parse, BinOp, Expr, Pos, Program, SourceKind, Stmt};
use crate::value::Value;

/// Version reported by the reference engine.
pub const ENGINE_VERSION: &str = "0.18.4";

/// Default stack ceiling: 1 MiB.
pub const DEFAULT_STACK_SIZE: u32 = 1024 * 1024;

/// Bytes charged against the stack ceiling per nested evaluation frame.
pub const FRAME_SIZE: usize = 256;

/// Hard bound on nested evaluation frames, whatever the stack ceiling says.
///
/// The ceiling is a script-settable number; this bound is what the native
/// thread stack can actually hold. Host calls and imports each count as
/// [`NESTED_FRAMES`] frames since they re-enter the evaluator.
pub const MAX_FRAMES: usize = 512;

/// Frames charged for a host call or an import.
pub const NESTED_FRAMES: usize = 8;

const VALUE_OVERHEAD: usize = 16;

/// Configuration for creating an Engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Capabilities granted to scripts running in this engine.
    pub capabilities: Capabilities,
    /// Initial heap ceiling in bytes; 0 means no limit.
    pub memory_limit: u32,
    /// Initial stack ceiling in bytes; 0 means no limit.
    pub max_stack_size: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            capabilities: Capabilities::all(),
            memory_limit: 0,
            max_stack_size: DEFAULT_STACK_SIZE,
        }
    }
}

impl EngineConfig {
    /// Create a new engine configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set capabilities.
    pub fn with_capabilities(mut self, capabilities: Capabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Set the initial heap ceiling.
    pub fn with_memory_limit(mut self, bytes: u32) -> Self {
        self.memory_limit = bytes;
        self
    }

    /// Set the initial stack ceiling.
    pub fn with_max_stack_size(mut self, bytes: u32) -> Self {
        self.max_stack_size = bytes;
        self
    }

    /// Create a strict configuration for untrusted code.
    pub fn strict() -> Self {
        Self {
            capabilities: Capabilities::safe_defaults(),
            memory_limit: 16 * 1024 * 1024,
            max_stack_size: 256 * 1024,
        }
    }
}

/// Host function signature.
pub type HostFn = Arc<dyn Fn(&[Value], &ExecutionContext<'_>) -> Result<Value> + Send + Sync>;

/// Host function registry: the dispatch table scripts call into.
///
/// Entries live in namespaces (`sys.gc`). Properties are zero-argument
/// getters read with member syntax (`sys.exepath`).
#[derive(Default, Clone)]
pub struct HostRegistry {
    functions: HashMap<String, HashMap<String, HostFn>>,
    properties: HashMap<String, HashMap<String, HostFn>>,
}

impl HostRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a host function in a namespace.
    pub fn register_module<M, N, F>(&mut self, module: M, name: N, f: F)
    where
        M: Into<String>,
        N: Into<String>,
        F: Fn(&[Value], &ExecutionContext<'_>) -> Result<Value> + Send + Sync + 'static,
    {
        self.functions
            .entry(module.into())
            .or_default()
            .insert(name.into(), Arc::new(f));
    }

    /// Register a read-only property getter in a namespace.
    pub fn register_property<M, N, F>(&mut self, module: M, name: N, f: F)
    where
        M: Into<String>,
        N: Into<String>,
        F: Fn(&[Value], &ExecutionContext<'_>) -> Result<Value> + Send + Sync + 'static,
    {
        self.properties
            .entry(module.into())
            .or_default()
            .insert(name.into(), Arc::new(f));
    }

    /// Look up a namespaced function.
    pub fn get_module(&self, module: &str, name: &str) -> Option<&HostFn> {
        self.functions.get(module).and_then(|m| m.get(name))
    }

    /// Look up a namespaced property getter.
    pub fn get_property(&self, module: &str, name: &str) -> Option<&HostFn> {
        self.properties.get(module).and_then(|m| m.get(name))
    }

    /// Returns true if anything is registered under `module`.
    pub fn has_namespace(&self, module: &str) -> bool {
        self.functions.contains_key(module) || self.properties.contains_key(module)
    }

    /// Names registered under `module`, functions and properties alike.
    pub fn names(&self, module: &str) -> Vec<&str> {
        let mut names: Vec<&str> = self
            .functions
            .get(module)
            .into_iter()
            .chain(self.properties.get(module))
            .flat_map(|m| m.keys().map(String::as_str))
            .collect();
        names.sort_unstable();
        names
    }
}

impl std::fmt::Debug for HostRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostRegistry")
            .field("functions", &self.functions.keys().collect::<Vec<_>>())
            .field("properties", &self.properties.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Context handed to every host function call.
///
/// Carries the calling runtime explicitly; host functions never reach the
/// runtime any other way.
pub struct ExecutionContext<'a> {
    runtime: &'a dyn ScriptRuntime,
    capabilities: &'a Capabilities,
}

impl<'a> ExecutionContext<'a> {
    /// Create a new execution context.
    pub fn new(runtime: &'a dyn ScriptRuntime, capabilities: &'a Capabilities) -> Self {
        Self {
            runtime,
            capabilities,
        }
    }

    /// The runtime that made the call.
    pub fn runtime(&self) -> &'a dyn ScriptRuntime {
        self.runtime
    }

    /// Capabilities granted to the calling script.
    pub fn capabilities(&self) -> &Capabilities {
        self.capabilities
    }

    /// Check if a capability is granted.
    pub fn has_capability(&self, cap: Capability) -> bool {
        self.capabilities.has(cap)
    }

    /// Require a capability, returning an error if not granted.
    pub fn require_capability(&self, cap: Capability) -> Result<()> {
        self.capabilities.require(cap)
    }
}

impl std::fmt::Debug for ExecutionContext<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("runtime", &self.runtime.version())
            .field("capabilities", &self.capabilities)
            .finish()
    }
}

#[derive(Debug, Clone)]
struct ModuleRecord {
    namespace: HashMap<String, Value>,
    completion: Value,
}

struct Scope {
    file: String,
    kind: SourceKind,
    locals: HashMap<String, Value>,
    exports: HashMap<String, Value>,
}

impl Scope {
    fn new(file: &str, kind: SourceKind) -> Self {
        Self {
            file: file.to_string(),
            kind,
            locals: HashMap::new(),
            exports: HashMap::new(),
        }
    }

    fn error(&self, kind: ExceptionKind, pos: Pos, message: impl Into<String>) -> Error {
        Exception::new(kind, message)
            .at(self.file.as_str(), pos.line, pos.column)
            .with_frame(format!("at {}:{}:{}", self.file, pos.line, pos.column))
            .into()
    }
}

/// The reference script engine.
pub struct Engine {
    id: u64,
    config: EngineConfig,
    registry: HostRegistry,
    globals: Mutex<HashMap<String, Value>>,
    sources: Mutex<HashMap<String, String>>,
    loaded: Mutex<HashMap<String, ModuleRecord>>,
    loading: Mutex<HashSet<String>>,
    memory_limit: AtomicU32,
    max_stack_size: AtomicU32,
    heap_used: AtomicUsize,
    gc_runs: AtomicU64,
    // Frame depth of the innermost active host call or import.
    frames: AtomicUsize,
}

impl Engine {
    /// Create a new engine with the given configuration.
    pub fn new(config: EngineConfig) -> Self {
        static NEXT_ID: AtomicU64 = AtomicU64::new(1);
        let id = NEXT_ID.fetch_add(1, Ordering::Relaxed);

        Self {
            id,
            memory_limit: AtomicU32::new(config.memory_limit),
            max_stack_size: AtomicU32::new(config.max_stack_size),
            config,
            registry: HostRegistry::new(),
            globals: Mutex::new(HashMap::new()),
            sources: Mutex::new(HashMap::new()),
            loaded: Mutex::new(HashMap::new()),
            loading: Mutex::new(HashSet::new()),
            heap_used: AtomicUsize::new(0),
            gc_runs: AtomicU64::new(0),
            frames: AtomicUsize::new(0),
        }
    }

    /// Get the engine ID.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Get the engine configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Get mutable access to the host registry.
    pub fn registry_mut(&mut self) -> &mut HostRegistry {
        &mut self.registry
    }

    /// Get the host registry.
    pub fn registry(&self) -> &HostRegistry {
        &self.registry
    }

    /// Make a module source available to the loader under `path`.
    pub fn add_module(&self, path: impl Into<String>, source: impl Into<String>) {
        self.sources.lock().insert(path.into(), source.into());
    }

    /// Read a global binding.
    pub fn global(&self, name: &str) -> Option<Value> {
        self.globals.lock().get(name).cloned()
    }

    /// Current heap ceiling (0 = none).
    pub fn memory_limit(&self) -> u32 {
        self.memory_limit.load(Ordering::SeqCst)
    }

    /// Current stack ceiling (0 = none).
    pub fn max_stack_size(&self) -> u32 {
        self.max_stack_size.load(Ordering::SeqCst)
    }

    /// Bytes currently charged against the heap.
    pub fn heap_used(&self) -> usize {
        self.heap_used.load(Ordering::SeqCst)
    }

    /// Number of completed collections.
    pub fn gc_runs(&self) -> u64 {
        self.gc_runs.load(Ordering::SeqCst)
    }

    fn charge(&self, bytes: usize, file: &str) -> Result<()> {
        let limit = self.memory_limit() as usize;
        let used = self.heap_used();
        if limit != 0 && used.saturating_add(bytes) > limit {
            tracing::debug!(file, used, bytes, limit, "heap ceiling reached");
            return Err(Exception::new(ExceptionKind::InternalError, "out of memory").into());
        }
        self.heap_used.fetch_add(bytes, Ordering::SeqCst);
        Ok(())
    }

    fn enter(&self, depth: usize, scope: &Scope, pos: Pos) -> Result<()> {
        let limit = self.max_stack_size() as usize;
        let over_ceiling = limit != 0 && depth.saturating_mul(FRAME_SIZE) > limit;
        if over_ceiling || depth > MAX_FRAMES {
            return Err(scope.error(
                ExceptionKind::RangeError,
                pos,
                "Maximum call stack size exceeded",
            ));
        }
        Ok(())
    }

    fn live_bytes(&self) -> usize {
        let globals: usize = self
            .globals
            .lock()
            .iter()
            .map(|(k, v)| k.len() + value_size(v))
            .sum();
        let modules: usize = self
            .loaded
            .lock()
            .values()
            .map(|rec| {
                value_size(&rec.completion)
                    + rec
                        .namespace
                        .iter()
                        .map(|(k, v)| k.len() + value_size(v))
                        .sum::<usize>()
            })
            .sum();
        globals + modules
    }

    fn load_module(&self, path: &str, source: &str) -> Result<ModuleRecord> {
        if !self.loading.lock().insert(path.to_string()) {
            return Err(Exception::new(
                ExceptionKind::InternalError,
                format!("circular import of module '{}'", path),
            )
            .into());
        }
        let result = self.instantiate(path, source);
        self.loading.lock().remove(path);

        if let Ok(record) = &result {
            self.loaded.lock().insert(path.to_string(), record.clone());
        }
        result
    }

    fn instantiate(&self, path: &str, source: &str) -> Result<ModuleRecord> {
        self.charge(source.len(), path)?;
        let program = parse(source, SourceKind::Module, path)?;
        let mut scope = Scope::new(path, SourceKind::Module);
        let completion = self.exec(&program, &mut scope)?;
        Ok(ModuleRecord {
            namespace: scope.exports,
            completion,
        })
    }

    fn resolve(&self, path: &str) -> Option<Result<ModuleRecord>> {
        if let Some(record) = self.loaded.lock().get(path) {
            return Some(Ok(record.clone()));
        }
        let source = self.sources.lock().get(path).cloned()?;
        Some(self.load_module(path, &source))
    }

    fn exec(&self, program: &Program, scope: &mut Scope) -> Result<Value> {
        let base = self.frames.load(Ordering::SeqCst);
        let depth = base + 1;
        let mut completion = Value::Null;
        for stmt in &program.stmts {
            match stmt {
                Stmt::Import { binding, path, pos } => {
                    let nested = base + NESTED_FRAMES;
                    self.enter(nested, scope, *pos)?;
                    self.frames.store(nested, Ordering::SeqCst);
                    let resolved = self.resolve(path);
                    self.frames.store(base, Ordering::SeqCst);
                    let record = match resolved {
                        Some(record) => record?,
                        None => {
                            return Err(scope.error(
                                ExceptionKind::ModuleNotFound,
                                *pos,
                                format!("could not load module '{}'", path),
                            ))
                        }
                    };
                    if let Some(name) = binding {
                        let value = record
                            .namespace
                            .get("default")
                            .cloned()
                            .unwrap_or(Value::Null);
                        self.bind(scope, name, value);
                    }
                    completion = Value::Null;
                }
                Stmt::ExportDefault(expr) => {
                    let value = self.eval(expr, scope, depth)?;
                    scope.exports.insert("default".to_string(), value.clone());
                    completion = value;
                }
                Stmt::Let(name, expr) => {
                    let value = self.eval(expr, scope, depth)?;
                    self.bind(scope, name, value);
                    completion = Value::Null;
                }
                Stmt::Throw(expr, pos) => {
                    let value = self.eval(expr, scope, depth)?;
                    return Err(scope.error(ExceptionKind::Thrown, *pos, display_text(&value)));
                }
                Stmt::Expr(expr) => completion = self.eval(expr, scope, depth)?,
            }
        }
        Ok(completion)
    }

    fn bind(&self, scope: &mut Scope, name: &str, value: Value) {
        match scope.kind {
            SourceKind::Script => {
                self.globals.lock().insert(name.to_string(), value);
            }
            SourceKind::Module => {
                scope.locals.insert(name.to_string(), value);
            }
        }
    }

    fn lookup(&self, scope: &Scope, name: &str) -> Option<Value> {
        scope
            .locals
            .get(name)
            .cloned()
            .or_else(|| self.global(name))
    }

    /// Host namespace named by `target`, unless a binding shadows it.
    fn host_namespace<'e>(&self, scope: &Scope, target: &'e Expr) -> Option<&'e str> {
        match target {
            Expr::Ident(ns, _)
                if self.registry.has_namespace(ns) && self.lookup(scope, ns).is_none() =>
            {
                Some(ns.as_str())
            }
            _ => None,
        }
    }

    fn call_host(&self, f: &HostFn, args: &[Value], depth: usize) -> Result<Value> {
        let ctx = ExecutionContext::new(self, &self.config.capabilities);
        let saved = self.frames.swap(depth + NESTED_FRAMES, Ordering::SeqCst);
        let result = f(args, &ctx);
        self.frames.store(saved, Ordering::SeqCst);
        result
    }

    fn eval(&self, expr: &Expr, scope: &mut Scope, depth: usize) -> Result<Value> {
        match expr {
            Expr::Int(i) => Ok(Value::Int(*i)),
            Expr::Float(f) => Ok(Value::Float(*f)),
            Expr::Str(s) => Ok(Value::String(s.clone())),
            Expr::Bool(b) => Ok(Value::Bool(*b)),
            Expr::Null => Ok(Value::Null),
            Expr::Ident(name, pos) => self.lookup(scope, name).ok_or_else(|| {
                scope.error(
                    ExceptionKind::ReferenceError,
                    *pos,
                    format!("{} is not defined", name),
                )
            }),
            Expr::Neg(inner, pos) => {
                self.enter(depth, scope, *pos)?;
                match self.eval(inner, scope, depth + 1)? {
                    Value::Int(i) => Ok(i
                        .checked_neg()
                        .map(Value::Int)
                        .unwrap_or(Value::Float(-(i as f64)))),
                    Value::Float(f) => Ok(Value::Float(-f)),
                    other => Err(scope.error(
                        ExceptionKind::TypeError,
                        *pos,
                        format!("cannot negate a value of type {}", other.value_type()),
                    )),
                }
            }
            Expr::Chain(head, tail) => {
                let pos = tail.first().map_or_else(Pos::default, |&(_, _, pos)| pos);
                self.enter(depth, scope, pos)?;
                let mut acc = self.eval(head, scope, depth + 1)?;
                for (op, operand, pos) in tail {
                    let value = self.eval(operand, scope, depth + 1)?;
                    acc = self.arith(*op, acc, value, scope, *pos)?;
                }
                Ok(acc)
            }
            Expr::Member(target, name, pos) => {
                self.enter(depth, scope, *pos)?;
                if let Some(ns) = self.host_namespace(scope, target) {
                    return match self.registry.get_property(ns, name) {
                        Some(getter) => self.call_host(getter, &[], depth),
                        None => Ok(Value::Null),
                    };
                }
                match self.eval(target, scope, depth + 1)? {
                    Value::Map(map) => Ok(map.get(name).cloned().unwrap_or(Value::Null)),
                    Value::String(s) if name == "length" => Ok(Value::Int(s.chars().count() as i64)),
                    Value::List(items) if name == "length" => Ok(Value::Int(items.len() as i64)),
                    Value::Null => Err(scope.error(
                        ExceptionKind::TypeError,
                        *pos,
                        format!("cannot read property '{}' of null", name),
                    )),
                    _ => Ok(Value::Null),
                }
            }
            Expr::Call(target, name, args, pos) => {
                self.enter(depth, scope, *pos)?;
                let f = self
                    .host_namespace(scope, target)
                    .and_then(|ns| self.registry.get_module(ns, name).cloned());
                let Some(f) = f else {
                    return Err(scope.error(
                        ExceptionKind::TypeError,
                        *pos,
                        format!("{} is not a function", name),
                    ));
                };
                let mut values = Vec::with_capacity(args.len());
                for arg in args {
                    values.push(self.eval(arg, scope, depth + 1)?);
                }
                self.call_host(&f, &values, depth)
            }
        }
    }

    fn arith(&self, op: BinOp, a: Value, b: Value, scope: &Scope, pos: Pos) -> Result<Value> {
        if op == BinOp::Add && (matches!(a, Value::String(_)) || matches!(b, Value::String(_))) {
            let joined = format!("{}{}", display_text(&a), display_text(&b));
            self.charge(joined.len(), &scope.file)?;
            return Ok(Value::String(joined));
        }

        let type_error = |a: &Value, b: &Value| {
            scope.error(
                ExceptionKind::TypeError,
                pos,
                format!(
                    "unsupported operand types: {} and {}",
                    a.value_type(),
                    b.value_type()
                ),
            )
        };

        if let (Value::Int(x), Value::Int(y)) = (&a, &b) {
            let (x, y) = (*x, *y);
            let exact = match op {
                BinOp::Add => x.checked_add(y),
                BinOp::Sub => x.checked_sub(y),
                BinOp::Mul => x.checked_mul(y),
                // Inexact, by zero, or i64::MIN / -1: take the float path.
                BinOp::Div => match x.checked_rem(y) {
                    Some(0) => x.checked_div(y),
                    _ => None,
                },
            };
            if let Some(n) = exact {
                return Ok(Value::Int(n));
            }
        }

        let (Some(x), Some(y)) = (a.as_float(), b.as_float()) else {
            return Err(type_error(&a, &b));
        };
        Ok(Value::Float(match op {
            BinOp::Add => x + y,
            BinOp::Sub => x - y,
            BinOp::Mul => x * y,
            BinOp::Div => x / y,
        }))
    }
}

impl ScriptRuntime for Engine {
    fn version(&self) -> &str {
        ENGINE_VERSION
    }

    fn eval_script(&self, source: &str, label: &str) -> Result<Value> {
        tracing::trace!(engine = self.id, label, bytes = source.len(), "eval script");
        self.charge(source.len(), label)?;
        let program = parse(source, SourceKind::Script, label)?;
        let mut scope = Scope::new(label, SourceKind::Script);
        self.exec(&program, &mut scope)
    }

    fn eval_module(&self, path: &str, source: Option<&str>, top_level: bool) -> Result<Value> {
        tracing::trace!(engine = self.id, path, top_level, "eval module");
        let record = match source {
            Some(source) => self.load_module(path, source)?,
            None => self.resolve(path).unwrap_or_else(|| {
                Err(Exception::new(
                    ExceptionKind::ModuleNotFound,
                    format!("could not load module '{}'", path),
                )
                .into())
            })?,
        };
        Ok(if top_level {
            record.completion
        } else {
            Value::Map(record.namespace)
        })
    }

    fn set_memory_limit(&self, limit: u32) {
        self.memory_limit.store(limit, Ordering::SeqCst);
    }

    fn set_max_stack_size(&self, size: u32) {
        self.max_stack_size.store(size, Ordering::SeqCst);
    }

    fn run_gc(&self) {
        let before = self.heap_used();
        let live = self.live_bytes();
        self.heap_used.store(live, Ordering::SeqCst);
        let runs = self.gc_runs.fetch_add(1, Ordering::SeqCst) + 1;
        tracing::debug!(engine = self.id, before, after = live, runs, "gc complete");
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("id", &self.id)
            .field("config", &self.config)
            .field("registry", &self.registry)
            .finish()
    }
}

fn display_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn value_size(value: &Value) -> usize {
    VALUE_OVERHEAD
        + match value {
            Value::String(s) => s.len(),
            Value::List(items) => items.iter().map(value_size).sum(),
            Value::Map(map) => map.iter().map(|(k, v)| k.len() + value_size(v)).sum(),
            _ => 0,
        }
}
