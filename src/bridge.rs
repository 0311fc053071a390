//! The `sys` bridge: process and runtime services exposed to scripts.
//!
//! [`SysBridge`] owns no runtime. Every operation receives the calling
//! runtime through an [`ExecutionContext`], checks the capability it needs,
//! and only then touches the primitive. [`SysBridge::install`] registers the
//! whole surface under the `sys` namespace of a [`HostRegistry`].

use std::collections::HashMap;
use std::ffi::OsString;
use std::sync::Arc;

use crate::capabilities::{Capabilities, Capability};
use crate::engine::{Engine, ExecutionContext, HostRegistry};
use crate::errno::SysErrorCode;
use crate::error::{Error, Result};
use crate::eval::{self, EvalRequest};
use crate::host_fn;
use crate::platform::{ExePath, HandleType, OsStdin, StdinProbe};
use crate::query::{run_query, BufferQuery};
use crate::runtime::ScriptRuntime;
use crate::tuner;
use crate::uuid::{self, OsRandom, RandomSource};
use crate::value::Value;
use crate::versions::{self, BuildInfo};

/// Namespace the bridge registers under.
pub const NAMESPACE: &str = "sys";

/// Configuration for a [`SysBridge`].
#[derive(Clone)]
pub struct BridgeConfig {
    /// Capabilities the host grants the bridge. An operation must be granted
    /// here and by the calling context.
    pub capabilities: Capabilities,
    /// Process arguments exposed as `sys.args`.
    pub args: Vec<String>,
    /// Heap ceiling applied at startup, if any.
    pub memory_limit: Option<u32>,
    /// Stack ceiling applied at startup, if any.
    pub max_stack_size: Option<u32>,
    /// I/O library version override.
    pub io_version: Option<String>,
    /// Transfer library version override.
    pub transfer_version: Option<String>,
    /// Interpreter version override.
    pub interpreter_version: Option<String>,
    random: Arc<dyn RandomSource + Send + Sync>,
    stdin: Arc<dyn StdinProbe + Send + Sync>,
    exe_path: Arc<dyn BufferQuery + Send + Sync>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            capabilities: Capabilities::all(),
            args: lossy_args(std::env::args_os()),
            memory_limit: None,
            max_stack_size: None,
            io_version: None,
            transfer_version: None,
            interpreter_version: None,
            random: Arc::new(OsRandom),
            stdin: Arc::new(OsStdin),
            exe_path: Arc::new(ExePath),
        }
    }
}

/// Process arguments as strings; invalid UTF-8 becomes U+FFFD.
fn lossy_args(args: impl IntoIterator<Item = OsString>) -> Vec<String> {
    args.into_iter()
        .map(|arg| arg.to_string_lossy().into_owned())
        .collect()
}

impl BridgeConfig {
    /// Create a new bridge configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Safe capabilities and conservative ceilings, for untrusted scripts.
    pub fn strict() -> Self {
        Self::default()
            .with_capabilities(Capabilities::safe_defaults())
            .with_memory_limit(16 * 1024 * 1024)
            .with_max_stack_size(256 * 1024)
    }

    /// Every capability, no startup ceilings.
    pub fn permissive() -> Self {
        Self::default().with_capabilities(Capabilities::all())
    }

    /// Set capabilities.
    pub fn with_capabilities(mut self, capabilities: Capabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Set the process arguments.
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Set the startup heap ceiling.
    pub fn with_memory_limit(mut self, bytes: u32) -> Self {
        self.memory_limit = Some(bytes);
        self
    }

    /// Set the startup stack ceiling.
    pub fn with_max_stack_size(mut self, bytes: u32) -> Self {
        self.max_stack_size = Some(bytes);
        self
    }

    /// Apply `--memory-limit` / `--stack-size` style option text.
    pub fn with_limit_options(
        mut self,
        memory_limit: Option<&str>,
        stack_size: Option<&str>,
    ) -> Result<Self> {
        if let Some(text) = memory_limit {
            self.memory_limit = Some(tuner::parse_limit_option(text, "--memory-limit")?);
        }
        if let Some(text) = stack_size {
            self.max_stack_size = Some(tuner::parse_limit_option(text, "--stack-size")?);
        }
        Ok(self)
    }

    /// Set the I/O library version reported in `sys.versions`.
    pub fn with_io_version(mut self, version: impl Into<String>) -> Self {
        self.io_version = Some(version.into());
        self
    }

    /// Set the transfer library version reported in `sys.versions`.
    pub fn with_transfer_version(mut self, version: impl Into<String>) -> Self {
        self.transfer_version = Some(version.into());
        self
    }

    /// Set the interpreter version reported in `sys.versions`.
    pub fn with_interpreter_version(mut self, version: impl Into<String>) -> Self {
        self.interpreter_version = Some(version.into());
        self
    }

    /// Use a different random source.
    pub fn with_random_source<R>(mut self, random: R) -> Self
    where
        R: RandomSource + Send + Sync + 'static,
    {
        self.random = Arc::new(random);
        self
    }

    /// Use a different standard-input probe.
    pub fn with_stdin_probe<P>(mut self, stdin: P) -> Self
    where
        P: StdinProbe + Send + Sync + 'static,
    {
        self.stdin = Arc::new(stdin);
        self
    }

    /// Use a different executable-path primitive.
    pub fn with_exe_path<Q>(mut self, exe_path: Q) -> Self
    where
        Q: BufferQuery + Send + Sync + 'static,
    {
        self.exe_path = Arc::new(exe_path);
        self
    }
}

impl std::fmt::Debug for BridgeConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BridgeConfig")
            .field("capabilities", &self.capabilities)
            .field("args", &self.args)
            .field("memory_limit", &self.memory_limit)
            .field("max_stack_size", &self.max_stack_size)
            .finish_non_exhaustive()
    }
}

/// The `sys` bridge.
#[derive(Debug)]
pub struct SysBridge {
    config: BridgeConfig,
}

impl SysBridge {
    /// Create a bridge.
    pub fn new(config: BridgeConfig) -> Self {
        Self { config }
    }

    /// The bridge configuration.
    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    fn require(&self, ctx: &ExecutionContext<'_>, cap: Capability) -> Result<()> {
        self.config.capabilities.require(cap)?;
        ctx.require_capability(cap)
    }

    /// Force a full collection.
    pub fn gc(&self, ctx: &ExecutionContext<'_>) -> Result<()> {
        self.require(ctx, Capability::Gc)?;
        tuner::gc(ctx.runtime());
        Ok(())
    }

    /// Evaluate the module at `path` as a top-level module.
    pub fn eval_file(&self, ctx: &ExecutionContext<'_>, path: &str) -> Result<Value> {
        self.evaluate(ctx, EvalRequest::file(path))
    }

    /// Evaluate `source` in global scope.
    pub fn eval_script(&self, ctx: &ExecutionContext<'_>, source: &str) -> Result<Value> {
        self.evaluate(ctx, EvalRequest::script(source))
    }

    /// Run an arbitrary evaluation request.
    pub fn evaluate(&self, ctx: &ExecutionContext<'_>, request: EvalRequest) -> Result<Value> {
        self.require(ctx, Capability::Eval)?;
        eval::evaluate(ctx.runtime(), request)
    }

    /// Whether standard input is an interactive terminal.
    pub fn is_stdin_tty(&self, ctx: &ExecutionContext<'_>) -> Result<bool> {
        self.require(ctx, Capability::StdinQuery)?;
        Ok(self.config.stdin.handle_type() == HandleType::Tty)
    }

    /// A fresh version-4 identifier.
    pub fn random_uuid(&self, ctx: &ExecutionContext<'_>) -> Result<String> {
        self.require(ctx, Capability::Random)?;
        uuid::random_uuid(self.config.random.as_ref())
    }

    /// Set the runtime heap ceiling.
    pub fn set_memory_limit(&self, ctx: &ExecutionContext<'_>, limit: u32) -> Result<()> {
        self.require(ctx, Capability::Limits)?;
        tuner::set_memory_limit(ctx.runtime(), limit);
        Ok(())
    }

    /// Set the runtime stack ceiling.
    pub fn set_max_stack_size(&self, ctx: &ExecutionContext<'_>, size: u32) -> Result<()> {
        self.require(ctx, Capability::Limits)?;
        tuner::set_max_stack_size(ctx.runtime(), size);
        Ok(())
    }

    /// Absolute path of the running executable.
    ///
    /// A path that is not valid UTF-8 fails with `EINVAL` rather than being
    /// altered, so the result always has exactly the bytes the OS reported.
    pub fn exepath(&self, ctx: &ExecutionContext<'_>) -> Result<String> {
        self.require(ctx, Capability::ExePath)?;
        let bytes = run_query(self.config.exe_path.as_ref())?;
        String::from_utf8(bytes).map_err(|_| {
            tracing::debug!("executable path is not valid UTF-8");
            Error::system(SysErrorCode::InvalidArgument)
        })
    }

    /// Process arguments.
    pub fn args(&self) -> &[String] {
        &self.config.args
    }

    /// Bridge version.
    pub fn version(&self) -> &'static str {
        versions::VERSION
    }

    /// Target operating system name.
    pub fn platform(&self) -> &'static str {
        std::env::consts::OS
    }

    /// Build metadata for `runtime`, with configured library overrides.
    pub fn build_info(&self, runtime: &dyn ScriptRuntime) -> BuildInfo {
        let mut info = BuildInfo::current(runtime.version());
        if let Some(v) = &self.config.io_version {
            info = info.with_io(v.clone());
        }
        if let Some(v) = &self.config.transfer_version {
            info = info.with_transfer(v.clone());
        }
        if let Some(v) = &self.config.interpreter_version {
            info = info.with_interpreter(v.clone());
        }
        info
    }

    /// Component versions exposed as `sys.versions`.
    pub fn versions(&self, runtime: &dyn ScriptRuntime) -> HashMap<String, Value> {
        self.build_info(runtime).versions()
    }

    /// Apply the configured startup ceilings to `runtime`.
    pub fn apply_startup_limits(&self, runtime: &dyn ScriptRuntime) {
        if let Some(limit) = self.config.memory_limit {
            tuner::set_memory_limit(runtime, limit);
        }
        if let Some(size) = self.config.max_stack_size {
            tuner::set_max_stack_size(runtime, size);
        }
    }

    /// Register the `sys` namespace in `registry`.
    ///
    /// Each entry checks its capability before unpacking arguments.
    pub fn install(self: &Arc<Self>, registry: &mut HostRegistry) {
        let b = Arc::clone(self);
        registry.register_module(NAMESPACE, "gc", host_fn!(ctx => b.gc(ctx)));

        let b = Arc::clone(self);
        registry.register_module(
            NAMESPACE,
            "evalFile",
            self.guarded(
                Capability::Eval,
                host_fn!(ctx, path: String => b.eval_file(ctx, &path)),
            ),
        );

        let b = Arc::clone(self);
        registry.register_module(
            NAMESPACE,
            "evalScript",
            self.guarded(
                Capability::Eval,
                host_fn!(ctx, source: String => b.eval_script(ctx, &source)),
            ),
        );

        let b = Arc::clone(self);
        registry.register_module(
            NAMESPACE,
            "isStdinTty",
            host_fn!(ctx => b.is_stdin_tty(ctx)),
        );

        let b = Arc::clone(self);
        registry.register_module(
            NAMESPACE,
            "randomUUID",
            host_fn!(ctx => b.random_uuid(ctx)),
        );

        let b = Arc::clone(self);
        registry.register_module(
            NAMESPACE,
            "setMemoryLimit",
            self.guarded(
                Capability::Limits,
                host_fn!(ctx, limit: u32 => b.set_memory_limit(ctx, limit)),
            ),
        );

        let b = Arc::clone(self);
        registry.register_module(
            NAMESPACE,
            "setMaxStackSize",
            self.guarded(
                Capability::Limits,
                host_fn!(ctx, size: u32 => b.set_max_stack_size(ctx, size)),
            ),
        );

        let b = Arc::clone(self);
        registry.register_property(NAMESPACE, "exepath", host_fn!(ctx => b.exepath(ctx)));

        let b = Arc::clone(self);
        registry.register_property(
            NAMESPACE,
            "args",
            host_fn!(_ctx => Ok::<_, crate::Error>(b.args().to_vec())),
        );

        let b = Arc::clone(self);
        registry.register_property(
            NAMESPACE,
            "version",
            host_fn!(_ctx => Ok::<_, crate::Error>(b.version())),
        );

        let b = Arc::clone(self);
        registry.register_property(
            NAMESPACE,
            "versions",
            host_fn!(ctx => Ok::<_, crate::Error>(b.versions(ctx.runtime()))),
        );

        let b = Arc::clone(self);
        registry.register_property(
            NAMESPACE,
            "platform",
            host_fn!(_ctx => Ok::<_, crate::Error>(b.platform())),
        );

        tracing::debug!(namespace = NAMESPACE, "sys bridge installed");
    }

    /// Check the engine version, apply startup ceilings, and install.
    pub fn attach(self: &Arc<Self>, engine: &mut Engine) -> Result<()> {
        versions::check_engine_version(engine.version())?;
        self.apply_startup_limits(&*engine);
        self.install(engine.registry_mut());
        Ok(())
    }

    fn guarded<F>(
        self: &Arc<Self>,
        cap: Capability,
        f: F,
    ) -> impl Fn(&[Value], &ExecutionContext<'_>) -> Result<Value> + Send + Sync + 'static
    where
        F: Fn(&[Value], &ExecutionContext<'_>) -> Result<Value> + Send + Sync + 'static,
    {
        let b = Arc::clone(self);
        move |args: &[Value], ctx: &ExecutionContext<'_>| {
            b.require(ctx, cap)?;
            f(args, ctx)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::EngineConfig;
    use crate::query::QueryStatus;

    fn attached(config: BridgeConfig, engine_config: EngineConfig) -> Engine {
        let mut engine = Engine::new(engine_config);
        Arc::new(SysBridge::new(config))
            .attach(&mut engine)
            .unwrap();
        engine
    }

    struct FixedStdin(HandleType);

    impl StdinProbe for FixedStdin {
        fn handle_type(&self) -> HandleType {
            self.0
        }
    }

    #[test]
    fn test_install_registers_surface() {
        let engine = attached(BridgeConfig::default(), EngineConfig::default());
        assert_eq!(
            engine.registry().names(NAMESPACE),
            vec![
                "args",
                "evalFile",
                "evalScript",
                "exepath",
                "gc",
                "isStdinTty",
                "platform",
                "randomUUID",
                "setMaxStackSize",
                "setMemoryLimit",
                "version",
                "versions",
            ]
        );
    }

    #[test]
    fn test_eval_script_from_script() {
        let engine = attached(BridgeConfig::default(), EngineConfig::default());
        let value = engine.eval_script("sys.evalScript('1+1')", "<t>").unwrap();
        assert_eq!(value, Value::Int(2));
    }

    #[test]
    fn test_limits_from_script() {
        let engine = attached(BridgeConfig::default(), EngineConfig::default());
        engine
            .eval_script("sys.setMemoryLimit(1048576); sys.setMaxStackSize(4096)", "<t>")
            .unwrap();
        assert_eq!(engine.memory_limit(), 1_048_576);
        assert_eq!(engine.max_stack_size(), 4096);

        let err = engine.eval_script("sys.setMaxStackSize(-1)", "<t>").unwrap_err();
        assert!(err.is_marshaling());
        assert_eq!(engine.max_stack_size(), 4096);
    }

    #[test]
    fn test_denied_before_marshaling() {
        let caps = Capabilities::all().without(Capability::Limits);
        let engine = attached(
            BridgeConfig::default(),
            EngineConfig::default().with_capabilities(caps),
        );
        let err = engine.eval_script("sys.setMaxStackSize(-1)", "<t>").unwrap_err();
        assert!(matches!(err, Error::CapabilityDenied { .. }));
    }

    #[test]
    fn test_bridge_capabilities_also_apply() {
        let config = BridgeConfig::default().with_capabilities(Capabilities::none());
        let engine = attached(config, EngineConfig::default());
        let err = engine.eval_script("sys.randomUUID()", "<t>").unwrap_err();
        assert!(matches!(err, Error::CapabilityDenied { ref capability } if capability == "sys:random"));
    }

    #[test]
    fn test_stdin_probe() {
        let tty = attached(
            BridgeConfig::default().with_stdin_probe(FixedStdin(HandleType::Tty)),
            EngineConfig::default(),
        );
        assert_eq!(tty.eval_script("sys.isStdinTty()", "<t>").unwrap(), Value::Bool(true));

        let pipe = attached(
            BridgeConfig::default().with_stdin_probe(FixedStdin(HandleType::Pipe)),
            EngineConfig::default(),
        );
        assert_eq!(pipe.eval_script("sys.isStdinTty()", "<t>").unwrap(), Value::Bool(false));
    }

    #[test]
    fn test_exepath_failure_is_translated() {
        let config = BridgeConfig::default()
            .with_exe_path(|_buf: &mut [u8]| QueryStatus::Failed(SysErrorCode::AccessDenied));
        let engine = attached(config, EngineConfig::default());
        let err = engine.eval_script("sys.exepath", "<t>").unwrap_err();
        assert_eq!(err.sys_code(), Some(SysErrorCode::AccessDenied));
    }

    #[test]
    fn test_exepath_must_be_utf8() {
        let config = BridgeConfig::default().with_exe_path(|buf: &mut [u8]| {
            let path = b"/opt/\xff/fsx";
            buf[..path.len()].copy_from_slice(path);
            QueryStatus::Filled(path.len())
        });
        let engine = attached(config, EngineConfig::default());
        let err = engine.eval_script("sys.exepath", "<t>").unwrap_err();
        assert_eq!(err.sys_code(), Some(SysErrorCode::InvalidArgument));
    }

    #[cfg(unix)]
    #[test]
    fn test_non_utf8_args_are_replaced() {
        use std::os::unix::ffi::OsStringExt;

        let args = lossy_args([
            OsString::from("fsx"),
            OsString::from_vec(b"caf\xe9.fsx".to_vec()),
        ]);
        assert_eq!(args, vec!["fsx".to_string(), "caf\u{fffd}.fsx".to_string()]);
        assert_eq!(BridgeConfig::default().args, lossy_args(std::env::args_os()));
    }

    #[test]
    fn test_properties() {
        let config = BridgeConfig::default()
            .with_args(["fsx", "main.fsx"])
            .with_io_version("1.48.0");
        let engine = attached(config, EngineConfig::default());

        assert_eq!(
            engine.eval_script("sys.args", "<t>").unwrap(),
            Value::List(vec![Value::from("fsx"), Value::from("main.fsx")])
        );
        assert_eq!(
            engine.eval_script("sys.version", "<t>").unwrap(),
            Value::from(versions::VERSION)
        );
        assert_eq!(
            engine.eval_script("sys.platform", "<t>").unwrap(),
            Value::from(std::env::consts::OS)
        );
        assert_eq!(
            engine.eval_script("sys.versions.io", "<t>").unwrap(),
            Value::from("1.48.0")
        );
        assert_eq!(
            engine.eval_script("sys.versions.engine", "<t>").unwrap(),
            Value::from(crate::engine::ENGINE_VERSION)
        );
    }

    #[test]
    fn test_startup_limits() {
        let config = BridgeConfig::default()
            .with_limit_options(Some("2097152"), Some("65536"))
            .unwrap();
        let engine = attached(config, EngineConfig::default());
        assert_eq!(engine.memory_limit(), 2_097_152);
        assert_eq!(engine.max_stack_size(), 65_536);

        let err = BridgeConfig::default()
            .with_limit_options(None, Some("big"))
            .unwrap_err();
        assert!(err.to_string().contains("Invalid number big for option --stack-size"));
    }

    #[test]
    fn test_direct_calls() {
        let engine = Engine::new(EngineConfig::default());
        let caps = Capabilities::all();
        let ctx = ExecutionContext::new(&engine, &caps);
        let bridge = SysBridge::new(BridgeConfig::default());

        bridge.gc(&ctx).unwrap();
        assert_eq!(engine.gc_runs(), 1);
        assert_eq!(bridge.random_uuid(&ctx).unwrap().len(), 36);
        assert!(!bridge.exepath(&ctx).unwrap().is_empty());
    }
}
