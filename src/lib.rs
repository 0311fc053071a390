//! # fusabi-sys
//!
//! The `sys` bridge for Fusabi hosts: process and runtime services exposed to
//! scripts as a `sys` namespace.
//!
//! This crate provides:
//! - **Evaluation dispatch** for module files and global scripts
//! - **Runtime tuning** of heap and stack ceilings, plus forced collection
//! - **Process facts** such as the executable path, stdin kind, arguments,
//!   and build versions
//! - **Random identifiers** (RFC 4122 version 4) from the OS secure source
//! - **Capability gating** checked before any argument is unpacked
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use fusabi_sys::{BridgeConfig, Engine, EngineConfig, ScriptRuntime, SysBridge};
//!
//! let mut engine = Engine::new(EngineConfig::default());
//! let bridge = Arc::new(SysBridge::new(BridgeConfig::default()));
//! bridge.attach(&mut engine)?;
//!
//! let id = engine.eval_script("sys.randomUUID()", "<repl>")?;
//! ```
//!
//! ## Feature Flags
//!
//! - `serde-support` (default): Value↔Serde conversion helpers and
//!   serializable [`BuildInfo`]

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

mod bridge;
mod capabilities;
mod convert;
mod engine;
mod errno;
mod error;
mod eval;
mod exception;
pub mod macros;
mod platform;
mod query;
mod runtime;
mod script;
mod tuner;
mod uuid;
mod value;
mod versions;

pub use bridge::{BridgeConfig, SysBridge, NAMESPACE};
pub use capabilities::{Capabilities, Capability};
pub use convert::{FromValue, IntoValue, ValueConversionError};

#[cfg(feature = "serde-support")]
pub use convert::{from_value_serde, to_value_serde};
pub use engine::{
    Engine, EngineConfig, ExecutionContext, HostFn, HostRegistry, DEFAULT_STACK_SIZE,
    ENGINE_VERSION, FRAME_SIZE, MAX_FRAMES, NESTED_FRAMES,
};
pub use errno::{translate, SysError, SysErrorCode};
pub use error::{Error, Result};
pub use eval::{evaluate, EvalRequest, SCRIPT_LABEL};
pub use exception::{Exception, ExceptionKind, Location};
pub use macros::ArgError;
pub use platform::{ExePath, HandleType, OsStdin, StdinProbe};
pub use query::{run_query, run_query_with, BufferQuery, QueryStatus, DEFAULT_PROBE_SIZE};
pub use runtime::ScriptRuntime;
pub use tuner::parse_limit_option;
pub use uuid::{random_uuid, OsRandom, RandomSource, Uuid};
pub use value::{Value, ValueType};
pub use versions::{
    check_engine_version, is_compatible_version, BuildInfo, MAX_ENGINE_VERSION,
    MIN_ENGINE_VERSION, VERSION,
};
