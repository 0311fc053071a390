//! Build metadata and engine version compatibility.

use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::value::Value;

/// Crate version for compatibility checks.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Minimum supported engine version, inclusive.
pub const MIN_ENGINE_VERSION: &str = "0.18.0";

/// First engine version no longer supported. Every 0.19.x release is
/// accepted.
pub const MAX_ENGINE_VERSION: &str = "0.20.0";

/// `major.minor` of a version string; the patch level is not consulted.
fn major_minor(version: &str) -> Option<(u32, u32)> {
    let mut parts = version.split('.');
    let major = parts.next()?.parse().ok()?;
    let minor = parts.next()?.parse().ok()?;
    Some((major, minor))
}

/// Check if an engine version is compatible with this bridge.
pub fn is_compatible_version(version: &str) -> bool {
    match (
        major_minor(MIN_ENGINE_VERSION),
        major_minor(MAX_ENGINE_VERSION),
        major_minor(version),
    ) {
        (Some(min), Some(max), Some(v)) => min <= v && v < max,
        _ => false,
    }
}

/// Fail with `VersionMismatch` unless `version` is supported.
pub fn check_engine_version(version: &str) -> Result<()> {
    if is_compatible_version(version) {
        Ok(())
    } else {
        Err(Error::version_mismatch(
            format!(">={}, <{}", MIN_ENGINE_VERSION, MAX_ENGINE_VERSION),
            version,
        ))
    }
}

/// Version strings fixed at build time.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde-support", derive(serde::Serialize))]
pub struct BuildInfo {
    /// This crate's version.
    pub bridge: String,
    /// Version reported by the script engine.
    pub engine: String,
    /// Event-loop / I/O library version, if known.
    #[cfg_attr(feature = "serde-support", serde(skip_serializing_if = "Option::is_none"))]
    pub io: Option<String>,
    /// Transfer library version, if known.
    #[cfg_attr(feature = "serde-support", serde(skip_serializing_if = "Option::is_none"))]
    pub transfer: Option<String>,
    /// Bytecode interpreter version, if known.
    #[cfg_attr(feature = "serde-support", serde(skip_serializing_if = "Option::is_none"))]
    pub interpreter: Option<String>,
    /// Target operating system.
    pub platform: String,
}

impl BuildInfo {
    /// Metadata for this build, paired with `engine_version`.
    pub fn current(engine_version: &str) -> Self {
        Self {
            bridge: VERSION.to_string(),
            engine: engine_version.to_string(),
            io: option_env!("FUSABI_SYS_IO_VERSION").map(str::to_string),
            transfer: option_env!("FUSABI_SYS_TRANSFER_VERSION").map(str::to_string),
            interpreter: option_env!("FUSABI_SYS_INTERPRETER_VERSION").map(str::to_string),
            platform: std::env::consts::OS.to_string(),
        }
    }

    /// Set the I/O library version.
    pub fn with_io(mut self, version: impl Into<String>) -> Self {
        self.io = Some(version.into());
        self
    }

    /// Set the transfer library version.
    pub fn with_transfer(mut self, version: impl Into<String>) -> Self {
        self.transfer = Some(version.into());
        self
    }

    /// Set the interpreter version.
    pub fn with_interpreter(mut self, version: impl Into<String>) -> Self {
        self.interpreter = Some(version.into());
        self
    }

    /// The component map exposed to scripts as `sys.versions`.
    ///
    /// Keys are `bridge`, `engine`, and whichever library versions are known.
    pub fn versions(&self) -> HashMap<String, Value> {
        let mut map = HashMap::new();
        map.insert("bridge".to_string(), Value::from(self.bridge.as_str()));
        map.insert("engine".to_string(), Value::from(self.engine.as_str()));
        let optional = [
            ("io", &self.io),
            ("transfer", &self.transfer),
            ("interpreter", &self.interpreter),
        ];
        for (key, version) in optional {
            if let Some(v) = version {
                map.insert(key.to_string(), Value::from(v.as_str()));
            }
        }
        map
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_compatibility() {
        assert!(is_compatible_version("0.18.0"));
        assert!(is_compatible_version("0.18.5"));
        assert!(is_compatible_version("0.19.0"));
        assert!(is_compatible_version("0.19.7"));
        assert!(!is_compatible_version("0.17.0"));
        assert!(!is_compatible_version("0.20.0"));
        assert!(!is_compatible_version("1.0.0"));
        assert!(!is_compatible_version("invalid"));
    }

    #[test]
    fn test_check_engine_version() {
        assert!(check_engine_version("0.18.4").is_ok());
        assert!(check_engine_version("0.19.7").is_ok());

        let err = check_engine_version("2.0.0").unwrap_err();
        assert!(matches!(err, Error::VersionMismatch { .. }));
        assert_eq!(
            err.to_string(),
            "version incompatibility: expected >=0.18.0, <0.20.0, got 2.0.0"
        );
        assert!(check_engine_version(MAX_ENGINE_VERSION).is_err());
        assert!(check_engine_version(MIN_ENGINE_VERSION).is_ok());
    }

    #[test]
    fn test_versions_omit_unknown_libraries() {
        let mut info = BuildInfo::current("0.18.4");
        info.io = None;
        info.transfer = None;
        info.interpreter = None;
        let info = info.with_io("1.48.0");

        let map = info.versions();
        assert_eq!(map.get("io"), Some(&Value::from("1.48.0")));
        assert_eq!(map.get("engine"), Some(&Value::from("0.18.4")));
        assert!(!map.contains_key("transfer"));
        assert!(!map.contains_key("interpreter"));
        assert_eq!(info.platform, std::env::consts::OS);
    }

    #[cfg(feature = "serde-support")]
    #[test]
    fn test_build_info_serializes_without_unknowns() {
        let mut info = BuildInfo::current("0.18.4");
        info.transfer = None;
        let json = serde_json::to_value(&info).unwrap();
        assert_eq!(json["engine"], "0.18.4");
        assert!(json.get("transfer").is_none());
    }
}
