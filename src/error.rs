//! Error types for fusabi-sys operations.

use thiserror::Error;

use crate::convert::ValueConversionError;
use crate::errno::{translate, SysError, SysErrorCode};
use crate::exception::Exception;
use crate::macros::ArgError;

/// Result type alias using [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during bridge operations.
#[derive(Error, Debug)]
pub enum Error {
    /// A platform primitive failed.
    #[error("system error: {0}")]
    System(SysError),

    /// An argument could not be marshaled from the script value model.
    #[error("invalid argument: {0}")]
    Argument(#[from] ArgError),

    /// Value conversion failed.
    #[error("value conversion error: {0}")]
    ValueConversion(#[from] ValueConversionError),

    /// Exception raised by the runtime while evaluating code.
    ///
    /// Displayed exactly as the runtime rendered it.
    #[error("{0}")]
    Evaluation(Exception),

    /// A buffer allocation failed.
    #[error("out of memory: failed to allocate {requested} bytes")]
    OutOfMemory {
        /// Number of bytes that could not be allocated.
        requested: usize,
    },

    /// Capability was denied.
    #[error("capability denied: {capability}")]
    CapabilityDenied {
        /// The capability that was denied.
        capability: String,
    },

    /// Version incompatibility.
    #[error("version incompatibility: expected {expected}, got {actual}")]
    VersionMismatch {
        /// Expected version range.
        expected: String,
        /// Actual version.
        actual: String,
    },

    /// Invalid configuration.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl Error {
    /// Create a system error from a platform code.
    pub fn system(code: SysErrorCode) -> Self {
        Self::System(translate(code))
    }

    /// Create a capability denied error.
    pub fn capability_denied(capability: impl Into<String>) -> Self {
        Self::CapabilityDenied {
            capability: capability.into(),
        }
    }

    /// Create an invalid config error.
    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }

    /// Create a version mismatch error.
    pub fn version_mismatch(expected: impl Into<String>, actual: impl Into<String>) -> Self {
        Self::VersionMismatch {
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    /// The platform code, if this is a system error.
    pub fn sys_code(&self) -> Option<SysErrorCode> {
        match self {
            Self::System(err) => Some(err.code),
            _ => None,
        }
    }

    /// The runtime exception, if this is an evaluation error.
    pub fn exception(&self) -> Option<&Exception> {
        match self {
            Self::Evaluation(exc) => Some(exc),
            _ => None,
        }
    }

    /// Returns true if the failure happened while marshaling arguments.
    pub fn is_marshaling(&self) -> bool {
        matches!(self, Self::Argument(_) | Self::ValueConversion(_))
    }
}

impl From<SysErrorCode> for Error {
    fn from(code: SysErrorCode) -> Self {
        Self::system(code)
    }
}

impl From<Exception> for Error {
    fn from(exc: Exception) -> Self {
        Self::Evaluation(exc)
    }
}
