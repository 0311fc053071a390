//! Platform error codes and their translation into script-visible errors.

use std::fmt;

/// Closed set of platform error codes the bridge can surface.
///
/// Codes the bridge does not name explicitly are carried as [`SysErrorCode::Other`]
/// with the raw OS value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SysErrorCode {
    /// Caller buffer too small (`ENOBUFS`).
    NoBufferSpace,
    /// Invalid argument (`EINVAL`).
    InvalidArgument,
    /// Not enough memory (`ENOMEM`).
    OutOfMemory,
    /// Low-level I/O failure (`EIO`).
    Io,
    /// Resource temporarily unavailable (`EAGAIN`).
    WouldBlock,
    /// Operation not supported on this platform (`ENOSYS`).
    NotSupported,
    /// Operation not permitted (`EPERM`).
    PermissionDenied,
    /// Permission denied (`EACCES`).
    AccessDenied,
    /// No such file or directory (`ENOENT`).
    NotFound,
    /// Interrupted system call (`EINTR`).
    Interrupted,
    /// Any other raw OS error code.
    Other(i32),
}

impl SysErrorCode {
    /// Symbolic name, e.g. `ENOBUFS`.
    pub fn name(&self) -> &'static str {
        match self {
            SysErrorCode::NoBufferSpace => "ENOBUFS",
            SysErrorCode::InvalidArgument => "EINVAL",
            SysErrorCode::OutOfMemory => "ENOMEM",
            SysErrorCode::Io => "EIO",
            SysErrorCode::WouldBlock => "EAGAIN",
            SysErrorCode::NotSupported => "ENOSYS",
            SysErrorCode::PermissionDenied => "EPERM",
            SysErrorCode::AccessDenied => "EACCES",
            SysErrorCode::NotFound => "ENOENT",
            SysErrorCode::Interrupted => "EINTR",
            SysErrorCode::Other(_) => "EUNKNOWN",
        }
    }

    /// Map a raw OS error code onto the closed set.
    #[cfg(unix)]
    pub fn from_raw(code: i32) -> Self {
        match code {
            libc::ENOBUFS => SysErrorCode::NoBufferSpace,
            libc::EINVAL => SysErrorCode::InvalidArgument,
            libc::ENOMEM => SysErrorCode::OutOfMemory,
            libc::EIO => SysErrorCode::Io,
            libc::EAGAIN => SysErrorCode::WouldBlock,
            libc::ENOSYS => SysErrorCode::NotSupported,
            libc::EPERM => SysErrorCode::PermissionDenied,
            libc::EACCES => SysErrorCode::AccessDenied,
            libc::ENOENT => SysErrorCode::NotFound,
            libc::EINTR => SysErrorCode::Interrupted,
            other => SysErrorCode::Other(other),
        }
    }

    /// Map a raw OS error code onto the closed set.
    #[cfg(not(unix))]
    pub fn from_raw(code: i32) -> Self {
        SysErrorCode::Other(code)
    }

    /// Map an I/O error, preferring its raw OS code when one is attached.
    pub fn from_io(err: &std::io::Error) -> Self {
        if let Some(code) = err.raw_os_error() {
            return Self::from_raw(code);
        }
        match err.kind() {
            std::io::ErrorKind::NotFound => SysErrorCode::NotFound,
            std::io::ErrorKind::PermissionDenied => SysErrorCode::AccessDenied,
            std::io::ErrorKind::InvalidInput | std::io::ErrorKind::InvalidData => {
                SysErrorCode::InvalidArgument
            }
            std::io::ErrorKind::OutOfMemory => SysErrorCode::OutOfMemory,
            std::io::ErrorKind::WouldBlock => SysErrorCode::WouldBlock,
            std::io::ErrorKind::Interrupted => SysErrorCode::Interrupted,
            std::io::ErrorKind::Unsupported => SysErrorCode::NotSupported,
            _ => SysErrorCode::Io,
        }
    }
}

impl fmt::Display for SysErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SysErrorCode::Other(code) => write!(f, "{} ({})", self.name(), code),
            _ => write!(f, "{}", self.name()),
        }
    }
}

/// A translated platform failure: the code plus a human-readable message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SysError {
    /// The platform error code.
    pub code: SysErrorCode,
    /// Message derived from the code.
    pub message: String,
}

impl fmt::Display for SysError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code.name(), self.message)
    }
}

impl std::error::Error for SysError {}

/// Translate a platform error code into a [`SysError`].
///
/// Pure: the same code always yields the same message.
pub fn translate(code: SysErrorCode) -> SysError {
    let message = match code {
        SysErrorCode::NoBufferSpace => "no buffer space available".to_string(),
        SysErrorCode::InvalidArgument => "invalid argument".to_string(),
        SysErrorCode::OutOfMemory => "not enough memory".to_string(),
        SysErrorCode::Io => "i/o error".to_string(),
        SysErrorCode::WouldBlock => "resource temporarily unavailable".to_string(),
        SysErrorCode::NotSupported => "function not implemented".to_string(),
        SysErrorCode::PermissionDenied => "operation not permitted".to_string(),
        SysErrorCode::AccessDenied => "permission denied".to_string(),
        SysErrorCode::NotFound => "no such file or directory".to_string(),
        SysErrorCode::Interrupted => "interrupted system call".to_string(),
        SysErrorCode::Other(raw) => std::io::Error::from_raw_os_error(raw).to_string(),
    };
    SysError { code, message }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_translate_is_stable() {
        let a = translate(SysErrorCode::NoBufferSpace);
        let b = translate(SysErrorCode::NoBufferSpace);
        assert_eq!(a, b);
        assert_eq!(a.to_string(), "ENOBUFS: no buffer space available");
    }

    #[test]
    fn test_other_code_keeps_raw_value() {
        let err = translate(SysErrorCode::Other(9999));
        assert_eq!(err.code, SysErrorCode::Other(9999));
        assert!(!err.message.is_empty());
        assert_eq!(err.code.to_string(), "EUNKNOWN (9999)");
    }

    #[cfg(unix)]
    #[test]
    fn test_from_raw_unix() {
        assert_eq!(SysErrorCode::from_raw(libc::ENOBUFS), SysErrorCode::NoBufferSpace);
        assert_eq!(SysErrorCode::from_raw(libc::EINVAL), SysErrorCode::InvalidArgument);
        assert_eq!(SysErrorCode::from_raw(libc::ENOENT), SysErrorCode::NotFound);
    }

    #[test]
    fn test_from_io_without_raw_code() {
        let err = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        assert_eq!(SysErrorCode::from_io(&err), SysErrorCode::NotFound);

        let err = std::io::Error::new(std::io::ErrorKind::Other, "???");
        assert_eq!(SysErrorCode::from_io(&err), SysErrorCode::Io);
    }
}
