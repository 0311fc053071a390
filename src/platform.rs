//! Platform primitives: executable path and standard-input handle type.

use std::borrow::Cow;
use std::path::Path;

use crate::errno::SysErrorCode;
use crate::query::{BufferQuery, QueryStatus};

/// Resolves the running executable's path.
///
/// Follows the size-negotiation protocol: when the caller buffer is too
/// small it reports the exact length of the path instead of truncating.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExePath;

impl BufferQuery for ExePath {
    fn query(&self, buf: &mut [u8]) -> QueryStatus {
        let path = match std::env::current_exe() {
            Ok(path) => path,
            Err(e) => return QueryStatus::Failed(SysErrorCode::from_io(&e)),
        };
        let bytes = path_bytes(&path);
        if bytes.len() > buf.len() {
            return QueryStatus::Insufficient {
                required: bytes.len(),
            };
        }
        buf[..bytes.len()].copy_from_slice(&bytes);
        QueryStatus::Filled(bytes.len())
    }
}

#[cfg(unix)]
fn path_bytes(path: &Path) -> Cow<'_, [u8]> {
    use std::os::unix::ffi::OsStrExt;
    Cow::Borrowed(path.as_os_str().as_bytes())
}

#[cfg(not(unix))]
fn path_bytes(path: &Path) -> Cow<'_, [u8]> {
    match path.to_string_lossy() {
        Cow::Borrowed(s) => Cow::Borrowed(s.as_bytes()),
        Cow::Owned(s) => Cow::Owned(s.into_bytes()),
    }
}

/// Kind of object behind a file descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleType {
    /// Interactive terminal.
    Tty,
    /// Regular file or non-terminal character device.
    File,
    /// Anonymous or named pipe.
    Pipe,
    /// Socket.
    Socket,
    /// Closed, invalid, or unclassifiable.
    Unknown,
}

/// Source of the standard-input handle type.
pub trait StdinProbe {
    /// Classify standard input.
    fn handle_type(&self) -> HandleType;
}

/// Probes the real process standard input.
#[derive(Debug, Clone, Copy, Default)]
pub struct OsStdin;

impl StdinProbe for OsStdin {
    fn handle_type(&self) -> HandleType {
        guess_stdin()
    }
}

#[cfg(unix)]
fn guess_stdin() -> HandleType {
    let fd = libc::STDIN_FILENO;
    // SAFETY: `st` is a plain C struct; fstat only writes into it.
    let mut st: libc::stat = unsafe { std::mem::zeroed() };
    if unsafe { libc::fstat(fd, &mut st) } != 0 {
        return HandleType::Unknown;
    }
    match st.st_mode & libc::S_IFMT {
        libc::S_IFCHR => {
            // SAFETY: isatty has no preconditions beyond a valid fd number.
            if unsafe { libc::isatty(fd) } == 1 {
                HandleType::Tty
            } else {
                HandleType::File
            }
        }
        libc::S_IFREG => HandleType::File,
        libc::S_IFIFO => HandleType::Pipe,
        libc::S_IFSOCK => HandleType::Socket,
        _ => HandleType::Unknown,
    }
}

#[cfg(not(unix))]
fn guess_stdin() -> HandleType {
    use std::io::IsTerminal;
    if std::io::stdin().is_terminal() {
        HandleType::Tty
    } else {
        HandleType::Unknown
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::{run_query, run_query_with};

    #[test]
    fn test_exepath_matches_current_exe() {
        let expected = std::env::current_exe().unwrap();
        let bytes = run_query(&ExePath).unwrap();
        assert_eq!(bytes.as_slice(), &*path_bytes(&expected));
    }

    #[test]
    fn test_exepath_through_tiny_probe() {
        let full = run_query(&ExePath).unwrap();
        let resized = run_query_with::<4, _>(&ExePath).unwrap();
        assert!(resized.len() > 4);
        assert_eq!(resized, full);
    }

    #[test]
    fn test_stdin_probe_does_not_fail() {
        // Under a test harness stdin may be anything; it just has to classify.
        let kind = OsStdin.handle_type();
        assert!(matches!(
            kind,
            HandleType::Tty
                | HandleType::File
                | HandleType::Pipe
                | HandleType::Socket
                | HandleType::Unknown
        ));
    }
}
