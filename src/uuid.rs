//! Random version-4 identifiers.

use std::fmt;

use crate::errno::SysErrorCode;
use crate::error::{Error, Result};

/// A source of cryptographically secure random bytes.
pub trait RandomSource {
    /// Fill `buf` entirely, or fail with the platform code.
    fn fill(&self, buf: &mut [u8]) -> std::result::Result<(), SysErrorCode>;
}

/// The operating system's secure random source.
#[derive(Debug, Clone, Copy, Default)]
pub struct OsRandom;

impl RandomSource for OsRandom {
    fn fill(&self, buf: &mut [u8]) -> std::result::Result<(), SysErrorCode> {
        getrandom::getrandom(buf).map_err(|e| match e.raw_os_error() {
            Some(code) => SysErrorCode::from_raw(code),
            None if e == getrandom::Error::UNSUPPORTED => SysErrorCode::NotSupported,
            None => SysErrorCode::Io,
        })
    }
}

/// A 16-byte RFC 4122 version-4 identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Uuid([u8; 16]);

impl Uuid {
    /// Draw a fresh identifier from `source`.
    ///
    /// A failed draw is an error; there is no fallback identifier.
    pub fn new_v4<R: RandomSource + ?Sized>(source: &R) -> Result<Self> {
        let mut bytes = [0u8; 16];
        source.fill(&mut bytes).map_err(Error::system)?;
        Ok(Self::from_random_bytes(bytes))
    }

    /// Stamp version and variant bits onto raw random bytes.
    pub fn from_random_bytes(mut bytes: [u8; 16]) -> Self {
        bytes[6] = (bytes[6] & 0x0f) | 0x40;
        bytes[8] = (bytes[8] & 0x3f) | 0x80;
        Self(bytes)
    }

    /// The raw bytes.
    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }

    /// Version nibble (always 4 for generated identifiers).
    pub fn version(&self) -> u8 {
        self.0[6] >> 4
    }
}

impl fmt::Display for Uuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, b) in self.0.iter().enumerate() {
            if matches!(i, 4 | 6 | 8 | 10) {
                f.write_str("-")?;
            }
            write!(f, "{:02x}", b)?;
        }
        Ok(())
    }
}

/// Generate a random identifier in its 36-character canonical form.
pub fn random_uuid<R: RandomSource + ?Sized>(source: &R) -> Result<String> {
    Uuid::new_v4(source).map(|u| u.to_string())
}
