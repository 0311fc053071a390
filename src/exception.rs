//! Exceptions raised by the hosting runtime during evaluation.

use std::fmt;

/// Classification of a runtime exception.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExceptionKind {
    /// Source could not be parsed.
    SyntaxError,
    /// Reference to an unknown binding.
    ReferenceError,
    /// Operation applied to a value of the wrong type.
    TypeError,
    /// Value or depth outside the permitted range.
    RangeError,
    /// Runtime-internal failure such as heap exhaustion.
    InternalError,
    /// A module import could not be resolved.
    ModuleNotFound,
    /// A value raised by script code.
    Thrown,
}

impl fmt::Display for ExceptionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ExceptionKind::SyntaxError => "SyntaxError",
            ExceptionKind::ReferenceError => "ReferenceError",
            ExceptionKind::TypeError => "TypeError",
            ExceptionKind::RangeError => "RangeError",
            ExceptionKind::InternalError => "InternalError",
            ExceptionKind::ModuleNotFound => "ModuleNotFound",
            ExceptionKind::Thrown => "Error",
        };
        f.write_str(name)
    }
}

/// Where an exception was raised.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Location {
    /// Source label: a module path or a synthetic label like `<evalScript>`.
    pub file: String,
    /// 1-based line.
    pub line: u32,
    /// 1-based column.
    pub column: u32,
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.file, self.line, self.column)
    }
}

/// An exception produced by the runtime.
///
/// The bridge never rewrites these: whatever the runtime raised, including
/// its location and stack, reaches the caller unchanged.
#[derive(Debug, Clone, PartialEq)]
pub struct Exception {
    /// Exception kind.
    pub kind: ExceptionKind,
    /// Human-readable message.
    pub message: String,
    /// Where it was raised, when known.
    pub location: Option<Location>,
    /// Frames from innermost to outermost, as rendered by the runtime.
    pub stack: Vec<String>,
}

impl Exception {
    /// Create an exception without location information.
    pub fn new(kind: ExceptionKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            location: None,
            stack: Vec::new(),
        }
    }

    /// Attach a source location.
    pub fn at(mut self, file: impl Into<String>, line: u32, column: u32) -> Self {
        self.location = Some(Location {
            file: file.into(),
            line,
            column,
        });
        self
    }

    /// Push a stack frame (innermost first).
    pub fn with_frame(mut self, frame: impl Into<String>) -> Self {
        self.stack.push(frame.into());
        self
    }

    /// Returns true if this is a parse failure.
    pub fn is_syntax_error(&self) -> bool {
        self.kind == ExceptionKind::SyntaxError
    }
}

impl fmt::Display for Exception {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)?;
        if let Some(loc) = &self.location {
            write!(f, " (at {})", loc)?;
        }
        Ok(())
    }
}

impl std::error::Error for Exception {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_with_location() {
        let exc = Exception::new(ExceptionKind::SyntaxError, "unexpected end of input")
            .at("<evalScript>", 1, 2);
        assert_eq!(
            exc.to_string(),
            "SyntaxError: unexpected end of input (at <evalScript>:1:2)"
        );
        assert!(exc.is_syntax_error());
    }

    #[test]
    fn test_thrown_displays_as_error() {
        let exc = Exception::new(ExceptionKind::Thrown, "boom").with_frame("at main.fsx:3");
        assert_eq!(exc.to_string(), "Error: boom");
        assert_eq!(exc.stack, vec!["at main.fsx:3".to_string()]);
    }
}
