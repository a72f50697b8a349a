//! Error types returned by the template engine.
//!
//! Every fallible operation in this crate returns a [`Result<T, Error>`] rather than a
//! sentinel value; nothing here panics outside of `#[cfg(test)]` code.

use std::fmt;

/// The categorized failure modes of the engine, matching the error categories a
/// CTemplate-compatible engine is expected to distinguish: malformed marker syntax,
/// mismatched dictionary mutations, and I/O failures loading a template from disk. A
/// modifier function's contract (append bytes to the output buffer; never mutate or
/// retain its arguments) has no failure mode of its own, so there is no corresponding
/// variant here.
#[derive(Debug)]
pub enum Error {
    /// A marker, modifier suffix, or set-delimiter directive violates the template
    /// grammar. Carries the 1-based line number and a short description of what was
    /// found.
    Syntax { line: usize, message: String },
    /// A dictionary mutation was attempted against an entry of the wrong kind, e.g.
    /// `add_dictionary` on a marker that already holds a `String`.
    TypeMismatch { marker: String },
    /// A template could not be read from disk.
    Io { path: String, source: std::io::Error },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Syntax { line, message } => write!(f, "line {line}: {message}"),
            Error::TypeMismatch { marker } => {
                write!(f, "marker {marker:?} already holds an incompatible value")
            }
            Error::Io { path, source } => write!(f, "failed to read template {path:?}: {source}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io { source, .. } => Some(source),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
