//! Error types for the deck sourcing pipeline.
//!
//! This module provides a unified error type [`DeckError`] covering the three
//! failure tiers of the preprocessor: recoverable diagnostics are *not*
//! errors (they are attached to the offending [`LogicalLine`] instead);
//! include-level failures abort the current include or library resolution and
//! propagate through every enclosing recursion level; operation-level
//! failures abort the whole source operation.
//!
//! [`LogicalLine`]: crate::deck::LogicalLine

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias using [`DeckError`].
pub type Result<T> = std::result::Result<T, DeckError>;

/// Unified error type for all deck sourcing operations.
#[derive(Error, Debug)]
pub enum DeckError {
    // ============ Include / Library Errors ============
    /// Referenced file does not exist or cannot be opened
    #[error("no file: '{path}'")]
    NoFile { path: String },

    /// Library file exists but does not contain the requested block
    #[error("no name: block '{name}' not found in '{path}'")]
    NoName { path: String, name: String },

    /// A directive line is malformed beyond recovery
    #[error("bad directive at line {line}: {message}")]
    BadDirective { line: i32, message: String },

    /// Include nesting exceeded the configured maximum
    #[error("include nesting deeper than {max} levels at '{path}'")]
    TooDeep { max: usize, path: String },

    /// Frame added at each include level as an error propagates upward,
    /// so the include chain is reconstructable from the message alone.
    #[error("Error while reading file {file}\nFrom file {from}")]
    WhileReading {
        file: String,
        from: String,
        #[source]
        source: Box<DeckError>,
    },

    // ============ Whole-Operation Errors ============
    /// Input failed the binary/garbage heuristic
    #[error("'{path}' does not look like a circuit deck: {reason}")]
    Garbage { path: String, reason: String },

    /// Top-level input file could not be read
    #[error("cannot read input '{path}': {source}")]
    Unreadable {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// No input produced any lines
    #[error("empty input: no deck lines found")]
    EmptyInput,

    // ============ I/O ============
    /// General I/O failure during reading, seeking, or temp-file creation
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

impl DeckError {
    /// Create a missing-file error.
    pub fn no_file(path: impl Into<PathBuf>) -> Self {
        Self::NoFile {
            path: path.into().display().to_string(),
        }
    }

    /// Create a missing-library-block error.
    pub fn no_name(path: impl Into<PathBuf>, name: impl Into<String>) -> Self {
        Self::NoName {
            path: path.into().display().to_string(),
            name: name.into(),
        }
    }

    /// Create a malformed-directive error.
    pub fn bad_directive(line: i32, message: impl Into<String>) -> Self {
        Self::BadDirective {
            line,
            message: message.into(),
        }
    }

    /// Wrap an error with one include-chain frame.
    pub fn while_reading(self, file: impl Into<String>, from: impl Into<String>) -> Self {
        Self::WhileReading {
            file: file.into(),
            from: from.into(),
            source: Box::new(self),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_include_chain_message() {
        let err = DeckError::no_file("missing.inc")
            .while_reading("missing.inc", "inner.sp")
            .while_reading("inner.sp", "top.sp");
        let msg = format!("{}", err);
        assert!(msg.contains("Error while reading file inner.sp"));
        assert!(msg.contains("From file top.sp"));
    }

    #[test]
    fn test_no_file_vs_no_name_distinct() {
        let a = DeckError::no_file("lib.sp");
        let b = DeckError::no_name("lib.sp", "TT");
        assert!(format!("{}", a).starts_with("no file"));
        assert!(format!("{}", b).starts_with("no name"));
    }
}
