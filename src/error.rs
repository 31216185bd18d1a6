// src/error.rs

//! Crate-wide error type
//!
//! Validation problems are collected and reported together, never
//! fail-fast. Everything else is terminal for the build invocation; no
//! operation is retried.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// Structural problems in the package model or a generator's
    /// format-specific checks. Always carries every detected violation.
    #[error("package failed validation:\n  {}", .0.join("\n  "))]
    Validation(Vec<String>),

    /// A malformed package declaration (unparseable input, bad paths,
    /// duplicate filesystem entries).
    #[error("invalid package declaration: {0}")]
    Declaration(String),

    /// A generator recommended a file name that is not a plain file name.
    /// Internal-consistency failure, always fatal.
    #[error("refusing to write package to invalid file name {0:?}")]
    InvalidFileName(String),

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{format} coder error: {detail}")]
    Compression {
        format: &'static str,
        detail: String,
    },

    /// An external tool invocation failed (spawn error or non-zero exit).
    #[error("{command} failed: {detail}")]
    Subprocess { command: String, detail: String },

    /// An internal-consistency failure, e.g. a generator supporting neither
    /// build strategy.
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    pub(crate) fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }
}
