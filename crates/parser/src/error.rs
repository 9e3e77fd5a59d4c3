//! Parser-level error type.

use thiserror::Error;

/// Errors produced while reading scenario, contract, herd, or conf files.
#[derive(Debug, Error)]
pub enum ParseError {
    /// The input file could not be read.
    #[error("cannot read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// A line could not be interpreted in its section.
    #[error("syntax error at line {line}: {message}")]
    Syntax { line: usize, message: String },

    /// A required header or section was absent.
    #[error("missing required {0}")]
    Missing(&'static str),
}
