//! Error kinds and the crate-wide result alias.
//!
//! Every failure surfaced by the processor is one of a closed set of kinds:
//! structural metadata problems, malformed CSV, cell values that do not
//! match their datatype, fetch failures, column-count disagreements, and
//! referential violations found during validation.
//!
//! In lenient mode the row pipeline downgrades [`Error::Parse`] and
//! [`Error::SchemaMismatch`] to warnings; everything else always aborts.

use std::fmt;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// Structural or validation failure in a metadata document.
    #[error("metadata error: {0}")]
    Metadata(String),

    /// Malformed CSV input (unterminated quote, invalid encoding, bad dialect).
    #[error("dialect error: {0}")]
    Dialect(String),

    /// A cell value does not match its datatype pattern or violates a facet.
    #[error("parse error: {0}")]
    Parse(String),

    /// Fetch or file-system failure.
    #[error("I/O error: {0}")]
    Io(String),

    /// Column count disagreement between schema and data.
    #[error("schema mismatch: {0}")]
    SchemaMismatch(String),

    /// A foreign key value has no matching row in the referenced table.
    #[error("foreign key violation: {0}")]
    ForeignKey(String),
}

impl Error {
    pub fn metadata(message: impl Into<String>) -> Self {
        Error::Metadata(message.into())
    }

    pub fn dialect(message: impl Into<String>) -> Self {
        Error::Dialect(message.into())
    }

    pub fn parse(message: impl Into<String>) -> Self {
        Error::Parse(message.into())
    }

    pub fn io(message: impl Into<String>) -> Self {
        Error::Io(message.into())
    }

    /// True for the kinds that lenient mode turns into warnings.
    pub fn is_lenient_downgradable(&self) -> bool {
        matches!(self, Error::Parse(_) | Error::SchemaMismatch(_))
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err.to_string())
    }
}

impl From<csv::Error> for Error {
    fn from(err: csv::Error) -> Self {
        Error::Dialect(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Metadata(format!("invalid JSON: {err}"))
    }
}

impl From<url::ParseError> for Error {
    fn from(err: url::ParseError) -> Self {
        Error::Metadata(format!("invalid URL: {err}"))
    }
}

/// Processing mode controlling error severity (see the mode table in the
/// crate docs).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    #[default]
    Strict,
    Lenient,
}

/// A non-fatal condition accumulated on the reader, drainable after the
/// run completes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Warning {
    pub message: String,
}

impl Warning {
    pub fn new(message: impl Into<String>) -> Self {
        Warning {
            message: message.into(),
        }
    }
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lenient_downgrade_covers_parse_and_schema_mismatch_only() {
        assert!(Error::parse("bad cell").is_lenient_downgradable());
        assert!(
            Error::SchemaMismatch("expected 3 columns, found 2".into())
                .is_lenient_downgradable()
        );
        assert!(!Error::metadata("bad tree").is_lenient_downgradable());
        assert!(!Error::io("timeout").is_lenient_downgradable());
    }

    #[test]
    fn io_errors_convert_with_message() {
        let err: Error = std::io::Error::new(std::io::ErrorKind::NotFound, "missing.csv").into();
        assert!(matches!(err, Error::Io(ref msg) if msg.contains("missing.csv")));
    }
}
