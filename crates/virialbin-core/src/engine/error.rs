use thiserror::Error;

use super::config::ConfigError;

#[derive(Debug, Error)]
pub enum VirialError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Parse error in '{path}' on line {line}: {kind}")]
    Parse {
        path: String,
        line: usize,
        kind: ParseErrorKind,
    },

    #[error("File I/O error for '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("The store holds no accumulated samples")]
    EmptyStore,

    #[error("Internal logic error: {0}")]
    Internal(String),
}

impl VirialError {
    pub(crate) fn io(path: &std::path::Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_string_lossy().to_string(),
            source,
        }
    }

    pub(crate) fn parse(path: &std::path::Path, line: usize, kind: ParseErrorKind) -> Self {
        Self::Parse {
            path: path.to_string_lossy().to_string(),
            line,
            kind,
        }
    }

    /// Whether this error is a missing file, as opposed to an unreadable or malformed one.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Io { source, .. } if source.kind() == std::io::ErrorKind::NotFound)
    }

    /// Whether this error describes files or stores of incompatible dimensions.
    pub fn is_dimension_mismatch(&self) -> bool {
        matches!(
            self,
            Self::Parse {
                kind: ParseErrorKind::DimensionMismatch { .. },
                ..
            } | Self::Config(ConfigError::ShapeMismatch { .. })
        )
    }
}

#[derive(Debug, Error)]
pub enum ParseErrorKind {
    #[error("Missing header line")]
    MissingHeader,
    #[error("Invalid header: {0}")]
    InvalidHeader(String),
    #[error("Invalid integer in field {field} (value: '{value}')")]
    InvalidInt { field: usize, value: String },
    #[error("Invalid float in field {field} (value: '{value}')")]
    InvalidFloat { field: usize, value: String },
    #[error("Expected {expected} fields, found {found}")]
    FieldCount { expected: usize, found: usize },
    #[error("Dimensions do not match: expected {expected}, found {found}")]
    DimensionMismatch { expected: String, found: String },
    #[error("Keys are not strictly increasing: '{previous}' followed by '{current}'")]
    UnsortedKeys { previous: String, current: String },
    #[error("Sample count {samples} exceeds unscreened count {unscreened}")]
    SampleCountExceedsUnscreened { samples: u64, unscreened: u64 },
    #[error("Weight {0} is outside (0, 1]")]
    WeightOutOfRange(f64),
    #[error("Malformed record: {0}")]
    Malformed(#[from] csv::Error),
}
