//! Errors raised while loading engine configuration

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config '{path}': {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// The document is not valid YAML/JSON or does not fit the schema
    #[error("malformed config '{origin}': {message}")]
    Parse {
        origin: String,
        /// Line and column, 1-based, when the parser reports them
        at: Option<(usize, usize)>,
        message: String,
    },

    #[error(transparent)]
    Invalid(#[from] ValidationError),

    #[error("config references unset environment variable '{var}'")]
    MissingEnvVar { var: String },

    #[error("settings backend unavailable: {message}")]
    BackendUnavailable { message: String },
}

/// A config value rejected after parsing, with the path of the offending field
#[derive(Debug, Clone, PartialEq, Error)]
#[error("invalid config at '{field_path}': {kind}")]
pub struct ValidationError {
    /// e.g. `providers[0].base_url`
    pub field_path: String,
    pub kind: ValidationErrorKind,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationErrorKind {
    #[error("value must not be empty")]
    Empty,

    #[error("secret is empty; omit the field to fall back to the environment")]
    EmptySecret,

    #[error("unsupported schema version {actual}, expected {expected}")]
    UnsupportedVersion { expected: String, actual: String },

    #[error("provider '{name}' is configured more than once")]
    DuplicateProvider { name: String },

    #[error("unknown provider '{name}', expected one of: {}", .known.join(", "))]
    UnknownProvider { name: String, known: Vec<String> },

    #[error("invalid URL: {message}")]
    InvalidUrl { message: String },

    #[error("unresolved environment variable placeholder")]
    UnresolvedPlaceholder,

    #[error("'{pattern}' is not a model id glob such as 'o3*'")]
    InvalidPattern { pattern: String },

    #[error("must be greater than 0")]
    NotPositive,

    #[error("poll interval exceeds jobs.poll_max_ms ({cap_ms})")]
    IntervalAboveCap { cap_ms: u64 },

    #[error("shorter than timeouts.base_ms ({base_ms})")]
    TimeoutBelowBase { base_ms: u64 },
}

impl ValidationError {
    pub fn new(field_path: impl Into<String>, kind: ValidationErrorKind) -> Self {
        Self {
            field_path: field_path.into(),
            kind,
        }
    }

    pub fn not_positive(field_path: impl Into<String>) -> Self {
        Self::new(field_path, ValidationErrorKind::NotPositive)
    }
}

pub type ConfigResult<T> = Result<T, ConfigError>;
