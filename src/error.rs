// src/error.rs
use std::fmt::Display;
use std::path::PathBuf;
use std::time::Duration;

/// Errors surfaced by every agent operation.
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    /// Remote object missing
    #[error("object {0} not found")]
    NotFound(String),

    /// Uniqueness guard tripped on a remote object
    #[error("object {0} already exists")]
    AlreadyExists(String),

    /// Overwrite protection tripped on a local file
    #[error("file {} already exists, use --overwrite to replace it", .0.display())]
    LocalFileExists(PathBuf),

    /// Storage provider failure, propagated verbatim
    #[error("storage backend error: {0}")]
    Backend(#[source] object_store::Error),

    #[error("cannot create bucket '{bucket}': {reason}")]
    BucketCreation { bucket: String, reason: String },

    #[error("invalid object path '{path}': {source}")]
    InvalidPath {
        path: String,
        #[source]
        source: object_store::path::Error,
    },

    /// Key, certificate or CRL generation and parsing failures
    #[error("crypto error: {0}")]
    Crypto(String),

    #[error("{command} exited with status {}", code.map(|c| c.to_string()).unwrap_or_else(|| "signal".to_string()))]
    SubprocessFailure {
        command: String,
        code: Option<i32>,
        output: String,
    },

    #[error("{command} timed out after {after:?}")]
    SubprocessTimeout {
        command: String,
        after: Duration,
        output: String,
    },

    #[error("gave up after {attempts} attempts in {elapsed:?}, last output:\n{last_output}")]
    Exhausted {
        attempts: u32,
        elapsed: Duration,
        last_output: String,
    },

    #[error("{operation} timed out after {after:?}")]
    Timeout { operation: String, after: Duration },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("invalid client name '{0}'")]
    InvalidName(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("cannot access {}: {source}", path.display())]
    LocalFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, AgentError>;

impl AgentError {
    pub fn crypto(context: &str, err: impl Display) -> Self {
        AgentError::Crypto(format!("{}: {}", context, err))
    }

    pub fn local_file(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        AgentError::LocalFile {
            path: path.into(),
            source,
        }
    }

    /// Whether the join driver may retry after this error.
    ///
    /// Refusals (overwrite protection, bad configuration) and operator
    /// interrupts are final; everything else is assumed transient.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            AgentError::AlreadyExists(_)
                | AgentError::LocalFileExists(_)
                | AgentError::Config(_)
                | AgentError::InvalidName(_)
                | AgentError::Cancelled
        )
    }

    /// Text an operator needs to diagnose a failed attempt.
    pub fn diagnostic_output(&self) -> String {
        match self {
            AgentError::SubprocessFailure { output, .. }
            | AgentError::SubprocessTimeout { output, .. } => output.clone(),
            other => other.to_string(),
        }
    }
}

impl From<object_store::Error> for AgentError {
    fn from(err: object_store::Error) -> Self {
        match err {
            object_store::Error::NotFound { path, .. } => AgentError::NotFound(path),
            object_store::Error::AlreadyExists { path, .. } => AgentError::AlreadyExists(path),
            other => AgentError::Backend(other),
        }
    }
}

impl From<serde_yaml::Error> for AgentError {
    fn from(err: serde_yaml::Error) -> Self {
        AgentError::Config(err.to_string())
    }
}

impl From<serde_json::Error> for AgentError {
    fn from(err: serde_json::Error) -> Self {
        AgentError::Serialization(err.to_string())
    }
}
