use std::path::PathBuf;

/// A sensor read that produced no sample.
#[derive(Debug, thiserror::Error)]
pub enum SampleError {
    #[error("failed to read sensor {source_name}: {error}")]
    Io {
        source_name: String,
        #[source]
        error: std::io::Error,
    },
    #[error("unparsable sensor output {output:?}")]
    Parse { output: String },
    #[error("sensor read timed out after {0:?}")]
    Timeout(std::time::Duration),
    #[error("sensor task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    #[error("snapshot i/o on {path:?}: {error}")]
    Io {
        path: PathBuf,
        #[source]
        error: std::io::Error,
    },
    #[error("corrupt snapshot: {0}")]
    Corrupt(String),
    #[error("snapshot task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl SnapshotError {
    pub fn io(path: impl Into<PathBuf>, error: std::io::Error) -> Self {
        SnapshotError::Io {
            path: path.into(),
            error,
        }
    }

    pub fn corrupt(message: impl Into<String>) -> Self {
        SnapshotError::Corrupt(message.into())
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, SnapshotError::Io { error, .. } if error.kind() == std::io::ErrorKind::NotFound)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error(transparent)]
    Load(#[from] ::config::ConfigError),
    #[error("invalid argument {0:?}")]
    InvalidArgument(String),
    #[error("missing value for argument --{0}")]
    MissingValue(String),
    #[error("{key} must be greater than zero")]
    Zero { key: &'static str },
    #[error("{key} is too large")]
    TooLarge { key: &'static str },
    #[error("invalid listen address {0:?}")]
    ListenAddress(String),
    #[error("invalid time key format {0:?}")]
    TimeKeyFormat(String),
}
