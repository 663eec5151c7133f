use std::path::PathBuf;

use thiserror::Error;

/// Result alias for tracker operations
pub type Result<T> = std::result::Result<T, TrackerError>;

/// Error type for tracker operations
#[derive(Debug, Error)]
pub enum TrackerError {
    /// The transcript could not be stat'd, opened or read
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The file watcher could not be set up for the transcript
    #[error("failed to watch {}: {source}", path.display())]
    Subscription {
        path: PathBuf,
        #[source]
        source: notify::Error,
    },
}

impl TrackerError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        TrackerError::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn subscription(path: impl Into<PathBuf>, source: notify::Error) -> Self {
        TrackerError::Subscription {
            path: path.into(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_names_the_path() {
        let err = TrackerError::io(
            "/tmp/missing.jsonl",
            std::io::Error::new(std::io::ErrorKind::NotFound, "No such file"),
        );
        assert_eq!(
            err.to_string(),
            "failed to read /tmp/missing.jsonl: No such file"
        );
    }
}
