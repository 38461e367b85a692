use crate::config::ConfigError;
use crate::external::LaunchError;
use crate::search::SearchError;
use crate::sync::{PipelineError, SourceError};
use std::path::PathBuf;
use thiserror::Error;

/// Top-level failure of a CLI command.
#[derive(Debug, Error)]
pub enum IndexError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Search(#[from] SearchError),
    #[error(transparent)]
    Source(#[from] SourceError),
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
    #[error(transparent)]
    Launch(#[from] LaunchError),
    #[error("background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
    #[error("could not read {path}: {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid settings file {path}: {source}")]
    SettingsFile {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("could not write output: {0}")]
    Output(#[from] std::io::Error),
    #[error("could not encode output: {0}")]
    Encode(#[from] serde_json::Error),
}

impl IndexError {
    /// Whether the failure happened before any mail was read.
    pub fn is_connection(&self) -> bool {
        matches!(
            self,
            IndexError::Search(SearchError::MeilisearchHttp(_))
                | IndexError::Source(SourceError::Imap(_))
                | IndexError::Source(SourceError::Select { .. })
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unreadable_mailbox_counts_as_connection_failure() {
        let err = IndexError::from(SourceError::Select {
            mailbox: "Archive".to_string(),
            reason: "NO no such mailbox".to_string(),
        });
        assert!(err.is_connection());
    }

    #[test]
    fn test_local_failures_are_not_connection_failures() {
        let missing = IndexError::from(SourceError::MissingPath(PathBuf::from("/nope")));
        assert!(!missing.is_connection());

        let mailbox = IndexError::from(SourceError::Mailbox("bad".to_string()));
        assert!(!mailbox.is_connection());
    }
}
