use reqwest::StatusCode;
use std::time::Duration;
use thiserror::Error;

/// Errors that occur while interacting with Meilisearch.
#[derive(Debug, Error)]
pub enum SearchError {
    #[error("meilisearch HTTP error: {0}")]
    MeilisearchHttp(reqwest::Error),
    #[error("meilisearch service returned status {status}: {body}")]
    MeilisearchStatus { status: StatusCode, body: String },
    #[error("meilisearch task {task_uid} failed: {message}")]
    TaskFailed { task_uid: u64, message: String },
    #[error("meilisearch task {task_uid} did not finish within {timeout:?}")]
    TaskTimeout { task_uid: u64, timeout: Duration },
}

impl SearchError {
    pub fn meili_status(status: StatusCode, body: String) -> Self {
        SearchError::MeilisearchStatus { status, body }
    }
}
