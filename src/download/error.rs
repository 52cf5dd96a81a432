//! Per-task download failures.
//!
//! A [`TaskError`] fails only the task that owns it; sibling tasks in the same
//! batch carry on and the error is surfaced in the batch report.

use std::path::PathBuf;

use thiserror::Error;

use crate::error::RequestError;

/// Why a download task failed.
#[derive(Debug, Error)]
pub enum TaskError {
    /// The item listed no media URLs.
    #[error("item has no media to download")]
    NoMedia,

    /// The destination directory could not be created.
    #[error("cannot create destination {path}: {source}")]
    Destination {
        /// Directory that could not be created.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// A media fetch failed after all attempts.
    #[error("failed to fetch {url} after {attempts} attempt(s): {source}")]
    Request {
        /// Media URL that failed.
        url: String,
        /// Attempts made before giving up.
        attempts: u32,
        /// The last error seen.
        #[source]
        source: RequestError,
    },

    /// The task panicked before reporting an outcome.
    #[error("download task panicked: {message}")]
    Panicked {
        /// Panic or join error description.
        message: String,
    },
}

impl TaskError {
    /// Creates a destination error.
    pub fn destination(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Destination {
            path: path.into(),
            source,
        }
    }

    /// Creates a request error from the retry combinator's result.
    pub fn request(url: impl Into<String>, attempts: u32, source: RequestError) -> Self {
        Self::Request {
            url: url.into(),
            attempts,
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_error_display_includes_attempts() {
        let error = TaskError::request(
            "https://v1.kwaicdn.com/a.mp4",
            3,
            RequestError::http_status("https://v1.kwaicdn.com/a.mp4", 503),
        );
        let msg = error.to_string();
        assert!(msg.contains("3 attempt(s)"), "{msg}");
        assert!(msg.contains("503"), "{msg}");
    }

    #[test]
    fn test_destination_error_display_includes_path() {
        let error = TaskError::destination(
            "/readonly/Download",
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        );
        assert!(error.to_string().contains("/readonly/Download"));
    }
}
