//! Error type shared by every outbound network call.
//!
//! Link probing, detail page fetches and media downloads all report failures
//! through [`RequestError`], so the retry combinator can classify them the
//! same way regardless of the call site.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while talking to the platform or writing fetched bytes.
#[derive(Debug, Error)]
pub enum RequestError {
    /// Network-level error (DNS resolution, connection refused, reset, etc.)
    #[error("network error requesting {url}: {source}")]
    Network {
        /// The URL that failed.
        url: String,
        /// The underlying network error.
        #[source]
        source: reqwest::Error,
    },

    /// Request timed out before completion.
    #[error("timeout requesting {url}")]
    Timeout {
        /// The URL that timed out.
        url: String,
    },

    /// Non-success HTTP response.
    #[error("HTTP {status} requesting {url}")]
    HttpStatus {
        /// The URL that returned an error status.
        url: String,
        /// The HTTP status code.
        status: u16,
    },

    /// File system error while persisting a response body.
    #[error("IO error writing to {path}: {source}")]
    Io {
        /// The file path where the error occurred.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The provided URL is malformed or invalid.
    #[error("invalid URL: {url}")]
    InvalidUrl {
        /// The invalid URL string.
        url: String,
    },
}

impl RequestError {
    /// Creates a network error from a reqwest error.
    pub fn network(url: impl Into<String>, source: reqwest::Error) -> Self {
        Self::Network {
            url: url.into(),
            source,
        }
    }

    /// Maps a reqwest send/stream error, promoting timeouts to [`Self::Timeout`].
    pub fn from_reqwest(url: impl Into<String>, source: reqwest::Error) -> Self {
        if source.is_timeout() {
            Self::timeout(url)
        } else {
            Self::network(url, source)
        }
    }

    /// Creates an HTTP status error.
    pub fn http_status(url: impl Into<String>, status: u16) -> Self {
        Self::HttpStatus {
            url: url.into(),
            status,
        }
    }

    /// Creates a timeout error.
    pub fn timeout(url: impl Into<String>) -> Self {
        Self::Timeout { url: url.into() }
    }

    /// Creates an IO error.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Creates an invalid URL error.
    pub fn invalid_url(url: impl Into<String>) -> Self {
        Self::InvalidUrl { url: url.into() }
    }
}

// No From<reqwest::Error> / From<std::io::Error>: every variant needs the url
// or path the source error does not carry.

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_request_error_timeout_display() {
        let error = RequestError::timeout("https://v.kuaishou.com/abc123");
        assert!(error.to_string().contains("timeout"));
        assert!(error.to_string().contains("https://v.kuaishou.com/abc123"));
    }

    #[test]
    fn test_request_error_http_status_display() {
        let error = RequestError::http_status("https://www.kuaishou.com/short-video/x", 403);
        let msg = error.to_string();
        assert!(msg.contains("403"), "Expected '403' in: {msg}");
        assert!(
            msg.contains("https://www.kuaishou.com/short-video/x"),
            "Expected URL in: {msg}"
        );
    }

    #[test]
    fn test_request_error_io_display() {
        let io_error = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "access denied");
        let error = RequestError::io(PathBuf::from("/tmp/video.mp4"), io_error);
        assert!(error.to_string().contains("/tmp/video.mp4"));
    }

    #[test]
    fn test_request_error_invalid_url_display() {
        let error = RequestError::invalid_url("not-a-url");
        let msg = error.to_string();
        assert!(msg.contains("invalid URL"), "Expected 'invalid URL' in: {msg}");
        assert!(msg.contains("not-a-url"));
    }
}
