//! Error types for canonical link parsing.

use thiserror::Error;

/// Errors turning a canonical URL into [`super::DetailParameters`].
///
/// These are reported per URL and never stop a batch.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LinkError {
    /// The URL could not be parsed at all.
    #[error("invalid URL '{url}'")]
    InvalidUrl {
        /// The URL as resolved.
        url: String,
    },

    /// The path does not match any known detail page shape.
    #[error(
        "unrecognised detail link '{url}'\n  Suggestion: paste the share link copied from the app or the video page URL"
    )]
    UnknownShape {
        /// The URL as resolved.
        url: String,
    },

    /// The path has the right shape but the detail id segment is empty.
    #[error("detail link '{url}' has no detail id")]
    MissingDetailId {
        /// The URL as resolved.
        url: String,
    },
}

impl LinkError {
    /// Returns the URL this error refers to.
    #[must_use]
    pub fn url(&self) -> &str {
        match self {
            Self::InvalidUrl { url } | Self::UnknownShape { url } | Self::MissingDetailId { url } => {
                url
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_shape_display_has_suggestion() {
        let error = LinkError::UnknownShape {
            url: "https://www.kuaishou.com/profile/abc".to_string(),
        };
        let msg = error.to_string();
        assert!(msg.contains("/profile/abc"));
        assert!(msg.contains("Suggestion"));
    }

    #[test]
    fn test_url_accessor_returns_context() {
        let error = LinkError::MissingDetailId {
            url: "https://www.kuaishou.com/short-video/".to_string(),
        };
        assert_eq!(error.url(), "https://www.kuaishou.com/short-video/");
    }
}
