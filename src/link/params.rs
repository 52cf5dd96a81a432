//! Detail-parameter extraction from canonical URLs.
//!
//! Two path shapes identify a detail page:
//! - PC: `/short-video/{detail_id}` with an optional `authorId` query value
//! - App: `/fw/photo/{detail_id}` with an optional `userId` query value

use tracing::debug;
use url::Url;

use super::error::LinkError;
use super::{ResolvedLink, Variant};

/// Identifying parameters parsed from a canonical URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetailParameters {
    /// Author id when the URL carries one.
    pub user_id: Option<String>,
    /// Unique media item id; never empty.
    pub detail_id: String,
    /// Variant the URL was resolved under.
    pub variant: Variant,
}

/// Parses `user_id` and `detail_id` from a resolved link.
///
/// # Errors
///
/// Returns [`LinkError`] when the URL is malformed, has an unknown shape, or
/// has an empty detail id.
pub fn extract_params(link: &ResolvedLink) -> Result<DetailParameters, LinkError> {
    let parsed = Url::parse(&link.url).map_err(|_| LinkError::InvalidUrl {
        url: link.url.clone(),
    })?;
    let segments: Vec<&str> = parsed
        .path_segments()
        .map(Iterator::collect)
        .unwrap_or_default();

    let (detail_id, user_key) = match segments.as_slice() {
        ["short-video", id, ..] => (*id, "authorId"),
        ["fw", "photo", id, ..] => (*id, "userId"),
        ["short-video"] | ["fw", "photo"] => ("", ""),
        _ => {
            return Err(LinkError::UnknownShape {
                url: link.url.clone(),
            });
        }
    };

    if detail_id.is_empty() {
        return Err(LinkError::MissingDetailId {
            url: link.url.clone(),
        });
    }

    let user_id = parsed
        .query_pairs()
        .find(|(k, _)| k == user_key)
        .map(|(_, v)| v.into_owned())
        .filter(|v| !v.is_empty());

    debug!(url = %link.url, detail_id, ?user_id, "extracted detail parameters");
    Ok(DetailParameters {
        user_id,
        detail_id: detail_id.to_string(),
        variant: link.variant,
    })
}
