//! Metadata extraction for resolved detail links.
//!
//! The download side only needs a [`DetailItem`]'s `detail_id` and its
//! ordered `download` URLs; the remaining fields are descriptive and end up in
//! the record ledger.

mod html;

pub use html::{HtmlDetailExtractor, parse_detail_page};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::link::{DetailParameters, ResolvedLink, Variant};

/// Structured description of one media item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetailItem {
    /// Unique media item id.
    pub detail_id: String,
    /// Author id, when known.
    pub user_id: Option<String>,
    /// Author display name.
    pub author: String,
    /// Caption text.
    pub caption: String,
    /// Publish time in epoch milliseconds, `0` when unknown.
    pub timestamp: i64,
    /// Cover image URL.
    pub cover: String,
    /// Media URLs in download order.
    pub download: Vec<String>,
    /// Variant the detail page was fetched under.
    pub variant: Variant,
}

impl DetailItem {
    /// Flattens the item into scalar ledger fields; `download` is space-joined.
    #[must_use]
    pub fn to_fields(&self) -> Map<String, Value> {
        let mut fields = Map::new();
        fields.insert("detail_id".into(), Value::from(self.detail_id.clone()));
        fields.insert(
            "user_id".into(),
            Value::from(self.user_id.clone().unwrap_or_default()),
        );
        fields.insert("author".into(), Value::from(self.author.clone()));
        fields.insert("caption".into(), Value::from(self.caption.clone()));
        fields.insert("timestamp".into(), Value::from(self.timestamp));
        fields.insert("cover".into(), Value::from(self.cover.clone()));
        fields.insert("download".into(), Value::from(self.download.join(" ")));
        fields.insert(
            "variant".into(),
            Value::from(match self.variant {
                Variant::App => "app",
                Variant::Pc => "pc",
            }),
        );
        fields
    }
}

/// Produces a [`DetailItem`] for a resolved link.
#[async_trait]
pub trait MetadataExtractor: Send + Sync {
    /// Returns `None` when the item cannot be described; the caller skips it.
    async fn extract(&self, link: &ResolvedLink, params: &DetailParameters) -> Option<DetailItem>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_fields_joins_download_with_spaces() {
        let item = DetailItem {
            detail_id: "3xabc".to_string(),
            user_id: None,
            author: "someone".to_string(),
            caption: "hello".to_string(),
            timestamp: 1_700_000_000_000,
            cover: String::new(),
            download: vec!["https://a/1.jpg".to_string(), "https://a/2.jpg".to_string()],
            variant: Variant::App,
        };
        let fields = item.to_fields();
        assert_eq!(fields["download"], "https://a/1.jpg https://a/2.jpg");
        assert_eq!(fields["user_id"], "");
        assert_eq!(fields["variant"], "app");
        assert!(fields.values().all(|v| !v.is_object() && !v.is_array()));
    }
}
