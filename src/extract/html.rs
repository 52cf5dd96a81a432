//! Detail-page extractor reading the state JSON embedded in the page HTML.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tracing::{debug, instrument, warn};

use super::{DetailItem, MetadataExtractor};
use crate::error::RequestError;
use crate::link::{DetailParameters, ResolvedLink, Variant};
use crate::retry::RetryPolicy;
use crate::session::Session;

const APOLLO_MARKER: &str = "window.__APOLLO_STATE__";
const INIT_STATE_MARKER: &str = "window.INIT_STATE";
const PHOTO_KEY_PREFIX: &str = "VisionVideoDetailPhoto:";
const AUTHOR_KEY_PREFIX: &str = "VisionVideoDetailAuthor:";

/// Fetches detail pages through the session and parses them.
#[derive(Debug, Clone)]
pub struct HtmlDetailExtractor {
    session: Arc<Session>,
    retry: RetryPolicy,
}

impl HtmlDetailExtractor {
    /// Creates an extractor sharing `session`.
    #[must_use]
    pub fn new(session: Arc<Session>, retry: RetryPolicy) -> Self {
        Self { session, retry }
    }

    async fn fetch_page(&self, link: &ResolvedLink) -> Option<String> {
        let session = &*self.session;
        let url = link.url.as_str();
        let kind = link.variant.page_headers();
        self.retry
            .run(url, move || async move {
                let response = session.send(url, kind).await?;
                response
                    .text()
                    .await
                    .map_err(|e| RequestError::from_reqwest(url, e))
            })
            .await
    }
}

#[async_trait]
impl MetadataExtractor for HtmlDetailExtractor {
    #[instrument(skip(self, link, params), fields(url = %link.url, detail_id = %params.detail_id))]
    async fn extract(&self, link: &ResolvedLink, params: &DetailParameters) -> Option<DetailItem> {
        let html = self.fetch_page(link).await?;
        let item = parse_detail_page(&html, params);
        if item.is_none() {
            warn!("detail page carried no usable media data");
        }
        item
    }
}

/// Parses a detail page into a [`DetailItem`].
///
/// PC pages embed `window.__APOLLO_STATE__`; App pages embed
/// `window.INIT_STATE`. Returns `None` when the expected state is missing or
/// lists no media.
#[must_use]
pub fn parse_detail_page(html: &str, params: &DetailParameters) -> Option<DetailItem> {
    let item = match params.variant {
        Variant::Pc => embedded_json(html, APOLLO_MARKER).and_then(|s| parse_apollo(&s, params)),
        Variant::App => embedded_json(html, INIT_STATE_MARKER)
            .and_then(|s| parse_init_state(&s, params))
            .or_else(|| embedded_json(html, APOLLO_MARKER).and_then(|s| parse_apollo(&s, params))),
    }?;
    (!item.download.is_empty()).then_some(item)
}

/// Reads the first JSON value assigned after `marker` in the page.
fn embedded_json(html: &str, marker: &str) -> Option<Value> {
    let start = html.find(marker)? + marker.len();
    let rest = html[start..].trim_start().strip_prefix('=')?.trim_start();
    let mut values = serde_json::Deserializer::from_str(rest).into_iter::<Value>();
    match values.next() {
        Some(Ok(value)) => Some(value),
        Some(Err(e)) => {
            debug!(marker, error = %e, "embedded state is not valid JSON");
            None
        }
        None => None,
    }
}

fn parse_apollo(state: &Value, params: &DetailParameters) -> Option<DetailItem> {
    let client = state
        .get("defaultClient")
        .and_then(Value::as_object)
        .or_else(|| state.as_object())?;

    let photo = client
        .get(&format!("{PHOTO_KEY_PREFIX}{}", params.detail_id))
        .or_else(|| find_prefixed(client, PHOTO_KEY_PREFIX))?;
    let author = params
        .user_id
        .as_ref()
        .and_then(|id| client.get(&format!("{AUTHOR_KEY_PREFIX}{id}")))
        .or_else(|| find_prefixed(client, AUTHOR_KEY_PREFIX));

    let download = str_field(photo, "photoUrl")
        .or_else(|| str_field(photo, "photoH265Url"))
        .map(|u| vec![u.to_string()])
        .unwrap_or_default();

    Some(DetailItem {
        detail_id: params.detail_id.clone(),
        user_id: params
            .user_id
            .clone()
            .or_else(|| author.and_then(|a| str_field(a, "id")).map(str::to_string)),
        author: author
            .and_then(|a| str_field(a, "name"))
            .unwrap_or_default()
            .to_string(),
        caption: str_field(photo, "caption").unwrap_or_default().to_string(),
        timestamp: photo.get("timestamp").and_then(Value::as_i64).unwrap_or(0),
        cover: str_field(photo, "coverUrl").unwrap_or_default().to_string(),
        download,
        variant: params.variant,
    })
}

fn parse_init_state(state: &Value, params: &DetailParameters) -> Option<DetailItem> {
    let photo = state
        .as_object()?
        .values()
        .find_map(|entry| entry.get("photo").filter(|p| p.is_object()))?;

    let atlas = photo
        .get("ext_params")
        .and_then(|e| e.get("atlas"))
        .or_else(|| photo.get("atlas"));
    let download = match atlas.map(atlas_urls) {
        Some(urls) if !urls.is_empty() => urls,
        _ => first_url(photo.get("mainMvUrls")).into_iter().collect(),
    };

    Some(DetailItem {
        detail_id: params.detail_id.clone(),
        user_id: params.user_id.clone().or_else(|| {
            photo.get("userId").and_then(|v| match v {
                Value::String(s) => Some(s.clone()),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            })
        }),
        author: str_field(photo, "userName").unwrap_or_default().to_string(),
        caption: str_field(photo, "caption").unwrap_or_default().to_string(),
        timestamp: photo.get("timestamp").and_then(Value::as_i64).unwrap_or(0),
        cover: first_url(photo.get("coverUrls")).unwrap_or_default(),
        download,
        variant: params.variant,
    })
}

/// Builds image URLs from an atlas: first CDN host joined with every list path.
fn atlas_urls(atlas: &Value) -> Vec<String> {
    let Some(cdn) = atlas
        .get("cdn")
        .and_then(Value::as_array)
        .and_then(|c| c.first())
        .and_then(Value::as_str)
    else {
        return Vec::new();
    };
    let host = cdn.trim_end_matches('/');
    atlas
        .get("list")
        .and_then(Value::as_array)
        .map(|list| {
            list.iter()
                .filter_map(Value::as_str)
                .map(|path| {
                    if host.starts_with("http") {
                        format!("{host}/{}", path.trim_start_matches('/'))
                    } else {
                        format!("https://{host}/{}", path.trim_start_matches('/'))
                    }
                })
                .collect()
        })
        .unwrap_or_default()
}

fn first_url(value: Option<&Value>) -> Option<String> {
    value?
        .as_array()?
        .iter()
        .find_map(|entry| str_field(entry, "url"))
        .map(str::to_string)
}

fn find_prefixed<'a>(map: &'a Map<String, Value>, prefix: &str) -> Option<&'a Value> {
    map.iter()
        .find(|(key, _)| key.starts_with(prefix))
        .map(|(_, value)| value)
}

fn str_field<'a>(value: &'a Value, key: &str) -> Option<&'a str> {
    value.get(key).and_then(Value::as_str).filter(|s| !s.is_empty())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn params(detail_id: &str, variant: Variant) -> DetailParameters {
        DetailParameters {
            user_id: None,
            detail_id: detail_id.to_string(),
            variant,
        }
    }

    const PC_PAGE: &str = r#"<html><script>window.__APOLLO_STATE__={"defaultClient":{
        "VisionVideoDetailPhoto:3xabc":{"id":"3xabc","caption":"sunset","timestamp":1700000000000,
            "coverUrl":"https://p1.a.yximgs.com/cover.jpg","photoUrl":"https://v1.kwaicdn.com/video.mp4"},
        "VisionVideoDetailAuthor:3xuser":{"id":"3xuser","name":"painter"}
    }};(function(){var s;})();</script></html>"#;

    const APP_VIDEO_PAGE: &str = r#"<script>window.INIT_STATE = {"tus123":{"result":1,"photo":{
        "caption":"clip","userName":"walker","userId":"3xwalker","timestamp":1700000000001,
        "coverUrls":[{"cdn":"p2","url":"https://p2.a.yximgs.com/c.jpg"}],
        "mainMvUrls":[{"cdn":"v2","url":"https://v2.kwaicdn.com/m.mp4"}]}}}</script>"#;

    const APP_ATLAS_PAGE: &str = r#"<script>window.INIT_STATE = {"x":{"photo":{
        "caption":"album","ext_params":{"atlas":{"cdn":["p5.a.yximgs.com"],
        "list":["/ufile/atlas/a_0.webp","/ufile/atlas/a_1.webp"]}},
        "mainMvUrls":[{"url":"https://v2.kwaicdn.com/bgm.mp4"}]}}}</script>"#;

    #[test]
    fn test_parse_pc_apollo_state() {
        let item = parse_detail_page(PC_PAGE, &params("3xabc", Variant::Pc)).unwrap();
        assert_eq!(item.download, vec!["https://v1.kwaicdn.com/video.mp4"]);
        assert_eq!(item.caption, "sunset");
        assert_eq!(item.author, "painter");
        assert_eq!(item.user_id.as_deref(), Some("3xuser"));
        assert_eq!(item.timestamp, 1_700_000_000_000);
        assert_eq!(item.cover, "https://p1.a.yximgs.com/cover.jpg");
    }

    #[test]
    fn test_parse_app_video_state() {
        let item = parse_detail_page(APP_VIDEO_PAGE, &params("3xclip", Variant::App)).unwrap();
        assert_eq!(item.download, vec!["https://v2.kwaicdn.com/m.mp4"]);
        assert_eq!(item.author, "walker");
        assert_eq!(item.user_id.as_deref(), Some("3xwalker"));
        assert_eq!(item.cover, "https://p2.a.yximgs.com/c.jpg");
    }

    #[test]
    fn test_parse_app_atlas_prefers_images() {
        let item = parse_detail_page(APP_ATLAS_PAGE, &params("3xalbum", Variant::App)).unwrap();
        assert_eq!(
            item.download,
            vec![
                "https://p5.a.yximgs.com/ufile/atlas/a_0.webp",
                "https://p5.a.yximgs.com/ufile/atlas/a_1.webp",
            ]
        );
    }

    #[test]
    fn test_app_variant_falls_back_to_apollo_state() {
        let item = parse_detail_page(PC_PAGE, &params("3xabc", Variant::App)).unwrap();
        assert_eq!(item.variant, Variant::App);
        assert_eq!(item.download.len(), 1);
    }

    #[test]
    fn test_page_without_state_yields_none() {
        assert!(parse_detail_page("<html>captcha</html>", &params("x", Variant::Pc)).is_none());
    }

    #[test]
    fn test_page_without_media_yields_none() {
        let page = r#"<script>window.__APOLLO_STATE__={"defaultClient":{"VisionVideoDetailPhoto:x":{"caption":"gone"}}}</script>"#;
        assert!(parse_detail_page(page, &params("x", Variant::Pc)).is_none());
    }

    #[test]
    fn test_embedded_json_ignores_trailing_script() {
        let value = embedded_json("a window.INIT_STATE = {\"k\":1};foo()", INIT_STATE_MARKER).unwrap();
        assert_eq!(value["k"], 1);
    }
}
