//! Link Examiner: turns pasted text into canonical detail URLs.
//!
//! Resolution runs in two passes. The App pass extracts every share link in
//! the text and follows its redirects; only if that yields nothing does the PC
//! pass run, which confirms already-canonical desktop URLs are reachable.
//! Whichever pass produced results, the final URLs are filtered against the
//! canonical patterns.

use std::sync::LazyLock;

use futures_util::future::join_all;
use regex::Regex;
use tracing::{debug, info, instrument, warn};

use super::{Resolution, ResolvedLink, Variant};
use crate::retry::RetryPolicy;
use crate::session::{RedirectProbe, SessionCookie};

/// Share links (short or complete), with or without a scheme.
#[allow(clippy::expect_used)]
static SHORT_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:https?://)?[\w.-]*kuaishou\.(?:com|cn)/\S+").expect("short URL regex is valid")
});

/// Desktop canonical detail URLs.
#[allow(clippy::expect_used)]
static PC_COMPLETE_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:https?://)?[\w.-]*kuaishou\.(?:com|cn)/short-video/\S+")
        .expect("PC URL regex is valid")
});

/// Platform-internal redirect targets of mobile share links.
#[allow(clippy::expect_used)]
static REDIRECT_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"https?://[\w.-]*chenzhongtech\.(?:com|cn)/fw/photo/\S+")
        .expect("redirect URL regex is valid")
});

/// Resolves raw text into canonical URLs, learning the session cookie on the way.
pub struct Examiner<'a> {
    probe: &'a dyn RedirectProbe,
    cookie: &'a SessionCookie,
    retry: RetryPolicy,
}

impl<'a> Examiner<'a> {
    /// Creates an examiner that probes through `probe` and installs cookies into `cookie`.
    #[must_use]
    pub fn new(probe: &'a dyn RedirectProbe, cookie: &'a SessionCookie, retry: RetryPolicy) -> Self {
        Self {
            probe,
            cookie,
            retry,
        }
    }

    /// Resolves `text` into canonical URLs.
    ///
    /// Returns an empty [`Resolution`] (no variant, no links) when neither
    /// pass produced a reachable URL.
    #[instrument(skip(self, text), fields(input_len = text.len()))]
    pub async fn resolve(&self, text: &str) -> Resolution {
        let mut variant = Variant::App;
        let mut landed = self.request_redirect(text, variant).await;
        if landed.is_empty() {
            debug!("app pass produced nothing, trying PC pass");
            variant = Variant::Pc;
            landed = self.request_redirect(text, variant).await;
        }
        if landed.is_empty() {
            return Resolution::empty();
        }

        let links = classify(&landed, variant)
            .into_iter()
            .map(|url| ResolvedLink { url, variant })
            .collect::<Vec<_>>();
        info!(?variant, count = links.len(), "links resolved");
        Resolution {
            variant: Some(variant),
            links,
        }
    }

    /// Probes every candidate of the pass concurrently; returns the final
    /// URLs that succeeded, space-joined in candidate order.
    async fn request_redirect(&self, text: &str, variant: Variant) -> String {
        let pattern = match variant {
            Variant::App => &*SHORT_URL,
            Variant::Pc => &*PC_COMPLETE_URL,
        };
        let candidates: Vec<String> = pattern
            .find_iter(text)
            .map(|m| normalize_candidate(m.as_str()))
            .collect();
        debug!(?variant, candidates = candidates.len(), "extracted candidate links");

        let landed = join_all(candidates.iter().map(|url| self.request_url(url))).await;
        landed.into_iter().flatten().collect::<Vec<_>>().join(" ")
    }

    async fn request_url(&self, url: &str) -> Option<String> {
        let probe = self.probe;
        let response = self.retry.run(url, move || probe.probe(url)).await?;
        self.cookie.learn(&response.cookies);
        debug!(url, final_url = %response.final_url, "redirect resolved");
        Some(response.final_url)
    }
}

/// Filters landed URLs against the canonical patterns for `variant`.
///
/// The App pass keeps redirect targets first, then desktop URLs; the PC pass
/// keeps desktop URLs only.
fn classify(landed: &str, variant: Variant) -> Vec<String> {
    let matches: Vec<String> = match variant {
        Variant::App => REDIRECT_URL
            .find_iter(landed)
            .chain(PC_COMPLETE_URL.find_iter(landed))
            .map(|m| m.as_str().to_string())
            .collect(),
        Variant::Pc => PC_COMPLETE_URL
            .find_iter(landed)
            .map(|m| m.as_str().to_string())
            .collect(),
    };
    if matches.is_empty() {
        warn!(landed, "resolved URLs matched no canonical pattern");
    }
    matches
}

/// Trims trailing punctuation picked up from prose and adds a missing scheme.
fn normalize_candidate(raw: &str) -> String {
    let trimmed = raw.trim_end_matches(|c: char| {
        matches!(c, '.' | ',' | ';' | ')' | ']' | '>' | '"' | '\'' | '!' | '?')
            || (!c.is_ascii() && !c.is_alphanumeric())
    });
    if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        trimmed.to_string()
    } else {
        format!("https://{trimmed}")
    }
}
