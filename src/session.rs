//! Shared session context for every outbound request.
//!
//! A [`Session`] owns the one HTTP client used by the whole run, the four
//! header bundles (App, App data, PC, PC data) and the [`SessionCookie`].
//! The cookie is write-once: the first cookie string observed (or the one
//! configured up front) is sent by every bundle for the rest of the process,
//! and later values are ignored.

use std::sync::OnceLock;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{
    ACCEPT, ACCEPT_LANGUAGE, CONTENT_TYPE, COOKIE, HeaderMap, HeaderValue, ORIGIN, REFERER,
    USER_AGENT,
};
use reqwest::{Client, ClientBuilder, Proxy, redirect};
use thiserror::Error;
use tracing::{debug, info, instrument};
use url::Url;

use crate::config::{ProxySetting, Settings};
use crate::error::RequestError;
use crate::user_agent::{APP_USER_AGENT, PC_USER_AGENT};

/// Host of the platform's short links; requests to it use App headers.
pub const SHORT_LINK_HOST: &str = "v.kuaishou.com";

const PC_REFERER: &str = "https://www.kuaishou.com/";
const MAX_REDIRECTS: usize = 10;

/// Errors building the shared session. Fatal to the whole run.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The configured proxy was rejected by the HTTP client.
    #[error("invalid proxy {proxy}: {source}")]
    Proxy {
        /// Proxy URL as configured.
        proxy: String,
        /// Underlying client error.
        #[source]
        source: reqwest::Error,
    },

    /// The HTTP client could not be constructed.
    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),
}

/// Which header bundle a request carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderKind {
    /// Mobile page requests.
    App,
    /// Mobile data (JSON) requests.
    AppData,
    /// Desktop page requests.
    Pc,
    /// Desktop data (JSON) requests.
    PcData,
}

impl HeaderKind {
    /// Selects App headers for the short-link host and PC headers otherwise.
    #[must_use]
    pub fn for_url(url: &str) -> Self {
        if url.contains(SHORT_LINK_HOST) {
            Self::App
        } else {
            Self::Pc
        }
    }
}

/// Process-wide cookie learned once and shared by every header bundle.
#[derive(Debug, Default)]
pub struct SessionCookie {
    value: OnceLock<String>,
}

impl SessionCookie {
    /// Creates an empty cookie cell.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a cell already holding `value`; an empty value leaves it unset.
    #[must_use]
    pub fn preset(value: &str) -> Self {
        let cookie = Self::new();
        if !value.is_empty() {
            let _ = cookie.value.set(value.to_string());
        }
        cookie
    }

    /// Returns the installed cookie header value, if any.
    #[must_use]
    pub fn get(&self) -> Option<&str> {
        self.value.get().map(String::as_str)
    }

    /// Installs `cookies` formatted as `k=v; k=v` unless a value is already set.
    ///
    /// Returns `true` only for the call that performed the installation.
    pub fn learn(&self, cookies: &[(String, String)]) -> bool {
        if self.value.get().is_some() || cookies.is_empty() {
            return false;
        }
        let formatted = format_cookies(cookies);
        let installed = self.value.set(formatted).is_ok();
        if installed {
            info!(count = cookies.len(), "session cookie learned");
        }
        installed
    }
}

/// Formats cookie pairs as a single `Cookie` header value.
#[must_use]
pub fn format_cookies(cookies: &[(String, String)]) -> String {
    cookies
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Final location and cookies of a redirect-following probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeResponse {
    /// URL after all redirects.
    pub final_url: String,
    /// Cookies set by the final response, in header order.
    pub cookies: Vec<(String, String)>,
}

/// One HEAD-style request that follows redirects and reports where it landed.
#[async_trait]
pub trait RedirectProbe: Send + Sync {
    /// Probes `url`, failing on transport errors and non-2xx final statuses.
    async fn probe(&self, url: &str) -> Result<ProbeResponse, RequestError>;
}

/// Shared HTTP client, header bundles and session cookie.
#[derive(Debug)]
pub struct Session {
    client: Client,
    cookie: SessionCookie,
}

impl Session {
    /// Builds the session from validated settings.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError`] if the client or proxy cannot be constructed.
    pub fn new(settings: &Settings) -> Result<Self, SessionError> {
        Self::with_options(settings.timeout_duration(), &settings.proxy, &settings.cookie)
    }

    /// Builds a session with explicit timeout, proxy and preset cookie.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError`] if the client or proxy cannot be constructed.
    pub fn with_options(
        timeout: Duration,
        proxy: &ProxySetting,
        cookie: &str,
    ) -> Result<Self, SessionError> {
        let builder = Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .redirect(redirect::Policy::limited(MAX_REDIRECTS))
            .gzip(true);
        let builder = apply_proxy(builder, proxy)?;
        let client = builder.build().map_err(SessionError::Client)?;
        debug!(timeout_secs = timeout.as_secs(), ?proxy, "session created");

        Ok(Self {
            client,
            cookie: SessionCookie::preset(cookie),
        })
    }

    /// Returns the underlying HTTP client.
    #[must_use]
    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Returns the session cookie cell.
    #[must_use]
    pub fn cookie(&self) -> &SessionCookie {
        &self.cookie
    }

    /// Builds the header bundle for `kind`, including the cookie once learned.
    #[must_use]
    pub fn headers(&self, kind: HeaderKind) -> HeaderMap {
        let mut headers = HeaderMap::new();
        let user_agent = match kind {
            HeaderKind::App | HeaderKind::AppData => APP_USER_AGENT,
            HeaderKind::Pc | HeaderKind::PcData => PC_USER_AGENT,
        };
        headers.insert(USER_AGENT, HeaderValue::from_static(user_agent));
        headers.insert(
            ACCEPT_LANGUAGE,
            HeaderValue::from_static("zh-CN,zh;q=0.9,en;q=0.8"),
        );
        match kind {
            HeaderKind::App | HeaderKind::Pc => {
                headers.insert(
                    ACCEPT,
                    HeaderValue::from_static("text/html,application/xhtml+xml,*/*;q=0.8"),
                );
            }
            HeaderKind::AppData | HeaderKind::PcData => {
                headers.insert(ACCEPT, HeaderValue::from_static("application/json, */*"));
                headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
            }
        }
        if matches!(kind, HeaderKind::Pc | HeaderKind::PcData) {
            headers.insert(REFERER, HeaderValue::from_static(PC_REFERER));
        }
        if kind == HeaderKind::PcData {
            headers.insert(ORIGIN, HeaderValue::from_static("https://www.kuaishou.com"));
        }
        if let Some(value) = self.cookie.get().and_then(|c| HeaderValue::from_str(c).ok()) {
            headers.insert(COOKIE, value);
        }
        headers
    }

    /// Sends a GET with the `kind` bundle, mapping failures into [`RequestError`].
    ///
    /// # Errors
    ///
    /// Returns [`RequestError`] on transport failure or a non-2xx status.
    #[instrument(level = "debug", skip(self))]
    pub async fn send(&self, url: &str, kind: HeaderKind) -> Result<reqwest::Response, RequestError> {
        let response = self
            .client
            .get(parse_url(url)?)
            .headers(self.headers(kind))
            .send()
            .await
            .map_err(|e| RequestError::from_reqwest(url, e))?;
        ensure_success(url, response)
    }
}

#[async_trait]
impl RedirectProbe for Session {
    #[instrument(level = "debug", skip(self))]
    async fn probe(&self, url: &str) -> Result<ProbeResponse, RequestError> {
        let response = self
            .client
            .head(parse_url(url)?)
            .headers(self.headers(HeaderKind::for_url(url)))
            .send()
            .await
            .map_err(|e| RequestError::from_reqwest(url, e))?;
        let response = ensure_success(url, response)?;

        let cookies = response
            .cookies()
            .map(|c| (c.name().to_string(), c.value().to_string()))
            .collect();
        Ok(ProbeResponse {
            final_url: response.url().to_string(),
            cookies,
        })
    }
}

fn parse_url(url: &str) -> Result<Url, RequestError> {
    Url::parse(url).map_err(|_| RequestError::invalid_url(url))
}

fn ensure_success(url: &str, response: reqwest::Response) -> Result<reqwest::Response, RequestError> {
    let status = response.status();
    if status.is_success() {
        Ok(response)
    } else {
        Err(RequestError::http_status(url, status.as_u16()))
    }
}

fn apply_proxy(builder: ClientBuilder, proxy: &ProxySetting) -> Result<ClientBuilder, SessionError> {
    match proxy {
        ProxySetting::None => Ok(builder.no_proxy()),
        ProxySetting::All(url) => Ok(builder.proxy(proxy_for(url, Proxy::all(url.as_str()))?)),
        ProxySetting::PerScheme { http, https } => {
            let mut builder = builder.no_proxy();
            if let Some(url) = http {
                builder = builder.proxy(proxy_for(url, Proxy::http(url.as_str()))?);
            }
            if let Some(url) = https {
                builder = builder.proxy(proxy_for(url, Proxy::https(url.as_str()))?);
            }
            Ok(builder)
        }
    }
}

fn proxy_for(url: &str, result: reqwest::Result<Proxy>) -> Result<Proxy, SessionError> {
    result.map_err(|source| SessionError::Proxy {
        proxy: url.to_string(),
        source,
    })
}
