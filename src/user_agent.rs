//! Shared User-Agent strings for App-variant and PC-variant traffic.
//!
//! The platform serves different page shapes to mobile and desktop clients,
//! so every header bundle picks one of these two identities.

/// User-Agent sent with App header bundles (mobile share pages).
pub(crate) const APP_USER_AGENT: &str = "Mozilla/5.0 (iPhone; CPU iPhone OS 17_5 like Mac OS X) \
     AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.5 Mobile/15E148 Safari/604.1";

/// User-Agent sent with PC header bundles (desktop detail pages).
pub(crate) const PC_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
     AppleWebKit/537.36 (KHTML, like Gecko) Chrome/126.0.0.0 Safari/537.36";
