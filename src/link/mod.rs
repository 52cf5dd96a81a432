//! Link resolution and detail-parameter extraction.
//!
//! This module turns pasted text into canonical detail URLs and parses the
//! identifying parameters out of them.
//!
//! # Example
//!
//! ```no_run
//! use ks_downloader_core::link::{Examiner, extract_params};
//! use ks_downloader_core::{RetryPolicy, Session, Settings};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let session = Session::new(&Settings::default())?;
//! let examiner = Examiner::new(&session, session.cookie(), RetryPolicy::new(2));
//! let resolution = examiner.resolve("look at v.kuaishou.com/abc123").await;
//! for link in &resolution.links {
//!     let params = extract_params(link)?;
//!     println!("{} -> {}", link.url, params.detail_id);
//! }
//! # Ok(())
//! # }
//! ```

mod error;
mod examiner;
mod params;

pub use error::LinkError;
pub use examiner::Examiner;
pub use params::{DetailParameters, extract_params};

use serde::{Deserialize, Serialize};

use crate::session::HeaderKind;

/// Which URL family a resolved link belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Variant {
    /// Mobile share-link family.
    App,
    /// Desktop canonical family.
    Pc,
}

impl Variant {
    /// Header bundle used for page requests of this variant.
    #[must_use]
    pub fn page_headers(self) -> HeaderKind {
        match self {
            Self::App => HeaderKind::App,
            Self::Pc => HeaderKind::Pc,
        }
    }
}

/// A canonical URL that survived redirect resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedLink {
    /// Canonical detail URL.
    pub url: String,
    /// Variant the URL was resolved under.
    pub variant: Variant,
}

/// Outcome of resolving one raw input.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Resolution {
    /// Pass that produced the links; `None` when nothing was reachable.
    pub variant: Option<Variant>,
    /// Canonical links in classification order.
    pub links: Vec<ResolvedLink>,
}

impl Resolution {
    /// Resolution with no variant and no links.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// True when no canonical link was produced.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    /// The canonical URLs in order.
    #[must_use]
    pub fn urls(&self) -> Vec<&str> {
        self.links.iter().map(|l| l.url.as_str()).collect()
    }
}
