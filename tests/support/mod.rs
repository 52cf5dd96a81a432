//! Shared helpers for integration tests.

#![allow(dead_code)]

pub mod socket_guard;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use ks_downloader_core::{ProxySetting, Session};
use wiremock::{Request, Respond, ResponseTemplate};

/// Session with a short timeout and no proxy.
pub fn test_session() -> Arc<Session> {
    Arc::new(
        Session::with_options(Duration::from_secs(5), &ProxySetting::None, "")
            .expect("session builds"),
    )
}

/// Responder that fails the first `fail_count` requests with 503, then serves `body`.
pub struct FlakyResponder {
    pub request_count: Arc<AtomicUsize>,
    pub fail_count: usize,
    pub body: Vec<u8>,
}

impl FlakyResponder {
    pub fn new(fail_count: usize, body: &[u8]) -> (Self, Arc<AtomicUsize>) {
        let request_count = Arc::new(AtomicUsize::new(0));
        (
            Self {
                request_count: Arc::clone(&request_count),
                fail_count,
                body: body.to_vec(),
            },
            request_count,
        )
    }
}

impl Respond for FlakyResponder {
    fn respond(&self, _request: &Request) -> ResponseTemplate {
        let n = self.request_count.fetch_add(1, Ordering::SeqCst);
        if n < self.fail_count {
            ResponseTemplate::new(503)
        } else {
            ResponseTemplate::new(200).set_body_bytes(self.body.clone())
        }
    }
}
