//! Out-of-band security header probe.
//!
//! A single HEAD request against the audit target, independent of the
//! browser, checking for a fixed set of hardening headers.

use std::time::Duration;

use reqwest::header::HeaderMap;
use tracing::warn;

/// Headers the probe looks for.
pub const TRACKED_HEADERS: [&str; 6] = [
    "Strict-Transport-Security",
    "Content-Security-Policy",
    "X-Content-Type-Options",
    "X-Frame-Options",
    "Referrer-Policy",
    "Permissions-Policy",
];

/// Outcome of the header probe.
#[derive(Debug, Clone, Default)]
pub struct HeaderCheck {
    pub present: Vec<String>,
    pub missing: Vec<String>,
}

impl HeaderCheck {
    /// The pessimistic result used when the target cannot be reached.
    fn all_missing() -> Self {
        Self {
            present: Vec::new(),
            missing: TRACKED_HEADERS.iter().map(ToString::to_string).collect(),
        }
    }
}

/// Split the tracked header set into present/missing for a response.
pub fn classify_headers(headers: &HeaderMap) -> HeaderCheck {
    let mut check = HeaderCheck::default();
    for name in TRACKED_HEADERS {
        if headers.contains_key(name) {
            check.present.push(name.to_string());
        } else {
            check.missing.push(name.to_string());
        }
    }
    check
}

/// HEAD the target and report which tracked headers it serves.
///
/// Targets under audit often run self-signed certificates, so certificate
/// validation is disabled. Any transport failure reports every header as
/// missing rather than failing the audit.
pub async fn check_security_headers(url: &str) -> HeaderCheck {
    let client = match reqwest::Client::builder()
        .timeout(Duration::from_secs(10))
        .danger_accept_invalid_certs(true)
        .redirect(reqwest::redirect::Policy::limited(10))
        .build()
    {
        Ok(client) => client,
        Err(e) => {
            warn!(error = %e, "Failed to build header probe client");
            return HeaderCheck::all_missing();
        }
    };

    match client.head(url).send().await {
        Ok(response) => classify_headers(response.headers()),
        Err(e) => {
            warn!(url, error = %e, "Security header probe failed");
            HeaderCheck::all_missing()
        }
    }
}
