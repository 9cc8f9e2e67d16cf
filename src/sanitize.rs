//! URL validation and normalization.
//!
//! Audit targets must be plain http(s) URLs pointing at public hosts;
//! private and loopback addresses are rejected unless explicitly allowed so
//! the service cannot be pointed at internal infrastructure.

use std::net::IpAddr;

use thiserror::Error;
use url::{Host, Url};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum UrlError {
    #[error("URL is required")]
    Empty,
    #[error("URL must start with http:// or https://")]
    BadScheme,
    #[error("URL must have a valid host")]
    MissingHost,
    #[error("Private/local IP addresses are not allowed. Set ALLOW_PRIVATE_IPS=true for internal testing.")]
    PrivateHost,
    #[error("Invalid path traversal in URL")]
    PathTraversal,
    #[error("Invalid URL format: {0}")]
    Malformed(String),
}

/// Validate a target URL for auditing.
pub fn validate_url(raw: &str, allow_private_ips: bool) -> Result<Url, UrlError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(UrlError::Empty);
    }

    if !raw.starts_with("http://") && !raw.starts_with("https://") {
        return Err(UrlError::BadScheme);
    }

    let url = Url::parse(raw).map_err(|e| UrlError::Malformed(e.to_string()))?;

    let Some(host) = url.host() else {
        return Err(UrlError::MissingHost);
    };

    if !allow_private_ips && is_private_host(&host) {
        return Err(UrlError::PrivateHost);
    }

    // The parser resolves dot segments, so traversal is checked on the raw
    // path portion of the input.
    if raw_path_has_traversal(raw) {
        return Err(UrlError::PathTraversal);
    }

    Ok(url)
}

fn raw_path_has_traversal(raw: &str) -> bool {
    let after_scheme = raw.splitn(2, "://").nth(1).unwrap_or(raw);
    let Some(slash) = after_scheme.find('/') else {
        return false;
    };
    let path = after_scheme[slash..]
        .split(['?', '#'])
        .next()
        .unwrap_or_default();
    path.contains("..")
}

/// Whether the host is a loopback, private, or link-local address.
fn is_private_host(host: &Host<&str>) -> bool {
    match host {
        Host::Domain(name) => {
            let name = name.to_ascii_lowercase();
            name == "localhost" || name == "localhost.localdomain"
        }
        Host::Ipv4(addr) => is_private_ip(IpAddr::V4(*addr)),
        Host::Ipv6(addr) => is_private_ip(IpAddr::V6(*addr)),
    }
}

fn is_private_ip(ip: IpAddr) -> bool {
    match ip {
        // 10/8, 172.16/12, 192.168/16, 127/8, 169.254/16
        IpAddr::V4(v4) => v4.is_private() || v4.is_loopback() || v4.is_link_local(),
        // ::1, fe80::/10, fc00::/7
        IpAddr::V6(v6) => {
            v6.is_loopback()
                || (v6.segments()[0] & 0xffc0) == 0xfe80
                || (v6.segments()[0] & 0xfe00) == 0xfc00
        }
    }
}

/// The authority component used for same-domain checks (host plus any
/// explicit port).
pub fn netloc(url: &Url) -> String {
    let host = url.host_str().unwrap_or("");
    match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    }
}

/// Reduce a URL to `scheme://host[:port]/path`, dropping query and fragment.
///
/// Idempotent: normalizing an already-normalized URL is a no-op.
pub fn normalize_url(url: &Url) -> String {
    format!("{}://{}{}", url.scheme(), netloc(url), url.path())
}

/// Resolve a discovered href against the page it appeared on.
///
/// Relative links are joined onto the base; absolute links pass through.
pub fn resolve_link(page_url: &Url, href: &str) -> Option<Url> {
    page_url.join(href).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn accepts_plain_https_url() {
        assert!(validate_url("https://example.test/app", false).is_ok());
    }

    #[test]
    fn rejects_empty_and_bad_scheme() {
        assert_eq!(validate_url("", false), Err(UrlError::Empty));
        assert_eq!(validate_url("   ", false), Err(UrlError::Empty));
        assert_eq!(validate_url("ftp://example.test", false), Err(UrlError::BadScheme));
        assert_eq!(validate_url("example.test", false), Err(UrlError::BadScheme));
    }

    #[test]
    fn rejects_private_hosts_unless_allowed() {
        for raw in [
            "http://127.0.0.1/",
            "http://localhost/",
            "http://10.1.2.3/",
            "http://172.16.0.1/",
            "http://192.168.1.1/",
            "http://169.254.0.1/",
            "http://[::1]/",
            "http://[fe80::1]/",
            "http://[fc00::1]/",
        ] {
            assert_eq!(validate_url(raw, false), Err(UrlError::PrivateHost), "{raw}");
            assert!(validate_url(raw, true).is_ok(), "{raw}");
        }
    }

    #[test]
    fn public_ipv4_is_not_private() {
        assert!(validate_url("http://8.8.8.8/", false).is_ok());
        assert!(validate_url("http://172.32.0.1/", false).is_ok());
    }

    #[test]
    fn rejects_path_traversal() {
        assert_eq!(
            validate_url("https://example.test/a/../b", false),
            Err(UrlError::PathTraversal)
        );
    }

    #[test]
    fn normalize_drops_query_and_fragment() {
        let url = Url::parse("https://example.test/a/b?x=1#frag").unwrap();
        assert_eq!(normalize_url(&url), "https://example.test/a/b");
    }

    #[test]
    fn normalize_keeps_explicit_port() {
        let url = Url::parse("https://example.test:8443/a").unwrap();
        assert_eq!(normalize_url(&url), "https://example.test:8443/a");
    }

    #[test]
    fn resolve_link_handles_relative_hrefs() {
        let base = Url::parse("https://example.test/docs/index.html").unwrap();
        let resolved = resolve_link(&base, "../about").unwrap();
        assert_eq!(resolved.as_str(), "https://example.test/about");
    }

    proptest! {
        #[test]
        fn normalize_is_idempotent(path in "[a-z0-9/]{0,30}", query in "[a-z0-9=&]{0,10}") {
            let raw = format!("https://example.test/{path}?{query}");
            if let Ok(url) = Url::parse(&raw) {
                let once = normalize_url(&url);
                let reparsed = Url::parse(&once).unwrap();
                prop_assert_eq!(normalize_url(&reparsed), once);
            }
        }
    }
}
