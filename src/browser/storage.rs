//! Serialized browser storage state.
//!
//! The on-disk format is the Playwright-compatible shape
//! `{cookies: [...], origins: [{origin, localStorage: [{name, value}]}]}`
//! so captured logins survive context teardown and can seed fresh contexts.

use std::path::Path;

use chromiumoxide::cdp::browser_protocol::network::{
    Cookie, CookieParam, CookieSameSite, TimeSinceEpoch,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct StorageState {
    #[serde(default)]
    pub cookies: Vec<StoredCookie>,
    #[serde(default)]
    pub origins: Vec<StorageOrigin>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredCookie {
    pub name: String,
    pub value: String,
    pub domain: String,
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires: Option<f64>,
    #[serde(default)]
    pub http_only: bool,
    #[serde(default)]
    pub secure: bool,
    /// "Strict", "Lax", or "None" when the cookie carries the attribute.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub same_site: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageOrigin {
    pub origin: String,
    #[serde(default)]
    pub local_storage: Vec<LocalStorageEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalStorageEntry {
    pub name: String,
    pub value: String,
}

impl StorageState {
    pub async fn load(path: &Path) -> Result<Self, std::io::Error> {
        let content = tokio::fs::read_to_string(path).await?;
        serde_json::from_str(&content)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }

    pub async fn save(&self, path: &Path) -> Result<(), std::io::Error> {
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        tokio::fs::write(path, content).await
    }

    /// An init script that reseeds localStorage before any page script runs.
    ///
    /// Cookies are restored at the CDP level when a context is minted, but
    /// localStorage is origin-scoped and only writable from inside a
    /// document, so auth tokens kept there have to be replayed by the page
    /// itself. Sites under audit keep login state in cookies and
    /// localStorage; nothing else is captured, so nothing else is replayed.
    ///
    /// Returns `None` when no origin has entries.
    pub fn local_storage_init_script(&self) -> Option<String> {
        let per_origin: serde_json::Map<String, serde_json::Value> = self
            .origins
            .iter()
            .filter(|origin| !origin.local_storage.is_empty())
            .map(|origin| {
                let entries = origin
                    .local_storage
                    .iter()
                    .map(|entry| (entry.name.clone(), entry.value.clone().into()))
                    .collect::<serde_json::Map<String, serde_json::Value>>();
                (origin.origin.clone(), entries.into())
            })
            .collect();

        if per_origin.is_empty() {
            return None;
        }

        // Serialized as one JSON object keyed by origin; the script applies
        // only the slice matching the document it runs in.
        let seeded = serde_json::Value::Object(per_origin).to_string();
        Some(format!(
            r"(() => {{
    const seeded = {seeded};
    const mine = seeded[window.location.origin];
    if (!mine) return;
    for (const [key, value] of Object.entries(mine)) {{
        try {{ localStorage.setItem(key, value); }} catch {{ /* quota or access denied */ }}
    }}
}})();"
        ))
    }
}

impl StoredCookie {
    pub fn from_cdp(cookie: &Cookie) -> Self {
        let expires = cookie.expires;
        Self {
            name: cookie.name.clone(),
            value: cookie.value.clone(),
            domain: cookie.domain.clone(),
            path: cookie.path.clone(),
            // Chromium reports -1 for session cookies.
            expires: (expires > 0.0).then_some(expires),
            http_only: cookie.http_only,
            secure: cookie.secure,
            same_site: cookie.same_site.as_ref().map(same_site_name),
        }
    }

    /// Rebuild the CDP cookie parameter used to seed a fresh context.
    pub fn to_param(&self) -> Result<CookieParam, String> {
        let mut builder = CookieParam::builder()
            .name(self.name.clone())
            .value(self.value.clone())
            .domain(self.domain.clone())
            .path(self.path.clone())
            .secure(self.secure)
            .http_only(self.http_only);
        if let Some(site) = self.same_site.as_deref().and_then(parse_same_site) {
            builder = builder.same_site(site);
        }
        if let Some(expires) = self.expires {
            builder = builder.expires(TimeSinceEpoch::new(expires));
        }
        builder.build()
    }

    /// Whether the cookie carries a SameSite attribute other than "None".
    pub fn has_effective_same_site(&self) -> bool {
        matches!(self.same_site.as_deref(), Some("Strict") | Some("Lax"))
    }
}

fn same_site_name(site: &CookieSameSite) -> String {
    match site {
        CookieSameSite::Strict => "Strict".to_string(),
        CookieSameSite::Lax => "Lax".to_string(),
        CookieSameSite::None => "None".to_string(),
    }
}

fn parse_same_site(name: &str) -> Option<CookieSameSite> {
    match name {
        "Strict" => Some(CookieSameSite::Strict),
        "Lax" => Some(CookieSameSite::Lax),
        "None" => Some(CookieSameSite::None),
        _ => Option::None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cookie(name: &str) -> StoredCookie {
        StoredCookie {
            name: name.to_string(),
            value: "v".to_string(),
            domain: "example.test".to_string(),
            path: "/".to_string(),
            expires: None,
            http_only: false,
            secure: false,
            same_site: None,
        }
    }

    #[test]
    fn round_trips_through_json() {
        let state = StorageState {
            cookies: vec![StoredCookie {
                secure: true,
                http_only: true,
                same_site: Some("Lax".to_string()),
                ..cookie("sid")
            }],
            origins: vec![StorageOrigin {
                origin: "https://example.test".to_string(),
                local_storage: vec![LocalStorageEntry {
                    name: "token".to_string(),
                    value: "abc".to_string(),
                }],
            }],
        };

        let json = serde_json::to_string(&state).unwrap();
        assert!(json.contains("\"httpOnly\":true"));
        assert!(json.contains("\"localStorage\""));

        let back: StorageState = serde_json::from_str(&json).unwrap();
        assert_eq!(back.cookies[0].name, "sid");
        assert_eq!(back.origins[0].local_storage[0].value, "abc");
    }

    #[test]
    fn init_script_only_emitted_when_storage_exists() {
        assert!(StorageState::default().local_storage_init_script().is_none());

        let state = StorageState {
            cookies: Vec::new(),
            origins: vec![StorageOrigin {
                origin: "https://example.test".to_string(),
                local_storage: vec![LocalStorageEntry {
                    name: "k".to_string(),
                    value: "v".to_string(),
                }],
            }],
        };
        let script = state.local_storage_init_script().unwrap();
        assert!(script.contains("https://example.test"));
        assert!(script.contains("localStorage.setItem"));
    }

    #[test]
    fn cookie_param_conversion_keeps_flags() {
        let stored = StoredCookie {
            secure: true,
            http_only: true,
            same_site: Some("Strict".to_string()),
            expires: Some(2_000_000_000.0),
            ..cookie("sid")
        };
        let param = stored.to_param().unwrap();
        assert_eq!(param.name, "sid");
        assert_eq!(param.secure, Some(true));
        assert_eq!(param.http_only, Some(true));
    }

    #[test]
    fn same_site_effectiveness() {
        assert!(!cookie("a").has_effective_same_site());
        let none_site = StoredCookie {
            same_site: Some("None".to_string()),
            ..cookie("b")
        };
        assert!(!none_site.has_effective_same_site());
        let lax = StoredCookie {
            same_site: Some("Lax".to_string()),
            ..cookie("c")
        };
        assert!(lax.has_effective_same_site());
    }
}
