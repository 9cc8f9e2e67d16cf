//! Environment-driven application settings.

use std::path::PathBuf;
use std::time::Duration;

/// Application settings loaded from environment variables.
///
/// Every field has a default so the binary starts with no configuration at
/// all; unparseable values fall back to the default rather than aborting.
#[derive(Debug, Clone)]
pub struct Settings {
    pub app_name: String,
    pub app_version: String,
    pub debug: bool,

    /// Comma-separated list of allowed CORS origins.
    pub cors_origins: String,

    pub session_ttl_minutes: i64,

    pub browser_headless: bool,
    pub browser_timeout_ms: u64,
    pub navigation_timeout_ms: u64,

    pub max_pages_per_audit: usize,
    pub max_depth: usize,
    pub page_load_wait_ms: u64,

    pub artifacts_dir: PathBuf,

    pub allow_private_ips: bool,
    pub rate_limit_per_minute: usize,

    pub log_level: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            app_name: "ProdReady Audit".to_string(),
            app_version: "1.0.0".to_string(),
            debug: false,
            cors_origins: "http://localhost:5173,http://localhost:3000".to_string(),
            session_ttl_minutes: 30,
            browser_headless: cfg!(target_os = "linux"),
            browser_timeout_ms: 30_000,
            navigation_timeout_ms: 60_000,
            max_pages_per_audit: 20,
            max_depth: 2,
            page_load_wait_ms: 3_000,
            artifacts_dir: PathBuf::from("./artifacts"),
            allow_private_ips: false,
            rate_limit_per_minute: 30,
            log_level: "info".to_string(),
        }
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

impl Settings {
    /// Load settings from the environment, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            app_name: parse_env("APP_NAME", defaults.app_name),
            app_version: parse_env("APP_VERSION", defaults.app_version),
            debug: parse_env("DEBUG", defaults.debug),
            cors_origins: parse_env("CORS_ORIGINS", defaults.cors_origins),
            session_ttl_minutes: parse_env("SESSION_TTL_MINUTES", defaults.session_ttl_minutes),
            // Recorded for operator visibility; the browser manager's platform
            // heuristic decides the actual mode.
            browser_headless: parse_env("PLAYWRIGHT_HEADLESS", defaults.browser_headless),
            browser_timeout_ms: parse_env("PLAYWRIGHT_TIMEOUT_MS", defaults.browser_timeout_ms),
            navigation_timeout_ms: parse_env(
                "PLAYWRIGHT_NAVIGATION_TIMEOUT_MS",
                defaults.navigation_timeout_ms,
            ),
            max_pages_per_audit: parse_env("MAX_PAGES_PER_AUDIT", defaults.max_pages_per_audit),
            max_depth: parse_env("MAX_DEPTH", defaults.max_depth),
            page_load_wait_ms: parse_env("PAGE_LOAD_WAIT_MS", defaults.page_load_wait_ms),
            artifacts_dir: std::env::var("ARTIFACTS_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.artifacts_dir),
            allow_private_ips: parse_env("ALLOW_PRIVATE_IPS", defaults.allow_private_ips),
            rate_limit_per_minute: parse_env(
                "RATE_LIMIT_PER_MINUTE",
                defaults.rate_limit_per_minute,
            ),
            log_level: parse_env("LOG_LEVEL", defaults.log_level),
        }
    }

    pub fn cors_origins_list(&self) -> Vec<String> {
        self.cors_origins
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect()
    }

    pub fn navigation_timeout(&self) -> Duration {
        Duration::from_millis(self.navigation_timeout_ms)
    }

    pub fn page_load_wait(&self) -> Duration {
        Duration::from_millis(self.page_load_wait_ms)
    }

    /// Directory holding a session's artifacts (storage state).
    pub fn session_dir(&self, session_id: &str) -> PathBuf {
        self.artifacts_dir.join("sessions").join(session_id)
    }

    /// Path of a session's serialized storage state.
    pub fn storage_state_path(&self, session_id: &str) -> PathBuf {
        self.session_dir(session_id).join("storage_state.json")
    }

    /// Directory holding an audit's artifacts (screenshots, preview frames).
    pub fn audit_dir(&self, audit_id: &str) -> PathBuf {
        self.artifacts_dir.join("audits").join(audit_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let s = Settings::default();
        assert_eq!(s.session_ttl_minutes, 30);
        assert_eq!(s.max_pages_per_audit, 20);
        assert_eq!(s.rate_limit_per_minute, 30);
        assert!(!s.allow_private_ips);
        assert_eq!(s.navigation_timeout(), Duration::from_secs(60));
    }

    #[test]
    fn cors_origins_split_and_trimmed() {
        let s = Settings {
            cors_origins: " http://a.test , http://b.test ,".to_string(),
            ..Settings::default()
        };
        assert_eq!(s.cors_origins_list(), vec!["http://a.test", "http://b.test"]);
    }

    #[test]
    fn artifact_paths_nest_under_artifacts_dir() {
        let s = Settings {
            artifacts_dir: PathBuf::from("/tmp/art"),
            ..Settings::default()
        };
        assert_eq!(
            s.storage_state_path("s1"),
            PathBuf::from("/tmp/art/sessions/s1/storage_state.json")
        );
        assert_eq!(s.audit_dir("a1"), PathBuf::from("/tmp/art/audits/a1"));
    }
}
