//! Audit data model: options, progress, and finding records.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditStatus {
    Queued,
    Running,
    Done,
    Error,
}

impl AuditStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            AuditStatus::Queued => "queued",
            AuditStatus::Running => "running",
            AuditStatus::Done => "done",
            AuditStatus::Error => "error",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
    Info,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlowStatus {
    Ok,
    Warning,
    Error,
}

/// Options accepted by the run-audit endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditOptions {
    #[serde(default = "default_max_pages")]
    pub max_pages: usize,
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,
    #[serde(default)]
    pub enable_form_submit: bool,
    #[serde(default = "default_true")]
    pub include_accessibility: bool,
    #[serde(default = "default_true")]
    pub screenshot_on_error: bool,
    #[serde(default)]
    pub check_ui_flows: bool,
}

fn default_max_pages() -> usize {
    20
}

fn default_max_depth() -> usize {
    2
}

fn default_true() -> bool {
    true
}

impl Default for AuditOptions {
    fn default() -> Self {
        Self {
            max_pages: default_max_pages(),
            max_depth: default_max_depth(),
            enable_form_submit: false,
            include_accessibility: true,
            screenshot_on_error: true,
            check_ui_flows: false,
        }
    }
}

impl AuditOptions {
    /// Range-check the options the way the API schema declares them.
    pub fn validate(&self) -> Result<(), String> {
        if !(1..=100).contains(&self.max_pages) {
            return Err("max_pages must be between 1 and 100".to_string());
        }
        if !(1..=5).contains(&self.max_depth) {
            return Err("max_depth must be between 1 and 5".to_string());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AuditProgress {
    pub stage: String,
    pub percent: u8,
    pub current_url: Option<String>,
    pub pages_visited: usize,
    pub errors_found: usize,
    pub message: Option<String>,
}

impl Default for AuditProgress {
    fn default() -> Self {
        Self {
            stage: "initializing".to_string(),
            percent: 0,
            current_url: None,
            pages_visited: 0,
            errors_found: 0,
            message: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ConsoleError {
    pub message: String,
    pub location: Option<String>,
    pub page_url: String,
    pub severity: Severity,
    pub stack: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// A request that failed. `status` is set when a response arrived;
/// `error` carries the transport failure when none did.
#[derive(Debug, Clone, Serialize)]
pub struct NetworkFailure {
    pub url: String,
    pub method: String,
    pub status: Option<i64>,
    pub error: Option<String>,
    pub duration_ms: Option<f64>,
    pub page_url: String,
    pub resource_type: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct UiFlowResult {
    pub page_url: String,
    pub status: FlowStatus,
    pub notes: Option<String>,
    pub screenshot_path: Option<String>,
    pub load_time_ms: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PageTiming {
    pub url: String,
    pub ttfb_ms: Option<f64>,
    pub dom_content_loaded_ms: Option<f64>,
    pub load_ms: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LargeAsset {
    pub url: String,
    pub size_bytes: u64,
    #[serde(rename = "type")]
    pub content_type: String,
    pub page_url: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SlowEndpoint {
    pub url: String,
    pub method: String,
    pub duration_ms: f64,
    pub status: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CookieFlagIssue {
    pub name: String,
    pub domain: String,
    pub issues: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SecurityHygiene {
    pub https_ok: bool,
    pub headers_present: Vec<String>,
    pub headers_missing: Vec<String>,
    pub cookie_flags_issues: Vec<CookieFlagIssue>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AccessibilityViolation {
    pub id: String,
    pub impact: String,
    pub description: String,
    pub help_url: Option<String>,
    pub nodes_count: usize,
    pub page_url: String,
}

/// The per-audit mutable record. Mutated exclusively through
/// [`super::store::AuditManager`] so every write happens under its mutex.
#[derive(Debug, Clone)]
pub struct AuditRecord {
    pub audit_id: String,
    pub session_id: String,
    pub url: String,
    pub options: AuditOptions,
    pub status: AuditStatus,
    pub progress: AuditProgress,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,

    pub console_errors: Vec<ConsoleError>,
    pub network_failures: Vec<NetworkFailure>,
    pub ui_flows: Vec<UiFlowResult>,
    pub page_timings: Vec<PageTiming>,
    pub large_assets: Vec<LargeAsset>,
    pub slow_endpoints: Vec<SlowEndpoint>,
    pub security_hygiene: Option<SecurityHygiene>,
    pub accessibility_violations: Vec<AccessibilityViolation>,

    /// Normalized URLs, in visit order.
    pub visited_urls: Vec<String>,
    /// Normalized URLs, in discovery order; disjoint from `visited_urls`.
    pub discovered_urls: Vec<String>,
    pub total_requests: u64,

    pub artifacts_dir: PathBuf,
    pub screenshots: Vec<PathBuf>,
    pub preview_image_path: Option<PathBuf>,
    pub preview_updated_at: Option<DateTime<Utc>>,
}

impl AuditRecord {
    pub fn new(
        audit_id: String,
        session_id: String,
        url: String,
        options: AuditOptions,
        artifacts_dir: PathBuf,
    ) -> Self {
        Self {
            audit_id,
            session_id,
            url,
            options,
            status: AuditStatus::Queued,
            progress: AuditProgress::default(),
            started_at: Utc::now(),
            finished_at: None,
            error_message: None,
            console_errors: Vec::new(),
            network_failures: Vec::new(),
            ui_flows: Vec::new(),
            page_timings: Vec::new(),
            large_assets: Vec::new(),
            slow_endpoints: Vec::new(),
            security_hygiene: None,
            accessibility_violations: Vec::new(),
            visited_urls: Vec::new(),
            discovered_urls: Vec::new(),
            total_requests: 0,
            artifacts_dir,
            screenshots: Vec::new(),
            preview_image_path: None,
            preview_updated_at: None,
        }
    }

    pub fn errors_found(&self) -> usize {
        self.console_errors.len() + self.network_failures.len()
    }

    pub fn ui_error_count(&self) -> usize {
        self.ui_flows
            .iter()
            .filter(|f| f.status == FlowStatus::Error)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn options_defaults_match_schema() {
        let options: AuditOptions = serde_json::from_str("{}").unwrap();
        assert_eq!(options.max_pages, 20);
        assert_eq!(options.max_depth, 2);
        assert!(!options.enable_form_submit);
        assert!(options.include_accessibility);
        assert!(options.screenshot_on_error);
        assert!(!options.check_ui_flows);
    }

    #[test]
    fn options_range_validation() {
        let mut options = AuditOptions::default();
        assert!(options.validate().is_ok());

        options.max_pages = 0;
        assert!(options.validate().is_err());
        options.max_pages = 101;
        assert!(options.validate().is_err());
        options.max_pages = 100;
        assert!(options.validate().is_ok());

        options.max_depth = 6;
        assert!(options.validate().is_err());
    }

    #[test]
    fn status_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&AuditStatus::Queued).unwrap(),
            "\"queued\""
        );
        assert_eq!(serde_json::to_string(&FlowStatus::Ok).unwrap(), "\"ok\"");
    }
}
