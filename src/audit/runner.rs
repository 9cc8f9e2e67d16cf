//! The audit runner.
//!
//! Drives one audit to completion: mint an authenticated context, attach
//! telemetry listeners before any navigation, check availability, crawl
//! same-domain pages, probe security hygiene, run the accessibility
//! scanner, then finalize. Phase-local failures degrade into findings or
//! log lines; only the initial context/page mint is fatal.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, LazyLock, Mutex};
use std::time::{Duration, Instant};

use chromiumoxide::cdp::browser_protocol::network::{
    EventLoadingFailed, EventRequestWillBeSent, EventResponseReceived, ResourceType,
};
use chromiumoxide::cdp::browser_protocol::page::{
    CaptureScreenshotFormat, CaptureScreenshotParams, CloseParams, EventFrameNavigated,
    EventLoadEventFired,
};
use chromiumoxide::cdp::js_protocol::runtime::{
    ConsoleApiCalledType, EventConsoleApiCalled, EventExceptionThrown,
};
use chromiumoxide::Page;
use chrono::Utc;
use futures::StreamExt;
use regex::Regex;
use serde::Deserialize;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use url::Url;

use super::preview::PreviewSampler;
use super::probe;
use super::store::AuditManager;
use super::types::{
    AccessibilityViolation, AuditOptions, ConsoleError, CookieFlagIssue, FlowStatus, LargeAsset,
    NetworkFailure, PageTiming, SecurityHygiene, Severity, SlowEndpoint, UiFlowResult,
};
use crate::browser::{AuditContext, BrowserManager, StoredCookie};
use crate::config::Settings;
use crate::sanitize::{netloc, normalize_url, resolve_link};
use crate::security::check_security_headers;
use crate::session::Session;

const AXE_CDN_URL: &str = "https://cdnjs.cloudflare.com/ajax/libs/axe-core/4.8.3/axe.min.js";
const MAX_VIOLATIONS: usize = 20;
const PAGE_PAUSE: Duration = Duration::from_millis(500);

const SLOW_ENDPOINT_MS: f64 = 1000.0;
const LARGE_ASSET_BYTES: i64 = 500_000;

/// Phrases that mark a rendered page as an error state even under HTTP 200.
static ERROR_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)something went wrong|error occurred|page not found|404|500 internal server error|access denied|forbidden|oops|unexpected error",
    )
    .expect("error-phrase regex")
});

const LINKS_SCRIPT: &str = r"
    (() => {
        const links = [];
        document.querySelectorAll('a[href]').forEach(a => {
            const href = a.href;
            if (href && !href.startsWith('javascript:') && !href.startsWith('mailto:')) {
                links.push(href);
            }
        });
        return links;
    })()
";

/// Entry point used by the HTTP layer: runs the audit as a background task.
pub async fn run_audit(
    settings: Arc<Settings>,
    store: Arc<AuditManager>,
    browser: Arc<BrowserManager>,
    session: Session,
    audit_id: String,
) {
    let Some(record) = store.get(&audit_id) else {
        warn!(audit_id, "Audit not found");
        return;
    };
    let Ok(target_url) = Url::parse(&record.url) else {
        store.mark_error(&audit_id, "Invalid target URL");
        store.update_progress(
            &audit_id,
            "error",
            0,
            None,
            Some("Audit failed: invalid target URL".to_string()),
        );
        return;
    };

    let runner = AuditRunner {
        settings,
        store,
        browser,
        audit_id,
        base_netloc: netloc(&target_url),
        target_url,
        options: record.options.clone(),
        artifacts_dir: record.artifacts_dir.clone(),
    };
    runner.run(&session).await;
}

struct AuditRunner {
    settings: Arc<Settings>,
    store: Arc<AuditManager>,
    browser: Arc<BrowserManager>,
    audit_id: String,
    target_url: Url,
    base_netloc: String,
    options: AuditOptions,
    artifacts_dir: PathBuf,
}

impl AuditRunner {
    async fn run(&self, session: &Session) {
        self.store.mark_running(&self.audit_id);
        self.progress("starting", 5, None, None);

        let ctx = match self.browser.create_authenticated_context(session).await {
            Ok(ctx) => ctx,
            Err(e) => return self.fail(&e.to_string()),
        };
        let page = match self.browser.new_page(&ctx).await {
            Ok(page) => page,
            Err(e) => {
                self.fail(&e.to_string());
                self.browser.close_audit_context(ctx).await;
                return;
            }
        };

        let preview = PreviewSampler::new(
            page.clone(),
            self.audit_id.clone(),
            self.store.clone(),
            &self.artifacts_dir,
        );

        // Listeners must be live before the first navigation so every event
        // for the target page is observed.
        match Telemetry::attach(
            &page,
            self.audit_id.clone(),
            self.store.clone(),
            preview.clone(),
        )
        .await
        {
            Ok(telemetry) => {
                self.check_initial_availability(&page, &telemetry, &preview).await;
                self.crawl_and_audit(&page, &telemetry, &preview).await;
                self.check_security_hygiene(&ctx).await;
                self.run_accessibility_checks(&page).await;

                self.store.mark_done(&self.audit_id);
                let visited = self
                    .store
                    .get(&self.audit_id)
                    .map_or(0, |r| r.visited_urls.len());
                self.progress(
                    "complete",
                    100,
                    None,
                    Some(format!("Audit complete. Visited {visited} pages.")),
                );
                info!(audit_id = %self.audit_id, "Audit completed successfully");
            }
            Err(e) => self.fail(&format!("Failed to attach listeners: {e}")),
        }

        let _ = page.execute(CloseParams {}).await;
        self.browser.close_audit_context(ctx).await;
    }

    fn fail(&self, message: &str) {
        warn!(audit_id = %self.audit_id, error = %message, "Audit failed");
        self.store.mark_error(&self.audit_id, message);
        self.store.update_progress(
            &self.audit_id,
            "error",
            0,
            None,
            Some(format!("Audit failed: {message}")),
        );
    }

    fn progress(&self, stage: &str, percent: u8, url: Option<String>, message: Option<String>) {
        self.store
            .update_progress(&self.audit_id, stage, percent, url, message);
    }

    /// Phase 1: does the target load at all, and with what status.
    async fn check_initial_availability(
        &self,
        page: &Page,
        telemetry: &Telemetry,
        preview: &Arc<PreviewSampler>,
    ) {
        let url = self.target_url.as_str();
        self.progress("checking_availability", 10, Some(url.to_string()), None);

        let start = Instant::now();
        let nav = tokio::time::timeout(self.settings.navigation_timeout(), page.goto(url)).await;
        let load_ms = start.elapsed().as_secs_f64() * 1000.0;

        preview.capture().await;

        let nav_error = match nav {
            Ok(Ok(_)) => None,
            Ok(Err(e)) => Some(e.to_string()),
            Err(_) => Some("navigation timed out".to_string()),
        };
        if let Some(reason) = nav_error {
            warn!(audit_id = %self.audit_id, url, reason, "Initial availability check failed");
            self.store.push_ui_flow(
                &self.audit_id,
                UiFlowResult {
                    page_url: url.to_string(),
                    status: FlowStatus::Error,
                    notes: Some(format!("Failed to load: {reason}")),
                    screenshot_path: None,
                    load_time_ms: None,
                },
            );
            return;
        }

        telemetry.set_current_url(url);
        self.store.push_timing(
            &self.audit_id,
            PageTiming {
                url: url.to_string(),
                ttfb_ms: None,
                dom_content_loaded_ms: Some(load_ms),
                load_ms: None,
            },
        );

        let (status, notes) = match telemetry.document_status() {
            Some(code) if code >= 400 => (FlowStatus::Error, Some(format!("HTTP {code}"))),
            Some(code) if code >= 300 => {
                (FlowStatus::Warning, Some(format!("Redirect: HTTP {code}")))
            }
            _ => (FlowStatus::Ok, None),
        };
        self.store.push_ui_flow(
            &self.audit_id,
            UiFlowResult {
                page_url: url.to_string(),
                status,
                notes,
                screenshot_path: None,
                load_time_ms: Some(load_ms),
            },
        );
        self.store
            .mark_visited(&self.audit_id, &normalize_url(&self.target_url));
    }

    /// Phases 2–3: discover same-domain links, then audit each selected page.
    async fn crawl_and_audit(
        &self,
        page: &Page,
        telemetry: &Telemetry,
        preview: &Arc<PreviewSampler>,
    ) {
        self.progress("crawling", 20, None, Some("Discovering pages...".to_string()));
        self.discover_links(page).await;

        let limit = self.options.max_pages.saturating_sub(1);
        let pages_to_visit = self.store.select_unvisited(&self.audit_id, limit);
        let total = pages_to_visit.len();

        for (index, url) in pages_to_visit.iter().enumerate() {
            let percent = 20 + ((index as f64 / total.max(1) as f64) * 60.0) as u8;
            self.progress(
                "auditing_pages",
                percent,
                Some(url.clone()),
                Some(format!("Checking page {}/{}", index + 1, total)),
            );

            self.audit_page(page, telemetry, preview, url).await;
            self.store.mark_visited(&self.audit_id, url);

            tokio::time::sleep(PAGE_PAUSE).await;
        }
    }

    async fn audit_page(
        &self,
        page: &Page,
        telemetry: &Telemetry,
        preview: &Arc<PreviewSampler>,
        url: &str,
    ) {
        let start = Instant::now();
        let nav = tokio::time::timeout(self.settings.navigation_timeout(), page.goto(url)).await;
        let load_ms = start.elapsed().as_secs_f64() * 1000.0;

        let nav_error = match nav {
            Ok(Ok(_)) => None,
            Ok(Err(e)) => Some(e.to_string()),
            Err(_) => Some("navigation timed out".to_string()),
        };
        if let Some(reason) = nav_error {
            warn!(audit_id = %self.audit_id, url, reason, "Failed to audit page");
            self.store.push_ui_flow(
                &self.audit_id,
                UiFlowResult {
                    page_url: url.to_string(),
                    status: FlowStatus::Error,
                    notes: Some(format!("Failed: {reason}")),
                    screenshot_path: None,
                    load_time_ms: None,
                },
            );
            return;
        }

        telemetry.set_current_url(url);

        // Let late XHRs and lazy rendering settle before inspecting.
        tokio::time::sleep(self.settings.page_load_wait()).await;

        let interaction_notes = if self.options.check_ui_flows {
            probe::probe_safe_interactions(page, &self.base_netloc, preview, telemetry.in_flight())
                .await
        } else {
            None
        };

        self.store.push_timing(
            &self.audit_id,
            PageTiming {
                url: url.to_string(),
                ttfb_ms: None,
                dom_content_loaded_ms: Some(load_ms),
                load_ms: None,
            },
        );

        let content = page.content().await.unwrap_or_default();
        let (status, mut notes) = classify_page(&content, telemetry.document_status());

        let screenshot_path = if status != FlowStatus::Ok && self.options.screenshot_on_error {
            self.take_screenshot(page).await
        } else {
            None
        };

        if let Some(extra) = interaction_notes {
            notes = Some(match notes {
                Some(existing) => format!("{existing} | {extra}"),
                None => extra,
            });
        }

        self.store.push_ui_flow(
            &self.audit_id,
            UiFlowResult {
                page_url: url.to_string(),
                status,
                notes,
                screenshot_path: screenshot_path.map(|p| p.display().to_string()),
                load_time_ms: Some(load_ms),
            },
        );

        self.discover_links(page).await;
        preview.capture().await;
    }

    async fn discover_links(&self, page: &Page) {
        let hrefs: Vec<String> = match page.evaluate(LINKS_SCRIPT).await {
            Ok(result) => result.into_value().unwrap_or_default(),
            Err(e) => {
                warn!(audit_id = %self.audit_id, error = %e, "Link discovery failed");
                return;
            }
        };

        let found = same_domain_links(&self.target_url, &self.base_netloc, &hrefs);
        let discovered = self.store.add_discovered(&self.audit_id, found);
        info!(audit_id = %self.audit_id, discovered, "Discovered links");
    }

    async fn take_screenshot(&self, page: &Page) -> Option<PathBuf> {
        let path = self.store.next_screenshot_path(&self.audit_id)?;
        let params = CaptureScreenshotParams {
            format: Some(CaptureScreenshotFormat::Png),
            ..Default::default()
        };
        let bytes = match page.screenshot(params).await {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(audit_id = %self.audit_id, error = %e, "Failed to take screenshot");
                return None;
            }
        };
        if let Err(e) = tokio::fs::write(&path, &bytes).await {
            warn!(audit_id = %self.audit_id, error = %e, "Failed to save screenshot");
            return None;
        }
        self.store.record_screenshot(&self.audit_id, path.clone());
        Some(path)
    }

    /// Phase 4: HTTPS, response headers, cookie flags.
    async fn check_security_hygiene(&self, ctx: &AuditContext) {
        self.progress(
            "security_check",
            85,
            None,
            Some("Checking security hygiene...".to_string()),
        );

        let https_ok = self.target_url.scheme() == "https";
        let headers = check_security_headers(self.target_url.as_str()).await;

        let cookies = match self.browser.context_cookies(ctx).await {
            Ok(cookies) => cookies,
            Err(e) => {
                warn!(audit_id = %self.audit_id, error = %e, "Cookie check failed");
                Vec::new()
            }
        };

        self.store.set_security(
            &self.audit_id,
            SecurityHygiene {
                https_ok,
                headers_present: headers.present,
                headers_missing: headers.missing,
                cookie_flags_issues: cookie_flag_issues(&cookies),
            },
        );
    }

    /// Phase 5: in-page axe-core scan of the target URL.
    async fn run_accessibility_checks(&self, page: &Page) {
        if !self.options.include_accessibility {
            return;
        }
        self.progress(
            "accessibility_check",
            90,
            None,
            Some("Running accessibility checks...".to_string()),
        );

        let nav = tokio::time::timeout(
            self.settings.navigation_timeout(),
            page.goto(self.target_url.as_str()),
        )
        .await;
        if !matches!(nav, Ok(Ok(_))) {
            warn!(audit_id = %self.audit_id, "Accessibility check navigation failed");
            return;
        }

        let evaluation = tokio::time::timeout(
            Duration::from_millis(self.settings.browser_timeout_ms),
            page.evaluate(axe_script()),
        )
        .await;
        let results: AxeResults = match evaluation {
            Ok(Ok(result)) => result.into_value().unwrap_or_default(),
            Ok(Err(e)) => {
                warn!(audit_id = %self.audit_id, error = %e, "Accessibility check failed");
                return;
            }
            Err(_) => {
                warn!(audit_id = %self.audit_id, "Accessibility check timed out");
                return;
            }
        };

        for violation in results.violations.into_iter().take(MAX_VIOLATIONS) {
            self.store.push_violation(
                &self.audit_id,
                AccessibilityViolation {
                    id: violation.id,
                    impact: violation.impact.unwrap_or_else(|| "moderate".to_string()),
                    description: violation.description,
                    help_url: violation.help_url,
                    nodes_count: violation.nodes,
                    page_url: self.target_url.to_string(),
                },
            );
        }
    }
}

fn axe_script() -> String {
    format!(
        r#"
        (async () => {{
            if (typeof axe === 'undefined') {{
                await new Promise((resolve, reject) => {{
                    const script = document.createElement('script');
                    script.src = '{AXE_CDN_URL}';
                    script.onload = resolve;
                    script.onerror = () => reject(new Error('failed to load accessibility scanner'));
                    document.head.appendChild(script);
                }});
            }}
            if (typeof axe === 'undefined') return {{ violations: [] }};
            const results = await axe.run();
            return {{
                violations: results.violations.slice(0, {MAX_VIOLATIONS}).map(v => ({{
                    id: v.id,
                    impact: v.impact,
                    description: v.description,
                    helpUrl: v.helpUrl,
                    nodes: v.nodes.length
                }}))
            }};
        }})()
        "#
    )
}

#[derive(Debug, Default, Deserialize)]
struct AxeResults {
    #[serde(default)]
    violations: Vec<AxeViolation>,
}

#[derive(Debug, Deserialize)]
struct AxeViolation {
    id: String,
    #[serde(default)]
    impact: Option<String>,
    #[serde(default)]
    description: String,
    #[serde(default, rename = "helpUrl")]
    help_url: Option<String>,
    #[serde(default)]
    nodes: usize,
}

/// Keep only links on the audit's base domain, normalized to
/// `scheme://host/path`. Relative hrefs resolve against the target URL.
pub(crate) fn same_domain_links(target: &Url, base_netloc: &str, hrefs: &[String]) -> Vec<String> {
    let mut found = Vec::new();
    for href in hrefs {
        let Some(resolved) = resolve_link(target, href) else {
            continue;
        };
        if !matches!(resolved.scheme(), "http" | "https") {
            continue;
        }
        if netloc(&resolved) != base_netloc {
            continue;
        }
        found.push(normalize_url(&resolved));
    }
    found
}

/// Decide a page's UI-flow status from its rendered content and the
/// navigation's HTTP status.
pub(crate) fn classify_page(content: &str, http_status: Option<i64>) -> (FlowStatus, Option<String>) {
    if content.trim().chars().count() < 100 {
        return (
            FlowStatus::Error,
            Some("Blank or nearly empty page".to_string()),
        );
    }
    if ERROR_REGEX.is_match(content) {
        return (
            FlowStatus::Warning,
            Some("Page contains error patterns".to_string()),
        );
    }
    if let Some(status) = http_status {
        if status >= 400 {
            return (FlowStatus::Error, Some(format!("HTTP {status}")));
        }
    }
    (FlowStatus::Ok, None)
}

/// Derive per-cookie flag issues: missing Secure, missing HttpOnly,
/// SameSite unset or "None".
pub(crate) fn cookie_flag_issues(cookies: &[StoredCookie]) -> Vec<CookieFlagIssue> {
    let mut out = Vec::new();
    for cookie in cookies {
        let mut issues = Vec::new();
        if !cookie.secure {
            issues.push("Missing Secure flag".to_string());
        }
        if !cookie.http_only {
            issues.push("Missing HttpOnly flag".to_string());
        }
        if !cookie.has_effective_same_site() {
            issues.push("SameSite not set or None".to_string());
        }
        if !issues.is_empty() {
            out.push(CookieFlagIssue {
                name: cookie.name.clone(),
                domain: cookie.domain.clone(),
                issues,
            });
        }
    }
    out
}

fn header_lookup(headers: &serde_json::Value, name: &str) -> Option<String> {
    headers
        .as_object()?
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(name))
        .and_then(|(_, value)| value.as_str())
        .map(str::to_string)
}

/// Content-Length when it parses and strictly exceeds the large-asset
/// threshold.
pub(crate) fn large_asset_size(headers: &serde_json::Value) -> Option<i64> {
    header_lookup(headers, "content-length")?
        .parse::<i64>()
        .ok()
        .filter(|size| *size > LARGE_ASSET_BYTES)
}

pub(crate) fn is_slow_endpoint(duration_ms: f64) -> bool {
    duration_ms > SLOW_ENDPOINT_MS
}

struct PendingRequest {
    url: String,
    method: String,
    resource_type: Option<String>,
}

/// Event listener tasks plus the shared slots they feed.
struct Telemetry {
    tasks: Vec<JoinHandle<()>>,
    current_url: Arc<Mutex<String>>,
    doc_status: Arc<Mutex<Option<i64>>>,
    in_flight: Arc<AtomicI64>,
}

impl Telemetry {
    async fn attach(
        page: &Page,
        audit_id: String,
        store: Arc<AuditManager>,
        preview: Arc<PreviewSampler>,
    ) -> Result<Self, chromiumoxide::error::CdpError> {
        let current_url = Arc::new(Mutex::new(String::new()));
        let doc_status: Arc<Mutex<Option<i64>>> = Arc::new(Mutex::new(None));
        let in_flight = Arc::new(AtomicI64::new(0));
        let request_starts: Arc<Mutex<HashMap<String, Instant>>> =
            Arc::new(Mutex::new(HashMap::new()));
        let pending: Arc<Mutex<HashMap<String, PendingRequest>>> =
            Arc::new(Mutex::new(HashMap::new()));
        let mut tasks = Vec::new();

        // Console messages of severity error/warning become findings.
        {
            let mut events = page.event_listener::<EventConsoleApiCalled>().await?;
            let store = store.clone();
            let audit_id = audit_id.clone();
            let current_url = current_url.clone();
            tasks.push(tokio::spawn(async move {
                while let Some(event) = events.next().await {
                    let severity = match event.r#type {
                        ConsoleApiCalledType::Error => Severity::Error,
                        ConsoleApiCalledType::Warning => Severity::Warning,
                        _ => continue,
                    };
                    let location = event
                        .stack_trace
                        .as_ref()
                        .and_then(|stack| stack.call_frames.first())
                        .map(|frame| frame.url.clone());
                    store.push_console_error(
                        &audit_id,
                        ConsoleError {
                            message: console_message_text(&event),
                            location,
                            page_url: current_url.lock().unwrap().clone(),
                            severity,
                            stack: None,
                            timestamp: Utc::now(),
                        },
                    );
                }
            }));
        }

        // Uncaught exceptions.
        {
            let mut events = page.event_listener::<EventExceptionThrown>().await?;
            let store = store.clone();
            let audit_id = audit_id.clone();
            let current_url = current_url.clone();
            tasks.push(tokio::spawn(async move {
                while let Some(event) = events.next().await {
                    let details = &event.exception_details;
                    let message = details
                        .exception
                        .as_ref()
                        .and_then(|exception| exception.description.clone())
                        .unwrap_or_else(|| details.text.clone());
                    store.push_console_error(
                        &audit_id,
                        ConsoleError {
                            message: message.clone(),
                            location: None,
                            page_url: current_url.lock().unwrap().clone(),
                            severity: Severity::Error,
                            stack: Some(message),
                            timestamp: Utc::now(),
                        },
                    );
                }
            }));
        }

        // Request starts: total counter, start times, in-flight bookkeeping.
        {
            let mut events = page.event_listener::<EventRequestWillBeSent>().await?;
            let store = store.clone();
            let audit_id = audit_id.clone();
            let request_starts = request_starts.clone();
            let pending = pending.clone();
            let in_flight = in_flight.clone();
            tasks.push(tokio::spawn(async move {
                while let Some(event) = events.next().await {
                    store.incr_requests(&audit_id);
                    request_starts
                        .lock()
                        .unwrap()
                        .insert(event.request.url.clone(), Instant::now());

                    let request_id = event.request_id.inner().clone();
                    let mut pending_map = pending.lock().unwrap();
                    // Redirects re-send the same request id; count it once.
                    if !pending_map.contains_key(&request_id) {
                        in_flight.fetch_add(1, Ordering::Relaxed);
                    }
                    pending_map.insert(
                        request_id,
                        PendingRequest {
                            url: event.request.url.clone(),
                            method: event.request.method.clone(),
                            resource_type: event
                                .r#type
                                .as_ref()
                                .map(|t| format!("{t:?}").to_lowercase()),
                        },
                    );
                }
            }));
        }

        // Responses: failures, slow endpoints, large assets, doc status.
        {
            let mut events = page.event_listener::<EventResponseReceived>().await?;
            let store = store.clone();
            let audit_id = audit_id.clone();
            let current_url = current_url.clone();
            let request_starts = request_starts.clone();
            let pending = pending.clone();
            let in_flight = in_flight.clone();
            let doc_status = doc_status.clone();
            tasks.push(tokio::spawn(async move {
                while let Some(event) = events.next().await {
                    let url = event.response.url.clone();
                    let status = event.response.status;

                    let duration_ms = request_starts
                        .lock()
                        .unwrap()
                        .get(&url)
                        .map_or(0.0, |start| start.elapsed().as_secs_f64() * 1000.0);

                    let request_info = pending
                        .lock()
                        .unwrap()
                        .remove(event.request_id.inner().as_str());
                    if request_info.is_some() {
                        in_flight.fetch_sub(1, Ordering::Relaxed);
                    }
                    let method = request_info
                        .as_ref()
                        .map_or_else(|| "GET".to_string(), |info| info.method.clone());
                    let resource_type = request_info.and_then(|info| info.resource_type);

                    if event.r#type == ResourceType::Document {
                        *doc_status.lock().unwrap() = Some(status);
                    }

                    if status >= 400 {
                        store.push_network_failure(
                            &audit_id,
                            NetworkFailure {
                                url: url.clone(),
                                method: method.clone(),
                                status: Some(status),
                                error: None,
                                duration_ms: Some(duration_ms),
                                page_url: current_url.lock().unwrap().clone(),
                                resource_type: resource_type.clone(),
                            },
                        );
                    }

                    if is_slow_endpoint(duration_ms) {
                        store.push_slow_endpoint(
                            &audit_id,
                            SlowEndpoint {
                                url: url.clone(),
                                method,
                                duration_ms,
                                status: Some(status),
                            },
                        );
                    }

                    if let Some(size) = large_asset_size(event.response.headers.inner()) {
                        store.push_large_asset(
                            &audit_id,
                            LargeAsset {
                                url,
                                size_bytes: size as u64,
                                content_type: header_lookup(
                                    event.response.headers.inner(),
                                    "content-type",
                                )
                                .unwrap_or_else(|| "unknown".to_string()),
                                page_url: current_url.lock().unwrap().clone(),
                            },
                        );
                    }
                }
            }));
        }

        // Transport failures: connection refused, DNS, aborts.
        {
            let mut events = page.event_listener::<EventLoadingFailed>().await?;
            let store = store.clone();
            let audit_id = audit_id.clone();
            let current_url = current_url.clone();
            let pending = pending.clone();
            let in_flight = in_flight.clone();
            tasks.push(tokio::spawn(async move {
                while let Some(event) = events.next().await {
                    let request_info = pending
                        .lock()
                        .unwrap()
                        .remove(event.request_id.inner().as_str());
                    let Some(info) = request_info else {
                        continue;
                    };
                    in_flight.fetch_sub(1, Ordering::Relaxed);

                    store.push_network_failure(
                        &audit_id,
                        NetworkFailure {
                            url: info.url,
                            method: info.method,
                            status: None,
                            error: Some(event.error_text.clone()),
                            duration_ms: None,
                            page_url: current_url.lock().unwrap().clone(),
                            resource_type: info.resource_type,
                        },
                    );
                }
            }));
        }

        // Main-frame navigations move the current-URL slot and refresh the
        // preview.
        {
            let mut events = page.event_listener::<EventFrameNavigated>().await?;
            let current_url = current_url.clone();
            let preview_nav = preview.clone();
            tasks.push(tokio::spawn(async move {
                while let Some(event) = events.next().await {
                    if event.frame.parent_id.is_none() {
                        *current_url.lock().unwrap() = event.frame.url.clone();
                        preview_nav.spawn_capture();
                    }
                }
            }));
        }

        // Load events refresh the preview as well.
        {
            let mut events = page.event_listener::<EventLoadEventFired>().await?;
            tasks.push(tokio::spawn(async move {
                while let Some(_event) = events.next().await {
                    preview.spawn_capture();
                }
            }));
        }

        Ok(Self {
            tasks,
            current_url,
            doc_status,
            in_flight,
        })
    }

    fn set_current_url(&self, url: &str) {
        *self.current_url.lock().unwrap() = url.to_string();
    }

    /// Status of the most recent main-document response.
    fn document_status(&self) -> Option<i64> {
        *self.doc_status.lock().unwrap()
    }

    fn in_flight(&self) -> &Arc<AtomicI64> {
        &self.in_flight
    }
}

impl Drop for Telemetry {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

fn console_message_text(event: &EventConsoleApiCalled) -> String {
    event
        .args
        .iter()
        .map(|arg| {
            // Prefer the JSON value, then the object description, then the
            // unserializable form (NaN, undefined, Infinity).
            if let Some(value) = &arg.value {
                match value {
                    serde_json::Value::String(s) => s.clone(),
                    other => other.to_string(),
                }
            } else if let Some(description) = &arg.description {
                description.clone()
            } else if let Some(unserializable) = &arg.unserializable_value {
                unserializable.inner().clone()
            } else {
                String::from("[unknown]")
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}
