//! Result-format adapter.
//!
//! The report builder produces the internal `AuditReport` shape; external
//! consumers (the dashboard, the PDF renderer's callers) expect a flat
//! result: an overall score, per-category breakdowns with severity counts,
//! and one findings list. This module reshapes without recomputing.

use chrono::Utc;
use serde_json::{json, Value};

use super::report::AuditReport;
use super::types::{FlowStatus, Severity};

/// External finding severities, ordered from worst to mildest.
const SEVERITIES: [&str; 5] = ["critical", "high", "medium", "low", "info"];

fn map_severity(severity: Severity) -> &'static str {
    match severity {
        Severity::Error => "high",
        Severity::Warning => "medium",
        Severity::Info => "info",
    }
}

fn impact_to_severity(impact: &str) -> &'static str {
    match impact {
        "critical" | "serious" => "high",
        "moderate" => "medium",
        _ => "low",
    }
}

#[allow(clippy::too_many_arguments)]
fn finding(
    category: &str,
    severity: &str,
    title: &str,
    description: String,
    affected_url: &str,
    recommended_fix: &str,
    evidence: Option<String>,
    screenshot_url: Option<String>,
    timestamp: Option<String>,
) -> Value {
    json!({
        "id": uuid::Uuid::new_v4().to_string(),
        "category": category,
        "severity": severity,
        "title": title,
        "description": description,
        "affected_url": affected_url,
        "evidence": evidence,
        "screenshot_url": screenshot_url,
        "recommended_fix": recommended_fix,
        "timestamp": timestamp.unwrap_or_else(|| Utc::now().to_rfc3339()),
    })
}

/// Convert the internal report into the external result shape.
pub fn to_frontend_result(report: &AuditReport) -> Value {
    let mut findings: Vec<Value> = Vec::new();

    for error in &report.console_errors {
        findings.push(finding(
            "console",
            map_severity(error.severity),
            "Console issue",
            if error.message.is_empty() {
                "Console error/warning captured.".to_string()
            } else {
                error.message.clone()
            },
            if error.page_url.is_empty() {
                &report.url
            } else {
                &error.page_url
            },
            "Fix the error at the source. Check stack trace and ensure proper exception handling.",
            error.stack.clone().or_else(|| error.location.clone()),
            None,
            Some(error.timestamp.to_rfc3339()),
        ));
    }

    for failure in &report.network_failures {
        let severity = if failure.status.is_some_and(|s| s >= 500) {
            "high"
        } else {
            "medium"
        };
        let mut description = format!("{} {}", failure.method, failure.url);
        if let Some(status) = failure.status {
            description.push_str(&format!(" -> HTTP {status}"));
        }
        if let Some(error) = &failure.error {
            description.push_str(&format!(" | error={error}"));
        }
        if let Some(duration) = failure.duration_ms {
            description.push_str(&format!(" | {duration:.0}ms"));
        }
        findings.push(finding(
            "network",
            severity,
            "Network/API failure",
            description,
            &failure.url,
            "Fix API errors (4xx/5xx), CORS, timeouts. Add retries and proper error handling.",
            Some(format!("resource_type={:?}", failure.resource_type)),
            None,
            None,
        ));
    }

    for flow in &report.ui_flows {
        if flow.status == FlowStatus::Ok {
            continue;
        }
        let severity = if flow.status == FlowStatus::Error {
            "high"
        } else {
            "medium"
        };
        findings.push(finding(
            "ui_flow",
            severity,
            "UI flow issue",
            flow.notes
                .clone()
                .unwrap_or_else(|| "UI flow warning/error detected.".to_string()),
            if flow.page_url.is_empty() {
                &report.url
            } else {
                &flow.page_url
            },
            "Fix routing/render errors, ensure required API calls succeed, and handle \
             empty/error states gracefully.",
            None,
            flow.screenshot_path.clone(),
            None,
        ));
    }

    if let Some(hygiene) = &report.security_hygiene {
        if !hygiene.https_ok {
            findings.push(finding(
                "security",
                "high",
                "HTTPS not enabled",
                "Target URL is not using HTTPS.".to_string(),
                &report.url,
                "Enable HTTPS (TLS) and redirect HTTP to HTTPS.",
                None,
                None,
                None,
            ));
        }
        if !hygiene.headers_missing.is_empty() {
            findings.push(finding(
                "security",
                "medium",
                "Missing security headers",
                format!("Missing: {}", hygiene.headers_missing.join(", ")),
                &report.url,
                "Add recommended security headers in your server/reverse-proxy configuration \
                 (CSP, X-Frame-Options, etc.).",
                None,
                None,
                None,
            ));
        }
        for cookie in &hygiene.cookie_flags_issues {
            findings.push(finding(
                "security",
                "medium",
                "Cookie flags issue",
                format!(
                    "Cookie '{}' ({}) issues: {}",
                    cookie.name,
                    cookie.domain,
                    cookie.issues.join(", ")
                ),
                &report.url,
                "Set Secure, HttpOnly, and SameSite appropriately for auth/session cookies.",
                None,
                None,
                None,
            ));
        }
    }

    for asset in &report.performance.largest_assets {
        let severity = if asset.size_bytes > 2_000_000 {
            "medium"
        } else {
            "low"
        };
        findings.push(finding(
            "performance",
            severity,
            "Large asset",
            format!(
                "{} size={} bytes type={}",
                asset.url, asset.size_bytes, asset.content_type
            ),
            &asset.url,
            "Compress/optimize images, enable caching, consider lazy loading, and use modern \
             formats (webp/avif).",
            None,
            None,
            None,
        ));
    }

    for endpoint in &report.performance.slow_endpoints {
        let severity = if endpoint.duration_ms > 3000.0 {
            "medium"
        } else {
            "low"
        };
        findings.push(finding(
            "performance",
            severity,
            "Slow endpoint",
            format!(
                "{} {} took {:.0}ms (status {:?})",
                endpoint.method, endpoint.url, endpoint.duration_ms, endpoint.status
            ),
            &endpoint.url,
            "Optimize slow resources/endpoints, add caching/CDN, reduce payload size, and \
             improve server response time.",
            None,
            None,
            None,
        ));
    }

    for violation in &report.accessibility_violations {
        findings.push(finding(
            "accessibility",
            impact_to_severity(&violation.impact),
            &format!("A11y violation: {}", violation.id),
            format!("{} (nodes: {})", violation.description, violation.nodes_count),
            if violation.page_url.is_empty() {
                &report.url
            } else {
                &violation.page_url
            },
            "Fix contrast/labels/landmarks. Use semantic HTML, aria-labels, and check with \
             axe/Lighthouse.",
            violation.help_url.clone(),
            None,
            None,
        ));
    }

    let category_scores: Vec<Value> = report
        .category_scores
        .iter()
        .map(|score| {
            let external = external_category(&score.category);
            let counts = severity_counts(&findings, external);
            json!({
                "category": external,
                "score": score.score,
                "weight": score.max_score,
                "findings_count": score.issues_count,
                "critical_count": counts[0],
                "high_count": counts[1],
                "medium_count": counts[2],
                // "low" folds in informational findings.
                "low_count": counts[3] + counts[4],
            })
        })
        .collect();

    let mut pages_crawled: Vec<String> = report
        .ui_flows
        .iter()
        .filter(|f| !f.page_url.is_empty())
        .map(|f| f.page_url.clone())
        .collect();
    if pages_crawled.is_empty() {
        pages_crawled.push(report.url.clone());
    }

    json!({
        "audit_id": report.audit_id,
        "session_id": report.session_id,
        "target_url": report.url,
        "overall_score": report.score,
        "grade": report.grade,
        "category_scores": category_scores,
        "findings": findings,
        "pages_crawled": pages_crawled,
        "started_at": report.started_at.to_rfc3339(),
        "completed_at": report
            .finished_at
            .map_or_else(|| Utc::now().to_rfc3339(), |at| at.to_rfc3339()),
        "duration_seconds": report.duration_seconds.unwrap_or(0.0),
    })
}

fn external_category(internal: &str) -> &'static str {
    match internal {
        "Console Errors" => "console",
        "Network/API" => "network",
        "UI Flows" => "ui_flow",
        "Security" => "security",
        "Performance" => "performance",
        _ => "accessibility",
    }
}

fn severity_counts(findings: &[Value], category: &str) -> [usize; 5] {
    let mut counts = [0usize; 5];
    for finding in findings {
        if finding.get("category").and_then(Value::as_str) != Some(category) {
            continue;
        }
        let severity = finding.get("severity").and_then(Value::as_str);
        for (slot, name) in counts.iter_mut().zip(SEVERITIES) {
            if severity == Some(name) {
                *slot += 1;
            }
        }
    }
    counts
}
