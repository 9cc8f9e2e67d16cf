//! Report assembly: category scores, recommendations, summary.

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::scoring::{calculate_score, grade, ScoreInputs};
use super::types::{
    AccessibilityViolation, AuditRecord, ConsoleError, LargeAsset, NetworkFailure, PageTiming,
    SecurityHygiene, Severity, SlowEndpoint, UiFlowResult,
};

#[derive(Debug, Clone, Serialize)]
pub struct CategoryScore {
    pub category: String,
    pub score: u8,
    pub max_score: u8,
    pub issues_count: usize,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct PerformanceMetrics {
    pub page_timings: Vec<PageTiming>,
    pub largest_assets: Vec<LargeAsset>,
    pub slow_endpoints: Vec<SlowEndpoint>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RecommendedFix {
    pub category: String,
    pub severity: Severity,
    pub issue: String,
    pub recommendation: String,
    pub affected_urls: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AuditReport {
    pub audit_id: String,
    pub session_id: String,
    pub url: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub duration_seconds: Option<f64>,

    pub score: u8,
    pub grade: String,
    pub summary: String,

    pub category_scores: Vec<CategoryScore>,

    pub console_errors: Vec<ConsoleError>,
    pub network_failures: Vec<NetworkFailure>,
    pub ui_flows: Vec<UiFlowResult>,
    pub performance: PerformanceMetrics,
    pub security_hygiene: Option<SecurityHygiene>,
    pub accessibility_violations: Vec<AccessibilityViolation>,

    pub recommended_fixes: Vec<RecommendedFix>,

    pub pages_audited: usize,
    pub total_requests: u64,
}

/// Aggregate an audit record into the scored report.
pub fn build(record: &AuditRecord) -> AuditReport {
    let security_issues = count_security_issues(record.security_hygiene.as_ref());
    let ui_errors = record.ui_error_count();

    let score = calculate_score(ScoreInputs {
        console_errors: record.console_errors.len(),
        network_failures: record.network_failures.len(),
        ui_errors,
        security_issues,
        accessibility_violations: record.accessibility_violations.len(),
        slow_endpoints: record.slow_endpoints.len(),
    });

    let duration_seconds = record
        .finished_at
        .map(|finished| (finished - record.started_at).num_milliseconds() as f64 / 1000.0);

    AuditReport {
        audit_id: record.audit_id.clone(),
        session_id: record.session_id.clone(),
        url: record.url.clone(),
        started_at: record.started_at,
        finished_at: record.finished_at,
        duration_seconds,
        score,
        grade: grade(score).to_string(),
        summary: summary(record, score),
        category_scores: category_scores(record, ui_errors, security_issues),
        console_errors: record.console_errors.clone(),
        network_failures: record.network_failures.clone(),
        ui_flows: record.ui_flows.clone(),
        performance: PerformanceMetrics {
            page_timings: record.page_timings.clone(),
            largest_assets: record.large_assets.iter().take(10).cloned().collect(),
            slow_endpoints: record.slow_endpoints.iter().take(10).cloned().collect(),
        },
        security_hygiene: record.security_hygiene.clone(),
        accessibility_violations: record.accessibility_violations.clone(),
        recommended_fixes: recommendations(record),
        pages_audited: record.visited_urls.len(),
        total_requests: record.total_requests,
    }
}

/// HTTPS missing counts double; each missing header and each cookie with
/// flag issues counts once.
fn count_security_issues(hygiene: Option<&SecurityHygiene>) -> usize {
    let Some(hygiene) = hygiene else { return 0 };
    let https_penalty = if hygiene.https_ok { 0 } else { 2 };
    https_penalty + hygiene.headers_missing.len() + hygiene.cookie_flags_issues.len()
}

fn capped(max: i64, penalty: i64) -> u8 {
    (max - penalty).max(0) as u8
}

fn category_scores(
    record: &AuditRecord,
    ui_errors: usize,
    security_issues: usize,
) -> Vec<CategoryScore> {
    let perf_issues = record.slow_endpoints.len() + record.large_assets.len();
    vec![
        CategoryScore {
            category: "Console Errors".to_string(),
            score: capped(20, record.console_errors.len() as i64 * 2),
            max_score: 20,
            issues_count: record.console_errors.len(),
        },
        CategoryScore {
            category: "Network/API".to_string(),
            score: capped(20, record.network_failures.len() as i64 * 3),
            max_score: 20,
            issues_count: record.network_failures.len(),
        },
        CategoryScore {
            category: "UI Flows".to_string(),
            score: capped(20, ui_errors as i64 * 4),
            max_score: 20,
            issues_count: ui_errors,
        },
        CategoryScore {
            category: "Security".to_string(),
            score: capped(20, security_issues as i64 * 3),
            max_score: 20,
            issues_count: security_issues,
        },
        CategoryScore {
            category: "Performance".to_string(),
            score: capped(10, perf_issues as i64),
            max_score: 10,
            issues_count: perf_issues,
        },
        CategoryScore {
            category: "Accessibility".to_string(),
            score: capped(10, record.accessibility_violations.len() as i64),
            max_score: 10,
            issues_count: record.accessibility_violations.len(),
        },
    ]
}

fn dedup_in_order(urls: impl Iterator<Item = String>) -> Vec<String> {
    let mut seen = Vec::new();
    for url in urls {
        if !seen.contains(&url) {
            seen.push(url);
        }
    }
    seen
}

fn recommendations(record: &AuditRecord) -> Vec<RecommendedFix> {
    let mut fixes = Vec::new();

    if !record.console_errors.is_empty() {
        fixes.push(RecommendedFix {
            category: "Console Errors".to_string(),
            severity: Severity::Error,
            issue: format!("Found {} console errors", record.console_errors.len()),
            recommendation: "Review and fix JavaScript errors. Check for null references, \
                API failures, and missing dependencies."
                .to_string(),
            affected_urls: dedup_in_order(
                record
                    .console_errors
                    .iter()
                    .take(5)
                    .map(|e| e.page_url.clone()),
            ),
        });
    }

    if !record.network_failures.is_empty() {
        fixes.push(RecommendedFix {
            category: "Network/API".to_string(),
            severity: Severity::Error,
            issue: format!(
                "Found {} failing network requests",
                record.network_failures.len()
            ),
            recommendation: "Check API endpoints, verify authentication, and ensure proper \
                error handling for failed requests."
                .to_string(),
            affected_urls: dedup_in_order(
                record
                    .network_failures
                    .iter()
                    .take(5)
                    .map(|f| f.url.clone()),
            ),
        });
    }

    let ui_errors: Vec<&UiFlowResult> = record
        .ui_flows
        .iter()
        .filter(|f| f.status == super::types::FlowStatus::Error)
        .collect();
    if !ui_errors.is_empty() {
        fixes.push(RecommendedFix {
            category: "UI Flows".to_string(),
            severity: Severity::Error,
            issue: format!("Found {} broken pages", ui_errors.len()),
            recommendation: "Review pages for rendering issues, missing content, or error states."
                .to_string(),
            affected_urls: ui_errors
                .iter()
                .take(5)
                .map(|f| f.page_url.clone())
                .collect(),
        });
    }

    if let Some(hygiene) = &record.security_hygiene {
        if !hygiene.https_ok {
            fixes.push(RecommendedFix {
                category: "Security".to_string(),
                severity: Severity::Error,
                issue: "Site not using HTTPS".to_string(),
                recommendation: "Enable HTTPS with a valid SSL certificate.".to_string(),
                affected_urls: vec![record.url.clone()],
            });
        }
        if !hygiene.headers_missing.is_empty() {
            fixes.push(RecommendedFix {
                category: "Security".to_string(),
                severity: Severity::Warning,
                issue: format!(
                    "Missing security headers: {}",
                    hygiene.headers_missing.join(", ")
                ),
                recommendation: "Add recommended security headers to your server configuration."
                    .to_string(),
                affected_urls: vec![record.url.clone()],
            });
        }
    }

    if !record.large_assets.is_empty() {
        fixes.push(RecommendedFix {
            category: "Performance".to_string(),
            severity: Severity::Warning,
            issue: format!(
                "Found {} large assets (>500KB)",
                record.large_assets.len()
            ),
            recommendation: "Optimize images, minify JavaScript/CSS, and consider lazy loading \
                for large resources."
                .to_string(),
            affected_urls: record
                .large_assets
                .iter()
                .take(3)
                .map(|a| a.url.clone())
                .collect(),
        });
    }

    if !record.slow_endpoints.is_empty() {
        fixes.push(RecommendedFix {
            category: "Performance".to_string(),
            severity: Severity::Warning,
            issue: format!(
                "Found {} slow endpoints (>1s)",
                record.slow_endpoints.len()
            ),
            recommendation: "Optimize slow API endpoints, add caching, or review database queries."
                .to_string(),
            affected_urls: record
                .slow_endpoints
                .iter()
                .take(3)
                .map(|e| e.url.clone())
                .collect(),
        });
    }

    let critical: Vec<&AccessibilityViolation> = record
        .accessibility_violations
        .iter()
        .filter(|v| matches!(v.impact.as_str(), "critical" | "serious"))
        .collect();
    if !critical.is_empty() {
        fixes.push(RecommendedFix {
            category: "Accessibility".to_string(),
            severity: Severity::Warning,
            issue: format!(
                "Found {} critical/serious accessibility violations",
                critical.len()
            ),
            recommendation: "Address accessibility issues for better usability and compliance. \
                Focus on color contrast, alt text, and keyboard navigation."
                .to_string(),
            affected_urls: critical
                .iter()
                .take(3)
                .map(|v| v.page_url.clone())
                .collect(),
        });
    }

    fixes
}

fn summary(record: &AuditRecord, score: u8) -> String {
    let quality = match score {
        90..=100 => "excellent",
        75..=89 => "good",
        50..=74 => "moderate",
        _ => "poor",
    };
    format!(
        "Production readiness audit completed with {quality} results. \
         Score: {score}/100 (Grade {grade}). \
         Audited {pages} pages, found {errors} console errors and {failures} network failures.",
        grade = grade(score),
        pages = record.visited_urls.len(),
        errors = record.console_errors.len(),
        failures = record.network_failures.len(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::types::{AuditOptions, CookieFlagIssue, FlowStatus};
    use std::path::PathBuf;

    fn record() -> AuditRecord {
        AuditRecord::new(
            "audit-1".to_string(),
            "session-1".to_string(),
            "https://example.test/".to_string(),
            AuditOptions::default(),
            PathBuf::from("/tmp/audits/audit-1"),
        )
    }

    fn console_error(page_url: &str) -> ConsoleError {
        ConsoleError {
            message: "boom".to_string(),
            location: None,
            page_url: page_url.to_string(),
            severity: Severity::Error,
            stack: None,
            timestamp: Utc::now(),
        }
    }

    fn network_failure(url: &str, status: i64) -> NetworkFailure {
        NetworkFailure {
            url: url.to_string(),
            method: "GET".to_string(),
            status: Some(status),
            error: None,
            duration_ms: Some(12.0),
            page_url: "https://example.test/".to_string(),
            resource_type: Some("xhr".to_string()),
        }
    }

    #[test]
    fn clean_audit_scores_perfect_with_no_recommendations() {
        let mut rec = record();
        rec.visited_urls = vec![
            "https://example.test/".to_string(),
            "https://example.test/about".to_string(),
        ];
        rec.security_hygiene = Some(SecurityHygiene {
            https_ok: true,
            headers_present: vec!["Content-Security-Policy".to_string()],
            headers_missing: Vec::new(),
            cookie_flags_issues: Vec::new(),
        });
        rec.finished_at = Some(rec.started_at + chrono::Duration::seconds(12));

        let report = build(&rec);
        assert_eq!(report.score, 100);
        assert_eq!(report.grade, "A");
        assert_eq!(report.pages_audited, 2);
        assert!(report.recommended_fixes.is_empty());
        assert_eq!(report.duration_seconds, Some(12.0));
        assert!(report.summary.contains("excellent"));
        assert!(report.summary.contains("Audited 2 pages"));
    }

    #[test]
    fn console_and_network_noise_lands_at_grade_b() {
        let mut rec = record();
        for _ in 0..3 {
            rec.console_errors
                .push(console_error("https://example.test/"));
        }
        rec.network_failures
            .push(network_failure("https://example.test/api/a", 500));
        rec.network_failures
            .push(network_failure("https://example.test/api/b", 500));

        let report = build(&rec);
        assert_eq!(report.score, 88);
        assert_eq!(report.grade, "B");

        let console = &report.category_scores[0];
        assert_eq!(console.score, 14);
        assert_eq!(console.issues_count, 3);
        let network = &report.category_scores[1];
        assert_eq!(network.score, 14);
        assert_eq!(network.issues_count, 2);
    }

    #[test]
    fn insecure_deployment_zeroes_the_security_category() {
        let mut rec = record();
        rec.security_hygiene = Some(SecurityHygiene {
            https_ok: false,
            headers_present: Vec::new(),
            headers_missing: crate::security::TRACKED_HEADERS
                .iter()
                .map(ToString::to_string)
                .collect(),
            cookie_flags_issues: vec![CookieFlagIssue {
                name: "sid".to_string(),
                domain: "example.test".to_string(),
                issues: vec![
                    "Missing Secure flag".to_string(),
                    "Missing HttpOnly flag".to_string(),
                ],
            }],
        });

        let report = build(&rec);
        // 2 (no https) + 6 missing headers + 1 cookie = 9 issues.
        let security = &report.category_scores[3];
        assert_eq!(security.issues_count, 9);
        assert_eq!(security.score, 0);
        // Overall penalty is capped at 20.
        assert_eq!(report.score, 80);
    }

    #[test]
    fn recommendations_carry_first_affected_urls() {
        let mut rec = record();
        for i in 0..7 {
            rec.console_errors
                .push(console_error(&format!("https://example.test/p{}", i % 2)));
        }
        rec.ui_flows.push(UiFlowResult {
            page_url: "https://example.test/broken".to_string(),
            status: FlowStatus::Error,
            notes: Some("Blank or nearly empty page".to_string()),
            screenshot_path: None,
            load_time_ms: None,
        });

        let report = build(&rec);
        let console_fix = &report.recommended_fixes[0];
        assert!(console_fix.issue.contains("7 console errors"));
        // First five findings span two distinct pages.
        assert_eq!(console_fix.affected_urls.len(), 2);

        let ui_fix = report
            .recommended_fixes
            .iter()
            .find(|f| f.category == "UI Flows")
            .unwrap();
        assert_eq!(ui_fix.affected_urls, vec!["https://example.test/broken"]);
    }

    #[test]
    fn accessibility_recommendation_requires_critical_violations() {
        let mut rec = record();
        rec.accessibility_violations.push(AccessibilityViolation {
            id: "color-contrast".to_string(),
            impact: "moderate".to_string(),
            description: "contrast too low".to_string(),
            help_url: None,
            nodes_count: 3,
            page_url: "https://example.test/".to_string(),
        });

        let report = build(&rec);
        assert!(report
            .recommended_fixes
            .iter()
            .all(|f| f.category != "Accessibility"));

        rec.accessibility_violations[0].impact = "serious".to_string();
        let report = build(&rec);
        assert!(report
            .recommended_fixes
            .iter()
            .any(|f| f.category == "Accessibility"));
    }

    #[test]
    fn performance_lists_are_truncated_to_ten() {
        let mut rec = record();
        for i in 0..15 {
            rec.slow_endpoints.push(SlowEndpoint {
                url: format!("https://example.test/slow/{i}"),
                method: "GET".to_string(),
                duration_ms: 1500.0,
                status: Some(200),
            });
        }
        let report = build(&rec);
        assert_eq!(report.performance.slow_endpoints.len(), 10);
    }
}
