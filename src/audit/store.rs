//! In-memory audit state store.
//!
//! All mutation funnels through this type so listener callbacks, the
//! runner, and the HTTP layer observe consistent records. Audits are kept
//! until process exit.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use tracing::info;

use super::types::{
    AccessibilityViolation, AuditOptions, AuditProgress, AuditRecord, AuditStatus, ConsoleError,
    LargeAsset, NetworkFailure, PageTiming, SecurityHygiene, SlowEndpoint, UiFlowResult,
};
use crate::config::Settings;

pub struct AuditManager {
    settings: Arc<Settings>,
    audits: Mutex<HashMap<String, AuditRecord>>,
}

impl AuditManager {
    pub fn new(settings: Arc<Settings>) -> Arc<Self> {
        Arc::new(Self {
            settings,
            audits: Mutex::new(HashMap::new()),
        })
    }

    /// Create an audit record and its artifact directory.
    pub fn create(
        &self,
        session_id: &str,
        url: &str,
        options: AuditOptions,
    ) -> std::io::Result<AuditRecord> {
        let audit_id = uuid::Uuid::new_v4().to_string();
        let artifacts_dir = self.settings.audit_dir(&audit_id);
        std::fs::create_dir_all(&artifacts_dir)?;

        let record = AuditRecord::new(
            audit_id.clone(),
            session_id.to_string(),
            url.to_string(),
            options,
            artifacts_dir,
        );
        self.audits
            .lock()
            .unwrap()
            .insert(audit_id.clone(), record.clone());

        info!(audit_id, url, "Created audit");
        Ok(record)
    }

    /// Snapshot an audit record.
    pub fn get(&self, audit_id: &str) -> Option<AuditRecord> {
        self.audits.lock().unwrap().get(audit_id).cloned()
    }

    /// Run a closure against the record under the store mutex.
    fn with_record<R>(&self, audit_id: &str, f: impl FnOnce(&mut AuditRecord) -> R) -> Option<R> {
        let mut audits = self.audits.lock().unwrap();
        audits.get_mut(audit_id).map(f)
    }

    /// Atomically update the progress block. Derived counters
    /// (pages visited, errors found) come from the record itself, and the
    /// percentage never goes backwards while the audit runs.
    pub fn update_progress(
        &self,
        audit_id: &str,
        stage: &str,
        percent: u8,
        current_url: Option<String>,
        message: Option<String>,
    ) {
        self.with_record(audit_id, |record| {
            let percent = if record.status == AuditStatus::Running {
                percent.max(record.progress.percent)
            } else {
                percent
            };
            record.progress = AuditProgress {
                stage: stage.to_string(),
                percent: percent.min(100),
                current_url,
                pages_visited: record.visited_urls.len(),
                errors_found: record.errors_found(),
                message,
            };
        });
    }

    pub fn mark_running(&self, audit_id: &str) {
        self.with_record(audit_id, |record| {
            record.status = AuditStatus::Running;
        });
    }

    pub fn mark_done(&self, audit_id: &str) {
        self.with_record(audit_id, |record| {
            record.status = AuditStatus::Done;
            record.finished_at = Some(Utc::now());
        });
    }

    pub fn mark_error(&self, audit_id: &str, message: &str) {
        self.with_record(audit_id, |record| {
            record.status = AuditStatus::Error;
            record.error_message = Some(message.to_string());
            record.finished_at = Some(Utc::now());
        });
    }

    pub fn push_console_error(&self, audit_id: &str, finding: ConsoleError) {
        self.with_record(audit_id, |record| record.console_errors.push(finding));
    }

    pub fn push_network_failure(&self, audit_id: &str, finding: NetworkFailure) {
        self.with_record(audit_id, |record| record.network_failures.push(finding));
    }

    pub fn push_slow_endpoint(&self, audit_id: &str, finding: SlowEndpoint) {
        self.with_record(audit_id, |record| record.slow_endpoints.push(finding));
    }

    pub fn push_large_asset(&self, audit_id: &str, finding: LargeAsset) {
        self.with_record(audit_id, |record| record.large_assets.push(finding));
    }

    pub fn push_ui_flow(&self, audit_id: &str, result: UiFlowResult) {
        self.with_record(audit_id, |record| record.ui_flows.push(result));
    }

    pub fn push_timing(&self, audit_id: &str, timing: PageTiming) {
        self.with_record(audit_id, |record| record.page_timings.push(timing));
    }

    pub fn push_violation(&self, audit_id: &str, violation: AccessibilityViolation) {
        self.with_record(audit_id, |record| {
            record.accessibility_violations.push(violation);
        });
    }

    pub fn set_security(&self, audit_id: &str, hygiene: SecurityHygiene) {
        self.with_record(audit_id, |record| {
            record.security_hygiene = Some(hygiene);
        });
    }

    pub fn incr_requests(&self, audit_id: &str) {
        self.with_record(audit_id, |record| record.total_requests += 1);
    }

    /// Record a visit. Deduplicates and never exceeds `max_pages`.
    pub fn mark_visited(&self, audit_id: &str, url: &str) {
        self.with_record(audit_id, |record| {
            if record.visited_urls.iter().any(|u| u == url) {
                return;
            }
            if record.visited_urls.len() >= record.options.max_pages {
                return;
            }
            record.visited_urls.push(url.to_string());
            record.discovered_urls.retain(|u| u != url);
        });
    }

    /// Union newly discovered URLs, excluding anything already visited.
    pub fn add_discovered(&self, audit_id: &str, urls: Vec<String>) -> usize {
        self.with_record(audit_id, |record| {
            for url in urls {
                if record.visited_urls.iter().any(|u| u == &url) {
                    continue;
                }
                if record.discovered_urls.iter().any(|u| u == &url) {
                    continue;
                }
                record.discovered_urls.push(url);
            }
            record.discovered_urls.len()
        })
        .unwrap_or(0)
    }

    /// Not-yet-visited URLs, in discovery order, capped at `limit`.
    pub fn select_unvisited(&self, audit_id: &str, limit: usize) -> Vec<String> {
        self.with_record(audit_id, |record| {
            record
                .discovered_urls
                .iter()
                .filter(|u| !record.visited_urls.contains(*u))
                .take(limit)
                .cloned()
                .collect()
        })
        .unwrap_or_default()
    }

    /// Path the next error screenshot should be written to.
    pub fn next_screenshot_path(&self, audit_id: &str) -> Option<PathBuf> {
        self.with_record(audit_id, |record| {
            record
                .artifacts_dir
                .join(format!("screenshot_{}.png", record.screenshots.len()))
        })
    }

    pub fn record_screenshot(&self, audit_id: &str, path: PathBuf) {
        self.with_record(audit_id, |record| record.screenshots.push(path));
    }

    pub fn set_preview(&self, audit_id: &str, path: PathBuf) {
        self.with_record(audit_id, |record| {
            record.preview_image_path = Some(path);
            record.preview_updated_at = Some(Utc::now());
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::types::FlowStatus;

    fn test_store() -> (Arc<AuditManager>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings {
            artifacts_dir: dir.path().to_path_buf(),
            ..Settings::default()
        };
        (AuditManager::new(Arc::new(settings)), dir)
    }

    fn test_audit(store: &AuditManager, max_pages: usize) -> String {
        let options = AuditOptions {
            max_pages,
            ..AuditOptions::default()
        };
        store
            .create("session-1", "https://example.test/", options)
            .unwrap()
            .audit_id
    }

    #[test]
    fn create_makes_artifacts_dir() {
        let (store, _dir) = test_store();
        let record = store
            .create("session-1", "https://example.test/", AuditOptions::default())
            .unwrap();
        assert!(record.artifacts_dir.is_dir());
        assert_eq!(store.get(&record.audit_id).unwrap().status, AuditStatus::Queued);
    }

    #[test]
    fn progress_updates_derive_counters() {
        let (store, _dir) = test_store();
        let id = test_audit(&store, 20);
        store.mark_running(&id);
        store.mark_visited(&id, "https://example.test/");
        store.push_console_error(
            &id,
            ConsoleError {
                message: "boom".to_string(),
                location: None,
                page_url: "https://example.test/".to_string(),
                severity: crate::audit::types::Severity::Error,
                stack: None,
                timestamp: Utc::now(),
            },
        );

        store.update_progress(&id, "crawling", 20, None, None);
        let record = store.get(&id).unwrap();
        assert_eq!(record.progress.pages_visited, 1);
        assert_eq!(record.progress.errors_found, 1);
        assert_eq!(record.progress.percent, 20);
    }

    #[test]
    fn progress_percent_is_monotone_while_running() {
        let (store, _dir) = test_store();
        let id = test_audit(&store, 20);
        store.mark_running(&id);
        store.update_progress(&id, "auditing_pages", 50, None, None);
        store.update_progress(&id, "auditing_pages", 30, None, None);
        assert_eq!(store.get(&id).unwrap().progress.percent, 50);

        // The error path resets to zero once the audit is no longer running.
        store.mark_error(&id, "boom");
        store.update_progress(&id, "error", 0, None, None);
        let record = store.get(&id).unwrap();
        assert_eq!(record.progress.percent, 0);
        assert!(record.finished_at.is_some());
        assert_eq!(record.error_message.as_deref(), Some("boom"));
    }

    #[test]
    fn visited_and_discovered_stay_disjoint() {
        let (store, _dir) = test_store();
        let id = test_audit(&store, 20);
        store.add_discovered(
            &id,
            vec![
                "https://example.test/a".to_string(),
                "https://example.test/b".to_string(),
            ],
        );
        store.mark_visited(&id, "https://example.test/a");

        let record = store.get(&id).unwrap();
        assert_eq!(record.visited_urls, vec!["https://example.test/a"]);
        assert_eq!(record.discovered_urls, vec!["https://example.test/b"]);

        // Re-discovering a visited URL does not resurrect it.
        store.add_discovered(&id, vec!["https://example.test/a".to_string()]);
        assert_eq!(
            store.get(&id).unwrap().discovered_urls,
            vec!["https://example.test/b"]
        );
    }

    #[test]
    fn visits_are_deduplicated_and_capped() {
        let (store, _dir) = test_store();
        let id = test_audit(&store, 2);
        store.mark_visited(&id, "https://example.test/");
        store.mark_visited(&id, "https://example.test/");
        store.mark_visited(&id, "https://example.test/a");
        store.mark_visited(&id, "https://example.test/b");

        let record = store.get(&id).unwrap();
        assert_eq!(record.visited_urls.len(), 2);
    }

    #[test]
    fn select_unvisited_respects_limit_and_order() {
        let (store, _dir) = test_store();
        let id = test_audit(&store, 20);
        store.add_discovered(
            &id,
            vec![
                "https://example.test/1".to_string(),
                "https://example.test/2".to_string(),
                "https://example.test/3".to_string(),
            ],
        );
        assert_eq!(
            store.select_unvisited(&id, 2),
            vec!["https://example.test/1", "https://example.test/2"]
        );
        assert!(store.select_unvisited(&id, 0).is_empty());
    }

    #[test]
    fn done_audits_carry_finished_at() {
        let (store, _dir) = test_store();
        let id = test_audit(&store, 20);
        store.mark_running(&id);
        store.push_ui_flow(
            &id,
            UiFlowResult {
                page_url: "https://example.test/".to_string(),
                status: FlowStatus::Ok,
                notes: None,
                screenshot_path: None,
                load_time_ms: Some(12.0),
            },
        );
        store.mark_done(&id);
        let record = store.get(&id).unwrap();
        assert_eq!(record.status, AuditStatus::Done);
        assert!(record.finished_at.is_some());
    }

    #[test]
    fn screenshot_paths_are_numbered() {
        let (store, _dir) = test_store();
        let id = test_audit(&store, 20);
        let first = store.next_screenshot_path(&id).unwrap();
        assert!(first.ends_with("screenshot_0.png"));
        store.record_screenshot(&id, first);
        let second = store.next_screenshot_path(&id).unwrap();
        assert!(second.ends_with("screenshot_1.png"));
    }
}
