//! Live-preview sampler.
//!
//! A throttled, viewport-sized JPEG of the current page written atomically
//! to `<artifacts>/preview_latest.jpg` so the HTTP layer can stream it to
//! polling clients while the crawl runs. Capture failures never surface.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chromiumoxide::cdp::browser_protocol::page::{
    CaptureScreenshotFormat, CaptureScreenshotParams,
};
use chromiumoxide::Page;
use tracing::debug;

use super::store::AuditManager;

const JPEG_QUALITY: i64 = 60;
const MIN_CAPTURE_INTERVAL: Duration = Duration::from_secs(1);

pub struct PreviewSampler {
    page: Page,
    audit_id: String,
    store: Arc<AuditManager>,
    path: PathBuf,
    last_capture: Mutex<Option<Instant>>,
}

impl PreviewSampler {
    pub fn new(page: Page, audit_id: String, store: Arc<AuditManager>, artifacts_dir: &std::path::Path) -> Arc<Self> {
        Arc::new(Self {
            page,
            audit_id,
            store,
            path: artifacts_dir.join("preview_latest.jpg"),
            last_capture: Mutex::new(None),
        })
    }

    /// Fire-and-forget capture, used from event listeners.
    pub fn spawn_capture(self: &Arc<Self>) {
        let sampler = Arc::clone(self);
        tokio::spawn(async move {
            sampler.capture().await;
        });
    }

    /// Capture one frame unless one was taken within the last second.
    pub async fn capture(&self) {
        {
            let mut last = self.last_capture.lock().unwrap();
            if last.is_some_and(|at| at.elapsed() < MIN_CAPTURE_INTERVAL) {
                return;
            }
            *last = Some(Instant::now());
        }

        let params = CaptureScreenshotParams {
            format: Some(CaptureScreenshotFormat::Jpeg),
            quality: Some(JPEG_QUALITY),
            ..Default::default()
        };

        let bytes = match self.page.screenshot(params).await {
            Ok(bytes) => bytes,
            Err(e) => {
                debug!(audit_id = %self.audit_id, error = %e, "Preview capture failed");
                return;
            }
        };

        // Write-then-rename so readers never observe a torn frame.
        let tmp = self.path.with_extension("jpg.tmp");
        if tokio::fs::write(&tmp, &bytes).await.is_err() {
            return;
        }
        if tokio::fs::rename(&tmp, &self.path).await.is_err() {
            return;
        }

        self.store.set_preview(&self.audit_id, self.path.clone());
    }
}
