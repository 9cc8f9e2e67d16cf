//! HTTP API.

pub mod handlers;
pub mod rate_limit;
pub mod request_id;
pub mod types;

pub use handlers::create_router;

use std::sync::Arc;

use crate::audit::AuditManager;
use crate::browser::BrowserManager;
use crate::config::Settings;
use crate::session::SessionManager;
use rate_limit::RateLimiter;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub sessions: Arc<SessionManager>,
    pub audits: Arc<AuditManager>,
    pub browser: Arc<BrowserManager>,
    pub rate_limiter: Arc<RateLimiter>,
}

impl AppState {
    pub fn new(settings: Arc<Settings>) -> Self {
        let sessions = SessionManager::new(settings.clone());
        let audits = AuditManager::new(settings.clone());
        let browser = BrowserManager::new(settings.clone());
        let rate_limiter = Arc::new(RateLimiter::new(settings.rate_limit_per_minute));
        Self {
            settings,
            sessions,
            audits,
            browser,
            rate_limiter,
        }
    }
}
