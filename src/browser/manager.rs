//! Chromium driver lifecycle and context management.

use std::collections::HashMap;
use std::sync::Arc;

use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::browser::BrowserContextId;
use chromiumoxide::cdp::browser_protocol::network::{CookieParam, SetUserAgentOverrideParams};
use chromiumoxide::cdp::browser_protocol::page::{
    AddScriptToEvaluateOnNewDocumentParams, CloseParams,
};
use chromiumoxide::cdp::browser_protocol::storage::{GetCookiesParams, SetCookiesParams};
use chromiumoxide::cdp::browser_protocol::target::{
    CreateBrowserContextParams, CreateTargetParams, DisposeBrowserContextParams,
};
use chromiumoxide::cdp::js_protocol::runtime::EventConsoleApiCalled;
use chromiumoxide::handler::viewport::Viewport;
use chromiumoxide::Page;
use futures::StreamExt;
use serde::Deserialize;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::storage::{LocalStorageEntry, StorageOrigin, StorageState, StoredCookie};
use crate::config::Settings;
use crate::session::Session;

const VIEWPORT_WIDTH: u32 = 1280;
const VIEWPORT_HEIGHT: u32 = 720;

/// Fixed desktop user agent presented by every minted page.
const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
     (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

const LOCAL_STORAGE_SNAPSHOT: &str = r"
    (() => {
        const entries = [];
        for (let i = 0; i < localStorage.length; i++) {
            const key = localStorage.key(i);
            entries.push({ name: key, value: localStorage.getItem(key) });
        }
        return { origin: window.location.origin, entries };
    })()
";

#[derive(Debug, Error)]
pub enum BrowserError {
    #[error("Failed to launch browser: {0}")]
    LaunchFailed(String),

    #[error("Browser operation failed: {0}")]
    OperationFailed(String),

    #[error("Browser is not initialized")]
    NotInitialized,

    #[error("No browser context for session {0}")]
    ContextNotFound(String),

    #[error("Session {0} is not authenticated")]
    NotAuthenticated(String),

    #[error("Storage state not found for session {0}")]
    StorageMissing(String),

    #[error("Failed to save storage state: {0}")]
    StorageSaveFailed(String),
}

impl From<chromiumoxide::error::CdpError> for BrowserError {
    fn from(e: chromiumoxide::error::CdpError) -> Self {
        BrowserError::OperationFailed(e.to_string())
    }
}

/// Handle to an authenticated CDP browser context.
///
/// Owned by one audit run; pages created through it carry the restored
/// cookies and, via an init script, the restored localStorage.
pub struct AuditContext {
    context_id: BrowserContextId,
    init_script: Option<String>,
}

struct LoginContext {
    context_id: BrowserContextId,
    page: Page,
}

#[derive(Default)]
struct Inner {
    browser: Option<Arc<Browser>>,
    handler_task: Option<JoinHandle<()>>,
    login_contexts: HashMap<String, LoginContext>,
}

/// Owns the process-wide Chromium instance and the login-context registry.
pub struct BrowserManager {
    settings: Arc<Settings>,
    inner: Mutex<Inner>,
}

/// Servers have no display; interactive workstations get a headed browser
/// so the operator can complete the login by hand.
fn should_run_headless() -> bool {
    cfg!(target_os = "linux")
}

impl BrowserManager {
    pub fn new(settings: Arc<Settings>) -> Arc<Self> {
        Arc::new(Self {
            settings,
            inner: Mutex::new(Inner::default()),
        })
    }

    /// Launch the browser. Idempotent.
    pub async fn initialize(&self) -> Result<(), BrowserError> {
        let mut inner = self.inner.lock().await;
        if inner.browser.is_some() {
            return Ok(());
        }

        info!("Initializing browser driver...");
        let headless = should_run_headless();

        let mut config = BrowserConfig::builder()
            .no_sandbox()
            .arg("--disable-blink-features=AutomationControlled")
            .arg("--disable-dev-shm-usage")
            .arg("--disable-gpu")
            .arg("--no-zygote")
            .arg("--disable-setuid-sandbox")
            .arg("--ignore-certificate-errors")
            .viewport(Viewport {
                width: VIEWPORT_WIDTH,
                height: VIEWPORT_HEIGHT,
                device_scale_factor: Some(1.0),
                emulating_mobile: false,
                is_landscape: true,
                has_touch: false,
            });
        config = if headless {
            config.new_headless_mode()
        } else {
            config.with_head()
        };
        let config = config.build().map_err(BrowserError::LaunchFailed)?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| BrowserError::LaunchFailed(e.to_string()))?;

        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    debug!("CDP handler error: {e}");
                }
            }
        });

        inner.browser = Some(Arc::new(browser));
        inner.handler_task = Some(handler_task);
        info!(headless, "Browser driver initialized");
        Ok(())
    }

    async fn browser_handle(&self) -> Result<Arc<Browser>, BrowserError> {
        {
            let inner = self.inner.lock().await;
            if let Some(browser) = &inner.browser {
                return Ok(browser.clone());
            }
        }
        self.initialize().await?;
        let inner = self.inner.lock().await;
        inner.browser.clone().ok_or(BrowserError::NotInitialized)
    }

    /// Open a fresh context plus page on the session URL for manual login.
    ///
    /// Navigation failures are logged but do not fail the call; the operator
    /// can still drive the page by hand.
    pub async fn create_login_context(&self, session: &Session) -> Result<(), BrowserError> {
        let browser = self.browser_handle().await?;
        let context_id = create_context(&browser).await?;
        let page = new_page_in_context(&browser, &context_id).await?;
        apply_user_agent(&page).await?;

        // Console output from the login page is useful when a login flow
        // misbehaves; surfaced at debug level only.
        if let Ok(mut events) = page.event_listener::<EventConsoleApiCalled>().await {
            let session_id = session.session_id.clone();
            tokio::spawn(async move {
                while let Some(event) = events.next().await {
                    debug!(session_id, kind = ?event.r#type, "Login page console event");
                }
            });
        }

        let nav = tokio::time::timeout(
            self.settings.navigation_timeout(),
            page.goto(session.url.as_str()),
        )
        .await;
        match nav {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => {
                warn!(url = %session.url, error = %e, "Navigation warning for login page");
            }
            Err(_) => warn!(url = %session.url, "Login page navigation timed out"),
        }

        let replaced = {
            let mut inner = self.inner.lock().await;
            inner
                .login_contexts
                .insert(session.session_id.clone(), LoginContext { context_id, page })
        };
        if let Some(old) = replaced {
            dispose_context(&browser, old.context_id).await;
        }

        info!(session_id = %session.session_id, url = %session.url, "Opened login page");
        Ok(())
    }

    /// Serialize the login context's cookies and localStorage to the
    /// session's storage-state path.
    pub async fn save_storage_state(&self, session: &Session) -> Result<(), BrowserError> {
        let (context_id, page) = {
            let inner = self.inner.lock().await;
            let ctx = inner
                .login_contexts
                .get(&session.session_id)
                .ok_or_else(|| BrowserError::ContextNotFound(session.session_id.clone()))?;
            (ctx.context_id.clone(), ctx.page.clone())
        };
        let browser = self.browser_handle().await?;

        let cookies = context_cookies_by_id(&browser, &context_id)
            .await
            .map_err(|e| BrowserError::StorageSaveFailed(e.to_string()))?;
        let origins = snapshot_local_storage(&page).await;

        let state = StorageState { cookies, origins };
        state
            .save(&session.storage_state_path)
            .await
            .map_err(|e| BrowserError::StorageSaveFailed(e.to_string()))?;

        info!(session_id = %session.session_id, "Saved storage state");
        Ok(())
    }

    /// Mint a fresh context seeded from the session's stored state.
    pub async fn create_authenticated_context(
        &self,
        session: &Session,
    ) -> Result<AuditContext, BrowserError> {
        if !session.is_authenticated {
            return Err(BrowserError::NotAuthenticated(session.session_id.clone()));
        }
        let state = StorageState::load(&session.storage_state_path)
            .await
            .map_err(|_| BrowserError::StorageMissing(session.session_id.clone()))?;

        let browser = self.browser_handle().await?;
        let context_id = create_context(&browser).await?;

        let cookies: Vec<CookieParam> = state
            .cookies
            .iter()
            .filter_map(|c| c.to_param().ok())
            .collect();
        if !cookies.is_empty() {
            browser
                .execute(SetCookiesParams {
                    cookies,
                    browser_context_id: Some(context_id.clone()),
                })
                .await
                .map_err(|e| BrowserError::OperationFailed(e.to_string()))?;
        }

        info!(session_id = %session.session_id, "Created authenticated context");
        Ok(AuditContext {
            context_id,
            init_script: state.local_storage_init_script(),
        })
    }

    /// Open a page inside an audit context.
    pub async fn new_page(&self, ctx: &AuditContext) -> Result<Page, BrowserError> {
        let browser = self.browser_handle().await?;
        let page = new_page_in_context(&browser, &ctx.context_id).await?;
        apply_user_agent(&page).await?;
        if let Some(script) = &ctx.init_script {
            page.execute(AddScriptToEvaluateOnNewDocumentParams {
                source: script.clone(),
                include_command_line_api: None,
                world_name: None,
                run_immediately: None,
            })
            .await
            .map_err(|e| BrowserError::OperationFailed(e.to_string()))?;
        }
        Ok(page)
    }

    /// All cookies currently held by an audit context.
    pub async fn context_cookies(
        &self,
        ctx: &AuditContext,
    ) -> Result<Vec<StoredCookie>, BrowserError> {
        let browser = self.browser_handle().await?;
        context_cookies_by_id(&browser, &ctx.context_id).await
    }

    /// Tear down a session's login context. Idempotent.
    pub async fn close_context(&self, session_id: &str) {
        let ctx = {
            let mut inner = self.inner.lock().await;
            inner.login_contexts.remove(session_id)
        };
        let Some(ctx) = ctx else { return };
        let Ok(browser) = self.browser_handle().await else {
            return;
        };
        if let Err(e) = ctx.page.execute(CloseParams {}).await {
            warn!(session_id, error = %e, "Error closing login page");
        }
        dispose_context(&browser, ctx.context_id).await;
        info!(session_id, "Closed login context");
    }

    /// Tear down an audit context after the run finishes.
    pub async fn close_audit_context(&self, ctx: AuditContext) {
        if let Ok(browser) = self.browser_handle().await {
            dispose_context(&browser, ctx.context_id).await;
        }
    }

    /// Close every context, the browser, then the driver task.
    /// Teardown errors are logged and swallowed.
    pub async fn shutdown(&self) {
        info!("Shutting down browser manager...");
        let (contexts, browser, handler_task) = {
            let mut inner = self.inner.lock().await;
            (
                inner
                    .login_contexts
                    .drain()
                    .map(|(_, ctx)| ctx)
                    .collect::<Vec<_>>(),
                inner.browser.take(),
                inner.handler_task.take(),
            )
        };

        if let Some(browser) = browser {
            for ctx in contexts {
                let _ = ctx.page.execute(CloseParams {}).await;
                dispose_context(&browser, ctx.context_id).await;
            }
            match Arc::try_unwrap(browser) {
                Ok(mut browser) => {
                    if let Err(e) = browser.close().await {
                        warn!(error = %e, "Error closing browser");
                    }
                    let _ = browser.wait().await;
                }
                Err(_) => {
                    warn!("Browser handle still shared at shutdown; process teardown will reap it");
                }
            }
        }

        if let Some(task) = handler_task {
            task.abort();
        }
        info!("Browser manager shutdown complete");
    }
}

async fn create_context(browser: &Browser) -> Result<BrowserContextId, BrowserError> {
    let response = browser
        .execute(CreateBrowserContextParams::default())
        .await
        .map_err(|e| BrowserError::OperationFailed(e.to_string()))?;
    Ok(response.result.browser_context_id)
}

async fn new_page_in_context(
    browser: &Browser,
    context_id: &BrowserContextId,
) -> Result<Page, BrowserError> {
    let mut params = CreateTargetParams::new("about:blank");
    params.browser_context_id = Some(context_id.clone());
    browser
        .new_page(params)
        .await
        .map_err(|e| BrowserError::OperationFailed(e.to_string()))
}

async fn apply_user_agent(page: &Page) -> Result<(), BrowserError> {
    page.execute(SetUserAgentOverrideParams {
        user_agent: USER_AGENT.to_string(),
        accept_language: None,
        platform: None,
        user_agent_metadata: None,
    })
    .await
    .map_err(|e| BrowserError::OperationFailed(e.to_string()))?;
    Ok(())
}

async fn context_cookies_by_id(
    browser: &Browser,
    context_id: &BrowserContextId,
) -> Result<Vec<StoredCookie>, BrowserError> {
    let response = browser
        .execute(GetCookiesParams {
            browser_context_id: Some(context_id.clone()),
        })
        .await
        .map_err(|e| BrowserError::OperationFailed(e.to_string()))?;
    Ok(response
        .result
        .cookies
        .iter()
        .map(StoredCookie::from_cdp)
        .collect())
}

async fn dispose_context(browser: &Browser, context_id: BrowserContextId) {
    if let Err(e) = browser
        .execute(DisposeBrowserContextParams::new(context_id))
        .await
    {
        warn!(error = %e, "Error disposing browser context");
    }
}

#[derive(Debug, Deserialize)]
struct LocalStorageSnapshot {
    origin: String,
    entries: Vec<LocalStorageEntry>,
}

async fn snapshot_local_storage(page: &Page) -> Vec<StorageOrigin> {
    match page.evaluate(LOCAL_STORAGE_SNAPSHOT).await {
        Ok(result) => match result.into_value::<LocalStorageSnapshot>() {
            Ok(snapshot) if !snapshot.entries.is_empty() => vec![StorageOrigin {
                origin: snapshot.origin,
                local_storage: snapshot.entries,
            }],
            _ => Vec::new(),
        },
        Err(e) => {
            warn!(error = %e, "localStorage snapshot failed");
            Vec::new()
        }
    }
}
