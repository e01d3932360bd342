use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chromiumoxide::cdp::browser_protocol::emulation::SetDeviceMetricsOverrideParams;
use chromiumoxide::cdp::browser_protocol::network::{
    EnableParams, SetBlockedUrLsParams, SetUserAgentOverrideParams,
};
use chromiumoxide::cdp::browser_protocol::target::{
    BrowserContextId, CreateBrowserContextParams, CreateTargetParams, DisposeBrowserContextParams,
};
use chromiumoxide::{Browser, BrowserConfig, Page};
use futures::StreamExt;
use futures::future::BoxFuture;
use pricehound_core::error::{AppError, SourceError};
use pricehound_core::traits::{PageRequest, PageSession, SessionBackend, SessionProfile};

/// Longest wait for a results marker before reading the DOM anyway.
const MARKER_WAIT: Duration = Duration::from_secs(10);
const MARKER_POLL: Duration = Duration::from_millis(250);

/// Headless-browser session backend using Chromium via the Chrome DevTools Protocol.
///
/// One Chromium process serves every session. Each session is a separate
/// browser context (its own cookies, cache and storage) holding a single
/// tab, and the context is disposed when the session closes.
///
/// # Example
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use pricehound_client::BrowserBackend;
/// use pricehound_core::{SessionPool, SessionPoolConfig};
///
/// # async fn run() -> Result<(), Box<dyn std::error::Error>> {
/// let backend = BrowserBackend::launch().await?;
/// let pool = SessionPool::new(Arc::new(backend), SessionPoolConfig::default());
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct BrowserBackend {
    browser: Arc<Browser>,
}

impl BrowserBackend {
    /// Launch a headless Chromium.
    ///
    /// Requires a Chromium / Chrome binary reachable via `$CHROME_BIN`,
    /// `$PATH` or the default locations checked by `chromiumoxide`.
    pub async fn launch() -> Result<Self, AppError> {
        let mut builder = BrowserConfig::builder();
        builder = builder.no_sandbox().disable_default_args();

        if let Some(bin) = find_chrome_binary() {
            tracing::info!("Using Chrome binary: {}", bin.display());
            builder = builder.chrome_executable(bin);
        }

        let config = builder
            .arg("--headless=new")
            .arg("--disable-gpu")
            .arg("--disable-dev-shm-usage")
            .arg("--disable-extensions")
            .arg("--no-first-run")
            .build()
            .map_err(|e| AppError::ConfigError(format!("Browser config error: {e}")))?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| AppError::Generic(format!("Failed to launch browser: {e}")))?;

        // The CDP handler must be polled continuously for the connection to work.
        tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    tracing::warn!("Browser CDP handler error: {event:?}");
                    break;
                }
            }
        });

        Ok(Self {
            browser: Arc::new(browser),
        })
    }

    async fn open_session(&self, profile: &SessionProfile) -> Result<BrowserSession, SourceError> {
        let context_id = self
            .browser
            .execute(CreateBrowserContextParams::default())
            .await
            .map_err(cdp_error("create browser context"))?
            .result
            .browser_context_id;

        // Disposes the context on any early return, including cancellation
        // of this future while the tab is still being set up.
        let browser = Arc::clone(&self.browser);
        let orphan = context_id.clone();
        let guard = DisposeGuard::new(move || {
            if let Ok(handle) = tokio::runtime::Handle::try_current() {
                handle.spawn(async move {
                    if let Err(e) = browser
                        .execute(DisposeBrowserContextParams::new(orphan))
                        .await
                    {
                        tracing::warn!("Failed to dispose browser context: {e}");
                    }
                });
            }
        });

        let mut target = CreateTargetParams::new("about:blank");
        target.browser_context_id = Some(context_id.clone());
        let page = self
            .browser
            .new_page(target)
            .await
            .map_err(|e| SourceError::Unavailable(format!("open tab: {e}")))?;

        let session = BrowserSession {
            browser: Arc::clone(&self.browser),
            context_id,
            page,
        };
        let applied = session.apply_profile(profile).await;
        guard.disarm();

        if let Err(e) = applied {
            Box::new(session).close().await;
            return Err(e);
        }
        Ok(session)
    }
}

/// Runs its closure when dropped, unless disarmed first.
struct DisposeGuard<F: FnOnce()> {
    dispose: Option<F>,
}

impl<F: FnOnce()> DisposeGuard<F> {
    fn new(dispose: F) -> Self {
        Self {
            dispose: Some(dispose),
        }
    }

    fn disarm(mut self) {
        self.dispose = None;
    }
}

impl<F: FnOnce()> Drop for DisposeGuard<F> {
    fn drop(&mut self) {
        if let Some(dispose) = self.dispose.take() {
            dispose();
        }
    }
}

impl SessionBackend for BrowserBackend {
    fn open<'a>(
        &'a self,
        profile: &'a SessionProfile,
    ) -> BoxFuture<'a, Result<Box<dyn PageSession>, SourceError>> {
        Box::pin(async move {
            let session = self.open_session(profile).await?;
            tracing::debug!(source = %profile.source, "Browser session opened");
            Ok(Box::new(session) as Box<dyn PageSession>)
        })
    }
}

/// A tab inside its own browser context.
pub struct BrowserSession {
    browser: Arc<Browser>,
    context_id: BrowserContextId,
    page: Page,
}

impl BrowserSession {
    async fn apply_profile(&self, profile: &SessionProfile) -> Result<(), SourceError> {
        let mut user_agent = SetUserAgentOverrideParams::new(profile.user_agent.clone());
        user_agent.accept_language = Some(profile.locale.clone());
        self.page
            .execute(user_agent)
            .await
            .map_err(cdp_error("set user agent"))?;

        let (width, height) = profile.viewport;
        self.page
            .execute(SetDeviceMetricsOverrideParams::new(
                i64::from(width),
                i64::from(height),
                1.0,
                false,
            ))
            .await
            .map_err(cdp_error("set viewport"))?;

        let patterns: Vec<String> = profile
            .blocked_resources
            .iter()
            .flat_map(|r| r.url_patterns())
            .map(|p| p.to_string())
            .collect();
        if !patterns.is_empty() {
            self.page
                .execute(EnableParams::default())
                .await
                .map_err(cdp_error("enable network domain"))?;
            self.page
                .execute(SetBlockedUrLsParams::new(patterns))
                .await
                .map_err(cdp_error("block resources"))?;
        }
        Ok(())
    }
}

impl PageSession for BrowserSession {
    fn load<'a>(&'a self, request: &'a PageRequest) -> BoxFuture<'a, Result<String, SourceError>> {
        Box::pin(async move {
            let url = request.url.as_str();
            self.page
                .goto(url)
                .await
                .map_err(|e| SourceError::Network(format!("Failed to navigate to {url}: {e}")))?;

            // A missing marker is not fatal here: the adapter decides whether
            // the page it got is usable.
            if let Some(selector) = &request.wait_for {
                let appeared = async {
                    while self.page.find_element(selector.as_str()).await.is_err() {
                        tokio::time::sleep(MARKER_POLL).await;
                    }
                };
                let wait = request.timeout.min(MARKER_WAIT);
                if tokio::time::timeout(wait, appeared).await.is_err() {
                    tracing::debug!(%url, %selector, "Results marker did not appear");
                }
            }

            self.page
                .content()
                .await
                .map_err(|e| SourceError::Network(format!("Failed to read page content: {e}")))
        })
    }

    fn close(self: Box<Self>) -> BoxFuture<'static, ()> {
        Box::pin(async move {
            let BrowserSession {
                browser,
                context_id,
                page,
            } = *self;
            if let Err(e) = page.close().await {
                tracing::debug!("Failed to close tab: {e}");
            }
            if let Err(e) = browser
                .execute(DisposeBrowserContextParams::new(context_id))
                .await
            {
                tracing::warn!("Failed to dispose browser context: {e}");
            }
        })
    }
}

fn cdp_error(action: &'static str) -> impl Fn(chromiumoxide::error::CdpError) -> SourceError {
    move |e| SourceError::Unavailable(format!("{action}: {e}"))
}

/// Locate the real Chrome/Chromium binary.
///
/// Snap-packaged Chromium exposes a wrapper that strips unknown CLI flags,
/// breaking headless mode, so the binary inside the snap is preferred.
/// `None` lets `chromiumoxide` do its own lookup.
fn find_chrome_binary() -> Option<PathBuf> {
    if let Ok(p) = std::env::var("CHROME_BIN") {
        let path = PathBuf::from(&p);
        if path.exists() {
            return Some(path);
        }
    }

    [
        "/snap/chromium/current/usr/lib/chromium-browser/chrome",
        "/var/lib/flatpak/exports/bin/org.chromium.Chromium",
        "/usr/bin/google-chrome-stable",
        "/usr/bin/google-chrome",
        "/usr/bin/chromium",
        "/usr/bin/chromium-browser",
    ]
    .iter()
    .map(PathBuf::from)
    .find(|p| p.exists())
}
