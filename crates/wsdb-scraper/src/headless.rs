//! Headless rendering behind a small, dedicated concurrency pool.
//!
//! A render opens a fresh isolated context, navigates, reads the HTML and
//! closes the context on every exit path. Timeouts and cancellation close it
//! inline; if the whole render future is dropped mid-flight, the
//! [`ContextGuard`] hands the context to the runtime for closing.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use wsdb_core::AppConfig;

use crate::fetch::cancellable;

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("headless rendering is not configured")]
    Unavailable,

    #[error("headless render timed out after {0:?}")]
    Timeout(Duration),

    #[error("headless render cancelled")]
    Cancelled,

    #[error("renderer network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("renderer API error (status {status}): {message}")]
    Api { status: u16, message: String },
}

#[derive(Debug, Clone)]
pub struct RenderedPage {
    /// URL the browser ended up on after redirects.
    pub final_url: String,
    pub html: String,
}

/// A browser engine that hands out isolated contexts.
#[async_trait]
pub trait Renderer: Send + Sync {
    async fn open_context(&self) -> Result<Box<dyn RenderContext>, RenderError>;
    /// Number of contexts opened and not yet closed.
    fn active_contexts(&self) -> usize;
}

/// One isolated browsing context: its own cookies, storage and cache.
#[async_trait]
pub trait RenderContext: Send {
    async fn render(
        &mut self,
        url: &str,
        session_cookie: Option<&str>,
    ) -> Result<RenderedPage, RenderError>;
    async fn close(self: Box<Self>);
}

/// Used when no headless backend is configured; every render is `Unavailable`.
pub struct NoopRenderer;

#[async_trait]
impl Renderer for NoopRenderer {
    async fn open_context(&self) -> Result<Box<dyn RenderContext>, RenderError> {
        Err(RenderError::Unavailable)
    }

    fn active_contexts(&self) -> usize {
        0
    }
}

/// Renders through a Browserless `/content` endpoint. Browserless runs each
/// request in a fresh incognito context, so a context here is a handle that
/// only tracks its own lifetime.
pub struct BrowserlessRenderer {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
    active: Arc<AtomicUsize>,
}

impl BrowserlessRenderer {
    /// # Errors
    ///
    /// Returns [`RenderError::Network`] if the HTTP client cannot be built.
    pub fn new(base_url: &str, token: Option<&str>, timeout: Duration) -> Result<Self, RenderError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.map(String::from),
            active: Arc::new(AtomicUsize::new(0)),
        })
    }
}

#[async_trait]
impl Renderer for BrowserlessRenderer {
    async fn open_context(&self) -> Result<Box<dyn RenderContext>, RenderError> {
        self.active.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(BrowserlessContext {
            client: self.client.clone(),
            base_url: self.base_url.clone(),
            token: self.token.clone(),
            active: Arc::clone(&self.active),
        }))
    }

    fn active_contexts(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }
}

struct BrowserlessContext {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
    active: Arc<AtomicUsize>,
}

#[async_trait]
impl RenderContext for BrowserlessContext {
    async fn render(
        &mut self,
        url: &str,
        session_cookie: Option<&str>,
    ) -> Result<RenderedPage, RenderError> {
        let endpoint = format!("{}/content", self.base_url);
        let mut body = serde_json::json!({
            "url": url,
            "gotoOptions": { "waitUntil": "networkidle2" },
        });
        if let Some(cookie) = session_cookie {
            body["setExtraHTTPHeaders"] = serde_json::json!({ "Cookie": cookie });
        }

        let mut request = self.client.post(&endpoint).json(&body);
        if let Some(token) = &self.token {
            request = request.query(&[("token", token)]);
        }
        let resp = request.send().await?;

        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(RenderError::Api {
                status: status.as_u16(),
                message,
            });
        }

        Ok(RenderedPage {
            final_url: url.to_owned(),
            html: resp.text().await?,
        })
    }

    async fn close(self: Box<Self>) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Owns an open context; closes it in the background if dropped unclosed.
struct ContextGuard {
    context: Option<Box<dyn RenderContext>>,
}

impl ContextGuard {
    async fn render(
        &mut self,
        url: &str,
        session_cookie: Option<&str>,
    ) -> Result<RenderedPage, RenderError> {
        match self.context.as_mut() {
            Some(context) => context.render(url, session_cookie).await,
            None => Err(RenderError::Unavailable),
        }
    }

    async fn close(mut self) {
        if let Some(context) = self.context.take() {
            context.close().await;
        }
    }
}

impl Drop for ContextGuard {
    fn drop(&mut self) {
        let Some(context) = self.context.take() else {
            return;
        };
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                context.close().await;
            });
        } else {
            tracing::warn!("no async runtime available to close headless context");
        }
    }
}

/// Caps concurrent headless contexts independently of plain HTTP fetches.
pub struct HeadlessPool {
    renderer: Arc<dyn Renderer>,
    permits: Semaphore,
    timeout: Duration,
}

impl HeadlessPool {
    #[must_use]
    pub fn new(renderer: Arc<dyn Renderer>, max_contexts: usize, timeout: Duration) -> Self {
        Self {
            renderer,
            permits: Semaphore::new(max_contexts.max(1)),
            timeout,
        }
    }

    /// Browserless-backed pool when `WSDB_BROWSERLESS_URL` is set, otherwise
    /// a pool whose renders are all `Unavailable`.
    ///
    /// # Errors
    ///
    /// Returns [`RenderError::Network`] if the renderer's HTTP client cannot be built.
    pub fn from_config(config: &AppConfig) -> Result<Self, RenderError> {
        let timeout = Duration::from_secs(config.request_timeout_secs.saturating_mul(2));
        let renderer: Arc<dyn Renderer> = match &config.browserless_url {
            Some(url) => Arc::new(BrowserlessRenderer::new(
                url,
                config.browserless_token.as_deref(),
                timeout,
            )?),
            None => Arc::new(NoopRenderer),
        };
        Ok(Self::new(renderer, config.headless_max_contexts, timeout))
    }

    #[must_use]
    pub fn active_contexts(&self) -> usize {
        self.renderer.active_contexts()
    }

    /// Renders `url` in a fresh context, waiting for a pool slot first.
    ///
    /// # Errors
    ///
    /// Returns [`RenderError::Cancelled`] or [`RenderError::Timeout`] when the
    /// render is cut short, or whatever the renderer reports.
    pub async fn render(
        &self,
        url: &str,
        session_cookie: Option<&str>,
        cancel: Option<&CancellationToken>,
    ) -> Result<RenderedPage, RenderError> {
        let _permit = match cancellable(cancel, self.permits.acquire()).await {
            None => return Err(RenderError::Cancelled),
            Some(Err(_closed)) => return Err(RenderError::Unavailable),
            Some(Ok(permit)) => permit,
        };

        let context = self.renderer.open_context().await?;
        let mut guard = ContextGuard {
            context: Some(context),
        };

        let rendered = cancellable(
            cancel,
            tokio::time::timeout(self.timeout, guard.render(url, session_cookie)),
        )
        .await;
        guard.close().await;

        match rendered {
            None => Err(RenderError::Cancelled),
            Some(Err(_elapsed)) => Err(RenderError::Timeout(self.timeout)),
            Some(Ok(result)) => result,
        }
    }
}
