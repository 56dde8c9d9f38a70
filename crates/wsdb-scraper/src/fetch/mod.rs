//! Fetch strategy selection.
//!
//! Every page fetch starts as a static HTTP request. Each outcome is
//! classified into a [`FailureKind`]:
//!
//! | Outcome | Kind | Action |
//! |---|---|---|
//! | 403/401, challenge page, login redirect, missing anchor | `Escalate` | one headless render in a fresh context |
//! | timeout, connection reset, 408/425/429, 5xx | `Transient` | retry the same strategy (300 ms, 900 ms) |
//! | 404/410, other 4xx, DNS failure, malformed URL | `Permanent` | give up |
//! | cancellation token fired | `Cancelled` | give up |
//!
//! The fetcher never returns `Err`; a [`PageFetch`] carries either the page
//! or the final failure kind, plus per-attempt telemetry.

pub mod intercept;

use std::error::Error as _;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use regex::Regex;
use reqwest::StatusCode;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use wsdb_core::AppConfig;

use crate::error::ScraperError;
use crate::headless::{HeadlessPool, RenderError};
use crate::rate_limit::RateLimiter;
use crate::retry::{retry_with_backoff, FETCH_BACKOFF_MS};

pub use intercept::{looks_intercepted, looks_intercepted_url};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum FailureKind {
    /// Anti-bot interception or missing required anchor; worth a headless try.
    Escalate,
    /// Timeout, reset, throttling or 5xx; worth retrying as-is.
    Transient,
    /// 404, DNS failure, malformed URL; retrying cannot help.
    Permanent,
    Cancelled,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            FailureKind::Escalate => "Escalate",
            FailureKind::Transient => "Transient",
            FailureKind::Permanent => "Permanent",
            FailureKind::Cancelled => "Cancelled",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FetchStrategy {
    Static,
    Headless,
}

/// Telemetry for one fetch attempt. Never persisted.
#[derive(Debug, Clone, Serialize)]
pub struct FetchAttempt {
    pub strategy: FetchStrategy,
    pub success: bool,
    #[serde(rename = "latencyMs", serialize_with = "serialize_millis")]
    pub latency: Duration,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureKind>,
}

fn serialize_millis<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u64(u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
}

#[derive(Debug, Clone)]
pub struct FetchedPage {
    pub final_url: String,
    pub html: String,
    pub strategy: FetchStrategy,
}

#[derive(Debug)]
pub struct PageFetch {
    pub page: Result<FetchedPage, FailureKind>,
    pub attempts: Vec<FetchAttempt>,
}

/// What to fetch and how far the selector may go to get it.
#[derive(Debug, Clone, Copy)]
pub struct PageRequest<'a> {
    pub url: &'a str,
    /// Rate bucket charged once per attempt, e.g. `"dhgate-detail"`.
    pub bucket: &'a str,
    /// Pattern that must match a usable page; absence escalates.
    pub anchor: Option<&'a Regex>,
    pub allow_headless: bool,
    pub session_cookie: Option<&'a str>,
    pub cancel: Option<&'a CancellationToken>,
}

/// Runs `fut` unless `cancel` fires first, in which case `None`.
pub(crate) async fn cancellable<F: Future>(
    cancel: Option<&CancellationToken>,
    fut: F,
) -> Option<F::Output> {
    match cancel {
        Some(token) => tokio::select! {
            biased;
            () = token.cancelled() => None,
            out = fut => Some(out),
        },
        None => Some(fut.await),
    }
}

/// Maps an HTTP status outside 2xx to a failure kind.
#[must_use]
pub fn classify_status(status: StatusCode) -> FailureKind {
    match status.as_u16() {
        401 | 403 => FailureKind::Escalate,
        408 | 425 | 429 | 500..=599 => FailureKind::Transient,
        _ => FailureKind::Permanent,
    }
}

/// Maps a transport-level `reqwest` error to a failure kind.
#[must_use]
pub fn classify_transport_error(err: &reqwest::Error) -> FailureKind {
    if err.is_builder() {
        return FailureKind::Permanent;
    }
    if err.is_timeout() {
        return FailureKind::Transient;
    }
    if err.is_redirect() {
        return FailureKind::Escalate;
    }
    if err.is_connect() && is_dns_failure(err) {
        return FailureKind::Permanent;
    }
    FailureKind::Transient
}

fn is_dns_failure(err: &reqwest::Error) -> bool {
    let mut source = err.source();
    while let Some(cause) = source {
        let msg = cause.to_string().to_ascii_lowercase();
        if msg.contains("dns")
            || msg.contains("failed to lookup address")
            || msg.contains("name or service not known")
            || msg.contains("no such host")
            || msg.contains("nodename nor servname")
        {
            return true;
        }
        source = cause.source();
    }
    false
}

fn classify_render_error(err: &RenderError) -> FailureKind {
    match err {
        RenderError::Cancelled => FailureKind::Cancelled,
        RenderError::Timeout(_) | RenderError::Network(_) => FailureKind::Transient,
        RenderError::Api { status, .. } if *status == 429 || *status >= 500 => {
            FailureKind::Transient
        }
        RenderError::Unavailable | RenderError::Api { .. } => FailureKind::Escalate,
    }
}

/// Escalates bodies that are challenge pages or lack the required anchor.
fn check_body(final_url: &str, html: &str, anchor: Option<&Regex>) -> Result<(), FailureKind> {
    if looks_intercepted_url(final_url) || looks_intercepted(html) {
        return Err(FailureKind::Escalate);
    }
    if anchor.is_some_and(|re| !re.is_match(html)) {
        return Err(FailureKind::Escalate);
    }
    Ok(())
}

fn is_fetchable_url(url: &str) -> bool {
    reqwest::Url::parse(url)
        .is_ok_and(|u| matches!(u.scheme(), "http" | "https") && u.host_str().is_some())
}

/// Static HTTP fetcher with transient retry and headless escalation.
pub struct Fetcher {
    client: reqwest::Client,
    limiter: Arc<RateLimiter>,
    headless: Arc<HeadlessPool>,
    max_retries: u32,
    backoff_ms: Vec<u64>,
}

impl Fetcher {
    #[must_use]
    pub fn new(
        client: reqwest::Client,
        limiter: Arc<RateLimiter>,
        headless: Arc<HeadlessPool>,
        max_retries: u32,
    ) -> Self {
        Self {
            client,
            limiter,
            headless,
            max_retries,
            backoff_ms: FETCH_BACKOFF_MS.to_vec(),
        }
    }

    /// Builds the HTTP client from config (timeout, user agent).
    ///
    /// # Errors
    ///
    /// Returns [`ScraperError::Http`] if the `reqwest::Client` cannot be built.
    pub fn from_config(
        config: &AppConfig,
        limiter: Arc<RateLimiter>,
        headless: Arc<HeadlessPool>,
    ) -> Result<Self, ScraperError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .connect_timeout(Duration::from_secs(10))
            .user_agent(&config.user_agent)
            .build()?;
        Ok(Self::new(client, limiter, headless, config.max_retries))
    }

    /// Replaces the transient back-off schedule (tests use zero delays).
    #[must_use]
    pub fn with_backoff_ms(mut self, backoff_ms: Vec<u64>) -> Self {
        self.backoff_ms = backoff_ms;
        self
    }

    #[must_use]
    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }

    #[must_use]
    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    pub async fn fetch_page(&self, req: &PageRequest<'_>) -> PageFetch {
        let attempts = Mutex::new(Vec::new());
        let page = self.run(req, &attempts).await;
        let attempts = attempts.into_inner().unwrap_or_else(PoisonError::into_inner);
        if let Err(kind) = &page {
            tracing::debug!(url = req.url, failure = %kind, attempts = attempts.len(), "fetch failed");
        }
        PageFetch { page, attempts }
    }

    async fn run(
        &self,
        req: &PageRequest<'_>,
        attempts: &Mutex<Vec<FetchAttempt>>,
    ) -> Result<FetchedPage, FailureKind> {
        if req.cancel.is_some_and(CancellationToken::is_cancelled) {
            return Err(FailureKind::Cancelled);
        }
        if !is_fetchable_url(req.url) {
            record(attempts, FetchStrategy::Static, Instant::now(), Some(FailureKind::Permanent));
            return Err(FailureKind::Permanent);
        }

        let static_result = retry_with_backoff(
            self.max_retries,
            &self.backoff_ms,
            |kind: &FailureKind| *kind == FailureKind::Transient,
            || async move {
                cancellable(req.cancel, self.limiter.acquire(req.bucket))
                    .await
                    .ok_or(FailureKind::Cancelled)?;
                let started = Instant::now();
                let result = cancellable(req.cancel, self.fetch_static(req))
                    .await
                    .unwrap_or(Err(FailureKind::Cancelled));
                record(attempts, FetchStrategy::Static, started, result.as_ref().err().copied());
                result
            },
        )
        .await;

        match static_result {
            Err(FailureKind::Escalate) if req.allow_headless => {
                tracing::info!(url = req.url, "static fetch intercepted, escalating to headless");
                cancellable(req.cancel, self.limiter.acquire(req.bucket))
                    .await
                    .ok_or(FailureKind::Cancelled)?;
                let started = Instant::now();
                let result = self.fetch_headless(req).await;
                record(attempts, FetchStrategy::Headless, started, result.as_ref().err().copied());
                result
            }
            other => other,
        }
    }

    async fn fetch_static(&self, req: &PageRequest<'_>) -> Result<FetchedPage, FailureKind> {
        let mut request = self.client.get(req.url);
        if let Some(cookie) = req.session_cookie {
            request = request.header(reqwest::header::COOKIE, cookie);
        }
        let response = request
            .send()
            .await
            .map_err(|e| classify_transport_error(&e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(classify_status(status));
        }
        let final_url = response.url().to_string();
        let html = response
            .text()
            .await
            .map_err(|e| classify_transport_error(&e))?;

        check_body(&final_url, &html, req.anchor)?;
        Ok(FetchedPage {
            final_url,
            html,
            strategy: FetchStrategy::Static,
        })
    }

    async fn fetch_headless(&self, req: &PageRequest<'_>) -> Result<FetchedPage, FailureKind> {
        let page = self
            .headless
            .render(req.url, req.session_cookie, req.cancel)
            .await
            .map_err(|e| {
                tracing::warn!(url = req.url, error = %e, "headless render failed");
                classify_render_error(&e)
            })?;
        check_body(&page.final_url, &page.html, req.anchor)?;
        Ok(FetchedPage {
            final_url: page.final_url,
            html: page.html,
            strategy: FetchStrategy::Headless,
        })
    }
}

fn record(
    attempts: &Mutex<Vec<FetchAttempt>>,
    strategy: FetchStrategy,
    started: Instant,
    failure: Option<FailureKind>,
) {
    let attempt = FetchAttempt {
        strategy,
        success: failure.is_none(),
        latency: started.elapsed(),
        failure,
    };
    attempts
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .push(attempt);
}
