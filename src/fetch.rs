//! Page fetching with throttling, retries and the time-window redirect rewrite.
//!
//! # Architecture
//!
//! - [`Transport`]: one raw HTTP GET, returning the final (post-redirect) URL
//!   and the body decoded as UTF-8
//! - [`HttpTransport`]: the `reqwest` implementation with a browser user agent
//! - [`Fetcher`]: decorator that adds the retry policy, the random pause
//!   after every attempt and the cancellation hook to any [`Transport`]
//! - [`PageFetch`]: what the walker and the fact-check dispatcher consume
//!
//! # Retry Strategy
//!
//! - Transport and decode failures are retried, unbounded by default
//! - A non-success HTTP status is never retried and ends the run
//! - Every attempt is followed by a pause drawn uniformly from the rate limit

use crate::error::{CrawlError, Result};
use crate::utils::truncate_for_log;
use rand::{Rng, rng};
use std::fmt;
use std::future::Future;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{debug, error, instrument, warn};

/// A fetched page: where the request ended up and what it returned.
#[derive(Debug, Clone)]
pub struct FetchedPage {
    /// URL after following redirects.
    pub url: String,
    pub body: String,
}

/// A single HTTP GET with no retry or throttling of its own.
pub trait Transport {
    async fn get(&self, url: &str) -> Result<FetchedPage>;
}

/// Anything that can hand back a page's markup.
pub trait PageFetch {
    /// Fetch `url`. With `rewrite_time_window` set, the URL is first resolved
    /// through the engine's redirect and rewritten to search all dates.
    async fn fetch(&self, url: &str, rewrite_time_window: bool) -> Result<String>;
}

/// `reqwest`-backed transport.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(user_agent: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .build()
            .map_err(CrawlError::Client)?;
        Ok(Self { client })
    }
}

impl Transport for HttpTransport {
    #[instrument(level = "debug", skip(self))]
    async fn get(&self, url: &str) -> Result<FetchedPage> {
        let transport_err = |source| CrawlError::Transport {
            url: url.to_string(),
            source,
        };

        let response = self.client.get(url).send().await.map_err(transport_err)?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(
                status = status.as_u16(),
                body_preview = %truncate_for_log(&body, 300),
                "Request rejected"
            );
            return Err(CrawlError::Rejected {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let final_url = response.url().to_string();
        let bytes = response.bytes().await.map_err(transport_err)?;
        let body = String::from_utf8(bytes.to_vec()).map_err(|_| CrawlError::Decode {
            url: url.to_string(),
        })?;

        debug!(bytes = body.len(), %final_url, "Fetched page");
        Ok(FetchedPage {
            url: final_url,
            body,
        })
    }
}

/// Bounds, in seconds, of the random pause taken after every request.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateLimit {
    pub min: f64,
    pub max: f64,
}

impl RateLimit {
    pub fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    #[cfg(test)]
    pub fn none() -> Self {
        Self { min: 0.0, max: 0.0 }
    }

    /// Draw the next pause.
    pub fn delay(&self) -> Duration {
        let min = self.min.max(0.0);
        if self.max <= min {
            return Duration::from_secs_f64(min);
        }
        Duration::from_secs_f64(rng().random_range(min..=self.max))
    }
}

/// How many attempts a request gets before the fetcher gives up.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetryPolicy {
    /// `None` retries forever.
    pub max_attempts: Option<usize>,
}

impl RetryPolicy {
    pub fn unbounded() -> Self {
        Self { max_attempts: None }
    }

    pub fn capped(max_attempts: usize) -> Self {
        Self {
            max_attempts: Some(max_attempts),
        }
    }

    fn exhausted(&self, attempts: usize) -> bool {
        self.max_attempts.is_some_and(|max| attempts >= max)
    }
}

/// Triggers cancellation of every fetcher holding the paired [`CancelSignal`].
#[derive(Debug)]
pub struct Canceller(watch::Sender<bool>);

impl Canceller {
    pub fn cancel(&self) {
        self.0.send_replace(true);
    }
}

#[derive(Debug, Clone)]
pub struct CancelSignal(watch::Receiver<bool>);

impl CancelSignal {
    pub fn is_cancelled(&self) -> bool {
        *self.0.borrow()
    }

    /// Resolves once cancellation is requested; never resolves if the
    /// [`Canceller`] is dropped without cancelling.
    pub async fn cancelled(&self) {
        let mut rx = self.0.clone();
        if rx.wait_for(|cancelled| *cancelled).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

pub fn cancellation() -> (Canceller, CancelSignal) {
    let (tx, rx) = watch::channel(false);
    (Canceller(tx), CancelSignal(rx))
}

/// Retrying, throttling decorator around a [`Transport`].
pub struct Fetcher<T> {
    transport: T,
    rate: RateLimit,
    retry: RetryPolicy,
    time_window_query: String,
    cancel: Option<CancelSignal>,
}

impl<T> Fetcher<T>
where
    T: Transport,
{
    pub fn new(transport: T, rate: RateLimit, retry: RetryPolicy, time_window_query: &str) -> Self {
        Self {
            transport,
            rate,
            retry,
            time_window_query: time_window_query.to_string(),
            cancel: None,
        }
    }

    pub fn with_cancel(mut self, signal: CancelSignal) -> Self {
        self.cancel = Some(signal);
        self
    }

    #[cfg(test)]
    pub fn transport(&self) -> &T {
        &self.transport
    }

    async fn guarded<F, R>(&self, fut: F) -> Result<R>
    where
        F: Future<Output = Result<R>>,
    {
        match &self.cancel {
            None => fut.await,
            Some(signal) => {
                if signal.is_cancelled() {
                    return Err(CrawlError::Cancelled);
                }
                tokio::select! {
                    res = fut => res,
                    _ = signal.cancelled() => Err(CrawlError::Cancelled),
                }
            }
        }
    }

    async fn throttle(&self) -> Result<()> {
        let delay = self.rate.delay();
        debug!(?delay, "Throttling");
        self.guarded(async {
            sleep(delay).await;
            Ok(())
        })
        .await
    }

    /// GET `url`, retrying transient failures per the policy.
    #[instrument(level = "info", skip(self))]
    async fn get_with_retry(&self, url: &str) -> Result<FetchedPage> {
        let total_t0 = Instant::now();
        let mut attempt = 0usize;

        loop {
            attempt += 1;
            match self.guarded(self.transport.get(url)).await {
                Ok(page) => {
                    self.throttle().await?;
                    return Ok(page);
                }
                Err(e) if e.is_transient() => {
                    warn!(
                        attempt,
                        max = ?self.retry.max_attempts,
                        elapsed_ms_total = total_t0.elapsed().as_millis() as u64,
                        error = %e,
                        "fetch attempt failed; retrying after pause"
                    );
                    self.throttle().await?;
                    if self.retry.exhausted(attempt) {
                        error!(attempt, "fetch exhausted retries");
                        return Err(CrawlError::RetriesExhausted {
                            url: url.to_string(),
                            attempts: attempt,
                        });
                    }
                }
                Err(e) => {
                    error!(attempt, error = %e, "fetch failed");
                    return Err(e);
                }
            }
        }
    }
}

impl<T> fmt::Debug for Fetcher<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Fetcher")
            .field("rate", &self.rate)
            .field("retry", &self.retry)
            .field("time_window_query", &self.time_window_query)
            .field("cancellable", &self.cancel.is_some())
            .finish()
    }
}

impl<T> PageFetch for Fetcher<T>
where
    T: Transport,
{
    #[instrument(level = "info", skip(self))]
    async fn fetch(&self, url: &str, rewrite_time_window: bool) -> Result<String> {
        let mut target = normalize_url(url);

        if rewrite_time_window {
            let resolved = self.get_with_retry(&target).await?;
            target = rewrite_time_window_url(&resolved.url, &self.time_window_query);
            debug!(%target, "Rewrote results URL for time window");
        }

        let page = self.get_with_retry(&target).await?;
        Ok(page.body)
    }
}

/// Prepend `https://` to URLs that carry no scheme.
pub fn normalize_url(url: &str) -> String {
    if url.contains("http") {
        url.to_string()
    } else {
        format!("https://{}", url)
    }
}

/// Drop the final query segment of `resolved` and append `fragment`.
pub fn rewrite_time_window_url(resolved: &str, fragment: &str) -> String {
    let base = match resolved.rfind('&') {
        Some(i) => &resolved[..i],
        None => resolved,
    };
    if base.contains('?') {
        format!("{}{}", base, fragment)
    } else {
        format!("{}?{}", base, fragment.trim_start_matches('&'))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Replays a fixed list of outcomes and records every requested URL.
    struct ScriptedTransport {
        outcomes: Mutex<VecDeque<Result<FetchedPage>>>,
        requested: Mutex<Vec<String>>,
    }

    impl ScriptedTransport {
        fn new(outcomes: Vec<Result<FetchedPage>>) -> Self {
            Self {
                outcomes: Mutex::new(outcomes.into()),
                requested: Mutex::new(Vec::new()),
            }
        }

        fn requested(&self) -> Vec<String> {
            self.requested.lock().unwrap().clone()
        }
    }

    impl Transport for ScriptedTransport {
        async fn get(&self, url: &str) -> Result<FetchedPage> {
            self.requested.lock().unwrap().push(url.to_string());
            self.outcomes
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(page(url, "")))
        }
    }

    fn page(url: &str, body: &str) -> FetchedPage {
        FetchedPage {
            url: url.to_string(),
            body: body.to_string(),
        }
    }

    fn decode_error() -> CrawlError {
        CrawlError::Decode {
            url: "https://example.com".to_string(),
        }
    }

    fn fetcher(outcomes: Vec<Result<FetchedPage>>, retry: RetryPolicy) -> Fetcher<ScriptedTransport> {
        Fetcher::new(
            ScriptedTransport::new(outcomes),
            RateLimit::none(),
            retry,
            "&tbas=0",
        )
    }

    #[test]
    fn test_normalize_url() {
        assert_eq!(normalize_url("www.justica.gov.br/x"), "https://www.justica.gov.br/x");
        assert_eq!(normalize_url("http://boatos.org/x"), "http://boatos.org/x");
        assert_eq!(normalize_url("https://e-farsas.com"), "https://e-farsas.com");
    }

    #[test]
    fn test_rewrite_time_window_url() {
        assert_eq!(
            rewrite_time_window_url(
                "https://www.google.com.br/search?tbs=sbi:AMhZ&hl=pt-BR",
                "&tbas=0"
            ),
            "https://www.google.com.br/search?tbs=sbi:AMhZ&tbas=0"
        );
        assert_eq!(
            rewrite_time_window_url("https://www.google.com.br/search?tbs=sbi:AMhZ", "&tbas=0"),
            "https://www.google.com.br/search?tbs=sbi:AMhZ&tbas=0"
        );
        assert_eq!(
            rewrite_time_window_url("https://www.google.com.br/search", "&tbas=0"),
            "https://www.google.com.br/search?tbas=0"
        );
    }

    #[test]
    fn test_rate_limit_delay_within_bounds() {
        let rate = RateLimit::new(0.01, 0.02);
        for _ in 0..50 {
            let d = rate.delay();
            assert!(d >= Duration::from_secs_f64(0.01));
            assert!(d <= Duration::from_secs_f64(0.02));
        }
        assert_eq!(RateLimit::none().delay(), Duration::ZERO);
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried() {
        let f = fetcher(
            vec![
                Err(decode_error()),
                Err(decode_error()),
                Ok(page("https://example.com/", "<html>ok</html>")),
            ],
            RetryPolicy::unbounded(),
        );
        let body = f.fetch("example.com/", false).await.unwrap();
        assert_eq!(body, "<html>ok</html>");
        assert_eq!(f.transport().requested().len(), 3);
        assert!(
            f.transport()
                .requested()
                .iter()
                .all(|u| u == "https://example.com/")
        );
    }

    #[tokio::test]
    async fn test_rejection_is_not_retried() {
        let f = fetcher(
            vec![Err(CrawlError::Rejected {
                url: "https://www.google.com.br/search".to_string(),
                status: 503,
            })],
            RetryPolicy::unbounded(),
        );
        let err = f.fetch("https://www.google.com.br/search", false).await.unwrap_err();
        assert!(matches!(err, CrawlError::Rejected { status: 503, .. }));
        assert_eq!(f.transport().requested().len(), 1);
    }

    #[tokio::test]
    async fn test_retry_cap_is_honoured() {
        let f = fetcher(
            vec![Err(decode_error()), Err(decode_error()), Err(decode_error())],
            RetryPolicy::capped(2),
        );
        let err = f.fetch("https://example.com", false).await.unwrap_err();
        assert!(matches!(err, CrawlError::RetriesExhausted { attempts: 2, .. }));
        assert_eq!(f.transport().requested().len(), 2);
    }

    #[tokio::test]
    async fn test_time_window_rewrite_fetches_resolved_url() {
        let f = fetcher(
            vec![
                Ok(page(
                    "https://www.google.com.br/search?tbs=sbi:AMhZ&hl=pt-BR",
                    "redirect landing",
                )),
                Ok(page("https://www.google.com.br/search?tbs=sbi:AMhZ&tbas=0", "results")),
            ],
            RetryPolicy::unbounded(),
        );
        let body = f
            .fetch("http://images.google.com.br/searchbyimage?image_url=x", true)
            .await
            .unwrap();
        assert_eq!(body, "results");
        assert_eq!(
            f.transport().requested(),
            vec![
                "http://images.google.com.br/searchbyimage?image_url=x".to_string(),
                "https://www.google.com.br/search?tbs=sbi:AMhZ&tbas=0".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_cancelled_fetcher_makes_no_request() {
        let (canceller, signal) = cancellation();
        let f = fetcher(vec![], RetryPolicy::unbounded()).with_cancel(signal);
        canceller.cancel();
        let err = f.fetch("https://example.com", false).await.unwrap_err();
        assert!(matches!(err, CrawlError::Cancelled));
        assert!(f.transport().requested().is_empty());
    }

    #[tokio::test]
    async fn test_cancel_interrupts_throttle() {
        let (canceller, signal) = cancellation();
        let f = Fetcher::new(
            ScriptedTransport::new(vec![Ok(page("https://example.com", "x"))]),
            RateLimit::new(3600.0, 3600.0),
            RetryPolicy::unbounded(),
            "&tbas=0",
        )
        .with_cancel(signal);

        let cancel_soon = async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            canceller.cancel();
        };
        let (res, _) = tokio::join!(f.fetch("https://example.com", false), cancel_soon);
        assert!(matches!(res, Err(CrawlError::Cancelled)));
    }

    /// A server that accepts the request and never answers.
    struct StalledTransport;

    impl Transport for StalledTransport {
        async fn get(&self, _url: &str) -> Result<FetchedPage> {
            std::future::pending().await
        }
    }

    #[tokio::test]
    async fn test_cancel_interrupts_request_in_flight() {
        let (canceller, signal) = cancellation();
        let f = Fetcher::new(
            StalledTransport,
            RateLimit::none(),
            RetryPolicy::unbounded(),
            "&tbas=0",
        )
        .with_cancel(signal);

        let cancel_soon = async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            canceller.cancel();
        };
        let (res, _) = tokio::time::timeout(Duration::from_secs(5), async {
            tokio::join!(f.fetch("https://example.com", true), cancel_soon)
        })
        .await
        .expect("cancellation did not reach the pending request");
        assert!(matches!(res, Err(CrawlError::Cancelled)));
    }
}
