//! Bounded breadth-first sitemap traversal.
//!
//! A crawl starts at one endpoint URL and walks nested sitemap indexes level
//! by level. It is sequential: one request in flight, with a minimum delay
//! between requests taken from the owning source's `rate_limit_ms`.
//!
//! # Bounds
//!
//! | Limit | Effect when reached |
//! |-------|---------------------|
//! | `max_depth` | nested sitemaps deeper than this are not queued |
//! | `max_sitemaps` | no further fetches; queued sitemaps are dropped |
//! | `max_urls` | page collection stops and the outcome is marked `truncated` |
//!
//! Network access goes through the [`Fetcher`] trait so the traversal can be
//! driven by an in-memory site in tests.

use async_trait::async_trait;
use std::collections::{HashSet, VecDeque};
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;

use crate::config::CrawlConfig;
use crate::error::upstream;
use crate::urls::{extract_feed_links, normalize_url};

/// Response body and metadata for one fetched URL.
#[derive(Debug, Clone)]
pub struct FetchedPage {
    pub status: u16,
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
}

impl FetchedPage {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.bytes).into_owned()
    }
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request to {url} failed: {message}")]
    Network { url: String, message: String },
    #[error("response from {url} exceeds {limit} bytes")]
    TooLarge { url: String, limit: u64 },
}

/// Source of HTTP responses.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Fetches `url`. Non-2xx statuses are returned, not raised; only
    /// transport failures and oversized bodies are errors.
    async fn fetch(&self, url: &str) -> Result<FetchedPage, FetchError>;
}

/// [`Fetcher`] backed by `reqwest`.
pub struct HttpFetcher {
    client: reqwest::Client,
    max_bytes: u64,
}

impl HttpFetcher {
    pub fn new(config: &CrawlConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(Duration::from_secs(config.timeout_secs))
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()?;
        Ok(Self {
            client,
            max_bytes: config.max_download_bytes,
        })
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchedPage, FetchError> {
        let network = |e: reqwest::Error| FetchError::Network {
            url: url.to_string(),
            message: e.to_string(),
        };

        let mut response = self.client.get(url).send().await.map_err(network)?;
        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());

        if response.content_length().is_some_and(|len| len > self.max_bytes) {
            return Err(FetchError::TooLarge {
                url: url.to_string(),
                limit: self.max_bytes,
            });
        }

        let mut bytes = Vec::new();
        while let Some(chunk) = response.chunk().await.map_err(network)? {
            if bytes.len() as u64 + chunk.len() as u64 > self.max_bytes {
                return Err(FetchError::TooLarge {
                    url: url.to_string(),
                    limit: self.max_bytes,
                });
            }
            bytes.extend_from_slice(&chunk);
        }

        Ok(FetchedPage {
            status,
            content_type,
            bytes,
        })
    }
}

/// Enforces a minimum delay between consecutive requests.
pub struct RateLimiter {
    min_delay: Duration,
    last_request: Option<Instant>,
}

impl RateLimiter {
    pub fn new(min_delay_ms: u64) -> Self {
        Self {
            min_delay: Duration::from_millis(min_delay_ms),
            last_request: None,
        }
    }

    /// Waits until `min_delay` has passed since the previous call. The first
    /// call returns immediately.
    pub async fn acquire(&mut self) {
        if let Some(last) = self.last_request {
            let elapsed = last.elapsed();
            if elapsed < self.min_delay {
                tokio::time::sleep(self.min_delay - elapsed).await;
            }
        }
        self.last_request = Some(Instant::now());
    }
}

#[derive(Debug, Clone)]
pub struct CrawlLimits {
    pub max_depth: usize,
    pub max_urls: usize,
    pub max_sitemaps: usize,
}

impl CrawlLimits {
    pub fn from_config(config: &CrawlConfig) -> Self {
        Self {
            max_depth: config.max_depth,
            max_urls: config.max_urls,
            max_sitemaps: config.max_sitemaps,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct CrawlOutcome {
    /// Normalized page URLs in discovery order, without duplicates.
    pub urls: Vec<String>,
    pub sitemaps_fetched: usize,
    /// `(url, reason)` for nested sitemaps that could not be fetched.
    pub errors: Vec<(String, String)>,
    /// Set when `max_urls` or `max_sitemaps` cut the crawl short.
    pub truncated: bool,
}

/// Crawls from `entry_url`, which sits at depth 0.
///
/// Every fetch goes through `limiter`, which callers share across the
/// endpoints of one source. Fails only when the entry itself cannot be fetched or returns a non-2xx
/// status.
pub async fn crawl(
    fetcher: &dyn Fetcher,
    entry_url: &str,
    limits: &CrawlLimits,
    limiter: &mut RateLimiter,
) -> anyhow::Result<CrawlOutcome> {
    let mut outcome = CrawlOutcome::default();
    let mut queue: VecDeque<(String, usize)> = VecDeque::new();
    let mut visited: HashSet<String> = HashSet::new();
    let mut seen_pages: HashSet<String> = HashSet::new();

    let entry = normalize_url(entry_url);
    visited.insert(entry.clone());
    queue.push_back((entry, 0));

    'outer: while let Some((sitemap_url, depth)) = queue.pop_front() {
        if outcome.sitemaps_fetched >= limits.max_sitemaps {
            tracing::warn!(
                remaining = queue.len() + 1,
                limit = limits.max_sitemaps,
                "sitemap fetch limit reached"
            );
            outcome.truncated = true;
            break;
        }

        limiter.acquire().await;
        let fetched = fetcher.fetch(&sitemap_url).await;
        outcome.sitemaps_fetched += 1;

        let page = match fetched {
            Ok(page) if page.is_success() => page,
            Ok(page) => {
                let reason = format!("HTTP {}", page.status);
                if depth == 0 {
                    return Err(upstream(format!(
                        "Failed to fetch endpoint {}: {}",
                        sitemap_url, reason
                    )));
                }
                tracing::warn!(url = %sitemap_url, %reason, "skipping nested sitemap");
                outcome.errors.push((sitemap_url, reason));
                continue;
            }
            Err(e) => {
                if depth == 0 {
                    return Err(upstream(e.to_string()));
                }
                tracing::warn!(url = %sitemap_url, error = %e, "skipping nested sitemap");
                outcome.errors.push((sitemap_url, e.to_string()));
                continue;
            }
        };

        let links = extract_feed_links(&page.text());
        tracing::debug!(
            url = %sitemap_url,
            depth,
            sitemaps = links.sitemaps.len(),
            pages = links.pages.len(),
            "parsed sitemap"
        );

        if depth < limits.max_depth {
            for nested in links.sitemaps {
                let nested = normalize_url(&nested);
                if visited.insert(nested.clone()) {
                    queue.push_back((nested, depth + 1));
                }
            }
        }

        for page_url in links.pages {
            let page_url = normalize_url(&page_url);
            if seen_pages.contains(&page_url) || visited.contains(&page_url) {
                continue;
            }
            if outcome.urls.len() >= limits.max_urls {
                tracing::warn!(limit = limits.max_urls, "url limit reached");
                outcome.truncated = true;
                break 'outer;
            }
            seen_pages.insert(page_url.clone());
            outcome.urls.push(page_url);
        }
    }

    Ok(outcome)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// In-memory site: URL → (status, content type, body).
    #[derive(Default)]
    pub struct StubFetcher {
        pages: HashMap<String, (u16, Option<String>, Vec<u8>)>,
        pub requests: Mutex<Vec<String>>,
        times: Mutex<Vec<Instant>>,
    }

    impl StubFetcher {
        pub fn with(mut self, url: &str, body: &str) -> Self {
            self.pages.insert(
                url.to_string(),
                (200, Some("application/xml".to_string()), body.as_bytes().to_vec()),
            );
            self
        }

        pub fn with_response(
            mut self,
            url: &str,
            status: u16,
            content_type: Option<&str>,
            body: &[u8],
        ) -> Self {
            self.pages.insert(
                url.to_string(),
                (status, content_type.map(|s| s.to_string()), body.to_vec()),
            );
            self
        }

        pub fn requested(&self) -> Vec<String> {
            self.requests.lock().unwrap().clone()
        }

        /// Gaps between consecutive requests, in request order.
        pub fn gaps(&self) -> Vec<Duration> {
            self.times
                .lock()
                .unwrap()
                .windows(2)
                .map(|w| w[1] - w[0])
                .collect()
        }
    }

    #[async_trait]
    impl Fetcher for StubFetcher {
        async fn fetch(&self, url: &str) -> Result<FetchedPage, FetchError> {
            self.requests.lock().unwrap().push(url.to_string());
            self.times.lock().unwrap().push(Instant::now());
            match self.pages.get(url) {
                Some((status, ct, body)) => Ok(FetchedPage {
                    status: *status,
                    content_type: ct.clone(),
                    bytes: body.clone(),
                }),
                None => Ok(FetchedPage {
                    status: 404,
                    content_type: None,
                    bytes: Vec::new(),
                }),
            }
        }
    }

    fn limits() -> CrawlLimits {
        CrawlLimits {
            max_depth: 3,
            max_urls: 100,
            max_sitemaps: 10,
        }
    }

    fn urlset(urls: &[&str]) -> String {
        let body: String = urls
            .iter()
            .map(|u| format!("<url><loc>{}</loc></url>", u))
            .collect();
        format!("<urlset>{}</urlset>", body)
    }

    fn index(urls: &[&str]) -> String {
        let body: String = urls
            .iter()
            .map(|u| format!("<sitemap><loc>{}</loc></sitemap>", u))
            .collect();
        format!("<sitemapindex>{}</sitemapindex>", body)
    }

    #[tokio::test]
    async fn walks_nested_indexes_breadth_first() {
        let site = StubFetcher::default()
            .with("https://ex.org/sitemap.xml", &index(&["https://ex.org/s1.xml", "https://ex.org/s2.xml"]))
            .with("https://ex.org/s1.xml", &index(&["https://ex.org/s1a.xml"]))
            .with("https://ex.org/s2.xml", &urlset(&["https://ex.org/b", "https://ex.org/a#x"]))
            .with("https://ex.org/s1a.xml", &urlset(&["https://ex.org/a", "https://ex.org/c"]));

        let out = crawl(&site, "https://ex.org/sitemap.xml", &limits(), &mut RateLimiter::new(0))
            .await
            .unwrap();

        assert_eq!(
            site.requested(),
            vec![
                "https://ex.org/sitemap.xml",
                "https://ex.org/s1.xml",
                "https://ex.org/s2.xml",
                "https://ex.org/s1a.xml",
            ]
        );
        assert_eq!(
            out.urls,
            vec!["https://ex.org/b", "https://ex.org/a", "https://ex.org/c"]
        );
        assert_eq!(out.sitemaps_fetched, 4);
        assert!(!out.truncated);
    }

    #[tokio::test]
    async fn depth_bound_stops_descent() {
        let site = StubFetcher::default()
            .with("https://ex.org/root.xml", &index(&["https://ex.org/l1.xml"]))
            .with("https://ex.org/l1.xml", &index(&["https://ex.org/l2.xml"]))
            .with("https://ex.org/l2.xml", &urlset(&["https://ex.org/deep"]));

        let mut lim = limits();
        lim.max_depth = 1;
        let out = crawl(&site, "https://ex.org/root.xml", &lim, &mut RateLimiter::new(0)).await.unwrap();

        assert_eq!(out.sitemaps_fetched, 2);
        assert!(out.urls.is_empty());
        assert!(!site.requested().contains(&"https://ex.org/l2.xml".to_string()));
    }

    #[tokio::test]
    async fn cyclic_indexes_are_fetched_once() {
        let site = StubFetcher::default()
            .with("https://ex.org/a.xml", &index(&["https://ex.org/b.xml"]))
            .with("https://ex.org/b.xml", &index(&["https://ex.org/a.xml"]));

        let out = crawl(&site, "https://ex.org/a.xml", &limits(), &mut RateLimiter::new(0)).await.unwrap();
        assert_eq!(out.sitemaps_fetched, 2);
    }

    #[tokio::test]
    async fn url_limit_truncates() {
        let site = StubFetcher::default().with(
            "https://ex.org/s.xml",
            &urlset(&["https://ex.org/1", "https://ex.org/2", "https://ex.org/3"]),
        );
        let mut lim = limits();
        lim.max_urls = 2;
        let out = crawl(&site, "https://ex.org/s.xml", &lim, &mut RateLimiter::new(0)).await.unwrap();
        assert_eq!(out.urls, vec!["https://ex.org/1", "https://ex.org/2"]);
        assert!(out.truncated);
    }

    #[tokio::test]
    async fn sitemap_limit_truncates() {
        let site = StubFetcher::default()
            .with("https://ex.org/i.xml", &index(&["https://ex.org/x.xml", "https://ex.org/y.xml"]))
            .with("https://ex.org/x.xml", &urlset(&["https://ex.org/p"]));
        let mut lim = limits();
        lim.max_sitemaps = 2;
        let out = crawl(&site, "https://ex.org/i.xml", &lim, &mut RateLimiter::new(0)).await.unwrap();
        assert_eq!(out.sitemaps_fetched, 2);
        assert_eq!(out.urls, vec!["https://ex.org/p"]);
        assert!(out.truncated);
    }

    #[tokio::test]
    async fn entry_failure_is_an_error_nested_failure_is_not() {
        let site = StubFetcher::default()
            .with("https://ex.org/i.xml", &index(&["https://ex.org/missing.xml"]));

        let err = crawl(&site, "https://ex.org/nope.xml", &limits(), &mut RateLimiter::new(0))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("HTTP 404"));

        let out = crawl(&site, "https://ex.org/i.xml", &limits(), &mut RateLimiter::new(0)).await.unwrap();
        assert_eq!(out.errors.len(), 1);
        assert_eq!(out.errors[0].0, "https://ex.org/missing.xml");
    }

    #[tokio::test]
    async fn rate_limiter_spaces_requests() {
        let mut limiter = RateLimiter::new(40);
        let start = Instant::now();
        limiter.acquire().await;
        limiter.acquire().await;
        limiter.acquire().await;
        assert!(start.elapsed() >= Duration::from_millis(80));
    }
}
