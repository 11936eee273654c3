//! Endpoint discovery: turn one source endpoint into `discovered` document
//! rows.
//!
//! Candidates come from the crawler (sitemap, rss), a single list page
//! (html_list) or the endpoint URL itself (manual_seed). They pass through
//! the endpoint's [`PathFilter`] and are inserted keyed by URL, so running
//! discovery again only reports the new ones as `kept`.

use anyhow::Result;
use serde::Serialize;
use sqlx::SqlitePool;

use crate::config::{Config, CrawlConfig};
use crate::crawler::{crawl, CrawlLimits, CrawlOutcome, Fetcher, HttpFetcher, RateLimiter};
use crate::db::{self, now_ts};
use crate::error::{invalid, not_found, upstream};
use crate::filter::{ParserHint, PathFilter};
use crate::models::{EndpointType, Source, SourceEndpoint};
use crate::sources::{get_endpoint, get_source, list_endpoints, mark_endpoint_crawled};
use crate::urls::{extract_anchor_links, normalize_url};

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveryReport {
    pub endpoint_id: i64,
    /// Normalized candidates before filtering.
    pub discovered: usize,
    /// Newly inserted documents.
    pub kept: usize,
    /// Candidates already present in `documents`.
    pub skipped: usize,
    pub filtered_out: usize,
    pub sitemaps_fetched: usize,
    pub errors: Vec<String>,
    pub truncated: bool,
}

pub async fn discover_documents_from_endpoint(
    pool: &SqlitePool,
    fetcher: &dyn Fetcher,
    crawl_cfg: &CrawlConfig,
    endpoint_id: i64,
) -> Result<DiscoveryReport> {
    discover_endpoint(pool, fetcher, crawl_cfg, endpoint_id, None).await
}

/// Delay between requests to a source's site.
fn source_delay_ms(source: &Source, crawl_cfg: &CrawlConfig) -> u64 {
    u64::try_from(source.rate_limit_ms).unwrap_or(crawl_cfg.default_rate_limit_ms)
}

/// Discovers one endpoint. `limiter` is the source's shared limiter when
/// called for a whole source; otherwise one is built from the source delay.
async fn discover_endpoint(
    pool: &SqlitePool,
    fetcher: &dyn Fetcher,
    crawl_cfg: &CrawlConfig,
    endpoint_id: i64,
    limiter: Option<&mut RateLimiter>,
) -> Result<DiscoveryReport> {
    let endpoint = get_endpoint(pool, endpoint_id)
        .await?
        .ok_or_else(|| not_found(format!("endpoint not found: {}", endpoint_id)))?;
    let source = get_source(pool, endpoint.source_id)
        .await?
        .ok_or_else(|| not_found(format!("source not found: {}", endpoint.source_id)))?;

    if !endpoint.enabled {
        return Err(invalid(format!("endpoint {} is disabled", endpoint_id)));
    }

    let hint = ParserHint::parse(endpoint.parser_hint.as_deref());
    let filter = PathFilter::new(&hint).map_err(|e| {
        invalid(format!("invalid parser hint on endpoint {}: {}", endpoint_id, e))
    })?;

    let mut own_limiter;
    let limiter = match limiter {
        Some(limiter) => limiter,
        None => {
            own_limiter = RateLimiter::new(source_delay_ms(&source, crawl_cfg));
            &mut own_limiter
        }
    };
    let limits = CrawlLimits::from_config(crawl_cfg);

    tracing::info!(
        endpoint_id,
        source = %source.name,
        url = %endpoint.endpoint_url,
        kind = %endpoint.endpoint_type,
        "discovering documents"
    );

    let outcome = collect_candidates(fetcher, &endpoint, &limits, limiter).await?;

    let mut report = DiscoveryReport {
        endpoint_id,
        discovered: outcome.urls.len(),
        sitemaps_fetched: outcome.sitemaps_fetched,
        errors: outcome
            .errors
            .iter()
            .map(|(url, reason)| format!("{}: {}", url, reason))
            .collect(),
        truncated: outcome.truncated,
        ..Default::default()
    };

    let now = now_ts();
    let mut tx = pool.begin().await?;
    for url in &outcome.urls {
        if !filter.passes(url) {
            report.filtered_out += 1;
            continue;
        }
        let result = sqlx::query(
            r#"
            INSERT INTO documents (source_id, source_endpoint_id, url, canonical_url, status, created_at, updated_at)
            VALUES (?, ?, ?, ?, 'discovered', ?, ?)
            ON CONFLICT(url) DO NOTHING
            "#,
        )
        .bind(source.id)
        .bind(endpoint.id)
        .bind(url)
        .bind(url)
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() > 0 {
            report.kept += 1;
        } else {
            report.skipped += 1;
        }
    }
    tx.commit().await?;

    mark_endpoint_crawled(pool, endpoint.id).await?;

    tracing::info!(
        endpoint_id,
        discovered = report.discovered,
        kept = report.kept,
        skipped = report.skipped,
        filtered_out = report.filtered_out,
        truncated = report.truncated,
        "discovery finished"
    );
    Ok(report)
}

async fn collect_candidates(
    fetcher: &dyn Fetcher,
    endpoint: &SourceEndpoint,
    limits: &CrawlLimits,
    limiter: &mut RateLimiter,
) -> Result<CrawlOutcome> {
    match endpoint.endpoint_type {
        EndpointType::Sitemap | EndpointType::Rss => {
            crawl(fetcher, &endpoint.endpoint_url, limits, limiter).await
        }
        EndpointType::HtmlList => {
            limiter.acquire().await;
            let page = fetcher
                .fetch(&endpoint.endpoint_url)
                .await
                .map_err(|e| upstream(e.to_string()))?;
            if !page.is_success() {
                return Err(upstream(format!(
                    "Failed to fetch endpoint {}: HTTP {}",
                    endpoint.endpoint_url, page.status
                )));
            }
            let mut urls = extract_anchor_links(&page.text(), &endpoint.endpoint_url);
            let truncated = urls.len() > limits.max_urls;
            urls.truncate(limits.max_urls);
            Ok(CrawlOutcome {
                urls,
                sitemaps_fetched: 1,
                errors: Vec::new(),
                truncated,
            })
        }
        EndpointType::ManualSeed => Ok(CrawlOutcome {
            urls: vec![normalize_url(&endpoint.endpoint_url)],
            ..Default::default()
        }),
        EndpointType::Api => Err(invalid(format!(
            "endpoint type 'api' is not supported for discovery (endpoint {})",
            endpoint.id
        ))),
    }
}

/// Runs every enabled endpoint of a source in priority order. A failing
/// endpoint is reported in its own entry and does not stop the others.
///
/// All endpoints share one rate limiter, so the source delay also holds
/// between the last request of one endpoint and the first of the next.
pub async fn discover_source(
    pool: &SqlitePool,
    fetcher: &dyn Fetcher,
    crawl_cfg: &CrawlConfig,
    source_id: i64,
) -> Result<Vec<DiscoveryReport>> {
    let source = get_source(pool, source_id)
        .await?
        .ok_or_else(|| not_found(format!("source not found: {}", source_id)))?;
    let mut limiter = RateLimiter::new(source_delay_ms(&source, crawl_cfg));

    let mut reports = Vec::new();
    for endpoint in list_endpoints(pool, source_id).await? {
        if !endpoint.enabled {
            continue;
        }
        match discover_endpoint(pool, fetcher, crawl_cfg, endpoint.id, Some(&mut limiter)).await {
            Ok(report) => reports.push(report),
            Err(e) => {
                tracing::warn!(endpoint_id = endpoint.id, error = %e, "endpoint discovery failed");
                reports.push(DiscoveryReport {
                    endpoint_id: endpoint.id,
                    errors: vec![format!("{:#}", e)],
                    ..Default::default()
                });
            }
        }
    }
    Ok(reports)
}

fn print_report(report: &DiscoveryReport) {
    println!("discover endpoint {}", report.endpoint_id);
    println!("  discovered: {}", report.discovered);
    println!("  kept: {}", report.kept);
    println!("  skipped (already known): {}", report.skipped);
    println!("  filtered out: {}", report.filtered_out);
    println!("  sitemaps fetched: {}", report.sitemaps_fetched);
    if report.truncated {
        println!("  truncated: yes");
    }
    for err in &report.errors {
        println!("  error: {}", err);
    }
}

/// `sdg discover endpoint <id>`.
pub async fn run_discover_endpoint(config: &Config, endpoint_id: i64) -> Result<()> {
    let pool = db::connect(config).await?;
    let fetcher = HttpFetcher::new(&config.crawl)?;
    let report =
        discover_documents_from_endpoint(&pool, &fetcher, &config.crawl, endpoint_id).await?;
    print_report(&report);
    println!("ok");
    pool.close().await;
    Ok(())
}

/// `sdg discover source <id>`.
pub async fn run_discover_source(config: &Config, source_id: i64) -> Result<()> {
    let pool = db::connect(config).await?;
    let fetcher = HttpFetcher::new(&config.crawl)?;
    let reports = discover_source(&pool, &fetcher, &config.crawl, source_id).await?;
    if reports.is_empty() {
        println!("source {} has no enabled endpoints", source_id);
    }
    for report in &reports {
        print_report(report);
    }
    println!("ok");
    pool.close().await;
    Ok(())
}
