//! Crawlable organizations and their discovery endpoints.
//!
//! Sources are keyed by `base_url` and endpoints by `endpoint_url`, so both
//! the seed file and the API can upsert repeatedly without duplicates.
//!
//! # Seed file
//!
//! ```json
//! [
//!   {
//!     "name": "UNDP",
//!     "orgType": "un",
//!     "baseUrl": "https://www.undp.org",
//!     "crawlEnabled": true,
//!     "endpoints": [
//!       { "endpointUrl": "https://www.undp.org/sitemap.xml", "endpointType": "sitemap",
//!         "parserHint": "{\"includePathPrefixes\":[\"/publications/\"]}" }
//!     ]
//!   }
//! ]
//! ```

use anyhow::{Context, Result};
use serde::Deserialize;
use sqlx::SqlitePool;
use std::path::Path;

use crate::config::Config;
use crate::db::{self, now_ts};
use crate::error::{invalid, not_found};
use crate::filter::{ParserHint, PathFilter};
use crate::models::{EndpointType, OrgType, Source, SourceEndpoint, TrustLevel};

const DEFAULT_RATE_LIMIT_MS: i64 = 1500;
const DEFAULT_PRIORITY: i64 = 100;

/// Source fields accepted by [`upsert_source`].
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceInput {
    pub name: String,
    pub org_type: OrgType,
    #[serde(default)]
    pub trust_level: Option<TrustLevel>,
    pub base_url: String,
    #[serde(default)]
    pub region_focus: Option<Vec<String>>,
    #[serde(default)]
    pub tags: Option<Vec<String>>,
    #[serde(default)]
    pub crawl_enabled: Option<bool>,
    #[serde(default)]
    pub rate_limit_ms: Option<i64>,
    #[serde(default)]
    pub notes: Option<String>,
}

impl SourceInput {
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(invalid("invalid source: name must not be empty"));
        }
        validate_http_url("baseUrl", &self.base_url)?;
        if let Some(ms) = self.rate_limit_ms {
            if !(0..=60_000).contains(&ms) {
                return Err(invalid(
                    "invalid source: rateLimitMs must be between 0 and 60000",
                ));
            }
        }
        Ok(())
    }
}

/// Endpoint fields accepted by [`upsert_endpoint`].
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointInput {
    pub source_id: i64,
    pub endpoint_url: String,
    pub endpoint_type: EndpointType,
    #[serde(default)]
    pub parser_hint: Option<String>,
    #[serde(default)]
    pub enabled: Option<bool>,
    #[serde(default)]
    pub priority: Option<i64>,
}

impl EndpointInput {
    pub fn validate(&self) -> Result<()> {
        validate_http_url("endpointUrl", &self.endpoint_url)?;
        if let Some(p) = self.priority {
            if !(0..=10_000).contains(&p) {
                return Err(invalid(
                    "invalid endpoint: priority must be between 0 and 10000",
                ));
            }
        }
        let hint = ParserHint::parse(self.parser_hint.as_deref());
        PathFilter::new(&hint)
            .map_err(|e| invalid(format!("invalid endpoint: parserHint: {}", e)))?;
        Ok(())
    }
}

fn validate_http_url(field: &str, value: &str) -> Result<()> {
    match url::Url::parse(value) {
        Ok(u) if matches!(u.scheme(), "http" | "https") => Ok(()),
        _ => Err(invalid(format!(
            "invalid {}: '{}' is not an http(s) URL",
            field, value
        ))),
    }
}

pub async fn list_sources(pool: &SqlitePool) -> Result<Vec<Source>> {
    let rows = sqlx::query("SELECT * FROM sources ORDER BY name ASC, id ASC")
        .fetch_all(pool)
        .await?;
    rows.iter().map(Source::from_row).collect()
}

pub async fn get_source(pool: &SqlitePool, id: i64) -> Result<Option<Source>> {
    let row = sqlx::query("SELECT * FROM sources WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?;
    row.as_ref().map(Source::from_row).transpose()
}

/// Inserts or updates a source by `base_url`, returning its id.
pub async fn upsert_source(pool: &SqlitePool, input: &SourceInput) -> Result<i64> {
    input.validate()?;
    let now = now_ts();
    let region_focus = input
        .region_focus
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?;
    let tags = input.tags.as_ref().map(serde_json::to_string).transpose()?;

    sqlx::query(
        r#"
        INSERT INTO sources (name, org_type, trust_level, base_url, region_focus, tags, crawl_enabled, rate_limit_ms, notes, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(base_url) DO UPDATE SET
            name = excluded.name,
            org_type = excluded.org_type,
            trust_level = excluded.trust_level,
            region_focus = excluded.region_focus,
            tags = excluded.tags,
            crawl_enabled = excluded.crawl_enabled,
            rate_limit_ms = excluded.rate_limit_ms,
            notes = excluded.notes,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(&input.name)
    .bind(input.org_type.as_str())
    .bind(input.trust_level.unwrap_or(TrustLevel::Medium).as_str())
    .bind(&input.base_url)
    .bind(region_focus)
    .bind(tags)
    .bind(input.crawl_enabled.unwrap_or(false))
    .bind(input.rate_limit_ms.unwrap_or(DEFAULT_RATE_LIMIT_MS))
    .bind(&input.notes)
    .bind(now)
    .bind(now)
    .execute(pool)
    .await?;

    let id: i64 = sqlx::query_scalar("SELECT id FROM sources WHERE base_url = ?")
        .bind(&input.base_url)
        .fetch_one(pool)
        .await?;
    Ok(id)
}

/// Endpoints of a source, highest priority (lowest number) first.
pub async fn list_endpoints(pool: &SqlitePool, source_id: i64) -> Result<Vec<SourceEndpoint>> {
    let rows = sqlx::query(
        "SELECT * FROM source_endpoints WHERE source_id = ? ORDER BY priority ASC, id ASC",
    )
    .bind(source_id)
    .fetch_all(pool)
    .await?;
    rows.iter().map(SourceEndpoint::from_row).collect()
}

pub async fn get_endpoint(pool: &SqlitePool, id: i64) -> Result<Option<SourceEndpoint>> {
    let row = sqlx::query("SELECT * FROM source_endpoints WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?;
    row.as_ref().map(SourceEndpoint::from_row).transpose()
}

/// Inserts or updates an endpoint by `endpoint_url`, returning its id.
pub async fn upsert_endpoint(pool: &SqlitePool, input: &EndpointInput) -> Result<i64> {
    input.validate()?;
    if get_source(pool, input.source_id).await?.is_none() {
        return Err(not_found(format!("source not found: {}", input.source_id)));
    }
    let now = now_ts();

    sqlx::query(
        r#"
        INSERT INTO source_endpoints (source_id, endpoint_url, endpoint_type, parser_hint, priority, enabled, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(endpoint_url) DO UPDATE SET
            source_id = excluded.source_id,
            endpoint_type = excluded.endpoint_type,
            parser_hint = excluded.parser_hint,
            priority = excluded.priority,
            enabled = excluded.enabled,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(input.source_id)
    .bind(&input.endpoint_url)
    .bind(input.endpoint_type.as_str())
    .bind(&input.parser_hint)
    .bind(input.priority.unwrap_or(DEFAULT_PRIORITY))
    .bind(input.enabled.unwrap_or(true))
    .bind(now)
    .bind(now)
    .execute(pool)
    .await?;

    let id: i64 = sqlx::query_scalar("SELECT id FROM source_endpoints WHERE endpoint_url = ?")
        .bind(&input.endpoint_url)
        .fetch_one(pool)
        .await?;
    Ok(id)
}

pub async fn mark_endpoint_crawled(pool: &SqlitePool, endpoint_id: i64) -> Result<()> {
    let now = now_ts();
    sqlx::query("UPDATE source_endpoints SET last_crawled_at = ?, updated_at = ? WHERE id = ?")
        .bind(now)
        .bind(now)
        .bind(endpoint_id)
        .execute(pool)
        .await?;
    Ok(())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SeedSource {
    #[serde(flatten)]
    source: SourceInput,
    #[serde(default)]
    endpoints: Vec<SeedEndpoint>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SeedEndpoint {
    endpoint_url: String,
    endpoint_type: EndpointType,
    #[serde(default)]
    priority: Option<i64>,
    #[serde(default)]
    parser_hint: Option<String>,
}

/// Counts reported by [`sync_seed`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SeedReport {
    pub sources: usize,
    pub endpoints: usize,
}

/// Upserts every source and endpoint from a seed JSON file.
pub async fn sync_seed(pool: &SqlitePool, path: &Path) -> Result<SeedReport> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read source seed: {}", path.display()))?;
    let seed: Vec<SeedSource> = serde_json::from_str(&raw)
        .with_context(|| format!("Failed to parse source seed: {}", path.display()))?;

    let mut report = SeedReport::default();
    for entry in &seed {
        let source_id = upsert_source(pool, &entry.source)
            .await
            .with_context(|| format!("seed source '{}'", entry.source.name))?;
        report.sources += 1;

        for ep in &entry.endpoints {
            upsert_endpoint(
                pool,
                &EndpointInput {
                    source_id,
                    endpoint_url: ep.endpoint_url.clone(),
                    endpoint_type: ep.endpoint_type,
                    parser_hint: ep.parser_hint.clone(),
                    enabled: Some(true),
                    priority: ep.priority,
                },
            )
            .await
            .with_context(|| format!("seed endpoint '{}'", ep.endpoint_url))?;
            report.endpoints += 1;
        }
    }

    tracing::info!(
        sources = report.sources,
        endpoints = report.endpoints,
        path = %path.display(),
        "synced source seed"
    );
    Ok(report)
}

/// `sdg sources list`.
pub async fn run_list_sources(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    let sources = list_sources(&pool).await?;

    if sources.is_empty() {
        println!("No sources. Run `sdg seed` or add one via the API.");
    } else {
        println!(
            "{:<5} {:<32} {:<11} {:<7} {:<6} BASE URL",
            "ID", "NAME", "TYPE", "TRUST", "CRAWL"
        );
        for s in &sources {
            println!(
                "{:<5} {:<32} {:<11} {:<7} {:<6} {}",
                s.id,
                truncate(&s.name, 32),
                s.org_type,
                s.trust_level,
                s.crawl_enabled,
                s.base_url
            );
        }
    }

    pool.close().await;
    Ok(())
}

/// `sdg sources endpoints <id>`.
pub async fn run_list_endpoints(config: &Config, source_id: i64) -> Result<()> {
    let pool = db::connect(config).await?;
    let endpoints = list_endpoints(&pool, source_id).await?;

    if endpoints.is_empty() {
        println!("No endpoints for source {}.", source_id);
    } else {
        println!("{:<5} {:<12} {:<8} {:<8} URL", "ID", "TYPE", "PRIO", "ENABLED");
        for e in &endpoints {
            println!(
                "{:<5} {:<12} {:<8} {:<8} {}",
                e.id, e.endpoint_type, e.priority, e.enabled, e.endpoint_url
            );
        }
    }

    pool.close().await;
    Ok(())
}

/// `sdg seed`: the source seed file plus the prompt registry.
pub async fn run_seed(config: &Config) -> Result<()> {
    let registry = crate::prompts::PromptRegistry::load(&config.prompts.registry)?;
    let pool = db::connect(config).await?;
    crate::migrate::apply_schema(&pool).await?;

    let report = sync_seed(&pool, &config.seeds.sources).await?;
    let prompts = crate::prompts::sync_to_db(&pool, &registry).await?;

    println!("sources upserted: {}", report.sources);
    println!("endpoints upserted: {}", report.endpoints);
    println!("prompts synced: {}", prompts);
    println!("ok");

    pool.close().await;
    Ok(())
}

/// `sdg sources add-endpoint`.
pub async fn run_add_endpoint(config: &Config, input: EndpointInput) -> Result<()> {
    let pool = db::connect(config).await?;
    let id = upsert_endpoint(&pool, &input).await?;
    println!("endpoint {} saved ({})", id, input.endpoint_url);
    pool.close().await;
    Ok(())
}

pub(crate) fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max.saturating_sub(1)).collect();
        format!("{}…", cut)
    }
}
