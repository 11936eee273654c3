//! Document download and text extraction.
//!
//! Fetches one discovered URL, hashes the bytes, classifies the content and
//! stores the extracted text. Downloads are content-addressed: when another
//! document with the same SHA-256 has already been extracted, its text is
//! copied instead of extracting again.

use anyhow::Result;
use serde::Serialize;
use sha2::{Digest, Sha256};
use sqlx::SqlitePool;
use std::collections::HashMap;

use crate::config::{Config, CrawlConfig};
use crate::crawler::{Fetcher, HttpFetcher, RateLimiter};
use crate::db::{self, now_ts};
use crate::error::{not_found, upstream};
use crate::extract::{classify_content, extract_text, ContentKind, ExtractError};
use crate::models::DocumentStatus;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestReport {
    pub document_id: i64,
    pub content_type: Option<String>,
    pub byte_size: i64,
    pub sha256_bytes: String,
    pub extracted_chars: usize,
    pub status: DocumentStatus,
    /// Id of the document whose text was reused, if any.
    pub reused_from: Option<i64>,
}

pub async fn download_and_extract(
    pool: &SqlitePool,
    fetcher: &dyn Fetcher,
    document_id: i64,
) -> Result<IngestReport> {
    let url: String = sqlx::query_scalar("SELECT url FROM documents WHERE id = ?")
        .bind(document_id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| not_found(format!("document not found: {}", document_id)))?;

    tracing::debug!(document_id, %url, "downloading document");

    let page = match fetcher.fetch(&url).await {
        Ok(page) => page,
        Err(e) => {
            let message = format!("Download failed: {}", e);
            mark_failed(pool, document_id, &message).await?;
            return Err(upstream(message));
        }
    };
    if !page.is_success() {
        let message = format!("Download failed: {}", page.status);
        mark_failed(pool, document_id, &message).await?;
        return Err(upstream(format!("{} ({})", message, url)));
    }

    let sha256_bytes = hex::encode(Sha256::digest(&page.bytes));
    let byte_size = page.bytes.len() as i64;
    let content_type = page.content_type.clone();
    let ct = content_type.as_deref().unwrap_or("");

    let reused: Option<(i64, String)> = sqlx::query_as(
        r#"
        SELECT id, extracted_text FROM documents
        WHERE sha256_bytes = ? AND id != ? AND status = 'extracted' AND extracted_text IS NOT NULL
        ORDER BY id ASC
        LIMIT 1
        "#,
    )
    .bind(&sha256_bytes)
    .bind(document_id)
    .fetch_optional(pool)
    .await?;

    let (text, note, reused_from) = match reused {
        Some((other_id, text)) => {
            tracing::debug!(document_id, reused_from = other_id, "reusing extracted text");
            (text, None, Some(other_id))
        }
        None => {
            let kind = classify_content(content_type.as_deref(), &url);
            let bytes = page.bytes;
            let ct_owned = ct.to_string();
            let extracted = tokio::task::spawn_blocking(move || extract_text(&bytes, kind, &ct_owned))
                .await
                .map_err(|e| ExtractError::Pdf(format!("extraction task panicked: {}", e)))
                .and_then(|r| r);
            match extracted {
                Ok(text) => (text, None, None),
                Err(ExtractError::UnsupportedContentType(ct)) if kind == ContentKind::Unsupported => {
                    tracing::debug!(document_id, content_type = %ct, "no extractor for content type");
                    (String::new(), None, None)
                }
                Err(e) => {
                    tracing::warn!(document_id, %url, error = %e, "text extraction failed");
                    (String::new(), Some(e.to_string()), None)
                }
            }
        }
    };

    let now = now_ts();
    let status = if text.is_empty() {
        DocumentStatus::Downloaded
    } else {
        DocumentStatus::Extracted
    };

    if status == DocumentStatus::Extracted {
        sqlx::query(
            r#"
            UPDATE documents SET
                status = ?, content_type = ?, byte_size = ?, sha256_bytes = ?, fetched_at = ?,
                extracted_text = ?, extracted_at = ?, error_message = NULL, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(status.as_str())
        .bind(&content_type)
        .bind(byte_size)
        .bind(&sha256_bytes)
        .bind(now)
        .bind(&text)
        .bind(now)
        .bind(now)
        .bind(document_id)
        .execute(pool)
        .await?;
    } else {
        sqlx::query(
            r#"
            UPDATE documents SET
                status = ?, content_type = ?, byte_size = ?, sha256_bytes = ?, fetched_at = ?,
                error_message = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(status.as_str())
        .bind(&content_type)
        .bind(byte_size)
        .bind(&sha256_bytes)
        .bind(now)
        .bind(&note)
        .bind(now)
        .bind(document_id)
        .execute(pool)
        .await?;
    }

    Ok(IngestReport {
        document_id,
        content_type,
        byte_size,
        sha256_bytes,
        extracted_chars: text.chars().count(),
        status,
        reused_from,
    })
}

async fn mark_failed(pool: &SqlitePool, document_id: i64, message: &str) -> Result<()> {
    let now = now_ts();
    sqlx::query(
        "UPDATE documents SET status = 'failed', error_message = ?, fetched_at = ?, updated_at = ? WHERE id = ?",
    )
    .bind(message)
    .bind(now)
    .bind(now)
    .bind(document_id)
    .execute(pool)
    .await?;
    Ok(())
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PendingSummary {
    pub attempted: usize,
    pub extracted: usize,
    pub downloaded: usize,
    pub failed: usize,
}

/// Processes up to `limit` documents still in `discovered`, lowest id first.
/// Individual failures are counted and logged, never propagated.
///
/// Downloads from the same source are spaced by that source's
/// `rate_limit_ms`; documents without a source use the configured default.
pub async fn ingest_pending(
    pool: &SqlitePool,
    fetcher: &dyn Fetcher,
    crawl_cfg: &CrawlConfig,
    limit: usize,
) -> Result<PendingSummary> {
    let pending: Vec<(i64, Option<i64>, Option<i64>)> = sqlx::query_as(
        r#"
        SELECT d.id, d.source_id, s.rate_limit_ms
        FROM documents d
        LEFT JOIN sources s ON s.id = d.source_id
        WHERE d.status = 'discovered'
        ORDER BY d.id ASC
        LIMIT ?
        "#,
    )
    .bind(limit as i64)
    .fetch_all(pool)
    .await?;

    let mut limiters: HashMap<Option<i64>, RateLimiter> = HashMap::new();
    let mut summary = PendingSummary::default();

    for (id, source_id, rate_limit_ms) in pending {
        let delay_ms = rate_limit_ms
            .and_then(|ms| u64::try_from(ms).ok())
            .unwrap_or(crawl_cfg.default_rate_limit_ms);
        limiters
            .entry(source_id)
            .or_insert_with(|| RateLimiter::new(delay_ms))
            .acquire()
            .await;
        summary.attempted += 1;
        match download_and_extract(pool, fetcher, id).await {
            Ok(report) if report.status == DocumentStatus::Extracted => summary.extracted += 1,
            Ok(_) => summary.downloaded += 1,
            Err(e) => {
                tracing::warn!(document_id = id, error = %e, "document ingest failed");
                summary.failed += 1;
            }
        }
    }

    Ok(summary)
}

/// `sdg documents fetch <id>`.
pub async fn run_fetch(config: &Config, document_id: i64) -> Result<()> {
    let pool = db::connect(config).await?;
    let fetcher = HttpFetcher::new(&config.crawl)?;
    let report = download_and_extract(&pool, &fetcher, document_id).await?;

    println!("fetch document {}", document_id);
    println!(
        "  content type: {}",
        report.content_type.as_deref().unwrap_or("(none)")
    );
    println!("  bytes: {}", report.byte_size);
    println!("  sha256: {}", report.sha256_bytes);
    println!("  extracted chars: {}", report.extracted_chars);
    println!("  status: {}", report.status);
    if let Some(other) = report.reused_from {
        println!("  reused text from document {}", other);
    }
    println!("ok");

    pool.close().await;
    Ok(())
}

/// `sdg documents fetch-pending`.
pub async fn run_fetch_pending(config: &Config, limit: usize) -> Result<()> {
    let pool = db::connect(config).await?;
    let fetcher = HttpFetcher::new(&config.crawl)?;
    let summary = ingest_pending(&pool, &fetcher, &config.crawl, limit).await?;

    println!("fetch pending");
    println!("  attempted: {}", summary.attempted);
    println!("  extracted: {}", summary.extracted);
    println!("  downloaded (no text): {}", summary.downloaded);
    println!("  failed: {}", summary.failed);
    println!("ok");

    pool.close().await;
    Ok(())
}
