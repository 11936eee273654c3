//! Document listing and bounded text access.

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;
use crate::error::invalid;
use crate::models::{Document, DocumentStatus};
use crate::sources::truncate;

pub const DEFAULT_LIST_LIMIT: i64 = 200;
pub const DEFAULT_TEXT_CHARS: usize = 50_000;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DocumentFilter {
    pub source_id: Option<i64>,
    pub status: Option<DocumentStatus>,
    pub limit: Option<i64>,
}

pub async fn list_documents(pool: &SqlitePool, filter: &DocumentFilter) -> Result<Vec<Document>> {
    let limit = filter.limit.unwrap_or(DEFAULT_LIST_LIMIT);
    if !(1..=1000).contains(&limit) {
        return Err(invalid("limit must be between 1 and 1000"));
    }

    let rows = sqlx::query(
        r#"
        SELECT * FROM documents
        WHERE (? IS NULL OR source_id = ?)
          AND (? IS NULL OR status = ?)
        ORDER BY id DESC
        LIMIT ?
        "#,
    )
    .bind(filter.source_id)
    .bind(filter.source_id)
    .bind(filter.status.map(|s| s.as_str()))
    .bind(filter.status.map(|s| s.as_str()))
    .bind(limit)
    .fetch_all(pool)
    .await?;

    rows.iter().map(Document::from_row).collect()
}

pub async fn get_document(pool: &SqlitePool, id: i64) -> Result<Option<Document>> {
    let row = sqlx::query("SELECT * FROM documents WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?;
    row.as_ref().map(Document::from_row).transpose()
}

#[derive(Debug, Clone, Serialize)]
pub struct DocumentText {
    pub id: i64,
    /// Length of the full stored text in characters.
    pub chars: usize,
    pub text: String,
    pub truncated: bool,
}

/// Returns at most `max_chars` characters of a document's extracted text.
/// `None` when the document does not exist.
pub async fn get_extracted_text(
    pool: &SqlitePool,
    id: i64,
    max_chars: Option<usize>,
) -> Result<Option<DocumentText>> {
    let max_chars = max_chars.unwrap_or(DEFAULT_TEXT_CHARS);
    if !(1000..=200_000).contains(&max_chars) {
        return Err(invalid("max_chars must be between 1000 and 200000"));
    }

    let Some(doc) = get_document(pool, id).await? else {
        return Ok(None);
    };
    let full = doc.extracted_text.unwrap_or_default();
    let chars = full.chars().count();
    let text: String = full.chars().take(max_chars).collect();

    Ok(Some(DocumentText {
        id,
        chars,
        truncated: chars > max_chars,
        text,
    }))
}

/// `sdg documents list`.
pub async fn run_list(config: &Config, filter: DocumentFilter) -> Result<()> {
    let pool = db::connect(config).await?;
    let docs = list_documents(&pool, &filter).await?;

    if docs.is_empty() {
        println!("No documents.");
    } else {
        println!("{:<6} {:<11} {:>9} {:>9} URL", "ID", "STATUS", "BYTES", "CHARS");
        for d in &docs {
            println!(
                "{:<6} {:<11} {:>9} {:>9} {}",
                d.id,
                d.status,
                d.byte_size.map(|b| b.to_string()).unwrap_or_else(|| "-".into()),
                d.extracted_chars,
                truncate(&d.url, 100)
            );
        }
    }

    pool.close().await;
    Ok(())
}

/// `sdg documents text <id>`.
pub async fn run_text(config: &Config, id: i64, max_chars: Option<usize>) -> Result<()> {
    let pool = db::connect(config).await?;
    let Some(text) = get_extracted_text(&pool, id, max_chars).await? else {
        bail!("document not found: {}", id);
    };
    println!("{}", text.text);
    if text.truncated {
        eprintln!("(truncated: {} of {} chars shown)", text.text.chars().count(), text.chars);
    }
    pool.close().await;
    Ok(())
}
