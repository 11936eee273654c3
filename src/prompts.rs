//! Versioned prompt registry.
//!
//! Prompts live in a JSON file checked into the repository
//! (`prompts/registry.json`) and are mirrored into the `prompt_templates`
//! table so every agent run can be traced back to the exact template text by
//! `(key, version, sha256)`.
//!
//! # Registry format
//!
//! ```json
//! [
//!   {
//!     "key": "challenge_extractor.extract_challenges",
//!     "version": 1,
//!     "agent": "challenge_extractor",
//!     "operation": "extract_challenges",
//!     "publicTitle": "Challenge extraction",
//!     "publicDescription": "Turns document text into solution-free challenges.",
//!     "systemPrompt": "You are ...",
//!     "userTemplate": "Document Text:\n{{text}}"
//!   }
//! ]
//! ```
//!
//! Templates use `{{name}}` placeholders, filled by [`render`].

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use sqlx::SqlitePool;
use std::path::Path;

use crate::config::Config;
use crate::db::{self, now_ts};
use crate::error::invalid;
use crate::models::PromptTemplate;

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PromptEntry {
    pub key: String,
    pub version: i64,
    pub agent: String,
    pub operation: String,
    pub public_title: String,
    pub public_description: String,
    pub system_prompt: String,
    #[serde(default)]
    pub user_template: Option<String>,
}

impl PromptEntry {
    /// Canonical text that is hashed and stored.
    pub fn content(&self) -> String {
        format!(
            "KEY:{}\nVERSION:{}\n\nSYSTEM:\n{}\n\nUSER_TEMPLATE:\n{}",
            self.key,
            self.version,
            self.system_prompt,
            self.user_template.as_deref().unwrap_or("")
        )
    }

    pub fn sha256(&self) -> String {
        hex::encode(Sha256::digest(self.content().as_bytes()))
    }

    pub fn prompt_ref(&self) -> PromptRef {
        PromptRef {
            key: self.key.clone(),
            version: self.version,
            sha256: self.sha256(),
        }
    }
}

/// Identifies the template a run used.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct PromptRef {
    pub key: String,
    pub version: i64,
    pub sha256: String,
}

#[derive(Debug, Clone, Default)]
pub struct PromptRegistry {
    entries: Vec<PromptEntry>,
}

impl PromptRegistry {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read prompt registry: {}", path.display()))?;
        Self::parse(&raw)
            .with_context(|| format!("Failed to parse prompt registry: {}", path.display()))
    }

    pub fn parse(raw: &str) -> Result<Self> {
        let entries: Vec<PromptEntry> = serde_json::from_str(raw)?;
        Ok(Self { entries })
    }

    pub fn entries(&self) -> &[PromptEntry] {
        &self.entries
    }

    /// Highest version registered under `key`.
    pub fn latest(&self, key: &str) -> Result<&PromptEntry> {
        self.entries
            .iter()
            .filter(|e| e.key == key)
            .max_by_key(|e| e.version)
            .ok_or_else(|| anyhow!("missing registry entry for key: {}", key))
    }
}

/// Replaces every `{{name}}` with its value. Unknown placeholders are left
/// as they are.
pub fn render(template: &str, vars: &[(&str, &str)]) -> String {
    let mut out = template.to_string();
    for (name, value) in vars {
        out = out.replace(&format!("{{{{{}}}}}", name), value);
    }
    out
}

/// Upserts every registry entry on `(key, version)`. Returns the number of
/// entries written.
pub async fn sync_to_db(pool: &SqlitePool, registry: &PromptRegistry) -> Result<usize> {
    let now = now_ts();
    for entry in registry.entries() {
        sqlx::query(
            r#"
            INSERT INTO prompt_templates (key, version, agent, operation, public_title, public_description, content, sha256, source, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, 'git', ?)
            ON CONFLICT(key, version) DO UPDATE SET
                agent = excluded.agent,
                operation = excluded.operation,
                public_title = excluded.public_title,
                public_description = excluded.public_description,
                content = excluded.content,
                sha256 = excluded.sha256,
                source = 'git'
            "#,
        )
        .bind(&entry.key)
        .bind(entry.version)
        .bind(&entry.agent)
        .bind(&entry.operation)
        .bind(&entry.public_title)
        .bind(&entry.public_description)
        .bind(entry.content())
        .bind(entry.sha256())
        .bind(now)
        .execute(pool)
        .await?;
    }
    Ok(registry.entries().len())
}

pub async fn list_templates(pool: &SqlitePool) -> Result<Vec<PromptTemplate>> {
    let rows = sqlx::query("SELECT * FROM prompt_templates ORDER BY key ASC, version DESC")
        .fetch_all(pool)
        .await?;
    rows.iter().map(PromptTemplate::from_row).collect()
}

pub async fn get_template(
    pool: &SqlitePool,
    key: &str,
    version: i64,
) -> Result<Option<PromptTemplate>> {
    let row = sqlx::query("SELECT * FROM prompt_templates WHERE key = ? AND version = ?")
        .bind(key)
        .bind(version)
        .fetch_optional(pool)
        .await?;
    row.as_ref().map(PromptTemplate::from_row).transpose()
}

/// One agent run that referenced a prompt template.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct PromptUsage {
    pub kind: String,
    pub run_id: i64,
    pub prompt_key: String,
    pub prompt_version: Option<i64>,
    pub prompt_sha256: Option<String>,
    pub model_used: String,
    pub status: String,
    pub created_at: i64,
}

/// Prompt usage across extraction and discovery runs, newest first.
pub async fn list_usage(pool: &SqlitePool, limit: i64) -> Result<Vec<PromptUsage>> {
    if !(1..=500).contains(&limit) {
        return Err(invalid("limit must be between 1 and 500"));
    }
    let rows = sqlx::query_as::<_, PromptUsage>(
        r#"
        SELECT * FROM (
            SELECT 'challenge_extraction' AS kind, id AS run_id, prompt_key, prompt_version,
                   prompt_sha256, model_used, status, created_at
            FROM challenge_extraction_runs WHERE prompt_key IS NOT NULL
            UNION ALL
            SELECT 'tech_discovery' AS kind, id AS run_id, prompt_key, prompt_version,
                   prompt_sha256, model_used, status, created_at
            FROM tech_discovery_runs WHERE prompt_key IS NOT NULL
        )
        ORDER BY created_at DESC, run_id DESC
        LIMIT ?
        "#,
    )
    .bind(limit)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// `sdg prompts sync`.
pub async fn run_sync(config: &Config) -> Result<()> {
    let registry = PromptRegistry::load(&config.prompts.registry)?;
    let pool = db::connect(config).await?;
    let count = sync_to_db(&pool, &registry).await?;
    println!("prompts synced: {}", count);
    println!("ok");
    pool.close().await;
    Ok(())
}

/// `sdg prompts list`.
pub async fn run_list(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    let templates = list_templates(&pool).await?;
    if templates.is_empty() {
        println!("No prompt templates. Run `sdg prompts sync`.");
    } else {
        println!("{:<44} {:>3}  SHA256", "KEY", "VER");
        for t in &templates {
            println!("{:<44} {:>3}  {}", t.key, t.version, &t.sha256[..12.min(t.sha256.len())]);
        }
    }
    pool.close().await;
    Ok(())
}

/// `sdg prompts usage`.
pub async fn run_usage(config: &Config, limit: i64) -> Result<()> {
    let pool = db::connect(config).await?;
    let usage = list_usage(&pool, limit).await?;
    if usage.is_empty() {
        println!("No prompt usage recorded.");
    }
    for u in &usage {
        println!(
            "{:<20} run {:<5} {} v{} [{}] {}",
            u.kind,
            u.run_id,
            u.prompt_key,
            u.prompt_version.unwrap_or(0),
            u.status,
            u.model_used
        );
    }
    pool.close().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::memory_pool;

    const REGISTRY: &str = r#"[
        {"key":"a.op","version":1,"agent":"a","operation":"op","publicTitle":"A",
         "publicDescription":"first","systemPrompt":"sys v1","userTemplate":"Hello {{name}}"},
        {"key":"a.op","version":2,"agent":"a","operation":"op","publicTitle":"A",
         "publicDescription":"second","systemPrompt":"sys v2"}
    ]"#;

    #[test]
    fn latest_picks_highest_version() {
        let reg = PromptRegistry::parse(REGISTRY).unwrap();
        assert_eq!(reg.latest("a.op").unwrap().version, 2);
        let err = reg.latest("b.op").unwrap_err();
        assert!(err.to_string().contains("missing registry entry for key: b.op"));
    }

    #[test]
    fn content_layout_and_hash() {
        let reg = PromptRegistry::parse(REGISTRY).unwrap();
        let v2 = reg.latest("a.op").unwrap();
        assert_eq!(v2.content(), "KEY:a.op\nVERSION:2\n\nSYSTEM:\nsys v2\n\nUSER_TEMPLATE:\n");
        assert_eq!(
            v2.sha256(),
            hex::encode(Sha256::digest(v2.content().as_bytes()))
        );
        assert_ne!(v2.sha256(), reg.entries()[0].sha256());
    }

    #[test]
    fn render_fills_known_placeholders() {
        assert_eq!(
            render("{{a}} and {{b}} but not {{c}}", &[("a", "1"), ("b", "2")]),
            "1 and 2 but not {{c}}"
        );
    }

    #[tokio::test]
    async fn sync_is_an_upsert() {
        let pool = memory_pool().await;
        let reg = PromptRegistry::parse(REGISTRY).unwrap();
        assert_eq!(sync_to_db(&pool, &reg).await.unwrap(), 2);
        assert_eq!(sync_to_db(&pool, &reg).await.unwrap(), 2);

        let all = list_templates(&pool).await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].version, 2);
        assert_eq!(all[0].source, "git");

        let t = get_template(&pool, "a.op", 1).await.unwrap().unwrap();
        assert!(t.content.contains("Hello {{name}}"));
        assert!(get_template(&pool, "a.op", 3).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn usage_merges_both_run_tables() {
        let pool = memory_pool().await;
        sqlx::query(
            "INSERT INTO challenge_extraction_runs (model_used, prompt_key, prompt_version, status, created_at) VALUES ('m', 'x', 1, 'completed', 10)",
        )
        .execute(&pool)
        .await
        .unwrap();
        let challenge_id = sqlx::query(
            "INSERT INTO challenges (title, statement, extracted_at, created_at) VALUES ('t', 's', 1, 1)",
        )
        .execute(&pool)
        .await
        .unwrap()
        .last_insert_rowid();
        sqlx::query(
            "INSERT INTO tech_discovery_runs (challenge_id, model_used, prompt_key, prompt_version, status, created_at) VALUES (?, 'm', 'y', 1, 'failed', 20)",
        )
        .bind(challenge_id)
        .execute(&pool)
        .await
        .unwrap();

        let usage = list_usage(&pool, 100).await.unwrap();
        assert_eq!(usage.len(), 2);
        assert_eq!(usage[0].kind, "tech_discovery");
        assert_eq!(usage[1].prompt_key, "x");
        assert!(list_usage(&pool, 0).await.is_err());
    }
}
