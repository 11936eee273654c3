//! Challenge extraction runs and stored challenges.

use anyhow::{Context, Result};
use serde::Serialize;
use sqlx::SqlitePool;
use std::path::Path;

use crate::agents::audit::{log_agent_interaction, AgentName, AuditEntry};
use crate::agents::challenge_extractor::{extract_challenges, PROMPT_KEY};
use crate::config::Config;
use crate::db::{self, now_ts};
use crate::documents::get_document;
use crate::error::{invalid, not_found};
use crate::llm::{create_model, ChatModel};
use crate::models::{Challenge, RunStatus};
use crate::prompts::PromptRegistry;
use crate::sources::{get_source, truncate};

/// Where the text to extract from comes from.
#[derive(Debug, Clone)]
pub enum ExtractInput {
    Text {
        text: String,
        source_org: Option<String>,
        source_url: Option<String>,
    },
    /// A stored document's extracted text; its URL and source name are used
    /// as provenance.
    Document(i64),
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractionOutcome {
    pub run_id: i64,
    pub challenges: Vec<Challenge>,
    pub inserted_ids: Vec<i64>,
}

pub async fn list_challenges(pool: &SqlitePool, user_id: Option<i64>) -> Result<Vec<Challenge>> {
    let rows = match user_id {
        Some(uid) => {
            sqlx::query("SELECT * FROM challenges WHERE user_id = ? ORDER BY created_at DESC, id DESC")
                .bind(uid)
                .fetch_all(pool)
                .await?
        }
        None => {
            sqlx::query("SELECT * FROM challenges ORDER BY created_at DESC, id DESC")
                .fetch_all(pool)
                .await?
        }
    };
    rows.iter().map(Challenge::from_row).collect()
}

pub async fn get_challenge(pool: &SqlitePool, id: i64) -> Result<Option<Challenge>> {
    let row = sqlx::query("SELECT * FROM challenges WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?;
    row.as_ref().map(Challenge::from_row).transpose()
}

/// Truncates to at most `max_chars` characters.
fn clip(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

struct ResolvedInput {
    text: String,
    source_org: Option<String>,
    source_url: Option<String>,
    document_id: Option<i64>,
}

async fn resolve_input(pool: &SqlitePool, input: ExtractInput) -> Result<ResolvedInput> {
    match input {
        ExtractInput::Text {
            text,
            source_org,
            source_url,
        } => Ok(ResolvedInput {
            text,
            source_org,
            source_url,
            document_id: None,
        }),
        ExtractInput::Document(id) => {
            let doc = get_document(pool, id)
                .await?
                .ok_or_else(|| not_found(format!("document not found: {}", id)))?;
            let source_org = match doc.source_id {
                Some(sid) => get_source(pool, sid).await?.map(|s| s.name),
                None => None,
            };
            let text = doc
                .extracted_text
                .filter(|t| !t.trim().is_empty())
                .ok_or_else(|| invalid(format!("document {} has no extracted text", id)))?;
            Ok(ResolvedInput {
                text,
                source_org,
                source_url: Some(doc.url),
                document_id: Some(id),
            })
        }
    }
}

/// Characters of input text kept in a failed extraction's audit entry.
const AUDIT_INPUT_CHARS: usize = 500;

fn failure_audit(model: &str, text: &str, message: &str, user_id: Option<i64>) -> AuditEntry {
    AuditEntry::error(
        AgentName::ChallengeExtractor,
        "extract_challenges",
        model,
        clip(text, AUDIT_INPUT_CHARS),
        message,
    )
    .user(user_id)
}

/// Runs the extractor and stores the run plus every kept challenge.
///
/// A failed model call is still recorded as a `failed` run before the error
/// is returned.
pub async fn extract_and_store(
    pool: &SqlitePool,
    model: &dyn ChatModel,
    registry: &PromptRegistry,
    max_input_chars: usize,
    user_id: Option<i64>,
    input: ExtractInput,
) -> Result<ExtractionOutcome> {
    let resolved = resolve_input(pool, input).await?;
    if resolved.text.trim().is_empty() {
        return Err(invalid("text must not be empty"));
    }
    let text = clip(&resolved.text, max_input_chars);
    if text.len() < resolved.text.len() {
        tracing::info!(max_input_chars, "input text truncated for extraction");
    }

    let prompt_ref = registry.latest(PROMPT_KEY)?.prompt_ref();
    let now = now_ts();

    let output = match extract_challenges(
        model,
        registry,
        text,
        resolved.source_org.as_deref(),
        resolved.source_url.as_deref(),
    )
    .await
    {
        Ok(output) => output,
        Err(e) => {
            let message = format!("{:#}", e);
            sqlx::query(
                r#"
                INSERT INTO challenge_extraction_runs (user_id, model_used, source_org, source_url, prompt_key, prompt_version, prompt_sha256, status, error_message, created_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(user_id)
            .bind(model.model_name())
            .bind(&resolved.source_org)
            .bind(&resolved.source_url)
            .bind(&prompt_ref.key)
            .bind(prompt_ref.version)
            .bind(&prompt_ref.sha256)
            .bind(RunStatus::Failed.as_str())
            .bind(&message)
            .bind(now)
            .execute(pool)
            .await?;
            log_agent_interaction(&failure_audit(model.model_name(), text, &message, user_id));
            return Err(e);
        }
    };

    let mut tx = pool.begin().await?;
    let run_id = sqlx::query(
        r#"
        INSERT INTO challenge_extraction_runs (user_id, model_used, source_org, source_url, prompt_key, prompt_version, prompt_sha256, raw_prompt, raw_response, status, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(user_id)
    .bind(model.model_name())
    .bind(&resolved.source_org)
    .bind(&resolved.source_url)
    .bind(&prompt_ref.key)
    .bind(prompt_ref.version)
    .bind(&prompt_ref.sha256)
    .bind(&output.raw_prompt)
    .bind(&output.raw_response)
    .bind(RunStatus::Completed.as_str())
    .bind(now)
    .execute(&mut *tx)
    .await?
    .last_insert_rowid();

    let mut inserted_ids = Vec::with_capacity(output.result.challenges.len());
    for c in &output.result.challenges {
        let id = sqlx::query(
            r#"
            INSERT INTO challenges (user_id, document_id, title, statement, sdg_goals, geography, target_groups, sectors, source_url, source_org, confidence, extracted_at, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(user_id)
        .bind(resolved.document_id)
        .bind(&c.title)
        .bind(&c.statement)
        .bind(&c.sdg_goals)
        .bind(&c.geography)
        .bind(&c.target_groups)
        .bind(&c.sectors)
        .bind(&resolved.source_url)
        .bind(&resolved.source_org)
        .bind(c.confidence.round() as i64)
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await?
        .last_insert_rowid();
        inserted_ids.push(id);
    }
    tx.commit().await?;

    log_agent_interaction(
        &AuditEntry::success(
            AgentName::ChallengeExtractor,
            "extract_challenges",
            model.model_name(),
            &output.raw_prompt,
            &output.raw_response,
        )
        .user(user_id)
        .metadata(serde_json::json!({
            "runId": run_id,
            "challengesKept": inserted_ids.len(),
            "sourceUrl": resolved.source_url,
        })),
    );

    let mut challenges = Vec::with_capacity(inserted_ids.len());
    for id in &inserted_ids {
        if let Some(c) = get_challenge(pool, *id).await? {
            challenges.push(c);
        }
    }

    Ok(ExtractionOutcome {
        run_id,
        challenges,
        inserted_ids,
    })
}

/// CLI input selector for `sdg challenges extract`.
pub enum CliInput<'a> {
    Text(String),
    File(&'a Path),
    Document(i64),
}

/// `sdg challenges extract`.
pub async fn run_extract(
    config: &Config,
    input: CliInput<'_>,
    source_org: Option<String>,
    source_url: Option<String>,
) -> Result<()> {
    let input = match input {
        CliInput::Text(text) => ExtractInput::Text {
            text,
            source_org,
            source_url,
        },
        CliInput::File(path) => ExtractInput::Text {
            text: std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read input file: {}", path.display()))?,
            source_org,
            source_url,
        },
        CliInput::Document(id) => ExtractInput::Document(id),
    };

    let registry = PromptRegistry::load(&config.prompts.registry)?;
    let model = create_model(&config.llm);
    let pool = db::connect(config).await?;
    let outcome = extract_and_store(
        &pool,
        model.as_ref(),
        &registry,
        config.llm.max_input_chars,
        None,
        input,
    )
    .await?;

    println!("extraction run {}", outcome.run_id);
    for c in &outcome.challenges {
        println!(
            "  [{}] {} (confidence {})",
            c.id,
            truncate(&c.title, 80),
            c.confidence.unwrap_or(0)
        );
    }
    println!("  challenges stored: {}", outcome.inserted_ids.len());
    println!("ok");

    pool.close().await;
    Ok(())
}

/// `sdg challenges list`.
pub async fn run_list(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    let challenges = list_challenges(&pool, None).await?;
    if challenges.is_empty() {
        println!("No challenges.");
    } else {
        println!("{:<5} {:>4}  {:<12} TITLE", "ID", "CONF", "SDG");
        for c in &challenges {
            println!(
                "{:<5} {:>4}  {:<12} {}",
                c.id,
                c.confidence.map(|v| v.to_string()).unwrap_or_default(),
                truncate(c.sdg_goals.as_deref().unwrap_or("-"), 12),
                truncate(&c.title, 80)
            );
        }
    }
    pool.close().await;
    Ok(())
}
