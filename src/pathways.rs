//! Technology discovery runs and their paths.

use anyhow::Result;
use serde::Serialize;
use sqlx::SqlitePool;

use crate::agents::audit::{log_agent_interaction, AgentName, AuditEntry};
use crate::agents::tech_discovery::{discover_technology_paths, DEFAULT_BUDGET_EUR, PROMPT_KEY};
use crate::challenges::get_challenge;
use crate::config::Config;
use crate::db::{self, now_ts};
use crate::error::{invalid, not_found};
use crate::llm::{create_model, ChatModel};
use crate::models::{RunStatus, TechDiscoveryRun, TechPath};
use crate::prompts::PromptRegistry;
use crate::sources::truncate;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveryOutcome {
    pub run: TechDiscoveryRun,
    pub paths: Vec<TechPath>,
    pub warnings: Vec<String>,
}

/// Runs technology discovery for a stored challenge.
///
/// The run row is created `in_progress` before the model is called and is
/// moved to `completed` or `failed` afterwards.
pub async fn discover_and_store(
    pool: &SqlitePool,
    model: &dyn ChatModel,
    registry: &PromptRegistry,
    challenge_id: i64,
    budget_eur: Option<i64>,
    user_id: Option<i64>,
) -> Result<DiscoveryOutcome> {
    let challenge = get_challenge(pool, challenge_id)
        .await?
        .ok_or_else(|| not_found(format!("challenge not found: {}", challenge_id)))?;
    let budget = budget_eur.unwrap_or(DEFAULT_BUDGET_EUR);
    if budget <= 0 {
        return Err(invalid("budget must be positive"));
    }
    let prompt_ref = registry.latest(PROMPT_KEY)?.prompt_ref();

    let run_id = sqlx::query(
        r#"
        INSERT INTO tech_discovery_runs (challenge_id, user_id, model_used, budget_constraint_eur, prompt_key, prompt_version, prompt_sha256, status, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(challenge_id)
    .bind(user_id)
    .bind(model.model_name())
    .bind(budget)
    .bind(&prompt_ref.key)
    .bind(prompt_ref.version)
    .bind(&prompt_ref.sha256)
    .bind(RunStatus::InProgress.as_str())
    .bind(now_ts())
    .execute(pool)
    .await?
    .last_insert_rowid();

    let output = match discover_technology_paths(model, registry, &challenge, Some(budget)).await {
        Ok(output) => output,
        Err(e) => {
            let message = format!("{:#}", e);
            sqlx::query("UPDATE tech_discovery_runs SET status = ?, error_message = ? WHERE id = ?")
                .bind(RunStatus::Failed.as_str())
                .bind(&message)
                .bind(run_id)
                .execute(pool)
                .await?;
            log_agent_interaction(
                &AuditEntry::error(
                    AgentName::TechnologyDiscovery,
                    "discover_paths",
                    model.model_name(),
                    "",
                    &message,
                )
                .user(user_id)
                .challenge(challenge_id),
            );
            return Err(e);
        }
    };

    let result = &output.result;
    let now = now_ts();
    let mut tx = pool.begin().await?;

    sqlx::query(
        r#"
        UPDATE tech_discovery_runs SET
            challenge_summary = ?, core_functions = ?, underlying_principles = ?, confidence = ?,
            full_response = ?, raw_prompt = ?, status = ?
        WHERE id = ?
        "#,
    )
    .bind(&result.challenge_summary)
    .bind(serde_json::to_string(&result.core_functions)?)
    .bind(serde_json::to_string(&result.underlying_principles)?)
    .bind(result.confidence)
    .bind(&output.raw_response)
    .bind(&output.raw_prompt)
    .bind(RunStatus::Completed.as_str())
    .bind(run_id)
    .execute(&mut *tx)
    .await?;

    for (i, path) in result.technology_paths.iter().enumerate() {
        sqlx::query(
            r#"
            INSERT INTO tech_paths (run_id, challenge_id, path_name, path_order, principles_used, technology_classes, why_plausible, estimated_cost_band_eur, risks_and_unknowns, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(run_id)
        .bind(challenge_id)
        .bind(&path.path_name)
        .bind(i as i64 + 1)
        .bind(serde_json::to_string(&path.principles_used)?)
        .bind(serde_json::to_string(&path.technology_classes)?)
        .bind(&path.why_plausible)
        .bind(&path.estimated_cost_band_eur)
        .bind(serde_json::to_string(&path.risks_and_unknowns)?)
        .bind(now)
        .execute(&mut *tx)
        .await?;
    }
    tx.commit().await?;

    log_agent_interaction(
        &AuditEntry::success(
            AgentName::TechnologyDiscovery,
            "discover_paths",
            model.model_name(),
            &output.raw_prompt,
            &output.raw_response,
        )
        .user(user_id)
        .challenge(challenge_id)
        .metadata(serde_json::json!({
            "runId": run_id,
            "budgetEur": budget,
            "paths": result.technology_paths.len(),
            "budgetWarnings": output.warnings,
        })),
    );

    let run = get_run(pool, run_id)
        .await?
        .ok_or_else(|| not_found(format!("run not found: {}", run_id)))?;
    Ok(DiscoveryOutcome {
        run,
        paths: list_paths_by_run(pool, run_id).await?,
        warnings: output.warnings,
    })
}

pub async fn get_run(pool: &SqlitePool, run_id: i64) -> Result<Option<TechDiscoveryRun>> {
    let row = sqlx::query("SELECT * FROM tech_discovery_runs WHERE id = ?")
        .bind(run_id)
        .fetch_optional(pool)
        .await?;
    row.as_ref().map(TechDiscoveryRun::from_row).transpose()
}

pub async fn list_runs_by_challenge(
    pool: &SqlitePool,
    challenge_id: i64,
) -> Result<Vec<TechDiscoveryRun>> {
    let rows = sqlx::query(
        "SELECT * FROM tech_discovery_runs WHERE challenge_id = ? ORDER BY created_at DESC, id DESC",
    )
    .bind(challenge_id)
    .fetch_all(pool)
    .await?;
    rows.iter().map(TechDiscoveryRun::from_row).collect()
}

/// Paths of every run for a challenge, newest run first, in path order.
pub async fn list_paths_by_challenge(pool: &SqlitePool, challenge_id: i64) -> Result<Vec<TechPath>> {
    let rows = sqlx::query(
        "SELECT * FROM tech_paths WHERE challenge_id = ? ORDER BY run_id DESC, path_order ASC",
    )
    .bind(challenge_id)
    .fetch_all(pool)
    .await?;
    rows.iter().map(TechPath::from_row).collect()
}

pub async fn list_paths_by_run(pool: &SqlitePool, run_id: i64) -> Result<Vec<TechPath>> {
    let rows = sqlx::query("SELECT * FROM tech_paths WHERE run_id = ? ORDER BY path_order ASC")
        .bind(run_id)
        .fetch_all(pool)
        .await?;
    rows.iter().map(TechPath::from_row).collect()
}

fn print_path(p: &TechPath) {
    println!(
        "  {}. {} [{}]",
        p.path_order,
        p.path_name,
        p.estimated_cost_band_eur.as_deref().unwrap_or("-")
    );
    if !p.technology_classes.is_empty() {
        println!("     classes: {}", truncate(&p.technology_classes.join(", "), 100));
    }
}

/// `sdg pathways discover <challenge>`.
pub async fn run_discover(config: &Config, challenge_id: i64, budget_eur: Option<i64>) -> Result<()> {
    let registry = PromptRegistry::load(&config.prompts.registry)?;
    let model = create_model(&config.llm);
    let pool = db::connect(config).await?;
    let outcome =
        discover_and_store(&pool, model.as_ref(), &registry, challenge_id, budget_eur, None).await?;

    println!(
        "discovery run {} (budget €{})",
        outcome.run.id,
        crate::agents::format_thousands(outcome.run.budget_constraint_eur)
    );
    if let Some(ref summary) = outcome.run.challenge_summary {
        println!("  summary: {}", truncate(summary, 120));
    }
    for p in &outcome.paths {
        print_path(p);
    }
    for w in &outcome.warnings {
        println!("  warning: {}", w);
    }
    println!("ok");

    pool.close().await;
    Ok(())
}

/// `sdg pathways list <challenge>`.
pub async fn run_list(config: &Config, challenge_id: i64) -> Result<()> {
    let pool = db::connect(config).await?;
    let runs = list_runs_by_challenge(&pool, challenge_id).await?;
    if runs.is_empty() {
        println!("No discovery runs for challenge {}.", challenge_id);
    }
    for run in &runs {
        println!(
            "run {} [{}] budget €{} model {}",
            run.id,
            run.status,
            crate::agents::format_thousands(run.budget_constraint_eur),
            run.model_used
        );
        for p in list_paths_by_run(&pool, run.id).await? {
            print_path(&p);
        }
    }
    pool.close().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::challenge_extractor::tests::registry;
    use crate::agents::tech_discovery::tests::DISCOVERY;
    use crate::db::memory_pool;
    use crate::llm::tests::ScriptedChat;
    use crate::llm::LlmError;

    async fn insert_challenge(pool: &SqlitePool) -> i64 {
        sqlx::query(
            "INSERT INTO challenges (title, statement, sdg_goals, confidence, extracted_at, created_at) VALUES ('Water', 'No safe water.', '6', 80, 1, 1)",
        )
        .execute(pool)
        .await
        .unwrap()
        .last_insert_rowid()
    }

    #[tokio::test]
    async fn completed_run_stores_ordered_paths() {
        let pool = memory_pool().await;
        let cid = insert_challenge(&pool).await;
        let chat = ScriptedChat::replying(DISCOVERY);

        let out = discover_and_store(&pool, &chat, &registry(), cid, None, None)
            .await
            .unwrap();
        assert_eq!(out.run.status, RunStatus::Completed);
        assert_eq!(out.run.budget_constraint_eur, 10_000);
        assert_eq!(out.run.core_functions, vec!["lift water", "disinfect"]);
        assert_eq!(out.run.confidence, Some(0.72));
        assert_eq!(out.run.prompt_key.as_deref(), Some(PROMPT_KEY));
        assert_eq!(out.paths.len(), 2);
        assert_eq!(out.paths[0].path_order, 1);
        assert_eq!(out.paths[1].path_name, "Treatment plant");
        assert_eq!(out.warnings.len(), 1);

        let by_challenge = list_paths_by_challenge(&pool, cid).await.unwrap();
        assert_eq!(by_challenge.len(), 2);
        assert_eq!(list_runs_by_challenge(&pool, cid).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn failed_model_call_marks_run_failed() {
        let pool = memory_pool().await;
        let cid = insert_challenge(&pool).await;
        let chat = ScriptedChat::new(vec![Err(LlmError::Disabled("off".into()))]);

        let err = discover_and_store(&pool, &chat, &registry(), cid, Some(5000), None)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("not available"));

        let runs = list_runs_by_challenge(&pool, cid).await.unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].status, RunStatus::Failed);
        assert_eq!(runs[0].budget_constraint_eur, 5000);
        assert!(runs[0].error_message.as_deref().unwrap().contains("off"));
    }

    #[tokio::test]
    async fn missing_challenge_is_not_found() {
        let pool = memory_pool().await;
        let chat = ScriptedChat::replying(DISCOVERY);
        let err = discover_and_store(&pool, &chat, &registry(), 404, None, None)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("challenge not found"));
    }
}
