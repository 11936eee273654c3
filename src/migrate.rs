use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    apply_schema(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Creates every table and index. Safe to run repeatedly.
pub async fn apply_schema(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS users (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            open_id TEXT NOT NULL UNIQUE,
            name TEXT,
            login_method TEXT,
            role TEXT NOT NULL DEFAULT 'user',
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            last_signed_in INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS sources (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            org_type TEXT NOT NULL,
            trust_level TEXT NOT NULL DEFAULT 'medium',
            base_url TEXT NOT NULL UNIQUE,
            region_focus TEXT,
            tags TEXT,
            crawl_enabled INTEGER NOT NULL DEFAULT 0,
            rate_limit_ms INTEGER NOT NULL DEFAULT 1500,
            notes TEXT,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS source_endpoints (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            source_id INTEGER NOT NULL,
            endpoint_url TEXT NOT NULL UNIQUE,
            endpoint_type TEXT NOT NULL,
            parser_hint TEXT,
            priority INTEGER NOT NULL DEFAULT 100,
            enabled INTEGER NOT NULL DEFAULT 1,
            last_crawled_at INTEGER,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            FOREIGN KEY (source_id) REFERENCES sources(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS documents (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            source_id INTEGER,
            source_endpoint_id INTEGER,
            url TEXT NOT NULL UNIQUE,
            canonical_url TEXT,
            status TEXT NOT NULL DEFAULT 'discovered',
            content_type TEXT,
            byte_size INTEGER,
            sha256_bytes TEXT,
            fetched_at INTEGER,
            extracted_text TEXT,
            extracted_at INTEGER,
            error_message TEXT,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            FOREIGN KEY (source_id) REFERENCES sources(id),
            FOREIGN KEY (source_endpoint_id) REFERENCES source_endpoints(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS challenges (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id INTEGER,
            document_id INTEGER,
            title TEXT NOT NULL,
            statement TEXT NOT NULL,
            sdg_goals TEXT,
            geography TEXT,
            target_groups TEXT,
            sectors TEXT,
            source_url TEXT,
            source_org TEXT,
            confidence INTEGER,
            extracted_at INTEGER NOT NULL,
            created_at INTEGER NOT NULL,
            FOREIGN KEY (user_id) REFERENCES users(id),
            FOREIGN KEY (document_id) REFERENCES documents(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS challenge_extraction_runs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id INTEGER,
            model_used TEXT NOT NULL,
            source_org TEXT,
            source_url TEXT,
            prompt_key TEXT,
            prompt_version INTEGER,
            prompt_sha256 TEXT,
            raw_prompt TEXT,
            raw_response TEXT,
            status TEXT NOT NULL,
            error_message TEXT,
            created_at INTEGER NOT NULL,
            FOREIGN KEY (user_id) REFERENCES users(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS tech_discovery_runs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            challenge_id INTEGER NOT NULL,
            user_id INTEGER,
            model_used TEXT NOT NULL,
            budget_constraint_eur INTEGER NOT NULL DEFAULT 10000,
            challenge_summary TEXT,
            core_functions TEXT,
            underlying_principles TEXT,
            confidence REAL,
            full_response TEXT,
            raw_prompt TEXT,
            prompt_key TEXT,
            prompt_version INTEGER,
            prompt_sha256 TEXT,
            status TEXT NOT NULL DEFAULT 'in_progress',
            error_message TEXT,
            created_at INTEGER NOT NULL,
            FOREIGN KEY (challenge_id) REFERENCES challenges(id),
            FOREIGN KEY (user_id) REFERENCES users(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS tech_paths (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            run_id INTEGER NOT NULL,
            challenge_id INTEGER NOT NULL,
            path_name TEXT NOT NULL,
            path_order INTEGER NOT NULL,
            principles_used TEXT,
            technology_classes TEXT,
            why_plausible TEXT,
            estimated_cost_band_eur TEXT,
            risks_and_unknowns TEXT,
            created_at INTEGER NOT NULL,
            FOREIGN KEY (run_id) REFERENCES tech_discovery_runs(id),
            FOREIGN KEY (challenge_id) REFERENCES challenges(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS prompt_templates (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            key TEXT NOT NULL,
            version INTEGER NOT NULL,
            agent TEXT NOT NULL,
            operation TEXT NOT NULL,
            public_title TEXT NOT NULL,
            public_description TEXT NOT NULL,
            content TEXT NOT NULL,
            sha256 TEXT NOT NULL,
            source TEXT NOT NULL DEFAULT 'git',
            created_at INTEGER NOT NULL,
            UNIQUE(key, version)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_endpoints_source_id ON source_endpoints(source_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_documents_source_id ON documents(source_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_documents_status ON documents(status)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_documents_sha256 ON documents(sha256_bytes)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_challenges_user_id ON challenges(user_id)")
        .execute(pool)
        .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_tech_paths_challenge_id ON tech_paths(challenge_id)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
