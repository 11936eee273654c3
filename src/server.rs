//! JSON HTTP API.
//!
//! Exposes challenge extraction, technology discovery, source management,
//! document discovery/ingestion and prompt provenance over axum. The same
//! operations back the `sdg` CLI.
//!
//! # Access tiers
//!
//! | Tier | Requirement |
//! |------|-------------|
//! | public | none |
//! | protected | valid session |
//! | admin | valid session with role `admin` |
//!
//! The session token is read from the `sdg_session` cookie, or from an
//! `Authorization: Bearer <token>` header for non-browser clients.
//!
//! # Endpoints
//!
//! | Method | Path | Tier |
//! |--------|------|------|
//! | `GET`  | `/health` | public |
//! | `POST` | `/api/auth/login` | public |
//! | `POST` | `/api/auth/logout` | public |
//! | `GET`  | `/api/auth/me` | public |
//! | `GET`  | `/api/challenges` | public |
//! | `GET`  | `/api/challenges/{id}` | public |
//! | `POST` | `/api/challenges/extract` | protected |
//! | `GET`  | `/api/challenges/{id}/tech-paths` | public |
//! | `POST` | `/api/tech-paths/discover` | protected |
//! | `GET`  | `/api/prompts/templates` | protected |
//! | `GET`  | `/api/prompts/templates/{key}/{version}` | admin |
//! | `GET`  | `/api/prompts/usage` | protected |
//! | `GET`  | `/api/sources` | protected |
//! | `POST` | `/api/sources` | protected |
//! | `GET`  | `/api/sources/{id}/endpoints` | protected |
//! | `POST` | `/api/endpoints` | protected |
//! | `POST` | `/api/endpoints/{id}/discover` | protected |
//! | `GET`  | `/api/documents` | protected |
//! | `GET`  | `/api/documents/{id}` | protected |
//! | `POST` | `/api/documents/{id}/download` | protected |
//! | `GET`  | `/api/documents/{id}/text` | admin |
//! | `POST` | `/api/suggest-urls` | protected |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "text must not be empty" } }
//! ```
//!
//! Error codes: `bad_request` (400), `unauthorized` (401), `forbidden` (403),
//! `not_found` (404), `upstream` (502), `internal` (500).

use anyhow::Context;
use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::agents::url_suggest::suggest_urls;
use crate::auth::{self, Claims, SESSION_COOKIE};
use crate::challenges::{self, ExtractInput};
use crate::config::Config;
use crate::crawler::{Fetcher, HttpFetcher};
use crate::db::{self, now_ts};
use crate::discovery::discover_documents_from_endpoint;
use crate::documents::{self, DocumentFilter};
use crate::error::DomainError;
use crate::ingest::download_and_extract;
use crate::llm::{create_model, ChatModel, LlmError};
use crate::migrate::apply_schema;
use crate::models::{Role, TechDiscoveryRun, TechPath};
use crate::pathways;
use crate::prompts::{self, PromptRegistry};
use crate::sources::{self, EndpointInput, SourceInput};

const DEFAULT_USAGE_LIMIT: i64 = 100;
const DEFAULT_SUGGEST_URLS: usize = 50;

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub pool: SqlitePool,
    pub config: Arc<Config>,
    /// Model for challenge extraction and technology discovery.
    pub llm: Arc<dyn ChatModel>,
    /// Model for URL suggestions.
    pub suggest: Arc<dyn ChatModel>,
    pub fetcher: Arc<dyn Fetcher>,
    pub prompts: Arc<PromptRegistry>,
}

/// Builds the application router with CORS and request tracing.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/api/auth/login", post(handle_login))
        .route("/api/auth/logout", post(handle_logout))
        .route("/api/auth/me", get(handle_me))
        .route("/api/challenges", get(handle_list_challenges))
        .route("/api/challenges/extract", post(handle_extract))
        .route("/api/challenges/{id}", get(handle_get_challenge))
        .route("/api/challenges/{id}/tech-paths", get(handle_challenge_paths))
        .route("/api/tech-paths/discover", post(handle_discover_paths))
        .route("/api/prompts/templates", get(handle_list_templates))
        .route("/api/prompts/templates/{key}/{version}", get(handle_get_template))
        .route("/api/prompts/usage", get(handle_prompt_usage))
        .route("/api/sources", get(handle_list_sources).post(handle_upsert_source))
        .route("/api/sources/{id}/endpoints", get(handle_list_endpoints))
        .route("/api/endpoints", post(handle_upsert_endpoint))
        .route("/api/endpoints/{id}/discover", post(handle_discover_endpoint))
        .route("/api/documents", get(handle_list_documents))
        .route("/api/documents/{id}", get(handle_get_document))
        .route("/api/documents/{id}/download", post(handle_download))
        .route("/api/documents/{id}/text", get(handle_document_text))
        .route("/api/suggest-urls", post(handle_suggest_urls))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Starts the HTTP server on `[server].bind`.
///
/// Applies the schema, loads the prompt registry and builds both model
/// clients up front; a missing API key leaves the server running with the
/// affected operations answering `502 upstream`.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let bind_addr = config.server.bind.clone();
    let pool = db::connect(config).await?;
    apply_schema(&pool).await?;

    let registry = PromptRegistry::load(&config.prompts.registry)?;
    let synced = prompts::sync_to_db(&pool, &registry).await?;
    tracing::info!(templates = synced, "prompt registry synced");

    if config.auth.session_secret().is_none() {
        tracing::warn!("auth.session_secret is not set; login is disabled");
    }

    let state = AppState {
        pool,
        config: Arc::new(config.clone()),
        llm: create_model(&config.llm),
        suggest: create_model(&config.suggest),
        fetcher: Arc::new(HttpFetcher::new(&config.crawl)?),
        prompts: Arc::new(registry),
    };
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", bind_addr))?;
    tracing::info!("listening on http://{}", bind_addr);
    println!("SDG discovery API listening on http://{}", bind_addr);

    axum::serve(listener, app).await?;
    Ok(())
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: &'static str,
    message: String,
}

#[derive(Debug)]
pub struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl AppError {
    fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError::new(StatusCode::BAD_REQUEST, "bad_request", message)
}

fn unauthorized(message: impl Into<String>) -> AppError {
    AppError::new(StatusCode::UNAUTHORIZED, "unauthorized", message)
}

fn forbidden(message: impl Into<String>) -> AppError {
    AppError::new(StatusCode::FORBIDDEN, "forbidden", message)
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError::new(StatusCode::NOT_FOUND, "not_found", message)
}

/// Maps domain and LLM errors to their status; everything else is a 500.
impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        if let Some(domain) = err.downcast_ref::<DomainError>() {
            return match domain {
                DomainError::NotFound(m) => not_found(m.clone()),
                DomainError::Invalid(m) => bad_request(m.clone()),
                DomainError::Unauthorized(m) => unauthorized(m.clone()),
                DomainError::Upstream(m) => {
                    AppError::new(StatusCode::BAD_GATEWAY, "upstream", m.clone())
                }
            };
        }
        if err.downcast_ref::<LlmError>().is_some() {
            return AppError::new(StatusCode::BAD_GATEWAY, "upstream", format!("{:#}", err));
        }
        tracing::error!(error = %format!("{:#}", err), "request failed");
        AppError::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "internal",
            format!("{:#}", err),
        )
    }
}

type ApiResult<T> = Result<Json<T>, AppError>;

// ============ Sessions ============

fn session_token(headers: &HeaderMap) -> Option<String> {
    if let Some(bearer) = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
    {
        return Some(bearer.trim().to_string());
    }
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == SESSION_COOKIE)
        .map(|(_, value)| value.to_string())
}

/// Claims of a valid session; missing or bad tokens count as anonymous.
fn current_session(state: &AppState, headers: &HeaderMap) -> Option<Claims> {
    let secret = state.config.auth.session_secret()?;
    let token = session_token(headers)?;
    auth::verify_token(&secret, &token, now_ts()).ok()
}

fn require_user(state: &AppState, headers: &HeaderMap) -> Result<Claims, AppError> {
    current_session(state, headers).ok_or_else(|| unauthorized("login required"))
}

fn require_admin(state: &AppState, headers: &HeaderMap) -> Result<Claims, AppError> {
    let claims = require_user(state, headers)?;
    if claims.role != Role::Admin {
        return Err(forbidden("admin access required"));
    }
    Ok(claims)
}

// ============ Health & auth ============

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

#[derive(Deserialize)]
struct LoginBody {
    password: String,
}

async fn handle_login(
    State(state): State<AppState>,
    Json(body): Json<LoginBody>,
) -> Result<Response, AppError> {
    let outcome = auth::login(&state.pool, &state.config.auth, &body.password).await?;
    let max_age = state.config.auth.session_ttl_days * 86_400;
    let cookie = format!(
        "{}={}; Path=/; HttpOnly; SameSite=Lax; Max-Age={}",
        SESSION_COOKIE, outcome.token, max_age
    );
    Ok(([(header::SET_COOKIE, cookie)], Json(outcome)).into_response())
}

async fn handle_logout() -> Response {
    let cookie = format!("{}=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0", SESSION_COOKIE);
    (
        [(header::SET_COOKIE, cookie)],
        Json(serde_json::json!({ "success": true })),
    )
        .into_response()
}

async fn handle_me(State(state): State<AppState>, headers: HeaderMap) -> ApiResult<serde_json::Value> {
    let Some(claims) = current_session(&state, &headers) else {
        return Ok(Json(serde_json::Value::Null));
    };
    let user = auth::get_user(&state.pool, claims.sub).await?;
    Ok(Json(serde_json::to_value(user).map_err(anyhow::Error::from)?))
}

// ============ Challenges & pathways ============

async fn handle_list_challenges(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<Vec<crate::models::Challenge>> {
    let user_id = current_session(&state, &headers).map(|c| c.sub);
    Ok(Json(challenges::list_challenges(&state.pool, user_id).await?))
}

async fn handle_get_challenge(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<crate::models::Challenge> {
    challenges::get_challenge(&state.pool, id)
        .await?
        .map(Json)
        .ok_or_else(|| not_found(format!("challenge not found: {}", id)))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExtractBody {
    text: Option<String>,
    source_org: Option<String>,
    source_url: Option<String>,
    document_id: Option<i64>,
}

async fn handle_extract(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<ExtractBody>,
) -> ApiResult<challenges::ExtractionOutcome> {
    let claims = require_user(&state, &headers)?;
    let input = match (body.text, body.document_id) {
        (Some(text), None) => ExtractInput::Text {
            text,
            source_org: body.source_org,
            source_url: body.source_url,
        },
        (None, Some(id)) => ExtractInput::Document(id),
        _ => return Err(bad_request("provide exactly one of text or documentId")),
    };
    let outcome = challenges::extract_and_store(
        &state.pool,
        state.llm.as_ref(),
        &state.prompts,
        state.config.llm.max_input_chars,
        Some(claims.sub),
        input,
    )
    .await?;
    Ok(Json(outcome))
}

#[derive(Serialize)]
struct ChallengePaths {
    runs: Vec<TechDiscoveryRun>,
    paths: Vec<TechPath>,
}

async fn handle_challenge_paths(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<ChallengePaths> {
    Ok(Json(ChallengePaths {
        runs: pathways::list_runs_by_challenge(&state.pool, id).await?,
        paths: pathways::list_paths_by_challenge(&state.pool, id).await?,
    }))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DiscoverPathsBody {
    challenge_id: i64,
    budget_eur: Option<i64>,
}

async fn handle_discover_paths(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<DiscoverPathsBody>,
) -> ApiResult<pathways::DiscoveryOutcome> {
    let claims = require_user(&state, &headers)?;
    let outcome = pathways::discover_and_store(
        &state.pool,
        state.llm.as_ref(),
        &state.prompts,
        body.challenge_id,
        body.budget_eur,
        Some(claims.sub),
    )
    .await?;
    Ok(Json(outcome))
}

// ============ Prompts ============

async fn handle_list_templates(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<Vec<crate::models::PromptTemplate>> {
    require_user(&state, &headers)?;
    Ok(Json(prompts::list_templates(&state.pool).await?))
}

async fn handle_get_template(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((key, version)): Path<(String, i64)>,
) -> ApiResult<serde_json::Value> {
    require_admin(&state, &headers)?;
    let template = prompts::get_template(&state.pool, &key, version)
        .await?
        .ok_or_else(|| not_found(format!("prompt template not found: {} v{}", key, version)))?;
    let content = template.content.clone();
    Ok(Json(serde_json::json!({
        "template": template,
        "content": content,
    })))
}

#[derive(Deserialize)]
struct LimitQuery {
    limit: Option<i64>,
}

async fn handle_prompt_usage(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(q): Query<LimitQuery>,
) -> ApiResult<Vec<prompts::PromptUsage>> {
    require_user(&state, &headers)?;
    let limit = q.limit.unwrap_or(DEFAULT_USAGE_LIMIT);
    Ok(Json(prompts::list_usage(&state.pool, limit).await?))
}

// ============ Sources & discovery ============

#[derive(Serialize)]
struct IdResponse {
    id: i64,
}

async fn handle_list_sources(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<Vec<crate::models::Source>> {
    require_user(&state, &headers)?;
    Ok(Json(sources::list_sources(&state.pool).await?))
}

async fn handle_upsert_source(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(input): Json<SourceInput>,
) -> ApiResult<IdResponse> {
    require_user(&state, &headers)?;
    let id = sources::upsert_source(&state.pool, &input).await?;
    Ok(Json(IdResponse { id }))
}

async fn handle_list_endpoints(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(source_id): Path<i64>,
) -> ApiResult<Vec<crate::models::SourceEndpoint>> {
    require_user(&state, &headers)?;
    Ok(Json(sources::list_endpoints(&state.pool, source_id).await?))
}

async fn handle_upsert_endpoint(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(input): Json<EndpointInput>,
) -> ApiResult<IdResponse> {
    require_user(&state, &headers)?;
    let id = sources::upsert_endpoint(&state.pool, &input).await?;
    Ok(Json(IdResponse { id }))
}

async fn handle_discover_endpoint(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(endpoint_id): Path<i64>,
) -> ApiResult<crate::discovery::DiscoveryReport> {
    require_user(&state, &headers)?;
    let report = discover_documents_from_endpoint(
        &state.pool,
        state.fetcher.as_ref(),
        &state.config.crawl,
        endpoint_id,
    )
    .await?;
    Ok(Json(report))
}

// ============ Documents ============

async fn handle_list_documents(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(filter): Query<DocumentFilter>,
) -> ApiResult<Vec<crate::models::Document>> {
    require_user(&state, &headers)?;
    Ok(Json(documents::list_documents(&state.pool, &filter).await?))
}

async fn handle_get_document(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> ApiResult<crate::models::Document> {
    require_user(&state, &headers)?;
    documents::get_document(&state.pool, id)
        .await?
        .map(Json)
        .ok_or_else(|| not_found(format!("document not found: {}", id)))
}

async fn handle_download(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> ApiResult<crate::ingest::IngestReport> {
    require_user(&state, &headers)?;
    Ok(Json(
        download_and_extract(&state.pool, state.fetcher.as_ref(), id).await?,
    ))
}

#[derive(Deserialize)]
struct TextQuery {
    max_chars: Option<usize>,
}

async fn handle_document_text(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<i64>,
    Query(q): Query<TextQuery>,
) -> ApiResult<documents::DocumentText> {
    require_admin(&state, &headers)?;
    documents::get_extracted_text(&state.pool, id, q.max_chars)
        .await?
        .map(Json)
        .ok_or_else(|| not_found(format!("document not found: {}", id)))
}

// ============ URL suggestions ============

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SuggestBody {
    query: String,
    max_urls: Option<usize>,
}

#[derive(Serialize)]
struct SuggestResponse {
    urls: Vec<String>,
}

async fn handle_suggest_urls(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<SuggestBody>,
) -> ApiResult<SuggestResponse> {
    require_user(&state, &headers)?;
    if body.query.trim().is_empty() {
        return Err(bad_request("query must not be empty"));
    }
    let output = suggest_urls(
        state.suggest.as_ref(),
        &body.query,
        body.max_urls.unwrap_or(DEFAULT_SUGGEST_URLS),
    )
    .await?;
    Ok(Json(SuggestResponse {
        urls: output.result,
    }))
}
