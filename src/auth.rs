//! Shared-password login and signed session tokens.
//!
//! There are no individual accounts. The configured user password logs in
//! as one fixed `user` identity, the admin password as one fixed `admin`
//! identity. Both identities are upserted into `users` so runs can record
//! who started them.
//!
//! A session token is `base64url(claims JSON) + "." + hex(HMAC-SHA256)`,
//! signed with `[auth].session_secret`:
//!
//! ```text
//! eyJzdWIiOjEsInJvbGUiOiJ1c2VyIiwiZXhwIjoxNzY...  .  9f2c0e...
//! └──────────── claims (sub, role, exp, nonce) ─┘     └─ signature
//! ```

use anyhow::{anyhow, Result};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use sqlx::SqlitePool;

use crate::config::AuthConfig;
use crate::db::now_ts;
use crate::error::{invalid, unauthorized};
use crate::models::{Role, User};

type HmacSha256 = Hmac<Sha256>;

pub const SESSION_COOKIE: &str = "sdg_session";

const USER_OPEN_ID: &str = "simple-auth-user";
const USER_NAME: &str = "SDG User";
const ADMIN_OPEN_ID: &str = "simple-auth-admin";
const ADMIN_NAME: &str = "SDG Admin";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claims {
    /// `users.id` of the signed-in identity.
    pub sub: i64,
    pub role: Role,
    /// Expiry, unix seconds.
    pub exp: i64,
    pub nonce: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginOutcome {
    pub token: String,
    pub user: User,
    pub expires_at: i64,
}

fn mac(secret: &str) -> Result<HmacSha256> {
    HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| anyhow!("invalid session secret"))
}

/// Constant-time password check: both sides go through the same keyed MAC
/// and the tags are compared with `verify_slice`.
fn password_matches(secret: &str, expected: &str, candidate: &str) -> Result<bool> {
    let mut m = mac(secret)?;
    m.update(expected.as_bytes());
    let expected_tag = m.finalize().into_bytes();

    let mut m = mac(secret)?;
    m.update(candidate.as_bytes());
    Ok(m.verify_slice(&expected_tag).is_ok())
}

pub fn issue_token(secret: &str, claims: &Claims) -> Result<String> {
    let payload = URL_SAFE_NO_PAD.encode(serde_json::to_vec(claims)?);
    let mut m = mac(secret)?;
    m.update(payload.as_bytes());
    let signature = hex::encode(m.finalize().into_bytes());
    Ok(format!("{}.{}", payload, signature))
}

/// Checks signature and expiry, returning the claims of a valid token.
pub fn verify_token(secret: &str, token: &str, now: i64) -> Result<Claims> {
    let (payload, signature) = token
        .split_once('.')
        .ok_or_else(|| unauthorized("malformed session token"))?;
    let signature = hex::decode(signature).map_err(|_| unauthorized("malformed session token"))?;

    let mut m = mac(secret)?;
    m.update(payload.as_bytes());
    m.verify_slice(&signature)
        .map_err(|_| unauthorized("invalid session signature"))?;

    let raw = URL_SAFE_NO_PAD
        .decode(payload)
        .map_err(|_| unauthorized("malformed session token"))?;
    let claims: Claims =
        serde_json::from_slice(&raw).map_err(|_| unauthorized("malformed session token"))?;
    if claims.exp <= now {
        return Err(unauthorized("session expired"));
    }
    Ok(claims)
}

async fn upsert_identity(pool: &SqlitePool, open_id: &str, name: &str, role: Role) -> Result<User> {
    let now = now_ts();
    sqlx::query(
        r#"
        INSERT INTO users (open_id, name, login_method, role, created_at, updated_at, last_signed_in)
        VALUES (?, ?, 'password', ?, ?, ?, ?)
        ON CONFLICT(open_id) DO UPDATE SET
            role = excluded.role,
            updated_at = excluded.updated_at,
            last_signed_in = excluded.last_signed_in
        "#,
    )
    .bind(open_id)
    .bind(name)
    .bind(role.as_str())
    .bind(now)
    .bind(now)
    .bind(now)
    .execute(pool)
    .await?;

    let row = sqlx::query("SELECT * FROM users WHERE open_id = ?")
        .bind(open_id)
        .fetch_one(pool)
        .await?;
    User::from_row(&row)
}

pub async fn get_user(pool: &SqlitePool, id: i64) -> Result<Option<User>> {
    let row = sqlx::query("SELECT * FROM users WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?;
    row.as_ref().map(User::from_row).transpose()
}

/// Logs in with the shared password. The admin password is checked first.
pub async fn login(pool: &SqlitePool, config: &AuthConfig, password: &str) -> Result<LoginOutcome> {
    let secret = config
        .session_secret()
        .ok_or_else(|| invalid("login is not configured: auth.session_secret is missing"))?;
    let user_password = config.password();
    let admin_password = config.admin_password();
    if user_password.is_none() && admin_password.is_none() {
        return Err(invalid("login is not configured: no password set"));
    }

    let mut identity = None;
    if let Some(ref expected) = admin_password {
        if password_matches(&secret, expected, password)? {
            identity = Some((ADMIN_OPEN_ID, ADMIN_NAME, Role::Admin));
        }
    }
    if identity.is_none() {
        if let Some(ref expected) = user_password {
            if password_matches(&secret, expected, password)? {
                identity = Some((USER_OPEN_ID, USER_NAME, Role::User));
            }
        }
    }
    let Some((open_id, name, role)) = identity else {
        tracing::warn!("rejected login attempt");
        return Err(unauthorized("invalid password"));
    };

    let user = upsert_identity(pool, open_id, name, role).await?;
    let expires_at = now_ts() + config.session_ttl_days * 86_400;
    let claims = Claims {
        sub: user.id,
        role,
        exp: expires_at,
        nonce: uuid::Uuid::new_v4().to_string(),
    };
    let token = issue_token(&secret, &claims)?;
    tracing::info!(user_id = user.id, role = %role, "signed in");

    Ok(LoginOutcome {
        token,
        user,
        expires_at,
    })
}
