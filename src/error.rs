//! Error kinds that callers need to tell apart.
//!
//! Application code returns `anyhow::Result`; these are wrapped inside it
//! where the HTTP layer should answer with something other than 500. See
//! `server::AppError` for the mapping.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DomainError {
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Invalid(String),
    #[error("{0}")]
    Unauthorized(String),
    /// A remote site answered, but not with what was needed.
    #[error("{0}")]
    Upstream(String),
}

pub fn not_found(message: impl Into<String>) -> anyhow::Error {
    DomainError::NotFound(message.into()).into()
}

pub fn invalid(message: impl Into<String>) -> anyhow::Error {
    DomainError::Invalid(message.into()).into()
}

pub fn unauthorized(message: impl Into<String>) -> anyhow::Error {
    DomainError::Unauthorized(message.into()).into()
}

pub fn upstream(message: impl Into<String>) -> anyhow::Error {
    DomainError::Upstream(message.into()).into()
}
