//! Core data models.
//!
//! Stored enums round-trip through their `snake_case` string form; row
//! structs mirror the tables created in [`crate::migrate`] and serialize
//! directly into API responses.

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use std::fmt;
use std::str::FromStr;

/// Declares a string-backed enum with `as_str`, `Display` and `FromStr`.
macro_rules! string_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = anyhow::Error;

            fn from_str(s: &str) -> Result<Self> {
                match s {
                    $($text => Ok($name::$variant),)+
                    other => bail!(
                        "invalid {}: '{}'",
                        stringify!($name),
                        other
                    ),
                }
            }
        }
    };
}

string_enum!(
    /// Kind of organization publishing a source.
    OrgType {
        Un => "un",
        Eu => "eu",
        Gov => "gov",
        Ministry => "ministry",
        Foundation => "foundation",
        Corporate => "corporate",
        Ngo => "ngo",
        Bank => "bank",
        Academic => "academic",
    }
);

string_enum!(
    TrustLevel {
        High => "high",
        Medium => "medium",
        Low => "low",
    }
);

string_enum!(
    /// How documents are discovered from an endpoint.
    EndpointType {
        Rss => "rss",
        Sitemap => "sitemap",
        HtmlList => "html_list",
        Api => "api",
        ManualSeed => "manual_seed",
    }
);

string_enum!(
    /// Lifecycle of a discovered document.
    DocumentStatus {
        Discovered => "discovered",
        Downloaded => "downloaded",
        Extracted => "extracted",
        Failed => "failed",
    }
);

string_enum!(
    RunStatus {
        InProgress => "in_progress",
        Completed => "completed",
        Failed => "failed",
    }
);

string_enum!(
    Role {
        User => "user",
        Admin => "admin",
    }
);

/// Parses a stored enum column, surfacing corrupt values as errors.
fn parse_col<T: FromStr<Err = anyhow::Error>>(row: &SqliteRow, col: &str) -> Result<T> {
    let raw: String = row.try_get(col)?;
    raw.parse()
}

/// Decodes a JSON-array text column; NULL or malformed text becomes empty.
pub fn json_list(raw: Option<String>) -> Vec<String> {
    raw.and_then(|s| serde_json::from_str(&s).ok())
        .unwrap_or_default()
}

#[derive(Debug, Clone, Serialize)]
pub struct User {
    pub id: i64,
    pub open_id: String,
    pub name: Option<String>,
    pub login_method: Option<String>,
    pub role: Role,
    pub created_at: i64,
    pub last_signed_in: i64,
}

impl User {
    pub fn from_row(row: &SqliteRow) -> Result<Self> {
        Ok(Self {
            id: row.try_get("id")?,
            open_id: row.try_get("open_id")?,
            name: row.try_get("name")?,
            login_method: row.try_get("login_method")?,
            role: parse_col(row, "role")?,
            created_at: row.try_get("created_at")?,
            last_signed_in: row.try_get("last_signed_in")?,
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Source {
    pub id: i64,
    pub name: String,
    pub org_type: OrgType,
    pub trust_level: TrustLevel,
    pub base_url: String,
    pub region_focus: Vec<String>,
    pub tags: Vec<String>,
    pub crawl_enabled: bool,
    pub rate_limit_ms: i64,
    pub notes: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Source {
    pub fn from_row(row: &SqliteRow) -> Result<Self> {
        Ok(Self {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            org_type: parse_col(row, "org_type")?,
            trust_level: parse_col(row, "trust_level")?,
            base_url: row.try_get("base_url")?,
            region_focus: json_list(row.try_get("region_focus")?),
            tags: json_list(row.try_get("tags")?),
            crawl_enabled: row.try_get("crawl_enabled")?,
            rate_limit_ms: row.try_get("rate_limit_ms")?,
            notes: row.try_get("notes")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SourceEndpoint {
    pub id: i64,
    pub source_id: i64,
    pub endpoint_url: String,
    pub endpoint_type: EndpointType,
    pub parser_hint: Option<String>,
    pub priority: i64,
    pub enabled: bool,
    pub last_crawled_at: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl SourceEndpoint {
    pub fn from_row(row: &SqliteRow) -> Result<Self> {
        Ok(Self {
            id: row.try_get("id")?,
            source_id: row.try_get("source_id")?,
            endpoint_url: row.try_get("endpoint_url")?,
            endpoint_type: parse_col(row, "endpoint_type")?,
            parser_hint: row.try_get("parser_hint")?,
            priority: row.try_get("priority")?,
            enabled: row.try_get("enabled")?,
            last_crawled_at: row.try_get("last_crawled_at")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

/// A discovered URL and its download/extraction state.
///
/// `extracted_text` is skipped in list responses; use
/// [`crate::documents::get_extracted_text`] for bounded access.
#[derive(Debug, Clone, Serialize)]
pub struct Document {
    pub id: i64,
    pub source_id: Option<i64>,
    pub source_endpoint_id: Option<i64>,
    pub url: String,
    pub canonical_url: Option<String>,
    pub status: DocumentStatus,
    pub content_type: Option<String>,
    pub byte_size: Option<i64>,
    pub sha256_bytes: Option<String>,
    pub fetched_at: Option<i64>,
    #[serde(skip_serializing)]
    pub extracted_text: Option<String>,
    pub extracted_chars: i64,
    pub extracted_at: Option<i64>,
    pub error_message: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Document {
    pub fn from_row(row: &SqliteRow) -> Result<Self> {
        let extracted_text: Option<String> = row.try_get("extracted_text")?;
        Ok(Self {
            id: row.try_get("id")?,
            source_id: row.try_get("source_id")?,
            source_endpoint_id: row.try_get("source_endpoint_id")?,
            url: row.try_get("url")?,
            canonical_url: row.try_get("canonical_url")?,
            status: parse_col(row, "status")?,
            content_type: row.try_get("content_type")?,
            byte_size: row.try_get("byte_size")?,
            sha256_bytes: row.try_get("sha256_bytes")?,
            fetched_at: row.try_get("fetched_at")?,
            extracted_chars: extracted_text
                .as_deref()
                .map(|t| t.chars().count() as i64)
                .unwrap_or(0),
            extracted_text,
            extracted_at: row.try_get("extracted_at")?,
            error_message: row.try_get("error_message")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Challenge {
    pub id: i64,
    pub user_id: Option<i64>,
    pub document_id: Option<i64>,
    pub title: String,
    pub statement: String,
    pub sdg_goals: Option<String>,
    pub geography: Option<String>,
    pub target_groups: Option<String>,
    pub sectors: Option<String>,
    pub source_url: Option<String>,
    pub source_org: Option<String>,
    pub confidence: Option<i64>,
    pub extracted_at: i64,
    pub created_at: i64,
}

impl Challenge {
    pub fn from_row(row: &SqliteRow) -> Result<Self> {
        Ok(Self {
            id: row.try_get("id")?,
            user_id: row.try_get("user_id")?,
            document_id: row.try_get("document_id")?,
            title: row.try_get("title")?,
            statement: row.try_get("statement")?,
            sdg_goals: row.try_get("sdg_goals")?,
            geography: row.try_get("geography")?,
            target_groups: row.try_get("target_groups")?,
            sectors: row.try_get("sectors")?,
            source_url: row.try_get("source_url")?,
            source_org: row.try_get("source_org")?,
            confidence: row.try_get("confidence")?,
            extracted_at: row.try_get("extracted_at")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TechDiscoveryRun {
    pub id: i64,
    pub challenge_id: i64,
    pub user_id: Option<i64>,
    pub model_used: String,
    pub budget_constraint_eur: i64,
    pub challenge_summary: Option<String>,
    pub core_functions: Vec<String>,
    pub underlying_principles: Vec<String>,
    pub confidence: Option<f64>,
    pub prompt_key: Option<String>,
    pub prompt_version: Option<i64>,
    pub prompt_sha256: Option<String>,
    pub status: RunStatus,
    pub error_message: Option<String>,
    pub created_at: i64,
}

impl TechDiscoveryRun {
    pub fn from_row(row: &SqliteRow) -> Result<Self> {
        Ok(Self {
            id: row.try_get("id")?,
            challenge_id: row.try_get("challenge_id")?,
            user_id: row.try_get("user_id")?,
            model_used: row.try_get("model_used")?,
            budget_constraint_eur: row.try_get("budget_constraint_eur")?,
            challenge_summary: row.try_get("challenge_summary")?,
            core_functions: json_list(row.try_get("core_functions")?),
            underlying_principles: json_list(row.try_get("underlying_principles")?),
            confidence: row.try_get("confidence")?,
            prompt_key: row.try_get("prompt_key")?,
            prompt_version: row.try_get("prompt_version")?,
            prompt_sha256: row.try_get("prompt_sha256")?,
            status: parse_col(row, "status")?,
            error_message: row.try_get("error_message")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TechPath {
    pub id: i64,
    pub run_id: i64,
    pub challenge_id: i64,
    pub path_name: String,
    pub path_order: i64,
    pub principles_used: Vec<String>,
    pub technology_classes: Vec<String>,
    pub why_plausible: Option<String>,
    pub estimated_cost_band_eur: Option<String>,
    pub risks_and_unknowns: Vec<String>,
    pub created_at: i64,
}

impl TechPath {
    pub fn from_row(row: &SqliteRow) -> Result<Self> {
        Ok(Self {
            id: row.try_get("id")?,
            run_id: row.try_get("run_id")?,
            challenge_id: row.try_get("challenge_id")?,
            path_name: row.try_get("path_name")?,
            path_order: row.try_get("path_order")?,
            principles_used: json_list(row.try_get("principles_used")?),
            technology_classes: json_list(row.try_get("technology_classes")?),
            why_plausible: row.try_get("why_plausible")?,
            estimated_cost_band_eur: row.try_get("estimated_cost_band_eur")?,
            risks_and_unknowns: json_list(row.try_get("risks_and_unknowns")?),
            created_at: row.try_get("created_at")?,
        })
    }
}

/// Prompt template metadata as synced from the registry file.
#[derive(Debug, Clone, Serialize)]
pub struct PromptTemplate {
    pub id: i64,
    pub key: String,
    pub version: i64,
    pub agent: String,
    pub operation: String,
    pub public_title: String,
    pub public_description: String,
    #[serde(skip_serializing)]
    pub content: String,
    pub sha256: String,
    pub source: String,
    pub created_at: i64,
}

impl PromptTemplate {
    pub fn from_row(row: &SqliteRow) -> Result<Self> {
        Ok(Self {
            id: row.try_get("id")?,
            key: row.try_get("key")?,
            version: row.try_get("version")?,
            agent: row.try_get("agent")?,
            operation: row.try_get("operation")?,
            public_title: row.try_get("public_title")?,
            public_description: row.try_get("public_description")?,
            content: row.try_get("content")?,
            sha256: row.try_get("sha256")?,
            source: row.try_get("source")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enums_round_trip_through_strings() {
        for t in EndpointType::ALL {
            assert_eq!(t.as_str().parse::<EndpointType>().unwrap(), *t);
        }
        assert_eq!("html_list".parse::<EndpointType>().unwrap(), EndpointType::HtmlList);
        assert!("feed".parse::<EndpointType>().is_err());
    }

    #[test]
    fn enum_serde_matches_column_text() {
        let json = serde_json::to_string(&RunStatus::InProgress).unwrap();
        assert_eq!(json, "\"in_progress\"");
        let parsed: OrgType = serde_json::from_str("\"ngo\"").unwrap();
        assert_eq!(parsed, OrgType::Ngo);
    }

    #[test]
    fn json_list_tolerates_bad_input() {
        assert_eq!(json_list(Some("[\"a\",\"b\"]".into())), vec!["a", "b"]);
        assert!(json_list(Some("not json".into())).is_empty());
        assert!(json_list(None).is_empty());
    }
}
