//! Challenge extraction: document text → structured, solution-free
//! challenges.

use anyhow::Result;
use serde::{Deserialize, Serialize};

use super::{raw_prompt, AgentOutput};
use crate::llm::{parse_json_content, ChatModel, ChatRequest, JsonSchemaFormat, LlmError};
use crate::prompts::{render, PromptRegistry};

pub const PROMPT_KEY: &str = "challenge_extractor.extract_challenges";

/// Challenges scored below this are discarded.
pub const MIN_CONFIDENCE: f64 = 60.0;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExtractedChallenge {
    pub title: String,
    pub statement: String,
    #[serde(default)]
    pub sdg_goals: Option<String>,
    #[serde(default)]
    pub geography: Option<String>,
    #[serde(default)]
    pub target_groups: Option<String>,
    #[serde(default)]
    pub sectors: Option<String>,
    /// 0-100.
    pub confidence: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChallengeExtraction {
    pub challenges: Vec<ExtractedChallenge>,
}

fn schema() -> JsonSchemaFormat {
    let nullable = |description: &str| {
        serde_json::json!({ "type": ["string", "null"], "description": description })
    };
    JsonSchemaFormat {
        name: "challenge_extraction".to_string(),
        strict: true,
        schema: serde_json::json!({
            "type": "object",
            "properties": {
                "challenges": {
                    "type": "array",
                    "description": "Extracted challenges from the document",
                    "items": {
                        "type": "object",
                        "properties": {
                            "title": { "type": "string", "description": "Concise title for the challenge (max 100 chars)" },
                            "statement": { "type": "string", "description": "Clear problem statement without solutions" },
                            "sdg_goals": nullable("Relevant SDG goals (comma-separated numbers, e.g. '6,13')"),
                            "geography": nullable("Geographic location or region"),
                            "target_groups": nullable("Target populations or groups affected"),
                            "sectors": nullable("Relevant sectors (e.g. 'Water', 'Agriculture')"),
                            "confidence": { "type": "number", "description": "Confidence score 0-100 for this extraction" }
                        },
                        "required": ["title", "statement", "sdg_goals", "geography", "target_groups", "sectors", "confidence"],
                        "additionalProperties": false
                    }
                }
            },
            "required": ["challenges"],
            "additionalProperties": false
        }),
    }
}

pub async fn extract_challenges(
    model: &dyn ChatModel,
    registry: &PromptRegistry,
    text: &str,
    source_org: Option<&str>,
    source_url: Option<&str>,
) -> Result<AgentOutput<ChallengeExtraction>> {
    let entry = registry.latest(PROMPT_KEY)?;

    let source_org_line = source_org
        .map(|o| format!("Source Organization: {}", o))
        .unwrap_or_default();
    let source_url_line = source_url
        .map(|u| format!("Source URL: {}", u))
        .unwrap_or_default();
    let user = render(
        entry.user_template.as_deref().unwrap_or("{{text}}"),
        &[
            ("source_org_line", source_org_line.as_str()),
            ("source_url_line", source_url_line.as_str()),
            ("text", text),
        ],
    );
    let system = entry.system_prompt.clone();
    let raw_prompt = raw_prompt(&system, &user);

    let response = model
        .complete(ChatRequest {
            system,
            user,
            schema: Some(schema()),
        })
        .await?;

    let value = parse_json_content(&response.content)?;
    let mut result: ChallengeExtraction = serde_json::from_value(value).map_err(|e| {
        LlmError::InvalidJson(format!(
            "challenge extraction response does not match the expected shape: {}",
            e
        ))
    })?;

    let before = result.challenges.len();
    result.challenges.retain(|c| c.confidence >= MIN_CONFIDENCE);
    tracing::debug!(
        returned = before,
        kept = result.challenges.len(),
        "filtered extracted challenges by confidence"
    );

    Ok(AgentOutput {
        result,
        raw_prompt,
        raw_response: response.raw,
        prompt: Some(entry.prompt_ref()),
        warnings: Vec::new(),
    })
}
