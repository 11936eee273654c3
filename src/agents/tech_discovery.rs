//! Technology discovery: challenge → functions → principles → technology
//! classes → a few budget-bounded paths.

use anyhow::Result;
use serde::{Deserialize, Serialize};

use super::{format_thousands, raw_prompt, AgentOutput};
use crate::llm::{parse_json_content, ChatModel, ChatRequest, JsonSchemaFormat, LlmError};
use crate::models::Challenge;
use crate::prompts::{render, PromptRegistry};

pub const PROMPT_KEY: &str = "technology_discovery.discover_paths";
pub const DEFAULT_BUDGET_EUR: i64 = 10_000;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TechnologyPath {
    pub path_name: String,
    pub principles_used: Vec<String>,
    pub technology_classes: Vec<String>,
    pub why_plausible: String,
    /// Free text such as `"€500-€2,000"`.
    pub estimated_cost_band_eur: String,
    pub risks_and_unknowns: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TechDiscovery {
    pub challenge_summary: String,
    pub core_functions: Vec<String>,
    pub underlying_principles: Vec<String>,
    pub technology_paths: Vec<TechnologyPath>,
    /// 0-1.
    pub confidence: f64,
}

fn schema() -> JsonSchemaFormat {
    let strings = |description: &str| {
        serde_json::json!({ "type": "array", "description": description, "items": { "type": "string" } })
    };
    JsonSchemaFormat {
        name: "tech_discovery".to_string(),
        strict: true,
        schema: serde_json::json!({
            "type": "object",
            "properties": {
                "challenge_summary": { "type": "string", "description": "Brief restatement of the challenge in 1-2 sentences" },
                "core_functions": strings("Core functions that must be performed to address the challenge"),
                "underlying_principles": strings("Physical, chemical, or mechanical principles that enable these functions"),
                "technology_paths": {
                    "type": "array",
                    "description": "2-3 plausible technology paths within the budget",
                    "items": {
                        "type": "object",
                        "properties": {
                            "path_name": { "type": "string", "description": "Descriptive name for this technology path" },
                            "principles_used": strings("Which underlying principles this path leverages"),
                            "technology_classes": strings("Technology classes (NOT brands or products) that enable this path"),
                            "why_plausible": { "type": "string", "description": "Why this path is feasible under the constraints" },
                            "estimated_cost_band_eur": { "type": "string", "description": "Cost range in euros (e.g. '€500-€2000')" },
                            "risks_and_unknowns": strings("Key risks, assumptions, or unknowns for this path")
                        },
                        "required": ["path_name", "principles_used", "technology_classes", "why_plausible", "estimated_cost_band_eur", "risks_and_unknowns"],
                        "additionalProperties": false
                    }
                },
                "confidence": { "type": "number", "description": "Confidence score 0-1 for the overall discovery" }
            },
            "required": ["challenge_summary", "core_functions", "underlying_principles", "technology_paths", "confidence"],
            "additionalProperties": false
        }),
    }
}

/// Upper bound of a cost band such as `"€500-€2,000"`. Bands without a
/// range, or whose upper bound has no leading digits, yield 0.
pub fn max_cost_eur(band: &str) -> i64 {
    let Some((_, upper)) = band.split_once(['-', '–']) else {
        return 0;
    };
    let cleaned: String = upper
        .chars()
        .filter(|c| *c != '€' && *c != ',')
        .collect();
    let digits: String = cleaned
        .trim_start()
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect();
    digits.parse().unwrap_or(0)
}

/// One warning per path whose cost band exceeds the budget.
pub fn budget_warnings(result: &TechDiscovery, budget_eur: i64) -> Vec<String> {
    result
        .technology_paths
        .iter()
        .filter(|p| max_cost_eur(&p.estimated_cost_band_eur) > budget_eur)
        .map(|p| {
            format!(
                "Path \"{}\" exceeds budget constraint ({} > €{})",
                p.path_name,
                p.estimated_cost_band_eur,
                format_thousands(budget_eur)
            )
        })
        .collect()
}

fn context_lines(challenge: &Challenge) -> String {
    [
        ("SDG Goals", &challenge.sdg_goals),
        ("Geography", &challenge.geography),
        ("Target Groups", &challenge.target_groups),
        ("Sectors", &challenge.sectors),
    ]
    .iter()
    .filter_map(|(label, value)| {
        value
            .as_deref()
            .filter(|v| !v.is_empty())
            .map(|v| format!("{}: {}", label, v))
    })
    .collect::<Vec<_>>()
    .join("\n")
}

pub async fn discover_technology_paths(
    model: &dyn ChatModel,
    registry: &PromptRegistry,
    challenge: &Challenge,
    budget_eur: Option<i64>,
) -> Result<AgentOutput<TechDiscovery>> {
    let budget_eur = budget_eur.unwrap_or(DEFAULT_BUDGET_EUR);
    let entry = registry.latest(PROMPT_KEY)?;

    let budget = format_thousands(budget_eur);
    let context = context_lines(challenge);
    let vars = [
        ("budget_eur", budget.as_str()),
        ("title", challenge.title.as_str()),
        ("statement", challenge.statement.as_str()),
        ("context_lines", context.as_str()),
    ];
    let system = render(&entry.system_prompt, &vars);
    let user = render(entry.user_template.as_deref().unwrap_or(""), &vars);
    let raw_prompt = raw_prompt(&system, &user);

    let response = model
        .complete(ChatRequest {
            system,
            user,
            schema: Some(schema()),
        })
        .await?;

    let value = parse_json_content(&response.content)?;
    let result: TechDiscovery = serde_json::from_value(value).map_err(|e| {
        LlmError::InvalidJson(format!(
            "technology discovery response does not match the expected shape: {}",
            e
        ))
    })?;

    let warnings = budget_warnings(&result, budget_eur);
    for w in &warnings {
        tracing::warn!(challenge_id = challenge.id, "{}", w);
    }

    Ok(AgentOutput {
        result,
        raw_prompt,
        raw_response: response.raw,
        prompt: Some(entry.prompt_ref()),
        warnings,
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::agents::challenge_extractor::tests::registry;
    use crate::llm::tests::ScriptedChat;

    pub(crate) const DISCOVERY: &str = r#"{
        "challenge_summary": "Villages need safe water.",
        "core_functions": ["lift water", "disinfect"],
        "underlying_principles": ["photovoltaics", "UV-C"],
        "technology_paths": [
          {"path_name": "Solar pumping", "principles_used": ["photovoltaics"],
           "technology_classes": ["solar panels", "DC pumps"], "why_plausible": "cheap",
           "estimated_cost_band_eur": "€1,500-€4,000", "risks_and_unknowns": ["theft"]},
          {"path_name": "Treatment plant", "principles_used": ["UV-C"],
           "technology_classes": ["UV reactors"], "why_plausible": "proven",
           "estimated_cost_band_eur": "€8,000-€25,000", "risks_and_unknowns": []}
        ],
        "confidence": 0.72
    }"#;

    pub(crate) fn challenge() -> Challenge {
        Challenge {
            id: 3,
            user_id: None,
            document_id: None,
            title: "Rural water access".into(),
            statement: "Villages lack safe water.".into(),
            sdg_goals: Some("6".into()),
            geography: None,
            target_groups: Some("".into()),
            sectors: Some("Water".into()),
            source_url: None,
            source_org: None,
            confidence: Some(85),
            extracted_at: 0,
            created_at: 0,
        }
    }

    #[test]
    fn cost_band_upper_bound() {
        assert_eq!(max_cost_eur("€500-€2,000"), 2000);
        assert_eq!(max_cost_eur("€500 - €12,500 EUR"), 12500);
        assert_eq!(max_cost_eur("500–900"), 900);
        assert_eq!(max_cost_eur("about €3000"), 0);
        assert_eq!(max_cost_eur("€100-"), 0);
    }

    #[tokio::test]
    async fn renders_budget_and_warns_on_overrun() {
        let chat = ScriptedChat::replying(DISCOVERY);
        let out = discover_technology_paths(&chat, &registry(), &challenge(), Some(12_000))
            .await
            .unwrap();

        assert_eq!(out.result.technology_paths.len(), 2);
        assert_eq!(out.warnings.len(), 1);
        assert!(out.warnings[0].contains("Treatment plant"));
        assert!(out.warnings[0].contains("€12,000"));

        assert!(out.raw_prompt.contains("SYSTEM:\nBudget: €12,000 maximum"));
        assert!(out.raw_prompt.contains("SDG Goals: 6\nSectors: Water"));
        assert!(!out.raw_prompt.contains("Target Groups"));
        assert!(out.raw_prompt.contains("Maximum budget: €12,000"));
    }

    #[tokio::test]
    async fn default_budget_is_ten_thousand() {
        let chat = ScriptedChat::replying(DISCOVERY);
        let out = discover_technology_paths(&chat, &registry(), &challenge(), None)
            .await
            .unwrap();
        assert!(out.raw_prompt.contains("€10,000 maximum"));
    }

    #[tokio::test]
    async fn wrong_shape_reply_is_invalid_json() {
        let chat = ScriptedChat::replying(r#"{"paths": "none"}"#);
        let err = discover_technology_paths(&chat, &registry(), &challenge(), None)
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<LlmError>(),
            Some(LlmError::InvalidJson(m)) if m.contains("expected shape")
        ));
    }
}
