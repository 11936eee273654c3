//! Model-assisted URL discovery for report and publication pages.

use anyhow::Result;

use super::{raw_prompt, AgentOutput};
use crate::config::Config;
use crate::llm::{create_model, parse_json_content, ChatModel, ChatRequest};

pub const MAX_URLS_LIMIT: usize = 200;

fn system_prompt(max_urls: usize) -> String {
    [
        "You are a web research assistant.".to_string(),
        "Return ONLY strict JSON (no markdown, no prose).".to_string(),
        r#"Output schema: {"urls": string[]}."#.to_string(),
        "Rules:".to_string(),
        format!("- Include at most {} URLs", max_urls),
        "- Prefer direct report/document URLs (PDF) or stable publication pages".to_string(),
        "- Focus on Europe (NL/DE/FR/Nordics/EU) when relevant".to_string(),
        "- Exclude social media, login pages, and irrelevant marketing".to_string(),
    ]
    .join("\n")
}

fn user_prompt(query: &str) -> String {
    [
        "Find URLs for reports/publications that describe actual SDG-related projects/programs.",
        "Query:",
        query,
    ]
    .join("\n\n")
}

/// Asks the model for up to `max_urls` (clamped to 1..=200) candidate URLs.
/// Non-string and non-`http` entries are dropped; an empty reply yields an
/// empty list.
pub async fn suggest_urls(
    model: &dyn ChatModel,
    query: &str,
    max_urls: usize,
) -> Result<AgentOutput<Vec<String>>> {
    let max_urls = max_urls.clamp(1, MAX_URLS_LIMIT);
    let system = system_prompt(max_urls);
    let user = user_prompt(query);
    let raw_prompt = raw_prompt(&system, &user);

    let response = model
        .complete(ChatRequest {
            system,
            user,
            schema: None,
        })
        .await?;

    let value = parse_json_content(&response.content)?;
    let urls: Vec<String> = value["urls"]
        .as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(|u| u.as_str())
                .filter(|u| u.starts_with("http"))
                .take(max_urls)
                .map(|u| u.to_string())
                .collect()
        })
        .unwrap_or_default();

    Ok(AgentOutput {
        result: urls,
        raw_prompt,
        raw_response: response.raw,
        prompt: None,
        warnings: Vec::new(),
    })
}

/// `sdg suggest-urls <query>`: one URL per line, nothing is stored.
pub async fn run_suggest(config: &Config, query: &str, max_urls: usize) -> Result<()> {
    if query.trim().is_empty() {
        anyhow::bail!("query must not be empty");
    }
    let model = create_model(&config.suggest);
    let output = suggest_urls(model.as_ref(), query, max_urls).await?;
    for url in &output.result {
        println!("{}", url);
    }
    eprintln!("{} URLs suggested by {}", output.result.len(), model.model_name());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::tests::ScriptedChat;

    #[tokio::test]
    async fn keeps_http_strings_up_to_limit() {
        let chat = ScriptedChat::replying(
            r#"Here you go: {"urls": ["https://a.eu/r.pdf", 5, "ftp://x", "http://b.eu", "https://c.eu"]}"#,
        );
        let out = suggest_urls(&chat, "water reports", 2).await.unwrap();
        assert_eq!(out.result, vec!["https://a.eu/r.pdf", "http://b.eu"]);
        assert!(out.raw_prompt.contains("at most 2 URLs"));
    }

    #[tokio::test]
    async fn clamps_limit_and_tolerates_missing_key() {
        let chat = ScriptedChat::replying(r#"{"links": []}"#);
        let out = suggest_urls(&chat, "q", 0).await.unwrap();
        assert!(out.result.is_empty());
        assert!(out.raw_prompt.contains("at most 1 URLs"));

        let chat = ScriptedChat::replying(r#"{"urls": []}"#);
        let out = suggest_urls(&chat, "q", 10_000).await.unwrap();
        assert!(out.raw_prompt.contains("at most 200 URLs"));
    }
}
