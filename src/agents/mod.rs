//! LLM-backed agents.
//!
//! | Agent | Purpose |
//! |-------|---------|
//! | [`challenge_extractor`] | document text → solution-free challenges |
//! | [`tech_discovery`] | challenge → budget-bounded technology paths |
//! | [`url_suggest`] | free-text query → candidate report URLs |
//!
//! Each agent builds its prompts (from the [`PromptRegistry`](crate::prompts::PromptRegistry)
//! where one is registered), calls a [`ChatModel`](crate::llm::ChatModel) and validates the
//! JSON it gets back. Every call is recorded through [`audit`].

pub mod audit;
pub mod challenge_extractor;
pub mod tech_discovery;
pub mod url_suggest;

use serde::Serialize;

use crate::prompts::PromptRef;

/// Parsed result of one agent call together with what was sent and received.
#[derive(Debug, Clone, Serialize)]
pub struct AgentOutput<T> {
    pub result: T,
    /// `SYSTEM:\n<system>\n\nUSER:\n<user>`.
    pub raw_prompt: String,
    pub raw_response: String,
    pub prompt: Option<PromptRef>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

pub(crate) fn raw_prompt(system: &str, user: &str) -> String {
    format!("SYSTEM:\n{}\n\nUSER:\n{}", system, user)
}

/// Formats an amount with comma thousands separators: `10000` → `10,000`.
pub fn format_thousands(n: i64) -> String {
    let digits = n.unsigned_abs().to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3 + 1);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    if n < 0 {
        format!("-{}", out)
    } else {
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thousands_separators() {
        assert_eq!(format_thousands(0), "0");
        assert_eq!(format_thousands(950), "950");
        assert_eq!(format_thousands(10_000), "10,000");
        assert_eq!(format_thousands(1_234_567), "1,234,567");
        assert_eq!(format_thousands(-2500), "-2,500");
    }
}
