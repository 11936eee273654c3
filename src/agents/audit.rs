//! Structured audit trail for agent calls.
//!
//! Entries are emitted as single-line JSON on the `agent_audit` tracing
//! target, so they can be routed separately, e.g.
//! `RUST_LOG=info,agent_audit=info`.

use serde::Serialize;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AgentName {
    ChallengeExtractor,
    TechnologyDiscovery,
    UrlSuggest,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuditStatus {
    Success,
    Error,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEntry {
    pub timestamp: String,
    pub agent: AgentName,
    pub operation: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub challenge_id: Option<i64>,
    pub model: String,
    pub raw_prompt: String,
    pub raw_response: String,
    pub status: AuditStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

impl AuditEntry {
    pub fn success(
        agent: AgentName,
        operation: &str,
        model: &str,
        raw_prompt: &str,
        raw_response: &str,
    ) -> Self {
        Self {
            timestamp: chrono::Utc::now().to_rfc3339(),
            agent,
            operation: operation.to_string(),
            user_id: None,
            challenge_id: None,
            model: model.to_string(),
            raw_prompt: raw_prompt.to_string(),
            raw_response: raw_response.to_string(),
            status: AuditStatus::Success,
            error_message: None,
            metadata: None,
        }
    }

    pub fn error(
        agent: AgentName,
        operation: &str,
        model: &str,
        raw_prompt: &str,
        error_message: &str,
    ) -> Self {
        Self {
            raw_response: String::new(),
            status: AuditStatus::Error,
            error_message: Some(error_message.to_string()),
            ..Self::success(agent, operation, model, raw_prompt, "")
        }
    }

    pub fn user(mut self, user_id: Option<i64>) -> Self {
        self.user_id = user_id;
        self
    }

    pub fn challenge(mut self, challenge_id: i64) -> Self {
        self.challenge_id = Some(challenge_id);
        self
    }

    pub fn metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

pub fn log_agent_interaction(entry: &AuditEntry) {
    match serde_json::to_string(entry) {
        Ok(json) => tracing::info!(target: "agent_audit", "{}", json),
        Err(e) => tracing::warn!(target: "agent_audit", error = %e, "failed to serialize audit entry"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_entries_serialize_camel_case() {
        let entry = AuditEntry::error(
            AgentName::TechnologyDiscovery,
            "discover_paths",
            "gpt-4o-mini",
            "SYSTEM:\nx",
            "boom",
        )
        .challenge(7)
        .metadata(serde_json::json!({"budgetEur": 5000}));

        let v = serde_json::to_value(&entry).unwrap();
        assert_eq!(v["agent"], "technology_discovery");
        assert_eq!(v["status"], "error");
        assert_eq!(v["errorMessage"], "boom");
        assert_eq!(v["challengeId"], 7);
        assert_eq!(v["rawResponse"], "");
        assert!(v.get("userId").is_none());
    }
}
