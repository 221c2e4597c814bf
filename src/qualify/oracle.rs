//! Scoring-oracle trait and the rig-core LLM adapter behind it.
//!
//! The engine never talks to a provider SDK directly; everything goes through
//! `ScoringOracle` so tests can substitute a stub and the gateway can apply
//! timeouts and retries uniformly.

use async_trait::async_trait;
use rig::client::CompletionClient;
use rig::completion::Prompt;
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};

use crate::analysis::AnalysisKind;
use crate::error::OracleError;

/// Supported oracle backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OracleBackend {
    Anthropic,
    OpenAi,
}

/// Configuration for creating an oracle.
#[derive(Debug, Clone)]
pub struct OracleConfig {
    pub backend: OracleBackend,
    pub api_key: secrecy::SecretString,
    pub model: String,
}

/// Request sent to the oracle.
#[derive(Debug, Clone)]
pub struct OracleRequest {
    pub kind: AnalysisKind,
    pub system_prompt: String,
    pub user_prompt: String,
    /// Structured copy of the input, recorded on the analysis session.
    pub input: serde_json::Value,
}

/// Parsed oracle output.
///
/// Scores are optional: the oracle may abstain from a numeric score (the
/// rule-based aggregate then stands alone), but it always reports confidence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OracleVerdict {
    /// 0–100 qualification score.
    #[serde(default)]
    pub score: Option<u8>,
    /// 1–100 buying-intent estimate.
    #[serde(default)]
    pub intent_score: Option<u8>,
    #[serde(default)]
    pub reasons: Vec<String>,
    /// 0–1 self-reported confidence.
    pub confidence: f32,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub pain_points: Vec<String>,
    #[serde(default)]
    pub buying_signals: Vec<String>,
    #[serde(default)]
    pub recommended_approach: Option<String>,
    #[serde(default)]
    pub recommended_duration_minutes: Option<u32>,
    /// For scheduling-optimization analyses: indexes into the candidate slot
    /// list offered in the prompt.
    #[serde(default)]
    pub curated_slot_indexes: Vec<usize>,
}

impl OracleVerdict {
    /// Minimal verdict with a score and confidence; everything else empty.
    pub fn scored(score: u8, confidence: f32) -> Self {
        Self {
            score: Some(score),
            intent_score: None,
            reasons: Vec::new(),
            confidence,
            summary: None,
            pain_points: Vec::new(),
            buying_signals: Vec::new(),
            recommended_approach: None,
            recommended_duration_minutes: None,
            curated_slot_indexes: Vec::new(),
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reasons.push(reason.into());
        self
    }
}

/// Raw + parsed response from one oracle call.
#[derive(Debug, Clone)]
pub struct OracleResponse {
    pub raw: String,
    pub verdict: OracleVerdict,
}

/// Opaque scoring oracle. One call per analysis attempt.
#[async_trait]
pub trait ScoringOracle: Send + Sync {
    /// Model identifier for logging and session records.
    fn model_name(&self) -> &str;

    /// Run one analysis. The caller owns timeout and retry policy.
    async fn analyze(&self, request: &OracleRequest) -> Result<OracleResponse, OracleError>;
}

/// rig-core-backed oracle, generic over the provider's completion model.
pub struct LlmOracle<M: rig::completion::CompletionModel> {
    agent: rig::agent::Agent<M>,
    model: String,
}

impl<M: rig::completion::CompletionModel> LlmOracle<M> {
    pub fn new(agent: rig::agent::Agent<M>, model: &str) -> Self {
        Self {
            agent,
            model: model.to_string(),
        }
    }
}

#[async_trait]
impl<M: rig::completion::CompletionModel> ScoringOracle for LlmOracle<M> {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn analyze(&self, request: &OracleRequest) -> Result<OracleResponse, OracleError> {
        let prompt = format!("{}\n\n{}", request.system_prompt, request.user_prompt);
        let raw = self
            .agent
            .prompt(prompt)
            .await
            .map_err(|e| OracleError::RequestFailed {
                reason: e.to_string(),
            })?;

        let verdict = parse_verdict(&raw)?;
        Ok(OracleResponse { raw, verdict })
    }
}

/// Create an oracle from configuration.
pub fn create_oracle(
    config: &OracleConfig,
) -> Result<std::sync::Arc<dyn ScoringOracle>, OracleError> {
    match config.backend {
        OracleBackend::Anthropic => {
            use rig::providers::anthropic;

            let client: anthropic::Client = anthropic::Client::new(config.api_key.expose_secret()).map_err(|e| {
                OracleError::RequestFailed {
                    reason: format!("Failed to create Anthropic client: {e}"),
                }
            })?;
            let agent = client.agent(&config.model).temperature(0.1).max_tokens(1024).build();
            tracing::info!(model = %config.model, "Using Anthropic scoring oracle");
            Ok(std::sync::Arc::new(LlmOracle::new(agent, &config.model)))
        }
        OracleBackend::OpenAi => {
            use rig::providers::openai;

            let client: openai::Client = openai::Client::new(config.api_key.expose_secret()).map_err(|e| {
                OracleError::RequestFailed {
                    reason: format!("Failed to create OpenAI client: {e}"),
                }
            })?;
            let agent = client.agent(&config.model).temperature(0.1).max_tokens(1024).build();
            tracing::info!(model = %config.model, "Using OpenAI scoring oracle");
            Ok(std::sync::Arc::new(LlmOracle::new(agent, &config.model)))
        }
    }
}

/// Parse an oracle reply into a verdict.
///
/// Models wrap JSON in markdown fences often enough that we strip them before
/// parsing. Anything unparseable is `InvalidResponse`, which the gateway treats
/// as a failed (non-retryable-as-is, still recorded) attempt.
pub fn parse_verdict(raw: &str) -> Result<OracleVerdict, OracleError> {
    let trimmed = raw.trim();
    let body = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|s| s.strip_suffix("```"))
        .unwrap_or(trimmed)
        .trim();

    let verdict: OracleVerdict =
        serde_json::from_str(body).map_err(|e| OracleError::InvalidResponse {
            reason: format!("{e}: {}", body.chars().take(120).collect::<String>()),
        })?;

    if let Some(score) = verdict.score {
        if score > 100 {
            return Err(OracleError::InvalidResponse {
                reason: format!("score {score} out of range"),
            });
        }
    }
    if !(0.0..=1.0).contains(&verdict.confidence) {
        return Err(OracleError::InvalidResponse {
            reason: format!("confidence {} out of range", verdict.confidence),
        });
    }
    Ok(verdict)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_json() {
        let raw = r#"{"score": 78, "confidence": 0.9, "reasons": ["budget fits"]}"#;
        let verdict = parse_verdict(raw).unwrap();
        assert_eq!(verdict.score, Some(78));
        assert_eq!(verdict.reasons.len(), 1);
    }

    #[test]
    fn strips_markdown_fences() {
        let raw = "```json\n{\"score\": 55, \"confidence\": 0.7}\n```";
        let verdict = parse_verdict(raw).unwrap();
        assert_eq!(verdict.score, Some(55));
    }

    #[test]
    fn rejects_out_of_range_values() {
        assert!(parse_verdict(r#"{"score": 140, "confidence": 0.5}"#).is_err());
        assert!(parse_verdict(r#"{"score": 50, "confidence": 1.4}"#).is_err());
    }

    #[test]
    fn rejects_non_json() {
        let err = parse_verdict("the prospect looks great!").unwrap_err();
        assert!(matches!(err, OracleError::InvalidResponse { .. }));
    }

    #[tokio::test]
    async fn create_oracle_accepts_any_key_at_construction() {
        // rig clients validate keys at request time, not construction.
        let config = OracleConfig {
            backend: OracleBackend::Anthropic,
            api_key: secrecy::SecretString::from("test-key"),
            model: "claude-sonnet-4-20250514".to_string(),
        };
        let oracle = create_oracle(&config);
        assert!(oracle.is_ok());
        assert_eq!(oracle.unwrap().model_name(), "claude-sonnet-4-20250514");
    }
}
