//! AI analysis records — one immutable session per oracle invocation, plus the
//! derived prospect insight and scheduling recommendation (at most one each per
//! flow, overwritten on re-analysis).

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::flow::status::PriorityLevel;
use crate::qualify::oracle::OracleVerdict;

/// What a session analyzed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisKind {
    /// Qualify/disqualify scoring.
    Qualification,
    /// Buying-intent estimate.
    Intent,
    /// Meeting-parameter optimization (duration, urgency, curated picks).
    SchedulingOptimization,
    /// Human verdict after oracle retries ran out.
    ManualReview,
}

impl AnalysisKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Qualification => "qualification",
            Self::Intent => "intent",
            Self::SchedulingOptimization => "scheduling_optimization",
            Self::ManualReview => "manual_review",
        }
    }
}

impl std::fmt::Display for AnalysisKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for AnalysisKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "qualification" => Ok(Self::Qualification),
            "intent" => Ok(Self::Intent),
            "scheduling_optimization" => Ok(Self::SchedulingOptimization),
            "manual_review" => Ok(Self::ManualReview),
            other => Err(format!("unknown analysis kind: {other}")),
        }
    }
}

/// One oracle invocation, success or failure. Never mutated after insert.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiAnalysisSession {
    pub id: Uuid,
    pub flow_id: Uuid,
    pub kind: AnalysisKind,
    /// Structured input payload sent to the oracle.
    pub input: serde_json::Value,
    /// Raw oracle text, kept for audit even when parsing failed.
    pub raw_response: Option<String>,
    /// Parsed verdict, when the response was usable.
    pub parsed: Option<OracleVerdict>,
    pub confidence: Option<f32>,
    pub was_successful: bool,
    /// Zero-based attempt index within one gateway invocation.
    pub retry_count: u32,
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub cost: Decimal,
    pub created_at: DateTime<Utc>,
}

impl AiAnalysisSession {
    /// Session for a successful oracle attempt.
    pub fn succeeded(
        flow_id: Uuid,
        kind: AnalysisKind,
        input: serde_json::Value,
        raw_response: String,
        verdict: OracleVerdict,
        retry_count: u32,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            flow_id,
            kind,
            input,
            raw_response: Some(raw_response),
            confidence: Some(verdict.confidence),
            parsed: Some(verdict),
            was_successful: true,
            retry_count,
            input_tokens: 0,
            output_tokens: 0,
            cost: Decimal::ZERO,
            created_at: Utc::now(),
        }
    }

    /// Session for a failed attempt (timeout, transport error, unparseable).
    pub fn failed(
        flow_id: Uuid,
        kind: AnalysisKind,
        input: serde_json::Value,
        raw_response: Option<String>,
        retry_count: u32,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            flow_id,
            kind,
            input,
            raw_response,
            parsed: None,
            confidence: None,
            was_successful: false,
            retry_count,
            input_tokens: 0,
            output_tokens: 0,
            cost: Decimal::ZERO,
            created_at: Utc::now(),
        }
    }

    pub fn with_usage(mut self, input_tokens: u32, output_tokens: u32, cost: Decimal) -> Self {
        self.input_tokens = input_tokens;
        self.output_tokens = output_tokens;
        self.cost = cost;
        self
    }
}

/// Derived description of the prospect. At most one per flow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProspectInsight {
    pub id: Uuid,
    pub flow_id: Uuid,
    pub summary: String,
    pub pain_points: Vec<String>,
    pub buying_signals: Vec<String>,
    pub recommended_approach: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ProspectInsight {
    pub fn new(flow_id: Uuid, summary: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            flow_id,
            summary: summary.into(),
            pain_points: Vec::new(),
            buying_signals: Vec::new(),
            recommended_approach: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Derived optimal meeting parameters. At most one per flow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulingRecommendation {
    pub id: Uuid,
    pub flow_id: Uuid,
    pub recommended_duration_minutes: u32,
    pub urgency: PriorityLevel,
    /// Curated candidate slots (2–3), picked from real availability.
    pub curated_slot_ids: Vec<Uuid>,
    pub curated_slots_generated: bool,
    pub curated_sent_at: Option<DateTime<Utc>>,
    pub curated_viewed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SchedulingRecommendation {
    pub fn new(flow_id: Uuid, duration_minutes: u32, urgency: PriorityLevel) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            flow_id,
            recommended_duration_minutes: duration_minutes,
            urgency,
            curated_slot_ids: Vec::new(),
            curated_slots_generated: false,
            curated_sent_at: None,
            curated_viewed_at: None,
            created_at: now,
            updated_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn usage_is_attached_to_the_session() {
        let session = AiAnalysisSession::succeeded(
            Uuid::new_v4(),
            AnalysisKind::Qualification,
            serde_json::json!({}),
            "{}".into(),
            crate::qualify::oracle::OracleVerdict::scored(70, 0.8),
            0,
        )
        .with_usage(1200, 240, dec!(0.0042));
        assert_eq!(session.input_tokens, 1200);
        assert_eq!(session.cost, dec!(0.0042));
    }

    #[test]
    fn failed_session_has_no_verdict() {
        let session = AiAnalysisSession::failed(
            Uuid::new_v4(),
            AnalysisKind::Qualification,
            serde_json::json!({"answers": []}),
            None,
            2,
        );
        assert!(!session.was_successful);
        assert!(session.parsed.is_none());
        assert_eq!(session.retry_count, 2);
    }

    #[test]
    fn kind_string_roundtrip() {
        for kind in [
            AnalysisKind::Qualification,
            AnalysisKind::Intent,
            AnalysisKind::SchedulingOptimization,
            AnalysisKind::ManualReview,
        ] {
            let parsed: AnalysisKind = kind.as_str().parse().unwrap();
            assert_eq!(parsed, kind);
        }
    }
}
