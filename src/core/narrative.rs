use crate::models::{Factor, ParticipantId, ScoreBreakdown};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Errors from a narrative reason provider
#[derive(Debug, Error)]
pub enum NarrativeError {
    #[error("HTTP request failed: {0}")]
    RequestError(#[from] reqwest::Error),

    #[error("Service returned error: {0}")]
    ApiError(String),

    #[error("Invalid response format: {0}")]
    InvalidResponse(String),

    #[error("Timed out after {0:?}")]
    Timeout(Duration),
}

/// What a provider is told about a finished pairing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NarrativeRequest {
    #[serde(rename = "participantA")]
    pub participant_a: ParticipantId,
    #[serde(rename = "participantB")]
    pub participant_b: ParticipantId,
    pub score: f64,
    pub breakdown: ScoreBreakdown,
    #[serde(rename = "vibeA")]
    pub vibe_a: Vec<String>,
    #[serde(rename = "vibeB")]
    pub vibe_b: Vec<String>,
}

/// Produces a free-text explanation for a pairing
#[async_trait]
pub trait NarrativeReasonProvider: Send + Sync {
    async fn narrate(&self, request: &NarrativeRequest) -> Result<String, NarrativeError>;
}

/// Provider that always answers with the templated reason
#[derive(Debug, Clone, Default)]
pub struct TemplateNarrator;

#[async_trait]
impl NarrativeReasonProvider for TemplateNarrator {
    async fn narrate(&self, request: &NarrativeRequest) -> Result<String, NarrativeError> {
        Ok(templated_reason(request.score, &request.breakdown))
    }
}

/// Reason string built from the two strongest factors
pub fn templated_reason(score: f64, breakdown: &ScoreBreakdown) -> String {
    let top: Vec<&'static str> = breakdown
        .ranked()
        .into_iter()
        .filter(|(factor, contribution)| *contribution > 0.0 && *factor != Factor::Neutral)
        .take(2)
        .map(|(factor, _)| factor.label())
        .collect();

    match top.as_slice() {
        [] => format!("Paired to keep the round balanced (compatibility {:.0}).", score),
        [only] => format!("Strongest common ground: {} (compatibility {:.0}).", only, score),
        [first, second, ..] => format!(
            "Strongest common ground: {} and {} (compatibility {:.0}).",
            first, second, score
        ),
    }
}

/// Ask the provider for a reason, falling back to the template on error
/// or when `timeout` elapses
pub async fn narrate_or_fallback(
    provider: Arc<dyn NarrativeReasonProvider>,
    request: NarrativeRequest,
    timeout: Duration,
) -> String {
    match tokio::time::timeout(timeout, provider.narrate(&request)).await {
        Ok(Ok(reason)) if !reason.trim().is_empty() => reason,
        Ok(Ok(_)) => {
            tracing::warn!(
                "Empty narrative for {} / {}, using template",
                request.participant_a,
                request.participant_b
            );
            templated_reason(request.score, &request.breakdown)
        }
        Ok(Err(e)) => {
            tracing::warn!(
                "Narrative provider failed for {} / {}: {}",
                request.participant_a,
                request.participant_b,
                e
            );
            templated_reason(request.score, &request.breakdown)
        }
        Err(_) => {
            tracing::warn!(
                "Narrative for {} / {}: {}, using template",
                request.participant_a,
                request.participant_b,
                NarrativeError::Timeout(timeout)
            );
            templated_reason(request.score, &request.breakdown)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct SlowNarrator;

    #[async_trait]
    impl NarrativeReasonProvider for SlowNarrator {
        async fn narrate(&self, _request: &NarrativeRequest) -> Result<String, NarrativeError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok("too late".to_string())
        }
    }

    struct FailingNarrator;

    #[async_trait]
    impl NarrativeReasonProvider for FailingNarrator {
        async fn narrate(&self, _request: &NarrativeRequest) -> Result<String, NarrativeError> {
            Err(NarrativeError::ApiError("unavailable".to_string()))
        }
    }

    fn request() -> NarrativeRequest {
        let mut breakdown = ScoreBreakdown::default();
        breakdown.insert(Factor::Values, 20.0);
        breakdown.insert(Factor::Attachment, 15.0);
        breakdown.insert(Factor::Vibe, 2.0);
        NarrativeRequest {
            participant_a: 1,
            participant_b: 2,
            score: 37.0,
            breakdown,
            vibe_a: vec![],
            vibe_b: vec![],
        }
    }

    #[test]
    fn test_templated_reason_names_top_factors() {
        let req = request();
        let reason = templated_reason(req.score, &req.breakdown);
        assert_eq!(
            reason,
            "Strongest common ground: core values and attachment style (compatibility 37)."
        );
    }

    #[test]
    fn test_templated_reason_without_factors() {
        let reason = templated_reason(50.0, &ScoreBreakdown::default());
        assert!(reason.contains("balanced"));
    }

    #[tokio::test]
    async fn test_timeout_falls_back_to_template() {
        let reason = narrate_or_fallback(Arc::new(SlowNarrator), request(), Duration::from_millis(20)).await;
        assert!(reason.starts_with("Strongest common ground"));
    }

    #[tokio::test]
    async fn test_failure_falls_back_to_template() {
        let reason = narrate_or_fallback(Arc::new(FailingNarrator), request(), Duration::from_secs(1)).await;
        assert!(reason.contains("core values"));
    }
}
