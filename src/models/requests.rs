use serde::{Deserialize, Serialize};
use validator::Validate;
use crate::models::domain::ParticipantId;

/// Request to record one side's consent on a pairing
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct SubmitConsentRequest {
    #[validate(range(min = 0))]
    #[serde(alias = "participant_id", rename = "participantId")]
    pub participant_id: ParticipantId,
    #[serde(alias = "wants_match", rename = "wantsMatch")]
    pub wants_match: bool,
}

/// Request to train a new embedding model version
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct TrainEmbeddingsRequest {
    /// Overrides the configured number of retained singular components
    #[validate(range(min = 1, max = 64))]
    #[serde(default)]
    pub rank: Option<usize>,
}

/// Query for a learned compatibility prediction
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct PredictQuery {
    #[validate(range(min = 0))]
    pub a: ParticipantId,
    #[validate(range(min = 0))]
    pub b: ParticipantId,
}
