use serde::{Deserialize, Serialize};
use uuid::Uuid;
use crate::models::domain::{ConsentSide, ContactInfo, MatchRecord, PairId};

/// Aggregate figures for one completed round
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RoundStats {
    pub pool_size: usize,
    pub pairs: usize,
    pub unmatched: usize,
    pub mean_score: f64,
    pub min_score: f64,
    pub max_score: f64,
    pub repeat_pairs: usize,
    pub forced_pairs: usize,
    pub degraded_scores: usize,
}

/// Response for a round run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRoundResponse {
    pub round: u32,
    pub records: Vec<MatchRecord>,
    pub stats: RoundStats,
}

/// Response for a consent submission
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsentResponse {
    #[serde(rename = "pairId")]
    pub pair_id: PairId,
    pub side: ConsentSide,
    #[serde(rename = "wantsMatch")]
    pub wants_match: bool,
    #[serde(rename = "mutualMatch")]
    pub mutual_match: Option<bool>,
    /// Present only when both sides said yes
    #[serde(rename = "partnerContact")]
    pub partner_contact: Option<ContactInfo>,
}

/// Response for an embedding training run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainResponse {
    #[serde(rename = "modelVersion")]
    pub model_version: Uuid,
    #[serde(rename = "participantCount")]
    pub participant_count: usize,
    pub rmse: f64,
    pub coverage: f64,
}

/// Response for a learned compatibility prediction
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictResponse {
    pub score: f64,
    #[serde(rename = "modelVersion")]
    pub model_version: Uuid,
}

/// Health check response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

/// Error response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
    pub status_code: u16,
}
