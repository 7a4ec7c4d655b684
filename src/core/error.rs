use crate::models::{PairId, ParticipantId};
use crate::services::StoreError;
use thiserror::Error;

/// Errors surfaced by the matching engine operations
#[derive(Debug, Error)]
pub enum MatchingError {
    #[error("Insufficient participants: pool has {0}, need at least 2")]
    InsufficientParticipants(usize),

    #[error("Round {0} is already complete")]
    RoundAlreadyComplete(u32),

    #[error("Round {0} has no closed records")]
    PriorRoundMissing(u32),

    #[error("Invalid round number: {0}")]
    InvalidRound(u32),

    #[error("Malformed cost matrix: {0}")]
    MalformedMatrix(#[from] SolverError),

    #[error("Missing profile for participant {0}")]
    MissingProfile(ParticipantId),

    #[error("Insufficient training data: {0} distinguishable participants")]
    InsufficientTrainingData(usize),

    #[error("No embedding for participant {0}")]
    NoEmbedding(ParticipantId),

    #[error("No trained model for this event")]
    NoModel,

    #[error("Unknown pairing: {0}")]
    UnknownPair(PairId),

    #[error("Participant {participant} is not part of pairing {pair_id}")]
    NotInPair {
        pair_id: PairId,
        participant: ParticipantId,
    },

    #[error("Pairing {0} has no partner to consent to")]
    NoPartner(PairId),

    #[error("Consent is only collected for round 1 pairings (pairing is from round {0})")]
    ConsentClosed(u32),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Storage error: {0}")]
    Store(#[from] StoreError),
}

impl MatchingError {
    /// Machine-readable error kind
    pub fn kind(&self) -> &'static str {
        match self {
            MatchingError::InsufficientParticipants(_) => "insufficient_participants",
            MatchingError::RoundAlreadyComplete(_) => "round_already_complete",
            MatchingError::PriorRoundMissing(_) => "prior_round_missing",
            MatchingError::InvalidRound(_) => "invalid_round",
            MatchingError::MalformedMatrix(_) => "malformed_matrix",
            MatchingError::MissingProfile(_) => "missing_profile",
            MatchingError::InsufficientTrainingData(_) => "insufficient_training_data",
            MatchingError::NoEmbedding(_) => "no_embedding",
            MatchingError::NoModel => "no_model",
            MatchingError::UnknownPair(_) => "unknown_pair",
            MatchingError::NotInPair { .. } => "not_in_pair",
            MatchingError::NoPartner(_) => "no_partner",
            MatchingError::ConsentClosed(_) => "consent_closed",
            MatchingError::InvalidConfig(_) => "invalid_config",
            MatchingError::Store(_) => "storage_error",
        }
    }

    /// HTTP status code used by the route layer
    pub fn status_code(&self) -> u16 {
        match self {
            MatchingError::InsufficientParticipants(_)
            | MatchingError::InsufficientTrainingData(_)
            | MatchingError::MalformedMatrix(_) => 422,
            MatchingError::RoundAlreadyComplete(_)
            | MatchingError::PriorRoundMissing(_)
            | MatchingError::NoPartner(_)
            | MatchingError::ConsentClosed(_) => 409,
            MatchingError::InvalidRound(_) | MatchingError::NotInPair { .. } => 400,
            MatchingError::MissingProfile(_)
            | MatchingError::NoEmbedding(_)
            | MatchingError::NoModel
            | MatchingError::UnknownPair(_) => 404,
            MatchingError::InvalidConfig(_) | MatchingError::Store(_) => 500,
        }
    }
}

/// Errors raised by the assignment solver for unusable input
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SolverError {
    #[error("matrix is empty")]
    Empty,

    #[error("row {row} has {len} columns, expected {expected}")]
    NotSquare {
        row: usize,
        len: usize,
        expected: usize,
    },

    #[error("matrix size {0} is odd; pad with a phantom first")]
    OddSize(usize),

    #[error("non-finite cost at ({row}, {col})")]
    NonFinite { row: usize, col: usize },

    #[error("solver left {0} slots unmatched")]
    Incomplete(usize),
}

/// Errors from a single pairwise scoring call
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ScoringError {
    #[error("cannot score participant {0} against itself")]
    SelfPair(ParticipantId),

    #[error("no embedding for participant {0}")]
    NoEmbedding(ParticipantId),

    #[error("score is not a finite number")]
    NonFinite,
}

pub type Result<T> = std::result::Result<T, MatchingError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds_and_status() {
        let err = MatchingError::RoundAlreadyComplete(2);
        assert_eq!(err.kind(), "round_already_complete");
        assert_eq!(err.status_code(), 409);
        assert_eq!(err.to_string(), "Round 2 is already complete");

        let err = MatchingError::from(SolverError::OddSize(5));
        assert_eq!(err.kind(), "malformed_matrix");
        assert_eq!(err.status_code(), 422);
    }
}
