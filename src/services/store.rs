use crate::core::embeddings::TrainingSnapshot;
use crate::models::{
    ConsentSide, Embedding, EmbeddingModel, EventScope, FeedbackEntry, MatchRecord,
    ModelMetadata, PairId, Participant, ParticipantId,
};
use async_trait::async_trait;
use thiserror::Error;

/// Errors that can occur in the storage layer
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("SQLx error: {0}")]
    SqlxError(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    MigrateError(#[from] sqlx::migrate::MigrateError),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Round {round} of {scope} is already closed")]
    RoundClosed { scope: EventScope, round: u32 },

    #[error("Integrity violation: {0}")]
    Integrity(String),
}

/// Which participants to load
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PoolFilter {
    /// Everyone with a submitted survey
    CompleteSurveys,
    /// Exactly these participants
    Ids(Vec<ParticipantId>),
}

/// Durable storage consumed by the matching engine
///
/// Every method is scoped by event. Round records are written once per
/// round in a single atomic call; afterwards only the consent flags change,
/// one side at a time.
#[async_trait]
pub trait MatchStore: Send + Sync {
    /// Load participants matching `filter`
    async fn get_profiles(&self, scope: &EventScope, filter: &PoolFilter) -> Result<Vec<Participant>, StoreError>;

    /// Records of a closed round (empty if the round is not closed)
    async fn get_round_records(&self, scope: &EventScope, round: u32) -> Result<Vec<MatchRecord>, StoreError>;

    /// Close `round` by writing all of its records at once
    ///
    /// Fails with [`StoreError::RoundClosed`] if the round already has records.
    async fn persist_match_records(
        &self,
        scope: &EventScope,
        round: u32,
        records: &[MatchRecord],
    ) -> Result<(), StoreError>;

    async fn get_record(&self, scope: &EventScope, pair_id: PairId) -> Result<Option<MatchRecord>, StoreError>;

    /// Atomically set one side's consent flag and return the updated record
    async fn set_consent(
        &self,
        scope: &EventScope,
        pair_id: PairId,
        side: ConsentSide,
        wants_match: bool,
    ) -> Result<MatchRecord, StoreError>;

    async fn get_feedback(&self, scope: &EventScope) -> Result<Vec<FeedbackEntry>, StoreError>;

    /// Records of all closed rounds plus all feedback, read consistently
    async fn training_snapshot(&self, scope: &EventScope) -> Result<TrainingSnapshot, StoreError>;

    async fn persist_embeddings(&self, embeddings: &[Embedding]) -> Result<(), StoreError>;

    /// Publish a model version; it becomes the latest for its scope
    async fn persist_model_metrics(&self, metadata: &ModelMetadata) -> Result<(), StoreError>;

    async fn latest_model(&self, scope: &EventScope) -> Result<Option<EmbeddingModel>, StoreError>;

    async fn health_check(&self) -> Result<bool, StoreError>;
}
