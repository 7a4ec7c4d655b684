use crate::core::embeddings::{EmbeddingIndex, EmbeddingTrainer, TrainerSettings};
use crate::core::error::{MatchingError, Result};
use crate::models::{EventScope, ParticipantId, PredictResponse, TrainResponse};
use crate::services::MatchStore;
use std::sync::Arc;

/// Offline training and lookup of learned compatibility
#[derive(Clone)]
pub struct TrainingPipeline {
    store: Arc<dyn MatchStore>,
    settings: TrainerSettings,
}

impl TrainingPipeline {
    pub fn new(store: Arc<dyn MatchStore>, settings: TrainerSettings) -> Self {
        Self { store, settings }
    }

    /// Train a new model version from a consistent snapshot of `scope`
    ///
    /// Embeddings are written before the metadata row, so a model only
    /// becomes the latest once all of its vectors exist.
    pub async fn train_embeddings(&self, scope: &EventScope, rank: Option<usize>) -> Result<TrainResponse> {
        let mut settings = self.settings;
        if let Some(rank) = rank {
            settings.rank = rank;
        }

        let snapshot = self.store.training_snapshot(scope).await?;
        tracing::info!(
            "Training embeddings for {}: {} records, {} feedback entries, rank {}",
            scope,
            snapshot.records.len(),
            snapshot.feedback.len(),
            settings.rank
        );

        let model = EmbeddingTrainer::new(settings).train(scope, &snapshot)?;

        self.store.persist_embeddings(&model.embeddings).await?;
        self.store.persist_model_metrics(&model.metadata).await?;

        let metadata = &model.metadata;
        tracing::info!(
            "Published model {} for {}: rmse {:.4}, coverage {:.3}",
            metadata.version,
            scope,
            metadata.metrics.rmse,
            metadata.metrics.coverage
        );

        Ok(TrainResponse {
            model_version: metadata.version,
            participant_count: metadata.participant_count,
            rmse: metadata.metrics.rmse,
            coverage: metadata.metrics.coverage,
        })
    }

    /// Learned compatibility of `a` and `b` under the latest model
    pub async fn predict_compatibility(
        &self,
        scope: &EventScope,
        a: ParticipantId,
        b: ParticipantId,
    ) -> Result<PredictResponse> {
        let model = self.store.latest_model(scope).await?.ok_or(MatchingError::NoModel)?;
        let index = EmbeddingIndex::from_model(&model);

        Ok(PredictResponse {
            score: index.predict_score(a, b)?,
            model_version: index.version(),
        })
    }
}
