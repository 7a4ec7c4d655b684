use crate::core::embeddings::TrainingSnapshot;
use crate::models::{
    ConsentSide, Embedding, EmbeddingModel, EventScope, FeedbackEntry, MatchRecord,
    ModelMetadata, PairId, Participant,
};
use crate::services::store::{MatchStore, PoolFilter, StoreError};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Debug, Default)]
struct MemoryState {
    participants: HashMap<EventScope, BTreeMap<i64, Participant>>,
    rounds: HashMap<(EventScope, u32), Vec<PairId>>,
    records: HashMap<PairId, MatchRecord>,
    feedback: HashMap<EventScope, Vec<FeedbackEntry>>,
    embeddings: HashMap<Uuid, Vec<Embedding>>,
    models: Vec<ModelMetadata>,
}

/// In-process store used for local runs and tests
///
/// A single lock guards the whole state, so each trait call is atomic and
/// a training snapshot never observes a half-written round.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    state: RwLock<MemoryState>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn upsert_participant(&self, scope: &EventScope, participant: Participant) {
        let mut state = self.state.write().await;
        state
            .participants
            .entry(scope.clone())
            .or_default()
            .insert(participant.id, participant);
    }

    pub async fn add_feedback(&self, entry: FeedbackEntry) {
        let mut state = self.state.write().await;
        state
            .feedback
            .entry(entry.event_scope.clone())
            .or_default()
            .push(entry);
    }
}

#[async_trait]
impl MatchStore for InMemoryStore {
    async fn get_profiles(&self, scope: &EventScope, filter: &PoolFilter) -> Result<Vec<Participant>, StoreError> {
        let state = self.state.read().await;
        let Some(participants) = state.participants.get(scope) else {
            return Ok(vec![]);
        };

        let selected = match filter {
            PoolFilter::CompleteSurveys => participants
                .values()
                .filter(|p| p.survey_complete)
                .cloned()
                .collect(),
            PoolFilter::Ids(ids) => ids
                .iter()
                .filter_map(|id| participants.get(id).cloned())
                .collect(),
        };
        Ok(selected)
    }

    async fn get_round_records(&self, scope: &EventScope, round: u32) -> Result<Vec<MatchRecord>, StoreError> {
        let state = self.state.read().await;
        let records = state
            .rounds
            .get(&(scope.clone(), round))
            .map(|ids| ids.iter().filter_map(|id| state.records.get(id).cloned()).collect())
            .unwrap_or_default();
        Ok(records)
    }

    async fn persist_match_records(
        &self,
        scope: &EventScope,
        round: u32,
        records: &[MatchRecord],
    ) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        let key = (scope.clone(), round);
        if state.rounds.contains_key(&key) {
            return Err(StoreError::RoundClosed {
                scope: scope.clone(),
                round,
            });
        }
        if let Some(bad) = records.iter().find(|r| r.round != round || &r.event_scope != scope) {
            return Err(StoreError::Integrity(format!(
                "record {} belongs to {} round {}",
                bad.id, bad.event_scope, bad.round
            )));
        }

        let ids: Vec<PairId> = records.iter().map(|r| r.id).collect();
        for record in records {
            state.records.insert(record.id, record.clone());
        }
        state.rounds.insert(key, ids);
        Ok(())
    }

    async fn get_record(&self, scope: &EventScope, pair_id: PairId) -> Result<Option<MatchRecord>, StoreError> {
        let state = self.state.read().await;
        Ok(state
            .records
            .get(&pair_id)
            .filter(|r| &r.event_scope == scope)
            .cloned())
    }

    async fn set_consent(
        &self,
        scope: &EventScope,
        pair_id: PairId,
        side: ConsentSide,
        wants_match: bool,
    ) -> Result<MatchRecord, StoreError> {
        let mut state = self.state.write().await;
        let record = state
            .records
            .get_mut(&pair_id)
            .filter(|r| &r.event_scope == scope)
            .ok_or_else(|| StoreError::NotFound(format!("pairing {}", pair_id)))?;

        match side {
            ConsentSide::A => record.wants_match_a = Some(wants_match),
            ConsentSide::B => record.wants_match_b = Some(wants_match),
        }
        Ok(record.clone())
    }

    async fn get_feedback(&self, scope: &EventScope) -> Result<Vec<FeedbackEntry>, StoreError> {
        let state = self.state.read().await;
        Ok(state.feedback.get(scope).cloned().unwrap_or_default())
    }

    async fn training_snapshot(&self, scope: &EventScope) -> Result<TrainingSnapshot, StoreError> {
        let state = self.state.read().await;
        let mut rounds: Vec<u32> = state
            .rounds
            .keys()
            .filter(|(s, _)| s == scope)
            .map(|(_, r)| *r)
            .collect();
        rounds.sort_unstable();

        let records = rounds
            .iter()
            .flat_map(|r| state.rounds[&(scope.clone(), *r)].iter())
            .filter_map(|id| state.records.get(id).cloned())
            .collect();

        Ok(TrainingSnapshot {
            records,
            feedback: state.feedback.get(scope).cloned().unwrap_or_default(),
        })
    }

    async fn persist_embeddings(&self, embeddings: &[Embedding]) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        for embedding in embeddings {
            state
                .embeddings
                .entry(embedding.model_version)
                .or_default()
                .push(embedding.clone());
        }
        Ok(())
    }

    async fn persist_model_metrics(&self, metadata: &ModelMetadata) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        if state.models.iter().any(|m| m.version == metadata.version) {
            return Err(StoreError::Integrity(format!(
                "model version {} already published",
                metadata.version
            )));
        }
        state.models.push(metadata.clone());
        Ok(())
    }

    async fn latest_model(&self, scope: &EventScope) -> Result<Option<EmbeddingModel>, StoreError> {
        let state = self.state.read().await;
        let latest = state
            .models
            .iter()
            .filter(|m| &m.event_scope == scope)
            .max_by_key(|m| m.trained_at);

        Ok(latest.map(|metadata| EmbeddingModel {
            metadata: metadata.clone(),
            embeddings: state
                .embeddings
                .get(&metadata.version)
                .cloned()
                .unwrap_or_default(),
        }))
    }

    async fn health_check(&self) -> Result<bool, StoreError> {
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{FeedbackRatings, ScoreBreakdown};
    use chrono::Utc;

    fn record(scope: &EventScope, round: u32) -> MatchRecord {
        MatchRecord {
            id: Uuid::new_v4(),
            event_scope: scope.clone(),
            round,
            participant_a: 1,
            participant_b: Some(2),
            score: Some(60.0),
            breakdown: ScoreBreakdown::default(),
            narrative: None,
            forced: false,
            repeat_pair: false,
            wants_match_a: None,
            wants_match_b: None,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_round_can_only_be_closed_once() {
        let store = InMemoryStore::new();
        let scope = EventScope::new("spring");

        store.persist_match_records(&scope, 1, &[record(&scope, 1)]).await.unwrap();
        let second = store.persist_match_records(&scope, 1, &[record(&scope, 1)]).await;

        assert!(matches!(second, Err(StoreError::RoundClosed { round: 1, .. })));
        assert_eq!(store.get_round_records(&scope, 1).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_consent_updates_only_one_side() {
        let store = InMemoryStore::new();
        let scope = EventScope::new("spring");
        let rec = record(&scope, 1);
        store.persist_match_records(&scope, 1, &[rec.clone()]).await.unwrap();

        store.set_consent(&scope, rec.id, ConsentSide::A, true).await.unwrap();
        let updated = store.set_consent(&scope, rec.id, ConsentSide::B, false).await.unwrap();

        assert_eq!(updated.wants_match_a, Some(true));
        assert_eq!(updated.wants_match_b, Some(false));
        assert_eq!(updated.score, rec.score);
    }

    #[tokio::test]
    async fn test_records_are_scoped_by_event() {
        let store = InMemoryStore::new();
        let scope = EventScope::new("spring");
        let other = EventScope::new("autumn");
        let rec = record(&scope, 1);
        store.persist_match_records(&scope, 1, &[rec.clone()]).await.unwrap();

        assert!(store.get_record(&other, rec.id).await.unwrap().is_none());
        assert!(store.set_consent(&other, rec.id, ConsentSide::A, true).await.is_err());
    }

    #[tokio::test]
    async fn test_feedback_is_scoped_and_matches_snapshot() {
        let store = InMemoryStore::new();
        let scope = EventScope::new("spring");
        let other = EventScope::new("autumn");
        for (event, rater) in [(&scope, 1), (&scope, 2), (&other, 3)] {
            store
                .add_feedback(FeedbackEntry {
                    event_scope: event.clone(),
                    round: 1,
                    rater,
                    ratee: rater + 10,
                    ratings: FeedbackRatings {
                        overall: Some(80),
                        ..FeedbackRatings::default()
                    },
                })
                .await;
        }

        let feedback = store.get_feedback(&scope).await.unwrap();
        let raters: Vec<i64> = feedback.iter().map(|f| f.rater).collect();
        assert_eq!(raters, vec![1, 2]);

        let snapshot = store.training_snapshot(&scope).await.unwrap();
        assert_eq!(snapshot.feedback, feedback);
        assert!(store.get_feedback(&EventScope::new("winter")).await.unwrap().is_empty());
    }
}
