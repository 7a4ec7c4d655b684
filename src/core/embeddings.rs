//! Collaborative-filtering embeddings learned from pairwise ratings.
//!
//! Observed ratings (explicit feedback first, rule-based match scores as
//! weak labels otherwise) fill a participant × participant matrix. Missing
//! cells are imputed by iterating a rank-k truncated SVD, and each
//! participant's embedding is the matching row of `U_k · sqrt(S_k)`.
//! A prediction is the dot product of two embeddings, rescaled to 0-100.

use crate::core::error::{MatchingError, Result};
use crate::models::{
    Embedding, EmbeddingModel, EventScope, FeedbackEntry, MatchRecord, ModelMetadata,
    ModelMetrics, ParticipantId, MAX_SCORE,
};
use chrono::Utc;
use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use uuid::Uuid;

/// Where a training label came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LabelSource {
    Feedback,
    MatchScore,
    Symmetrized,
}

/// One directed observed rating, normalized to 0..1
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Observation {
    pub rater: ParticipantId,
    pub ratee: ParticipantId,
    pub value: f64,
    pub source: LabelSource,
}

/// Hyperparameters of a training run
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrainerSettings {
    /// Number of singular components kept
    pub rank: usize,
    /// Hard-impute passes used to fill unobserved cells
    pub impute_iterations: usize,
    /// Multiplier applied to weak labels of mutually consenting pairs
    pub mutual_boost: f64,
    /// Upper bound of a boosted weak label
    pub boost_cap: f64,
}

impl Default for TrainerSettings {
    fn default() -> Self {
        Self {
            rank: 2,
            impute_iterations: 50,
            mutual_boost: 1.2,
            boost_cap: 1.0,
        }
    }
}

/// Consistent view of the data a training run reads
#[derive(Debug, Clone, Default)]
pub struct TrainingSnapshot {
    pub records: Vec<MatchRecord>,
    pub feedback: Vec<FeedbackEntry>,
}

/// Turn feedback and match records into directed observations
///
/// Feedback for a directed cell (averaged when submitted more than once)
/// takes precedence. A real pairing without feedback yields a weak label
/// from its match score, boosted for mutual matches and capped at
/// `boost_cap` (never above 1.0). A cell known in one direction only is
/// mirrored into the other.
pub fn collect_observations(snapshot: &TrainingSnapshot, settings: &TrainerSettings) -> Vec<Observation> {
    let mut feedback_sums: BTreeMap<(ParticipantId, ParticipantId), (f64, usize)> = BTreeMap::new();
    for entry in &snapshot.feedback {
        if entry.rater == entry.ratee {
            continue;
        }
        if let Some(signal) = entry.primary_signal() {
            let cell = feedback_sums.entry((entry.rater, entry.ratee)).or_insert((0.0, 0));
            cell.0 += signal;
            cell.1 += 1;
        }
    }

    let mut cells: BTreeMap<(ParticipantId, ParticipantId), (f64, LabelSource)> = feedback_sums
        .into_iter()
        .map(|(key, (sum, count))| (key, (sum / count as f64, LabelSource::Feedback)))
        .collect();

    let cap = settings.boost_cap.min(1.0);
    let mut weak: BTreeMap<(ParticipantId, ParticipantId), (f64, usize)> = BTreeMap::new();
    for record in &snapshot.records {
        let (Some(b), Some(score)) = (record.participant_b, record.score) else {
            continue;
        };
        let a = record.participant_a;
        if a == b {
            continue;
        }

        let mut label = (score / MAX_SCORE).clamp(0.0, 1.0);
        if record.mutual_match() == Some(true) {
            label = (label * settings.mutual_boost).min(cap);
        }

        for key in [(a, b), (b, a)] {
            let cell = weak.entry(key).or_insert((0.0, 0));
            cell.0 += label;
            cell.1 += 1;
        }
    }

    for (key, (sum, count)) in weak {
        cells
            .entry(key)
            .or_insert((sum / count as f64, LabelSource::MatchScore));
    }

    let mirrored: Vec<((ParticipantId, ParticipantId), f64)> = cells
        .iter()
        .filter(|((r, e), _)| !cells.contains_key(&(*e, *r)))
        .map(|((r, e), (value, _))| ((*e, *r), *value))
        .collect();
    for (key, value) in mirrored {
        cells.insert(key, (value, LabelSource::Symmetrized));
    }

    cells
        .into_iter()
        .map(|((rater, ratee), (value, source))| Observation {
            rater,
            ratee,
            value,
            source,
        })
        .collect()
}

/// Participant embeddings of one trained model, indexed for lookup
#[derive(Debug, Clone)]
pub struct EmbeddingIndex {
    metadata: ModelMetadata,
    vectors: HashMap<ParticipantId, Vec<f64>>,
}

impl EmbeddingIndex {
    pub fn from_model(model: &EmbeddingModel) -> Self {
        let vectors = model
            .embeddings
            .iter()
            .map(|e| (e.participant_id, e.vector.clone()))
            .collect();

        Self {
            metadata: model.metadata.clone(),
            vectors,
        }
    }

    pub fn version(&self) -> Uuid {
        self.metadata.version
    }

    pub fn metrics(&self) -> &ModelMetrics {
        &self.metadata.metrics
    }

    pub fn contains(&self, participant: ParticipantId) -> bool {
        self.vectors.contains_key(&participant)
    }

    fn vector(&self, participant: ParticipantId) -> Result<&[f64]> {
        self.vectors
            .get(&participant)
            .map(Vec::as_slice)
            .ok_or(MatchingError::NoEmbedding(participant))
    }

    /// Raw predicted rating on the 0..1 scale (unclamped)
    pub fn predict_raw(&self, a: ParticipantId, b: ParticipantId) -> Result<f64> {
        Ok(dot(self.vector(a)?, self.vector(b)?))
    }

    /// Predicted compatibility on the 0-100 display scale
    pub fn predict_score(&self, a: ParticipantId, b: ParticipantId) -> Result<f64> {
        Ok(to_display_score(self.predict_raw(a, b)?))
    }
}

#[inline]
fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// Rescale a 0..1 rating into the clamped 0-100 display range
#[inline]
pub fn to_display_score(raw: f64) -> f64 {
    if raw.is_finite() {
        (raw * MAX_SCORE).clamp(0.0, MAX_SCORE)
    } else {
        0.0
    }
}

/// Truncated SVD pieces, components ordered by singular value descending
struct Factorization {
    u: DMatrix<f64>,
    v_t: DMatrix<f64>,
    singular: Vec<f64>,
    order: Vec<usize>,
}

impl Factorization {
    fn of(matrix: &DMatrix<f64>, rank: usize) -> Option<Self> {
        let svd = matrix.clone().svd(true, true);
        let u = svd.u?;
        let v_t = svd.v_t?;
        let singular: Vec<f64> = svd.singular_values.iter().copied().collect();

        let mut order: Vec<usize> = (0..singular.len()).collect();
        order.sort_by(|a, b| {
            singular[*b]
                .partial_cmp(&singular[*a])
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.cmp(b))
        });
        order.truncate(rank);

        Some(Self {
            u,
            v_t,
            singular,
            order,
        })
    }

    fn reconstruct(&self, i: usize, j: usize) -> f64 {
        self.order
            .iter()
            .map(|&c| self.u[(i, c)] * self.singular[c] * self.v_t[(c, j)])
            .sum()
    }

    fn embedding_row(&self, i: usize) -> Vec<f64> {
        self.order
            .iter()
            .map(|&c| self.u[(i, c)] * self.singular[c].max(0.0).sqrt())
            .collect()
    }
}

/// Trains embedding models from a snapshot of ratings
#[derive(Debug, Clone, Default)]
pub struct EmbeddingTrainer {
    settings: TrainerSettings,
}

impl EmbeddingTrainer {
    pub fn new(settings: TrainerSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &TrainerSettings {
        &self.settings
    }

    /// Train a new model version for `scope`
    pub fn train(&self, scope: &EventScope, snapshot: &TrainingSnapshot) -> Result<EmbeddingModel> {
        let observations = collect_observations(snapshot, &self.settings);
        self.fit(scope, &observations)
    }

    /// Factorize a set of observations into a new model version
    pub fn fit(&self, scope: &EventScope, observations: &[Observation]) -> Result<EmbeddingModel> {
        let participants: Vec<ParticipantId> = observations
            .iter()
            .flat_map(|o| [o.rater, o.ratee])
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        let n = participants.len();
        if n < 2 {
            return Err(MatchingError::InsufficientTrainingData(n));
        }
        if self.settings.rank == 0 {
            return Err(MatchingError::InvalidConfig("training rank must be at least 1".to_string()));
        }

        let position: HashMap<ParticipantId, usize> =
            participants.iter().enumerate().map(|(i, id)| (*id, i)).collect();

        let mut observed = vec![false; n * n];
        let mut matrix = DMatrix::<f64>::zeros(n, n);
        let mut sum = 0.0;
        for obs in observations {
            let (i, j) = (position[&obs.rater], position[&obs.ratee]);
            matrix[(i, j)] = obs.value;
            observed[i * n + j] = true;
        }
        let observed_cells = observed.iter().filter(|o| **o).count();
        for i in 0..n {
            for j in 0..n {
                if observed[i * n + j] {
                    sum += matrix[(i, j)];
                }
            }
        }
        let mean = sum / observed_cells as f64;

        for i in 0..n {
            for j in 0..n {
                if !observed[i * n + j] {
                    matrix[(i, j)] = mean;
                }
            }
        }

        let rank = self.settings.rank.min(n);
        let mut factors = Factorization::of(&matrix, rank)
            .ok_or_else(|| MatchingError::InvalidConfig("SVD did not produce singular vectors".to_string()))?;

        for _ in 0..self.settings.impute_iterations {
            for i in 0..n {
                for j in 0..n {
                    if !observed[i * n + j] {
                        matrix[(i, j)] = factors.reconstruct(i, j);
                    }
                }
            }
            factors = Factorization::of(&matrix, rank)
                .ok_or_else(|| MatchingError::InvalidConfig("SVD did not produce singular vectors".to_string()))?;
        }

        let version = Uuid::new_v4();
        let embeddings: Vec<Embedding> = participants
            .iter()
            .enumerate()
            .map(|(i, id)| Embedding {
                participant_id: *id,
                model_version: version,
                vector: factors.embedding_row(i),
            })
            .collect();

        let squared_error: f64 = observations
            .iter()
            .map(|obs| {
                let a = &embeddings[position[&obs.rater]].vector;
                let b = &embeddings[position[&obs.ratee]].vector;
                (dot(a, b) - obs.value).powi(2)
            })
            .sum();
        let rmse = (squared_error / observations.len() as f64).sqrt();
        let coverage = observed_cells as f64 / (n * (n - 1)) as f64;

        tracing::info!(
            "Trained model {} for {}: {} participants, rank {}, rmse {:.4}, coverage {:.3}",
            version,
            scope,
            n,
            rank,
            rmse,
            coverage
        );

        Ok(EmbeddingModel {
            metadata: ModelMetadata {
                version,
                event_scope: scope.clone(),
                rank,
                participant_count: n,
                metrics: ModelMetrics {
                    rmse,
                    coverage,
                    observed_cells,
                },
                trained_at: Utc::now(),
            },
            embeddings,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{FeedbackRatings, ScoreBreakdown};

    fn scope() -> EventScope {
        EventScope::new("test-event")
    }

    fn record(a: i64, b: i64, score: f64, consent: (Option<bool>, Option<bool>)) -> MatchRecord {
        MatchRecord {
            id: Uuid::new_v4(),
            event_scope: scope(),
            round: 1,
            participant_a: a,
            participant_b: Some(b),
            score: Some(score),
            breakdown: ScoreBreakdown::default(),
            narrative: None,
            forced: false,
            repeat_pair: false,
            wants_match_a: consent.0,
            wants_match_b: consent.1,
            created_at: Utc::now(),
        }
    }

    fn feedback(rater: i64, ratee: i64, overall: u8) -> FeedbackEntry {
        FeedbackEntry {
            event_scope: scope(),
            round: 1,
            rater,
            ratee,
            ratings: FeedbackRatings {
                overall: Some(overall),
                ..FeedbackRatings::default()
            },
        }
    }

    fn find(observations: &[Observation], rater: i64, ratee: i64) -> Observation {
        *observations
            .iter()
            .find(|o| o.rater == rater && o.ratee == ratee)
            .unwrap()
    }

    #[test]
    fn test_feedback_takes_precedence_over_match_score() {
        let snapshot = TrainingSnapshot {
            records: vec![record(1, 2, 40.0, (None, None))],
            feedback: vec![feedback(1, 2, 90)],
        };

        let obs = collect_observations(&snapshot, &TrainerSettings::default());
        let forward = find(&obs, 1, 2);
        assert_eq!(forward.source, LabelSource::Feedback);
        assert!((forward.value - 0.9).abs() < 1e-9);

        let backward = find(&obs, 2, 1);
        assert_eq!(backward.source, LabelSource::MatchScore);
        assert!((backward.value - 0.4).abs() < 1e-9);
    }

    #[test]
    fn test_mutual_boost_is_capped() {
        let settings = TrainerSettings {
            mutual_boost: 1.5,
            boost_cap: 1.0,
            ..TrainerSettings::default()
        };
        let snapshot = TrainingSnapshot {
            records: vec![
                record(1, 2, 90.0, (Some(true), Some(true))),
                record(3, 4, 50.0, (Some(true), Some(true))),
                record(5, 6, 50.0, (Some(true), Some(false))),
            ],
            feedback: vec![],
        };

        let obs = collect_observations(&snapshot, &settings);
        assert_eq!(find(&obs, 1, 2).value, 1.0);
        assert!((find(&obs, 3, 4).value - 0.75).abs() < 1e-9);
        assert!((find(&obs, 5, 6).value - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_one_directional_feedback_is_mirrored() {
        let snapshot = TrainingSnapshot {
            records: vec![],
            feedback: vec![feedback(1, 2, 70)],
        };

        let obs = collect_observations(&snapshot, &TrainerSettings::default());
        let mirrored = find(&obs, 2, 1);
        assert_eq!(mirrored.source, LabelSource::Symmetrized);
        assert!((mirrored.value - 0.7).abs() < 1e-9);
    }

    #[test]
    fn test_unmatched_records_are_ignored() {
        let mut unmatched = record(1, 2, 0.0, (None, None));
        unmatched.participant_b = None;
        unmatched.score = None;
        let snapshot = TrainingSnapshot {
            records: vec![unmatched],
            feedback: vec![],
        };

        assert!(collect_observations(&snapshot, &TrainerSettings::default()).is_empty());
    }

    #[test]
    fn test_training_requires_two_participants() {
        let trainer = EmbeddingTrainer::default();
        let result = trainer.train(&scope(), &TrainingSnapshot::default());
        assert!(matches!(result, Err(MatchingError::InsufficientTrainingData(0))));
    }

    #[test]
    fn test_low_rank_structure_is_recovered() {
        // Ratings generated from rank-2 latent factors, every off-diagonal cell observed
        let latent: Vec<[f64; 2]> = vec![
            [0.60, 0.20],
            [0.55, 0.35],
            [0.30, 0.60],
            [0.25, 0.65],
            [0.50, 0.50],
            [0.65, 0.10],
            [0.20, 0.55],
            [0.40, 0.45],
        ];
        let mut observations = Vec::new();
        for (i, x) in latent.iter().enumerate() {
            for (j, y) in latent.iter().enumerate() {
                if i != j {
                    observations.push(Observation {
                        rater: i as i64 + 1,
                        ratee: j as i64 + 1,
                        value: x[0] * y[0] + x[1] * y[1],
                        source: LabelSource::Feedback,
                    });
                }
            }
        }

        let trainer = EmbeddingTrainer::new(TrainerSettings {
            rank: 2,
            impute_iterations: 200,
            ..TrainerSettings::default()
        });
        let model = trainer.fit(&scope(), &observations).unwrap();

        assert_eq!(model.metadata.participant_count, 8);
        assert!(model.metadata.metrics.rmse < 0.05, "rmse {}", model.metadata.metrics.rmse);
        assert!((model.metadata.metrics.coverage - 1.0).abs() < 1e-9);
        assert!(model.embeddings.iter().all(|e| e.vector.len() == 2));
    }

    #[test]
    fn test_prediction_requires_embedding() {
        let observations = vec![
            Observation {
                rater: 1,
                ratee: 2,
                value: 0.8,
                source: LabelSource::Feedback,
            },
            Observation {
                rater: 2,
                ratee: 1,
                value: 0.8,
                source: LabelSource::Feedback,
            },
        ];
        let model = EmbeddingTrainer::default().fit(&scope(), &observations).unwrap();
        let index = EmbeddingIndex::from_model(&model);

        let score = index.predict_score(1, 2).unwrap();
        assert!((0.0..=100.0).contains(&score));
        assert!(matches!(index.predict_score(1, 99), Err(MatchingError::NoEmbedding(99))));
    }

    #[test]
    fn test_display_score_is_clamped() {
        assert_eq!(to_display_score(1.7), 100.0);
        assert_eq!(to_display_score(-0.2), 0.0);
        assert!((to_display_score(0.42) - 42.0).abs() < 1e-9);
        assert_eq!(to_display_score(f64::NAN), 0.0);
    }
}
