use crate::core::assignment::solve;
use crate::core::embeddings::EmbeddingIndex;
use crate::core::error::{MatchingError, Result};
use crate::core::filters::{has_complete_survey, mutually_compatible};
use crate::core::narrative::{narrate_or_fallback, templated_reason, NarrativeReasonProvider, NarrativeRequest};
use crate::core::pool::{score_to_cost, Assignment, PreparedPool, DEFAULT_PHANTOM_COST, FORBIDDEN_COST};
use crate::core::scoring::{BlendPolicy, BlendedScorer, Compatibility, CompatibilityScorer, RuleBasedScorer};
use crate::models::{
    EventScope, MatchRecord, Participant, ParticipantId, RoundStats, RunRoundResponse,
    ScoreBreakdown, ScoringWeights,
};
use crate::services::{MatchStore, PoolFilter, StoreError};
use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use uuid::Uuid;

/// Tunables of a round run
#[derive(Debug, Clone, Copy)]
pub struct RoundSettings {
    /// Score given to a pair whose scoring failed
    pub neutral_score: f64,
    /// Extra cost for pairs that already met in an earlier round
    pub repeat_penalty: f64,
    /// Cost of sitting out against the phantom
    pub phantom_cost: f64,
    /// Time box for each narrative reason
    pub narrative_timeout: Duration,
}

impl Default for RoundSettings {
    fn default() -> Self {
        Self {
            neutral_score: 50.0,
            repeat_penalty: 100.0,
            phantom_cost: DEFAULT_PHANTOM_COST,
            narrative_timeout: Duration::from_millis(1500),
        }
    }
}

/// Scores of every ordered pair in the pool
struct ScoreTable {
    scores: Vec<Option<Compatibility>>,
    n: usize,
    degraded: usize,
}

impl ScoreTable {
    fn get(&self, i: usize, j: usize) -> Option<&Compatibility> {
        self.scores[i * self.n + j].as_ref()
    }
}

/// Round orchestrator - runs one matching round end to end
///
/// # Pipeline Stages
/// 1. Pool eligibility (complete surveys, or everyone from the prior round)
/// 2. Pairwise scoring
/// 3. Cost matrix with repeat and preference penalties, phantom padding
/// 4. Minimum-cost perfect matching
/// 5. Narratives, then one atomic write that closes the round
#[derive(Clone)]
pub struct RoundOrchestrator {
    store: Arc<dyn MatchStore>,
    narrator: Arc<dyn NarrativeReasonProvider>,
    weights: ScoringWeights,
    blend: BlendPolicy,
    settings: RoundSettings,
}

impl RoundOrchestrator {
    pub fn new(
        store: Arc<dyn MatchStore>,
        narrator: Arc<dyn NarrativeReasonProvider>,
        weights: ScoringWeights,
        blend: BlendPolicy,
        settings: RoundSettings,
    ) -> Self {
        Self {
            store,
            narrator,
            weights,
            blend,
            settings,
        }
    }

    /// Run `round` for `scope` with the rule-based scorer, blended with the
    /// latest trusted embedding model when one exists
    pub async fn run_round(&self, scope: &EventScope, round: u32) -> Result<RunRoundResponse> {
        let model = self
            .store
            .latest_model(scope)
            .await?
            .map(|m| Arc::new(EmbeddingIndex::from_model(&m)));

        let scorer = BlendedScorer::new(RuleBasedScorer::new(self.weights), model, self.blend);
        self.run_round_with(scope, round, &scorer).await
    }

    /// Run `round` with an explicit scorer
    pub async fn run_round_with(
        &self,
        scope: &EventScope,
        round: u32,
        scorer: &dyn CompatibilityScorer,
    ) -> Result<RunRoundResponse> {
        if round == 0 {
            return Err(MatchingError::InvalidRound(round));
        }

        if !self.store.get_round_records(scope, round).await?.is_empty() {
            return Err(MatchingError::RoundAlreadyComplete(round));
        }

        let pool = self.eligible_pool(scope, round).await?;
        if pool.len() < 2 {
            return Err(MatchingError::InsufficientParticipants(pool.len()));
        }

        tracing::info!(
            "Running round {} for {} with {} participants (scorer: {})",
            round,
            scope,
            pool.len(),
            scorer.name()
        );

        let history = self.previous_pairs(scope, round).await?;
        let table = self.score_pool(&pool, scorer);

        let ids: Vec<ParticipantId> = pool.iter().map(|p| p.id).collect();
        let prepared = PreparedPool::prepare(&ids, self.settings.phantom_cost, |i, j| {
            let (a, b) = (&pool[i], &pool[j]);
            if !mutually_compatible(a, b) {
                return FORBIDDEN_COST;
            }
            let score = table.get(i, j).map(|c| c.score).unwrap_or(self.settings.neutral_score);
            let mut cost = score_to_cost(score);
            if history.contains(&pair_key(a.id, b.id)) {
                cost += self.settings.repeat_penalty;
            }
            cost
        });

        let matching = solve(prepared.costs())?;
        tracing::debug!(
            "Solved round {} for {}: {} pairs, total cost {:.2}",
            round,
            scope,
            matching.pairs.len(),
            matching.total_cost
        );

        let position: HashMap<ParticipantId, usize> = ids.iter().enumerate().map(|(i, id)| (*id, i)).collect();
        let created_at = Utc::now();
        let mut records = Vec::with_capacity(matching.pairs.len());

        for assignment in prepared.resolve(&matching) {
            let record = match assignment {
                Assignment::Pair(a, b) => {
                    let (i, j) = (position[&a], position[&b]);
                    let (first, second) = if a <= b { (i, j) } else { (j, i) };
                    let (score, breakdown) = self.pair_score(&table, first, second);

                    MatchRecord {
                        id: Uuid::new_v4(),
                        event_scope: scope.clone(),
                        round,
                        participant_a: a.min(b),
                        participant_b: Some(a.max(b)),
                        score: Some(score),
                        breakdown,
                        narrative: None,
                        forced: !mutually_compatible(&pool[i], &pool[j]),
                        repeat_pair: history.contains(&pair_key(a, b)),
                        wants_match_a: None,
                        wants_match_b: None,
                        created_at,
                    }
                }
                Assignment::Unmatched(a) => MatchRecord {
                    id: Uuid::new_v4(),
                    event_scope: scope.clone(),
                    round,
                    participant_a: a,
                    participant_b: None,
                    score: None,
                    breakdown: ScoreBreakdown::default(),
                    narrative: None,
                    forced: false,
                    repeat_pair: false,
                    wants_match_a: None,
                    wants_match_b: None,
                    created_at,
                },
            };
            records.push(record);
        }

        records.sort_by_key(|r| (r.participant_b.is_none(), r.participant_a));
        self.attach_narratives(&pool, &position, &mut records).await;

        match self.store.persist_match_records(scope, round, &records).await {
            Ok(()) => {}
            Err(StoreError::RoundClosed { .. }) => return Err(MatchingError::RoundAlreadyComplete(round)),
            Err(e) => return Err(e.into()),
        }

        let stats = round_stats(pool.len(), &records, table.degraded);
        tracing::info!(
            "Closed round {} for {}: {} pairs, {} unmatched, mean score {:.1}",
            round,
            scope,
            stats.pairs,
            stats.unmatched,
            stats.mean_score
        );

        Ok(RunRoundResponse { round, records, stats })
    }

    /// Round 1 takes everyone with a complete survey; later rounds take
    /// everyone who appeared in the previous round's records
    async fn eligible_pool(&self, scope: &EventScope, round: u32) -> Result<Vec<Participant>> {
        let mut pool = if round == 1 {
            self.store
                .get_profiles(scope, &PoolFilter::CompleteSurveys)
                .await?
                .into_iter()
                .filter(has_complete_survey)
                .collect::<Vec<_>>()
        } else {
            let prior = self.store.get_round_records(scope, round - 1).await?;
            if prior.is_empty() {
                return Err(MatchingError::PriorRoundMissing(round - 1));
            }

            let mut ids: Vec<ParticipantId> = prior.iter().flat_map(|r| r.participants()).collect();
            ids.sort_unstable();
            ids.dedup();

            let participants = self.store.get_profiles(scope, &PoolFilter::Ids(ids.clone())).await?;
            let found: HashSet<ParticipantId> = participants.iter().map(|p| p.id).collect();
            if let Some(missing) = ids.iter().find(|id| !found.contains(id)) {
                return Err(MatchingError::MissingProfile(*missing));
            }
            participants
        };

        pool.sort_by_key(|p| p.id);
        pool.dedup_by_key(|p| p.id);
        Ok(pool)
    }

    async fn previous_pairs(&self, scope: &EventScope, round: u32) -> Result<HashSet<(ParticipantId, ParticipantId)>> {
        let mut pairs = HashSet::new();
        for earlier in 1..round {
            for record in self.store.get_round_records(scope, earlier).await? {
                if let Some(key) = record.pair_key() {
                    pairs.insert(key);
                }
            }
        }
        Ok(pairs)
    }

    /// Score every ordered pair; a failed pair degrades to the neutral score
    fn score_pool(&self, pool: &[Participant], scorer: &dyn CompatibilityScorer) -> ScoreTable {
        let n = pool.len();
        let mut scores = vec![None; n * n];
        let mut degraded = 0;

        for i in 0..n {
            for j in 0..n {
                if i == j {
                    continue;
                }
                let compatibility = match scorer.score(&pool[i], &pool[j]) {
                    Ok(c) => c,
                    Err(e) => {
                        tracing::warn!(
                            "Scoring {} -> {} failed ({}), using neutral score {}",
                            pool[i].id,
                            pool[j].id,
                            e,
                            self.settings.neutral_score
                        );
                        degraded += 1;
                        Compatibility::neutral(self.settings.neutral_score)
                    }
                };
                scores[i * n + j] = Some(compatibility);
            }
        }

        ScoreTable { scores, n, degraded }
    }

    /// Pair score is the mean of both directions
    fn pair_score(&self, table: &ScoreTable, i: usize, j: usize) -> (f64, ScoreBreakdown) {
        let neutral = Compatibility::neutral(self.settings.neutral_score);
        let forward = table.get(i, j).unwrap_or(&neutral);
        let backward = table.get(j, i).unwrap_or(&neutral);

        (
            (forward.score + backward.score) / 2.0,
            forward.breakdown.averaged(&backward.breakdown),
        )
    }

    async fn attach_narratives(
        &self,
        pool: &[Participant],
        position: &HashMap<ParticipantId, usize>,
        records: &mut [MatchRecord],
    ) {
        let mut tasks = JoinSet::new();
        for (slot, record) in records.iter().enumerate() {
            let (Some(b), Some(score)) = (record.participant_b, record.score) else {
                continue;
            };
            let request = NarrativeRequest {
                participant_a: record.participant_a,
                participant_b: b,
                score,
                breakdown: record.breakdown.clone(),
                vibe_a: pool[position[&record.participant_a]].profile.vibe.clone(),
                vibe_b: pool[position[&b]].profile.vibe.clone(),
            };
            let narrator = Arc::clone(&self.narrator);
            let timeout = self.settings.narrative_timeout;
            tasks.spawn(async move { (slot, narrate_or_fallback(narrator, request, timeout).await) });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((slot, reason)) => records[slot].narrative = Some(reason),
                Err(e) => tracing::warn!("Narrative task failed: {}", e),
            }
        }

        for record in records.iter_mut() {
            if record.narrative.is_none() {
                if let Some(score) = record.score {
                    record.narrative = Some(templated_reason(score, &record.breakdown));
                }
            }
        }
    }
}

#[inline]
fn pair_key(a: ParticipantId, b: ParticipantId) -> (ParticipantId, ParticipantId) {
    (a.min(b), a.max(b))
}

fn round_stats(pool_size: usize, records: &[MatchRecord], degraded_scores: usize) -> RoundStats {
    let scores: Vec<f64> = records.iter().filter_map(|r| r.score).collect();
    let pairs = scores.len();

    RoundStats {
        pool_size,
        pairs,
        unmatched: records.iter().filter(|r| r.is_unmatched()).count(),
        mean_score: if pairs > 0 {
            scores.iter().sum::<f64>() / pairs as f64
        } else {
            0.0
        },
        min_score: scores.iter().copied().reduce(f64::min).unwrap_or(0.0),
        max_score: scores.iter().copied().reduce(f64::max).unwrap_or(0.0),
        repeat_pairs: records.iter().filter(|r| r.repeat_pair).count(),
        forced_pairs: records.iter().filter(|r| r.forced).count(),
        degraded_scores,
    }
}
