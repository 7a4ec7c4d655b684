use crate::core::embeddings::EmbeddingIndex;
use crate::core::error::ScoringError;
use crate::models::{
    ActivityLevel, AttachmentStyle, Chronotype, CommunicationStyle, CoreValue, Factor,
    Lifestyle, ModelMetrics, Participant, PersonalityType, ScoreBreakdown, ScoringWeights,
    SocialPace, MAX_SCORE,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;

/// Where a compatibility value came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoreSource {
    RuleBased,
    Learned,
    Blended,
    Neutral,
}

/// Compatibility of an ordered pair: a 0-100 score and its factor breakdown
#[derive(Debug, Clone, PartialEq)]
pub struct Compatibility {
    pub score: f64,
    pub breakdown: ScoreBreakdown,
    pub source: ScoreSource,
}

impl Compatibility {
    /// Fallback used when scoring a pair fails
    pub fn neutral(score: f64) -> Self {
        let score = score.clamp(0.0, MAX_SCORE);
        let mut breakdown = ScoreBreakdown::default();
        breakdown.insert(Factor::Neutral, score);
        Self {
            score,
            breakdown,
            source: ScoreSource::Neutral,
        }
    }
}

/// Pairwise compatibility contract shared by the rule-based, learned and
/// blended scorers. Implementations are pure.
pub trait CompatibilityScorer: Send + Sync {
    fn name(&self) -> &'static str;

    fn score(&self, a: &Participant, b: &Participant) -> Result<Compatibility, ScoringError>;
}

/// Weighted-factor scorer over the survey dimensions
///
/// Each factor contributes `weight * affinity` with affinity in [0, 1], so
/// the total is bounded by the weight sum (100). Unanswered dimensions
/// contribute zero.
#[derive(Debug, Clone)]
pub struct RuleBasedScorer {
    weights: ScoringWeights,
}

impl RuleBasedScorer {
    pub fn new(weights: ScoringWeights) -> Self {
        Self { weights }
    }

    pub fn with_default_weights() -> Self {
        Self {
            weights: ScoringWeights::default(),
        }
    }

    pub fn weights(&self) -> &ScoringWeights {
        &self.weights
    }
}

impl Default for RuleBasedScorer {
    fn default() -> Self {
        Self::with_default_weights()
    }
}

impl CompatibilityScorer for RuleBasedScorer {
    fn name(&self) -> &'static str {
        "rule_based"
    }

    fn score(&self, a: &Participant, b: &Participant) -> Result<Compatibility, ScoringError> {
        if a.id == b.id {
            return Err(ScoringError::SelfPair(a.id));
        }

        let (pa, pb) = (&a.profile, &b.profile);
        let w = &self.weights;

        let factors = [
            (
                Factor::Personality,
                w.personality,
                both(pa.personality, pb.personality, personality_affinity),
            ),
            (
                Factor::Attachment,
                w.attachment,
                both(pa.attachment, pb.attachment, attachment_affinity),
            ),
            (
                Factor::Communication,
                w.communication,
                both(pa.communication, pb.communication, communication_affinity),
            ),
            (
                Factor::Lifestyle,
                w.lifestyle,
                lifestyle_affinity(&pa.lifestyle, &pb.lifestyle),
            ),
            (
                Factor::Values,
                w.values,
                values_affinity(&pa.core_values, &pb.core_values),
            ),
            (Factor::Vibe, w.vibe, vibe_affinity(&pa.vibe, &pb.vibe)),
        ];

        let mut breakdown = ScoreBreakdown::default();
        for (factor, weight, affinity) in factors {
            breakdown.insert(factor, weight * affinity.clamp(0.0, 1.0));
        }

        let score = breakdown.total();
        if !score.is_finite() {
            return Err(ScoringError::NonFinite);
        }

        Ok(Compatibility {
            score: score.clamp(0.0, MAX_SCORE),
            breakdown,
            source: ScoreSource::RuleBased,
        })
    }
}

#[inline]
fn both<T: Copy>(a: Option<T>, b: Option<T>, affinity: fn(T, T) -> f64) -> f64 {
    match (a, b) {
        (Some(a), Some(b)) => affinity(a, b),
        _ => 0.0,
    }
}

/// Personality affinity (0-1)
/// Same type fits best; an ambivert bridges both ends
fn personality_affinity(a: PersonalityType, b: PersonalityType) -> f64 {
    use PersonalityType::*;
    match (a, b) {
        _ if a == b => 1.0,
        (Ambivert, _) | (_, Ambivert) => 0.8,
        _ => 0.6,
    }
}

/// Attachment-style affinity (0-1)
fn attachment_affinity(a: AttachmentStyle, b: AttachmentStyle) -> f64 {
    use AttachmentStyle::*;
    match (a, b) {
        (Secure, Secure) => 1.0,
        (Secure, _) | (_, Secure) => 0.75,
        (Anxious, Anxious) => 0.5,
        (Avoidant, Avoidant) => 0.4,
        (Anxious, Avoidant) | (Avoidant, Anxious) => 0.2,
        _ => 0.3,
    }
}

/// Communication-style affinity (0-1)
fn communication_affinity(a: CommunicationStyle, b: CommunicationStyle) -> f64 {
    use CommunicationStyle::*;
    match (a, b) {
        _ if a == b => 1.0,
        (Direct, Expressive) | (Expressive, Direct) => 0.7,
        (Diplomatic, Reserved) | (Reserved, Diplomatic) => 0.7,
        (Direct, Diplomatic) | (Diplomatic, Direct) => 0.6,
        (Diplomatic, Expressive) | (Expressive, Diplomatic) => 0.6,
        (Expressive, Reserved) | (Reserved, Expressive) => 0.4,
        (Direct, Reserved) | (Reserved, Direct) => 0.3,
        _ => 0.0,
    }
}

#[inline]
fn social_rank(v: SocialPace) -> i32 {
    match v {
        SocialPace::Homebody => 0,
        SocialPace::Balanced => 1,
        SocialPace::Outgoing => 2,
    }
}

#[inline]
fn chronotype_rank(v: Chronotype) -> i32 {
    match v {
        Chronotype::EarlyBird => 0,
        Chronotype::Flexible => 1,
        Chronotype::NightOwl => 2,
    }
}

#[inline]
fn activity_rank(v: ActivityLevel) -> i32 {
    match v {
        ActivityLevel::Relaxed => 0,
        ActivityLevel::Moderate => 1,
        ActivityLevel::Active => 2,
    }
}

#[inline]
fn ordinal_closeness(a: Option<i32>, b: Option<i32>) -> f64 {
    match (a, b) {
        (Some(a), Some(b)) => 1.0 - (a - b).abs() as f64 / 2.0,
        _ => 0.0,
    }
}

/// Lifestyle affinity (0-1)
/// Mean closeness over the three ordinal sub-dimensions; a sub-dimension
/// missing on either side counts as zero
fn lifestyle_affinity(a: &Lifestyle, b: &Lifestyle) -> f64 {
    let social = ordinal_closeness(a.social_pace.map(social_rank), b.social_pace.map(social_rank));
    let sleep = ordinal_closeness(
        a.chronotype.map(chronotype_rank),
        b.chronotype.map(chronotype_rank),
    );
    let activity = ordinal_closeness(a.activity.map(activity_rank), b.activity.map(activity_rank));

    (social + sleep + activity) / 3.0
}

/// Core-values affinity (0-1)
/// Overlap coefficient: shared values over the shorter list
fn values_affinity(a: &[CoreValue], b: &[CoreValue]) -> f64 {
    let set_a: BTreeSet<CoreValue> = a.iter().copied().collect();
    let set_b: BTreeSet<CoreValue> = b.iter().copied().collect();
    let smaller = set_a.len().min(set_b.len());
    if smaller == 0 {
        return 0.0;
    }

    let shared = set_a.intersection(&set_b).count();
    (shared as f64 / smaller as f64).min(1.0)
}

const VIBE_STOPWORDS: &[&str] = &[
    "the", "and", "for", "with", "that", "this", "you", "are", "but", "not", "have", "who",
    "like", "love", "really", "very", "about",
];

fn vibe_tokens(snippets: &[String]) -> BTreeSet<String> {
    snippets
        .iter()
        .flat_map(|s| s.split(|c: char| !c.is_alphanumeric()))
        .map(|w| w.to_lowercase())
        .filter(|w| w.chars().count() >= 3 && !VIBE_STOPWORDS.contains(&w.as_str()))
        .collect()
}

/// Vibe affinity (0-1)
/// Jaccard similarity of the content words in the free-text snippets
fn vibe_affinity(a: &[String], b: &[String]) -> f64 {
    let tokens_a = vibe_tokens(a);
    let tokens_b = vibe_tokens(b);
    let union = tokens_a.union(&tokens_b).count();
    if union == 0 {
        return 0.0;
    }

    tokens_a.intersection(&tokens_b).count() as f64 / union as f64
}

/// Scorer backed purely by a trained embedding model
#[derive(Debug, Clone)]
pub struct EmbeddingScorer {
    index: Arc<EmbeddingIndex>,
}

impl EmbeddingScorer {
    pub fn new(index: Arc<EmbeddingIndex>) -> Self {
        Self { index }
    }

    pub fn index(&self) -> &EmbeddingIndex {
        &self.index
    }
}

impl CompatibilityScorer for EmbeddingScorer {
    fn name(&self) -> &'static str {
        "embedding"
    }

    fn score(&self, a: &Participant, b: &Participant) -> Result<Compatibility, ScoringError> {
        if a.id == b.id {
            return Err(ScoringError::SelfPair(a.id));
        }

        let score = self.index.predict_score(a.id, b.id).map_err(|e| match e {
            crate::core::error::MatchingError::NoEmbedding(id) => ScoringError::NoEmbedding(id),
            _ => ScoringError::NonFinite,
        })?;

        let mut breakdown = ScoreBreakdown::default();
        breakdown.insert(Factor::Learned, score);

        Ok(Compatibility {
            score,
            breakdown,
            source: ScoreSource::Learned,
        })
    }
}

/// When a learned model is trusted enough to take part in scoring
///
/// A model is used only if its coverage is at least `min_coverage` and its
/// RMSE (0-1 scale) at most `max_rmse`. A trusted model contributes
/// `learned_weight` of the final score; the rule-based score supplies the
/// rest. Pairs where either side lacks an embedding use the rule-based
/// score alone.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BlendPolicy {
    pub min_coverage: f64,
    pub max_rmse: f64,
    pub learned_weight: f64,
}

impl BlendPolicy {
    pub fn trusts(&self, metrics: &ModelMetrics) -> bool {
        metrics.coverage >= self.min_coverage && metrics.rmse <= self.max_rmse
    }
}

impl Default for BlendPolicy {
    fn default() -> Self {
        Self {
            min_coverage: 0.3,
            max_rmse: 0.15,
            learned_weight: 0.5,
        }
    }
}

/// Rule-based scorer optionally blended with a trusted embedding model
#[derive(Debug, Clone)]
pub struct BlendedScorer {
    rule: RuleBasedScorer,
    learned: Option<EmbeddingScorer>,
    policy: BlendPolicy,
}

impl BlendedScorer {
    /// Build a scorer; the model is dropped if the policy does not trust it
    pub fn new(rule: RuleBasedScorer, model: Option<Arc<EmbeddingIndex>>, policy: BlendPolicy) -> Self {
        let learned = model.and_then(|index| {
            if policy.trusts(index.metrics()) {
                tracing::debug!(
                    "Blending learned model {} (rmse {:.4}, coverage {:.3})",
                    index.version(),
                    index.metrics().rmse,
                    index.metrics().coverage
                );
                Some(EmbeddingScorer::new(index))
            } else {
                tracing::info!(
                    "Model {} below blend thresholds (rmse {:.4}, coverage {:.3}), using rule-based scores",
                    index.version(),
                    index.metrics().rmse,
                    index.metrics().coverage
                );
                None
            }
        });

        Self {
            rule,
            learned,
            policy,
        }
    }

    pub fn uses_learned_model(&self) -> bool {
        self.learned.is_some()
    }
}

impl CompatibilityScorer for BlendedScorer {
    fn name(&self) -> &'static str {
        "blended"
    }

    fn score(&self, a: &Participant, b: &Participant) -> Result<Compatibility, ScoringError> {
        let rule = self.rule.score(a, b)?;

        let learned = match &self.learned {
            Some(scorer) if scorer.index().contains(a.id) && scorer.index().contains(b.id) => {
                scorer.score(a, b)?
            }
            _ => return Ok(rule),
        };

        let w = self.policy.learned_weight.clamp(0.0, 1.0);
        let mut breakdown = rule.breakdown.scaled(1.0 - w);
        breakdown.insert(Factor::Learned, learned.score * w);
        let score = breakdown.total();

        Ok(Compatibility {
            score: score.clamp(0.0, MAX_SCORE),
            breakdown,
            source: ScoreSource::Blended,
        })
    }
}
