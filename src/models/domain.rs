use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

/// Stable "assigned number" of a participant within an event
pub type ParticipantId = i64;

/// Identifier of a single pairing record
pub type PairId = Uuid;

/// Highest displayable compatibility score
pub const MAX_SCORE: f64 = 100.0;

/// Event scope key threaded through every operation
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventScope(pub String);

impl EventScope {
    pub fn new(scope: impl Into<String>) -> Self {
        Self(scope.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EventScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Gender {
    Woman,
    Man,
    NonBinary,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PersonalityType {
    Introvert,
    Ambivert,
    Extrovert,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttachmentStyle {
    Secure,
    Anxious,
    Avoidant,
    Disorganized,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommunicationStyle {
    Direct,
    Diplomatic,
    Expressive,
    Reserved,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SocialPace {
    Homebody,
    Balanced,
    Outgoing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Chronotype {
    EarlyBird,
    Flexible,
    NightOwl,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityLevel {
    Relaxed,
    Moderate,
    Active,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CoreValue {
    Family,
    Career,
    Adventure,
    Creativity,
    Faith,
    Health,
    Learning,
    Community,
    Stability,
    Independence,
}

/// Lifestyle answers, each on a three-step ordinal scale
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Lifestyle {
    #[serde(default)]
    pub social_pace: Option<SocialPace>,
    #[serde(default)]
    pub chronotype: Option<Chronotype>,
    #[serde(default)]
    pub activity: Option<ActivityLevel>,
}

/// Survey answers grouped by dimension. Every field is optional; an
/// unanswered dimension scores zero for its factor.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    #[serde(default)]
    pub personality: Option<PersonalityType>,
    #[serde(default)]
    pub attachment: Option<AttachmentStyle>,
    #[serde(default)]
    pub communication: Option<CommunicationStyle>,
    #[serde(default)]
    pub lifestyle: Lifestyle,
    #[serde(rename = "coreValues", default)]
    pub core_values: Vec<CoreValue>,
    #[serde(default)]
    pub vibe: Vec<String>,
}

/// Contact attributes revealed only on a mutual match
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContactInfo {
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub instagram: Option<String>,
}

/// Event participant with survey profile and matching preferences
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Participant {
    pub id: ParticipantId,
    #[serde(rename = "displayName")]
    pub display_name: String,
    #[serde(default)]
    pub gender: Option<Gender>,
    /// Genders this participant is open to meeting; empty means anyone
    #[serde(rename = "openTo", default)]
    pub open_to: Vec<Gender>,
    #[serde(default)]
    pub profile: Profile,
    #[serde(default)]
    pub contact: ContactInfo,
    #[serde(rename = "surveyComplete", default)]
    pub survey_complete: bool,
}

/// Named scoring factor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Factor {
    Personality,
    Attachment,
    Communication,
    Lifestyle,
    Values,
    Vibe,
    Learned,
    Neutral,
}

impl Factor {
    pub fn label(&self) -> &'static str {
        match self {
            Factor::Personality => "personality",
            Factor::Attachment => "attachment style",
            Factor::Communication => "communication style",
            Factor::Lifestyle => "lifestyle",
            Factor::Values => "core values",
            Factor::Vibe => "vibe",
            Factor::Learned => "past feedback",
            Factor::Neutral => "neutral default",
        }
    }
}

/// Per-factor contributions; the contributions sum to the total score
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ScoreBreakdown(pub BTreeMap<Factor, f64>);

impl ScoreBreakdown {
    pub fn total(&self) -> f64 {
        self.0.values().sum()
    }

    pub fn get(&self, factor: Factor) -> f64 {
        self.0.get(&factor).copied().unwrap_or(0.0)
    }

    pub fn insert(&mut self, factor: Factor, contribution: f64) {
        self.0.insert(factor, contribution);
    }

    /// Multiply every contribution by `factor`
    pub fn scaled(&self, factor: f64) -> Self {
        Self(self.0.iter().map(|(k, v)| (*k, v * factor)).collect())
    }

    /// Factor-wise mean of two breakdowns
    pub fn averaged(&self, other: &Self) -> Self {
        let mut merged = BTreeMap::new();
        for key in self.0.keys().chain(other.0.keys()) {
            merged.insert(*key, (self.get(*key) + other.get(*key)) / 2.0);
        }
        Self(merged)
    }

    /// Factors ordered by contribution, largest first
    pub fn ranked(&self) -> Vec<(Factor, f64)> {
        let mut factors: Vec<(Factor, f64)> = self.0.iter().map(|(k, v)| (*k, *v)).collect();
        factors.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.0.cmp(&b.0))
        });
        factors
    }
}

/// Which side of a pairing a participant is on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsentSide {
    A,
    B,
}

/// Result of one round for one pair, or for a participant left without a
/// partner (`participant_b == None`).
///
/// Score, breakdown and narrative are write-once; only the two consent
/// flags change after the round closes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchRecord {
    pub id: PairId,
    #[serde(rename = "eventScope")]
    pub event_scope: EventScope,
    pub round: u32,
    #[serde(rename = "participantA")]
    pub participant_a: ParticipantId,
    #[serde(rename = "participantB")]
    pub participant_b: Option<ParticipantId>,
    pub score: Option<f64>,
    pub breakdown: ScoreBreakdown,
    pub narrative: Option<String>,
    /// Pair was chosen despite failing the mutual preference check
    pub forced: bool,
    /// Pair already met in an earlier round of this event
    #[serde(rename = "repeatPair")]
    pub repeat_pair: bool,
    #[serde(rename = "wantsMatchA")]
    pub wants_match_a: Option<bool>,
    #[serde(rename = "wantsMatchB")]
    pub wants_match_b: Option<bool>,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
}

impl MatchRecord {
    pub fn is_unmatched(&self) -> bool {
        self.participant_b.is_none()
    }

    pub fn participants(&self) -> impl Iterator<Item = ParticipantId> {
        std::iter::once(self.participant_a).chain(self.participant_b)
    }

    pub fn side_of(&self, participant: ParticipantId) -> Option<ConsentSide> {
        if self.participant_a == participant {
            Some(ConsentSide::A)
        } else if self.participant_b == Some(participant) {
            Some(ConsentSide::B)
        } else {
            None
        }
    }

    pub fn partner_of(&self, side: ConsentSide) -> Option<ParticipantId> {
        match side {
            ConsentSide::A => self.participant_b,
            ConsentSide::B => Some(self.participant_a),
        }
    }

    /// Derived from both consent flags on every read
    pub fn mutual_match(&self) -> Option<bool> {
        crate::core::consent::derive_mutual(self.wants_match_a, self.wants_match_b)
    }

    /// Unordered pair key, `None` for unmatched records
    pub fn pair_key(&self) -> Option<(ParticipantId, ParticipantId)> {
        self.participant_b
            .map(|b| (self.participant_a.min(b), self.participant_a.max(b)))
    }
}

/// Post-round sub-ratings, each 0-100
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeedbackRatings {
    #[serde(default)]
    pub overall: Option<u8>,
    #[serde(default)]
    pub conversation: Option<u8>,
    #[serde(default)]
    pub chemistry: Option<u8>,
    #[serde(rename = "wouldMeetAgain", default)]
    pub would_meet_again: Option<bool>,
}

/// Rating submitted by one participant about their partner for one round
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackEntry {
    #[serde(rename = "eventScope")]
    pub event_scope: EventScope,
    pub round: u32,
    pub rater: ParticipantId,
    pub ratee: ParticipantId,
    pub ratings: FeedbackRatings,
}

impl FeedbackEntry {
    /// Mean of the sub-ratings that were given, normalized to 0..1.
    /// `None` when every sub-rating is missing.
    pub fn primary_signal(&self) -> Option<f64> {
        let mut samples: Vec<f64> = [
            self.ratings.overall,
            self.ratings.conversation,
            self.ratings.chemistry,
        ]
        .iter()
        .flatten()
        .map(|r| (*r).min(100) as f64 / 100.0)
        .collect();

        if let Some(again) = self.ratings.would_meet_again {
            samples.push(if again { 1.0 } else { 0.0 });
        }

        if samples.is_empty() {
            None
        } else {
            Some(samples.iter().sum::<f64>() / samples.len() as f64)
        }
    }
}

/// Learned latent vector for one participant in one model version
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    #[serde(rename = "participantId")]
    pub participant_id: ParticipantId,
    #[serde(rename = "modelVersion")]
    pub model_version: Uuid,
    pub vector: Vec<f64>,
}

/// Quality metrics of a trained model
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModelMetrics {
    pub rmse: f64,
    pub coverage: f64,
    #[serde(rename = "observedCells")]
    pub observed_cells: usize,
}

/// Model-level metadata persisted alongside the embeddings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelMetadata {
    pub version: Uuid,
    #[serde(rename = "eventScope")]
    pub event_scope: EventScope,
    pub rank: usize,
    #[serde(rename = "participantCount")]
    pub participant_count: usize,
    pub metrics: ModelMetrics,
    #[serde(rename = "trainedAt")]
    pub trained_at: DateTime<Utc>,
}

/// A complete trained model version. Never mutated after training.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingModel {
    pub metadata: ModelMetadata,
    pub embeddings: Vec<Embedding>,
}

/// Rule-based factor weights; they must sum to 100
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoringWeights {
    pub personality: f64,
    pub attachment: f64,
    pub communication: f64,
    pub lifestyle: f64,
    pub values: f64,
    pub vibe: f64,
}

impl ScoringWeights {
    pub fn sum(&self) -> f64 {
        self.personality + self.attachment + self.communication + self.lifestyle + self.values + self.vibe
    }

    pub fn is_valid(&self) -> bool {
        let all_non_negative = [
            self.personality,
            self.attachment,
            self.communication,
            self.lifestyle,
            self.values,
            self.vibe,
        ]
        .iter()
        .all(|w| w.is_finite() && *w >= 0.0);

        all_non_negative && (self.sum() - MAX_SCORE).abs() < 1e-6
    }
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            personality: 15.0,
            attachment: 20.0,
            communication: 15.0,
            lifestyle: 15.0,
            values: 25.0,
            vibe: 10.0,
        }
    }
}
