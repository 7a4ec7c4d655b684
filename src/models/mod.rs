// Model exports
pub mod domain;
pub mod requests;
pub mod responses;

pub use domain::{
    ActivityLevel, AttachmentStyle, Chronotype, CommunicationStyle, ConsentSide, ContactInfo,
    CoreValue, Embedding, EmbeddingModel, EventScope, Factor, FeedbackEntry, FeedbackRatings,
    Gender, Lifestyle, MatchRecord, ModelMetadata, ModelMetrics, PairId, Participant,
    ParticipantId, PersonalityType, Profile, ScoreBreakdown, ScoringWeights, SocialPace,
    MAX_SCORE,
};
pub use requests::{PredictQuery, SubmitConsentRequest, TrainEmbeddingsRequest};
pub use responses::{
    ConsentResponse, ErrorResponse, HealthResponse, PredictResponse, RoundStats,
    RunRoundResponse, TrainResponse,
};
