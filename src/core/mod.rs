// Core algorithm exports
pub mod assignment;
pub mod consent;
pub mod embeddings;
pub mod error;
pub mod filters;
pub mod matcher;
pub mod narrative;
pub mod pool;
pub mod scoring;
pub mod training;

pub use assignment::{solve, CostMatrix, Matching};
pub use consent::{derive_mutual, ConsentProtocol};
pub use embeddings::{EmbeddingIndex, EmbeddingTrainer, TrainerSettings, TrainingSnapshot};
pub use error::{MatchingError, Result, ScoringError, SolverError};
pub use filters::{has_complete_survey, mutually_compatible};
pub use matcher::{RoundOrchestrator, RoundSettings};
pub use narrative::{NarrativeReasonProvider, TemplateNarrator};
pub use pool::{Assignment, PoolMember, PreparedPool};
pub use scoring::{BlendPolicy, BlendedScorer, Compatibility, CompatibilityScorer, EmbeddingScorer, RuleBasedScorer};
pub use training::TrainingPipeline;
