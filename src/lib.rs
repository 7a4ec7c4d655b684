//! Cohort Match - round-based pairing engine for in-person events
//!
//! Scores every pair in an event's pool, solves a minimum-cost perfect
//! matching per round, collects mutual consent on first-round pairings and
//! trains participant embeddings from post-round feedback.

pub mod config;
pub mod core;
pub mod models;
pub mod routes;
pub mod services;

// Re-export commonly used types
pub use core::{ConsentProtocol, MatchingError, RoundOrchestrator, TrainingPipeline};
pub use models::{EventScope, MatchRecord, Participant, RunRoundResponse, ScoringWeights};
pub use services::{InMemoryStore, MatchStore};
