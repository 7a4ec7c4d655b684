// Service exports
pub mod memory;
pub mod narrator;
pub mod postgres;
pub mod store;

pub use memory::InMemoryStore;
pub use narrator::HttpNarrator;
pub use postgres::PostgresStore;
pub use store::{MatchStore, PoolFilter, StoreError};
