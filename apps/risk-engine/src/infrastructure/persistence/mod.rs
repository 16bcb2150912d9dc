//! Persistence Adapters
//!
//! State store implementations and seed loading.

pub mod in_memory;
pub mod seed;

pub use in_memory::InMemoryStateStore;
pub use seed::{SeedError, StateSeed, ValidatedSeed};
