//! Port Interfaces
//!
//! Contracts the infrastructure adapters implement, following the
//! Hexagonal Architecture pattern.
//!
//! ## Driven Ports (Outbound)
//!
//! - `StateStorePort`: versioned market and portfolio state

mod state_store_port;

pub use state_store_port::{StateKey, StateStorePort, StoreError, Versioned};
