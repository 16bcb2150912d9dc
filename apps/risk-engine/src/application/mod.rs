//! Application Layer - Use cases and port definitions.
//!
//! This layer contains the application services and the port interface
//! through which they reach shared state.

/// Port interfaces for external systems (state store).
pub mod ports;

/// Risk engine and covariance updater services.
pub mod services;
