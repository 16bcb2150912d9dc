//! Infrastructure Layer - Adapters and external integrations.
//!
//! This layer contains the concrete implementations of the port interfaces
//! defined in the application layer, plus process-level concerns.

/// Configuration loaded from the environment.
pub mod config;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// State store adapters and seed documents.
pub mod persistence;

/// JSON lines command adapter.
pub mod stdio;

/// OpenTelemetry tracing integration.
pub mod telemetry;
