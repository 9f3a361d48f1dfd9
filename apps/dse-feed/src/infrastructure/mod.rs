//! Infrastructure Layer - Adapters and external integrations.
//!
//! This layer contains the concrete implementations of the port interfaces
//! defined in the application layer.

/// Configuration loading and validation.
pub mod config;

/// Health check HTTP endpoint.
pub mod health;

/// Exchange HTTP transport.
pub mod http;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// Backoff policy for the live poll loop.
pub mod reconnect;

/// CSV seed reader and exporter.
pub mod seed;

/// OpenTelemetry tracing integration.
pub mod telemetry;
