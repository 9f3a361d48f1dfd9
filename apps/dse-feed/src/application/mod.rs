//! Application Layer - Use cases and port definitions.
//!
//! This layer contains the feed services and the port interfaces that
//! define how the domain reaches the exchange pages, the seed files and the
//! clock.

/// Port interfaces for external systems (HTTP, seed files, clock).
pub mod ports;

/// Application services for history, live quotes and the engine facade.
pub mod services;
