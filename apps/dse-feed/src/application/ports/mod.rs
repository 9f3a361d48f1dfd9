//! Application Ports (Driven)
//!
//! Interfaces the feed services use to reach the outside world. Adapters in
//! the infrastructure layer implement them; tests substitute fakes.
//!
//! - `HttpTransport`: timed GET against the exchange pages
//! - `SeedSource` / `SeriesExporter`: local CSV history in and out
//! - `Clock`: local wall-clock time for market hours and history windows

mod clock_port;
mod http_transport_port;
mod seed_port;

pub use clock_port::{Clock, FixedClock, SystemClock};
pub use http_transport_port::{HttpTransport, TransportError};
pub use seed_port::{SeedError, SeedSource, SeriesExporter};

#[cfg(test)]
pub use http_transport_port::MockHttpTransport;
