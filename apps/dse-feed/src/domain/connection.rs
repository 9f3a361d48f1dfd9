//! Connection State
//!
//! Process-wide state of the live feed. The state itself lives in an
//! `AtomicU8` so readers (health endpoint, notification status) never take a
//! lock; the surrounding bookkeeping mirrors what the poll loop needs to
//! report.

use std::sync::atomic::{AtomicU32, AtomicU8, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;

// =============================================================================
// State
// =============================================================================

/// Connection state of the live feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum ConnectionState {
    /// Feed not started, or stopped.
    Disconnected = 0,
    /// Feed started, no successful fetch yet.
    Connecting = 1,
    /// Last fetch succeeded.
    Connected = 2,
    /// Last fetch failed, backing off.
    Reconnecting = 3,
    /// Consecutive failure budget exhausted. Terminal until restart.
    Error = 4,
}

impl ConnectionState {
    /// Decode from the atomic representation.
    ///
    /// Unknown values decode as `Error`.
    #[must_use]
    pub const fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Disconnected,
            1 => Self::Connecting,
            2 => Self::Connected,
            3 => Self::Reconnecting,
            _ => Self::Error,
        }
    }

    /// Lowercase name used in logs and the health endpoint.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
            Self::Error => "error",
        }
    }

    /// Host-facing status code: 1 when connected, 2 otherwise.
    #[must_use]
    pub const fn status_code(self) -> u8 {
        match self {
            Self::Connected => 1,
            _ => 2,
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Transitions
// =============================================================================

/// Input to the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedEvent {
    /// Feed task started (or restarted).
    Start,
    /// A fetch succeeded.
    FetchSucceeded,
    /// A fetch failed; `exhausted` is true once the failure budget is spent.
    FetchFailed {
        /// Consecutive failure budget exhausted.
        exhausted: bool,
    },
    /// Feed task stopped.
    Stop,
}

/// Pure transition function.
///
/// `Error` only leaves through `Start` (restart) or `Stop`.
#[must_use]
pub const fn next_state(current: ConnectionState, event: FeedEvent) -> ConnectionState {
    use ConnectionState as S;

    match (current, event) {
        (_, FeedEvent::Stop) => S::Disconnected,
        (S::Disconnected | S::Error, FeedEvent::Start) => S::Connecting,
        (S::Error, _) => S::Error,
        (_, FeedEvent::FetchFailed { exhausted: true }) => S::Error,
        (_, FeedEvent::FetchFailed { exhausted: false }) => S::Reconnecting,
        (S::Connecting | S::Reconnecting | S::Connected, FeedEvent::FetchSucceeded) => S::Connected,
        (S::Disconnected, FeedEvent::FetchSucceeded) => S::Disconnected,
        (state, FeedEvent::Start) => state,
    }
}

// =============================================================================
// Shared Status
// =============================================================================

/// Shared connection status for the live feed.
#[derive(Debug)]
pub struct ConnectionStatus {
    state: AtomicU8,
    reconnect_attempts: AtomicU32,
    last_connected_at: RwLock<Option<DateTime<Utc>>>,
    last_error: RwLock<Option<String>>,
}

impl Default for ConnectionStatus {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionStatus {
    /// Create a status in `Disconnected`.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            state: AtomicU8::new(ConnectionState::Disconnected as u8),
            reconnect_attempts: AtomicU32::new(0),
            last_connected_at: RwLock::new(None),
            last_error: RwLock::new(None),
        }
    }

    /// Current state, lock-free.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// True when the last fetch succeeded.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Apply an event and return the resulting state.
    pub fn apply(&self, event: FeedEvent) -> ConnectionState {
        let next = next_state(self.state(), event);
        self.state.store(next as u8, Ordering::Release);

        match event {
            FeedEvent::FetchSucceeded if next == ConnectionState::Connected => {
                *self.last_connected_at.write() = Some(Utc::now());
                *self.last_error.write() = None;
                self.reconnect_attempts.store(0, Ordering::Relaxed);
            }
            FeedEvent::FetchFailed { .. } => {
                self.reconnect_attempts.fetch_add(1, Ordering::Relaxed);
            }
            FeedEvent::Start | FeedEvent::Stop => {
                self.reconnect_attempts.store(0, Ordering::Relaxed);
            }
            FeedEvent::FetchSucceeded => {}
        }

        next
    }

    /// Record the most recent failure message.
    pub fn record_error(&self, message: impl Into<String>) {
        *self.last_error.write() = Some(message.into());
    }

    /// Consecutive failed fetches since the last success.
    #[must_use]
    pub fn reconnect_attempts(&self) -> u32 {
        self.reconnect_attempts.load(Ordering::Relaxed)
    }

    /// Time of the most recent successful fetch.
    #[must_use]
    pub fn last_connected_at(&self) -> Option<DateTime<Utc>> {
        *self.last_connected_at.read()
    }

    /// Most recent failure message, cleared on success.
    #[must_use]
    pub fn last_error(&self) -> Option<String> {
        self.last_error.read().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(ConnectionState::Disconnected, FeedEvent::Start, ConnectionState::Connecting ; "start")]
    #[test_case(ConnectionState::Connecting, FeedEvent::FetchSucceeded, ConnectionState::Connected ; "first success")]
    #[test_case(ConnectionState::Connecting, FeedEvent::FetchFailed { exhausted: false }, ConnectionState::Reconnecting ; "first failure")]
    #[test_case(ConnectionState::Connected, FeedEvent::FetchFailed { exhausted: false }, ConnectionState::Reconnecting ; "failure after success")]
    #[test_case(ConnectionState::Reconnecting, FeedEvent::FetchSucceeded, ConnectionState::Connected ; "recovered")]
    #[test_case(ConnectionState::Reconnecting, FeedEvent::FetchFailed { exhausted: true }, ConnectionState::Error ; "budget spent")]
    #[test_case(ConnectionState::Error, FeedEvent::FetchSucceeded, ConnectionState::Error ; "error is sticky")]
    #[test_case(ConnectionState::Error, FeedEvent::Start, ConnectionState::Connecting ; "restart from error")]
    #[test_case(ConnectionState::Connected, FeedEvent::Stop, ConnectionState::Disconnected ; "stop")]
    fn transitions(from: ConnectionState, event: FeedEvent, to: ConnectionState) {
        assert_eq!(next_state(from, event), to);
    }

    #[test]
    fn atomic_round_trip_of_every_state() {
        for state in [
            ConnectionState::Disconnected,
            ConnectionState::Connecting,
            ConnectionState::Connected,
            ConnectionState::Reconnecting,
            ConnectionState::Error,
        ] {
            assert_eq!(ConnectionState::from_u8(state as u8), state);
        }
        assert_eq!(ConnectionState::from_u8(200), ConnectionState::Error);
    }

    #[test]
    fn status_tracks_attempts_and_resets_on_success() {
        let status = ConnectionStatus::new();
        status.apply(FeedEvent::Start);
        status.apply(FeedEvent::FetchFailed { exhausted: false });
        status.record_error("timeout");
        status.apply(FeedEvent::FetchFailed { exhausted: false });

        assert_eq!(status.state(), ConnectionState::Reconnecting);
        assert_eq!(status.reconnect_attempts(), 2);
        assert_eq!(status.last_error().as_deref(), Some("timeout"));

        status.apply(FeedEvent::FetchSucceeded);

        assert!(status.is_connected());
        assert_eq!(status.reconnect_attempts(), 0);
        assert!(status.last_error().is_none());
        assert!(status.last_connected_at().is_some());
    }

    #[test]
    fn status_codes() {
        assert_eq!(ConnectionState::Connected.status_code(), 1);
        assert_eq!(ConnectionState::Reconnecting.status_code(), 2);
        assert_eq!(ConnectionState::Connected.to_string(), "connected");
    }
}
