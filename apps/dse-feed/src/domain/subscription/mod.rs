//! Subscription Management Types
//!
//! Tracks which symbols the host has asked to be notified about first.
//!
//! # Design
//!
//! The live page always returns every instrument, so subscribing never
//! changes what is fetched. It only decides notification order: subscribed
//! symbols are announced first each cycle, in subscription order.

use parking_lot::RwLock;

use super::market_data::{Symbol, normalize_symbol};

// =============================================================================
// Subscription Manager
// =============================================================================

/// Ordered, de-duplicated set of subscribed symbols.
///
/// # Example
///
/// ```rust
/// use dse_feed::domain::subscription::SubscriptionManager;
///
/// let manager = SubscriptionManager::new();
///
/// assert!(manager.subscribe("gp"));
/// assert!(!manager.subscribe("GP"));
/// assert!(manager.subscribe("BRACBANK"));
/// assert_eq!(manager.symbols(), vec!["GP".to_string(), "BRACBANK".to_string()]);
///
/// assert!(manager.unsubscribe("Gp"));
/// assert_eq!(manager.len(), 1);
/// ```
#[derive(Debug, Default)]
pub struct SubscriptionManager {
    symbols: RwLock<Vec<Symbol>>,
}

impl SubscriptionManager {
    /// Create an empty manager.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            symbols: RwLock::new(Vec::new()),
        }
    }

    /// Subscribe to a symbol.
    ///
    /// Returns `false` if the symbol was already subscribed or is blank.
    pub fn subscribe(&self, symbol: &str) -> bool {
        let symbol = normalize_symbol(symbol);
        if symbol.is_empty() {
            return false;
        }

        let mut symbols = self.symbols.write();
        if symbols.contains(&symbol) {
            return false;
        }
        symbols.push(symbol);
        true
    }

    /// Unsubscribe from a symbol.
    ///
    /// Returns `false` if the symbol was not subscribed.
    pub fn unsubscribe(&self, symbol: &str) -> bool {
        let symbol = normalize_symbol(symbol);
        let mut symbols = self.symbols.write();
        let before = symbols.len();
        symbols.retain(|s| *s != symbol);
        symbols.len() != before
    }

    /// Whether a symbol is subscribed.
    #[must_use]
    pub fn is_subscribed(&self, symbol: &str) -> bool {
        let symbol = normalize_symbol(symbol);
        self.symbols.read().contains(&symbol)
    }

    /// Subscribed symbols in subscription order.
    #[must_use]
    pub fn symbols(&self) -> Vec<Symbol> {
        self.symbols.read().clone()
    }

    /// Number of subscribed symbols.
    #[must_use]
    pub fn len(&self) -> usize {
        self.symbols.read().len()
    }

    /// True when nothing is subscribed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.symbols.read().is_empty()
    }

    /// Drop every subscription.
    pub fn clear(&self) {
        self.symbols.write().clear();
    }
}

// =============================================================================
// Tests
// =============================================================================
