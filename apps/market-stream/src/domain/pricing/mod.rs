//! Last-Known Price Cache
//!
//! One entry per symbol key, last write wins. Written by tick ingestion,
//! read by replay-on-subscribe and by best-effort readers that want a
//! snapshot without subscribing.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use rust_decimal::Decimal;
use serde::Serialize;

use crate::domain::symbol::SymbolKey;

/// The last price observed for a symbol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CachedPrice {
    /// Normalized symbol key.
    pub symbol: SymbolKey,
    /// Last trade price.
    pub price: Decimal,
    /// Upstream event time of the trade.
    pub timestamp: DateTime<Utc>,
    /// Local time the price was stored.
    pub received_at: DateTime<Utc>,
}

/// Thread-safe last-value store.
#[derive(Debug, Default)]
pub struct PriceCache {
    entries: RwLock<HashMap<SymbolKey, CachedPrice>>,
}

impl PriceCache {
    /// Create an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store the latest price for a key, replacing any previous value.
    pub fn put(&self, symbol: SymbolKey, price: Decimal, timestamp: DateTime<Utc>) {
        let entry = CachedPrice {
            symbol: symbol.clone(),
            price,
            timestamp,
            received_at: Utc::now(),
        };
        self.entries.write().insert(symbol, entry);
    }

    /// Read the latest price for a key.
    #[must_use]
    pub fn get(&self, symbol: &SymbolKey) -> Option<CachedPrice> {
        self.entries.read().get(symbol).cloned()
    }

    /// Drop every cached price.
    pub fn clear(&self) {
        self.entries.write().clear();
    }

    /// Number of cached symbols.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether the cache is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}
