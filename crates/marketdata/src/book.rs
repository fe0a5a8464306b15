//! Aggregated price levels for a single symbol.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use types::{Price, Quantity, Symbol};

/// One aggregated price level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceLevel {
    pub price: Price,
    pub quantity: Quantity,
}

/// Order book for one symbol, optimised for best bid/offer access.
///
/// Levels are aggregated by price: an update replaces the quantity at that
/// price, and a zero quantity removes the level.
#[derive(Debug, Clone, Default)]
pub struct OrderBook {
    symbol: Symbol,
    bids: BTreeMap<Price, Quantity>,
    asks: BTreeMap<Price, Quantity>,
}

impl OrderBook {
    pub fn new(symbol: impl Into<Symbol>) -> Self {
        Self {
            symbol: symbol.into(),
            bids: BTreeMap::new(),
            asks: BTreeMap::new(),
        }
    }

    pub fn symbol(&self) -> &Symbol {
        &self.symbol
    }

    pub fn update_bid(&mut self, price: Price, quantity: Quantity) {
        if quantity.is_zero() {
            self.bids.remove(&price);
        } else {
            self.bids.insert(price, quantity);
        }
    }

    pub fn update_ask(&mut self, price: Price, quantity: Quantity) {
        if quantity.is_zero() {
            self.asks.remove(&price);
        } else {
            self.asks.insert(price, quantity);
        }
    }

    pub fn remove_bid(&mut self, price: Price) {
        self.bids.remove(&price);
    }

    pub fn remove_ask(&mut self, price: Price) {
        self.asks.remove(&price);
    }

    pub fn clear(&mut self) {
        self.bids.clear();
        self.asks.clear();
    }

    /// Highest bid.
    pub fn best_bid(&self) -> Option<PriceLevel> {
        self.bids
            .iter()
            .next_back()
            .map(|(&price, &quantity)| PriceLevel { price, quantity })
    }

    /// Lowest ask.
    pub fn best_ask(&self) -> Option<PriceLevel> {
        self.asks
            .iter()
            .next()
            .map(|(&price, &quantity)| PriceLevel { price, quantity })
    }

    pub fn spread(&self) -> Option<Price> {
        match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) => Some(ask.price - bid.price),
            _ => None,
        }
    }

    pub fn mid_price(&self) -> Option<Price> {
        match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) => Some(Price((bid.price.raw() + ask.price.raw()) / 2)),
            _ => None,
        }
    }

    /// Top `levels` bids, best first.
    pub fn bid_depth(&self, levels: usize) -> Vec<PriceLevel> {
        self.bids
            .iter()
            .rev()
            .take(levels)
            .map(|(&price, &quantity)| PriceLevel { price, quantity })
            .collect()
    }

    /// Top `levels` asks, best first.
    pub fn ask_depth(&self, levels: usize) -> Vec<PriceLevel> {
        self.asks
            .iter()
            .take(levels)
            .map(|(&price, &quantity)| PriceLevel { price, quantity })
            .collect()
    }

    pub fn bid_level_count(&self) -> usize {
        self.bids.len()
    }

    pub fn ask_level_count(&self) -> usize {
        self.asks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bids.is_empty() && self.asks.is_empty()
    }
}
