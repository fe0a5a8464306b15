//! Trading strategies.
//!
//! A [`Strategy`] receives market data and order flow callbacks from the
//! [`StrategyManager`] and submits orders through the portfolio's risk gate
//! via [`StrategyCore`]. [`SmaCrossover`] is the bundled example.

mod manager;
mod sma;
mod strategy;

pub use manager::StrategyManager;
pub use sma::{SmaCrossover, SmaParams};
pub use strategy::{Strategy, StrategyCore};
