//! Simulation behavior knobs.

use config::ConfigStore;

/// Configuration for the simulated exchange.
#[derive(Debug, Clone, PartialEq)]
pub struct ExchangeConfig {
    /// Delay before a scheduled fill executes.
    pub fill_latency_ms: u64,
    /// Probability in `[0, 1]` that a submission is rejected outright.
    pub rejection_rate: f64,
    /// Probability in `[0, 1]` that an order fills in two slices.
    pub partial_fill_rate: f64,
    /// Adverse price movement applied to market orders, in basis points.
    pub slippage_bps: u32,
    /// Execute fills synchronously on the publishing thread.
    pub instant_fills: bool,
    /// Seed for the rejection/partial draws; `None` seeds from the OS.
    pub rng_seed: Option<u64>,
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            fill_latency_ms: 10,
            rejection_rate: 0.0,
            partial_fill_rate: 0.0,
            slippage_bps: 5,
            instant_fills: false,
            rng_seed: None,
        }
    }
}

impl ExchangeConfig {
    /// Read the `exchange.*` keys from the store, falling back to defaults.
    pub fn from_store(store: &ConfigStore) -> Self {
        let rng_seed = store
            .contains("exchange.rng_seed")
            .then(|| store.get_u64("exchange.rng_seed", 0));
        Self {
            fill_latency_ms: store.get_u64("exchange.fill_latency_ms", 10),
            rejection_rate: store.get_f64("exchange.rejection_rate", 0.0),
            partial_fill_rate: store.get_f64("exchange.partial_fill_rate", 0.0),
            slippage_bps: store.get_f64("exchange.slippage_bps", 5.0).round() as u32,
            instant_fills: store.get_bool("exchange.instant_fills", false),
            rng_seed,
        }
    }

    /// Instant fills, no randomness, no slippage: the configuration a
    /// reproducible backtest wants.
    pub fn deterministic() -> Self {
        Self {
            fill_latency_ms: 0,
            rejection_rate: 0.0,
            partial_fill_rate: 0.0,
            slippage_bps: 0,
            instant_fills: true,
            rng_seed: Some(0),
        }
    }

    pub fn with_fill_latency_ms(mut self, ms: u64) -> Self {
        self.fill_latency_ms = ms;
        self
    }

    pub fn with_rejection_rate(mut self, rate: f64) -> Self {
        self.rejection_rate = rate;
        self
    }

    pub fn with_partial_fill_rate(mut self, rate: f64) -> Self {
        self.partial_fill_rate = rate;
        self
    }

    pub fn with_slippage_bps(mut self, bps: u32) -> Self {
        self.slippage_bps = bps;
        self
    }

    pub fn with_instant_fills(mut self, instant: bool) -> Self {
        self.instant_fills = instant;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng_seed = Some(seed);
        self
    }
}
