//! Simple moving average crossover strategy.
//!
//! Maintains fast and slow SMAs over trade prices for one symbol. A golden
//! cross (fast crossing above slow) targets a long position of
//! `position_size`; a death cross targets the same size short. Orders are
//! market orders sized to reach the target from the current position.

use crate::strategy::{Strategy, StrategyCore};
use config::ConfigStore;
use oms::Portfolio;
use parking_lot::Mutex;
use quant::RollingWindow;
use std::collections::HashMap;
use std::sync::Arc;
use types::{OrderType, Price, Quantity, Side, Symbol, TradeEvent};

/// Tunables for [`SmaCrossover`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SmaParams {
    pub fast_period: usize,
    pub slow_period: usize,
    pub position_size: u64,
}

impl Default for SmaParams {
    fn default() -> Self {
        Self {
            fast_period: 10,
            slow_period: 30,
            position_size: 10_000,
        }
    }
}

impl SmaParams {
    /// Read the `strategy.sma.*` keys, falling back to defaults.
    pub fn from_store(store: &ConfigStore) -> Self {
        Self {
            fast_period: store.get_u64("strategy.sma.fast_period", 10) as usize,
            slow_period: store.get_u64("strategy.sma.slow_period", 30) as usize,
            position_size: store.get_u64("strategy.sma.position_size", 10_000),
        }
    }

    pub fn with_periods(mut self, fast: usize, slow: usize) -> Self {
        self.fast_period = fast;
        self.slow_period = slow;
        self
    }

    pub fn with_position_size(mut self, size: u64) -> Self {
        self.position_size = size;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CrossState {
    None,
    FastAbove,
    FastBelow,
}

struct SmaState {
    fast: RollingWindow,
    slow: RollingWindow,
    prev_cross: CrossState,
}

/// SMA crossover on a single symbol.
pub struct SmaCrossover {
    core: StrategyCore,
    symbol: Symbol,
    params: SmaParams,
    state: Mutex<SmaState>,
}

impl SmaCrossover {
    /// # Panics
    /// Panics unless `0 < fast_period < slow_period`.
    pub fn new(
        name: impl Into<String>,
        portfolio: Arc<Portfolio>,
        symbol: impl Into<Symbol>,
        params: SmaParams,
    ) -> Self {
        assert!(
            params.fast_period > 0 && params.fast_period < params.slow_period,
            "SMA periods must satisfy 0 < fast < slow"
        );
        Self {
            core: StrategyCore::new(name, portfolio),
            symbol: symbol.into(),
            params,
            state: Mutex::new(SmaState {
                fast: RollingWindow::new(params.fast_period),
                slow: RollingWindow::new(params.slow_period),
                prev_cross: CrossState::None,
            }),
        }
    }

    pub fn symbol(&self) -> &Symbol {
        &self.symbol
    }

    pub fn params(&self) -> SmaParams {
        self.params
    }

    /// Fast SMA, once enough prices have been observed.
    pub fn fast_sma(&self) -> Option<f64> {
        let state = self.state.lock();
        state.fast.is_full().then(|| state.fast.mean()).flatten()
    }

    /// Slow SMA, once enough prices have been observed.
    pub fn slow_sma(&self) -> Option<f64> {
        let state = self.state.lock();
        state.slow.is_full().then(|| state.slow.mean()).flatten()
    }

    /// Fold the new price in and decide whether a crossover fired.
    /// Ties count as "fast below", so a signal needs a strict cross.
    fn signal_for(&self, price: f64) -> Option<(Side, Quantity)> {
        let mut state = self.state.lock();
        state.fast.push(price);
        state.slow.push(price);
        if !state.slow.is_full() {
            return None;
        }

        let fast = state.fast.mean()?;
        let slow = state.slow.mean()?;
        let cross = if fast > slow {
            CrossState::FastAbove
        } else {
            CrossState::FastBelow
        };
        let prev = state.prev_cross;
        state.prev_cross = cross;

        if prev == CrossState::None || cross == prev {
            return None;
        }

        let current_qty = self.core.position_qty(&self.symbol);
        let target = self.params.position_size as i64;
        match cross {
            CrossState::FastAbove if current_qty <= 0 => {
                Some((Side::Buy, Quantity((target - current_qty) as u64)))
            }
            CrossState::FastBelow if current_qty >= 0 => {
                Some((Side::Sell, Quantity((target + current_qty) as u64)))
            }
            _ => None,
        }
    }
}

impl Strategy for SmaCrossover {
    fn name(&self) -> &str {
        self.core.name()
    }

    fn on_start(&self) {
        let mut state = self.state.lock();
        state.fast.clear();
        state.slow.clear();
        state.prev_cross = CrossState::None;
        tracing::info!(
            target: "strategy",
            name = self.core.name(),
            symbol = %self.symbol,
            fast = self.params.fast_period,
            slow = self.params.slow_period,
            "sma crossover started"
        );
    }

    fn on_trade(&self, trade: &TradeEvent) {
        if trade.symbol != self.symbol {
            return;
        }

        // The state lock is released before submission: an instant-fill
        // exchange delivers our own fill synchronously from inside submit.
        let signal = self.signal_for(trade.price.to_float());

        if let Some((side, quantity)) = signal {
            let marks: HashMap<Symbol, Price> =
                HashMap::from([(self.symbol.clone(), trade.price)]);
            tracing::info!(
                target: "strategy",
                name = self.core.name(),
                symbol = %self.symbol,
                %side,
                %quantity,
                price = %trade.price,
                "crossover signal"
            );
            self.core.submit_order(
                self.symbol.clone(),
                side,
                OrderType::Market,
                trade.price,
                quantity,
                &marks,
            );
        }
    }
}
