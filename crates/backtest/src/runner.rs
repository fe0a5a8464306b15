//! The replay driver.

use crate::data::{filter_by_symbol, filter_by_time_range, load_csv, TradeRecord};
use crate::{BacktestError, Result};
use bus::EventBus;
use exchange::{ExchangeConfig, ExchangeConnector, SimulatedExchange};
use oms::{Portfolio, RiskLimits};
use quant::{PerformanceReport, PortfolioSnapshot};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use strategies::{Strategy, StrategyManager};
use types::{
    Cash, Price, Symbol, SystemEvent, SystemEventKind, TimestampMs, TradeEvent,
};

/// Replays historical trades through an isolated event mesh.
///
/// Each backtester owns its own [`EventBus`], portfolio, deterministic
/// exchange (instant fills, no randomness, no slippage) and strategy
/// manager, so multiple backtests run independently in one process.
pub struct Backtester {
    bus: EventBus,
    portfolio: Arc<Portfolio>,
    exchange: SimulatedExchange,
    strategies: StrategyManager,
    initial_capital: Cash,
    risk_free_rate: f64,
    records: Vec<TradeRecord>,
    snapshots: Vec<PortfolioSnapshot>,
    time_range: Option<(TimestampMs, TimestampMs)>,
    symbols: Vec<Symbol>,
}

impl Backtester {
    pub fn new(initial_capital: Cash) -> Self {
        let bus = EventBus::new();
        let portfolio = Arc::new(Portfolio::new(
            bus.clone(),
            RiskLimits::default().with_initial_capital(initial_capital),
        ));
        let exchange = SimulatedExchange::new(bus.clone(), ExchangeConfig::deterministic());
        let strategies = StrategyManager::new(bus.clone());

        Self {
            bus,
            portfolio,
            exchange,
            strategies,
            initial_capital,
            risk_free_rate: 0.02,
            records: Vec::new(),
            snapshots: Vec::new(),
            time_range: None,
            symbols: Vec::new(),
        }
    }

    /// The backtester's isolated bus, for attaching extra observers.
    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn portfolio(&self) -> &Arc<Portfolio> {
        &self.portfolio
    }

    /// Register a strategy; it is started by `run`.
    pub fn add_strategy(&self, strategy: Arc<dyn Strategy>) {
        self.strategies.add(strategy);
    }

    /// Load historical data from a CSV file.
    pub fn load_csv(&mut self, path: impl AsRef<Path>) -> Result<()> {
        self.records = load_csv(path)?;
        Ok(())
    }

    /// Load pre-parsed historical data.
    pub fn load_records(&mut self, records: Vec<TradeRecord>) {
        self.records = records;
    }

    /// Restrict the replay to `[start, end]`.
    pub fn set_time_range(&mut self, start: TimestampMs, end: TimestampMs) {
        self.time_range = Some((start, end));
    }

    /// Restrict the replay to these symbols.
    pub fn set_symbols(&mut self, symbols: Vec<Symbol>) {
        self.symbols = symbols;
    }

    pub fn set_risk_free_rate(&mut self, rate: f64) {
        self.risk_free_rate = rate;
    }

    /// Replay the loaded data and compute the performance report.
    pub fn run(&mut self) -> Result<PerformanceReport> {
        let replay = self.filtered_records()?;
        if self.strategies.is_empty() {
            return Err(BacktestError::NoStrategies);
        }

        tracing::info!(
            target: "backtest",
            records = replay.len(),
            strategies = self.strategies.len(),
            "starting replay"
        );
        self.snapshots.clear();

        self.bus.publish(
            &SystemEvent::new(SystemEventKind::TradingStart, "backtest replay starting").into(),
        );
        self.exchange.start();
        self.strategies.start_all();

        let mut marks: HashMap<Symbol, Price> = HashMap::new();
        self.take_snapshot(replay[0].timestamp_ms, &marks);

        for record in &replay {
            self.exchange.set_market_price(record.symbol.clone(), record.price);
            marks.insert(record.symbol.clone(), record.price);

            self.bus.publish(
                &TradeEvent {
                    symbol: record.symbol.clone(),
                    price: record.price,
                    size: record.volume,
                }
                .into(),
            );

            self.take_snapshot(record.timestamp_ms, &marks);
        }

        self.strategies.stop_all();
        self.exchange.stop();
        self.bus.publish(
            &SystemEvent::new(SystemEventKind::TradingStop, "backtest replay finished").into(),
        );

        let report = PerformanceReport::from_snapshots(
            &self.snapshots,
            self.initial_capital,
            self.risk_free_rate,
        );
        tracing::info!(
            target: "backtest",
            total_return = report.total_return,
            trades = report.total_trades,
            "replay finished"
        );
        Ok(report)
    }

    /// Snapshots captured by the last `run`.
    pub fn snapshots(&self) -> &[PortfolioSnapshot] {
        &self.snapshots
    }

    /// Reset portfolio state and snapshots for a fresh run over the same
    /// wiring.
    pub fn reset(&mut self) {
        self.portfolio.clear();
        self.snapshots.clear();
    }

    fn filtered_records(&self) -> Result<Vec<TradeRecord>> {
        if self.records.is_empty() {
            return Err(BacktestError::NoData);
        }

        let mut replay = match self.time_range {
            Some((start, end)) => filter_by_time_range(&self.records, start, end),
            None => self.records.clone(),
        };
        if !self.symbols.is_empty() {
            let mut by_symbol = Vec::new();
            for symbol in &self.symbols {
                by_symbol.extend(filter_by_symbol(&replay, symbol));
            }
            by_symbol.sort_by_key(|r| r.timestamp_ms);
            replay = by_symbol;
        }

        if replay.is_empty() {
            return Err(BacktestError::NoData);
        }
        Ok(replay)
    }

    fn take_snapshot(&mut self, timestamp_ms: TimestampMs, marks: &HashMap<Symbol, Price>) {
        self.snapshots.push(PortfolioSnapshot {
            timestamp_ms,
            portfolio_value: self.portfolio.portfolio_value(marks),
            cash: self.portfolio.cash(),
            realized_pnl: self.portfolio.realized_pnl(),
            unrealized_pnl: self.portfolio.unrealized_pnl(marks),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strategies::{SmaCrossover, SmaParams};
    use types::Quantity;

    fn records(prices: &[(u64, &str, f64)]) -> Vec<TradeRecord> {
        prices
            .iter()
            .map(|(ts, symbol, price)| TradeRecord {
                timestamp_ms: *ts,
                symbol: symbol.to_string(),
                price: Price::from_float(*price),
                volume: Quantity(100),
            })
            .collect()
    }

    #[test]
    fn test_run_without_data_fails() {
        let mut bt = Backtester::new(Cash::from_float(100_000.0));
        assert!(matches!(bt.run(), Err(BacktestError::NoData)));
    }

    #[test]
    fn test_run_without_strategies_fails() {
        let mut bt = Backtester::new(Cash::from_float(100_000.0));
        bt.load_records(records(&[(1, "AAPL", 100.0)]));
        assert!(matches!(bt.run(), Err(BacktestError::NoStrategies)));
    }

    #[test]
    fn test_snapshots_track_replay() {
        let mut bt = Backtester::new(Cash::from_float(100_000.0));
        bt.load_records(records(&[
            (1, "AAPL", 100.0),
            (2, "AAPL", 101.0),
            (3, "AAPL", 102.0),
        ]));
        bt.add_strategy(Arc::new(SmaCrossover::new(
            "sma",
            bt.portfolio().clone(),
            "AAPL",
            SmaParams::default().with_periods(2, 3).with_position_size(10),
        )));

        bt.run().unwrap();
        // Initial snapshot plus one per record.
        assert_eq!(bt.snapshots().len(), 4);
        assert_eq!(bt.snapshots()[0].cash, Cash::from_float(100_000.0));
    }

    #[test]
    fn test_symbol_filter() {
        let mut bt = Backtester::new(Cash::from_float(100_000.0));
        bt.load_records(records(&[
            (1, "AAPL", 100.0),
            (2, "MSFT", 300.0),
            (3, "AAPL", 101.0),
        ]));
        bt.set_symbols(vec!["AAPL".to_string()]);
        bt.add_strategy(Arc::new(SmaCrossover::new(
            "sma",
            bt.portfolio().clone(),
            "AAPL",
            SmaParams::default().with_periods(2, 3).with_position_size(10),
        )));

        bt.run().unwrap();
        // Initial snapshot plus the two AAPL records.
        assert_eq!(bt.snapshots().len(), 3);
    }

    #[test]
    fn test_time_range_filter_can_empty_out() {
        let mut bt = Backtester::new(Cash::from_float(100_000.0));
        bt.load_records(records(&[(10, "AAPL", 100.0)]));
        bt.set_time_range(100, 200);
        assert!(matches!(bt.run(), Err(BacktestError::NoData)));
    }

    #[test]
    fn test_reset_restores_capital() {
        let mut bt = Backtester::new(Cash::from_float(100_000.0));
        bt.load_records(records(&[
            (1, "AAPL", 100.0),
            (2, "AAPL", 99.0),
            (3, "AAPL", 98.0),
            (4, "AAPL", 100.0),
            (5, "AAPL", 102.0),
        ]));
        bt.add_strategy(Arc::new(SmaCrossover::new(
            "sma",
            bt.portfolio().clone(),
            "AAPL",
            SmaParams::default().with_periods(2, 3).with_position_size(100),
        )));
        bt.run().unwrap();
        assert_ne!(bt.portfolio().cash(), Cash::from_float(100_000.0));

        bt.reset();
        assert_eq!(bt.portfolio().cash(), Cash::from_float(100_000.0));
        assert!(bt.snapshots().is_empty());
    }
}
