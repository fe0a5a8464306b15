//! Post-run performance analysis from portfolio snapshots.

use crate::stats;
use serde::{Deserialize, Serialize};
use std::fmt;
use types::{Cash, TimestampMs};

/// Portfolio state captured at one point of a run.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PortfolioSnapshot {
    pub timestamp_ms: TimestampMs,
    pub portfolio_value: Cash,
    pub cash: Cash,
    pub realized_pnl: Cash,
    pub unrealized_pnl: Cash,
}

/// Aggregate performance metrics for a run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PerformanceReport {
    /// Fractional return on initial capital.
    pub total_return: f64,
    pub total_return_dollars: f64,
    /// Annualised Sharpe ratio over snapshot-to-snapshot returns.
    pub sharpe_ratio: f64,
    /// Maximum drawdown as a fraction of the running peak.
    pub max_drawdown: f64,
    pub max_drawdown_dollars: f64,
    pub total_trades: usize,
    pub winning_trades: usize,
    pub losing_trades: usize,
    /// Fraction of closing trades that were profitable.
    pub win_rate: f64,
    pub average_win: f64,
    pub average_loss: f64,
    /// Gross profit divided by gross loss.
    pub profit_factor: f64,
    pub largest_win: f64,
    pub largest_loss: f64,
    pub start_time_ms: TimestampMs,
    pub end_time_ms: TimestampMs,
    pub duration_days: f64,
}

/// Realized-P&L changes below a cent are snapshot noise, not closed trades.
const TRADE_EPSILON: Cash = Cash(100);

/// Trading days per year used for Sharpe annualisation.
const TRADING_DAYS: f64 = 252.0;

impl PerformanceReport {
    /// Compute the full report from a snapshot series.
    ///
    /// `risk_free_rate` is annual (e.g. 0.02); it is converted to a
    /// per-period rate assuming daily snapshots.
    pub fn from_snapshots(
        snapshots: &[PortfolioSnapshot],
        initial_capital: Cash,
        risk_free_rate: f64,
    ) -> Self {
        let mut report = Self::default();
        if snapshots.is_empty() {
            return report;
        }

        let values: Vec<f64> = snapshots.iter().map(|s| s.portfolio_value.to_float()).collect();
        let initial = initial_capital.to_float();
        let final_value = *values.last().expect("non-empty");

        if initial != 0.0 {
            report.total_return = (final_value - initial) / initial;
        }
        report.total_return_dollars = final_value - initial;

        report.start_time_ms = snapshots.first().expect("non-empty").timestamp_ms;
        report.end_time_ms = snapshots.last().expect("non-empty").timestamp_ms;
        report.duration_days =
            (report.end_time_ms.saturating_sub(report.start_time_ms)) as f64 / 86_400_000.0;

        report.sharpe_ratio = sharpe_ratio(&stats::returns(&values), risk_free_rate);
        report.max_drawdown = stats::max_drawdown(&values);
        report.max_drawdown_dollars = max_drawdown_dollars(&values);

        report.fill_trade_stats(snapshots);
        report
    }

    fn fill_trade_stats(&mut self, snapshots: &[PortfolioSnapshot]) {
        let mut gross_win = 0.0;
        let mut gross_loss = 0.0;
        let mut previous = Cash::ZERO;

        for snapshot in snapshots {
            let change = snapshot.realized_pnl - previous;
            if change.abs() > TRADE_EPSILON {
                self.total_trades += 1;
                let dollars = change.to_float();
                if change.is_positive() {
                    self.winning_trades += 1;
                    gross_win += dollars;
                    self.largest_win = self.largest_win.max(dollars);
                } else {
                    self.losing_trades += 1;
                    gross_loss += dollars.abs();
                    if dollars < self.largest_loss {
                        self.largest_loss = dollars;
                    }
                }
            }
            previous = snapshot.realized_pnl;
        }

        if self.total_trades > 0 {
            self.win_rate = self.winning_trades as f64 / self.total_trades as f64;
        }
        if self.winning_trades > 0 {
            self.average_win = gross_win / self.winning_trades as f64;
        }
        if self.losing_trades > 0 {
            self.average_loss = gross_loss / self.losing_trades as f64;
        }
        if gross_loss > 0.0 {
            self.profit_factor = gross_win / gross_loss;
        }
    }
}

fn sharpe_ratio(period_returns: &[f64], risk_free_rate: f64) -> f64 {
    if period_returns.is_empty() {
        return 0.0;
    }
    let per_period_rf = (1.0 + risk_free_rate).powf(1.0 / TRADING_DAYS) - 1.0;
    let excess: Vec<f64> = period_returns.iter().map(|r| r - per_period_rf).collect();

    let mean = stats::mean(&excess).unwrap_or(0.0);
    match stats::sample_std_dev(&excess) {
        Some(sd) if sd > 0.0 => (mean / sd) * TRADING_DAYS.sqrt(),
        _ => 0.0,
    }
}

fn max_drawdown_dollars(values: &[f64]) -> f64 {
    let mut peak = f64::MIN;
    let mut worst: f64 = 0.0;
    for &v in values {
        if v > peak {
            peak = v;
        }
        worst = worst.max(peak - v);
    }
    worst
}

impl fmt::Display for PerformanceReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== Backtest Results ===")?;
        writeln!(f, "Total Return:     {:.2}%", self.total_return * 100.0)?;
        writeln!(f, "Total Return ($): ${:.2}", self.total_return_dollars)?;
        writeln!(f, "Sharpe Ratio:     {:.3}", self.sharpe_ratio)?;
        writeln!(f, "Max Drawdown:     {:.2}%", self.max_drawdown * 100.0)?;
        writeln!(f, "Max Drawdown ($): ${:.2}", self.max_drawdown_dollars)?;
        writeln!(f, "Trades:           {} ({} won / {} lost)", self.total_trades, self.winning_trades, self.losing_trades)?;
        writeln!(f, "Win Rate:         {:.2}%", self.win_rate * 100.0)?;
        writeln!(f, "Average Win:      ${:.2}", self.average_win)?;
        writeln!(f, "Average Loss:     ${:.2}", self.average_loss)?;
        writeln!(f, "Profit Factor:    {:.3}", self.profit_factor)?;
        writeln!(f, "Largest Win:      ${:.2}", self.largest_win)?;
        writeln!(f, "Largest Loss:     ${:.2}", self.largest_loss)?;
        write!(f, "Duration:         {:.2} days", self.duration_days)
    }
}
