//! Historical data replay.
//!
//! [`Backtester`] wires an isolated bus, a portfolio, a deterministic
//! simulated exchange and a strategy manager, replays a trade series
//! through the event mesh, and reports performance.

mod data;
mod runner;

use std::fmt;
use std::io;

pub use data::{filter_by_symbol, filter_by_time_range, load_csv, TradeRecord};
pub use runner::Backtester;

/// Result type for backtest operations.
pub type Result<T> = std::result::Result<T, BacktestError>;

/// Errors surfaced by data loading and the replay driver.
#[derive(Debug)]
pub enum BacktestError {
    /// Reading the data file failed.
    Io(io::Error),
    /// A data row could not be parsed.
    Parse { line: usize, message: String },
    /// `run` was called with no historical data loaded.
    NoData,
    /// `run` was called with no strategies registered.
    NoStrategies,
}

impl fmt::Display for BacktestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BacktestError::Io(e) => write!(f, "failed to read data file: {}", e),
            BacktestError::Parse { line, message } => {
                write!(f, "bad data row at line {}: {}", line, message)
            }
            BacktestError::NoData => write!(f, "no historical data loaded"),
            BacktestError::NoStrategies => write!(f, "no strategies registered"),
        }
    }
}

impl std::error::Error for BacktestError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            BacktestError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for BacktestError {
    fn from(e: io::Error) -> Self {
        BacktestError::Io(e)
    }
}
