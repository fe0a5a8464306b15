//! Exchange connectivity.
//!
//! [`ExchangeConnector`] is the seam every venue implementation fills in;
//! [`SimulatedExchange`] closes the event loop for tests and backtests by
//! synthesising fills with configurable latency, slippage, partial-fill and
//! rejection behavior.

mod conf;
mod connector;
mod sim;

pub use conf::ExchangeConfig;
pub use connector::ExchangeConnector;
pub use sim::SimulatedExchange;
