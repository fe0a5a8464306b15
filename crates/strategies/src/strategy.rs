//! The strategy capability set and its submission helpers.

use oms::Portfolio;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use types::{FillEvent, OrderEvent, OrderId, OrderType, Price, Quantity, QuoteEvent, Side, Symbol, TradeEvent};

/// A trading strategy.
///
/// Callbacks take `&self`: strategies own their mutable state behind
/// interior mutability (a `Mutex` over a small state struct is the usual
/// shape) so the manager can fan events out without holding any lock of its
/// own. Because fills can be delivered synchronously while an `on_trade`
/// frame is still on the stack, a strategy must release its state lock
/// before submitting orders.
pub trait Strategy: Send + Sync {
    fn name(&self) -> &str;

    /// Called once when the strategy transitions to running.
    fn on_start(&self) {}

    /// Called once when the strategy transitions to stopped.
    fn on_stop(&self) {}

    fn on_quote(&self, _quote: &QuoteEvent) {}

    fn on_trade(&self, _trade: &TradeEvent) {}

    fn on_order(&self, _order: &OrderEvent) {}

    fn on_fill(&self, _fill: &FillEvent) {}
}

/// Shared plumbing embedded by concrete strategies: a name, the portfolio
/// handle, and a monotonic order-id counter.
pub struct StrategyCore {
    name: String,
    portfolio: Arc<Portfolio>,
    order_seq: AtomicU64,
}

impl StrategyCore {
    pub fn new(name: impl Into<String>, portfolio: Arc<Portfolio>) -> Self {
        Self {
            name: name.into(),
            portfolio,
            order_seq: AtomicU64::new(0),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn portfolio(&self) -> &Arc<Portfolio> {
        &self.portfolio
    }

    /// Mint the next order id: `"{name}-{n}"`.
    pub fn next_order_id(&self) -> OrderId {
        let n = self.order_seq.fetch_add(1, Ordering::Relaxed) + 1;
        OrderId::new(format!("{}-{}", self.name, n))
    }

    /// Submit through the risk gate. Returns the order id when the gate
    /// accepts, `None` when it rejects.
    #[allow(clippy::too_many_arguments)]
    pub fn submit_order(
        &self,
        symbol: impl Into<Symbol>,
        side: Side,
        order_type: OrderType,
        price: Price,
        quantity: Quantity,
        marks: &HashMap<Symbol, Price>,
    ) -> Option<OrderId> {
        let id = self.next_order_id();
        self.portfolio
            .submit(id.clone(), symbol, side, order_type, price, quantity, marks)
            .then_some(id)
    }

    pub fn cancel_order(&self, id: &OrderId) {
        self.portfolio.cancel(id);
    }

    /// Signed position quantity for a symbol, zero when flat or unknown.
    pub fn position_qty(&self, symbol: &str) -> i64 {
        self.portfolio
            .order_manager()
            .position(symbol)
            .map_or(0, |p| p.quantity())
    }
}
