//! The contract every exchange implementation follows, simulated or real.

use types::{OrderId, OrderType, Price, Quantity, Side, Symbol};

/// Exchange connectivity seam.
///
/// Implementations publish order lifecycle and fill events asynchronously;
/// callers observe results through the bus, not through return values.
pub trait ExchangeConnector: Send + Sync {
    /// Connect and begin consuming order flow.
    fn start(&self);

    /// Disconnect; in-flight work is cancelled.
    fn stop(&self);

    fn is_running(&self) -> bool;

    /// Hand an order to the venue.
    fn submit_order(
        &self,
        order_id: OrderId,
        symbol: Symbol,
        side: Side,
        order_type: OrderType,
        price: Price,
        quantity: Quantity,
    );

    /// Request cancellation of a resting order.
    fn cancel_order(&self, order_id: &OrderId);
}
