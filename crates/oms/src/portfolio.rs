//! Capital tracking and the pre-trade risk gate.

use crate::manager::OrderManager;
use bus::{EventBus, SubscriptionId};
use config::ConfigStore;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use types::{
    Cash, EventBody, EventKind, OrderId, OrderType, Price, Quantity, RiskEvent, RiskViolation,
    Side, Symbol,
};

/// Risk limits and starting capital for a portfolio.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RiskLimits {
    pub initial_capital: Cash,
    /// Maximum absolute position notional per symbol.
    pub max_position_notional: Cash,
    /// Maximum gross exposure across all symbols.
    pub max_gross_exposure: Cash,
}

impl Default for RiskLimits {
    fn default() -> Self {
        Self {
            initial_capital: Cash::from_float(1_000_000.0),
            max_position_notional: Cash::from_float(1_000_000.0),
            max_gross_exposure: Cash::from_float(5_000_000.0),
        }
    }
}

impl RiskLimits {
    /// Read limits from the config store, falling back to defaults.
    pub fn from_store(store: &ConfigStore) -> Self {
        Self {
            initial_capital: Cash::from_float(store.get_f64("portfolio.initial_capital", 1_000_000.0)),
            max_position_notional: Cash::from_float(
                store.get_f64("portfolio.max_position_size", 1_000_000.0),
            ),
            max_gross_exposure: Cash::from_float(
                store.get_f64("portfolio.max_portfolio_exposure", 5_000_000.0),
            ),
        }
    }

    pub fn with_initial_capital(mut self, capital: Cash) -> Self {
        self.initial_capital = capital;
        self
    }

    pub fn with_max_position_notional(mut self, max: Cash) -> Self {
        self.max_position_notional = max;
        self
    }

    pub fn with_max_gross_exposure(mut self, max: Cash) -> Self {
        self.max_gross_exposure = max;
        self
    }
}

struct Ledger {
    cash: Cash,
    max_position_notional: Cash,
    max_gross_exposure: Cash,
}

struct PortfolioInner {
    ledger: Mutex<Ledger>,
}

/// Risk gate and capital account wrapped around one [`OrderManager`].
///
/// Cash is the sole capital account: every BUY fill debits `price * qty`,
/// every SELL fill credits it. The pre-trade check runs under the ledger
/// lock so capacity decisions see a consistent snapshot; the delegated
/// `OrderManager::submit` is issued after the lock is released (the manager
/// takes its own lock, and lock order is always Portfolio then manager).
pub struct Portfolio {
    bus: EventBus,
    inner: Arc<PortfolioInner>,
    initial_capital: Cash,
    orders: OrderManager,
    fill_sub: SubscriptionId,
}

impl Portfolio {
    pub fn new(bus: EventBus, limits: RiskLimits) -> Self {
        let inner = Arc::new(PortfolioInner {
            ledger: Mutex::new(Ledger {
                cash: limits.initial_capital,
                max_position_notional: limits.max_position_notional,
                max_gross_exposure: limits.max_gross_exposure,
            }),
        });

        let weak: Weak<PortfolioInner> = Arc::downgrade(&inner);
        let fill_sub = bus.subscribe(EventKind::Fill, move |ev| {
            if let (Some(inner), EventBody::Fill(fill)) = (weak.upgrade(), ev.body()) {
                let mut ledger = inner.ledger.lock();
                let value = fill.notional();
                match fill.side {
                    Side::Buy => ledger.cash -= value,
                    Side::Sell => ledger.cash += value,
                }
            }
        });

        Self {
            bus: bus.clone(),
            inner,
            initial_capital: limits.initial_capital,
            orders: OrderManager::new(bus),
            fill_sub,
        }
    }

    /// Submit an order through the pre-trade risk gate.
    ///
    /// Returns `false` without publishing any order event when a check
    /// fails; the rejection is announced as a [`RiskEvent`]. Cash is not
    /// reserved at submission time; it moves only on fills.
    pub fn submit(
        &self,
        id: OrderId,
        symbol: impl Into<Symbol>,
        side: Side,
        order_type: OrderType,
        price: Price,
        quantity: Quantity,
        marks: &HashMap<Symbol, Price>,
    ) -> bool {
        let symbol = symbol.into();
        if quantity.is_zero() {
            tracing::warn!(target: "risk", order_id = %id, "ignoring zero-quantity submission");
            return false;
        }

        let violation = {
            let ledger = self.inner.ledger.lock();
            self.pre_trade_check(&ledger, &symbol, side, price, quantity, marks)
        };

        if let Some(violation) = violation {
            tracing::warn!(
                target: "risk",
                order_id = %id,
                %symbol,
                %violation,
                "pre-trade check rejected order"
            );
            self.bus.publish(
                &RiskEvent {
                    symbol,
                    violation,
                    message: format!("order {} rejected: {}", id, violation),
                }
                .into(),
            );
            return false;
        }

        self.orders.submit(id, symbol, side, order_type, price, quantity)
    }

    /// Request cancellation of an order.
    pub fn cancel(&self, id: &OrderId) {
        self.orders.cancel(id);
    }

    pub fn cash(&self) -> Cash {
        self.inner.ledger.lock().cash
    }

    pub fn initial_capital(&self) -> Cash {
        self.initial_capital
    }

    /// Portfolio value at the given marks: cash plus mark-to-market P&L on
    /// open positions.
    pub fn portfolio_value(&self, marks: &HashMap<Symbol, Price>) -> Cash {
        self.cash() + self.orders.total_unrealized_pnl(marks)
    }

    pub fn realized_pnl(&self) -> Cash {
        self.orders.total_realized_pnl()
    }

    pub fn unrealized_pnl(&self, marks: &HashMap<Symbol, Price>) -> Cash {
        self.orders.total_unrealized_pnl(marks)
    }

    pub fn total_pnl(&self, marks: &HashMap<Symbol, Price>) -> Cash {
        self.realized_pnl() + self.unrealized_pnl(marks)
    }

    /// Sum of absolute position notionals over marked symbols.
    pub fn gross_exposure(&self, marks: &HashMap<Symbol, Price>) -> Cash {
        self.orders
            .positions()
            .iter()
            .filter_map(|p| marks.get(p.symbol()).map(|mark| p.notional(*mark)))
            .sum()
    }

    /// Long value minus short value over marked symbols.
    pub fn net_exposure(&self, marks: &HashMap<Symbol, Price>) -> Cash {
        self.orders
            .positions()
            .iter()
            .filter_map(|p| marks.get(p.symbol()).map(|mark| p.signed_notional(*mark)))
            .sum()
    }

    pub fn max_position_notional(&self) -> Cash {
        self.inner.ledger.lock().max_position_notional
    }

    pub fn set_max_position_notional(&self, max: Cash) {
        self.inner.ledger.lock().max_position_notional = max;
    }

    pub fn max_gross_exposure(&self) -> Cash {
        self.inner.ledger.lock().max_gross_exposure
    }

    pub fn set_max_gross_exposure(&self, max: Cash) {
        self.inner.ledger.lock().max_gross_exposure = max;
    }

    /// The wrapped order manager.
    pub fn order_manager(&self) -> &OrderManager {
        &self.orders
    }

    /// Reset cash to the initial capital and drop all orders and positions.
    pub fn clear(&self) {
        self.inner.ledger.lock().cash = self.initial_capital;
        self.orders.clear();
    }

    fn pre_trade_check(
        &self,
        ledger: &Ledger,
        symbol: &Symbol,
        side: Side,
        price: Price,
        quantity: Quantity,
        marks: &HashMap<Symbol, Price>,
    ) -> Option<RiskViolation> {
        let order_value = price * quantity;
        if side == Side::Buy && order_value > ledger.cash {
            return Some(RiskViolation::InsufficientCash);
        }

        let current_qty = self
            .orders
            .position(symbol)
            .map_or(0, |p| p.quantity());
        let prospective_qty = current_qty + quantity.signed(side == Side::Sell);
        let prospective_notional = Cash(prospective_qty.abs() * price.raw());
        if prospective_notional > ledger.max_position_notional {
            return Some(RiskViolation::PositionLimitExceeded);
        }

        // Exposure from every other symbol, at its mark; unmarked symbols
        // are skipped.
        let other_exposure: Cash = self
            .orders
            .positions()
            .iter()
            .filter(|p| p.symbol() != symbol)
            .filter_map(|p| marks.get(p.symbol()).map(|mark| p.notional(*mark)))
            .sum();
        if other_exposure + prospective_notional > ledger.max_gross_exposure {
            return Some(RiskViolation::ExposureLimitExceeded);
        }

        None
    }
}

impl Drop for Portfolio {
    fn drop(&mut self) {
        self.bus.unsubscribe(self.fill_sub);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use types::{Event, FillEvent};

    fn limits(capital: f64) -> RiskLimits {
        RiskLimits::default().with_initial_capital(Cash::from_float(capital))
    }

    fn fill(id: &str, symbol: &str, side: Side, qty: u64, price: f64) -> Event {
        FillEvent {
            order_id: OrderId::new(id),
            symbol: symbol.to_string(),
            side,
            fill_price: Price::from_float(price),
            fill_quantity: Quantity(qty),
            execution_id: None,
        }
        .into()
    }

    fn marks(pairs: &[(&str, f64)]) -> HashMap<Symbol, Price> {
        pairs
            .iter()
            .map(|(s, p)| (s.to_string(), Price::from_float(*p)))
            .collect()
    }

    fn submit(
        portfolio: &Portfolio,
        id: &str,
        symbol: &str,
        side: Side,
        qty: u64,
        price: f64,
        marks: &HashMap<Symbol, Price>,
    ) -> bool {
        portfolio.submit(
            OrderId::new(id),
            symbol,
            side,
            OrderType::Market,
            Price::from_float(price),
            Quantity(qty),
            marks,
        )
    }

    #[test]
    fn test_cash_moves_on_fills() {
        let bus = EventBus::new();
        let portfolio = Portfolio::new(bus.clone(), limits(100_000.0));

        bus.publish(&fill("a-1", "AAPL", Side::Buy, 100, 150.0));
        assert_eq!(portfolio.cash(), Cash::from_float(85_000.0));

        bus.publish(&fill("a-2", "AAPL", Side::Sell, 50, 160.0));
        assert_eq!(portfolio.cash(), Cash::from_float(93_000.0));
    }

    #[test]
    fn test_rejection_by_cash_is_idempotent() {
        let bus = EventBus::new();
        let portfolio = Portfolio::new(bus.clone(), limits(10_000.0));
        let m = marks(&[("AAPL", 150.0)]);

        let published = bus.processed_count();
        let order_events = Arc::new(AtomicUsize::new(0));
        {
            let order_events = order_events.clone();
            bus.subscribe(EventKind::Order, move |_| {
                order_events.fetch_add(1, Ordering::SeqCst);
            });
        }

        // 100 * 150 = 15,000 > 10,000: rejected.
        assert!(!submit(&portfolio, "a-1", "AAPL", Side::Buy, 100, 150.0, &m));
        assert_eq!(order_events.load(Ordering::SeqCst), 0);
        assert_eq!(portfolio.cash(), Cash::from_float(10_000.0));
        assert!(portfolio.order_manager().order(&OrderId::new("a-1")).is_none());
        // Only the risk event went out.
        assert_eq!(bus.processed_count(), published + 1);

        // 50 * 150 = 7,500: accepted.
        assert!(submit(&portfolio, "a-2", "AAPL", Side::Buy, 50, 150.0, &m));
        assert_eq!(order_events.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_rejection_publishes_risk_event() {
        let bus = EventBus::new();
        let portfolio = Portfolio::new(bus.clone(), limits(10_000.0));
        let risk_events = Arc::new(AtomicUsize::new(0));
        {
            let risk_events = risk_events.clone();
            bus.subscribe(EventKind::Risk, move |ev| {
                if let EventBody::Risk(r) = ev.body() {
                    assert_eq!(r.violation, RiskViolation::InsufficientCash);
                    risk_events.fetch_add(1, Ordering::SeqCst);
                }
            });
        }

        submit(&portfolio, "a-1", "AAPL", Side::Buy, 100, 150.0, &marks(&[]));
        assert_eq!(risk_events.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_position_limit() {
        let bus = EventBus::new();
        let portfolio = Portfolio::new(
            bus.clone(),
            limits(1_000_000.0).with_max_position_notional(Cash::from_float(20_000.0)),
        );
        let m = marks(&[("AAPL", 150.0)]);

        // 200 * 150 = 30,000 > 20,000.
        assert!(!submit(&portfolio, "a-1", "AAPL", Side::Buy, 200, 150.0, &m));
        // 100 * 150 = 15,000 passes.
        assert!(submit(&portfolio, "a-2", "AAPL", Side::Buy, 100, 150.0, &m));
    }

    #[test]
    fn test_exposure_cap_counts_other_symbols() {
        let bus = EventBus::new();
        let portfolio = Portfolio::new(
            bus.clone(),
            limits(1_000_000.0)
                .with_max_position_notional(Cash::from_float(100_000.0))
                .with_max_gross_exposure(Cash::from_float(50_000.0)),
        );
        let m = marks(&[("AAPL", 150.0), ("GOOGL", 2_800.0)]);

        // 200 AAPL @ 150 = 30,000: accepted and filled.
        assert!(submit(&portfolio, "a-1", "AAPL", Side::Buy, 200, 150.0, &m));
        bus.publish(&fill("a-1", "AAPL", Side::Buy, 200, 150.0));

        // 10 GOOGL @ 2800 adds 28,000 -> 58,000 > 50,000: rejected.
        assert!(!submit(&portfolio, "g-1", "GOOGL", Side::Buy, 10, 2_800.0, &m));

        // 5 GOOGL @ 2800 adds 14,000 -> 44,000: accepted.
        assert!(submit(&portfolio, "g-2", "GOOGL", Side::Buy, 5, 2_800.0, &m));
    }

    #[test]
    fn test_portfolio_value_is_cash_plus_unrealized() {
        let bus = EventBus::new();
        let portfolio = Portfolio::new(bus.clone(), limits(100_000.0));

        bus.publish(&fill("a-1", "AAPL", Side::Buy, 100, 150.0));
        let m = marks(&[("AAPL", 160.0)]);
        assert_eq!(portfolio.unrealized_pnl(&m), Cash::from_float(1_000.0));
        assert_eq!(
            portfolio.portfolio_value(&m),
            portfolio.cash() + portfolio.unrealized_pnl(&m)
        );
    }

    #[test]
    fn test_cash_conservation_when_flat() {
        let bus = EventBus::new();
        let portfolio = Portfolio::new(bus.clone(), limits(100_000.0));

        // A closed round trip on two symbols.
        bus.publish(&fill("a-1", "AAPL", Side::Buy, 100, 100.0));
        bus.publish(&fill("a-2", "AAPL", Side::Sell, 100, 105.0));
        bus.publish(&fill("b-1", "MSFT", Side::Sell, 20, 300.0));
        bus.publish(&fill("b-2", "MSFT", Side::Buy, 20, 310.0));

        let delta = portfolio.cash() - portfolio.initial_capital();
        assert_eq!(delta, portfolio.realized_pnl());
        // 100 * 5 - 20 * 10 = 300
        assert_eq!(delta, Cash::from_float(300.0));
    }

    #[test]
    fn test_exposures() {
        let bus = EventBus::new();
        let portfolio = Portfolio::new(bus.clone(), limits(1_000_000.0));

        bus.publish(&fill("a-1", "AAPL", Side::Buy, 100, 150.0));
        bus.publish(&fill("m-1", "MSFT", Side::Sell, 50, 300.0));

        let m = marks(&[("AAPL", 150.0), ("MSFT", 300.0)]);
        assert_eq!(portfolio.gross_exposure(&m), Cash::from_float(30_000.0));
        assert_eq!(portfolio.net_exposure(&m), Cash::from_float(0.0));
    }

    #[test]
    fn test_limit_mutation() {
        let bus = EventBus::new();
        let portfolio = Portfolio::new(bus.clone(), limits(1_000_000.0));
        portfolio.set_max_position_notional(Cash::from_float(1_000.0));
        assert_eq!(portfolio.max_position_notional(), Cash::from_float(1_000.0));

        let m = marks(&[("AAPL", 150.0)]);
        assert!(!submit(&portfolio, "a-1", "AAPL", Side::Buy, 10, 150.0, &m));
    }

    #[test]
    fn test_clear_resets_cash() {
        let bus = EventBus::new();
        let portfolio = Portfolio::new(bus.clone(), limits(100_000.0));
        bus.publish(&fill("a-1", "AAPL", Side::Buy, 10, 100.0));
        assert_ne!(portfolio.cash(), portfolio.initial_capital());

        portfolio.clear();
        assert_eq!(portfolio.cash(), Cash::from_float(100_000.0));
        assert!(portfolio.order_manager().position("AAPL").is_none());
    }
}
