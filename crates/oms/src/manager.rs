//! Order and position accounting driven by the event stream.

use bus::{EventBus, SubscriptionId};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use types::{
    EventBody, EventKind, FillEvent, Order, OrderEvent, OrderId, OrderStatus, OrderType, Position,
    Price, Quantity, Side, Symbol,
};

#[derive(Default)]
struct ManagerState {
    orders: HashMap<OrderId, Order>,
    positions: HashMap<Symbol, Position>,
}

struct ManagerInner {
    state: Mutex<ManagerState>,
}

/// Central order and position bookkeeper.
///
/// Subscribes to Order and Fill events; its own `submit`/`cancel` publish the
/// request legs (`PendingNew`/`PendingCancel`) that the exchange consumes.
/// The state lock is held only for map mutations, never across a publish, so
/// downstream handlers can call back into the manager freely.
pub struct OrderManager {
    bus: EventBus,
    inner: Arc<ManagerInner>,
    order_sub: SubscriptionId,
    fill_sub: SubscriptionId,
}

impl OrderManager {
    pub fn new(bus: EventBus) -> Self {
        let inner = Arc::new(ManagerInner {
            state: Mutex::new(ManagerState::default()),
        });

        // Subscriptions hold a Weak so the bus never keeps the manager alive.
        let weak: Weak<ManagerInner> = Arc::downgrade(&inner);
        let order_sub = bus.subscribe(EventKind::Order, move |ev| {
            if let (Some(inner), EventBody::Order(order)) = (weak.upgrade(), ev.body()) {
                Self::on_order_event(&inner, order);
            }
        });

        let weak = Arc::downgrade(&inner);
        let fill_sub = bus.subscribe(EventKind::Fill, move |ev| {
            if let (Some(inner), EventBody::Fill(fill)) = (weak.upgrade(), ev.body()) {
                Self::on_fill_event(&inner, fill);
            }
        });

        Self {
            bus,
            inner,
            order_sub,
            fill_sub,
        }
    }

    /// Record a new order and publish its `PendingNew` event.
    ///
    /// Submitting an id that is already present is rejected: the call logs,
    /// returns `false`, and leaves the existing record untouched (no event is
    /// published, matching the risk-gate convention that rejected requests
    /// are observable through the return value).
    pub fn submit(
        &self,
        id: OrderId,
        symbol: impl Into<Symbol>,
        side: Side,
        order_type: OrderType,
        price: Price,
        quantity: Quantity,
    ) -> bool {
        let symbol = symbol.into();
        if quantity.is_zero() {
            tracing::warn!(target: "oms", order_id = %id, "ignoring zero-quantity submission");
            return false;
        }

        {
            let mut state = self.inner.state.lock();
            if state.orders.contains_key(&id) {
                tracing::warn!(target: "oms", order_id = %id, "duplicate order id rejected");
                return false;
            }
            state.orders.insert(
                id.clone(),
                Order::new(id.clone(), symbol.clone(), side, order_type, price, quantity),
            );
        }

        self.bus.publish(
            &OrderEvent {
                order_id: id,
                symbol,
                side,
                order_type,
                status: OrderStatus::PendingNew,
                price,
                quantity,
                filled: Quantity::ZERO,
                reject_reason: None,
            }
            .into(),
        );
        true
    }

    /// Request cancellation of an active order; no-op for unknown or
    /// terminal orders.
    pub fn cancel(&self, id: &OrderId) {
        let snapshot = {
            let state = self.inner.state.lock();
            match state.orders.get(id) {
                Some(order) if order.is_active() => Some((
                    order.symbol.clone(),
                    order.side,
                    order.order_type,
                    order.limit_price,
                    order.quantity,
                    order.filled,
                )),
                _ => None,
            }
        };

        let Some((symbol, side, order_type, price, quantity, filled)) = snapshot else {
            tracing::debug!(target: "oms", order_id = %id, "cancel ignored: unknown or terminal");
            return;
        };

        self.bus.publish(
            &OrderEvent {
                order_id: id.clone(),
                symbol,
                side,
                order_type,
                status: OrderStatus::PendingCancel,
                price,
                quantity,
                filled,
                reject_reason: None,
            }
            .into(),
        );
    }

    pub fn order(&self, id: &OrderId) -> Option<Order> {
        self.inner.state.lock().orders.get(id).cloned()
    }

    pub fn active_orders(&self) -> Vec<Order> {
        self.inner
            .state
            .lock()
            .orders
            .values()
            .filter(|o| o.is_active())
            .cloned()
            .collect()
    }

    pub fn active_orders_for_symbol(&self, symbol: &str) -> Vec<Order> {
        self.inner
            .state
            .lock()
            .orders
            .values()
            .filter(|o| o.is_active() && o.symbol == symbol)
            .cloned()
            .collect()
    }

    pub fn active_order_count(&self) -> usize {
        self.inner
            .state
            .lock()
            .orders
            .values()
            .filter(|o| o.is_active())
            .count()
    }

    pub fn position(&self, symbol: &str) -> Option<Position> {
        self.inner.state.lock().positions.get(symbol).cloned()
    }

    /// All non-flat positions.
    pub fn positions(&self) -> Vec<Position> {
        self.inner
            .state
            .lock()
            .positions
            .values()
            .filter(|p| !p.is_flat())
            .cloned()
            .collect()
    }

    pub fn total_realized_pnl(&self) -> types::Cash {
        self.inner
            .state
            .lock()
            .positions
            .values()
            .map(|p| p.realized_pnl())
            .sum()
    }

    /// Mark-to-market P&L over positions with a mark price; symbols without
    /// a mark are skipped.
    pub fn total_unrealized_pnl(&self, marks: &HashMap<Symbol, Price>) -> types::Cash {
        self.inner
            .state
            .lock()
            .positions
            .values()
            .filter_map(|p| marks.get(p.symbol()).map(|mark| p.unrealized_pnl(*mark)))
            .sum()
    }

    /// Drop all orders and positions.
    pub fn clear(&self) {
        let mut state = self.inner.state.lock();
        state.orders.clear();
        state.positions.clear();
    }

    fn on_order_event(inner: &ManagerInner, event: &OrderEvent) {
        let mut state = inner.state.lock();
        match state.orders.get_mut(&event.order_id) {
            Some(order) => {
                order.update_from_status(event.status, event.filled, event.reject_reason.as_deref());
            }
            None => {
                // Order constructed remotely (e.g. at the exchange); adopt it.
                let mut order = Order::new(
                    event.order_id.clone(),
                    event.symbol.clone(),
                    event.side,
                    event.order_type,
                    event.price,
                    event.quantity,
                );
                order.update_from_status(event.status, event.filled, event.reject_reason.as_deref());
                state.orders.insert(event.order_id.clone(), order);
            }
        }
    }

    fn on_fill_event(inner: &ManagerInner, event: &FillEvent) {
        let mut state = inner.state.lock();
        if let Some(order) = state.orders.get_mut(&event.order_id) {
            order.apply_fill(event.fill_quantity, event.fill_price);
        } else {
            tracing::warn!(target: "oms", order_id = %event.order_id, "fill for unknown order");
        }

        state
            .positions
            .entry(event.symbol.clone())
            .or_insert_with(|| Position::new(event.symbol.clone()))
            .apply_fill(event.side, event.fill_quantity, event.fill_price);
    }
}

impl Drop for OrderManager {
    fn drop(&mut self) {
        self.bus.unsubscribe(self.order_sub);
        self.bus.unsubscribe(self.fill_sub);
    }
}
