//! Event routing and lifecycle control for a set of strategies.

use crate::strategy::Strategy;
use bus::{EventBus, SubscriptionId};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use types::{EventBody, EventKind};

struct Slot {
    running: Arc<AtomicBool>,
    strategy: Arc<dyn Strategy>,
}

struct ManagerInner {
    slots: Mutex<Vec<Slot>>,
}

impl ManagerInner {
    /// Snapshot the running strategies in registration order.
    ///
    /// The slot lock is released before any callback runs, so a strategy
    /// that re-enters the manager (or whose submission triggers a
    /// synchronous fill that fans out again) never deadlocks.
    fn running_snapshot(&self) -> Vec<Arc<dyn Strategy>> {
        self.slots
            .lock()
            .iter()
            .filter(|s| s.running.load(Ordering::SeqCst))
            .map(|s| s.strategy.clone())
            .collect()
    }
}

/// Owns a list of strategies and fans bus events out to the running ones.
///
/// Subscribes to Quote, Trade, Order, and Fill events; each event is routed
/// to every running strategy in registration order.
pub struct StrategyManager {
    bus: EventBus,
    inner: Arc<ManagerInner>,
    subs: Vec<SubscriptionId>,
}

impl StrategyManager {
    pub fn new(bus: EventBus) -> Self {
        let inner = Arc::new(ManagerInner {
            slots: Mutex::new(Vec::new()),
        });

        let mut subs = Vec::with_capacity(4);
        for kind in [EventKind::Quote, EventKind::Trade, EventKind::Order, EventKind::Fill] {
            let weak: Weak<ManagerInner> = Arc::downgrade(&inner);
            subs.push(bus.subscribe(kind, move |ev| {
                let Some(inner) = weak.upgrade() else { return };
                let strategies = inner.running_snapshot();
                for strategy in &strategies {
                    match ev.body() {
                        EventBody::Quote(q) => strategy.on_quote(q),
                        EventBody::Trade(t) => strategy.on_trade(t),
                        EventBody::Order(o) => strategy.on_order(o),
                        EventBody::Fill(f) => strategy.on_fill(f),
                        _ => {}
                    }
                }
            }));
        }

        Self { bus, inner, subs }
    }

    /// Register a strategy. It starts stopped.
    pub fn add(&self, strategy: Arc<dyn Strategy>) {
        tracing::info!(target: "strategy", name = strategy.name(), "strategy registered");
        self.inner.slots.lock().push(Slot {
            running: Arc::new(AtomicBool::new(false)),
            strategy,
        });
    }

    /// Remove a strategy by name, stopping it first if running.
    pub fn remove(&self, name: &str) -> bool {
        let removed = {
            let mut slots = self.inner.slots.lock();
            match slots.iter().position(|s| s.strategy.name() == name) {
                Some(idx) => Some(slots.remove(idx)),
                None => None,
            }
        };
        match removed {
            Some(slot) => {
                if slot.running.swap(false, Ordering::SeqCst) {
                    slot.strategy.on_stop();
                }
                true
            }
            None => false,
        }
    }

    /// Start a strategy by name; `on_start` fires only on the transition.
    pub fn start(&self, name: &str) -> bool {
        let Some(slot) = self.find(name) else { return false };
        if !slot.0.swap(true, Ordering::SeqCst) {
            slot.1.on_start();
        }
        true
    }

    /// Stop a strategy by name; `on_stop` fires only on the transition.
    pub fn stop(&self, name: &str) -> bool {
        let Some(slot) = self.find(name) else { return false };
        if slot.0.swap(false, Ordering::SeqCst) {
            slot.1.on_stop();
        }
        true
    }

    pub fn start_all(&self) {
        for (running, strategy) in self.all() {
            if !running.swap(true, Ordering::SeqCst) {
                strategy.on_start();
            }
        }
    }

    pub fn stop_all(&self) {
        for (running, strategy) in self.all() {
            if running.swap(false, Ordering::SeqCst) {
                strategy.on_stop();
            }
        }
    }

    pub fn is_running(&self, name: &str) -> bool {
        self.find(name)
            .is_some_and(|(running, _)| running.load(Ordering::SeqCst))
    }

    pub fn len(&self) -> usize {
        self.inner.slots.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.slots.lock().is_empty()
    }

    pub fn names(&self) -> Vec<String> {
        self.inner
            .slots
            .lock()
            .iter()
            .map(|s| s.strategy.name().to_string())
            .collect()
    }

    fn find(&self, name: &str) -> Option<(Arc<AtomicBool>, Arc<dyn Strategy>)> {
        self.inner
            .slots
            .lock()
            .iter()
            .find(|s| s.strategy.name() == name)
            .map(|s| (s.running.clone(), s.strategy.clone()))
    }

    fn all(&self) -> Vec<(Arc<AtomicBool>, Arc<dyn Strategy>)> {
        self.inner
            .slots
            .lock()
            .iter()
            .map(|s| (s.running.clone(), s.strategy.clone()))
            .collect()
    }
}

impl Drop for StrategyManager {
    fn drop(&mut self) {
        for sub in self.subs.drain(..) {
            self.bus.unsubscribe(sub);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use types::{Price, Quantity, TradeEvent};

    #[derive(Default)]
    struct Counts {
        starts: AtomicUsize,
        stops: AtomicUsize,
        trades: AtomicUsize,
        quotes: AtomicUsize,
    }

    struct Probe {
        name: String,
        counts: Arc<Counts>,
    }

    impl Strategy for Probe {
        fn name(&self) -> &str {
            &self.name
        }

        fn on_start(&self) {
            self.counts.starts.fetch_add(1, Ordering::SeqCst);
        }

        fn on_stop(&self) {
            self.counts.stops.fetch_add(1, Ordering::SeqCst);
        }

        fn on_trade(&self, _trade: &TradeEvent) {
            self.counts.trades.fetch_add(1, Ordering::SeqCst);
        }

        fn on_quote(&self, _quote: &types::QuoteEvent) {
            self.counts.quotes.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn trade() -> types::Event {
        TradeEvent {
            symbol: "AAPL".to_string(),
            price: Price::from_float(100.0),
            size: Quantity(10),
        }
        .into()
    }

    fn probe(name: &str) -> (Arc<Probe>, Arc<Counts>) {
        let counts = Arc::new(Counts::default());
        (
            Arc::new(Probe {
                name: name.to_string(),
                counts: counts.clone(),
            }),
            counts,
        )
    }

    #[test]
    fn test_events_reach_only_running_strategies() {
        let bus = EventBus::new();
        let manager = StrategyManager::new(bus.clone());
        let (strategy, counts) = probe("p1");
        manager.add(strategy);

        bus.publish(&trade());
        assert_eq!(counts.trades.load(Ordering::SeqCst), 0);

        manager.start("p1");
        bus.publish(&trade());
        assert_eq!(counts.trades.load(Ordering::SeqCst), 1);

        manager.stop("p1");
        bus.publish(&trade());
        assert_eq!(counts.trades.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_lifecycle_transitions_fire_once() {
        let bus = EventBus::new();
        let manager = StrategyManager::new(bus.clone());
        let (strategy, counts) = probe("p1");
        manager.add(strategy);

        manager.start_all();
        manager.start_all();
        manager.start("p1");
        assert_eq!(counts.starts.load(Ordering::SeqCst), 1);

        manager.stop_all();
        manager.stop_all();
        assert_eq!(counts.stops.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_remove_stops_running_strategy() {
        let bus = EventBus::new();
        let manager = StrategyManager::new(bus.clone());
        let (strategy, counts) = probe("p1");
        manager.add(strategy);
        manager.start_all();

        assert!(manager.remove("p1"));
        assert_eq!(counts.stops.load(Ordering::SeqCst), 1);
        assert!(manager.is_empty());
        assert!(!manager.remove("p1"));

        bus.publish(&trade());
        assert_eq!(counts.trades.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_fan_out_in_registration_order() {
        let bus = EventBus::new();
        let manager = StrategyManager::new(bus.clone());
        let order = Arc::new(Mutex::new(Vec::new()));

        struct Ordered {
            name: String,
            order: Arc<Mutex<Vec<String>>>,
        }
        impl Strategy for Ordered {
            fn name(&self) -> &str {
                &self.name
            }
            fn on_trade(&self, _: &TradeEvent) {
                self.order.lock().push(self.name.clone());
            }
        }

        for name in ["a", "b", "c"] {
            manager.add(Arc::new(Ordered {
                name: name.to_string(),
                order: order.clone(),
            }));
        }
        manager.start_all();
        bus.publish(&trade());

        assert_eq!(*order.lock(), vec!["a", "b", "c"]);
        assert_eq!(manager.names(), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_strategy_may_remove_itself_during_callback() {
        // Re-entrant manager calls from inside a callback must not deadlock.
        let bus = EventBus::new();
        let manager = Arc::new(StrategyManager::new(bus.clone()));

        struct SelfRemover {
            manager: Mutex<Option<Arc<StrategyManager>>>,
        }
        impl Strategy for SelfRemover {
            fn name(&self) -> &str {
                "self-remover"
            }
            fn on_trade(&self, _: &TradeEvent) {
                if let Some(manager) = self.manager.lock().take() {
                    manager.remove("self-remover");
                }
            }
        }

        manager.add(Arc::new(SelfRemover {
            manager: Mutex::new(Some(manager.clone())),
        }));
        manager.start_all();

        bus.publish(&trade());
        assert!(manager.is_empty());
    }

    #[test]
    fn test_quote_routing() {
        let bus = EventBus::new();
        let manager = StrategyManager::new(bus.clone());
        let (strategy, counts) = probe("p1");
        manager.add(strategy);
        manager.start_all();

        bus.publish(
            &types::QuoteEvent {
                symbol: "AAPL".to_string(),
                bid_price: Price::from_float(99.0),
                ask_price: Price::from_float(101.0),
                bid_size: Quantity(10),
                ask_size: Quantity(10),
            }
            .into(),
        );
        assert_eq!(counts.quotes.load(Ordering::SeqCst), 1);
        assert_eq!(counts.trades.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_drop_unsubscribes_from_bus() {
        let bus = EventBus::new();
        {
            let _manager = StrategyManager::new(bus.clone());
            assert_eq!(bus.subscription_count(EventKind::Trade), 1);
        }
        assert_eq!(bus.subscription_count(EventKind::Trade), 0);
    }
}
