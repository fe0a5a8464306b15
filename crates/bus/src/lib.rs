//! In-process typed publish/subscribe bus.
//!
//! The bus connects loosely coupled components: producers publish
//! [`Event`]s, consumers subscribe per [`EventKind`]. Dispatch is a
//! synchronous fan-out on the publishing thread, in subscription order.
//! A bounded-by-nothing FIFO queue supports deferred dispatch for consumers
//! that need to serialise cross-category ordering.
//!
//! # Re-entrancy
//!
//! Handlers may publish, subscribe and unsubscribe during dispatch. The bus
//! never holds its internal lock while a handler runs: `publish` snapshots
//! the handler list for the event's category under the lock, releases it,
//! then invokes the snapshot. Consequences:
//!
//! - a handler registered during dispatch does not see the in-flight event,
//!   but does see subsequent ones;
//! - a handler unsubscribed during dispatch may still be invoked for events
//!   already in flight.
//!
//! # Threading
//!
//! The bus is free-threaded; any thread may subscribe, unsubscribe, publish
//! or drain the queue. Handler execution itself is not synchronised.
//!
//! # Failure
//!
//! A panicking handler is caught at the dispatch boundary and logged; the
//! remaining handlers for that publish still run, so one misbehaving
//! consumer cannot strand producers.

use parking_lot::Mutex;
use smallvec::SmallVec;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use types::{Event, EventKind};

/// Callback invoked with every published event of a subscribed category.
pub type EventHandler = Arc<dyn Fn(&Event) + Send + Sync>;

/// Handle returned by [`EventBus::subscribe`]; never reused within a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubscriptionId(u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub#{}", self.0)
    }
}

struct Subscription {
    id: SubscriptionId,
    handler: EventHandler,
}

#[derive(Default)]
struct BusState {
    subscribers: HashMap<EventKind, Vec<Subscription>>,
    queue: VecDeque<Event>,
}

struct BusInner {
    state: Mutex<BusState>,
    next_id: AtomicU64,
    processed: AtomicU64,
}

/// Cheaply cloneable handle to a process-local event bus.
///
/// Components receive a clone of the handle at construction time; there is
/// no global instance, so tests can run isolated buses in parallel.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(BusInner {
                state: Mutex::new(BusState::default()),
                next_id: AtomicU64::new(1),
                processed: AtomicU64::new(0),
            }),
        }
    }

    /// Register `handler` for events of `kind`.
    ///
    /// Handlers are invoked in registration order. The returned id is unique
    /// for the lifetime of the process.
    pub fn subscribe(
        &self,
        kind: EventKind,
        handler: impl Fn(&Event) + Send + Sync + 'static,
    ) -> SubscriptionId {
        let id = SubscriptionId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        let sub = Subscription {
            id,
            handler: Arc::new(handler),
        };
        self.inner
            .state
            .lock()
            .subscribers
            .entry(kind)
            .or_default()
            .push(sub);
        tracing::debug!(target: "bus", %kind, %id, "subscribed");
        id
    }

    /// Remove the subscription with `id` from whichever category holds it.
    /// No-op if the id is unknown.
    pub fn unsubscribe(&self, id: SubscriptionId) {
        let mut state = self.inner.state.lock();
        for subs in state.subscribers.values_mut() {
            subs.retain(|s| s.id != id);
        }
    }

    /// Synchronously fan `event` out to every handler currently subscribed
    /// to its category. Returns after all handlers have returned.
    pub fn publish(&self, event: &Event) {
        // Snapshot under the lock, dispatch outside it: handlers are free to
        // publish or (un)subscribe without deadlocking the bus.
        let handlers: SmallVec<[EventHandler; 8]> = {
            let state = self.inner.state.lock();
            state
                .subscribers
                .get(&event.kind())
                .map(|subs| subs.iter().map(|s| s.handler.clone()).collect())
                .unwrap_or_default()
        };
        self.inner.processed.fetch_add(1, Ordering::Relaxed);

        for handler in &handlers {
            if catch_unwind(AssertUnwindSafe(|| handler(event))).is_err() {
                tracing::error!(
                    target: "bus",
                    kind = %event.kind(),
                    "event handler panicked; continuing dispatch"
                );
            }
        }
    }

    /// Append `event` to the deferred queue without invoking any handler.
    pub fn enqueue(&self, event: Event) {
        self.inner.state.lock().queue.push_back(event);
    }

    /// Drain up to `max` queued events (all of them when `None`) in FIFO
    /// order, dispatching each exactly as [`EventBus::publish`] would.
    /// Returns the number of events dispatched.
    ///
    /// Events enqueued by handlers during the drain are picked up by the
    /// same call, still in FIFO order.
    pub fn process_queue(&self, max: Option<usize>) -> usize {
        let mut dispatched = 0;
        while max.is_none_or(|m| dispatched < m) {
            let event = match self.inner.state.lock().queue.pop_front() {
                Some(e) => e,
                None => break,
            };
            self.publish(&event);
            dispatched += 1;
        }
        dispatched
    }

    /// Drop all subscriptions and queued events, and reset the processed
    /// counter.
    pub fn clear(&self) {
        let mut state = self.inner.state.lock();
        state.subscribers.clear();
        state.queue.clear();
        self.inner.processed.store(0, Ordering::Relaxed);
    }

    /// Number of events dispatched through [`EventBus::publish`] so far.
    pub fn processed_count(&self) -> u64 {
        self.inner.processed.load(Ordering::Relaxed)
    }

    /// Number of events waiting in the deferred queue.
    pub fn queue_len(&self) -> usize {
        self.inner.state.lock().queue.len()
    }

    /// Number of live subscriptions for `kind`.
    pub fn subscription_count(&self, kind: EventKind) -> usize {
        self.inner
            .state
            .lock()
            .subscribers
            .get(&kind)
            .map_or(0, |s| s.len())
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("processed", &self.processed_count())
            .field("queued", &self.queue_len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use types::{Price, Quantity, TradeEvent};

    fn trade(symbol: &str, price: f64) -> Event {
        TradeEvent {
            symbol: symbol.to_string(),
            price: Price::from_float(price),
            size: Quantity(100),
        }
        .into()
    }

    #[test]
    fn test_publish_reaches_subscriber() {
        let bus = EventBus::new();
        let seen = Arc::new(AtomicUsize::new(0));
        let seen2 = seen.clone();
        bus.subscribe(EventKind::Trade, move |_| {
            seen2.fetch_add(1, Ordering::SeqCst);
        });

        bus.publish(&trade("AAPL", 100.0));
        bus.publish(&trade("AAPL", 101.0));
        assert_eq!(seen.load(Ordering::SeqCst), 2);
        assert_eq!(bus.processed_count(), 2);
    }

    #[test]
    fn test_category_isolation() {
        let bus = EventBus::new();
        let seen = Arc::new(AtomicUsize::new(0));
        let seen2 = seen.clone();
        bus.subscribe(EventKind::Quote, move |_| {
            seen2.fetch_add(1, Ordering::SeqCst);
        });

        bus.publish(&trade("AAPL", 100.0));
        assert_eq!(seen.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_registration_order_preserved() {
        let bus = EventBus::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        for tag in ["first", "second", "third"] {
            let order = order.clone();
            bus.subscribe(EventKind::Trade, move |_| {
                order.lock().push(tag);
            });
        }

        bus.publish(&trade("AAPL", 100.0));
        assert_eq!(*order.lock(), vec!["first", "second", "third"]);
    }

    #[test]
    fn test_unsubscribe_stops_delivery() {
        let bus = EventBus::new();
        let seen = Arc::new(AtomicUsize::new(0));
        let seen2 = seen.clone();
        let id = bus.subscribe(EventKind::Trade, move |_| {
            seen2.fetch_add(1, Ordering::SeqCst);
        });

        bus.publish(&trade("AAPL", 100.0));
        bus.unsubscribe(id);
        bus.publish(&trade("AAPL", 101.0));

        assert_eq!(seen.load(Ordering::SeqCst), 1);
        assert_eq!(bus.subscription_count(EventKind::Trade), 0);
    }

    #[test]
    fn test_unsubscribe_unknown_id_is_noop() {
        let bus = EventBus::new();
        let id = bus.subscribe(EventKind::Trade, |_| {});
        bus.unsubscribe(id);
        bus.unsubscribe(id);
    }

    #[test]
    fn test_handler_may_publish_reentrantly() {
        let bus = EventBus::new();
        let fills = Arc::new(AtomicUsize::new(0));

        // Trade handler publishes a Fill; the inner publish must not deadlock.
        {
            let bus2 = bus.clone();
            bus.subscribe(EventKind::Trade, move |_| {
                let fill: Event = types::FillEvent {
                    order_id: types::OrderId::new("r-1"),
                    symbol: "AAPL".to_string(),
                    side: types::Side::Buy,
                    fill_price: Price::from_float(100.0),
                    fill_quantity: Quantity(10),
                    execution_id: None,
                }
                .into();
                bus2.publish(&fill);
            });
        }
        {
            let fills = fills.clone();
            bus.subscribe(EventKind::Fill, move |_| {
                fills.fetch_add(1, Ordering::SeqCst);
            });
        }

        bus.publish(&trade("AAPL", 100.0));
        assert_eq!(fills.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_subscription_during_dispatch_misses_inflight_event() {
        let bus = EventBus::new();
        let late_seen = Arc::new(AtomicUsize::new(0));

        {
            let bus2 = bus.clone();
            let late_seen = late_seen.clone();
            bus.subscribe(EventKind::Trade, move |_| {
                let late_seen = late_seen.clone();
                bus2.subscribe(EventKind::Trade, move |_| {
                    late_seen.fetch_add(1, Ordering::SeqCst);
                });
            });
        }

        // First publish registers the late handler but must not invoke it.
        bus.publish(&trade("AAPL", 100.0));
        assert_eq!(late_seen.load(Ordering::SeqCst), 0);

        // The late handler sees the next publish.
        bus.publish(&trade("AAPL", 101.0));
        assert_eq!(late_seen.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_panicking_handler_does_not_strand_others() {
        let bus = EventBus::new();
        let seen = Arc::new(AtomicUsize::new(0));

        bus.subscribe(EventKind::Trade, |_| panic!("boom"));
        {
            let seen = seen.clone();
            bus.subscribe(EventKind::Trade, move |_| {
                seen.fetch_add(1, Ordering::SeqCst);
            });
        }

        bus.publish(&trade("AAPL", 100.0));
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_queue_fifo_drain() {
        let bus = EventBus::new();
        let prices = Arc::new(Mutex::new(Vec::new()));
        {
            let prices = prices.clone();
            bus.subscribe(EventKind::Trade, move |ev| {
                if let types::EventBody::Trade(t) = ev.body() {
                    prices.lock().push(t.price);
                }
            });
        }

        bus.enqueue(trade("AAPL", 1.0));
        bus.enqueue(trade("AAPL", 2.0));
        bus.enqueue(trade("AAPL", 3.0));
        assert_eq!(bus.queue_len(), 3);

        assert_eq!(bus.process_queue(Some(2)), 2);
        assert_eq!(bus.queue_len(), 1);
        assert_eq!(bus.process_queue(None), 1);

        let prices = prices.lock();
        assert_eq!(
            *prices,
            vec![
                Price::from_float(1.0),
                Price::from_float(2.0),
                Price::from_float(3.0)
            ]
        );
    }

    #[test]
    fn test_clear_resets_everything() {
        let bus = EventBus::new();
        bus.subscribe(EventKind::Trade, |_| {});
        bus.enqueue(trade("AAPL", 1.0));
        bus.publish(&trade("AAPL", 2.0));

        bus.clear();
        assert_eq!(bus.subscription_count(EventKind::Trade), 0);
        assert_eq!(bus.queue_len(), 0);
        assert_eq!(bus.processed_count(), 0);
    }

    #[test]
    fn test_concurrent_publishers() {
        let bus = EventBus::new();
        let seen = Arc::new(AtomicUsize::new(0));
        {
            let seen = seen.clone();
            bus.subscribe(EventKind::Trade, move |_| {
                seen.fetch_add(1, Ordering::SeqCst);
            });
        }

        let threads: Vec<_> = (0..4)
            .map(|_| {
                let bus = bus.clone();
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        bus.publish(&trade("AAPL", 100.0));
                    }
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }

        assert_eq!(seen.load(Ordering::SeqCst), 400);
        assert_eq!(bus.processed_count(), 400);
    }
}
