//! The event taxonomy carried by the bus.
//!
//! Every message in the engine is an [`Event`]: a category-tagged payload
//! stamped with a monotonic clock at creation. Handlers subscribe to an
//! [`EventKind`] and match on the [`EventBody`] variant. Events are passed by
//! reference and are deliberately not `Clone`; the payload structs are, so
//! consumers that need to retain data clone the payload.

use crate::ids::{OrderId, Symbol};
use crate::money::{Cash, Price, Quantity};
use crate::order::{OrderStatus, OrderType, Side};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

// =============================================================================
// Categories
// =============================================================================

/// Event category used for subscription routing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Quote,
    Trade,
    Order,
    Fill,
    Timer,
    System,
    Risk,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EventKind::Quote => "QUOTE",
            EventKind::Trade => "TRADE",
            EventKind::Order => "ORDER",
            EventKind::Fill => "FILL",
            EventKind::Timer => "TIMER",
            EventKind::System => "SYSTEM",
            EventKind::Risk => "RISK",
        };
        write!(f, "{}", s)
    }
}

// =============================================================================
// Payloads
// =============================================================================

/// Best bid/ask update for a symbol.
#[derive(Debug, Clone, PartialEq)]
pub struct QuoteEvent {
    pub symbol: Symbol,
    pub bid_price: Price,
    pub ask_price: Price,
    pub bid_size: Quantity,
    pub ask_size: Quantity,
}

impl QuoteEvent {
    pub fn spread(&self) -> Price {
        self.ask_price - self.bid_price
    }

    pub fn mid_price(&self) -> Price {
        Price((self.bid_price.raw() + self.ask_price.raw()) / 2)
    }
}

/// Last-sale print for a symbol.
#[derive(Debug, Clone, PartialEq)]
pub struct TradeEvent {
    pub symbol: Symbol,
    pub price: Price,
    pub size: Quantity,
}

/// Order lifecycle transition.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderEvent {
    pub order_id: OrderId,
    pub symbol: Symbol,
    pub side: Side,
    pub order_type: OrderType,
    pub status: OrderStatus,
    pub price: Price,
    pub quantity: Quantity,
    pub filled: Quantity,
    pub reject_reason: Option<String>,
}

impl OrderEvent {
    pub fn remaining(&self) -> Quantity {
        self.quantity.saturating_sub(self.filled)
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// Execution report: some or all of an order filled at a price.
#[derive(Debug, Clone, PartialEq)]
pub struct FillEvent {
    pub order_id: OrderId,
    pub symbol: Symbol,
    pub side: Side,
    pub fill_price: Price,
    pub fill_quantity: Quantity,
    pub execution_id: Option<String>,
}

impl FillEvent {
    /// Cash value of this fill.
    pub fn notional(&self) -> Cash {
        self.fill_price * self.fill_quantity
    }
}

/// Callback invoked when a timer event fires.
pub type TimerCallback = Arc<dyn Fn() + Send + Sync>;

/// Scheduled or periodic event with an optional callback.
#[derive(Clone)]
pub struct TimerEvent {
    pub name: String,
    callback: Option<TimerCallback>,
}

impl TimerEvent {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            callback: None,
        }
    }

    pub fn with_callback(name: impl Into<String>, callback: TimerCallback) -> Self {
        Self {
            name: name.into(),
            callback: Some(callback),
        }
    }

    pub fn has_callback(&self) -> bool {
        self.callback.is_some()
    }

    /// Run the callback, if any.
    pub fn fire(&self) {
        if let Some(cb) = &self.callback {
            cb();
        }
    }
}

impl fmt::Debug for TimerEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimerEvent")
            .field("name", &self.name)
            .field("has_callback", &self.has_callback())
            .finish()
    }
}

/// Kind of system control message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SystemEventKind {
    Startup,
    Shutdown,
    TradingStart,
    TradingStop,
    EmergencyStop,
    ConfigReload,
    HealthCheck,
}

/// System control and status message.
#[derive(Debug, Clone, PartialEq)]
pub struct SystemEvent {
    pub kind: SystemEventKind,
    pub message: String,
}

impl SystemEvent {
    pub fn new(kind: SystemEventKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// Why the risk gate turned an order away.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RiskViolation {
    /// Buy order value exceeds available cash.
    InsufficientCash,
    /// Prospective position notional exceeds the per-symbol limit.
    PositionLimitExceeded,
    /// Prospective gross exposure exceeds the portfolio limit.
    ExposureLimitExceeded,
}

impl fmt::Display for RiskViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RiskViolation::InsufficientCash => write!(f, "insufficient cash"),
            RiskViolation::PositionLimitExceeded => write!(f, "position limit exceeded"),
            RiskViolation::ExposureLimitExceeded => write!(f, "portfolio exposure limit exceeded"),
        }
    }
}

/// Pre-trade risk rejection notice.
#[derive(Debug, Clone, PartialEq)]
pub struct RiskEvent {
    pub symbol: Symbol,
    pub violation: RiskViolation,
    pub message: String,
}

// =============================================================================
// Event wrapper
// =============================================================================

/// Payload of an event, one variant per category.
#[derive(Debug, Clone)]
pub enum EventBody {
    Quote(QuoteEvent),
    Trade(TradeEvent),
    Order(OrderEvent),
    Fill(FillEvent),
    Timer(TimerEvent),
    System(SystemEvent),
    Risk(RiskEvent),
}

impl EventBody {
    pub fn kind(&self) -> EventKind {
        match self {
            EventBody::Quote(_) => EventKind::Quote,
            EventBody::Trade(_) => EventKind::Trade,
            EventBody::Order(_) => EventKind::Order,
            EventBody::Fill(_) => EventKind::Fill,
            EventBody::Timer(_) => EventKind::Timer,
            EventBody::System(_) => EventKind::System,
            EventBody::Risk(_) => EventKind::Risk,
        }
    }
}

/// A timestamped, immutable message.
///
/// Stamped with [`Instant`] at creation so consumers can measure dispatch
/// latency with sub-microsecond resolution.
#[derive(Debug)]
pub struct Event {
    body: EventBody,
    stamp: Instant,
}

impl Event {
    pub fn new(body: EventBody) -> Self {
        Self {
            body,
            stamp: Instant::now(),
        }
    }

    #[inline]
    pub fn kind(&self) -> EventKind {
        self.body.kind()
    }

    #[inline]
    pub fn body(&self) -> &EventBody {
        &self.body
    }

    #[inline]
    pub fn stamp(&self) -> Instant {
        self.stamp
    }

    /// Age of the event in microseconds, for latency monitoring.
    pub fn age_micros(&self) -> u128 {
        self.stamp.elapsed().as_micros()
    }
}

impl From<QuoteEvent> for Event {
    fn from(e: QuoteEvent) -> Self {
        Event::new(EventBody::Quote(e))
    }
}

impl From<TradeEvent> for Event {
    fn from(e: TradeEvent) -> Self {
        Event::new(EventBody::Trade(e))
    }
}

impl From<OrderEvent> for Event {
    fn from(e: OrderEvent) -> Self {
        Event::new(EventBody::Order(e))
    }
}

impl From<FillEvent> for Event {
    fn from(e: FillEvent) -> Self {
        Event::new(EventBody::Fill(e))
    }
}

impl From<TimerEvent> for Event {
    fn from(e: TimerEvent) -> Self {
        Event::new(EventBody::Timer(e))
    }
}

impl From<SystemEvent> for Event {
    fn from(e: SystemEvent) -> Self {
        Event::new(EventBody::System(e))
    }
}

impl From<RiskEvent> for Event {
    fn from(e: RiskEvent) -> Self {
        Event::new(EventBody::Risk(e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    #[test]
    fn test_event_kind_routing() {
        let quote: Event = QuoteEvent {
            symbol: "AAPL".to_string(),
            bid_price: Price::from_float(99.0),
            ask_price: Price::from_float(101.0),
            bid_size: Quantity(100),
            ask_size: Quantity(200),
        }
        .into();
        assert_eq!(quote.kind(), EventKind::Quote);

        let trade: Event = TradeEvent {
            symbol: "AAPL".to_string(),
            price: Price::from_float(100.0),
            size: Quantity(50),
        }
        .into();
        assert_eq!(trade.kind(), EventKind::Trade);
    }

    #[test]
    fn test_quote_spread_and_mid() {
        let quote = QuoteEvent {
            symbol: "AAPL".to_string(),
            bid_price: Price::from_float(99.0),
            ask_price: Price::from_float(101.0),
            bid_size: Quantity(100),
            ask_size: Quantity(200),
        };
        assert_eq!(quote.spread(), Price::from_float(2.0));
        assert_eq!(quote.mid_price(), Price::from_float(100.0));
    }

    #[test]
    fn test_fill_notional() {
        let fill = FillEvent {
            order_id: OrderId::new("a-1"),
            symbol: "AAPL".to_string(),
            side: Side::Buy,
            fill_price: Price::from_float(150.0),
            fill_quantity: Quantity(100),
            execution_id: None,
        };
        assert_eq!(fill.notional(), Cash::from_float(15_000.0));
    }

    #[test]
    fn test_timer_callback_fires() {
        static FIRED: AtomicU64 = AtomicU64::new(0);
        let timer = TimerEvent::with_callback(
            "heartbeat",
            Arc::new(|| {
                FIRED.fetch_add(1, Ordering::Relaxed);
            }),
        );
        assert!(timer.has_callback());
        timer.fire();
        timer.fire();
        assert_eq!(FIRED.load(Ordering::Relaxed), 2);

        // A bare timer fires as a no-op.
        TimerEvent::new("idle").fire();
    }

    #[test]
    fn test_event_age_advances() {
        let ev: Event = TradeEvent {
            symbol: "AAPL".to_string(),
            price: Price::from_float(1.0),
            size: Quantity(1),
        }
        .into();
        std::thread::sleep(std::time::Duration::from_millis(1));
        assert!(ev.age_micros() >= 1_000);
    }
}
