//! Core types for the tickmesh trading engine.
//!
//! This crate provides the shared vocabulary of the engine: identifier
//! newtypes, fixed-point monetary values, the order and position accounting
//! entities, and the event taxonomy carried by the bus.

mod events;
mod ids;
mod money;
mod order;
mod position;

pub use events::{
    Event, EventBody, EventKind, FillEvent, OrderEvent, QuoteEvent, RiskEvent, RiskViolation,
    SystemEvent, SystemEventKind, TimerCallback, TimerEvent, TradeEvent,
};
pub use ids::{now_ms, OrderId, Symbol, TimestampMs, PRICE_SCALE};
pub use money::{Cash, Price, Quantity};
pub use order::{Order, OrderStatus, OrderType, Side};
pub use position::Position;
