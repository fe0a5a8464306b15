//! Order lifecycle types and the order accounting entity.

use crate::ids::{now_ms, OrderId, Symbol, TimestampMs};
use crate::money::{Price, Quantity};
use serde::{Deserialize, Serialize};
use std::fmt;

// =============================================================================
// Side
// =============================================================================

/// Which side of the market an order is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    #[inline]
    pub fn is_buy(self) -> bool {
        self == Side::Buy
    }

    /// Returns the opposite side.
    pub fn opposite(self) -> Self {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Buy => write!(f, "BUY"),
            Side::Sell => write!(f, "SELL"),
        }
    }
}

// =============================================================================
// Order type
// =============================================================================

/// Execution instruction attached to an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderType {
    /// Execute immediately at the best available price.
    Market,
    /// Execute at the order's limit price or better.
    Limit,
    /// Trigger once the stop price is reached.
    Stop,
    /// Stop order that becomes a limit order when triggered.
    StopLimit,
    /// Immediate-or-cancel.
    Ioc,
    /// Fill-or-kill.
    Fok,
}

impl fmt::Display for OrderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderType::Market => write!(f, "MARKET"),
            OrderType::Limit => write!(f, "LIMIT"),
            OrderType::Stop => write!(f, "STOP"),
            OrderType::StopLimit => write!(f, "STOP_LIMIT"),
            OrderType::Ioc => write!(f, "IOC"),
            OrderType::Fok => write!(f, "FOK"),
        }
    }
}

// =============================================================================
// Order status
// =============================================================================

/// Lifecycle state of an order.
///
/// Transitions: `PendingNew -> New -> {PartiallyFilled, Filled, PendingCancel,
/// Rejected}`; `PartiallyFilled -> {PartiallyFilled, Filled, PendingCancel}`;
/// `PendingCancel -> {Cancelled, Filled}` (cancel/fill race). `Filled`,
/// `Cancelled` and `Rejected` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum OrderStatus {
    #[default]
    PendingNew,
    New,
    PartiallyFilled,
    Filled,
    PendingCancel,
    Cancelled,
    Rejected,
}

impl OrderStatus {
    /// An active order can still receive fills or be cancelled.
    #[inline]
    pub fn is_active(self) -> bool {
        matches!(
            self,
            OrderStatus::PendingNew
                | OrderStatus::New
                | OrderStatus::PartiallyFilled
                | OrderStatus::PendingCancel
        )
    }

    /// Terminal states admit no further transitions.
    #[inline]
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            OrderStatus::Filled | OrderStatus::Cancelled | OrderStatus::Rejected
        )
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OrderStatus::PendingNew => "PENDING_NEW",
            OrderStatus::New => "NEW",
            OrderStatus::PartiallyFilled => "PARTIALLY_FILLED",
            OrderStatus::Filled => "FILLED",
            OrderStatus::PendingCancel => "PENDING_CANCEL",
            OrderStatus::Cancelled => "CANCELLED",
            OrderStatus::Rejected => "REJECTED",
        };
        write!(f, "{}", s)
    }
}

// =============================================================================
// Order entity
// =============================================================================

/// A single order with complete lifecycle tracking.
///
/// Invariants: `filled <= quantity`, `filled` never decreases, and the
/// quantity-weighted `avg_fill_price` is meaningful only when `filled > 0`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub symbol: Symbol,
    pub side: Side,
    pub order_type: OrderType,
    pub status: OrderStatus,
    /// Limit price; for market orders the price used for risk sizing.
    pub limit_price: Price,
    pub quantity: Quantity,
    pub filled: Quantity,
    pub avg_fill_price: Price,
    pub reject_reason: Option<String>,
    pub created_at: TimestampMs,
    pub updated_at: TimestampMs,
}

impl Order {
    /// Create a new order in `PendingNew`.
    pub fn new(
        id: OrderId,
        symbol: impl Into<Symbol>,
        side: Side,
        order_type: OrderType,
        limit_price: Price,
        quantity: Quantity,
    ) -> Self {
        let now = now_ms();
        Self {
            id,
            symbol: symbol.into(),
            side,
            order_type,
            status: OrderStatus::PendingNew,
            limit_price,
            quantity,
            filled: Quantity::ZERO,
            avg_fill_price: Price::ZERO,
            reject_reason: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[inline]
    pub fn remaining(&self) -> Quantity {
        self.quantity.saturating_sub(self.filled)
    }

    #[inline]
    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }

    #[inline]
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Apply an execution to this order.
    ///
    /// Updates the filled quantity, recomputes the quantity-weighted average
    /// fill price, and flips the status to `Filled` or `PartiallyFilled`.
    pub fn apply_fill(&mut self, fill_qty: Quantity, fill_price: Price) {
        let previous = self.filled;
        self.filled += fill_qty;
        debug_assert!(
            self.filled <= self.quantity,
            "order {} overfilled: {} > {}",
            self.id,
            self.filled,
            self.quantity
        );

        if previous.is_zero() {
            self.avg_fill_price = fill_price;
        } else {
            let weighted = self.avg_fill_price.raw() as i128 * previous.raw() as i128
                + fill_price.raw() as i128 * fill_qty.raw() as i128;
            self.avg_fill_price = Price((weighted / self.filled.raw() as i128) as i64);
        }

        self.status = if self.filled >= self.quantity {
            OrderStatus::Filled
        } else {
            OrderStatus::PartiallyFilled
        };
        self.updated_at = now_ms();
    }

    /// Apply a status update that arrived independently of fill events.
    ///
    /// The filled quantity only ratchets upward so a stale status event can
    /// never regress fills already accounted for.
    pub fn update_from_status(
        &mut self,
        status: OrderStatus,
        filled: Quantity,
        reject_reason: Option<&str>,
    ) {
        self.status = status;
        self.filled = self.filled.max(filled);
        if let Some(reason) = reject_reason {
            self.reject_reason = Some(reason.to_string());
        }
        self.updated_at = now_ms();
    }
}
