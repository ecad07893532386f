//! Domain types shared by the codec, orders manager and strategy.
//!
//! Everything the venue reports flows into the [`Update`] enum, which the
//! orders manager maps onto FSM events and the strategy consumes as a
//! callback. Quantities and prices are plain `f64`; wire rounding happens at
//! the codec boundary and comparisons use [`approx_eq`].

use chrono::{DateTime, Utc};
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::{Decimal, RoundingStrategy};

/// Absolute epsilon for price/quantity comparisons.
pub const EPSILON: f64 = 1e-10;

/// True when the two values differ by less than [`EPSILON`].
pub fn approx_eq(a: f64, b: f64) -> bool {
    (a - b).abs() < EPSILON
}

/// Round half-to-even to `digits` decimal places.
pub fn round_to(value: f64, digits: u32) -> f64 {
    Decimal::from_f64(value)
        .map(|d| d.round_dp_with_strategy(digits, RoundingStrategy::MidpointNearestEven))
        .and_then(|d| d.to_f64())
        .unwrap_or(value)
}

/// Round half-to-even to the nearest integer.
pub fn round_half_even(value: f64) -> f64 {
    round_to(value, 0)
}

// ─────────────────────────────────────────────────────────
// Order primitives
// ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OrderSide {
    Unknown,
    Buy,
    Sell,
}

impl OrderSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderSide::Buy => "buy",
            OrderSide::Sell => "sell",
            OrderSide::Unknown => "unknown",
        }
    }

    pub fn parse(raw: &str) -> OrderSide {
        match raw {
            "buy" => OrderSide::Buy,
            "sell" => OrderSide::Sell,
            _ => OrderSide::Unknown,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderType {
    Unknown,
    Market,
    Limit,
    Stop,
}

impl OrderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderType::Market => "market",
            OrderType::Limit => "limit",
            OrderType::Stop => "stop",
            OrderType::Unknown => "unknown",
        }
    }

    pub fn parse(raw: &str) -> OrderType {
        match raw {
            "market" => OrderType::Market,
            "limit" => OrderType::Limit,
            "stop" => OrderType::Stop,
            _ => OrderType::Unknown,
        }
    }
}

/// Client intent for a single order.
///
/// `uid` is the client-assigned id; an empty string means "not yet
/// assigned" and the orders manager mints one on registration. A limit
/// order must carry a positive price.
#[derive(Debug, Clone)]
pub struct OrderRequest {
    pub instrument: String,
    pub quantity: f64,
    pub price: f64,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub uid: String,
    pub created_at: DateTime<Utc>,
}

impl OrderRequest {
    pub fn limit(instrument: &str, side: OrderSide, price: f64, quantity: f64) -> Self {
        Self {
            instrument: instrument.to_string(),
            quantity,
            price,
            side,
            order_type: OrderType::Limit,
            uid: String::new(),
            created_at: Utc::now(),
        }
    }
}

/// Venue view of a live order, as delivered in orders snapshots.
#[derive(Debug, Clone)]
pub struct ExchangeOrder {
    pub instrument: String,
    pub quantity: f64,
    pub filled_quantity: f64,
    pub price: f64,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub eid: String,
}

/// Orders snapshot, bids and asks split as the venue reports them.
#[derive(Debug, Clone, Default)]
pub struct ExchangeOrders {
    pub exchange: String,
    pub instrument: String,
    pub bids: Vec<ExchangeOrder>,
    pub asks: Vec<ExchangeOrder>,
}

// ─────────────────────────────────────────────────────────
// Market data
// ─────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct TopOfBook {
    pub exchange: String,
    pub product: String,
    pub best_bid_price: f64,
    pub best_bid_qty: f64,
    pub best_ask_price: f64,
    pub best_ask_qty: f64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct Position {
    pub exchange: String,
    pub instrument: String,
    pub quantity: f64,
}

// ─────────────────────────────────────────────────────────
// Venue acknowledgements
// ─────────────────────────────────────────────────────────

/// Ack for a newly accepted or amended order.
#[derive(Debug, Clone)]
pub struct OrderAck {
    pub exchange: String,
    pub instrument: String,
    /// Client id the ack resolves to.
    pub uid: String,
    pub eid: String,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub quantity: f64,
    /// Set for limit orders only.
    pub price: f64,
}

/// Rejection of a create / amend / cancel request.
#[derive(Debug, Clone)]
pub struct OrderRejection {
    pub uid: String,
    pub eid: String,
    pub reason: String,
}

/// Per-order cancel confirmation.
#[derive(Debug, Clone)]
pub struct EliminationAck {
    pub uid: String,
}

/// Fill report. `running_fill_qty` is cumulative, `incremental_fill_qty`
/// is this event's delta (`size_filled_delta` on the wire).
#[derive(Debug, Clone)]
pub struct FillAck {
    pub exchange: String,
    pub instrument: String,
    pub uid: String,
    pub eid: String,
    /// `eid + "_" + auction_code`.
    pub fill_id: String,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub order_qty: f64,
    pub price: f64,
    pub fill_price: f64,
    pub running_fill_qty: f64,
    pub incremental_fill_qty: f64,
    pub average_fill_price: f64,
    pub fee: f64,
    pub timestamp: String,
}

// ─────────────────────────────────────────────────────────
// Update events (streaming → orders manager / strategy)
// ─────────────────────────────────────────────────────────

/// Tagged update consumed by the orders manager and the strategy callback.
#[derive(Debug, Clone)]
pub enum Update {
    NewOrderAck(OrderAck),
    NewOrderRejection(OrderRejection),
    OrderEliminationAck(EliminationAck),
    OrderEliminationRejection(OrderRejection),
    OrderFillAck(FillAck),
    OrderFullFillAck(FillAck),
    AmendAck(OrderAck),
    AmendAckOnPartial(FillAck),
    AmendRejection(OrderRejection),
    Position(Position),
    TopOfBook(TopOfBook),
    ExchangeOrdersSnapshot(ExchangeOrders),
}

impl Update {
    /// Client order id the update targets, when it targets one.
    pub fn uid(&self) -> Option<&str> {
        match self {
            Update::NewOrderAck(a) | Update::AmendAck(a) => Some(&a.uid),
            Update::NewOrderRejection(r)
            | Update::OrderEliminationRejection(r)
            | Update::AmendRejection(r) => Some(&r.uid),
            Update::OrderEliminationAck(a) => Some(&a.uid),
            Update::OrderFillAck(f) | Update::OrderFullFillAck(f) | Update::AmendAckOnPartial(f) => {
                Some(&f.uid)
            }
            Update::Position(_) | Update::TopOfBook(_) | Update::ExchangeOrdersSnapshot(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_side_round_trip() {
        assert_eq!(OrderSide::parse("buy"), OrderSide::Buy);
        assert_eq!(OrderSide::parse("sell"), OrderSide::Sell);
        assert_eq!(OrderSide::parse("short"), OrderSide::Unknown);
        assert_eq!(OrderSide::Sell.as_str(), "sell");
    }

    #[test]
    fn test_approx_eq_epsilon() {
        assert!(approx_eq(1.0, 1.0 + 1e-12));
        assert!(!approx_eq(1.0, 1.0 + 1e-9));
    }

    #[test]
    fn test_rounding_is_half_to_even() {
        assert_eq!(round_half_even(100.5), 100.0);
        assert_eq!(round_half_even(101.5), 102.0);
        assert_eq!(round_half_even(100.75), 101.0);
        assert_eq!(round_to(1.005, 2), 1.0);
        assert_eq!(round_to(1.015, 2), 1.02);
    }
}
