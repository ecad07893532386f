//! Two-sided market-making strategy.
//!
//! Consumes top-of-book and position updates, generates the configured
//! quote ladder around the touch (or around the rounded mid), retreats the
//! inventory side of the book, and amends the live set whenever the touch
//! moves. Every failure funnels through `handle_exception`, which retries a
//! full reconnect up to five times unless the error is whitelisted.

use std::time::{Duration, Instant};

use tracing::{error, info, warn};

use crate::config::StrategyConfig;
use crate::definitions::{round_half_even, round_to, OrderRequest, OrderSide, TopOfBook, Update};
use crate::error::{Error, Result};
use crate::gateway::Gateway;
use crate::orders_manager::OrdersManager;

/// Quoting starts this long after (re)connecting.
const TIME_TO_WAIT_SINCE_START: Duration = Duration::from_secs(10);
/// Window for live orders to become amendable before reconnecting.
const MAX_AMEND_WAIT: Duration = Duration::from_secs(5);
/// Reconnect attempts before giving up.
const MAX_RECONNECT_ATTEMPTS: u32 = 5;

/// Venue errors that must not trigger a reconnect.
const WHITELISTED_ERRORS: [&str; 1] = ["post-only order would cross as non-maker"];

pub struct MarketMaker {
    config: StrategyConfig,
    pub orders_manager: OrdersManager,

    /// Seed state from the first orders snapshot after connecting.
    pub process_orders_on_start: bool,
    update_orders_flag: bool,
    started_time: Instant,
    last_amend_time: Option<Instant>,
    reconnecting: bool,

    tob: Option<TopOfBook>,
    active: bool,
    current_position: Option<f64>,
    num_of_sent_orders: usize,
}

impl MarketMaker {
    pub fn new(config: StrategyConfig, gw: &mut dyn Gateway) -> Self {
        gw.set_cancel_orders_on_start(true);
        let orders_manager = OrdersManager::new(gw.name());
        Self {
            config,
            orders_manager,
            process_orders_on_start: false,
            update_orders_flag: false,
            started_time: Instant::now(),
            last_amend_time: None,
            reconnecting: false,
            tob: None,
            active: true,
            current_position: None,
            num_of_sent_orders: 0,
        }
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    fn should_perform_positional_retreat(&self) -> bool {
        self.config.positional_retreat.position_increment > 0.0
            && self.config.positional_retreat.retreat_ticks != 0
    }

    // ─────────────────────────────────────────────────
    // Market update callback
    // ─────────────────────────────────────────────────

    pub async fn on_market_update(&mut self, gw: &mut dyn Gateway, update: Update) -> Result<()> {
        if !self.active {
            info!("strategy is not active, update will be ignored");
            return Ok(());
        }

        match update {
            Update::TopOfBook(tob) => {
                let moved = self.tob.as_ref().map_or(true, |prev| tob_moved(prev, &tob));
                if moved {
                    self.update_orders_flag = true;
                    self.tob = Some(tob);
                }
                Ok(())
            }
            Update::ExchangeOrdersSnapshot(snapshot) => {
                if self.process_orders_on_start {
                    self.orders_manager.activate_orders(gw, &snapshot)?;
                }
                Ok(())
            }
            Update::Position(position) => {
                self.current_position = Some(position.quantity);
                Ok(())
            }
            Update::AmendRejection(nack) | Update::NewOrderRejection(nack) => {
                info!(uid = %nack.uid, reason = %nack.reason, "received order rejection");
                Err(Error::VenueReject(format!(
                    "order {} rejected: {}",
                    nack.uid, nack.reason
                )))
            }
            Update::OrderEliminationAck(ack) => {
                // This strategy never expects its quotes to be eliminated
                // behind its back; treat it as a reconnection trigger.
                info!(uid = %ack.uid, "received order elimination");
                Err(Error::VenueReject(format!(
                    "order {} was eliminated by the venue",
                    ack.uid
                )))
            }
            other => {
                self.orders_manager.update_order_state(&other).map_err(|err| {
                    error!(%err, "update_order_state failed");
                    err
                })
            }
        }
    }

    // ─────────────────────────────────────────────────
    // Quoting loop
    // ─────────────────────────────────────────────────

    /// Strategy tick: quote only when active, a book is present, the touch
    /// has moved and the startup delay has passed.
    pub async fn run(&mut self, gw: &mut dyn Gateway) -> Result<()> {
        if !self.active || self.tob.is_none() || !self.update_orders_flag {
            return Ok(());
        }
        if self.started_time.elapsed() < TIME_TO_WAIT_SINCE_START {
            return Ok(());
        }

        self.update_orders_flag = false;
        self.react_to_market_move(gw).await
    }

    async fn react_to_market_move(&mut self, gw: &mut dyn Gateway) -> Result<()> {
        if !self.active {
            info!("strategy is not active, react_to_market_move will be stopped");
            return Ok(());
        }
        if self.reconnecting {
            info!("ongoing reconnection, react_to_market_move will be stopped");
            return Ok(());
        }

        if let Some(known_statuses) = self.orders_not_ready_for_amend() {
            info!(known_statuses, "orders are not ready for amend");
            let waited_too_long = self
                .last_amend_time
                .is_some_and(|t| t.elapsed() > MAX_AMEND_WAIT);
            if waited_too_long {
                let err = Error::Connect(format!(
                    "will be reconnected since only {known_statuses} active orders were \
                     updated within {} seconds",
                    MAX_AMEND_WAIT.as_secs()
                ));
                self.handle_exception(gw, &err).await?;
            }
            return Ok(());
        }

        let mut orders = self.generate_orders();
        if self.should_perform_positional_retreat() {
            match self.perform_retreats(orders) {
                Some(retreated) => orders = retreated,
                None => {
                    warn!("failed to perform retreat adjustment");
                    return Ok(());
                }
            }
        }

        let count = orders.len();
        if let Err(err) = self.orders_manager.amend_active_orders(gw, orders).await {
            self.handle_exception(gw, &err).await?;
            return Ok(());
        }

        self.last_amend_time = Some(Instant::now());
        self.num_of_sent_orders = count;
        Ok(())
    }

    /// `None` when every live order is amendable, otherwise the number of
    /// orders with a known status.
    fn orders_not_ready_for_amend(&self) -> Option<usize> {
        let known_statuses = self.orders_manager.number_ready_for_amend();
        if self.last_amend_time.is_some()
            && !self.orders_manager.live_uids.is_empty()
            && known_statuses != self.num_of_sent_orders
        {
            return Some(known_statuses);
        }
        None
    }

    // ─────────────────────────────────────────────────
    // Quote generation
    // ─────────────────────────────────────────────────

    /// Build the configured ladder around the current touch. With
    /// mid-based calculation the effective touch is derived from the
    /// rounded mid so both quotes sit one tick apart around it.
    /// Output ordering: all asks first, then all bids.
    pub fn generate_orders(&self) -> Vec<OrderRequest> {
        let Some(tob) = &self.tob else {
            return Vec::new();
        };
        let tick = self.config.tick_size;
        let rounding = self.config.price_rounding;

        let (mut best_ask, mut best_bid) = (tob.best_ask_price, tob.best_bid_price);
        if self.config.mid_price_based_calculation {
            let mid_price = (tob.best_ask_price + tob.best_bid_price) / 2.0;
            let rounded_mid = round_to(round_half_even(mid_price / tick) * tick, rounding);

            if tob.best_ask_price - tob.best_bid_price == 2.0 * tick {
                best_ask = round_to(rounded_mid + tick, rounding);
                best_bid = round_to(rounded_mid - tick, rounding);
            } else if rounded_mid >= mid_price {
                best_ask = rounded_mid;
                best_bid = round_to(best_ask - tick, rounding);
            } else {
                best_bid = rounded_mid;
                best_ask = round_to(best_bid + tick, rounding);
            }
        }

        let mut orders = Vec::new();
        for &[level, qty] in &self.config.orders.asks {
            orders.push(OrderRequest::limit(
                &self.config.instrument_name,
                OrderSide::Sell,
                round_to(best_ask + tick * level, rounding),
                qty,
            ));
        }
        for &[level, qty] in &self.config.orders.bids {
            orders.push(OrderRequest::limit(
                &self.config.instrument_name,
                OrderSide::Buy,
                round_to(best_bid - tick * level, rounding),
                qty,
            ));
        }
        orders
    }

    /// Skew quotes away from the inventory: a long position makes the bids
    /// less aggressive, a short position lifts the asks. Unknown position
    /// means no quoting at all.
    pub fn perform_retreats(&self, orders: Vec<OrderRequest>) -> Option<Vec<OrderRequest>> {
        let position = self.current_position?;

        let (mut asks, mut bids): (Vec<OrderRequest>, Vec<OrderRequest>) = orders
            .into_iter()
            .partition(|order| order.side == OrderSide::Sell);

        let retreat_in_ticks = (position / self.config.positional_retreat.position_increment)
            .floor() as i64
            * self.config.positional_retreat.retreat_ticks;
        if retreat_in_ticks == 0 {
            // Position is insufficient for retreating.
            let mut orders = asks;
            orders.append(&mut bids);
            return Some(orders);
        }

        let shift = self.config.tick_size * retreat_in_ticks as f64;
        if retreat_in_ticks > 0 {
            for order in &mut bids {
                order.price = round_to(order.price - shift, self.config.price_rounding);
            }
        } else {
            for order in &mut asks {
                order.price = round_to(order.price - shift, self.config.price_rounding);
            }
        }

        let mut orders = asks;
        orders.append(&mut bids);
        Some(orders)
    }

    // ─────────────────────────────────────────────────
    // Failure handling and reconnection
    // ─────────────────────────────────────────────────

    /// Funnel for every failure. Whitelisted venue errors are logged and
    /// swallowed; anything else reconnects the gateway, retrying up to
    /// [`MAX_RECONNECT_ATTEMPTS`] times before raising a fatal error.
    pub async fn handle_exception(&mut self, gw: &mut dyn Gateway, err: &Error) -> Result<()> {
        let err_msg = err.to_string();
        for whitelisted in WHITELISTED_ERRORS {
            if err_msg.contains(whitelisted) {
                info!(%err_msg, "error was whitelisted, reconnection won't be performed");
                return Ok(());
            }
        }
        error!(%err_msg, "handle_exception started");

        let mut attempt = 0;
        while attempt < MAX_RECONNECT_ATTEMPTS {
            match self.reconnect_gateway(gw, &err_msg).await {
                Ok(()) => return Ok(()),
                Err(retry_err) => {
                    error!(%retry_err, "exception raised during reconnect");
                }
            }
            attempt += 1;
            warn!(attempt, "reconnection failed, performing new attempt");
        }
        Err(Error::Connect(format!(
            "handle_exception was unsuccessfully tried {MAX_RECONNECT_ATTEMPTS} times"
        )))
    }

    async fn reconnect_gateway(&mut self, gw: &mut dyn Gateway, reason: &str) -> Result<()> {
        warn!(%reason, "gateway will be reconnected");
        if self.config.stop_strategy_on_error {
            self.stop_strategy(gw).await?;
        }

        self.reconnecting = true;
        let result = self.reset(gw).await;
        self.started_time = Instant::now();
        self.reconnecting = false;
        result?;

        warn!(%reason, "gateway was reconnected");
        Ok(())
    }

    /// Cancel everything, drop local state, restart the transport.
    async fn reset(&mut self, gw: &mut dyn Gateway) -> Result<()> {
        if let Err(err) = self.orders_manager.cancel_active_orders(gw).await {
            // The transport is usually already broken at this point; the
            // cancel-all re-issued on start does the actual cleanup.
            warn!(%err, "cancel before reconnect failed");
        }
        self.last_amend_time = None;
        self.num_of_sent_orders = 0;
        self.orders_manager.reset();
        gw.reconnect().await
    }

    pub async fn stop_strategy(&mut self, gw: &mut dyn Gateway) -> Result<()> {
        info!("cancelling orders because strategy is stopped");
        if let Err(err) = self.orders_manager.cancel_active_orders(gw).await {
            warn!(%err, "stop_strategy failed");
            return Err(err);
        }
        self.active = false;
        Ok(())
    }

    #[cfg(test)]
    fn set_tob(&mut self, tob: TopOfBook) {
        self.tob = Some(tob);
    }
}

fn tob_moved(prev: &TopOfBook, next: &TopOfBook) -> bool {
    prev.best_bid_price != next.best_bid_price || prev.best_ask_price != next.best_ask_price
}
