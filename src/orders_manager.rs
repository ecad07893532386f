//! Client-side order registry.
//!
//! Authoritative view of every order this session has created: the request
//! itself, its lifecycle FSM and the ordered live set. All venue traffic
//! goes out through the [`Gateway`] seam and all acknowledgements come back
//! in through [`OrdersManager::update_order_state`], which reconciles them
//! against the FSMs.
//!
//! The amend reconciliation (`amend_orders`) pairs a desired order set
//! against the existing one by price and classifies each pair by the
//! existing order's state: replaced (cancel + place), re-placed (place
//! only), amended in place, skipped (identical), or deferred (not ready).
//! Cancels go out before placements so a two-sided limit is never breached.

use std::collections::HashMap;

use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::definitions::{approx_eq, ExchangeOrders, FillAck, OrderRequest, OrderSide, Update};
use crate::error::{Error, Result};
use crate::gateway::Gateway;
use crate::order_state::{OrderEvent, OrderState, OrderStatus};

pub fn generate_id() -> String {
    Uuid::new_v4().to_string()
}

fn sort_by_price(orders: &mut [OrderRequest]) {
    orders.sort_by(|a, b| a.price.total_cmp(&b.price));
}

pub struct OrdersManager {
    exchange_name: String,
    /// Every registered request, keyed by uid. Survives terminal states
    /// until an amend replaces the order.
    pub orders: HashMap<String, OrderRequest>,
    /// Uids currently considered live, in registration order.
    pub live_uids: Vec<String>,
    states: HashMap<String, OrderState>,
    /// Last fill seen per uid.
    fills: HashMap<String, FillAck>,
    /// Pairing between related orders, for strategies that quote in pairs.
    uid_pair: HashMap<String, String>,
}

impl OrdersManager {
    pub fn new(exchange_name: &str) -> Self {
        Self {
            exchange_name: exchange_name.to_string(),
            orders: HashMap::new(),
            live_uids: Vec::new(),
            states: HashMap::new(),
            fills: HashMap::new(),
            uid_pair: HashMap::new(),
        }
    }

    /// Drop all session state before a reconnect.
    pub fn reset(&mut self) {
        info!(exchange = %self.exchange_name, "orders manager will be reset");
        self.orders.clear();
        self.live_uids.clear();
        self.states.clear();
        self.fills.clear();
    }

    // ─────────────────────────────────────────────────
    // Placement
    // ─────────────────────────────────────────────────

    pub async fn place_order(&mut self, gw: &mut dyn Gateway, mut order: OrderRequest) -> Result<()> {
        if order.uid.is_empty() {
            order.uid = generate_id();
        }
        let uid = order.uid.clone();
        self.orders.insert(uid.clone(), order.clone());
        self.apply_event(&uid, OrderEvent::Creation)?;

        if let Err(err) = gw.send_order(&order).await {
            error!(%err, "order placement failed");
            return Err(err);
        }
        self.live_uids.push(uid);
        Ok(())
    }

    pub async fn place_orders(
        &mut self,
        gw: &mut dyn Gateway,
        mut orders: Vec<OrderRequest>,
    ) -> Result<()> {
        if orders.is_empty() {
            debug!("no orders to place");
            return Ok(());
        }
        for order in &mut orders {
            if order.uid.is_empty() {
                order.uid = generate_id();
            }
        }
        for order in &orders {
            self.orders.insert(order.uid.clone(), order.clone());
            self.live_uids.push(order.uid.clone());
            self.apply_event(&order.uid, OrderEvent::Creation)?;
        }

        if let Err(err) = gw.send_orders(&orders).await {
            error!(%err, "bulk orders placement failed");
            return Err(err);
        }
        info!(count = orders.len(), "multiple orders were placed");
        Ok(())
    }

    // ─────────────────────────────────────────────────
    // Amendment
    // ─────────────────────────────────────────────────

    /// Replace `existing` with `new` in place on the venue. The eid
    /// survives; the registry is re-keyed to `new.uid` by the gateway.
    pub async fn amend_order(
        &mut self,
        gw: &mut dyn Gateway,
        mut new: OrderRequest,
        existing: &OrderRequest,
    ) -> Result<()> {
        if new.uid.is_empty() {
            new.uid = generate_id();
        }
        let uid = new.uid.clone();
        self.orders.insert(uid.clone(), new.clone());
        self.apply_event(&uid, OrderEvent::Creation)?;
        self.apply_event(&uid, OrderEvent::InsertAck)?;
        self.apply_event(&uid, OrderEvent::Amend)?;

        if let Err(err) = gw.amend_order(&new, existing).await {
            error!(%err, "order amend failed");
            return Err(err);
        }
        self.live_uids.retain(|id| id != &existing.uid);
        self.live_uids.push(uid);
        Ok(())
    }

    /// Amend against whatever is currently live.
    pub async fn amend_active_orders(
        &mut self,
        gw: &mut dyn Gateway,
        new_orders: Vec<OrderRequest>,
    ) -> Result<()> {
        let mut existing = Vec::with_capacity(self.live_uids.len());
        for uid in &self.live_uids {
            let order = self.orders.get(uid).ok_or_else(|| {
                Error::Protocol(format!("failed to grab existing order {uid}"))
            })?;
            existing.push(order.clone());
        }
        self.amend_orders(gw, new_orders, existing).await
    }

    /// Pairwise reconciliation of a desired order set against an existing
    /// one. Cancels are issued first, then placements, then one bulk amend.
    pub async fn amend_orders(
        &mut self,
        gw: &mut dyn Gateway,
        mut new_orders: Vec<OrderRequest>,
        mut existing_orders: Vec<OrderRequest>,
    ) -> Result<()> {
        for order in &mut new_orders {
            if order.uid.is_empty() {
                // May still be re-keyed below when the pair is skipped.
                order.uid = generate_id();
            }
        }
        sort_by_price(&mut new_orders);
        sort_by_price(&mut existing_orders);

        let mut amend_new: Vec<OrderRequest> = Vec::new();
        let mut amend_existing: Vec<OrderRequest> = Vec::new();
        let mut to_place: Vec<OrderRequest> = Vec::new();
        let mut to_cancel: Vec<String> = Vec::new();

        // Desired orders beyond the existing set have nothing to amend
        // against and are placed outright.
        let pair_count = new_orders.len().min(existing_orders.len());
        to_place.extend(new_orders.split_off(pair_count));

        for (mut new, existing) in new_orders.into_iter().zip(existing_orders.into_iter()) {
            if new.side != existing.side {
                warn!(uid = %existing.uid, "order sides are not the same");
            }

            let status = self.states.get(&existing.uid).map(|s| s.status);
            if status.is_none() {
                debug!(uid = %existing.uid, "order status was not found");
            }

            match status {
                Some(OrderStatus::Fill) => {
                    to_cancel.push(existing.uid.clone());
                    to_place.push(new);
                }
                Some(OrderStatus::Cancelled) | Some(OrderStatus::FullFill) => {
                    self.live_uids.retain(|id| id != &existing.uid);
                    if self.fills.remove(&existing.uid).is_none() {
                        info!(uid = %existing.uid, "no recorded fill to drop");
                    }
                    to_place.push(new);
                }
                Some(OrderStatus::Active) => {
                    if approx_eq(new.quantity, existing.quantity)
                        && approx_eq(new.price, existing.price)
                    {
                        // Nothing moved: keep the venue order untouched and
                        // re-key the desired order onto the existing uid.
                        debug!(uid = %existing.uid, "order unchanged, no need to amend");
                        self.live_uids.retain(|id| id != &existing.uid);
                        new.uid = existing.uid.clone();
                        self.live_uids.push(new.uid.clone());
                        self.orders.insert(new.uid.clone(), new);
                    } else {
                        amend_new.push(new);
                        amend_existing.push(existing);
                    }
                }
                // Inactive / InsertPending / AmendPending / CancelPending /
                // CancelFailed or unknown: not ready, skipped this round.
                _ => {}
            }
        }

        self.cancel_orders(gw, to_cancel).await?;
        self.place_orders(gw, to_place).await?;
        self.amend_order_pairs(gw, amend_new, amend_existing).await
    }

    /// Bulk in-place amend of already-paired orders.
    async fn amend_order_pairs(
        &mut self,
        gw: &mut dyn Gateway,
        mut new_orders: Vec<OrderRequest>,
        mut existing_orders: Vec<OrderRequest>,
    ) -> Result<()> {
        if new_orders.is_empty() {
            debug!("no need to send a bulk amend");
            return Ok(());
        }
        if new_orders.len() != existing_orders.len() {
            error!("invalid orders for the amend; not matching sizes");
            return Err(Error::InvalidAmend("not matching sequence sizes".to_string()));
        }

        sort_by_price(&mut new_orders);
        sort_by_price(&mut existing_orders);

        if new_orders
            .iter()
            .zip(&existing_orders)
            .any(|(new, existing)| new.side != existing.side)
        {
            error!("invalid orders for the amend");
            return Err(Error::InvalidAmend("side mismatch in amend pairs".to_string()));
        }
        for window in new_orders.windows(2) {
            if window[1].side == OrderSide::Buy && window[0].side == OrderSide::Sell {
                return Err(Error::InvalidAmend("self crossing orders detected".to_string()));
            }
        }

        // If the new top bid crosses the existing best ask, amend from the
        // top down so the per-order amends never cross on the venue.
        let new_bid = new_orders
            .iter()
            .filter(|o| o.side == OrderSide::Buy)
            .map(|o| o.price)
            .next_back();
        let existing_ask = existing_orders
            .iter()
            .filter(|o| o.side == OrderSide::Sell)
            .map(|o| o.price)
            .next();
        if let (Some(new_bid), Some(existing_ask)) = (new_bid, existing_ask) {
            if new_bid > existing_ask {
                new_orders.reverse();
                existing_orders.reverse();
            }
        }

        // Bulk amends keep the existing uid; only the price/qty change.
        for (new, existing) in new_orders.iter_mut().zip(&existing_orders) {
            new.uid = existing.uid.clone();
            self.orders.insert(new.uid.clone(), new.clone());
        }

        if let Err(err) = gw.amend_orders(&new_orders, &existing_orders).await {
            error!(%err, "orders amend failed");
            return Err(err);
        }

        for existing in &existing_orders {
            self.live_uids.retain(|id| id != &existing.uid);
        }
        for new in &new_orders {
            self.live_uids.push(new.uid.clone());
            self.orders.insert(new.uid.clone(), new.clone());
            self.apply_event(&new.uid, OrderEvent::Amend)?;
        }
        Ok(())
    }

    // ─────────────────────────────────────────────────
    // Cancellation
    // ─────────────────────────────────────────────────

    pub async fn cancel_order(&mut self, gw: &mut dyn Gateway, uid: &str) -> Result<()> {
        self.apply_event(uid, OrderEvent::Cancel)?;

        if let Err(err) = gw.cancel_order(uid).await {
            error!(%err, "order cancellation failed");
            return Err(err);
        }
        self.live_uids.retain(|id| id != uid);
        debug!(%uid, "order was cancelled");
        Ok(())
    }

    /// Cancel a batch, dropping uids whose order already fully filled.
    pub async fn cancel_orders(&mut self, gw: &mut dyn Gateway, uids: Vec<String>) -> Result<()> {
        for uid in &uids {
            if !self.states.contains_key(uid) {
                error!(%uid, "failed to find an order for the cancellation");
                return Ok(());
            }
        }
        let uids: Vec<String> = uids
            .into_iter()
            .filter(|uid| {
                self.states
                    .get(uid)
                    .is_some_and(|s| s.status != OrderStatus::FullFill)
            })
            .collect();
        if uids.is_empty() {
            return Ok(());
        }

        self.live_uids.retain(|id| !uids.contains(id));
        for uid in &uids {
            self.cancel_order(gw, uid).await?;
        }
        Ok(())
    }

    /// Venue-side cancel of everything on the contract. FSMs catch up
    /// lazily as per-order elimination acks arrive.
    pub async fn cancel_active_orders(&mut self, gw: &mut dyn Gateway) -> Result<()> {
        if let Err(err) = gw.cancel_active_orders().await {
            error!(%err, "active orders cancellation failed");
            return Err(err);
        }
        Ok(())
    }

    // ─────────────────────────────────────────────────
    // Snapshot seeding
    // ─────────────────────────────────────────────────

    /// Adopt the venue's resting orders after a (re)connect: mint a uid per
    /// order, install both id mappings and walk the FSM to Active (Fill
    /// when partially filled).
    pub fn activate_orders(
        &mut self,
        gw: &mut dyn Gateway,
        snapshot: &ExchangeOrders,
    ) -> Result<Vec<OrderRequest>> {
        info!(
            bids = snapshot.bids.len(),
            asks = snapshot.asks.len(),
            "activating orders from snapshot"
        );

        let mut exchange_orders: Vec<_> =
            snapshot.bids.iter().chain(snapshot.asks.iter()).cloned().collect();
        exchange_orders.sort_by(|a, b| a.price.total_cmp(&b.price));

        let mut adopted = Vec::with_capacity(exchange_orders.len());
        for exch_order in &exchange_orders {
            let mut order = OrderRequest::limit(
                &exch_order.instrument,
                exch_order.side,
                exch_order.price,
                exch_order.quantity,
            );
            order.order_type = exch_order.order_type;
            order.uid = generate_id();

            gw.storage_mut().map_ids(&order.uid, &exch_order.eid);
            self.orders.insert(order.uid.clone(), order.clone());
            self.live_uids.push(order.uid.clone());

            self.apply_event(&order.uid, OrderEvent::Creation)?;
            self.apply_event(&order.uid, OrderEvent::InsertAck)?;
            self.apply_event(&order.uid, OrderEvent::Amend)?;
            self.apply_event(&order.uid, OrderEvent::AmendAck)?;

            if exch_order.filled_quantity > 0.0 {
                let fill = FillAck {
                    exchange: snapshot.exchange.clone(),
                    instrument: exch_order.instrument.clone(),
                    uid: order.uid.clone(),
                    eid: exch_order.eid.clone(),
                    fill_id: String::new(),
                    side: exch_order.side,
                    order_type: exch_order.order_type,
                    order_qty: exch_order.quantity,
                    price: exch_order.price,
                    fill_price: 0.0,
                    running_fill_qty: exch_order.filled_quantity,
                    incremental_fill_qty: exch_order.filled_quantity,
                    average_fill_price: 0.0,
                    fee: 0.0,
                    timestamp: String::new(),
                };
                self.fills.insert(order.uid.clone(), fill);
                self.apply_event(&order.uid, OrderEvent::Fill)?;
            }

            adopted.push(order);
        }
        Ok(adopted)
    }

    // ─────────────────────────────────────────────────
    // State updates
    // ─────────────────────────────────────────────────

    /// Apply a typed venue update to the order it targets. Unknown uids are
    /// warned about and dropped; an illegal transition aborts with
    /// `InvalidState`.
    pub fn update_order_state(&mut self, update: &Update) -> Result<()> {
        let (uid, event) = match update {
            Update::NewOrderAck(ack) => (ack.uid.clone(), OrderEvent::InsertAck),
            Update::NewOrderRejection(nack) => (nack.uid.clone(), OrderEvent::InsertRejection),
            Update::OrderEliminationAck(ack) => (ack.uid.clone(), OrderEvent::CancelAck),
            Update::OrderEliminationRejection(nack) => {
                (nack.uid.clone(), OrderEvent::CancelRejection)
            }
            Update::AmendAck(ack) => (ack.uid.clone(), OrderEvent::AmendAck),
            Update::AmendRejection(nack) => (nack.uid.clone(), OrderEvent::AmendRejection),
            Update::AmendAckOnPartial(fill) => (fill.uid.clone(), OrderEvent::AmendPartialAck),
            Update::OrderFillAck(fill) => {
                self.fills.insert(fill.uid.clone(), fill.clone());
                (fill.uid.clone(), OrderEvent::Fill)
            }
            Update::OrderFullFillAck(fill) => {
                // Inflight reconciliation: if the recorded order is larger
                // than what the venue reports filled, a delta is still in
                // flight and the true full fill arrives later.
                let event = match self.orders.get(&fill.uid) {
                    Some(order) if order.quantity > fill.running_fill_qty => {
                        warn!(
                            uid = %fill.uid,
                            order_qty = order.quantity,
                            running_fill_qty = fill.running_fill_qty,
                            "inflight partial fill was detected"
                        );
                        self.fills.insert(fill.uid.clone(), fill.clone());
                        OrderEvent::Fill
                    }
                    _ => OrderEvent::FullFill,
                };
                (fill.uid.clone(), event)
            }
            Update::Position(_) | Update::TopOfBook(_) | Update::ExchangeOrdersSnapshot(_) => {
                debug!("update carries no order state");
                return Ok(());
            }
        };
        self.apply_event(&uid, event)
    }

    /// Advance the FSM for `uid`. `Creation` installs a fresh machine,
    /// which is how a uid is recycled after a terminal state.
    pub fn apply_event(&mut self, uid: &str, event: OrderEvent) -> Result<()> {
        let state = if event == OrderEvent::Creation {
            let state = self.states.entry(uid.to_string()).or_insert_with(OrderState::new);
            *state = OrderState::new();
            state
        } else {
            match self.states.get_mut(uid) {
                Some(state) => state,
                None => {
                    warn!(exchange = %self.exchange_name, %uid, "order state was not found");
                    return Ok(());
                }
            }
        };

        state.on_event(event).map_err(|err| Error::InvalidState {
            exchange: self.exchange_name.clone(),
            uid: uid.to_string(),
            reason: err.to_string(),
        })
    }

    // ─────────────────────────────────────────────────
    // Queries
    // ─────────────────────────────────────────────────

    pub fn status_of(&self, uid: &str) -> Option<OrderStatus> {
        self.states.get(uid).map(|s| s.status)
    }

    pub fn last_fill(&self, uid: &str) -> Option<&FillAck> {
        self.fills.get(uid)
    }

    /// Live uids whose order is resting or partially filled on the venue.
    pub fn active_uids(&self) -> Vec<String> {
        self.live_uids
            .iter()
            .filter(|uid| {
                matches!(
                    self.status_of(uid),
                    Some(OrderStatus::Active) | Some(OrderStatus::Fill)
                )
            })
            .cloned()
            .collect()
    }

    pub fn number_of_active_orders(&self) -> usize {
        self.active_uids().len()
    }

    fn is_ready_for_amend(&self, uid: &str) -> bool {
        !matches!(
            self.status_of(uid),
            None | Some(OrderStatus::Inactive)
                | Some(OrderStatus::InsertPending)
                | Some(OrderStatus::AmendPending)
                | Some(OrderStatus::CancelPending)
                | Some(OrderStatus::CancelFailed)
        )
    }

    /// Count of live orders whose state allows an amend this round.
    pub fn number_ready_for_amend(&self) -> usize {
        self.live_uids
            .iter()
            .filter(|uid| self.is_ready_for_amend(uid))
            .count()
    }

    pub fn get_live_orders(&self) -> Vec<OrderRequest> {
        self.live_uids
            .iter()
            .filter_map(|uid| self.orders.get(uid))
            .cloned()
            .collect()
    }

    pub fn connect_orders(&mut self, uid1: &str, uid2: &str) {
        self.uid_pair.insert(uid1.to_string(), uid2.to_string());
        self.uid_pair.insert(uid2.to_string(), uid1.to_string());
    }

    pub fn mapped_order(&self, uid: &str) -> Option<&String> {
        self.uid_pair.get(uid)
    }
}
