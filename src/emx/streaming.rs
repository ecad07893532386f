//! Inbound frame parsing: venue messages → typed [`Update`] events.
//!
//! Dispatch is on `(type, channel, action)`. Order updates resolve the
//! venue id back to the client id through the shared registry; `accepted`
//! additionally consults the mid-amend set to distinguish a new-order ack
//! from an amend ack. Messages for instruments outside the configured
//! contract are logged and dropped.

use chrono::{NaiveDateTime, Utc};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::definitions::{
    approx_eq, EliminationAck, ExchangeOrder, ExchangeOrders, FillAck, OrderAck, OrderRejection,
    OrderSide, OrderType, Position, TopOfBook, Update,
};
use crate::error::{Error, Result};

use super::auth::Auth;
use super::storage::SharedStorage;
use super::{f64_field, str_field};

/// Placeholder uid when the venue does not echo a client id; the orders
/// manager drops updates it cannot resolve.
const UNKNOWN_UID: &str = "0";

pub struct StreamingAdapter {
    pub exchange_name: String,
    /// Configured contract; `None` subscribes to all.
    pub symbol: Option<String>,
    pub subscribed: bool,
    pub orders_received: bool,
}

impl StreamingAdapter {
    pub fn new(exchange_name: &str, symbol: Option<String>) -> Self {
        Self {
            exchange_name: exchange_name.to_string(),
            symbol,
            subscribed: false,
            orders_received: false,
        }
    }

    pub fn is_ready(&self) -> bool {
        self.subscribed && self.orders_received
    }

    /// Cleared before a reconnect so `start` waits for a fresh ack.
    pub fn reset(&mut self) {
        self.subscribed = false;
        self.orders_received = false;
    }

    /// The authenticated subscribe frame sent right after connecting.
    pub fn sub_params(&self, auth: &Auth) -> Result<Vec<Value>> {
        let timestamp = Utc::now().timestamp();
        let signature = auth.generate_signature(timestamp, "GET", "/v1/user/verify", None)?;

        let contract_codes: Vec<&str> = self.symbol.as_deref().into_iter().collect();
        Ok(vec![json!({
            "type": "subscribe",
            "channels": ["orders", "trading", "ticker", "positions"],
            "key": auth.api_key,
            "sig": signature.trim(),
            "timestamp": timestamp.to_string(),
            "contract_codes": contract_codes,
        })])
    }

    fn wrong_instrument(&self, data: &Value) -> bool {
        match (&self.symbol, data.get("contract_code").and_then(Value::as_str)) {
            (Some(symbol), Some(code)) if code != symbol.as_str() => {
                warn!(exchange = %self.exchange_name, %code, "message for the wrong instrument");
                true
            }
            _ => false,
        }
    }

    // ─────────────────────────────────────────────────
    // Dispatch
    // ─────────────────────────────────────────────────

    /// Parse one inbound frame. Returns `None` for frames that carry no
    /// event for the strategy (subscription acks, id registrations,
    /// suppressed updates).
    pub fn process(&mut self, storage: &mut SharedStorage, msg: &Value) -> Result<Option<Update>> {
        if msg.get("type").and_then(Value::as_str) == Some("subscriptions") {
            self.subscribed = true;
            info!(exchange = %self.exchange_name, "successfully subscribed");
            return Ok(None);
        }

        let channel = msg.get("channel").and_then(Value::as_str);
        let msg_type = msg.get("type").and_then(Value::as_str);

        if msg_type == Some("snapshot") && channel == Some("orders") {
            let data = msg
                .get("data")
                .and_then(Value::as_array)
                .ok_or_else(|| Error::Protocol(format!("unable to parse data in {msg}")))?;
            let snapshot = self.process_active_orders(data)?;
            return Ok(Some(Update::ExchangeOrdersSnapshot(snapshot)));
        }

        if !self.subscribed {
            warn!(exchange = %self.exchange_name, "not subscribed yet, frame dropped");
            return Ok(None);
        }

        if channel == Some("positions") {
            return self.process_position_update(msg);
        }

        if channel == Some("ticker") {
            return self.process_tick(msg).map(Some);
        }

        if channel != Some("orders") {
            debug!("message is not about order updates");
            return Ok(None);
        }
        if msg_type != Some("update") {
            debug!("not an update, nothing to process");
            return Ok(None);
        }

        let action = msg
            .get("action")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::Protocol(format!("no action in {msg}")))?;
        let data = msg
            .get("data")
            .ok_or_else(|| Error::Protocol(format!("unable to parse data in {msg}")))?;

        match action {
            "order-received" => self.process_order_received(storage, data),
            "modify-received" | "cancel-received" => {
                debug!(%action, "request received by the venue");
                Ok(None)
            }
            "accepted" => self.process_accept(storage, data),
            "rejected" => self.process_new_rejection(storage, data),
            "modify-rejected" => self.process_amend_rejection(storage, data),
            "canceled" => self.process_elimination(storage, data),
            "cancel-rejected" => self.process_elimination_reject(storage, data),
            "filled" => self.process_fill(storage, data),
            other => Err(Error::Protocol(format!("unknown order update action `{other}`"))),
        }
    }

    // ─────────────────────────────────────────────────
    // Orders channel
    // ─────────────────────────────────────────────────

    /// `order-received`: record the uid↔eid association. No event.
    fn process_order_received(
        &self,
        storage: &mut SharedStorage,
        data: &Value,
    ) -> Result<Option<Update>> {
        let eid = str_field(data, "order_id")?;
        let uid = match data.get("client_id").and_then(Value::as_str) {
            Some(uid) => uid,
            None => {
                warn!(%eid, "order-received without a client id");
                UNKNOWN_UID
            }
        };
        storage.map_ids(uid, eid);
        Ok(None)
    }

    /// `accepted`: a new-order ack, unless the eid is mid-amend, in which
    /// case it resolves to an amend ack (partial-fill variant when the
    /// order already has fills; the flag stays set until the plain ack).
    fn process_accept(&self, storage: &mut SharedStorage, data: &Value) -> Result<Option<Update>> {
        if self.wrong_instrument(data) {
            return Ok(None);
        }
        let eid = str_field(data, "order_id")?.to_string();
        let uid = match storage.uid_for(&eid) {
            Some(uid) => uid.clone(),
            None => {
                debug!(%eid, "accept for an unknown eid");
                UNKNOWN_UID.to_string()
            }
        };

        let side = OrderSide::parse(str_field(data, "side")?);
        if side == OrderSide::Unknown {
            return Err(Error::Protocol(format!("unable to find an order side in {data}")));
        }
        let order_type = OrderType::parse(str_field(data, "order_type")?);
        if !matches!(order_type, OrderType::Limit | OrderType::Market) {
            return Err(Error::Protocol(format!("unable to find an order type in {data}")));
        }

        if storage.eids_in_amend.contains(&eid) {
            let running_fill_qty = f64_field(data, "size_filled")?;
            if running_fill_qty > 0.0 {
                info!(%eid, "amend ack on a partially filled order");
                let ack = FillAck {
                    exchange: self.exchange_name.clone(),
                    instrument: str_field(data, "contract_code")?.to_string(),
                    uid,
                    eid,
                    fill_id: String::new(),
                    side,
                    order_type,
                    order_qty: f64_field(data, "size")?,
                    price: f64_field(data, "price")?,
                    fill_price: 0.0,
                    running_fill_qty,
                    incremental_fill_qty: 0.0,
                    average_fill_price: f64_field(data, "average_fill_price")?,
                    fee: f64_field(data, "fill_fees")?,
                    timestamp: str_field(data, "timestamp")?.to_string(),
                };
                return Ok(Some(Update::AmendAckOnPartial(ack)));
            }
            storage.eids_in_amend.remove(&eid);
            return Ok(Some(Update::AmendAck(self.order_ack(data, uid, eid, side, order_type)?)));
        }

        Ok(Some(Update::NewOrderAck(self.order_ack(data, uid, eid, side, order_type)?)))
    }

    fn order_ack(
        &self,
        data: &Value,
        uid: String,
        eid: String,
        side: OrderSide,
        order_type: OrderType,
    ) -> Result<OrderAck> {
        let price = if order_type == OrderType::Limit {
            f64_field(data, "price")?
        } else {
            0.0
        };
        Ok(OrderAck {
            exchange: self.exchange_name.clone(),
            instrument: str_field(data, "contract_code")?.to_string(),
            uid,
            eid,
            side,
            order_type,
            quantity: f64_field(data, "size")?,
            price,
        })
    }

    fn process_new_rejection(
        &self,
        storage: &SharedStorage,
        data: &Value,
    ) -> Result<Option<Update>> {
        if self.wrong_instrument(data) {
            return Ok(None);
        }
        info!(exchange = %self.exchange_name, %data, "received new order rejection");
        let eid = str_field(data, "order_id")?;
        let Some(uid) = storage.uid_for(eid) else {
            warn!(%eid, "rejection for an unknown eid");
            return Ok(None);
        };
        Ok(Some(Update::NewOrderRejection(OrderRejection {
            uid: uid.clone(),
            eid: eid.to_string(),
            reason: rejection_reason(data),
        })))
    }

    fn process_amend_rejection(
        &self,
        storage: &mut SharedStorage,
        data: &Value,
    ) -> Result<Option<Update>> {
        if self.wrong_instrument(data) {
            return Ok(None);
        }
        info!(exchange = %self.exchange_name, %data, "received amend rejection");
        let eid = str_field(data, "order_id")?;
        let Some(uid) = storage.uid_for(eid).cloned() else {
            warn!(%eid, "amend rejection for an unknown eid");
            return Ok(None);
        };
        storage.eids_in_amend.remove(eid);
        Ok(Some(Update::AmendRejection(OrderRejection {
            uid,
            eid: eid.to_string(),
            reason: rejection_reason(data),
        })))
    }

    /// `canceled`: suppressed when the order is fully filled, the filled
    /// path delivers the terminal event.
    fn process_elimination(
        &self,
        storage: &SharedStorage,
        data: &Value,
    ) -> Result<Option<Update>> {
        if self.wrong_instrument(data) {
            return Ok(None);
        }
        info!(exchange = %self.exchange_name, %data, "received elimination");

        if let (Ok(size), Ok(size_filled)) = (f64_field(data, "size"), f64_field(data, "size_filled"))
        {
            if approx_eq(size, size_filled) {
                debug!("cancel of a fully filled order, suppressed");
                return Ok(None);
            }
        }

        let eid = str_field(data, "order_id")?;
        let Some(uid) = storage.uid_for(eid) else {
            warn!(%eid, "elimination ack for an unknown eid");
            return Ok(None);
        };
        Ok(Some(Update::OrderEliminationAck(EliminationAck { uid: uid.clone() })))
    }

    fn process_elimination_reject(
        &self,
        storage: &SharedStorage,
        data: &Value,
    ) -> Result<Option<Update>> {
        if self.wrong_instrument(data) {
            return Ok(None);
        }
        info!(exchange = %self.exchange_name, %data, "received elimination rejection");
        let eid = str_field(data, "order_id")?;
        let Some(uid) = storage.uid_for(eid) else {
            warn!(%eid, "elimination rejection for an unknown eid");
            return Ok(None);
        };
        Ok(Some(Update::OrderEliminationRejection(OrderRejection {
            uid: uid.clone(),
            eid: eid.to_string(),
            reason: rejection_reason(data),
        })))
    }

    /// `filled`: `status == "done"` is the terminal full fill, `canceled`
    /// is suppressed, anything else is a partial fill.
    fn process_fill(&self, storage: &SharedStorage, data: &Value) -> Result<Option<Update>> {
        if self.wrong_instrument(data) {
            return Ok(None);
        }
        let status = str_field(data, "status")?;
        if status == "canceled" {
            return Ok(None);
        }

        let eid = str_field(data, "order_id")?.to_string();
        let uid = match storage.uid_for(&eid) {
            Some(uid) => uid.clone(),
            None => {
                warn!(%eid, "fill for an unknown eid");
                UNKNOWN_UID.to_string()
            }
        };

        let timestamp = str_field(data, "timestamp")?.to_string();
        let ack = FillAck {
            exchange: self.exchange_name.clone(),
            instrument: str_field(data, "contract_code")?.to_string(),
            uid,
            fill_id: format!("{}_{}", eid, str_field(data, "auction_code")?),
            eid,
            side: OrderSide::parse(str_field(data, "side")?),
            order_type: OrderType::parse(str_field(data, "order_type")?),
            order_qty: f64_field(data, "size")?,
            price: f64_field(data, "price")?,
            fill_price: f64_field(data, "fill_price")?,
            running_fill_qty: f64_field(data, "size_filled")?,
            incremental_fill_qty: f64_field(data, "size_filled_delta")?,
            average_fill_price: f64_field(data, "average_fill_price")?,
            fee: f64_field(data, "fill_fees_delta")?,
            timestamp,
        };

        if let Ok(sent) = NaiveDateTime::parse_from_str(&ack.timestamp, "%Y-%m-%dT%H:%M:%S%.fZ") {
            let latency = Utc::now().naive_utc() - sent;
            info!(latency_ms = latency.num_milliseconds(), "fill received");
        }

        if status == "done" {
            Ok(Some(Update::OrderFullFillAck(ack)))
        } else {
            Ok(Some(Update::OrderFillAck(ack)))
        }
    }

    // ─────────────────────────────────────────────────
    // Snapshots and market data
    // ─────────────────────────────────────────────────

    fn process_active_orders(&mut self, data: &[Value]) -> Result<ExchangeOrders> {
        info!(count = data.len(), "processing active orders snapshot");
        self.orders_received = true;

        let mut snapshot = ExchangeOrders {
            exchange: self.exchange_name.clone(),
            ..Default::default()
        };
        for elem in data {
            let order_type = OrderType::parse(str_field(elem, "order_type")?);
            if !matches!(order_type, OrderType::Limit | OrderType::Market) {
                return Err(Error::Protocol(format!("unable to get order type in {elem}")));
            }
            let side = OrderSide::parse(str_field(elem, "side")?);
            let order = ExchangeOrder {
                instrument: str_field(elem, "contract_code")?.to_string(),
                quantity: f64_field(elem, "size")?,
                filled_quantity: f64_field(elem, "size_filled")?,
                price: f64_field(elem, "price")?,
                side,
                order_type,
                eid: str_field(elem, "order_id")?.to_string(),
            };
            match side {
                OrderSide::Sell => snapshot.asks.push(order),
                _ => snapshot.bids.push(order),
            }
        }
        Ok(snapshot)
    }

    /// Positions arrive either as a snapshot (array) or a single update.
    /// A snapshot without the configured contract yields no event.
    fn process_position_update(&self, msg: &Value) -> Result<Option<Update>> {
        let Some(symbol) = self.symbol.as_deref() else {
            return Ok(None);
        };

        let quantity = if msg.get("type").and_then(Value::as_str) == Some("snapshot") {
            msg.get("data")
                .and_then(Value::as_array)
                .and_then(|elems| {
                    elems.iter().find(|elem| {
                        elem.get("contract_code").and_then(Value::as_str) == Some(symbol)
                    })
                })
                .map(|elem| f64_field(elem, "quantity"))
                .transpose()?
        } else {
            let data = msg
                .get("data")
                .ok_or_else(|| Error::Protocol(format!("unable to parse data in {msg}")))?;
            if data.get("contract_code").and_then(Value::as_str) != Some(symbol) {
                return Ok(None);
            }
            Some(f64_field(data, "quantity")?)
        };

        Ok(quantity.map(|quantity| {
            Update::Position(Position {
                exchange: self.exchange_name.clone(),
                instrument: symbol.to_string(),
                quantity,
            })
        }))
    }

    fn process_tick(&self, msg: &Value) -> Result<Update> {
        let data = msg
            .get("data")
            .ok_or_else(|| Error::Protocol(format!("unable to parse data in {msg}")))?;
        let quote = data
            .get("quote")
            .ok_or_else(|| Error::Protocol(format!("ticker without a quote: {msg}")))?;

        Ok(Update::TopOfBook(TopOfBook {
            exchange: self.exchange_name.clone(),
            product: str_field(data, "contract_code")?.to_string(),
            best_bid_price: f64_field(quote, "bid")?,
            best_bid_qty: f64_field(quote, "bid_size")?,
            best_ask_price: f64_field(quote, "ask")?,
            best_ask_qty: f64_field(quote, "ask_size")?,
            timestamp: Utc::now(),
        }))
    }
}

fn rejection_reason(data: &Value) -> String {
    data.get("message")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    fn adapter() -> StreamingAdapter {
        let mut adapter = StreamingAdapter::new("emx", Some("BTC-PERP".to_string()));
        adapter.subscribed = true;
        adapter
    }

    fn order_update(action: &str, data: Value) -> Value {
        json!({"channel": "orders", "type": "update", "action": action, "data": data})
    }

    fn fill_data(status: &str, size_filled: f64, delta: f64) -> Value {
        json!({
            "order_id": "e-1",
            "contract_code": "BTC-PERP",
            "status": status,
            "side": "buy",
            "order_type": "limit",
            "size": "345.9343",
            "price": "100.0",
            "fill_price": "100.0",
            "size_filled": size_filled.to_string(),
            "size_filled_delta": delta.to_string(),
            "average_fill_price": "100.0",
            "fill_fees_delta": "0.01",
            "auction_code": "BTC-PERP-2019",
            "timestamp": "2019-05-14T12:00:00.000000Z",
        })
    }

    #[test]
    fn test_subscription_ack_sets_ready_flag() {
        let mut a = StreamingAdapter::new("emx", None);
        let mut storage = SharedStorage::new();
        let res = a
            .process(&mut storage, &json!({"type": "subscriptions"}))
            .unwrap();
        assert!(res.is_none());
        assert!(a.subscribed);
    }

    #[test]
    fn test_frames_dropped_until_subscribed() {
        let mut a = StreamingAdapter::new("emx", Some("BTC-PERP".to_string()));
        let mut storage = SharedStorage::new();
        let msg = order_update("accepted", json!({}));
        assert!(a.process(&mut storage, &msg).unwrap().is_none());
    }

    #[test]
    fn test_order_received_registers_both_mappings() {
        let mut a = adapter();
        let mut storage = SharedStorage::new();
        let msg = order_update("order-received", json!({"order_id": "e-1", "client_id": "u-1"}));

        let res = a.process(&mut storage, &msg).unwrap();
        assert!(res.is_none());
        assert_eq!(storage.uid_for("e-1").unwrap(), "u-1");
        assert_eq!(storage.eid_for("u-1").unwrap(), "e-1");
    }

    #[test]
    fn test_accept_without_amend_flag_is_new_order_ack() {
        let mut a = adapter();
        let mut storage = SharedStorage::new();
        storage.map_ids("u-1", "e-1");

        let msg = order_update(
            "accepted",
            json!({
                "order_id": "e-1", "contract_code": "BTC-PERP", "side": "buy",
                "order_type": "limit", "size": "2.0", "price": "99.5",
            }),
        );
        match a.process(&mut storage, &msg).unwrap() {
            Some(Update::NewOrderAck(ack)) => {
                assert_eq!(ack.uid, "u-1");
                assert_eq!(ack.side, OrderSide::Buy);
                assert!((ack.price - 99.5).abs() < 1e-12);
            }
            other => panic!("unexpected update: {other:?}"),
        }
    }

    #[test]
    fn test_accept_mid_amend_is_amend_ack_and_consumes_flag() {
        let mut a = adapter();
        let mut storage = SharedStorage::new();
        storage.map_ids("u-1", "e-1");
        storage.eids_in_amend.insert("e-1".to_string());

        let msg = order_update(
            "accepted",
            json!({
                "order_id": "e-1", "contract_code": "BTC-PERP", "side": "buy",
                "order_type": "limit", "size": "2.0", "price": "99.5",
                "size_filled": "0",
            }),
        );
        match a.process(&mut storage, &msg).unwrap() {
            Some(Update::AmendAck(ack)) => assert_eq!(ack.uid, "u-1"),
            other => panic!("unexpected update: {other:?}"),
        }
        assert!(!storage.eids_in_amend.contains("e-1"));
    }

    #[test]
    fn test_accept_mid_amend_with_fills_is_partial_and_keeps_flag() {
        let mut a = adapter();
        let mut storage = SharedStorage::new();
        storage.map_ids("u-1", "e-1");
        storage.eids_in_amend.insert("e-1".to_string());

        let msg = order_update(
            "accepted",
            json!({
                "order_id": "e-1", "contract_code": "BTC-PERP", "side": "buy",
                "order_type": "limit", "size": "5.0", "price": "99.5",
                "size_filled": "1.5", "average_fill_price": "99.4",
                "fill_fees": "0.01", "timestamp": "2019-05-14T12:00:00.000000Z",
            }),
        );
        match a.process(&mut storage, &msg).unwrap() {
            Some(Update::AmendAckOnPartial(ack)) => {
                assert_eq!(ack.uid, "u-1");
                assert!((ack.running_fill_qty - 1.5).abs() < 1e-12);
            }
            other => panic!("unexpected update: {other:?}"),
        }
        assert!(storage.eids_in_amend.contains("e-1"));
    }

    #[test]
    fn test_partial_fill_sequence() {
        let mut a = adapter();
        let mut storage = SharedStorage::new();
        storage.map_ids("u-1", "e-1");

        let msg = order_update("filled", fill_data("accepted", 1.5258, 1.0));
        match a.process(&mut storage, &msg).unwrap() {
            Some(Update::OrderFillAck(ack)) => {
                assert_eq!(ack.uid, "u-1");
                assert!((ack.running_fill_qty - 1.5258).abs() < 1e-12);
                assert!((ack.incremental_fill_qty - 1.0).abs() < 1e-12);
                assert_eq!(ack.fill_id, "e-1_BTC-PERP-2019");
            }
            other => panic!("unexpected update: {other:?}"),
        }
    }

    #[test]
    fn test_full_fill_when_status_done() {
        let mut a = adapter();
        let mut storage = SharedStorage::new();
        storage.map_ids("u-1", "e-1");

        let msg = order_update("filled", fill_data("done", 345.9343, 345.9343));
        assert!(matches!(
            a.process(&mut storage, &msg).unwrap(),
            Some(Update::OrderFullFillAck(_))
        ));
    }

    #[test]
    fn test_fill_with_canceled_status_is_suppressed() {
        let mut a = adapter();
        let mut storage = SharedStorage::new();
        storage.map_ids("u-1", "e-1");

        let msg = order_update("filled", fill_data("canceled", 1.0, 1.0));
        assert!(a.process(&mut storage, &msg).unwrap().is_none());
    }

    #[test]
    fn test_cancel_of_fully_filled_order_is_suppressed() {
        let mut a = adapter();
        let mut storage = SharedStorage::new();
        storage.map_ids("u-1", "e-1");

        let full = order_update(
            "canceled",
            json!({"order_id": "e-1", "contract_code": "BTC-PERP",
                   "size": "2.0", "size_filled": "2.0"}),
        );
        assert!(a.process(&mut storage, &full).unwrap().is_none());

        let partial = order_update(
            "canceled",
            json!({"order_id": "e-1", "contract_code": "BTC-PERP",
                   "size": "2.0", "size_filled": "0.5"}),
        );
        assert!(matches!(
            a.process(&mut storage, &partial).unwrap(),
            Some(Update::OrderEliminationAck(ack)) if ack.uid == "u-1"
        ));
    }

    #[test]
    fn test_amend_rejection_consumes_flag() {
        let mut a = adapter();
        let mut storage = SharedStorage::new();
        storage.map_ids("u-1", "e-1");
        storage.eids_in_amend.insert("e-1".to_string());

        let msg = order_update(
            "modify-rejected",
            json!({"order_id": "e-1", "contract_code": "BTC-PERP",
                   "message": "post-only order would cross as non-maker"}),
        );
        match a.process(&mut storage, &msg).unwrap() {
            Some(Update::AmendRejection(nack)) => {
                assert_eq!(nack.uid, "u-1");
                assert_eq!(nack.reason, "post-only order would cross as non-maker");
            }
            other => panic!("unexpected update: {other:?}"),
        }
        assert!(!storage.eids_in_amend.contains("e-1"));
    }

    #[test]
    fn test_wrong_instrument_is_dropped() {
        let mut a = adapter();
        let mut storage = SharedStorage::new();
        storage.map_ids("u-1", "e-1");

        let msg = order_update(
            "rejected",
            json!({"order_id": "e-1", "contract_code": "ETH-PERP", "message": "bad"}),
        );
        assert!(a.process(&mut storage, &msg).unwrap().is_none());
    }

    #[test]
    fn test_unknown_action_is_a_protocol_error() {
        let mut a = adapter();
        let mut storage = SharedStorage::new();
        let msg = order_update("vaporized", json!({}));
        assert!(matches!(
            a.process(&mut storage, &msg),
            Err(Error::Protocol(_))
        ));
    }

    #[test]
    fn test_ticker_parses_top_of_book() {
        let mut a = adapter();
        let mut storage = SharedStorage::new();
        let msg = json!({
            "channel": "ticker",
            "data": {
                "contract_code": "BTC-PERP",
                "quote": {"bid": "100.5", "bid_size": "3", "ask": "101.0", "ask_size": "4"},
            }
        });
        match a.process(&mut storage, &msg).unwrap() {
            Some(Update::TopOfBook(tob)) => {
                assert_eq!(tob.product, "BTC-PERP");
                assert!((tob.best_bid_price - 100.5).abs() < 1e-12);
                assert!((tob.best_ask_price - 101.0).abs() < 1e-12);
                assert!(tob.best_bid_price <= tob.best_ask_price);
            }
            other => panic!("unexpected update: {other:?}"),
        }
    }

    #[test]
    fn test_position_snapshot_picks_configured_contract() {
        let mut a = adapter();
        let mut storage = SharedStorage::new();
        let msg = json!({
            "channel": "positions", "type": "snapshot",
            "data": [
                {"contract_code": "ETH-PERP", "quantity": "5"},
                {"contract_code": "BTC-PERP", "quantity": "-2"},
            ]
        });
        match a.process(&mut storage, &msg).unwrap() {
            Some(Update::Position(pos)) => assert!((pos.quantity + 2.0).abs() < 1e-12),
            other => panic!("unexpected update: {other:?}"),
        }
    }

    #[test]
    fn test_position_snapshot_missing_contract_yields_nothing() {
        let mut a = adapter();
        let mut storage = SharedStorage::new();
        let msg = json!({
            "channel": "positions", "type": "snapshot",
            "data": [{"contract_code": "ETH-PERP", "quantity": "5"}]
        });
        assert!(a.process(&mut storage, &msg).unwrap().is_none());
    }

    #[test]
    fn test_position_update_filters_other_contracts() {
        let mut a = adapter();
        let mut storage = SharedStorage::new();
        let other = json!({
            "channel": "positions", "type": "update",
            "data": {"contract_code": "ETH-PERP", "quantity": "5"}
        });
        assert!(a.process(&mut storage, &other).unwrap().is_none());

        let ours = json!({
            "channel": "positions", "type": "update",
            "data": {"contract_code": "BTC-PERP", "quantity": "7"}
        });
        assert!(matches!(
            a.process(&mut storage, &ours).unwrap(),
            Some(Update::Position(pos)) if (pos.quantity - 7.0).abs() < 1e-12
        ));
    }

    #[test]
    fn test_orders_snapshot_splits_sides_and_sets_flag() {
        let mut a = adapter();
        let mut storage = SharedStorage::new();
        let msg = json!({
            "channel": "orders", "type": "snapshot",
            "data": [
                {"order_id": "e-1", "contract_code": "BTC-PERP", "order_type": "limit",
                 "side": "buy", "size": "1.0", "size_filled": "0", "price": "99.0"},
                {"order_id": "e-2", "contract_code": "BTC-PERP", "order_type": "limit",
                 "side": "sell", "size": "1.0", "size_filled": "0.25", "price": "101.0"},
            ]
        });
        match a.process(&mut storage, &msg).unwrap() {
            Some(Update::ExchangeOrdersSnapshot(snapshot)) => {
                assert_eq!(snapshot.bids.len(), 1);
                assert_eq!(snapshot.asks.len(), 1);
                assert!((snapshot.asks[0].filled_quantity - 0.25).abs() < 1e-12);
            }
            other => panic!("unexpected update: {other:?}"),
        }
        assert!(a.orders_received);
    }
}
