//! Outbound trading codec and the REST orders snapshot.
//!
//! Every trading request is a `{channel: "trading", type: "request",
//! action, data}` frame where `data` is a single body or an array.
//! Quantities are rounded half-to-even to 4 decimal places and stringified;
//! prices are stringified as-is. The REST variant authenticates with the
//! `EMX-ACCESS-*` headers.

use reqwest::StatusCode;
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::definitions::{ExchangeOrder, ExchangeOrders, OrderRequest, OrderSide, OrderType};
use crate::error::{Error, Result};

use super::auth::Auth;
use super::session::WsSession;
use super::storage::SharedStorage;
use super::{f64_field, str_field};

/// Wire rounding for order sizes.
const QTY_DECIMALS: u32 = 4;

// ─────────────────────────────────────────────────────────
// Formatting
// ─────────────────────────────────────────────────────────

/// Stringify a quantity, rounded half-to-even to 4 dp.
pub fn format_qty(qty: f64) -> Result<String> {
    let dec = Decimal::from_f64(qty)
        .ok_or_else(|| Error::Protocol(format!("quantity {qty} is not representable")))?;
    Ok(dec
        .round_dp_with_strategy(QTY_DECIMALS, RoundingStrategy::MidpointNearestEven)
        .normalize()
        .to_string())
}

/// Stringify a price without additional rounding.
pub fn format_price(price: f64) -> Result<String> {
    let dec = Decimal::from_f64(price)
        .ok_or_else(|| Error::Protocol(format!("price {price} is not representable")))?;
    Ok(dec.normalize().to_string())
}

fn side_str(side: OrderSide) -> Result<&'static str> {
    match side {
        OrderSide::Buy => Ok("buy"),
        OrderSide::Sell => Ok("sell"),
        OrderSide::Unknown => Err(Error::Protocol("unknown order side".to_string())),
    }
}

fn type_str(order_type: OrderType) -> Result<&'static str> {
    match order_type {
        OrderType::Market => Ok("market"),
        OrderType::Limit => Ok("limit"),
        _ => Err(Error::Protocol(format!("unsupported order type {order_type:?}"))),
    }
}

// ─────────────────────────────────────────────────────────
// Bodies
// ─────────────────────────────────────────────────────────

/// `create-order` body. `price` and `post_only` are present iff the order
/// is a limit order.
pub fn create_order_body(order: &OrderRequest, contract_code: &str) -> Result<Value> {
    let mut body = json!({
        "client_id": order.uid,
        "contract_code": contract_code,
        "type": type_str(order.order_type)?,
        "side": side_str(order.side)?,
        "size": format_qty(order.quantity)?,
    });
    if order.order_type == OrderType::Limit {
        body["price"] = Value::String(format_price(order.price)?);
        body["post_only"] = Value::Bool(true);
    }
    Ok(body)
}

/// `modify-order` body. The amend must keep the side of the existing order.
pub fn modify_order_body(new: &OrderRequest, old: &OrderRequest, eid: &str) -> Result<Value> {
    if new.side != old.side {
        return Err(Error::InvalidAmend(format!(
            "side change {:?} -> {:?} for order {}",
            old.side, new.side, old.uid
        )));
    }
    let mut body = json!({
        "type": type_str(new.order_type)?,
        "side": side_str(new.side)?,
        "order_id": eid,
        "size": format_qty(new.quantity)?,
    });
    if new.order_type == OrderType::Limit {
        body["price"] = Value::String(format_price(new.price)?);
    }
    Ok(body)
}

fn trading_request(action: &str, data: Value) -> Value {
    json!({
        "channel": "trading",
        "type": "request",
        "action": action,
        "data": data,
    })
}

/// Parse the `{orders: [...]}` REST response into a snapshot.
pub fn parse_orders_response(
    msg: &Value,
    exchange: &str,
    instrument: &str,
) -> Result<ExchangeOrders> {
    let orders = msg
        .get("orders")
        .and_then(Value::as_array)
        .ok_or_else(|| Error::Protocol(format!("orders array missing in {msg}")))?;

    let mut snapshot = ExchangeOrders {
        exchange: exchange.to_string(),
        instrument: instrument.to_string(),
        ..Default::default()
    };
    for entry in orders {
        let side = OrderSide::parse(str_field(entry, "side")?);
        let order = ExchangeOrder {
            instrument: instrument.to_string(),
            quantity: f64_field(entry, "size")?,
            filled_quantity: entry
                .get("size_filled")
                .and_then(|v| v.as_f64().or_else(|| v.as_str().and_then(|s| s.parse().ok())))
                .unwrap_or(0.0),
            price: f64_field(entry, "price")?,
            side,
            order_type: OrderType::parse(str_field(entry, "type")?),
            eid: str_field(entry, "order_id")?.to_string(),
        };
        match side {
            OrderSide::Sell => snapshot.asks.push(order),
            _ => snapshot.bids.push(order),
        }
    }
    Ok(snapshot)
}

// ─────────────────────────────────────────────────────────
// Adapter
// ─────────────────────────────────────────────────────────

/// Outbound half of the session: frames trading requests onto the socket
/// and keeps the id registry in sync for amends.
pub struct ExecutionAdapter {
    pub exchange_name: String,
    pub symbol: String,
    rest_url: String,
    auth: Auth,
    http: reqwest::Client,
}

impl ExecutionAdapter {
    pub fn new(exchange_name: &str, symbol: &str, rest_url: &str, auth: Auth) -> Self {
        Self {
            exchange_name: exchange_name.to_string(),
            symbol: symbol.to_string(),
            rest_url: rest_url.to_string(),
            auth,
            http: reqwest::Client::new(),
        }
    }

    pub async fn send_order(&self, ws: &mut WsSession, order: &OrderRequest) -> Result<()> {
        let frame = trading_request("create-order", create_order_body(order, &self.symbol)?);
        info!(uid = %order.uid, %frame, "sending new order request");
        ws.send(&frame).await
    }

    pub async fn send_orders(&self, ws: &mut WsSession, orders: &[OrderRequest]) -> Result<()> {
        let mut data = Vec::with_capacity(orders.len());
        for order in orders {
            data.push(create_order_body(order, &self.symbol)?);
        }
        let frame = trading_request("create-order", Value::Array(data));
        info!(count = orders.len(), "sending bulk order request");
        debug!(%frame, "bulk create frame");
        ws.send(&frame).await
    }

    /// Amend in place: the eid survives, the registry re-keys it to the new
    /// uid and the eid is flagged as mid-amend so the next `accepted` is
    /// classified correctly.
    pub async fn amend_order(
        &self,
        ws: &mut WsSession,
        storage: &mut SharedStorage,
        new: &OrderRequest,
        old: &OrderRequest,
    ) -> Result<()> {
        let eid = storage
            .eid_for(&old.uid)
            .cloned()
            .ok_or_else(|| {
                warn!(uid = %old.uid, "no exchange id recorded for amend");
                Error::InvalidAmend(format!("no exchange id recorded for order {}", old.uid))
            })?;

        let frame = trading_request("modify-order", modify_order_body(new, old, &eid)?);
        storage.map_ids(&new.uid, &eid);
        storage.eids_in_amend.insert(eid.clone());
        info!(new_uid = %new.uid, old_uid = %old.uid, %eid, "sending amend request");
        ws.send(&frame).await
    }

    pub async fn amend_orders(
        &self,
        ws: &mut WsSession,
        storage: &mut SharedStorage,
        new_orders: &[OrderRequest],
        old_orders: &[OrderRequest],
    ) -> Result<()> {
        let mut data = Vec::with_capacity(new_orders.len());
        for (new, old) in new_orders.iter().zip(old_orders) {
            let eid = storage
                .eid_for(&old.uid)
                .cloned()
                .ok_or_else(|| {
                    warn!(uid = %old.uid, "no exchange id recorded for bulk amend");
                    Error::InvalidAmend(format!("no exchange id recorded for order {}", old.uid))
                })?;
            data.push(modify_order_body(new, old, &eid)?);
            storage.map_ids(&new.uid, &eid);
            storage.eids_in_amend.insert(eid.clone());
            debug!(uid = %new.uid, %eid, "ids mapped during amend");
        }
        let frame = trading_request("modify-order", Value::Array(data));
        info!(count = new_orders.len(), "sending bulk amend request");
        ws.send(&frame).await
    }

    /// Cancel by client id. A uid with no venue mapping means the order was
    /// already eliminated on the streaming side; that cancel is a no-op.
    pub async fn cancel_order(
        &self,
        ws: &mut WsSession,
        storage: &SharedStorage,
        uid: &str,
    ) -> Result<()> {
        let Some(eid) = storage.eid_for(uid) else {
            warn!(%uid, "order was already removed, skipping cancel");
            return Ok(());
        };
        let frame = trading_request("cancel-order", json!({ "order_id": eid }));
        info!(%eid, "sending cancellation request");
        ws.send(&frame).await
    }

    pub async fn cancel_active_orders(&self, ws: &mut WsSession) -> Result<()> {
        let frame = trading_request(
            "cancel-all-orders",
            json!({ "contract_code": self.symbol }),
        );
        info!(exchange = %self.exchange_name, "sending cancel all request");
        ws.send(&frame).await
    }

    /// REST orders snapshot: `GET /v1/orders?contract_code=...`, HMAC
    /// authenticated. Any non-200 status is an error.
    pub async fn request_orders(&self) -> Result<ExchangeOrders> {
        let endpoint = format!("/v1/orders?contract_code={}", self.symbol);
        let url = format!("{}{}", self.rest_url, endpoint);

        let timestamp = chrono::Utc::now().timestamp();
        let signature = self.auth.generate_signature(timestamp, "GET", &endpoint, None)?;

        info!(exchange = %self.exchange_name, %url, "requesting orders snapshot");
        let resp = self
            .http
            .get(&url)
            .header("content-type", "application/json")
            .header("EMX-ACCESS-KEY", &self.auth.api_key)
            .header("EMX-ACCESS-SIG", signature.trim())
            .header("EMX-ACCESS-TIMESTAMP", timestamp.to_string())
            .send()
            .await
            .map_err(Error::connect)?;

        let status = resp.status();
        let text = resp.text().await.map_err(Error::connect)?;
        if status != StatusCode::OK {
            return Err(Error::Protocol(format!(
                "orders request failed with {status}: {text}"
            )));
        }

        let msg: Value = serde_json::from_str(&text)
            .map_err(|err| Error::Protocol(format!("failed to parse orders response: {err}")))?;
        parse_orders_response(&msg, &self.exchange_name, &self.symbol)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definitions::OrderRequest;

    fn limit_order(side: OrderSide, price: f64, qty: f64) -> OrderRequest {
        let mut order = OrderRequest::limit("BTC-PERP", side, price, qty);
        order.uid = "uid-1".to_string();
        order
    }

    #[test]
    fn test_qty_rounds_half_to_even_at_4dp() {
        assert_eq!(format_qty(345.9343).unwrap(), "345.9343");
        assert_eq!(format_qty(0.12345).unwrap(), "0.1234");
        assert_eq!(format_qty(0.12355).unwrap(), "0.1236");
        assert_eq!(format_qty(2.0).unwrap(), "2");
    }

    #[test]
    fn test_create_body_limit_round_trip() {
        let order = limit_order(OrderSide::Buy, 101.5, 1.23456);
        let body = create_order_body(&order, "BTC-PERP").unwrap();

        assert_eq!(body["client_id"], "uid-1");
        assert_eq!(body["contract_code"], "BTC-PERP");
        assert_eq!(body["type"], "limit");
        assert_eq!(body["side"], "buy");
        assert_eq!(body["size"], "1.2346");
        assert_eq!(body["price"], "101.5");
        assert_eq!(body["post_only"], true);
    }

    #[test]
    fn test_create_body_market_has_no_price() {
        let mut order = limit_order(OrderSide::Sell, 0.0, 3.0);
        order.order_type = OrderType::Market;
        let body = create_order_body(&order, "BTC-PERP").unwrap();

        assert_eq!(body["type"], "market");
        assert!(body.get("price").is_none());
        assert!(body.get("post_only").is_none());
    }

    #[test]
    fn test_modify_body_keeps_eid_and_side() {
        let old = limit_order(OrderSide::Sell, 100.0, 1.0);
        let mut new = limit_order(OrderSide::Sell, 101.0, 2.0);
        new.uid = "uid-2".to_string();

        let body = modify_order_body(&new, &old, "eid-9").unwrap();
        assert_eq!(body["order_id"], "eid-9");
        assert_eq!(body["side"], "sell");
        assert_eq!(body["size"], "2");
        assert_eq!(body["price"], "101");
    }

    #[test]
    fn test_modify_body_rejects_side_change() {
        let old = limit_order(OrderSide::Sell, 100.0, 1.0);
        let new = limit_order(OrderSide::Buy, 100.0, 1.0);
        assert!(matches!(
            modify_order_body(&new, &old, "eid-9"),
            Err(Error::InvalidAmend(_))
        ));
    }

    #[test]
    fn test_trading_request_envelope() {
        let frame = trading_request("cancel-order", serde_json::json!({"order_id": "e-1"}));
        assert_eq!(frame["channel"], "trading");
        assert_eq!(frame["type"], "request");
        assert_eq!(frame["action"], "cancel-order");
        assert_eq!(frame["data"]["order_id"], "e-1");
    }

    #[test]
    fn test_parse_orders_response_splits_sides() {
        let msg = serde_json::json!({
            "orders": [
                {"order_id": "e-1", "price": "100.0", "size": 2.0, "size_filled": "0.5",
                 "type": "limit", "side": "buy"},
                {"order_id": "e-2", "price": "101.0", "size": "1.0",
                 "type": "limit", "side": "sell"},
            ]
        });
        let snapshot = parse_orders_response(&msg, "emx", "BTC-PERP").unwrap();
        assert_eq!(snapshot.bids.len(), 1);
        assert_eq!(snapshot.asks.len(), 1);
        assert_eq!(snapshot.bids[0].eid, "e-1");
        assert!((snapshot.bids[0].filled_quantity - 0.5).abs() < 1e-12);
        assert!((snapshot.asks[0].filled_quantity).abs() < 1e-12);
    }

}
