//! Gateway seam between the orders manager / strategy and a venue session.
//!
//! The orders manager drives everything through this trait so the trading
//! logic can be exercised against an in-memory gateway in tests; the real
//! implementation is [`crate::emx::adapter::EmxAdapter`].

use async_trait::async_trait;

use crate::definitions::{ExchangeOrders, OrderRequest};
use crate::emx::storage::SharedStorage;
use crate::error::Result;

#[async_trait]
pub trait Gateway: Send {
    /// Display name used in log and error messages.
    fn name(&self) -> &str;

    /// The uid↔eid registry shared with the protocol codec.
    fn storage_mut(&mut self) -> &mut SharedStorage;

    fn exchange_order_id(&self, uid: &str) -> Option<String>;

    async fn send_order(&mut self, order: &OrderRequest) -> Result<()>;

    async fn send_orders(&mut self, orders: &[OrderRequest]) -> Result<()>;

    async fn amend_order(&mut self, new: &OrderRequest, old: &OrderRequest) -> Result<()>;

    async fn amend_orders(&mut self, new: &[OrderRequest], old: &[OrderRequest]) -> Result<()>;

    async fn cancel_order(&mut self, uid: &str) -> Result<()>;

    async fn cancel_active_orders(&mut self) -> Result<()>;

    /// REST orders snapshot.
    async fn request_orders(&mut self) -> Result<ExchangeOrders>;

    /// Connect, subscribe and wait for the subscription ack.
    async fn start(&mut self) -> Result<()>;

    /// Tear the session down and run `start` again. Concurrent requests
    /// collapse into the ongoing reconnect.
    async fn reconnect(&mut self) -> Result<()>;

    fn is_ready(&self) -> bool;

    fn set_cancel_orders_on_start(&mut self, flag: bool);
}
