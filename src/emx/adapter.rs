//! EMX gateway adapter.
//!
//! Owns the transport session, the id registry and both codec halves, and
//! implements the [`Gateway`] seam. `start` connects, subscribes and waits
//! for the subscription ack by pumping the socket itself (up to 50 polls of
//! 200 ms); `listen_once` is the engine's per-iteration poll: keepalive,
//! one receive, one decode.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config::AdapterConfig;
use crate::definitions::{ExchangeOrders, OrderRequest, Update};
use crate::error::{Error, Result};
use crate::gateway::Gateway;

use super::auth::Auth;
use super::execution::ExecutionAdapter;
use super::session::{Frame, WsSession};
use super::storage::SharedStorage;
use super::streaming::StreamingAdapter;

/// Keepalive interval: ping when this long has passed without a send.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
/// Subscription ack wait: 50 polls of 200 ms.
const SUBSCRIBE_POLLS: u32 = 50;
const SUBSCRIBE_POLL_DELAY: Duration = Duration::from_millis(200);
/// Settle time after (re)connecting before quoting resumes.
const START_SETTLE: Duration = Duration::from_secs(2);

pub struct EmxAdapter {
    pub config: AdapterConfig,
    auth: Auth,
    session: WsSession,
    pub storage: SharedStorage,
    pub streaming: StreamingAdapter,
    execution: ExecutionAdapter,

    pub cancel_orders_on_start: bool,
    started: bool,
    pub reconnecting: bool,
    ready_to_listen: bool,
    stop: bool,
    last_send: Instant,
    /// Updates decoded while `start` was pumping the socket; drained by
    /// `listen_once` before new reads.
    pending: VecDeque<Update>,
}

impl EmxAdapter {
    pub fn new(config: AdapterConfig) -> Self {
        let auth = Auth::new(&config.api_key, &config.api_secret);
        let streaming = StreamingAdapter::new(
            &config.streaming.exchange_name,
            Some(config.streaming.symbol.clone()),
        );
        let execution = ExecutionAdapter::new(
            &config.execution.exchange_name,
            &config.execution.symbol,
            &config.execution.url,
            auth.clone(),
        );
        Self {
            config,
            auth,
            session: WsSession::new(),
            storage: SharedStorage::new(),
            streaming,
            execution,
            cancel_orders_on_start: false,
            started: false,
            reconnecting: false,
            ready_to_listen: false,
            stop: false,
            last_send: Instant::now(),
            pending: VecDeque::new(),
        }
    }

    /// Clear session-scoped state before a restart.
    fn reset(&mut self) {
        self.started = false;
        self.ready_to_listen = false;
        self.storage.reset();
        self.streaming.reset();
        self.pending.clear();
    }

    pub fn request_stop(&mut self) {
        self.stop = true;
    }

    pub fn is_stopped(&self) -> bool {
        self.stop
    }

    /// Drain whatever the socket has buffered, queueing decoded updates.
    async fn drain_socket(&mut self) -> Result<()> {
        loop {
            match self.session.receive().await? {
                None => return Ok(()),
                Some(Frame::Text(text)) => {
                    if let Some(update) = self.decode(&text)? {
                        self.pending.push_back(update);
                    }
                }
                Some(Frame::Close) => {
                    warn!("close frame received during start");
                }
                Some(Frame::Closed) => {
                    return Err(Error::Connect("connection closed during start".to_string()))
                }
            }
        }
    }

    fn decode(&mut self, text: &str) -> Result<Option<Update>> {
        let msg: Value = serde_json::from_str(text)
            .map_err(|err| Error::Protocol(format!("unable to load the msg: {err}")))?;
        debug!(%msg, "ws msg received");
        self.streaming.process(&mut self.storage, &msg)
    }

    /// One iteration of the listen loop: emit a keepalive if due, poll the
    /// socket once, decode. `None` means an idle poll.
    pub async fn listen_once(&mut self) -> Result<Option<Update>> {
        if !self.ready_to_listen {
            tokio::time::sleep(Duration::from_millis(100)).await;
            return Ok(None);
        }

        if let Some(update) = self.pending.pop_front() {
            return Ok(Some(update));
        }

        if self.last_send.elapsed() >= HEARTBEAT_INTERVAL {
            match self.session.ping("keepalive").await {
                Ok(()) => self.last_send = Instant::now(),
                Err(err) => {
                    // A single failed ping is not fatal; persistent failure
                    // shows up as a receive error right after.
                    info!(%err, "ping failed");
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    return Ok(None);
                }
            }
        }

        let frame = match self.session.receive().await {
            Ok(frame) => frame,
            Err(err) => {
                if self.reconnecting {
                    info!(%err, "receive failed during reconnect");
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    return Ok(None);
                }
                warn!(%err, "receive failed, reconnection will be triggered");
                return Err(err);
            }
        };

        match frame {
            None => Ok(None),
            Some(Frame::Text(text)) => self.decode(&text),
            Some(Frame::Close) => {
                warn!("venue is closing the connection");
                Ok(None)
            }
            Some(Frame::Closed) => {
                if self.reconnecting {
                    return Ok(None);
                }
                Err(Error::Connect("connection closed by the venue".to_string()))
            }
        }
    }
}

#[async_trait]
impl Gateway for EmxAdapter {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn storage_mut(&mut self) -> &mut SharedStorage {
        &mut self.storage
    }

    fn exchange_order_id(&self, uid: &str) -> Option<String> {
        self.storage.eid_for(uid).cloned()
    }

    async fn send_order(&mut self, order: &OrderRequest) -> Result<()> {
        self.execution.send_order(&mut self.session, order).await
    }

    async fn send_orders(&mut self, orders: &[OrderRequest]) -> Result<()> {
        self.execution.send_orders(&mut self.session, orders).await
    }

    async fn amend_order(&mut self, new: &OrderRequest, old: &OrderRequest) -> Result<()> {
        self.execution
            .amend_order(&mut self.session, &mut self.storage, new, old)
            .await
    }

    async fn amend_orders(&mut self, new: &[OrderRequest], old: &[OrderRequest]) -> Result<()> {
        self.execution
            .amend_orders(&mut self.session, &mut self.storage, new, old)
            .await
    }

    async fn cancel_order(&mut self, uid: &str) -> Result<()> {
        self.execution
            .cancel_order(&mut self.session, &self.storage, uid)
            .await
    }

    async fn cancel_active_orders(&mut self) -> Result<()> {
        self.execution.cancel_active_orders(&mut self.session).await
    }

    async fn request_orders(&mut self) -> Result<ExchangeOrders> {
        self.execution.request_orders().await
    }

    /// Connect, subscribe, wait for the ack, optionally cancel whatever is
    /// resting on the venue, settle, mark started.
    async fn start(&mut self) -> Result<()> {
        self.reset();

        let url = self.config.streaming.url.clone();
        let sub_params = self.streaming.sub_params(&self.auth)?;
        self.session
            .connect(&url, &sub_params)
            .await
            .map_err(|err| Error::Connect(format!("{}: {err}", self.config.name)))?;
        self.ready_to_listen = true;
        self.last_send = Instant::now();

        let mut polls = 0u32;
        while !self.streaming.subscribed {
            if polls >= SUBSCRIBE_POLLS {
                return Err(Error::Subscription(format!(
                    "{}: subscription ack was not received",
                    self.config.name
                )));
            }
            polls += 1;
            self.drain_socket().await?;
            tokio::time::sleep(SUBSCRIBE_POLL_DELAY).await;
        }

        if self.cancel_orders_on_start {
            self.cancel_active_orders().await?;
        } else {
            info!("cancellation request won't be sent on start");
        }

        tokio::time::sleep(START_SETTLE).await;
        self.started = true;
        info!(exchange = %self.config.name, "🔌 gateway started");
        Ok(())
    }

    async fn reconnect(&mut self) -> Result<()> {
        if self.reconnecting {
            return Ok(());
        }
        warn!(exchange = %self.config.name, "gateway will be reconnected");
        self.reconnecting = true;

        self.session.close().await;
        let res = self.start().await;
        self.reconnecting = false;

        match res {
            Ok(()) => {
                info!(exchange = %self.config.name, "connection was re-established");
                Ok(())
            }
            Err(err) => Err(Error::Connect(format!("restart failed: {err}"))),
        }
    }

    fn is_ready(&self) -> bool {
        !self.stop && self.started && self.streaming.is_ready() && !self.reconnecting
    }

    fn set_cancel_orders_on_start(&mut self, flag: bool) {
        self.cancel_orders_on_start = flag;
    }
}
