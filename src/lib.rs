//! Market-making client for an EMX-style derivatives venue.
//!
//! Data flow: inbound frames → [`emx::session`] → [`emx::streaming`]
//! decodes → [`orders_manager`] applies to the per-order FSMs through the
//! id registry → [`strategy`] reacts. Outbound: the strategy decides, the
//! orders manager mutates its registry and the [`emx::execution`] codec
//! frames the request onto the session.

pub mod config;
pub mod definitions;
pub mod emx;
pub mod engine;
pub mod error;
pub mod gateway;
pub mod order_state;
pub mod orders_manager;
pub mod strategy;
