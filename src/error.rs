//! Error kinds shared across the gateway, orders manager and strategy.
//!
//! The strategy funnels every failure through `handle_exception`, so the
//! variants here map one-to-one onto the recovery paths: connection and
//! subscription problems trigger a reconnect, venue rejections do too unless
//! whitelisted, invalid state/amend indicate a client-side bug and abort the
//! current operation without mutating state.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// Transport is broken (socket, handshake or send failure).
    #[error("connection error: {0}")]
    Connect(String),

    /// Subscription ack was not received within the polling budget.
    #[error("subscription failed: {0}")]
    Subscription(String),

    /// Malformed frame, missing required field or unknown action.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The order FSM was asked for an illegal transition.
    #[error("{exchange}: invalid state transition for order {uid}: {reason}")]
    InvalidState {
        exchange: String,
        uid: String,
        reason: String,
    },

    /// Side mismatch, sequence-length mismatch or self-crossing amend.
    #[error("invalid amend: {0}")]
    InvalidAmend(String),

    /// New-order / amend / elimination rejection surfaced by the venue.
    #[error("venue rejected the request: {0}")]
    VenueReject(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl Error {
    pub fn connect(err: impl std::fmt::Display) -> Self {
        Error::Connect(err.to_string())
    }

    pub fn protocol(err: impl std::fmt::Display) -> Self {
        Error::Protocol(err.to_string())
    }
}
