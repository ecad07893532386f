//! Per-order lifecycle state machine.
//!
//! A pure transition function over a fixed event alphabet. The orders
//! manager owns one [`OrderState`] per client id and drives it from venue
//! acknowledgements; an event that is not listed for the current state is an
//! ignored no-op, with two exceptions: any non-`Creation` event in
//! `Inactive` and a `Creation` while the order is live are illegal and
//! surface as [`IllegalTransition`].

use std::fmt;
use std::time::Instant;

/// Events the FSM advances under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderEvent {
    Creation,
    InsertAck,
    InsertRejection,
    Cancel,
    Fill,
    FullFill,
    CancelAck,
    CancelRejection,
    Amend,
    AmendAck,
    AmendPartialAck,
    AmendRejection,
}

/// Lifecycle states. `Cancelled`, `InsertFailed` and `FullFill` are
/// terminal: the live set drops the order, and a later `Creation` recycles
/// the uid by resetting to `InsertPending`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderStatus {
    Inactive,
    InsertPending,
    Active,
    AmendPending,
    Fill,
    FullFill,
    CancelPending,
    CancelFailed,
    Cancelled,
    InsertFailed,
}

impl OrderStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Cancelled | OrderStatus::InsertFailed | OrderStatus::FullFill
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IllegalTransition {
    pub state: OrderStatus,
    pub event: OrderEvent,
}

impl fmt::Display for IllegalTransition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "event {:?} is not valid in state {:?}", self.event, self.state)
    }
}

/// Apply `event` in `state`, returning the next state.
///
/// Unlisted pairs return the current state unchanged.
pub fn transition(state: OrderStatus, event: OrderEvent) -> Result<OrderStatus, IllegalTransition> {
    use OrderEvent as E;
    use OrderStatus as S;

    let next = match (state, event) {
        (S::Inactive, E::Creation) => S::InsertPending,
        // Inactive accepts nothing but Creation.
        (S::Inactive, _) => return Err(IllegalTransition { state, event }),

        (S::InsertPending, E::InsertRejection) => S::InsertFailed,
        (S::InsertPending, E::Cancel) => S::CancelPending,
        (S::InsertPending, E::InsertAck) => S::Active,
        (S::InsertPending, E::CancelAck) => S::Cancelled,
        (S::InsertPending, E::Fill) => S::Fill,
        (S::InsertPending, E::FullFill) => S::FullFill,

        (S::Active, E::Fill) => S::Fill,
        (S::Active, E::InsertRejection) => S::InsertFailed,
        (S::Active, E::Cancel) => S::CancelPending,
        (S::Active, E::Amend) => S::AmendPending,
        (S::Active, E::FullFill) => S::FullFill,
        (S::Active, E::AmendRejection) => S::Inactive,

        (S::AmendPending, E::Cancel) => S::CancelPending,
        (S::AmendPending, E::AmendAck) => S::Active,
        (S::AmendPending, E::AmendPartialAck) => S::Active,
        (S::AmendPending, E::AmendRejection) => S::Inactive,
        (S::AmendPending, E::Fill) => S::Fill,
        (S::AmendPending, E::FullFill) => S::FullFill,
        (S::AmendPending, E::CancelAck) => S::Cancelled,

        (S::Fill, E::FullFill) => S::FullFill,
        (S::Fill, E::Cancel) => S::CancelPending,
        (S::Fill, E::Amend) => S::AmendPending,
        (S::Fill, E::CancelAck) => S::Cancelled,

        (S::FullFill, E::Cancel) => S::CancelPending,
        (S::FullFill, E::Fill) => S::Fill,
        (S::FullFill, E::AmendPartialAck) => S::Fill,
        (S::FullFill, E::Creation) => S::InsertPending,

        (S::CancelPending, E::Fill) => S::Fill,
        (S::CancelPending, E::CancelAck) => S::Cancelled,
        (S::CancelPending, E::CancelRejection) => S::CancelFailed,

        (S::CancelFailed, E::Fill) => S::Fill,
        (S::CancelFailed, E::FullFill) => S::FullFill,

        (S::Cancelled, E::Creation) => S::InsertPending,

        // Recycling a uid that is still live is a client-side bug.
        (
            S::InsertPending | S::Active | S::AmendPending | S::Fill | S::CancelPending
            | S::CancelFailed,
            E::Creation,
        ) => return Err(IllegalTransition { state, event }),

        (s, _) => s,
    };
    Ok(next)
}

/// FSM state plus the time of the last applied event, keyed by uid in the
/// orders manager.
#[derive(Debug, Clone)]
pub struct OrderState {
    pub status: OrderStatus,
    pub last_update: Instant,
}

impl OrderState {
    pub fn new() -> Self {
        Self {
            status: OrderStatus::Inactive,
            last_update: Instant::now(),
        }
    }

    pub fn on_event(&mut self, event: OrderEvent) -> Result<(), IllegalTransition> {
        self.status = transition(self.status, event)?;
        self.last_update = Instant::now();
        Ok(())
    }
}

impl Default for OrderState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use OrderEvent as E;
    use OrderStatus as S;

    fn run(events: &[E]) -> OrderStatus {
        let mut st = OrderState::new();
        for e in events {
            st.on_event(*e).unwrap();
        }
        st.status
    }

    #[test]
    fn test_happy_path_to_full_fill() {
        assert_eq!(run(&[E::Creation, E::InsertAck, E::Fill, E::FullFill]), S::FullFill);
    }

    #[test]
    fn test_insert_rejection_is_terminal() {
        let mut st = OrderState::new();
        st.on_event(E::Creation).unwrap();
        st.on_event(E::InsertRejection).unwrap();
        assert_eq!(st.status, S::InsertFailed);
        // Terminal: everything afterwards is a no-op.
        st.on_event(E::Fill).unwrap();
        st.on_event(E::CancelAck).unwrap();
        assert_eq!(st.status, S::InsertFailed);
    }

    #[test]
    fn test_amend_cycle() {
        assert_eq!(run(&[E::Creation, E::InsertAck, E::Amend, E::AmendAck]), S::Active);
        assert_eq!(
            run(&[E::Creation, E::InsertAck, E::Amend, E::AmendPartialAck]),
            S::Active
        );
        assert_eq!(
            run(&[E::Creation, E::InsertAck, E::Amend, E::AmendRejection]),
            S::Inactive
        );
    }

    #[test]
    fn test_cancel_rejection_keeps_order_fillable() {
        let status = run(&[E::Creation, E::InsertAck, E::Cancel, E::CancelRejection]);
        assert_eq!(status, S::CancelFailed);
        assert_eq!(transition(status, E::Fill).unwrap(), S::Fill);
        assert_eq!(transition(status, E::FullFill).unwrap(), S::FullFill);
    }

    #[test]
    fn test_fill_while_cancel_pending() {
        assert_eq!(run(&[E::Creation, E::InsertAck, E::Cancel, E::Fill]), S::Fill);
    }

    #[test]
    fn test_full_fill_downgraded_by_partial_amend_ack() {
        assert_eq!(
            run(&[E::Creation, E::InsertAck, E::FullFill, E::AmendPartialAck]),
            S::Fill
        );
    }

    #[test]
    fn test_terminal_states_recycle_on_creation() {
        assert_eq!(
            run(&[E::Creation, E::InsertAck, E::Cancel, E::CancelAck, E::Creation]),
            S::InsertPending
        );
        assert_eq!(
            run(&[E::Creation, E::InsertAck, E::FullFill, E::Creation]),
            S::InsertPending
        );
    }

    #[test]
    fn test_inactive_rejects_everything_but_creation() {
        assert!(transition(S::Inactive, E::Fill).is_err());
        assert!(transition(S::Inactive, E::CancelAck).is_err());
        assert!(transition(S::Inactive, E::Creation).is_ok());
    }

    #[test]
    fn test_creation_while_live_is_illegal() {
        assert!(transition(S::Active, E::Creation).is_err());
        assert!(transition(S::CancelPending, E::Creation).is_err());
        assert!(transition(S::AmendPending, E::Creation).is_err());
    }

    #[test]
    fn test_unlisted_events_are_noops() {
        assert_eq!(transition(S::Active, E::InsertAck).unwrap(), S::Active);
        assert_eq!(transition(S::Fill, E::Fill).unwrap(), S::Fill);
        assert_eq!(transition(S::Cancelled, E::Fill).unwrap(), S::Cancelled);
        assert_eq!(transition(S::InsertFailed, E::Creation).unwrap(), S::InsertFailed);
    }
}
