//! Order state machine.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::OrderError;

/// The state of an order or order line in its fulfillment lifecycle.
///
/// State transitions:
/// ```text
/// Processing ──► Processed ──► Fulfilling ──► Shipping ──► Delivered
///      │             │             │             │             │
///      ├─────────────┴──► Cancelled│             └──► Returned ◄┘
///      └──────────── Suspended ◄───┴── (any non-terminal state)
/// ```
///
/// Main-flow states only move forward, though intermediate states may be
/// skipped. A suspended order resumes into any main-flow state after
/// `Processing`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum OrderState {
    /// Rows exist locally, remote reservations are being placed.
    #[default]
    Processing,

    /// Every location accepted its line.
    Processed,

    /// Locations are picking and packing.
    Fulfilling,

    /// Handed to the carrier.
    Shipping,

    /// Received by the customer.
    Delivered,

    /// Cancelled before fulfillment (terminal state).
    Cancelled,

    /// Sent back after shipping (terminal state).
    Returned,

    /// Held by a location or by support.
    Suspended,
}

impl OrderState {
    /// All states, in declaration order.
    pub const ALL: [OrderState; 8] = [
        OrderState::Processing,
        OrderState::Processed,
        OrderState::Fulfilling,
        OrderState::Shipping,
        OrderState::Delivered,
        OrderState::Cancelled,
        OrderState::Returned,
        OrderState::Suspended,
    ];

    /// Position along the main flow, `None` for side branches.
    fn rank(&self) -> Option<u8> {
        match self {
            OrderState::Processing => Some(0),
            OrderState::Processed => Some(1),
            OrderState::Fulfilling => Some(2),
            OrderState::Shipping => Some(3),
            OrderState::Delivered => Some(4),
            OrderState::Cancelled | OrderState::Returned | OrderState::Suspended => None,
        }
    }

    /// Returns true if an external update may move an order into this state.
    pub fn is_external_target(&self) -> bool {
        !matches!(self, OrderState::Processing)
    }

    /// Returns true if the order can still be cancelled by the customer.
    pub fn is_cancellable(&self) -> bool {
        matches!(self, OrderState::Processing | OrderState::Processed)
    }

    /// Returns true if this is a terminal state (no further transitions possible).
    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderState::Cancelled | OrderState::Returned)
    }

    /// Returns true if moving from `self` to `next` is a legal transition.
    ///
    /// Re-applying the current state is accepted as a no-op.
    pub fn can_transition_to(&self, next: OrderState) -> bool {
        if *self == next {
            return true;
        }
        if self.is_terminal() {
            return false;
        }
        match next {
            OrderState::Processing => false,
            OrderState::Suspended => true,
            OrderState::Cancelled => matches!(
                self,
                OrderState::Processing | OrderState::Processed | OrderState::Suspended
            ),
            OrderState::Returned => {
                matches!(self, OrderState::Shipping | OrderState::Delivered)
            }
            _ => match (self.rank(), next.rank()) {
                (Some(current), Some(target)) => target > current,
                // Resuming from suspension.
                (None, Some(_)) => *self == OrderState::Suspended,
                _ => false,
            },
        }
    }

    /// Validates a transition, returning the target state when legal.
    pub fn transition_to(&self, next: OrderState) -> Result<OrderState, OrderError> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(OrderError::InvalidStateTransition {
                from: *self,
                to: next,
            })
        }
    }

    /// Returns the state name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderState::Processing => "Processing",
            OrderState::Processed => "Processed",
            OrderState::Fulfilling => "Fulfilling",
            OrderState::Shipping => "Shipping",
            OrderState::Delivered => "Delivered",
            OrderState::Cancelled => "Cancelled",
            OrderState::Returned => "Returned",
            OrderState::Suspended => "Suspended",
        }
    }
}

impl std::fmt::Display for OrderState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for OrderState {
    type Err = OrderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        OrderState::ALL
            .into_iter()
            .find(|state| state.as_str() == s)
            .ok_or_else(|| OrderError::UnknownState(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_state_is_processing() {
        assert_eq!(OrderState::default(), OrderState::Processing);
    }

    #[test]
    fn test_processing_is_never_an_external_target() {
        assert!(!OrderState::Processing.is_external_target());
        for state in OrderState::ALL.into_iter().skip(1) {
            assert!(state.is_external_target(), "{state}");
        }
    }

    #[test]
    fn test_only_pre_fulfillment_states_are_cancellable() {
        assert!(OrderState::Processing.is_cancellable());
        assert!(OrderState::Processed.is_cancellable());
        assert!(!OrderState::Fulfilling.is_cancellable());
        assert!(!OrderState::Shipping.is_cancellable());
        assert!(!OrderState::Delivered.is_cancellable());
        assert!(!OrderState::Cancelled.is_cancellable());
        assert!(!OrderState::Returned.is_cancellable());
        assert!(!OrderState::Suspended.is_cancellable());
    }

    #[test]
    fn test_main_flow_moves_forward_only() {
        assert!(OrderState::Processing.can_transition_to(OrderState::Processed));
        assert!(OrderState::Processed.can_transition_to(OrderState::Fulfilling));
        assert!(OrderState::Processed.can_transition_to(OrderState::Shipping));
        assert!(OrderState::Shipping.can_transition_to(OrderState::Delivered));
        assert!(!OrderState::Delivered.can_transition_to(OrderState::Shipping));
        assert!(!OrderState::Fulfilling.can_transition_to(OrderState::Processed));
        assert!(!OrderState::Processed.can_transition_to(OrderState::Processing));
    }

    #[test]
    fn test_side_branches() {
        assert!(OrderState::Fulfilling.can_transition_to(OrderState::Suspended));
        assert!(OrderState::Suspended.can_transition_to(OrderState::Shipping));
        assert!(OrderState::Suspended.can_transition_to(OrderState::Cancelled));
        assert!(!OrderState::Suspended.can_transition_to(OrderState::Processing));
        assert!(OrderState::Delivered.can_transition_to(OrderState::Returned));
        assert!(!OrderState::Processed.can_transition_to(OrderState::Returned));
        assert!(!OrderState::Shipping.can_transition_to(OrderState::Cancelled));
    }

    #[test]
    fn test_terminal_states_reject_everything_but_themselves() {
        for terminal in [OrderState::Cancelled, OrderState::Returned] {
            assert!(terminal.is_terminal());
            assert!(terminal.can_transition_to(terminal));
            assert!(!terminal.can_transition_to(OrderState::Suspended));
            assert!(!terminal.can_transition_to(OrderState::Delivered));
        }
    }

    #[test]
    fn test_transition_to_reports_both_states() {
        let err = OrderState::Delivered
            .transition_to(OrderState::Fulfilling)
            .unwrap_err();
        assert!(matches!(
            err,
            OrderError::InvalidStateTransition {
                from: OrderState::Delivered,
                to: OrderState::Fulfilling
            }
        ));
    }

    #[test]
    fn test_parse_round_trips_names() {
        for state in OrderState::ALL {
            assert_eq!(state.as_str().parse::<OrderState>().unwrap(), state);
        }
        assert!("Lost".parse::<OrderState>().is_err());
    }
}
