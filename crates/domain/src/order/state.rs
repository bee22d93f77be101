//! Order lifecycle state machine.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::OrderError;

/// The state of an order in its lifecycle.
///
/// State transitions:
/// ```text
/// Pending ──► Paid ──► Shipped ──► Delivered
///    │          │
///    └──────────┴──► Cancelled
/// ```
///
/// `Pending → Paid` is only reachable through payment settlement; every other
/// edge is an administrative action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OrderState {
    /// Created, awaiting payment. Line items may still change.
    #[default]
    Pending,

    /// Payment settled; a payment reference is recorded.
    Paid,

    /// Handed over to the carrier.
    Shipped,

    /// Received by the customer (terminal state).
    Delivered,

    /// Cancelled before delivery (terminal state).
    Cancelled,
}

/// The single authoritative table of legal `(from, to)` transitions.
const TRANSITIONS: &[(OrderState, OrderState)] = &[
    (OrderState::Pending, OrderState::Paid),
    (OrderState::Pending, OrderState::Cancelled),
    (OrderState::Paid, OrderState::Shipped),
    (OrderState::Paid, OrderState::Cancelled),
    (OrderState::Shipped, OrderState::Delivered),
];

impl OrderState {
    /// Every state, in lifecycle order.
    pub const ALL: [OrderState; 5] = [
        OrderState::Pending,
        OrderState::Paid,
        OrderState::Shipped,
        OrderState::Delivered,
        OrderState::Cancelled,
    ];

    /// Returns true if `target` is reachable from this state in one step.
    pub fn can_transition_to(&self, target: OrderState) -> bool {
        TRANSITIONS.contains(&(*self, target))
    }

    /// Checks a transition against the table.
    pub fn validate_transition(&self, target: OrderState) -> Result<(), OrderError> {
        if self.can_transition_to(target) {
            Ok(())
        } else {
            Err(OrderError::InvalidTransition {
                from: *self,
                to: target,
            })
        }
    }

    /// Returns every state reachable from this one in a single step.
    pub fn next_states(&self) -> Vec<OrderState> {
        TRANSITIONS
            .iter()
            .filter(|(from, _)| from == self)
            .map(|(_, to)| *to)
            .collect()
    }

    /// Returns true if line items may be added, removed or re-quantified.
    pub fn can_modify_items(&self) -> bool {
        matches!(self, OrderState::Pending)
    }

    /// Returns true if an order in this state must carry a payment reference.
    pub fn requires_payment_reference(&self) -> bool {
        matches!(
            self,
            OrderState::Paid | OrderState::Shipped | OrderState::Delivered
        )
    }

    /// Returns true if this is a terminal state (no further transitions possible).
    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderState::Delivered | OrderState::Cancelled)
    }

    /// Returns the storage/wire name of the state.
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderState::Pending => "pending",
            OrderState::Paid => "paid",
            OrderState::Shipped => "shipped",
            OrderState::Delivered => "delivered",
            OrderState::Cancelled => "cancelled",
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
