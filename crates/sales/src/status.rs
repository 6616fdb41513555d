//! Order status graph.
//!
//! Transitions are an explicit table: a `(from, to)` pair that is not listed
//! is rejected, never silently accepted.

use serde::{Deserialize, Serialize};

use stockflow_core::DomainError;

/// Sales order status lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderStatus {
    Pending,
    Paid,
    Shipped,
    Cancelled,
}

/// Ledger effect attached to a legal transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderTransitionEffect {
    /// Status change only.
    None,
    /// One OUTBOUND movement per order line.
    DebitStock,
    /// One INBOUND movement per debit recorded when the order was paid.
    RestoreStock,
}

const TRANSITIONS: &[(OrderStatus, OrderStatus, OrderTransitionEffect)] = &[
    (OrderStatus::Pending, OrderStatus::Paid, OrderTransitionEffect::DebitStock),
    (OrderStatus::Pending, OrderStatus::Cancelled, OrderTransitionEffect::None),
    // Shipping does not touch on-hand stock; the debit happened at payment.
    (OrderStatus::Paid, OrderStatus::Shipped, OrderTransitionEffect::None),
    (OrderStatus::Paid, OrderStatus::Cancelled, OrderTransitionEffect::RestoreStock),
];

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "PENDING",
            OrderStatus::Paid => "PAID",
            OrderStatus::Shipped => "SHIPPED",
            OrderStatus::Cancelled => "CANCELLED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Shipped | OrderStatus::Cancelled)
    }

    /// Look up the edge `self -> to`.
    pub fn transition_to(self, to: OrderStatus) -> Result<OrderTransitionEffect, DomainError> {
        TRANSITIONS
            .iter()
            .find(|(from, target, _)| *from == self && *target == to)
            .map(|(_, _, effect)| *effect)
            .ok_or_else(|| {
                DomainError::validation(format!(
                    "illegal order status transition {} -> {}",
                    self.as_str(),
                    to.as_str()
                ))
            })
    }
}

impl core::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for OrderStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "PENDING" => Ok(OrderStatus::Pending),
            "PAID" => Ok(OrderStatus::Paid),
            "SHIPPED" => Ok(OrderStatus::Shipped),
            "CANCELLED" => Ok(OrderStatus::Cancelled),
            other => Err(DomainError::validation(format!("unknown order status '{other}'"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [OrderStatus; 4] = [
        OrderStatus::Pending,
        OrderStatus::Paid,
        OrderStatus::Shipped,
        OrderStatus::Cancelled,
    ];

    #[test]
    fn only_documented_edges_are_legal() {
        let mut legal = Vec::new();
        for from in ALL {
            for to in ALL {
                if let Ok(effect) = from.transition_to(to) {
                    legal.push((from, to, effect));
                }
            }
        }

        assert_eq!(
            legal,
            vec![
                (OrderStatus::Pending, OrderStatus::Paid, OrderTransitionEffect::DebitStock),
                (OrderStatus::Pending, OrderStatus::Cancelled, OrderTransitionEffect::None),
                (OrderStatus::Paid, OrderStatus::Shipped, OrderTransitionEffect::None),
                (OrderStatus::Paid, OrderStatus::Cancelled, OrderTransitionEffect::RestoreStock),
            ]
        );
    }

    #[test]
    fn terminal_states_have_no_outgoing_edges() {
        for from in ALL.into_iter().filter(OrderStatus::is_terminal) {
            for to in ALL {
                assert!(matches!(from.transition_to(to), Err(DomainError::Validation(_))));
            }
        }
    }

    #[test]
    fn parses_case_insensitively() {
        assert_eq!("paid".parse::<OrderStatus>().unwrap(), OrderStatus::Paid);
        assert!("refunded".parse::<OrderStatus>().is_err());
    }
}
