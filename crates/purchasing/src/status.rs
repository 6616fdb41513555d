use serde::{Deserialize, Serialize};

use stockflow_core::DomainError;

/// Purchase order status lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PurchaseOrderStatus {
    Draft,
    Pending,
    Approved,
    Received,
    Cancelled,
}

/// Ledger effect attached to a legal transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PurchaseTransitionEffect {
    None,
    /// One INBOUND movement per line into the purchase order's warehouse.
    ReceiveStock,
}

const TRANSITIONS: &[(PurchaseOrderStatus, PurchaseOrderStatus, PurchaseTransitionEffect)] = &[
    (PurchaseOrderStatus::Draft, PurchaseOrderStatus::Pending, PurchaseTransitionEffect::None),
    (PurchaseOrderStatus::Pending, PurchaseOrderStatus::Approved, PurchaseTransitionEffect::None),
    (
        PurchaseOrderStatus::Approved,
        PurchaseOrderStatus::Received,
        PurchaseTransitionEffect::ReceiveStock,
    ),
    (PurchaseOrderStatus::Draft, PurchaseOrderStatus::Cancelled, PurchaseTransitionEffect::None),
    (PurchaseOrderStatus::Pending, PurchaseOrderStatus::Cancelled, PurchaseTransitionEffect::None),
    (PurchaseOrderStatus::Approved, PurchaseOrderStatus::Cancelled, PurchaseTransitionEffect::None),
];

impl PurchaseOrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PurchaseOrderStatus::Draft => "DRAFT",
            PurchaseOrderStatus::Pending => "PENDING",
            PurchaseOrderStatus::Approved => "APPROVED",
            PurchaseOrderStatus::Received => "RECEIVED",
            PurchaseOrderStatus::Cancelled => "CANCELLED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, PurchaseOrderStatus::Received | PurchaseOrderStatus::Cancelled)
    }

    pub fn transition_to(
        self,
        to: PurchaseOrderStatus,
    ) -> Result<PurchaseTransitionEffect, DomainError> {
        TRANSITIONS
            .iter()
            .find(|(from, target, _)| *from == self && *target == to)
            .map(|(_, _, effect)| *effect)
            .ok_or_else(|| {
                DomainError::validation(format!(
                    "illegal purchase order status transition {} -> {}",
                    self.as_str(),
                    to.as_str()
                ))
            })
    }
}

impl core::fmt::Display for PurchaseOrderStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for PurchaseOrderStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "DRAFT" => Ok(PurchaseOrderStatus::Draft),
            "PENDING" => Ok(PurchaseOrderStatus::Pending),
            "APPROVED" => Ok(PurchaseOrderStatus::Approved),
            "RECEIVED" => Ok(PurchaseOrderStatus::Received),
            "CANCELLED" => Ok(PurchaseOrderStatus::Cancelled),
            other => Err(DomainError::validation(format!(
                "unknown purchase order status '{other}'"
            ))),
        }
    }
}
