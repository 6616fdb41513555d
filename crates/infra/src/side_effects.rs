//! Post-commit side effects: audit entries and notifications.
//!
//! Driven by committed envelopes from the event bus, so a failing audit log
//! or notification channel can never roll back a ledger write.

use std::sync::Arc;

use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::warn;

use stockflow_core::Aggregate;
use stockflow_events::EventEnvelope;
use stockflow_inventory::{StockItem, StockItemEvent};
use stockflow_purchasing::{PurchaseOrder, PurchaseOrderEvent};
use stockflow_sales::{Order, OrderEvent};

use crate::collaborators::{AuditService, CollaboratorError, NotificationService};

pub const AUDIT_STOCK_MOVEMENT: &str = "STOCK_MOVEMENT";
pub const AUDIT_ORDER_CREATED: &str = "ORDER_CREATED";
pub const AUDIT_ORDER_STATUS_CHANGE: &str = "ORDER_STATUS_CHANGE";
pub const AUDIT_PURCHASE_ORDER_CREATED: &str = "PURCHASE_ORDER_CREATED";
pub const AUDIT_PURCHASE_ORDER_STATUS_CHANGE: &str = "PURCHASE_ORDER_STATUS_CHANGE";

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("failed to decode {event_type}: {message}")]
    Decode { event_type: String, message: String },

    #[error("{failed} side effect(s) failed, first: {first}")]
    Delivery { failed: usize, first: CollaboratorError },
}

enum Effect {
    Audit { action_type: &'static str, description: String },
    Notify(String),
}

/// Turns committed events into audit entries and notifications.
pub struct SideEffectRelay {
    audit: Arc<dyn AuditService>,
    notifier: Arc<dyn NotificationService>,
}

impl SideEffectRelay {
    pub fn new(audit: Arc<dyn AuditService>, notifier: Arc<dyn NotificationService>) -> Self {
        Self { audit, notifier }
    }

    /// Deliver every side effect of one envelope.
    ///
    /// All deliveries are attempted; failures are logged and summarized in
    /// the returned error.
    pub fn handle(&self, envelope: &EventEnvelope<JsonValue>) -> Result<(), RelayError> {
        let tenant_id = envelope.tenant_id();
        let effects = effects_of(envelope)?;

        let mut failures = Vec::new();
        for effect in effects {
            let result = match &effect {
                Effect::Audit { action_type, description } => {
                    self.audit.log(tenant_id, action_type, description)
                }
                Effect::Notify(message) => self.notifier.notify(tenant_id, message),
            };
            if let Err(err) = result {
                warn!(
                    %tenant_id,
                    event_id = %envelope.event_id(),
                    event_type = envelope.event_type(),
                    error = %err,
                    "side effect delivery failed"
                );
                failures.push(err);
            }
        }

        let failed = failures.len();
        match failures.into_iter().next() {
            None => Ok(()),
            Some(first) => Err(RelayError::Delivery { failed, first }),
        }
    }

    /// Bus handler shape for [`crate::workers::EventWorker`].
    pub fn into_handler(
        self: Arc<Self>,
    ) -> impl FnMut(EventEnvelope<JsonValue>) -> Result<(), RelayError> + Send + 'static {
        move |envelope| self.handle(&envelope)
    }
}

fn decode<E: serde::de::DeserializeOwned>(
    envelope: &EventEnvelope<JsonValue>,
) -> Result<E, RelayError> {
    serde_json::from_value(envelope.payload().clone()).map_err(|e| RelayError::Decode {
        event_type: envelope.event_type().to_string(),
        message: e.to_string(),
    })
}

fn effects_of(envelope: &EventEnvelope<JsonValue>) -> Result<Vec<Effect>, RelayError> {
    let aggregate_type = envelope.aggregate_type();

    if aggregate_type == StockItem::AGGREGATE_TYPE {
        let StockItemEvent::MovementRecorded(m) = decode::<StockItemEvent>(envelope)?;
        let reference = if m.reference.is_empty() {
            String::new()
        } else {
            format!(" (ref {})", m.reference)
        };
        return Ok(vec![
            Effect::Notify(format!(
                "Item moved: {} {} of product {} at warehouse {}{reference}",
                m.movement_type, m.quantity, m.product_id, m.warehouse_id
            )),
            Effect::Audit {
                action_type: AUDIT_STOCK_MOVEMENT,
                description: format!(
                    "{} {} product {} warehouse {} -> {} on hand{reference}",
                    m.movement_type, m.quantity, m.product_id, m.warehouse_id, m.resulting_quantity
                ),
            },
        ]);
    }

    if aggregate_type == Order::AGGREGATE_TYPE {
        return Ok(match decode::<OrderEvent>(envelope)? {
            OrderEvent::OrderPlaced(e) => vec![Effect::Audit {
                action_type: AUDIT_ORDER_CREATED,
                description: format!(
                    "order {} placed for {} ({} lines, total {})",
                    e.order_number,
                    e.customer_name,
                    e.items.len(),
                    e.total
                ),
            }],
            OrderEvent::OrderStatusChanged(e) => vec![Effect::Audit {
                action_type: AUDIT_ORDER_STATUS_CHANGE,
                description: format!(
                    "order {} {} -> {} ({} stock movements)",
                    e.order_number,
                    e.from,
                    e.to,
                    e.postings.len()
                ),
            }],
        });
    }

    if aggregate_type == PurchaseOrder::AGGREGATE_TYPE {
        return Ok(match decode::<PurchaseOrderEvent>(envelope)? {
            PurchaseOrderEvent::PurchaseOrderCreated(e) => vec![Effect::Audit {
                action_type: AUDIT_PURCHASE_ORDER_CREATED,
                description: format!(
                    "purchase order {} created for supplier {}",
                    e.number, e.supplier_id
                ),
            }],
            PurchaseOrderEvent::PurchaseOrderLineAdded(_) => vec![],
            PurchaseOrderEvent::PurchaseOrderStatusChanged(e) => vec![Effect::Audit {
                action_type: AUDIT_PURCHASE_ORDER_STATUS_CHANGE,
                description: format!(
                    "purchase order {} {} -> {} ({} receipts)",
                    e.number,
                    e.from,
                    e.to,
                    e.receipts.len()
                ),
            }],
        });
    }

    Ok(vec![])
}
