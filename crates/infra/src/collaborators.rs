//! External collaborators the core talks to through narrow traits.
//!
//! Audit and notification delivery happen after commit; catalog and
//! warehouse lookups are read-only. The in-memory implementations back
//! tests and local development.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use thiserror::Error;

use stockflow_core::{ProductId, TenantId, WarehouseId};
use stockflow_inventory::{ProductRecord, WarehouseRecord};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CollaboratorError {
    #[error("collaborator unavailable: {0}")]
    Unavailable(String),

    #[error("collaborator rejected the request: {0}")]
    Rejected(String),
}

/// Append-only audit trail.
pub trait AuditService: Send + Sync {
    fn log(
        &self,
        tenant_id: TenantId,
        action_type: &str,
        description: &str,
    ) -> Result<(), CollaboratorError>;
}

/// User-facing notifications ("item moved", ...).
pub trait NotificationService: Send + Sync {
    fn notify(&self, tenant_id: TenantId, message: &str) -> Result<(), CollaboratorError>;
}

/// Read access to the tenant's product catalog.
pub trait ProductCatalog: Send + Sync {
    fn product(&self, tenant_id: TenantId, product_id: ProductId) -> Option<ProductRecord>;
}

/// Read access to the tenant's warehouses.
pub trait WarehouseDirectory: Send + Sync {
    fn warehouse(
        &self,
        tenant_id: TenantId,
        warehouse_id: WarehouseId,
    ) -> Option<WarehouseRecord>;

    fn default_warehouse(&self, tenant_id: TenantId) -> Option<WarehouseRecord>;
}

macro_rules! forward_arc {
    ($t:ident { $(fn $name:ident(&self $(, $arg:ident : $ty:ty)* $(,)?) -> $ret:ty;)* }) => {
        impl<S: $t + ?Sized> $t for Arc<S> {
            $(fn $name(&self $(, $arg: $ty)*) -> $ret {
                (**self).$name($($arg),*)
            })*
        }
    };
}

forward_arc!(AuditService {
    fn log(
        &self,
        tenant_id: TenantId,
        action_type: &str,
        description: &str,
    ) -> Result<(), CollaboratorError>;
});
forward_arc!(NotificationService {
    fn notify(&self, tenant_id: TenantId, message: &str) -> Result<(), CollaboratorError>;
});
forward_arc!(ProductCatalog {
    fn product(&self, tenant_id: TenantId, product_id: ProductId) -> Option<ProductRecord>;
});
forward_arc!(WarehouseDirectory {
    fn warehouse(
        &self,
        tenant_id: TenantId,
        warehouse_id: WarehouseId,
    ) -> Option<WarehouseRecord>;
    fn default_warehouse(&self, tenant_id: TenantId) -> Option<WarehouseRecord>;
});

/// One audit trail row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditEntry {
    pub tenant_id: TenantId,
    pub action_type: String,
    pub description: String,
    pub recorded_at: DateTime<Utc>,
}

/// One delivered notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub tenant_id: TenantId,
    pub message: String,
}

/// In-memory audit log. Can be switched to failing mode to exercise
/// post-commit failure handling.
#[derive(Debug, Default)]
pub struct InMemoryAuditLog {
    entries: RwLock<Vec<AuditEntry>>,
    failing: AtomicBool,
}

impl InMemoryAuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn entries(&self, tenant_id: TenantId) -> Vec<AuditEntry> {
        self.entries
            .read()
            .map(|e| e.iter().filter(|x| x.tenant_id == tenant_id).cloned().collect())
            .unwrap_or_default()
    }
}

impl AuditService for InMemoryAuditLog {
    fn log(
        &self,
        tenant_id: TenantId,
        action_type: &str,
        description: &str,
    ) -> Result<(), CollaboratorError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(CollaboratorError::Unavailable("audit log offline".to_string()));
        }
        let mut entries = self
            .entries
            .write()
            .map_err(|_| CollaboratorError::Unavailable("audit log lock poisoned".to_string()))?;
        entries.push(AuditEntry {
            tenant_id,
            action_type: action_type.to_string(),
            description: description.to_string(),
            recorded_at: Utc::now(),
        });
        Ok(())
    }
}

/// In-memory notification sink.
#[derive(Debug, Default)]
pub struct InMemoryNotifier {
    sent: RwLock<Vec<Notification>>,
    failing: AtomicBool,
}

impl InMemoryNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn sent(&self, tenant_id: TenantId) -> Vec<Notification> {
        self.sent
            .read()
            .map(|s| s.iter().filter(|x| x.tenant_id == tenant_id).cloned().collect())
            .unwrap_or_default()
    }
}

impl NotificationService for InMemoryNotifier {
    fn notify(&self, tenant_id: TenantId, message: &str) -> Result<(), CollaboratorError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(CollaboratorError::Unavailable("notification channel offline".to_string()));
        }
        let mut sent = self
            .sent
            .write()
            .map_err(|_| CollaboratorError::Unavailable("notifier lock poisoned".to_string()))?;
        sent.push(Notification {
            tenant_id,
            message: message.to_string(),
        });
        Ok(())
    }
}

/// In-memory product catalog and warehouse directory.
#[derive(Debug, Default)]
pub struct InMemoryCatalog {
    products: RwLock<HashMap<(TenantId, ProductId), ProductRecord>>,
    warehouses: RwLock<HashMap<(TenantId, WarehouseId), WarehouseRecord>>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert_product(&self, tenant_id: TenantId, product: ProductRecord) {
        if let Ok(mut products) = self.products.write() {
            products.insert((tenant_id, product.product_id), product);
        }
    }

    /// Register a warehouse. A new default replaces the previous default.
    pub fn upsert_warehouse(&self, tenant_id: TenantId, warehouse: WarehouseRecord) {
        if let Ok(mut warehouses) = self.warehouses.write() {
            if warehouse.is_default {
                for ((t, _), w) in warehouses.iter_mut() {
                    if *t == tenant_id {
                        w.is_default = false;
                    }
                }
            }
            warehouses.insert((tenant_id, warehouse.warehouse_id), warehouse);
        }
    }
}

impl ProductCatalog for InMemoryCatalog {
    fn product(&self, tenant_id: TenantId, product_id: ProductId) -> Option<ProductRecord> {
        self.products.read().ok()?.get(&(tenant_id, product_id)).cloned()
    }
}

impl WarehouseDirectory for InMemoryCatalog {
    fn warehouse(
        &self,
        tenant_id: TenantId,
        warehouse_id: WarehouseId,
    ) -> Option<WarehouseRecord> {
        self.warehouses.read().ok()?.get(&(tenant_id, warehouse_id)).cloned()
    }

    fn default_warehouse(&self, tenant_id: TenantId) -> Option<WarehouseRecord> {
        self.warehouses
            .read()
            .ok()?
            .iter()
            .find(|((t, _), w)| *t == tenant_id && w.is_default)
            .map(|(_, w)| w.clone())
    }
}
