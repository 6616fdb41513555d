//! Explicit per-request tenant/actor context.

use serde::{Deserialize, Serialize};

use crate::id::{TenantId, UserId};

/// Who is acting, and on behalf of which tenant.
///
/// Every core operation takes this as a parameter; there is no ambient
/// "logged user" lookup.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestContext {
    tenant_id: TenantId,
    user_id: UserId,
}

impl RequestContext {
    pub fn new(tenant_id: TenantId, user_id: UserId) -> Self {
        Self { tenant_id, user_id }
    }

    pub fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }
}
