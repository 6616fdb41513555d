use chrono::{DateTime, Utc};

use stockflow_core::TenantId;

/// A fact recorded on an aggregate stream.
///
/// The payload is stored as JSON next to `event_type` and `version`, so a
/// renamed or reshaped event needs a new version rather than an edit.
pub trait Event: Clone + core::fmt::Debug + Send + Sync + 'static {
    /// Dotted name, `<context>.<aggregate>.<fact>` (e.g. "sales.order.placed").
    fn event_type(&self) -> &'static str;

    /// Payload schema version.
    fn version(&self) -> u32 {
        1
    }

    /// Owning tenant; must match the envelope the event is stored under.
    fn tenant_id(&self) -> TenantId;

    /// Business time.
    fn occurred_at(&self) -> DateTime<Utc>;
}
