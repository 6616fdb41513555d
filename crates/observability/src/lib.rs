//! Tracing/logging setup shared by every binary and test harness.

/// Tracing configuration (filters, layers).
pub mod tracing;

pub use self::tracing::LoggingSettings;

/// Initialize process-wide observability with defaults (`RUST_LOG`, else `info`; JSON).
///
/// This is safe to call multiple times; subsequent calls become no-ops.
pub fn init() {
    self::tracing::init_with(&LoggingSettings::default());
}

/// Initialize process-wide observability from explicit settings.
pub fn init_with(settings: &LoggingSettings) {
    self::tracing::init_with(settings);
}
