//! Service configuration.
//!
//! Loaded in layers, later layers winning:
//! 1. Defaults in code
//! 2. Optional `stockflow.toml` in the working directory
//! 3. Environment variables with the `STOCKFLOW__` prefix
//!    (e.g. `STOCKFLOW__REPLENISHMENT__SLACK_BAND=5`)

use config::{ConfigBuilder, ConfigError, Environment, File, FileFormat, builder::DefaultState};
use serde::Deserialize;

use stockflow_observability::LoggingSettings;
use stockflow_replenishment::ReplenishmentPolicy;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct StockflowConfig {
    pub replenishment: ReplenishmentConfig,
    pub numbering: NumberingConfig,
    pub logging: LoggingSettings,
    pub database: DatabaseConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ReplenishmentConfig {
    /// Items up to `reorder_point + slack_band` are listed.
    pub slack_band: i64,
    /// Floor for suggestions on items at or below their reorder point.
    pub min_critical_suggestion: i64,
    /// Days of OUTBOUND history averaged when a product has no configured rate.
    pub consumption_window_days: u32,
    pub default_page_size: u32,
    pub max_page_size: u32,
}

impl ReplenishmentConfig {
    pub fn policy(&self) -> ReplenishmentPolicy {
        ReplenishmentPolicy::default()
            .with_slack_band(self.slack_band)
            .with_min_critical_suggestion(self.min_critical_suggestion)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct NumberingConfig {
    pub order_prefix: String,
    pub purchase_order_prefix: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DatabaseConfig {
    /// Postgres URL. Without one the in-memory event store is used.
    pub url: Option<String>,
    pub max_connections: u32,
}

impl StockflowConfig {
    /// Load defaults, `stockflow.toml` and `STOCKFLOW__*` overrides.
    pub fn load() -> Result<Self, ConfigError> {
        Self::defaults()?
            .add_source(File::with_name("stockflow").required(false))
            .add_source(
                Environment::with_prefix("STOCKFLOW")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }

    /// Defaults overlaid with an inline TOML document.
    pub fn from_toml_str(toml: &str) -> Result<Self, ConfigError> {
        Self::defaults()?
            .add_source(File::from_str(toml, FileFormat::Toml))
            .build()?
            .try_deserialize()
    }

    fn defaults() -> Result<ConfigBuilder<DefaultState>, ConfigError> {
        config::Config::builder()
            .set_default("replenishment.slack_band", 10)?
            .set_default("replenishment.min_critical_suggestion", 1)?
            .set_default("replenishment.consumption_window_days", 30)?
            .set_default("replenishment.default_page_size", 50)?
            .set_default("replenishment.max_page_size", 200)?
            .set_default("numbering.order_prefix", "ORD-")?
            .set_default("numbering.purchase_order_prefix", "PO-")?
            .set_default("logging.filter", "info")?
            .set_default("logging.json", true)?
            .set_default("database.max_connections", 10)
    }
}

impl Default for StockflowConfig {
    fn default() -> Self {
        Self {
            replenishment: ReplenishmentConfig {
                slack_band: 10,
                min_critical_suggestion: 1,
                consumption_window_days: 30,
                default_page_size: 50,
                max_page_size: 200,
            },
            numbering: NumberingConfig {
                order_prefix: "ORD-".to_string(),
                purchase_order_prefix: "PO-".to_string(),
            },
            logging: LoggingSettings::default(),
            database: DatabaseConfig {
                url: None,
                max_connections: 10,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_yields_defaults() {
        let cfg = StockflowConfig::from_toml_str("").unwrap();
        assert_eq!(cfg, StockflowConfig::default());
    }

    #[test]
    fn file_values_override_defaults() {
        let cfg = StockflowConfig::from_toml_str(
            r#"
            [replenishment]
            slack_band = 0
            max_page_size = 25

            [numbering]
            order_prefix = "SO-"

            [database]
            url = "postgres://localhost/stockflow"
            "#,
        )
        .unwrap();

        assert_eq!(cfg.replenishment.slack_band, 0);
        assert_eq!(cfg.replenishment.max_page_size, 25);
        assert_eq!(cfg.replenishment.default_page_size, 50);
        assert_eq!(cfg.numbering.order_prefix, "SO-");
        assert_eq!(cfg.numbering.purchase_order_prefix, "PO-");
        assert_eq!(cfg.database.url.as_deref(), Some("postgres://localhost/stockflow"));
        assert_eq!(cfg.replenishment.policy().slack_band, 0);
    }

    #[test]
    fn malformed_values_are_rejected() {
        let err = StockflowConfig::from_toml_str("[replenishment]\nslack_band = \"lots\"");
        assert!(err.is_err());
    }
}
