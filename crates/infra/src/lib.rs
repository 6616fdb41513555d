//! Infrastructure layer: event stores, the commit pipeline, read models,
//! application services and post-commit workers.

pub mod bootstrap;
pub mod collaborators;
pub mod config;
pub mod error;
pub mod event_store;
pub mod numbering;
pub mod pipeline;
pub mod projections;
pub mod read_model;
pub mod services;
pub mod side_effects;
pub mod unit_of_work;
pub mod workers;

pub use bootstrap::{SharedBus, SharedStore, StockflowServices, connect_store, init_logging};
pub use config::StockflowConfig;
pub use error::ServiceError;
pub use pipeline::CommitPipeline;
pub use unit_of_work::UnitOfWork;

mod integration_tests;
