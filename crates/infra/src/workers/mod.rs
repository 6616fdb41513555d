//! Background workers consuming the event bus.

pub mod event_worker;

pub use event_worker::{EventWorker, WorkerHandle};
