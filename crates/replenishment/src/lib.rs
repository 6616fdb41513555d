//! Replenishment suggestions.
//!
//! Pure derivation from ledger balances and reorder policy: no IO, no clock,
//! identical output for identical input. Candidate selection and paging
//! happen at the data-access boundary (`stockflow-infra`); this crate only
//! decides which rows qualify and what to suggest for them.

pub mod engine;
pub mod paging;

pub use engine::{
    ReplenishmentCandidate, ReplenishmentEngine, ReplenishmentItem, ReplenishmentPolicy,
    suggest_quantity,
};
pub use paging::{PageRequest, PagedResult};
