pub mod backfill;
pub mod enrollment;
pub mod error;
pub mod generator;
pub mod ledger;
pub mod legacy_sync;
pub mod lifecycle;
pub mod month;
pub mod onboarding;
pub mod period;
pub mod report;
pub mod resolver;
pub mod store;

#[cfg(test)]
pub(crate) mod testing;

pub use error::FeeError;
pub use month::Month;
pub use period::{Scope, ScopeType};
