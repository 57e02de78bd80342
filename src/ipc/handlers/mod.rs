pub mod backup;
pub mod core;
pub mod fee_periods;
pub mod fees;
pub mod payments;
pub mod roster;
pub mod setup;
