//! Pack-opening and battle domain types.
//!
//! Defines catalog/pull/battle/ledger records, constants and the engine error
//! taxonomy shared by the execution layer and the HTTP service.

mod battle;
mod catalog;
mod constants;
mod error;
mod ledger;
mod pull;

pub use battle::*;
pub use catalog::*;
pub use constants::*;
pub use error::*;
pub use ledger::*;
pub use pull::*;

#[cfg(test)]
mod tests;
