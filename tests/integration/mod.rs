//! Integration tests for the foldsync snapshot and reconciliation engine

mod authoring;
mod collective_sync;
mod reconcile_scenarios;
mod stash_durability;
pub mod test_utils;
