//! Foldsync: Folder Synchronization over a Content-Addressed Grid
//!
//! Every file of a synchronized folder has its own history: a DAG of signed
//! snapshots stored in the grid. Participants publish their current head per
//! file to a shared collective view and reconcile against each other's heads
//! by walking ancestry, fast-forwarding where one history contains the other
//! and reporting conflicts where they diverge.

pub mod address;
pub mod cli;
pub mod collective;
pub mod config;
pub mod dag;
pub mod error;
pub mod heads;
pub mod identity;
pub mod logging;
pub mod path;
pub mod reconcile;
pub mod registry;
pub mod retry;
pub mod snapshot;
pub mod stash;
pub mod store;
pub mod sync;
pub mod types;
pub mod walker;
