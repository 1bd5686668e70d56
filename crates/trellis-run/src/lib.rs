//! Run coordination: run ids and directories, the SQLite run store, and
//! the [`Runner`] that drives a definition to completion.

pub mod runner;
pub mod store;

pub use runner::{RunReport, Runner};
pub use store::{RunRow, RunStore, StoreHydrator, StoreRecorder};
