//! Library root for the sync engine. The binary (`main.rs`) wires these
//! modules into a CLI; tests throughout exercise them directly.

pub mod bootstrap;
pub mod cache;
pub mod change_loop;
pub mod config;
pub mod daemon;
pub mod engine;
pub mod error;
pub mod model;
pub mod queue;
pub mod reconciler;
pub mod remote;
pub mod state_store;
pub mod watcher;
