//! Local dashboard over the speed monitor's CSV logs.
//!
//! Every request re-reads the logs from disk: [`log_store`] discovers and
//! parses them, [`stats`] summarizes them, and [`trigger`] runs the external
//! monitor script for an on-demand test. [`server`] exposes all of it over HTTP.

mod error;
pub mod log_store;
pub mod record;
pub mod server;
pub mod settings;
pub mod stats;
pub mod trigger;

pub use error::{Error, Result};
