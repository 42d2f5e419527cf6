//! # costwatch-cli
//!
//! Costwatch command-line interface.
//!
//! Replays alert cycles against local state:
//! - Importing alert definitions
//! - Refreshing alerts against canned query results
//! - Sending digests through the logging mail transport
//! - Inspecting pending notifications
//!
//! State lives in two JSON snapshots (`alerts.json`, `notifications.json`) in the
//! directory given by `--state` or `COSTWATCH_STATE`.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod cli;
pub mod state;
pub mod worker;

pub use cli::{Cli, Commands, WorkerArgs};
pub use state::State;
pub use worker::{DrainSummary, drain};
