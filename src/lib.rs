//! Reconstructs discrete play sessions from the cumulative playtime counters
//! a game library reports. A daemon polls the counters on a fixed interval
//! and appends delta samples; a nightly pass snaps those samples onto a
//! 30-minute grid and merges them into periods; a small HTTP api answers
//! "what was played on day X" by Eastern calendar date.

pub mod cli;
pub mod daemon;
pub mod query;
pub mod server;
pub mod store;
pub mod upstream;
pub mod utils;
