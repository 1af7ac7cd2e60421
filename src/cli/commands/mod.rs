//! One module per `k2` subcommand.

pub mod add;
pub mod list;
pub mod newdb;
pub mod pull;
pub mod remove;
pub mod sync;
