//! Command handlers, one module per top-level subcommand.

pub mod config_cmd;
pub mod replay;
pub mod send;
pub mod sign;
pub mod views;
