//! Command handlers, one module per top-level subcommand.

pub mod formula;
pub mod init;
pub mod mol;
