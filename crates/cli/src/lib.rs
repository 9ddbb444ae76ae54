//! `adminkit` operator tool: argument definitions and command execution.

pub mod cli;
pub mod commands;

pub use cli::{Cli, Command, LockoutCommand, OutputFormat, SessionsCommand};
pub use commands::{Stores, execute};
