//! rtslink CLI library
//!
//! Components of the `rtslink` command-line tool: argument parsing,
//! configuration loading, command handlers and the interactive operator
//! console.

pub mod cli;
pub mod commands;
pub mod config;
pub mod console;
pub mod error;

pub use cli::{Cli, Commands};
pub use config::AppConfig;
pub use error::{CliError, Result};
