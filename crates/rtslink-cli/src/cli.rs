//! Command-line interface definitions and parsing

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Configuration file path
    #[arg(short, long)]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// List robots in range
    Scan {
        /// Scan duration in seconds
        #[arg(short, long)]
        timeout: Option<u64>,
    },
    /// Pair with a robot and open the operator console
    Connect {
        /// Robot name, e.g. Vector-R2D2 or just R2D2
        name: String,
        /// PIN shown on the robot, submitted when requested
        #[arg(short, long)]
        pin: Option<String>,
        /// Ignore saved session keys and pair from scratch
        #[arg(long)]
        fresh: bool,
    },
    /// Print a configuration file with every default filled in
    Config,
}
