//! Command-line interface

use std::path::PathBuf;

use clap::Parser;

#[derive(Debug, Parser)]
#[command(name = "scanward", version, about = "Recurring vulnerability scans through OMP")]
pub struct Cli {
    /// Configuration file (default: $SCANWARD_CONFIG or scanward.toml)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Sweep this subnet for hosts before reconciling, e.g. 10.0.0.0/24
    #[arg(short, long, value_name = "SUBNET")]
    pub scan: Option<String>,

    /// Start the next due scan
    #[arg(short, long)]
    pub run: bool,

    /// Check the live MAC address of a host before starting its scan
    #[arg(long)]
    pub verify: bool,

    /// More log output (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

impl Cli {
    pub fn log_level(&self) -> &'static str {
        match self.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    }
}
