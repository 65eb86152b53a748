//! Argument parsing for running from the command line

use std::path::PathBuf;

use clap::Parser;
use clap_verbosity_flag::{InfoLevel, Verbosity};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Serial device the acquisition board is attached to (e.g. /dev/ttyACM0, COM3)
    #[arg(short, long)]
    pub port: Option<String>,
    /// Serial baud rate
    #[arg(short, long)]
    pub baud: Option<u32>,
    /// JSON settings file; command-line flags override its values
    #[arg(short, long)]
    pub config: Option<PathBuf>,
    /// Run against a simulated board instead of a serial port
    #[arg(long)]
    pub simulate: bool,
    /// Directory for summary logs, raw snapshots and plots
    #[arg(short, long)]
    pub out_dir: Option<PathBuf>,
    /// Sample rate to request from the board at startup (Hz)
    #[arg(short, long)]
    pub rate: Option<f64>,
    /// Do not write the statistics log
    #[arg(long)]
    pub no_log: bool,
    #[command(flatten)]
    pub verbose: Verbosity<InfoLevel>,
}
