//! Command line arguments

use std::path::PathBuf;

use clap::Parser;

/// Arguments for the websubd daemon
#[derive(Parser, Debug)]
#[command(version, about = "WebSub hub daemon", long_about = None)]
pub struct CLIArgs {
    /// Use the <directory> as the working directory
    #[arg(short, long, value_name = "DIR")]
    pub work_dir: Option<PathBuf>,

    /// Use the <file> as config instead of <work-dir>/config.toml
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Disable logging output
    #[arg(long, default_value_t = false)]
    pub disable_logging: bool,
}
