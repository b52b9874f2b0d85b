//! websubd

use anyhow::Result;
use clap::Parser;
use websubd::cli::CLIArgs;
use websubd::{get_work_directory, load_settings, run_hubd};

#[tokio::main]
async fn main() -> Result<()> {
    let args = CLIArgs::parse();

    let work_dir = get_work_directory(&args).await?;
    let settings = load_settings(&work_dir, args.config.clone())?;

    run_hubd(&work_dir, &settings, !args.disable_logging).await
}
