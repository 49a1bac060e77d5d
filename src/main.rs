// chatrelay binary

use chatrelay::relay::{execute_command, RelayCli};
use clap::Parser;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Tracing is installed per command; `serve` may add a log file
    let cli = RelayCli::parse();

    if let Err(e) = execute_command(cli.command).await {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }

    Ok(())
}
