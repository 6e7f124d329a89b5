//! metakmer CLI: reference-free k-mer features for metagenomic categories.
//!
//! Drives the external k-mer engine through counting, selection, component
//! extraction, feature computation and export, then assembles one feature table.

mod commands;

use clap::Parser;
use color_eyre::eyre::Result;

use commands::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            std::process::exit(commands::parse_exit_code(&e));
        }
    };
    commands::init_tracing(&cli);
    commands::run(cli).await
}
