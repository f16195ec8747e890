//! kbexport CLI: turn exported knowledge-base archives into Markdown trees.
//!
//! Every subdirectory of the input root is one knowledge base; each is exported
//! into its own folder under the output root, mirroring its table of contents.

mod commands;

use clap::Parser;
use color_eyre::eyre::Result;

use commands::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    commands::init_tracing(&cli)?;
    commands::run(cli).await
}
