mod cli;

use anyhow::{Error, Result};
use clap::Parser;
use cli::{command, Cli, Commands};
use hydrofetch::config::{self, Config};

#[tokio::main]
async fn main() -> Result<(), Error> {
    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref())?;

    let level = if cli.verbose { "debug" } else { config.log_level.as_str() };
    config::init_tracing(level);

    let outcome = match &cli.command {
        Commands::Fetch(args) => command::fetch(&cli, args, &config).await.map(|files| {
            for file in files {
                println!("File saved to `{}`", file.display());
            }
        }),
        Commands::List(args) => command::list(&cli, args, &config).await.map(|names| {
            for name in names {
                println!("{name}");
            }
        }),
    };

    if let Err(e) = outcome {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }

    Ok(())
}
