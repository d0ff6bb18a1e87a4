//! List a remote directory.

use std::time::Duration;

use anyhow::{Context, Result};
use hydrofetch::{config::Config, ftp::list_names};

use crate::cli::{create_spinner, Cli, ListArgs};

use super::make_endpoint;

pub async fn list(cli: &Cli, args: &ListArgs, config: &Config) -> Result<Vec<String>> {
    let endpoint = make_endpoint(cli, config, &args.host, args.port);
    let connect_timeout = Duration::from_secs(config.fetch.connect_timeout_secs);

    let bar = create_spinner(format!("Listing {}...", args.dir));
    let names = list_names(&endpoint, &args.dir, connect_timeout)
        .await
        .with_context(|| format!("listing {} on {}", args.dir, args.host))?;
    bar.finish_and_clear();

    Ok(names)
}
