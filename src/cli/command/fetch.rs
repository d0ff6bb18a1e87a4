//! Fetch one file and optionally unpack it.

use std::{fs, path::PathBuf, time::Duration};

use anyhow::{Context, Result};
use hydrofetch::{
    config::Config,
    ftp::{FetchRequest, Fetcher},
    unpack,
};
use tracing::info;

use crate::cli::{create_download_bar, create_spinner, Cli, FetchArgs};

use super::{make_endpoint, make_local_path};

pub async fn fetch(cli: &Cli, args: &FetchArgs, config: &Config) -> Result<Vec<PathBuf>> {
    let local_path = make_local_path(args.out.as_deref(), &config.data_dir, &args.remote_name);
    let download_dir = local_path
        .parent()
        .map(PathBuf::from)
        .unwrap_or_else(|| config.data_dir.clone());
    fs::create_dir_all(&download_dir)
        .with_context(|| format!("creating {}", download_dir.display()))?;

    let mut options = config.fetch.to_options();
    if let Some(attempts) = args.attempts {
        options.max_attempts = attempts;
    }
    if let Some(secs) = args.stall_timeout {
        options.stall_timeout = Duration::from_secs(secs);
    }
    if let Some(secs) = args.backoff {
        options.retry_backoff = Duration::from_secs(secs);
    }

    let request = FetchRequest {
        endpoint: make_endpoint(cli, config, &args.host, args.port),
        remote_dir: args.dir.clone(),
        remote_name: args.remote_name.clone(),
        local_path,
    };

    let bar = create_download_bar(format!("Downloading {}", args.remote_name));
    let report = Fetcher::new(options)
        .with_progress_bar(bar)
        .fetch(&request)
        .await?;
    info!(
        bytes = report.bytes,
        attempts = report.connect_attempts,
        "saved {}",
        report.local_path.display()
    );

    if !args.gunzip {
        return Ok(vec![report.local_path]);
    }

    let unzipped = unpack::gunzip(&report.local_path, !args.keep)?;
    if !args.untar {
        return Ok(vec![unzipped]);
    }

    let bar = create_spinner("Unpacking archive...".to_string());
    let files = unpack::untar(&unzipped, &download_dir, !args.keep, &bar)?;
    bar.finish_with_message("Archive unpacked");

    Ok(files)
}
