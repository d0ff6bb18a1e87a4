//! Command line interface.

pub mod command;

use std::{path::PathBuf, time::Duration};

use clap::{command, Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};

#[derive(Parser)]
#[command(version, about, long_about = None)]
/// Contains the commands
pub struct Cli {
    /// Configuration file (JSON)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Show debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Username for the FTP server
    #[arg(short = 'U', long, global = true)]
    pub ftp_username: Option<String>,

    /// Password for the FTP server
    #[arg(short = 'P', long, global = true)]
    pub ftp_password: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Download one file, resuming interrupted transfers
    Fetch(FetchArgs),
    /// List the files in a remote directory
    List(ListArgs),
}

#[derive(Args)]
pub struct FetchArgs {
    /// Name of the remote file
    pub remote_name: String,

    /// FTP server, e.g. ftp.ncdc.noaa.gov
    #[arg(short = 'H', long)]
    pub host: String,

    /// Remote directory to change into first
    #[arg(short, long)]
    pub dir: Option<String>,

    #[arg(short, long, default_value_t = hydrofetch::ftp::connection::DEFAULT_PORT)]
    pub port: u16,

    /// Destination file, defaults to the remote name inside the data directory
    #[arg(short, long)]
    pub out: Option<PathBuf>,

    /// Decompress the downloaded .gz file
    #[arg(short, long)]
    pub gunzip: bool,

    /// Unpack the decompressed tarball
    #[arg(short, long, requires = "gunzip")]
    pub untar: bool,

    /// Keep archives after unpacking
    #[arg(short, long)]
    pub keep: bool,

    /// Connection attempts before giving up
    #[arg(long)]
    pub attempts: Option<u32>,

    /// Seconds without progress before reconnecting
    #[arg(long)]
    pub stall_timeout: Option<u64>,

    /// Seconds to wait between attempts
    #[arg(long)]
    pub backoff: Option<u64>,
}

#[derive(Args)]
pub struct ListArgs {
    /// FTP server
    #[arg(short = 'H', long)]
    pub host: String,

    /// Remote directory to list
    #[arg(short, long, default_value = "/")]
    pub dir: String,

    #[arg(short, long, default_value_t = hydrofetch::ftp::connection::DEFAULT_PORT)]
    pub port: u16,
}

/// Creates a spinner.
pub fn create_spinner(message: String) -> ProgressBar {
    let bar = ProgressBar::new_spinner().with_message(message);
    bar.enable_steady_tick(Duration::from_millis(100));

    bar
}

/// Creates a byte progress bar; the length is set once the remote size is known.
pub fn create_download_bar(message: String) -> ProgressBar {
    ProgressBar::new(0).with_message(message).with_style(
        ProgressStyle::with_template("{msg} [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({percent}%) {eta}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=> "),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn should_verify_cli() {
        Cli::command().debug_assert();
    }

    #[test]
    fn should_parse_fetch_command() {
        let cli = Cli::try_parse_from([
            "hydrofetch",
            "fetch",
            "2016.csv.gz",
            "--host",
            "ftp.ncdc.noaa.gov",
            "--dir",
            "pub/data/ghcn/daily/by_year",
            "--gunzip",
            "--attempts",
            "3",
        ])
        .unwrap();

        match cli.command {
            Commands::Fetch(args) => {
                assert_eq!(args.remote_name, "2016.csv.gz");
                assert_eq!(args.port, 21);
                assert!(args.gunzip);
                assert!(!args.untar);
                assert_eq!(args.attempts, Some(3));
            }
            Commands::List(_) => panic!("expected fetch"),
        }
    }

    #[test]
    fn should_require_gunzip_for_untar() {
        let result = Cli::try_parse_from(["hydrofetch", "fetch", "x.tar.gz", "--host", "h", "--untar"]);
        assert!(result.is_err());
    }

    #[test]
    fn should_show_progress_bar_conversion() {
        let pb = create_download_bar("Testing...".to_string());
        pb.set_length(1000);
        pb.set_position(500);

        assert_eq!(pb.length().unwrap(), 1000);
        assert_eq!(pb.position(), 500);
    }
}
