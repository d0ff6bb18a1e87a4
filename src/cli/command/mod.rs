pub mod fetch;
pub mod list;

use std::path::{Path, PathBuf};

use hydrofetch::{config::Config, ftp::FtpEndpoint};

pub use fetch::fetch;
pub use list::list;

use super::Cli;

/// Builds the endpoint, with command line credentials taking precedence
/// over the configured ones.
pub fn make_endpoint(cli: &Cli, config: &Config, host: &str, port: u16) -> FtpEndpoint {
    let username = cli.ftp_username.as_deref().unwrap_or(&config.ftp.username);
    let password = cli.ftp_password.as_deref().unwrap_or(&config.ftp.password);

    FtpEndpoint::anonymous(host)
        .with_port(port)
        .with_credentials(username, password)
}

/// Destination for a fetched file: the explicit path, or the remote name's
/// last segment inside the data directory.
pub fn make_local_path(out: Option<&Path>, data_dir: &Path, remote_name: &str) -> PathBuf {
    match out {
        Some(path) => path.to_path_buf(),
        None => {
            let file_name = remote_name.rsplit('/').next().unwrap_or(remote_name);
            data_dir.join(file_name)
        }
    }
}

// -- Tests -------------------------------------------------------------------
