//! Name listing of a remote directory.

use std::time::Duration;

use tracing::{debug, error};

use super::{
    connection::{ControlConnection, FtpEndpoint},
    error::{FtpError, FtpResult},
};

/// Lists the file names in `dir`. An empty directory, which servers
/// report as `550 No files found`, gives an empty list.
pub async fn list_names(endpoint: &FtpEndpoint, dir: &str, connect_timeout: Duration) -> FtpResult<Vec<String>> {
    let mut conn = ControlConnection::open(endpoint, connect_timeout).await?;
    conn.cwd(dir).await?;

    let names = match conn.name_list().await {
        Ok(names) => names,
        Err(FtpError::Rejected { code: 550, text, .. }) if text == "No files found" => {
            error!(%dir, "no files in this directory");
            Vec::new()
        }
        Err(e) => return Err(e),
    };

    debug!(%dir, count = names.len(), "listed");
    conn.quit().await;
    Ok(names)
}
