//! Minimal FTP client: resumable single-file retrieval and name listing.

pub mod connection;
pub mod error;
pub mod fetch;
pub mod list;
pub mod reply;
pub mod session;

#[cfg(test)]
pub mod mock;

pub use connection::FtpEndpoint;
pub use error::{FetchError, FtpError};
pub use fetch::{fetch, FetchOptions, FetchReport, FetchRequest, Fetcher};
pub use list::list_names;
