//! FTP transport errors and the terminal outcomes of a fetch.

use std::{io, path::PathBuf};

use thiserror::Error;

/// Failure of a single connection or transfer attempt.
///
/// Everything here is considered transient by the fetcher: it is logged,
/// counted against the attempt budget and retried on a fresh connection.
#[derive(Debug, Error)]
pub enum FtpError {
    #[error("connection to {addr} failed: {source}")]
    Connect { addr: String, source: io::Error },

    #[error("timed out after {secs}s while {action}")]
    Timeout { action: &'static str, secs: u64 },

    #[error("server closed the control connection")]
    Disconnected,

    #[error("server replied {code} to `{command}`: {text}")]
    Rejected {
        command: String,
        code: u16,
        text: String,
    },

    #[error("malformed reply: {0}")]
    Protocol(String),

    #[error("transfer stalled, connection dropped")]
    Stalled,

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl FtpError {
    pub fn rejected(command: &str, code: u16, text: impl Into<String>) -> Self {
        // Never echo the password back into logs.
        let command = if command.starts_with("PASS ") {
            "PASS ****".to_string()
        } else {
            command.to_string()
        };
        Self::Rejected {
            command,
            code,
            text: text.into(),
        }
    }

    /// Reply code attached to a rejection, if any.
    pub fn code(&self) -> Option<u16> {
        match self {
            Self::Rejected { code, .. } => Some(*code),
            _ => None,
        }
    }
}

pub type FtpResult<T> = Result<T, FtpError>;

/// Terminal outcome of a fetch. Only these cross the fetcher boundary.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("remote file `{0}` not found")]
    RemoteNotFound(String),

    #[error("gave up after {attempts} failed attempts, last error: {last}")]
    ConnectionExhausted { attempts: u32, last: FtpError },

    #[error("transfer of {bytes} bytes not confirmed by server (final status: {status})")]
    TransferIncomplete { bytes: u64, status: String },

    #[error("cannot use local file {}: {source}", path.display())]
    Local { path: PathBuf, source: io::Error },

    #[error("invalid fetch request: {0}")]
    InvalidRequest(String),
}
