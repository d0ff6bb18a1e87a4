//! Resumable single-file retrieval.
//!
//! A fetch opens the local file without truncating it, so bytes left by an
//! earlier run are kept and the transfer resumes after them. Every attempt
//! uses a fresh control connection and asks the server to restart at the
//! number of bytes already flushed to disk. A stall monitor drops
//! connections that stop delivering data; dropped connections are retried
//! after a fixed backoff until the attempt budget runs out.

use std::{
    future::Future,
    io::SeekFrom,
    path::{Path, PathBuf},
    time::Duration,
};

use indicatif::ProgressBar;
use tokio::{
    fs::{File, OpenOptions},
    io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt},
    sync::{mpsc, watch},
    time::{sleep, timeout},
};
use tracing::{debug, info, warn};

use super::{
    connection::{ControlConnection, FtpEndpoint},
    error::{FetchError, FtpError, FtpResult},
    reply::Reply,
    session::{Progress, SessionState, StallMonitor},
};

/// Read buffer for the data connection (64 KiB).
const CHUNK: usize = 65_536;

/// The only final status accepted as a confirmed transfer.
const TRANSFER_COMPLETE: u16 = 226;

/// Reply code a server sends for a file it does not have.
const FILE_UNAVAILABLE: u16 = 550;

#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub endpoint: FtpEndpoint,
    pub remote_dir: Option<String>,
    pub remote_name: String,
    pub local_path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct FetchOptions {
    /// Total number of connection attempts, at least one.
    pub max_attempts: u32,
    /// Period without byte progress after which a transfer counts as stalled.
    pub stall_timeout: Duration,
    /// Fixed pause between attempts.
    pub retry_backoff: Duration,
    /// Bound on each control-channel step before data flows: connecting and
    /// logging in, the size query, and starting the retrieval.
    pub connect_timeout: Duration,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            stall_timeout: Duration::from_secs(30),
            retry_backoff: Duration::from_secs(10),
            connect_timeout: Duration::from_secs(30),
        }
    }
}

/// Summary of a successful fetch.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchReport {
    pub local_path: PathBuf,
    pub bytes: u64,
    pub remote_size: u64,
    /// Bytes that were already on disk when the fetch started.
    pub resumed_from: u64,
    pub connect_attempts: u32,
    pub stalls: u32,
    /// Final status line of the last retrieval.
    pub status: String,
}

/// Downloads `remote_name` from an anonymous FTP server into `local_path`.
pub async fn fetch(
    host: &str,
    remote_dir: Option<&str>,
    remote_name: &str,
    local_path: &Path,
    max_attempts: u32,
    stall_timeout: Duration,
) -> Result<FetchReport, FetchError> {
    let request = FetchRequest {
        endpoint: FtpEndpoint::anonymous(host),
        remote_dir: remote_dir.map(str::to_string),
        remote_name: remote_name.to_string(),
        local_path: local_path.to_path_buf(),
    };
    let options = FetchOptions {
        max_attempts,
        stall_timeout,
        ..FetchOptions::default()
    };

    Fetcher::new(options).fetch(&request).await
}

/// Why an attempt ended early.
enum AttemptError {
    /// The remote file does not exist. Not retried.
    NotFound,
    /// Writing the local file failed. Not retried.
    Local(std::io::Error),
    /// Anything wrong with the connection. Retried.
    Transport(FtpError),
}

impl From<FtpError> for AttemptError {
    fn from(e: FtpError) -> Self {
        Self::Transport(e)
    }
}

/// What a successful attempt produced.
enum AttemptOutcome {
    /// A retrieval ran to its final reply.
    Retrieved(Reply),
    /// The local file is longer than the remote one.
    LocalLarger,
    /// Every byte arrived but the connection failed before the final reply.
    Unconfirmed(FtpError),
}

/// Per-fetch mutable state owned by the transfer loop.
struct Session {
    file: File,
    progress: Progress,
    state: watch::Sender<SessionState>,
    stall_rx: mpsc::Receiver<()>,
    remote_size: Option<u64>,
    attempts_remaining: u32,
    connect_attempts: u32,
    stalls: u32,
}

impl Session {
    fn set_state(&self, state: SessionState) {
        self.state.send_replace(state);
    }

    /// Discards stall notices aimed at an earlier connection.
    fn drain_stall_notices(&mut self) {
        while self.stall_rx.try_recv().is_ok() {}
    }
}

pub struct Fetcher {
    options: FetchOptions,
    progress_bar: Option<ProgressBar>,
}

impl Fetcher {
    pub fn new(options: FetchOptions) -> Self {
        Self {
            options,
            progress_bar: None,
        }
    }

    /// Reports byte progress on `bar`.
    pub fn with_progress_bar(mut self, bar: ProgressBar) -> Self {
        self.progress_bar = Some(bar);
        self
    }

    fn validate(&self, request: &FetchRequest) -> Result<(), FetchError> {
        if request.endpoint.host.trim().is_empty() {
            return Err(FetchError::InvalidRequest("host must not be empty".into()));
        }
        if request.remote_name.trim().is_empty() {
            return Err(FetchError::InvalidRequest("remote name must not be empty".into()));
        }
        if self.options.max_attempts == 0 {
            return Err(FetchError::InvalidRequest("max_attempts must be at least 1".into()));
        }
        if self.options.stall_timeout.is_zero() {
            return Err(FetchError::InvalidRequest("stall_timeout must be positive".into()));
        }
        Ok(())
    }

    pub async fn fetch(&self, request: &FetchRequest) -> Result<FetchReport, FetchError> {
        self.validate(request)?;

        let local = |source| FetchError::Local {
            path: request.local_path.clone(),
            source,
        };

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&request.local_path)
            .await
            .map_err(local)?;
        let resumed_from = file.metadata().await.map_err(local)?.len();
        file.seek(SeekFrom::Start(resumed_from)).await.map_err(local)?;

        info!(
            host = %request.endpoint.host,
            remote = %request.remote_name,
            local = %request.local_path.display(),
            resumed_from,
            "fetching"
        );

        let progress = Progress::new(resumed_from);
        let (state_tx, state_rx) = watch::channel(SessionState::Connecting);
        let (stall_tx, stall_rx) = mpsc::channel(1);
        let monitor = StallMonitor::spawn(self.options.stall_timeout, progress.clone(), state_rx, stall_tx);

        let mut session = Session {
            file,
            progress,
            state: state_tx,
            stall_rx,
            remote_size: None,
            attempts_remaining: self.options.max_attempts,
            connect_attempts: 0,
            stalls: 0,
        };

        let result = self.run(request, &mut session).await;
        monitor.stop();

        let bytes = session.progress.get();
        let remote_size = session.remote_size.unwrap_or(bytes);
        let status = result.and_then(|last| confirm(last, bytes, remote_size));

        let status = match status {
            Ok(status) => {
                session.set_state(SessionState::Complete);
                status
            }
            Err(e) => {
                session.set_state(SessionState::Failed);
                if let Some(bar) = &self.progress_bar {
                    bar.abandon();
                }
                return Err(e);
            }
        };

        if let Some(bar) = &self.progress_bar {
            bar.finish_with_message(format!("{} downloaded", request.remote_name));
        }
        info!(bytes, attempts = session.connect_attempts, stalls = session.stalls, "fetch complete");

        Ok(FetchReport {
            local_path: request.local_path.clone(),
            bytes,
            remote_size,
            resumed_from,
            connect_attempts: session.connect_attempts,
            stalls: session.stalls,
            status,
        })
    }

    /// Attempts until the remote size is reached or the budget is spent.
    async fn run(&self, request: &FetchRequest, session: &mut Session) -> Result<AttemptOutcome, FetchError> {
        loop {
            session.set_state(SessionState::Connecting);
            session.connect_attempts += 1;
            debug!(
                attempt = session.connect_attempts,
                offset = session.progress.get(),
                "connecting"
            );

            let error = match self.attempt(request, session).await {
                Ok(AttemptOutcome::Retrieved(reply)) => {
                    let bytes = session.progress.get();
                    let size = session.remote_size.unwrap_or(bytes);
                    if bytes >= size {
                        return Ok(AttemptOutcome::Retrieved(reply));
                    }
                    if reply.code == TRANSFER_COMPLETE {
                        FtpError::Protocol(format!("data connection closed after {bytes} of {size} bytes"))
                    } else {
                        FtpError::rejected("RETR", reply.code, reply.message())
                    }
                }
                Ok(outcome) => return Ok(outcome),
                Err(AttemptError::NotFound) => {
                    return Err(FetchError::RemoteNotFound(request.remote_name.clone()));
                }
                Err(AttemptError::Local(source)) => {
                    return Err(FetchError::Local {
                        path: request.local_path.clone(),
                        source,
                    });
                }
                Err(AttemptError::Transport(e)) => e,
            };

            if matches!(error, FtpError::Stalled) {
                session.stalls += 1;
            }

            // Every byte arrived on this connection but its final reply did not.
            let streamed = *session.state.borrow() != SessionState::Connecting;
            if let Some(size) = session.remote_size {
                if streamed && session.progress.get() >= size {
                    return Ok(AttemptOutcome::Unconfirmed(error));
                }
            }

            session.attempts_remaining -= 1;

            if session.attempts_remaining == 0 {
                return Err(FetchError::ConnectionExhausted {
                    attempts: session.connect_attempts,
                    last: error,
                });
            }

            warn!(
                attempt = session.connect_attempts,
                remaining = session.attempts_remaining,
                offset = session.progress.get(),
                "attempt failed, reconnecting in {:?}: {error}",
                self.options.retry_backoff
            );
            sleep(self.options.retry_backoff).await;
        }
    }

    /// Runs a step of the connecting state under `connect_timeout`; the stall
    /// monitor only watches transfers, so nothing else ends a silent server.
    async fn bounded<T>(&self, action: &'static str, step: impl Future<Output = FtpResult<T>>) -> FtpResult<T> {
        let limit = self.options.connect_timeout;
        timeout(limit, step).await.map_err(|_| FtpError::Timeout {
            action,
            secs: limit.as_secs(),
        })?
    }

    async fn connect(&self, request: &FetchRequest) -> FtpResult<ControlConnection> {
        let handshake = async {
            let mut conn = ControlConnection::open(&request.endpoint, self.options.connect_timeout).await?;
            if let Some(dir) = &request.remote_dir {
                conn.cwd(dir).await?;
            }
            Ok::<_, FtpError>(conn)
        };

        self.bounded("logging in", handshake).await
    }

    async fn quit(&self, conn: ControlConnection) {
        let _ = timeout(self.options.connect_timeout, conn.quit()).await;
    }

    /// One connection: connect, learn the size if unknown, retrieve from the
    /// current offset and stream to disk.
    async fn attempt(&self, request: &FetchRequest, session: &mut Session) -> Result<AttemptOutcome, AttemptError> {
        let mut conn = self.connect(request).await?;

        let size = match session.remote_size {
            Some(size) => size,
            None => {
                let size = match self.bounded("querying size", conn.size(&request.remote_name)).await {
                    Ok(size) => size,
                    Err(e) if e.code() == Some(FILE_UNAVAILABLE) => {
                        self.quit(conn).await;
                        return Err(AttemptError::NotFound);
                    }
                    Err(e) => return Err(e.into()),
                };
                debug!(size, "remote size");
                session.remote_size = Some(size);
                if let Some(bar) = &self.progress_bar {
                    bar.set_length(size);
                    bar.set_position(session.progress.get());
                }
                size
            }
        };

        // A local file that already holds every byte is still retrieved from
        // its end so the server confirms it.
        let offset = session.progress.get();
        if offset > size {
            self.quit(conn).await;
            return Ok(AttemptOutcome::LocalLarger);
        }

        let mut data = self
            .bounded("starting retrieval", conn.retrieve(&request.remote_name, offset))
            .await?;
        session.drain_stall_notices();
        session.set_state(SessionState::Transferring);

        let mut buf = vec![0u8; CHUNK];
        let mut overrun = false;
        loop {
            let n = tokio::select! {
                biased;
                Some(()) = session.stall_rx.recv() => {
                    session.set_state(SessionState::Stalled);
                    return Err(FtpError::Stalled.into());
                }
                read = data.read(&mut buf) => read.map_err(FtpError::from)?,
            };
            if n == 0 {
                break;
            }

            let written = session.progress.get();
            let take = (size - written).min(n as u64) as usize;
            if take < n && !overrun {
                overrun = true;
                warn!(size, "server sent more bytes than announced, ignoring the excess");
            }
            if take > 0 {
                session.file.write_all(&buf[..take]).await.map_err(AttemptError::Local)?;
                session.file.flush().await.map_err(AttemptError::Local)?;
                let total = session.progress.advance(take as u64);
                if let Some(bar) = &self.progress_bar {
                    bar.set_position(total);
                }
            }
        }
        drop(data);

        let reply = tokio::select! {
            biased;
            Some(()) = session.stall_rx.recv() => {
                session.set_state(SessionState::Stalled);
                return Err(FtpError::Stalled.into());
            }
            reply = conn.finish_transfer() => reply?,
        };
        debug!(status = reply.status_line(), "retrieval finished");

        self.quit(conn).await;
        Ok(AttemptOutcome::Retrieved(reply))
    }
}

/// Turns the last attempt into the final status line, or the reason the
/// transfer cannot be trusted.
fn confirm(last: AttemptOutcome, bytes: u64, remote_size: u64) -> Result<String, FetchError> {
    match last {
        AttemptOutcome::Retrieved(reply) if reply.code == TRANSFER_COMPLETE => Ok(reply.status_line().to_string()),
        AttemptOutcome::Retrieved(reply) => Err(FetchError::TransferIncomplete {
            bytes,
            status: reply.status_line().to_string(),
        }),
        AttemptOutcome::Unconfirmed(error) => Err(FetchError::TransferIncomplete {
            bytes,
            status: format!("no final status ({error})"),
        }),
        AttemptOutcome::LocalLarger => Err(FetchError::TransferIncomplete {
            bytes,
            status: format!("local file holds {bytes} bytes, remote has {remote_size}"),
        }),
    }
}
