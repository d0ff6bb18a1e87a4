//! Control connection: connect, login and the handful of commands a
//! single-file retrieval needs.

use std::{
    net::{IpAddr, SocketAddr},
    sync::OnceLock,
    time::Duration,
};

use regex::Regex;
use socket2::{SockRef, TcpKeepalive};
use tokio::{
    io::AsyncReadExt,
    net::TcpStream,
    time::timeout,
};
use tracing::{debug, warn};

use super::{
    error::{FtpError, FtpResult},
    reply::{Codec, Reply},
};

pub const DEFAULT_PORT: u16 = 21;

/// Where to connect and who to log in as.
#[derive(Debug, Clone)]
pub struct FtpEndpoint {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
}

impl FtpEndpoint {
    /// Anonymous login on the standard port.
    pub fn anonymous(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: DEFAULT_PORT,
            username: "anonymous".to_string(),
            password: String::new(),
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = username.into();
        self.password = password.into();
        self
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Enables TCP keep-alive probes so long idle periods on the control
/// channel are not dropped silently by middleboxes.
pub fn configure_keepalive(stream: &TcpStream) -> FtpResult<()> {
    let keepalive = TcpKeepalive::new()
        .with_time(Duration::from_secs(60))
        .with_interval(Duration::from_secs(15));
    SockRef::from(stream).set_tcp_keepalive(&keepalive)?;
    Ok(())
}

/// A logged-in control connection in binary transfer mode.
pub struct ControlConnection {
    codec: Codec,
    peer: IpAddr,
    data_timeout: Duration,
}

impl ControlConnection {
    /// Connects, reads the banner, logs in and switches to `TYPE I`.
    pub async fn open(endpoint: &FtpEndpoint, connect_timeout: Duration) -> FtpResult<Self> {
        let addr = endpoint.address();
        let stream = timeout(connect_timeout, TcpStream::connect(&addr))
            .await
            .map_err(|_| FtpError::Timeout {
                action: "connecting",
                secs: connect_timeout.as_secs(),
            })?
            .map_err(|source| FtpError::Connect {
                addr: addr.clone(),
                source,
            })?;

        stream.set_nodelay(true)?;
        configure_keepalive(&stream)?;
        let peer = stream.peer_addr()?.ip();

        let mut codec = Codec::new(stream);
        let banner = codec.read_reply().await?;
        if !banner.is_completion() {
            return Err(FtpError::rejected("<connect>", banner.code, banner.message()));
        }
        debug!(%addr, banner = banner.message(), "connected");

        let mut conn = Self {
            codec,
            peer,
            data_timeout: connect_timeout,
        };
        conn.login(&endpoint.username, &endpoint.password).await?;
        conn.codec.expect_ok("TYPE I").await?;

        Ok(conn)
    }

    async fn login(&mut self, username: &str, password: &str) -> FtpResult<()> {
        let user = format!("USER {username}");
        let reply = self.codec.execute(&user).await?;
        if reply.is_completion() {
            return Ok(());
        }
        if reply.code != 331 {
            return Err(FtpError::rejected(&user, reply.code, reply.message()));
        }

        self.codec.expect_ok(&format!("PASS {password}")).await?;
        Ok(())
    }

    pub async fn cwd(&mut self, dir: &str) -> FtpResult<()> {
        self.codec.expect_ok(&format!("CWD {dir}")).await?;
        Ok(())
    }

    /// Remote file size in bytes (RFC 3659 `SIZE`), reply `213 <n>`.
    pub async fn size(&mut self, name: &str) -> FtpResult<u64> {
        let reply = self.codec.expect_ok(&format!("SIZE {name}")).await?;
        reply
            .message()
            .parse::<u64>()
            .map_err(|_| FtpError::Protocol(format!("cannot parse SIZE reply `{}`", reply.status_line())))
    }

    /// Issues `PASV` and connects to the advertised data port.
    async fn open_passive(&mut self) -> FtpResult<TcpStream> {
        let reply = self.codec.expect_ok("PASV").await?;
        let mut addr = parse_pasv(reply.status_line())?;

        // Servers behind NAT often advertise an unroutable address.
        if addr.ip().is_unspecified() {
            warn!(advertised = %addr, "server advertised unspecified passive address, using control peer");
            addr.set_ip(self.peer);
        }

        let stream = timeout(self.data_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| FtpError::Timeout {
                action: "opening data connection",
                secs: self.data_timeout.as_secs(),
            })?
            .map_err(|source| FtpError::Connect {
                addr: addr.to_string(),
                source,
            })?;
        configure_keepalive(&stream)?;
        Ok(stream)
    }

    /// Starts a binary retrieval of `name` at `offset` and returns the data
    /// stream. The final status must be collected with [`finish_transfer`].
    ///
    /// [`finish_transfer`]: ControlConnection::finish_transfer
    pub async fn retrieve(&mut self, name: &str, offset: u64) -> FtpResult<TcpStream> {
        let data = self.open_passive().await?;

        if offset > 0 {
            let rest = format!("REST {offset}");
            let reply = self.codec.execute(&rest).await?;
            if reply.code != 350 {
                return Err(FtpError::rejected(&rest, reply.code, reply.message()));
            }
        }

        let retr = format!("RETR {name}");
        let reply = self.codec.execute(&retr).await?;
        if !reply.is_preliminary() {
            return Err(FtpError::rejected(&retr, reply.code, reply.message()));
        }

        Ok(data)
    }

    /// Reads the reply that closes a data transfer.
    pub async fn finish_transfer(&mut self) -> FtpResult<Reply> {
        self.codec.read_reply().await
    }

    /// `NLST` of the current directory.
    pub async fn name_list(&mut self) -> FtpResult<Vec<String>> {
        let mut data = self.open_passive().await?;

        let reply = self.codec.execute("NLST").await?;
        if !reply.is_preliminary() {
            return Err(FtpError::rejected("NLST", reply.code, reply.message()));
        }

        let mut listing = String::new();
        data.read_to_string(&mut listing).await?;
        drop(data);

        let done = self.codec.read_reply().await?;
        if !done.is_completion() {
            return Err(FtpError::rejected("NLST", done.code, done.message()));
        }

        Ok(listing
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect())
    }

    /// Best-effort `QUIT`; the connection is dropped either way.
    pub async fn quit(mut self) {
        if let Err(e) = self.codec.execute("QUIT").await {
            debug!("QUIT failed: {e}");
        }
    }
}

/// Parses `227 Entering Passive Mode (h1,h2,h3,h4,p1,p2)`.
fn parse_pasv(text: &str) -> FtpResult<SocketAddr> {
    static PASV: OnceLock<Result<Regex, regex::Error>> = OnceLock::new();
    let re = PASV
        .get_or_init(|| Regex::new(r"(\d+),(\d+),(\d+),(\d+),(\d+),(\d+)"))
        .as_ref()
        .map_err(|e| FtpError::Protocol(format!("PASV pattern: {e}")))?;
    let caps = re
        .captures(text)
        .ok_or_else(|| FtpError::Protocol(format!("cannot parse PASV reply `{text}`")))?;

    let nums = (1..=6)
        .map(|i| caps[i].parse::<u8>())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|_| FtpError::Protocol(format!("PASV field out of range in `{text}`")))?;

    let ip = IpAddr::from([nums[0], nums[1], nums[2], nums[3]]);
    let port = u16::from(nums[4]) * 256 + u16::from(nums[5]);
    Ok(SocketAddr::new(ip, port))
}
