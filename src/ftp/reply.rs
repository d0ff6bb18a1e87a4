//! Command/reply codec for the FTP control channel (RFC 959 section 4.2).

use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::{
        tcp::{OwnedReadHalf, OwnedWriteHalf},
        TcpStream,
    },
};
use tracing::trace;

use super::error::{FtpError, FtpResult};

/// A complete, possibly multi-line, server reply.
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    pub code: u16,
    pub lines: Vec<String>,
}

impl Reply {
    /// Last line of the reply, the one carrying the final code.
    pub fn status_line(&self) -> &str {
        self.lines.last().map(String::as_str).unwrap_or("")
    }

    /// Text of the reply without the leading code.
    pub fn message(&self) -> &str {
        let line = self.status_line();
        line.get(4..).unwrap_or("").trim()
    }

    /// 1xx
    pub fn is_preliminary(&self) -> bool {
        (100..200).contains(&self.code)
    }

    /// 2xx
    pub fn is_completion(&self) -> bool {
        (200..300).contains(&self.code)
    }
}

/// Line codec over a split control stream.
pub struct Codec {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl Codec {
    pub fn new(stream: TcpStream) -> Self {
        let (rd, wr) = stream.into_split();
        Self {
            reader: BufReader::new(rd),
            writer: wr,
        }
    }

    pub async fn send(&mut self, command: &str) -> FtpResult<()> {
        self.writer
            .write_all(format!("{command}\r\n").as_bytes())
            .await?;
        if command.starts_with("PASS ") {
            trace!(">>> PASS ****");
        } else {
            trace!(">>> {command}");
        }
        Ok(())
    }

    async fn read_line(&mut self) -> FtpResult<String> {
        let mut buf = String::new();
        if self.reader.read_line(&mut buf).await? == 0 {
            return Err(FtpError::Disconnected);
        }
        Ok(buf.trim_end_matches(['\r', '\n']).to_string())
    }

    /// Reads one reply. A first line of the form `NNN-` opens a multi-line
    /// reply that runs until a line starting with `NNN `.
    pub async fn read_reply(&mut self) -> FtpResult<Reply> {
        let first = self.read_line().await?;
        let code = parse_code(&first)?;
        let mut lines = vec![first];

        if lines[0].as_bytes().get(3) == Some(&b'-') {
            let terminator = format!("{code} ");
            loop {
                let next = self.read_line().await?;
                let done = next.starts_with(&terminator);
                lines.push(next);
                if done {
                    break;
                }
            }
        }

        let reply = Reply { code, lines };
        trace!("<<< {}", reply.status_line());
        Ok(reply)
    }

    pub async fn execute(&mut self, command: &str) -> FtpResult<Reply> {
        self.send(command).await?;
        self.read_reply().await
    }

    /// Sends a command and fails unless the reply is a 2xx completion.
    pub async fn expect_ok(&mut self, command: &str) -> FtpResult<Reply> {
        let reply = self.execute(command).await?;
        if !reply.is_completion() {
            return Err(FtpError::rejected(command, reply.code, reply.message()));
        }
        Ok(reply)
    }
}

fn parse_code(line: &str) -> FtpResult<u16> {
    line.get(..3)
        .and_then(|c| c.parse::<u16>().ok())
        .filter(|c| (100..600).contains(c))
        .ok_or_else(|| FtpError::Protocol(format!("no reply code in `{line}`")))
}
