//! Scripted in-process FTP server for tests.

use std::{
    collections::{BTreeMap, HashMap},
    io,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::{tcp::OwnedWriteHalf, TcpListener, TcpStream},
    task::JoinHandle,
};

use super::connection::FtpEndpoint;

/// How the server treats one control connection.
#[derive(Debug, Clone)]
pub enum Behaviour {
    Normal,
    /// Close the socket before sending the banner.
    CloseOnAccept,
    /// Send data up to this absolute offset, then close everything.
    DropAt(usize),
    /// Send data up to this absolute offset, then go silent.
    StallAt(usize),
    /// Send all data but finish with this status line instead of 226.
    FinalStatus(&'static str),
    /// Stop answering once this command arrives, keeping the socket open.
    SilentAfter(&'static str),
}

#[derive(Default)]
struct Shared {
    files: BTreeMap<String, Vec<u8>>,
    behaviours: HashMap<usize, Behaviour>,
    default_behaviour: Option<Behaviour>,
    password: Option<String>,
    connections: AtomicUsize,
    retrievals: AtomicUsize,
    rest_offsets: Mutex<Vec<u64>>,
}

#[derive(Default)]
pub struct MockServerBuilder {
    shared: Shared,
}

impl MockServerBuilder {
    pub fn file(mut self, name: &str, content: Vec<u8>) -> Self {
        self.shared.files.insert(name.to_string(), content);
        self
    }

    /// Behaviour for the `index`-th connection, counting from zero.
    pub fn connection(mut self, index: usize, behaviour: Behaviour) -> Self {
        self.shared.behaviours.insert(index, behaviour);
        self
    }

    pub fn every_connection(mut self, behaviour: Behaviour) -> Self {
        self.shared.default_behaviour = Some(behaviour);
        self
    }

    /// Requires `PASS <password>` after `USER`.
    pub fn password(mut self, password: &str) -> Self {
        self.shared.password = Some(password.to_string());
        self
    }

    pub async fn start(self) -> MockServer {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let shared = Arc::new(self.shared);

        let accept_shared = Arc::clone(&shared);
        let task = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let index = accept_shared.connections.fetch_add(1, Ordering::SeqCst);
                let behaviour = accept_shared
                    .behaviours
                    .get(&index)
                    .or(accept_shared.default_behaviour.as_ref())
                    .cloned()
                    .unwrap_or(Behaviour::Normal);
                let shared = Arc::clone(&accept_shared);
                tokio::spawn(async move {
                    let _ = serve(stream, shared, behaviour).await;
                });
            }
        });

        MockServer { port, shared, task }
    }
}

pub struct MockServer {
    port: u16,
    shared: Arc<Shared>,
    task: JoinHandle<()>,
}

impl MockServer {
    pub fn builder() -> MockServerBuilder {
        MockServerBuilder::default()
    }

    pub fn endpoint(&self) -> FtpEndpoint {
        FtpEndpoint::anonymous("127.0.0.1").with_port(self.port)
    }

    /// Control connections accepted so far.
    pub fn connections(&self) -> usize {
        self.shared.connections.load(Ordering::SeqCst)
    }

    /// `RETR` commands received so far.
    pub fn retrievals(&self) -> usize {
        self.shared.retrievals.load(Ordering::SeqCst)
    }

    /// Offsets of every `REST` command received, in order.
    pub fn rest_offsets(&self) -> Vec<u64> {
        self.shared.rest_offsets.lock().unwrap().clone()
    }
}

impl Drop for MockServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn send(wr: &mut OwnedWriteHalf, line: &str) -> io::Result<()> {
    wr.write_all(format!("{line}\r\n").as_bytes()).await
}

async fn serve(stream: TcpStream, shared: Arc<Shared>, behaviour: Behaviour) -> io::Result<()> {
    if let Behaviour::CloseOnAccept = behaviour {
        return Ok(());
    }

    let (rd, mut wr) = stream.into_split();
    let mut lines = BufReader::new(rd).lines();
    send(&mut wr, "220 mock FTP ready").await?;

    let mut passive: Option<TcpListener> = None;
    let mut offset = 0usize;

    while let Some(line) = lines.next_line().await? {
        let (cmd, arg) = line.split_once(' ').unwrap_or((line.as_str(), ""));
        if let Behaviour::SilentAfter(silent) = &behaviour {
            if cmd.eq_ignore_ascii_case(silent) {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                return Ok(());
            }
        }
        match cmd.to_ascii_uppercase().as_str() {
            "USER" if shared.password.is_some() => send(&mut wr, "331 Password required").await?,
            "USER" => send(&mut wr, "230 Logged in").await?,
            "PASS" => match &shared.password {
                Some(expected) if expected != arg => send(&mut wr, "530 Login incorrect").await?,
                _ => send(&mut wr, "230 Logged in").await?,
            },
            "TYPE" => send(&mut wr, "200 Type set to I").await?,
            "CWD" => send(&mut wr, "250 Directory successfully changed").await?,
            "SIZE" => match shared.files.get(arg) {
                Some(content) => send(&mut wr, &format!("213 {}", content.len())).await?,
                None => send(&mut wr, &format!("550 {arg}: No such file or directory")).await?,
            },
            "PASV" => {
                let listener = TcpListener::bind("127.0.0.1:0").await?;
                let port = listener.local_addr()?.port();
                passive = Some(listener);
                let reply = format!("227 Entering Passive Mode (127,0,0,1,{},{})", port / 256, port % 256);
                send(&mut wr, &reply).await?;
            }
            "REST" => {
                let n: u64 = arg.parse().unwrap_or(0);
                shared.rest_offsets.lock().unwrap().push(n);
                offset = n as usize;
                send(&mut wr, &format!("350 Restarting at {n}")).await?;
            }
            "RETR" => {
                shared.retrievals.fetch_add(1, Ordering::SeqCst);
                let Some(content) = shared.files.get(arg) else {
                    send(&mut wr, &format!("550 {arg}: No such file or directory")).await?;
                    continue;
                };
                let Some(listener) = passive.take() else {
                    send(&mut wr, "425 Use PASV first").await?;
                    continue;
                };
                send(&mut wr, "150 Opening BINARY mode data connection").await?;
                let (mut data, _) = listener.accept().await?;
                let start = std::mem::take(&mut offset).min(content.len());

                match &behaviour {
                    Behaviour::DropAt(cut) => {
                        let cut = (*cut).clamp(start, content.len());
                        data.write_all(&content[start..cut]).await?;
                        return Ok(());
                    }
                    Behaviour::StallAt(cut) => {
                        let cut = (*cut).clamp(start, content.len());
                        data.write_all(&content[start..cut]).await?;
                        tokio::time::sleep(Duration::from_secs(3600)).await;
                        return Ok(());
                    }
                    Behaviour::FinalStatus(status) => {
                        data.write_all(&content[start..]).await?;
                        drop(data);
                        send(&mut wr, status).await?;
                    }
                    _ => {
                        data.write_all(&content[start..]).await?;
                        drop(data);
                        send(&mut wr, "226 Transfer complete").await?;
                    }
                }
            }
            "NLST" => {
                if shared.files.is_empty() {
                    send(&mut wr, "550 No files found").await?;
                    continue;
                }
                let Some(listener) = passive.take() else {
                    send(&mut wr, "425 Use PASV first").await?;
                    continue;
                };
                send(&mut wr, "150 Here comes the directory listing").await?;
                let (mut data, _) = listener.accept().await?;
                let names: Vec<&str> = shared.files.keys().map(String::as_str).collect();
                data.write_all(format!("{}\r\n", names.join("\r\n")).as_bytes()).await?;
                drop(data);
                send(&mut wr, "226 Directory send OK").await?;
            }
            "QUIT" => {
                send(&mut wr, "221 Goodbye").await?;
                return Ok(());
            }
            _ => send(&mut wr, "502 Command not implemented").await?,
        }
    }

    Ok(())
}
