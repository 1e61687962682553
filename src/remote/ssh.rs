use super::{
    connect_with_retry, decode_output, ensure_parent_dir, CommandOutput, ConnectionTarget,
    Connector, FileTransfer, RemoteError, RemoteShell,
};
use async_trait::async_trait;
use ssh2::{Channel, ErrorCode, HashType, Session};
use std::fs::File;
use std::io::{self, Read};
use std::net::{TcpStream, ToSocketAddrs};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

const LIBSSH2_ERROR_TIMEOUT: i32 = -9;
const LIBSSH2_FX_NO_SUCH_FILE: i32 = 2;
const POLL_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Debug, Clone)]
pub struct SshConnector {
    pub retry: u32,
    pub connect_timeout: Duration,
    pub command_timeout: Duration,
}

#[async_trait]
impl Connector for SshConnector {
    type Shell = SshShell;

    async fn connect(&self, target: &ConnectionTarget) -> Result<SshShell, RemoteError> {
        connect_with_retry(&target.host, self.retry, || self.connect_once(target)).await
    }
}

impl SshConnector {
    async fn connect_once(&self, target: &ConnectionTarget) -> Result<SshShell, RemoteError> {
        let owned = target.clone();
        let connect_timeout = self.connect_timeout;
        let command_timeout = self.command_timeout;
        let session = tokio::task::spawn_blocking(move || {
            open_session(&owned, connect_timeout, command_timeout)
        })
        .await
        .map_err(|err| join_error(&target.host, err))??;

        Ok(SshShell {
            host: target.host.clone(),
            session: Some(Arc::new(session)),
            command_timeout,
        })
    }
}

fn open_session(
    target: &ConnectionTarget,
    connect_timeout: Duration,
    command_timeout: Duration,
) -> Result<Session, RemoteError> {
    let network = |source: io::Error| connect_error(&target.host, source);

    let addrs = (target.host.as_str(), target.port)
        .to_socket_addrs()
        .map_err(network)?;

    let mut last_err = io::Error::new(io::ErrorKind::NotFound, "host resolved to no addresses");
    let mut stream = None;
    for addr in addrs {
        match TcpStream::connect_timeout(&addr, connect_timeout) {
            Ok(s) => {
                stream = Some(s);
                break;
            }
            Err(err) => last_err = err,
        }
    }
    let stream = stream.ok_or_else(|| network(last_err))?;

    let mut session = Session::new().map_err(|err| ssh_error(&target.host, err))?;
    session.set_tcp_stream(stream);
    session.set_timeout(millis_u32(connect_timeout));
    session.handshake().map_err(|err| {
        if is_timeout(&err) {
            RemoteError::ConnectTimeout {
                host: target.host.clone(),
            }
        } else {
            ssh_error(&target.host, err)
        }
    })?;

    // Unknown host keys are accepted; the fingerprint is logged for auditing.
    if let Some(hash) = session.host_key_hash(HashType::Sha256) {
        debug!(host = %target.host, fingerprint = %hex::encode(hash), "host key");
    }

    session
        .userauth_password(&target.username, &target.password)
        .map_err(|_| RemoteError::Auth {
            host: target.host.clone(),
            username: target.username.clone(),
        })?;
    if !session.authenticated() {
        return Err(RemoteError::Auth {
            host: target.host.clone(),
            username: target.username.clone(),
        });
    }

    session.set_timeout(millis_u32(command_timeout));
    Ok(session)
}

pub struct SshShell {
    host: String,
    session: Option<Arc<Session>>,
    command_timeout: Duration,
}

impl SshShell {
    fn session(&self) -> Result<Arc<Session>, RemoteError> {
        self.session.clone().ok_or_else(|| RemoteError::Closed {
            host: self.host.clone(),
        })
    }
}

#[async_trait]
impl RemoteShell for SshShell {
    fn host(&self) -> &str {
        &self.host
    }

    async fn exec(&mut self, command: &str) -> Result<CommandOutput, RemoteError> {
        let session = self.session()?;
        let host = self.host.clone();
        let owned = command.to_string();
        let timeout_ms = self.command_timeout.as_millis() as u64;

        debug!(host = %self.host, command, "exec");
        let task = tokio::task::spawn_blocking(move || run_command(&session, &host, &owned, timeout_ms));

        match tokio::time::timeout(self.command_timeout, task).await {
            Ok(joined) => joined.map_err(|err| join_error(&self.host, err))?,
            Err(_elapsed) => Err(RemoteError::CommandTimeout {
                command: command.to_string(),
                timeout_ms,
            }),
        }
    }

    async fn fetch_files(&mut self, transfers: &[FileTransfer]) -> Result<usize, RemoteError> {
        let session = self.session()?;
        let host = self.host.clone();
        let owned = transfers.to_vec();

        tokio::task::spawn_blocking(move || copy_files(&session, &host, &owned))
            .await
            .map_err(|err| join_error(&self.host, err))?
    }

    async fn close(&mut self) -> Result<(), RemoteError> {
        let Some(session) = self.session.take() else {
            return Ok(());
        };
        let host = self.host.clone();
        tokio::task::spawn_blocking(move || {
            session
                .disconnect(None, "monitoring finished", None)
                .map_err(|err| ssh_error(&host, err))
        })
        .await
        .map_err(|err| join_error(&self.host, err))?
    }
}

impl Drop for SshShell {
    fn drop(&mut self) {
        let Some(session) = self.session.take() else {
            return;
        };
        warn!(host = %self.host, "ssh session dropped without close");
        let host = self.host.clone();
        let disconnect = move || {
            if let Err(err) = session.disconnect(None, "connection dropped", None) {
                debug!(host = %host, error = %err, "disconnect on drop failed");
            }
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn_blocking(disconnect);
            }
            Err(_) => disconnect(),
        }
    }
}

fn run_command(
    session: &Session,
    host: &str,
    command: &str,
    timeout_ms: u64,
) -> Result<CommandOutput, RemoteError> {
    let timed_out = || RemoteError::CommandTimeout {
        command: command.to_string(),
        timeout_ms,
    };
    let from_ssh = |err: ssh2::Error| {
        if is_timeout(&err) {
            timed_out()
        } else {
            ssh_error(host, err)
        }
    };
    let from_io = |err: io::Error| {
        if err.kind() == io::ErrorKind::TimedOut {
            timed_out()
        } else {
            RemoteError::Ssh {
                host: host.to_string(),
                message: err.to_string(),
            }
        }
    };

    let mut channel = session.channel_session().map_err(from_ssh)?;
    channel.exec(command).map_err(from_ssh)?;

    session.set_blocking(false);
    let drained = drain_streams(&mut channel, Instant::now() + Duration::from_millis(timeout_ms));
    session.set_blocking(true);
    let (stdout, stderr) = drained.map_err(from_io)?;
    channel.wait_close().map_err(from_ssh)?;

    Ok(CommandOutput {
        stdout: decode_output(&stdout),
        stderr: decode_output(&stderr),
        exit_status: channel.exit_status().ok(),
    })
}

// Reads stdout and stderr in turn so a full stderr window cannot stall stdout.
fn drain_streams(channel: &mut Channel, deadline: Instant) -> io::Result<(Vec<u8>, Vec<u8>)> {
    let (mut stdout, mut stderr) = (Vec::new(), Vec::new());
    let mut buf = [0u8; 8192];
    loop {
        let read_out = read_available(channel, &mut buf, &mut stdout)?;
        let read_err = read_available(&mut channel.stderr(), &mut buf, &mut stderr)?;
        if read_out + read_err > 0 {
            continue;
        }
        if channel.eof() {
            return Ok((stdout, stderr));
        }
        if Instant::now() >= deadline {
            return Err(io::Error::from(io::ErrorKind::TimedOut));
        }
        std::thread::sleep(POLL_INTERVAL);
    }
}

fn read_available(stream: &mut impl Read, buf: &mut [u8], into: &mut Vec<u8>) -> io::Result<usize> {
    match stream.read(buf) {
        Ok(n) => {
            into.extend_from_slice(&buf[..n]);
            Ok(n)
        }
        Err(err) if err.kind() == io::ErrorKind::WouldBlock => Ok(0),
        Err(err) => Err(err),
    }
}

fn copy_files(
    session: &Session,
    host: &str,
    transfers: &[FileTransfer],
) -> Result<usize, RemoteError> {
    let sftp = session.sftp().map_err(|err| ssh_error(host, err))?;
    let mut copied = 0;

    for transfer in transfers {
        let mut remote = match sftp.open(Path::new(&transfer.remote)) {
            Ok(file) => file,
            Err(err) if err.code() == ErrorCode::SFTP(LIBSSH2_FX_NO_SUCH_FILE) => {
                warn!(host, path = %transfer.remote, "file not found on host");
                continue;
            }
            Err(err) => return Err(ssh_error(host, err)),
        };

        ensure_parent_dir(&transfer.local)?;
        let mut local = File::create(&transfer.local)?;
        io::copy(&mut remote, &mut local)?;
        debug!(host, remote = %transfer.remote, local = %transfer.local.display(), "file copied");
        copied += 1;
    }

    Ok(copied)
}

fn connect_error(host: &str, source: io::Error) -> RemoteError {
    if source.kind() == io::ErrorKind::TimedOut {
        RemoteError::ConnectTimeout {
            host: host.to_string(),
        }
    } else {
        RemoteError::Network {
            host: host.to_string(),
            source,
        }
    }
}

fn is_timeout(err: &ssh2::Error) -> bool {
    err.code() == ErrorCode::Session(LIBSSH2_ERROR_TIMEOUT)
}

fn ssh_error(host: &str, err: ssh2::Error) -> RemoteError {
    RemoteError::Ssh {
        host: host.to_string(),
        message: err.to_string(),
    }
}

fn join_error(host: &str, err: tokio::task::JoinError) -> RemoteError {
    RemoteError::Ssh {
        host: host.to_string(),
        message: format!("blocking task failed: {err}"),
    }
}

fn millis_u32(duration: Duration) -> u32 {
    u32::try_from(duration.as_millis()).unwrap_or(u32::MAX)
}
