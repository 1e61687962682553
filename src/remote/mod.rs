#[cfg(test)]
pub mod mock;
pub mod ssh;

use async_trait::async_trait;
use std::future::Future;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("timed out connecting to {host}")]
    ConnectTimeout { host: String },
    #[error("could not reach {host}: {source}")]
    Network {
        host: String,
        source: std::io::Error,
    },
    #[error("authentication failed for {username}@{host}")]
    Auth { host: String, username: String },
    #[error("command `{command}` timed out after {timeout_ms} ms")]
    CommandTimeout { command: String, timeout_ms: u64 },
    #[error("ssh error on {host}: {message}")]
    Ssh { host: String, message: String },
    #[error("connection to {host} is already closed")]
    Closed { host: String },
    #[error("local file error: {0}")]
    Io(#[from] std::io::Error),
}

impl RemoteError {
    pub fn is_unreachable(&self) -> bool {
        matches!(
            self,
            RemoteError::ConnectTimeout { .. } | RemoteError::Network { .. }
        )
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_status: Option<i32>,
}

#[derive(Clone)]
pub struct ConnectionTarget {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for ConnectionTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionTarget")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileTransfer {
    pub remote: String,
    pub local: PathBuf,
}

// Each file keeps its base name inside `dir`.
pub fn plan_transfers(remote_paths: &[String], dir: &Path) -> Vec<FileTransfer> {
    remote_paths
        .iter()
        .map(|remote| FileTransfer {
            remote: remote.clone(),
            local: dir.join(remote_base_name(remote)),
        })
        .collect()
}

// Remote paths may use either separator regardless of the local platform.
fn remote_base_name(remote: &str) -> &str {
    remote
        .rsplit(['/', '\\'])
        .find(|part| !part.is_empty())
        .unwrap_or(remote)
}

#[async_trait]
pub trait RemoteShell: Send {
    fn host(&self) -> &str;

    async fn exec(&mut self, command: &str) -> Result<CommandOutput, RemoteError>;

    // Missing remote files are skipped; returns the number copied.
    async fn fetch_files(&mut self, transfers: &[FileTransfer]) -> Result<usize, RemoteError>;

    async fn close(&mut self) -> Result<(), RemoteError>;
}

#[async_trait]
pub trait Connector: Send + Sync {
    type Shell: RemoteShell;

    async fn connect(&self, target: &ConnectionTarget) -> Result<Self::Shell, RemoteError>;
}

// `retry` counts extra attempts. Only connection timeouts are retried.
pub async fn connect_with_retry<T, F, Fut>(
    host: &str,
    retry: u32,
    mut attempt: F,
) -> Result<T, RemoteError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, RemoteError>>,
{
    let attempts = retry.saturating_add(1);
    let mut made = 0;
    loop {
        made += 1;
        match attempt().await {
            Ok(value) => return Ok(value),
            Err(RemoteError::ConnectTimeout { .. }) if made < attempts => {
                warn!(host, attempt = made, "could not connect to remote host, retrying");
            }
            Err(err) => return Err(err),
        }
    }
}

// Windows tools may write UTF-16LE. Plain ASCII in UTF-16LE is also valid UTF-8,
// so the UTF-16 check has to come first.
pub fn decode_output(bytes: &[u8]) -> String {
    if let Some(units) = utf16le_units(bytes) {
        if let Ok(s) = String::from_utf16(&units) {
            return s;
        }
    }

    match std::str::from_utf8(bytes) {
        Ok(utf8) => utf8.to_string(),
        Err(_) => String::from_utf8_lossy(bytes).to_string(),
    }
}

fn utf16le_units(bytes: &[u8]) -> Option<Vec<u16>> {
    let (body, has_bom) = match bytes.strip_prefix(&[0xFF, 0xFE]) {
        Some(rest) => (rest, true),
        None => (bytes, false),
    };
    if body.len() % 2 != 0 || (body.is_empty() && !has_bom) {
        return None;
    }

    let units: Vec<u16> = body
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .collect();
    let high_nul = body.chunks_exact(2).filter(|pair| pair[1] == 0).count();
    if has_bom || high_nul * 2 > units.len() {
        Some(units)
    } else {
        None
    }
}

pub fn ensure_parent_dir(path: &Path) -> std::io::Result<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => std::fs::create_dir_all(parent),
        _ => Ok(()),
    }
}
