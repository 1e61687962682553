pub mod checks;
pub mod clock;
pub mod disk;
pub mod shell;
pub mod uptime;

use crate::remote::{FileTransfer, RemoteError, RemoteShell};
use chrono::NaiveDateTime;
use clock::ClockDirection;
use shell::ShellFlavor;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("could not parse {probe} output: {detail}")]
    Parse { probe: &'static str, detail: String },
    #[error(transparent)]
    Remote(#[from] RemoteError),
}

pub struct RemoteSystem<S> {
    shell: S,
    flavor: Option<ShellFlavor>,
}

impl<S: RemoteShell> RemoteSystem<S> {
    pub fn new(shell: S) -> Self {
        Self {
            shell,
            flavor: None,
        }
    }

    pub fn host(&self) -> &str {
        self.shell.host()
    }

    pub async fn free_space(&mut self, drive: &str) -> Result<u64, ProbeError> {
        disk::free_space(&mut self.shell, drive).await
    }

    pub async fn system_time(&mut self) -> Result<NaiveDateTime, ProbeError> {
        clock::system_time(&mut self.shell).await
    }

    pub async fn shell_flavor(&mut self) -> Result<ShellFlavor, ProbeError> {
        if let Some(flavor) = self.flavor {
            return Ok(flavor);
        }
        let flavor = shell::detect(&mut self.shell).await?;
        self.flavor = Some(flavor);
        Ok(flavor)
    }

    pub async fn nudge_clock(
        &mut self,
        direction: ClockDirection,
        millis: u32,
    ) -> Result<(), ProbeError> {
        let flavor = self.shell_flavor().await?;
        clock::nudge(&mut self.shell, flavor, direction, millis).await
    }

    pub async fn boot_time(&mut self) -> Result<Option<NaiveDateTime>, ProbeError> {
        uptime::boot_time(&mut self.shell).await
    }

    pub async fn fetch_files(&mut self, transfers: &[FileTransfer]) -> Result<usize, ProbeError> {
        Ok(self.shell.fetch_files(transfers).await?)
    }

    pub async fn close(mut self) -> Result<(), RemoteError> {
        self.shell.close().await
    }
}
